//! Parser for time strings.
//!
//! Grammar:
//!
//! ```text
//! time    := '+' expr | expr
//! expr    := term (('+' | '-') term)*
//! term    := factor (('*' | '/') factor)*
//! factor  := '-' factor | '(' expr ')' | atom
//! atom    := 1:2:3 | 4n | 4n. | 8t | 2m | 96i | 2hz | 1.5s | 512samples
//!          | 0.25 | now | humantime duration (250ms, 1min)
//! ```

use std::sync::LazyLock;

use regex::Regex;

use super::expression::{NoteKind, Op, TimeExpression};
use crate::error::{Error, Result};

static BARS_BEATS_SIXTEENTHS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)?):(\d+(?:\.\d+)?):?(\d+(?:\.\d+)?)?$")
        .expect("bars:beats:sixteenths pattern")
});
static NOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+)n(\.?)$").expect("note pattern"));
static TRIPLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+)t$").expect("triplet pattern"));
static MEASURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+(?:\.\d+)?)m$").expect("measure pattern"));
static TICKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+(?:\.\d+)?)i$").expect("ticks pattern"));
static HERTZ: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+(?:\.\d+)?)hz$").expect("hertz pattern"));
static SECONDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+(?:\.\d+)?)s$").expect("seconds pattern"));
static SAMPLES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+(?:\.\d+)?)samples$").expect("samples pattern"));
static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d*\.?\d+)$").expect("number pattern"));

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Word(String),
    Plus,
    Minus,
    Star,
    Slash,
    Open,
    Close,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Word(word) => format!("'{word}'"),
            Token::Plus => "'+'".into(),
            Token::Minus => "'-'".into(),
            Token::Star => "'*'".into(),
            Token::Slash => "'/'".into(),
            Token::Open => "'('".into(),
            Token::Close => "')'".into(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '+' | '-' | '*' | '/' | '(' | ')' => {
                chars.next();
                tokens.push(match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '(' => Token::Open,
                    _ => Token::Close,
                });
            }
            c if c.is_ascii_alphanumeric() || c == '.' || c == ':' => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '.' || c == ':' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(input[start..end].to_string()));
            }
            other => {
                return Err(Error::parse(input, format!("unexpected character '{other}'")));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, reason: impl Into<String>) -> Error {
        Error::parse(self.input, reason)
    }

    fn expr(&mut self) -> Result<TimeExpression> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => Op::Add,
                Some(Token::Minus) => Op::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = TimeExpression::math(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<TimeExpression> {
        let mut lhs = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => Op::Mul,
                Some(Token::Slash) => Op::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = TimeExpression::math(op, lhs, rhs);
        }
    }

    fn factor(&mut self) -> Result<TimeExpression> {
        match self.next() {
            Some(Token::Minus) => match self.factor()? {
                TimeExpression::Seconds(seconds) => Ok(TimeExpression::Seconds(-seconds)),
                other => Ok(TimeExpression::math(
                    Op::Sub,
                    TimeExpression::Seconds(0.0),
                    other,
                )),
            },
            Some(Token::Open) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    Some(token) => Err(self.error(format!(
                        "expected ')' but found {}",
                        token.describe()
                    ))),
                    None => Err(self.error("unbalanced parenthesis")),
                }
            }
            Some(Token::Word(word)) => parse_atom(self.input, &word),
            Some(token) => Err(self.error(format!("unexpected {}", token.describe()))),
            None => Err(self.error("expression ends early")),
        }
    }
}

fn number(input: &str, text: &str) -> Result<f64> {
    text.parse::<f64>()
        .map_err(|e| Error::parse(input, format!("bad number '{text}': {e}")))
}

fn parse_atom(input: &str, word: &str) -> Result<TimeExpression> {
    if let Some(caps) = BARS_BEATS_SIXTEENTHS.captures(word) {
        let bars = number(input, &caps[1])?;
        let beats = number(input, &caps[2])?;
        let sixteenths = match caps.get(3) {
            Some(m) => number(input, m.as_str())?,
            None => 0.0,
        };
        return Ok(TimeExpression::BarsBeatsSixteenths {
            bars,
            beats,
            sixteenths,
        });
    }
    if let Some(caps) = NOTE.captures(word) {
        return Ok(TimeExpression::Notation {
            value: number(input, &caps[1])?,
            kind: NoteKind::Note,
            dotted: &caps[2] == ".",
        });
    }
    if let Some(caps) = TRIPLET.captures(word) {
        return Ok(TimeExpression::notation(
            number(input, &caps[1])?,
            NoteKind::Triplet,
        ));
    }
    if let Some(caps) = MEASURE.captures(word) {
        return Ok(TimeExpression::notation(
            number(input, &caps[1])?,
            NoteKind::Measure,
        ));
    }
    if let Some(caps) = TICKS.captures(word) {
        return Ok(TimeExpression::Ticks(number(input, &caps[1])?));
    }
    if let Some(caps) = HERTZ.captures(word) {
        return Ok(TimeExpression::Frequency(number(input, &caps[1])?));
    }
    if let Some(caps) = SECONDS.captures(word) {
        return Ok(TimeExpression::Seconds(number(input, &caps[1])?));
    }
    if let Some(caps) = SAMPLES.captures(word) {
        return Ok(TimeExpression::Samples(number(input, &caps[1])?));
    }
    if let Some(caps) = NUMBER.captures(word) {
        return Ok(TimeExpression::Seconds(number(input, &caps[1])?));
    }
    if word.eq_ignore_ascii_case("now") {
        return Ok(TimeExpression::Now);
    }
    // Plain durations such as "250ms" are accepted as seconds.
    if let Ok(duration) = humantime::parse_duration(word) {
        return Ok(TimeExpression::Seconds(duration.as_secs_f64()));
    }
    Err(Error::parse(input, format!("unrecognized time '{word}'")))
}

/// Parse a time string into a [`TimeExpression`].
pub fn parse(input: &str) -> Result<TimeExpression> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::parse(input, "empty time"));
    }
    let (relative, body) = match trimmed.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let mut parser = Parser {
        input,
        tokens: tokenize(body)?,
        pos: 0,
    };
    let expr = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(parser.error(format!("unexpected trailing {}", token.describe())));
    }
    Ok(if relative {
        TimeExpression::relative(expr)
    } else {
        expr
    })
}
