//! Automation control points.

use std::sync::Arc;

use crate::timeline::Timed;

/// How an automation point is reached from the previous state.
#[derive(Clone, Debug, PartialEq)]
pub enum AutomationKind {
    /// Jump to the value at the point's time.
    Set,
    /// Straight line from the previous point.
    LinearRamp,
    /// Constant ratio per unit time from the previous point.
    ExponentialRamp,
    /// Approach the value asymptotically from the point's time on.
    Target { time_constant: f64 },
    /// Follow the samples, spread evenly over `duration`.
    ValueCurve { samples: Arc<[f64]>, duration: f64 },
}

/// A scheduled control point. Values are stored in internal units.
#[derive(Clone, Debug, PartialEq)]
pub struct AutomationEvent {
    pub time: f64,
    pub value: f64,
    pub kind: AutomationKind,
}

impl AutomationEvent {
    pub fn set(time: f64, value: f64) -> Self {
        Self {
            time,
            value,
            kind: AutomationKind::Set,
        }
    }

    /// Whether this point ends a linear or exponential ramp.
    pub fn is_ramp(&self) -> bool {
        matches!(
            self.kind,
            AutomationKind::LinearRamp | AutomationKind::ExponentialRamp
        )
    }

    /// When the point stops shaping the value on its own.
    ///
    /// Value curves run until `time + duration`; everything else is
    /// instantaneous.
    pub fn end_time(&self) -> f64 {
        match &self.kind {
            AutomationKind::ValueCurve { duration, .. } => self.time + duration,
            _ => self.time,
        }
    }

    /// Kind name used in log messages.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            AutomationKind::Set => "set",
            AutomationKind::LinearRamp => "linear ramp",
            AutomationKind::ExponentialRamp => "exponential ramp",
            AutomationKind::Target { .. } => "target",
            AutomationKind::ValueCurve { .. } => "value curve",
        }
    }
}

impl Timed for AutomationEvent {
    fn time(&self) -> f64 {
        self.time
    }
}
