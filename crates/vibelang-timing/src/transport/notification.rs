//! Transport notifications published over channels.

use crossbeam_channel::{unbounded, Receiver, Sender};

/// A transport state change, stamped with the time it takes effect.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TransportNotification {
    /// Started at `time` from `seconds` into the timeline.
    Start { time: f64, seconds: f64 },
    Stop { time: f64 },
    Pause { time: f64 },
    /// The loop wrapped at `time`.
    Loop { time: f64 },
    /// Playback restarted at the loop start, `seconds` into the timeline.
    LoopStart { time: f64, seconds: f64 },
    /// The loop end was reached at `time`.
    LoopEnd { time: f64 },
}

impl TransportNotification {
    pub fn time(&self) -> f64 {
        match *self {
            TransportNotification::Start { time, .. }
            | TransportNotification::Stop { time }
            | TransportNotification::Pause { time }
            | TransportNotification::Loop { time }
            | TransportNotification::LoopStart { time, .. }
            | TransportNotification::LoopEnd { time } => time,
        }
    }
}

/// Every live subscriber receives every notification, in publish order.
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    senders: Vec<Sender<TransportNotification>>,
}

impl Subscribers {
    pub fn subscribe(&mut self) -> Receiver<TransportNotification> {
        let (tx, rx) = unbounded();
        self.senders.push(tx);
        rx
    }

    /// Send to all subscribers, forgetting the ones whose receiver is gone.
    pub fn publish(&mut self, notification: TransportNotification) {
        log::trace!("[TRANSPORT] Notify {:?}", notification);
        self.senders.retain(|tx| tx.send(notification).is_ok());
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }
}
