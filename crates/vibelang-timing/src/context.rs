//! Shared handle to the scheduling authority.
//!
//! A [`SchedulingContext`] owns the one [`Transport`] an application
//! schedules against. Clones share it; every access goes through a closure
//! holding the lock, so reads and edits from different threads never
//! interleave.

use std::sync::{Arc, RwLock};

use crossbeam_channel::Receiver;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::time::{SystemTimeSource, TimeSource};
use crate::transport::{Dispatch, Transport, TransportNotification};

/// Thread-safe handle to a transport.
#[derive(Clone)]
pub struct SchedulingContext {
    transport: Arc<RwLock<Transport>>,
    time_source: Arc<dyn TimeSource>,
    config: Arc<EngineConfig>,
}

impl SchedulingContext {
    /// A context driven by `time_source`.
    pub fn new(config: EngineConfig, time_source: Arc<dyn TimeSource>) -> Result<Self> {
        let transport = Transport::new(&config, time_source.clone())?;
        log::debug!(
            "[TRANSPORT] Context created at {} bpm, ppq {}",
            config.bpm,
            config.ppq
        );
        Ok(Self {
            transport: Arc::new(RwLock::new(transport)),
            time_source,
            config: Arc::new(config),
        })
    }

    /// A context driven by the monotonic system clock.
    pub fn with_system_clock(config: EngineConfig) -> Result<Self> {
        Self::new(config, Arc::new(SystemTimeSource::new()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn time_source(&self) -> &Arc<dyn TimeSource> {
        &self.time_source
    }

    /// Read the transport with a closure.
    pub fn with_transport<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Transport) -> R,
    {
        let transport = self.transport.read().expect("State lock poisoned");
        f(&transport)
    }

    /// Edit the transport with a closure.
    pub fn with_transport_mut<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Transport) -> R,
    {
        let mut transport = self.transport.write().expect("State lock poisoned");
        f(&mut transport)
    }

    /// Scheduling time of the transport.
    pub fn now(&self) -> f64 {
        self.with_transport(|t| t.now())
    }

    pub fn subscribe(&self) -> Receiver<TransportNotification> {
        self.with_transport_mut(|t| t.subscribe())
    }

    /// Collect everything due before `until`, then fire it with the lock
    /// released. Returns how many callbacks ran.
    ///
    /// Callbacks may schedule more events through a clone of this context.
    pub fn process(&self, until: f64) -> usize {
        let due: Vec<Dispatch> = self.with_transport_mut(|t| t.process(until));
        for dispatch in &due {
            dispatch.fire();
        }
        due.len()
    }

    /// [`SchedulingContext::process`] up to [`SchedulingContext::now`].
    pub fn process_due(&self) -> usize {
        let due = self.with_transport_mut(|t| t.process_due());
        for dispatch in &due {
            dispatch.fire();
        }
        due.len()
    }
}

impl std::fmt::Debug for SchedulingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulingContext")
            .field("transport", &*self.transport.read().expect("State lock poisoned"))
            .finish_non_exhaustive()
    }
}
