//! Runtime thread driving a [`SchedulingContext`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::context::SchedulingContext;
use crate::error::Error;
use crate::transport::Transport;

/// Messages for the runtime thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeMessage {
    /// Process right away instead of waiting for the next wake-up.
    Wake,
    Shutdown,
}

/// Handle to a running [`Runtime`].
#[derive(Clone)]
pub struct RuntimeHandle {
    message_tx: Sender<RuntimeMessage>,
    context: SchedulingContext,
    shutdown: Arc<AtomicBool>,
}

impl RuntimeHandle {
    /// Send a message to the runtime thread.
    pub fn send(&self, msg: RuntimeMessage) -> Result<()> {
        self.message_tx
            .send(msg)
            .map_err(|e| anyhow::anyhow!("Failed to send message: {}", e))
    }

    /// Ask the thread to process now.
    pub fn wake(&self) -> Result<()> {
        self.send(RuntimeMessage::Wake)
    }

    pub fn context(&self) -> &SchedulingContext {
        &self.context
    }

    /// Read the transport with a closure.
    pub fn with_transport<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Transport) -> R,
    {
        self.context.with_transport(f)
    }

    /// Edit the transport with a closure.
    pub fn with_transport_mut<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Transport) -> R,
    {
        self.context.with_transport_mut(f)
    }

    /// Signal the runtime to shut down.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // The thread may already be gone.
        let _ = self.message_tx.send(RuntimeMessage::Shutdown);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// The scheduling thread. Stops and joins on drop.
pub struct Runtime {
    handle: RuntimeHandle,
    thread_handle: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Spawn the scheduling thread for `context`.
    pub fn start(context: SchedulingContext) -> Result<Self> {
        let interval = context.config().update_interval_duration()?;
        let (message_tx, message_rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = RuntimeHandle {
            message_tx,
            context: context.clone(),
            shutdown: shutdown.clone(),
        };

        let thread_handle = thread::Builder::new()
            .name("vibelang-timing".to_string())
            .spawn(move || {
                let mut rt = RuntimeThread {
                    context,
                    message_rx,
                    interval,
                };
                rt.run(shutdown);
            })
            .map_err(|e| Error::Runtime(format!("Failed to spawn scheduling thread: {e}")))?;

        log::debug!("[RUNTIME] Started, waking every {:?}", interval);
        Ok(Self {
            handle,
            thread_handle: Some(thread_handle),
        })
    }

    /// Get a handle to interact with the runtime.
    pub fn handle(&self) -> &RuntimeHandle {
        &self.handle
    }

    /// Shut down the runtime gracefully.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.handle.shutdown();
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::warn!("[RUNTIME] Scheduling thread panicked");
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.stop();
    }
}

struct RuntimeThread {
    context: SchedulingContext,
    message_rx: Receiver<RuntimeMessage>,
    interval: Duration,
}

impl RuntimeThread {
    fn run(&mut self, shutdown: Arc<AtomicBool>) {
        log::debug!("[RUNTIME] Scheduling thread running");
        while !shutdown.load(Ordering::Relaxed) {
            let fired = self.context.process_due();
            if fired > 0 {
                log::trace!("[RUNTIME] Fired {} callbacks", fired);
            }
            match self.message_rx.recv_timeout(self.interval) {
                Ok(RuntimeMessage::Wake) | Err(RecvTimeoutError::Timeout) => {}
                Ok(RuntimeMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::debug!("[RUNTIME] Scheduling thread stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::time::ManualTimeSource;

    #[test]
    fn test_runtime_fires_due_callbacks() {
        let _ = env_logger::builder().is_test(true).try_init();
        let source = ManualTimeSource::new(0.0);
        let config = EngineConfig {
            lookahead: "0s".to_string(),
            update_interval: "1ms".to_string(),
            ..EngineConfig::default()
        };
        let context = SchedulingContext::new(config, Arc::new(source.clone())).unwrap();
        let runtime = Runtime::start(context).unwrap();

        let (tx, rx) = unbounded();
        runtime
            .handle()
            .with_transport_mut(|t| {
                t.schedule_once(
                    move |time| {
                        let _ = tx.send(time);
                    },
                    "4n",
                )?;
                t.start(0.0)
            })
            .unwrap();

        assert!(rx.try_recv().is_err());
        source.set(1.0);
        runtime.handle().wake().unwrap();
        let time = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!((time - 0.5).abs() < 1e-9);

        let handle = runtime.handle().clone();
        runtime.shutdown();
        assert!(handle.is_shutdown_requested());
        assert!(handle.wake().is_err());
    }
}
