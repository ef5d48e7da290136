//! Background timeout reaper
//!
//! A single thread that calls `TransactionManager::reap_expired` every
//! `reaper_interval`. Shutdown is signalled through a flag plus condvar so
//! `stop()` returns promptly instead of waiting out the interval.

use crate::manager::TransactionManager;
use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

struct Shutdown {
    flag: Mutex<bool>,
    wake: Condvar,
}

/// Handle to the reaper thread; stops and joins it on drop
pub struct TimeoutReaper {
    shutdown: Arc<Shutdown>,
    handle: Option<JoinHandle<()>>,
}

impl TimeoutReaper {
    /// Start reaping `manager` at its configured interval
    pub fn start(manager: Arc<TransactionManager>) -> io::Result<Self> {
        let interval = manager.config().reaper_interval;
        Self::start_with_interval(manager, interval)
    }

    /// Start reaping `manager` every `interval`
    pub fn start_with_interval(
        manager: Arc<TransactionManager>,
        interval: Duration,
    ) -> io::Result<Self> {
        let shutdown = Arc::new(Shutdown {
            flag: Mutex::new(false),
            wake: Condvar::new(),
        });
        let signal = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("txcoord-reaper".to_string())
            .spawn(move || {
                debug!(?interval, "Timeout reaper started");
                loop {
                    {
                        let mut stopped = signal.flag.lock();
                        if !*stopped {
                            signal.wake.wait_for(&mut stopped, interval);
                        }
                        if *stopped {
                            break;
                        }
                    }
                    manager.reap_expired();
                }
                debug!("Timeout reaper stopped");
            })?;

        Ok(TimeoutReaper {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Check if the reaper thread is still running
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Stop the thread and wait for it to exit
    pub fn stop(&mut self) {
        {
            let mut stopped = self.shutdown.flag.lock();
            *stopped = true;
        }
        self.shutdown.wake.notify_all();

        if let Some(handle) = self.handle.take() {
            join_logged(handle);
        }
    }
}

/// Wait for the reaper thread; returns false if it panicked
fn join_logged(handle: JoinHandle<()>) -> bool {
    match handle.join() {
        Ok(()) => true,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            warn!(panic = %message, "Timeout reaper thread panicked");
            false
        }
    }
}

impl Drop for TimeoutReaper {
    fn drop(&mut self) {
        self.stop();
    }
}
