//! Periodic expiration of stored bundles.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error};

/// Seconds between the Unix epoch and the DTN epoch (2000-01-01T00:00:00Z).
pub const DTN_EPOCH_OFFSET: u64 = 946_684_800;

/// Anything that drops entries whose lifetime ended before `now`.
pub trait Expirable: Send + Sync {
    fn expire(&self, now: u64);
}

pub trait Clock: Send + Sync {
    /// Current time in DTN seconds.
    fn now(&self) -> u64;
}

/// Wall clock in seconds since the DTN epoch.
#[derive(Clone, Copy, Debug, Default)]
pub struct DtnClock;

impl Clock for DtnClock {
    fn now(&self) -> u64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_secs().saturating_sub(DTN_EPOCH_OFFSET),
            Err(err) => {
                error!("System clock before Unix epoch: {}", err);
                0
            }
        }
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self(AtomicU64::new(now))
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) -> u64 {
        self.0.fetch_add(secs, Ordering::SeqCst) + secs
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs one expiration pass over every target.
pub fn sweep(now: u64, targets: &[Arc<dyn Expirable>]) {
    for target in targets {
        target.expire(now);
    }
}

/// Background thread calling [`sweep`] once per interval.
///
/// Dropping the sweeper (or calling [`shutdown`](Self::shutdown)) closes the
/// control channel; the thread notices at its next wait and exits, and the
/// caller blocks until it has.
pub struct ExpirySweeper {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    pub fn spawn(
        clock: Arc<dyn Clock>,
        targets: Vec<Arc<dyn Expirable>>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("expiry-sweeper".into())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            sweep(clock.now(), &targets);
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Expiry sweeper stopped");
            })?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Expiry sweeper thread panicked");
            }
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
