//! Host keep-alive (wake lock) held across critical I/O.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Host hook that keeps the process from being suspended.
pub trait KeepAlive: Send + Sync {
    fn acquire(&self);
    fn release(&self);
}

/// For hosts with nothing to hold.
#[derive(Debug, Default)]
pub struct NoopKeepAlive;

impl KeepAlive for NoopKeepAlive {
    fn acquire(&self) {
        debug!("Keep-alive acquired");
    }

    fn release(&self) {
        debug!("Keep-alive released");
    }
}

/// Scoped hold on a [`KeepAlive`]. Released on drop or when `max_hold`
/// elapses, whichever comes first, and never released twice.
pub struct KeepAliveToken {
    inner: Arc<Held>,
    watchdog: JoinHandle<()>,
}

struct Held {
    keep_alive: Arc<dyn KeepAlive>,
    released: AtomicBool,
}

impl Held {
    fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.keep_alive.release();
        true
    }
}

impl KeepAliveToken {
    pub fn acquire(keep_alive: Arc<dyn KeepAlive>, max_hold: Duration) -> Self {
        keep_alive.acquire();
        let inner = Arc::new(Held {
            keep_alive,
            released: AtomicBool::new(false),
        });

        let held = inner.clone();
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(max_hold).await;
            if held.release() {
                warn!("Keep-alive force-released after {:?}", max_hold);
            }
        });

        Self { inner, watchdog }
    }

    #[cfg(test)]
    pub fn is_held(&self) -> bool {
        !self.inner.released.load(Ordering::Acquire)
    }
}

impl Drop for KeepAliveToken {
    fn drop(&mut self) {
        self.watchdog.abort();
        self.inner.release();
    }
}
