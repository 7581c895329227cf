//! Startup guard. Lets bootstrap run at most once per process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static PROCESS_GUARD: StartupGuard = StartupGuard::new();

/// Records when startup began. The first caller to swap the marker from
/// zero wins; everyone else sees `false`.
#[derive(Debug, Default)]
pub struct StartupGuard {
    started_at_millis: AtomicU64,
}

impl StartupGuard {
    pub const fn new() -> Self {
        Self {
            started_at_millis: AtomicU64::new(0),
        }
    }

    /// The guard shared by the whole process.
    pub fn process() -> &'static StartupGuard {
        &PROCESS_GUARD
    }

    /// Returns `true` for exactly one caller over the guard's lifetime.
    pub fn attempt_start(&self) -> bool {
        let now = epoch_millis().max(1);
        self.started_at_millis
            .compare_exchange(0, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Wall-clock start time in milliseconds since the epoch, once started.
    pub fn started_at(&self) -> Option<u64> {
        match self.started_at_millis.load(Ordering::Acquire) {
            0 => None,
            t => Some(t),
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
