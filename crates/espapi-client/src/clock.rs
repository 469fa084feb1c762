//! Time source for answering the device's time requests.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Supplies the epoch seconds sent back in `GetTimeResponse`.
pub trait Clock: Send + Sync + fmt::Debug {
    fn epoch_seconds(&self) -> u32;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_seconds(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u32::try_from(elapsed.as_secs()).unwrap_or(u32::MAX))
            .unwrap_or(0)
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub u32);

impl Clock for FixedClock {
    fn epoch_seconds(&self) -> u32 {
        self.0
    }
}
