//! Wall-clock access.

use skm_common::wire::keymint::DateTime;
use std::time::{SystemTime, UNIX_EPOCH};

/// Abstraction of a clock that reports the current time.
pub trait Clock: Send + Sync {
    /// Return the current time.
    fn now(&self) -> DateTime;
}

/// Clock based on the operating system's real-time clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime {
        let ms_since_epoch = match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
            Err(e) => {
                log::error!("system clock before Unix epoch: {:?}", e);
                0
            }
        };
        DateTime { ms_since_epoch }
    }
}
