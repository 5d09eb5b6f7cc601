//! Log throttling utility
//!
//! Limits how often the same log message is recorded, so a viewer
//! spamming malformed frames cannot flood the log.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Log throttler that limits how often the same message key is logged
///
/// # Example
///
/// ```rust
/// use camera_relay::utils::LogThrottler;
/// use std::time::Duration;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert!(throttler.should_log("decode_error"));
/// assert!(!throttler.should_log("decode_error"));
/// ```
pub struct LogThrottler {
    /// Per key: last time it was logged, and how many calls were suppressed since
    entries: Mutex<HashMap<String, (Instant, u64)>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` if the message should be logged now
    pub fn should_log(&self, key: &str) -> bool {
        self.check(key).is_some()
    }

    /// Like [`should_log`](Self::should_log), but also returns how many
    /// calls were suppressed since the key was last logged
    pub fn check(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some((last, suppressed)) if now.duration_since(*last) < self.interval => {
                *suppressed += 1;
                None
            }
            Some((last, suppressed)) => {
                let skipped = *suppressed;
                *last = now;
                *suppressed = 0;
                Some(skipped)
            }
            None => {
                entries.insert(key.to_string(), (now, 0));
                Some(0)
            }
        }
    }
}

impl Default for LogThrottler {
    /// 5 second interval
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled warning; appends the suppressed count when non-zero
///
/// ```rust
/// use camera_relay::utils::LogThrottler;
/// use camera_relay::warn_throttled;
///
/// let throttler = LogThrottler::default();
/// warn_throttled!(throttler, "decode", "Bad frame: {}", "details");
/// ```
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.check($key) {
            if suppressed > 0 {
                tracing::warn!(suppressed, $($arg)*);
            } else {
                tracing::warn!($($arg)*);
            }
        }
    };
}
