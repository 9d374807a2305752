//! # Logging Helpers
//!
//! Rate limiting for warnings that repeat on every resynchronisation attempt,
//! and hex dumps of link data for diagnostics.
//!
//! ```rust
//! use smartmeter_rs::util::logging::{LogThrottle, log_frame_hex};
//!
//! let mut throttle = LogThrottle::new(60_000, 5); // 5 messages per minute
//! if throttle.allow() {
//!     log::warn!("wrong M-Bus start, restarting");
//! }
//!
//! log_frame_hex(log::Level::Debug, "Raw serial data", &[0x68, 0x87, 0x87, 0x68]);
//! ```

use std::time::Instant;

/// Hex dumps are cut after this many bytes; one read chunk fits.
const MAX_LOG_BYTES: usize = 300;

/// Throttling structure for rate-limiting log messages
///
/// A meter that is not yet in sync produces one invalid frame per read, so
/// the resync warning would otherwise flood the log.
#[derive(Debug)]
pub struct LogThrottle {
    /// Time window for throttling (in milliseconds)
    window_ms: u64,
    /// Maximum messages allowed per window
    cap: u32,
    /// Current message count in window
    count: u32,
    /// Messages dropped since the last allowed one
    suppressed: u32,
    /// Start time of current window
    t0: Instant,
}

impl LogThrottle {
    /// Create new throttle with time window and message cap
    pub fn new(window_ms: u64, cap: u32) -> Self {
        Self {
            window_ms,
            cap,
            count: 0,
            suppressed: 0,
            t0: Instant::now(),
        }
    }

    /// Check if logging is allowed (resets counter after window expires)
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.t0).as_millis() as u64;

        if elapsed_ms > self.window_ms {
            self.t0 = now;
            self.count = 0;
        }

        self.count = self.count.saturating_add(1);
        if self.count <= self.cap {
            true
        } else {
            self.suppressed = self.suppressed.saturating_add(1);
            false
        }
    }

    /// Number of messages dropped since the last call, resetting the tally.
    pub fn take_suppressed(&mut self) -> u32 {
        std::mem::take(&mut self.suppressed)
    }

    /// Reset the throttle (start new window immediately)
    pub fn reset(&mut self) {
        self.t0 = Instant::now();
        self.count = 0;
    }
}

/// Log link data in hex at the given level.
pub fn log_frame_hex(level: log::Level, prefix: &str, data: &[u8]) {
    if !log::log_enabled!(level) {
        return;
    }

    let display_data = &data[..data.len().min(MAX_LOG_BYTES)];
    let hex_str = crate::util::hex::encode_hex(display_data);
    let suffix = if data.len() > MAX_LOG_BYTES {
        format!(" ... ({} bytes total)", data.len())
    } else {
        String::new()
    };

    log::log!(level, "{prefix}: {hex_str}{suffix}");
}
