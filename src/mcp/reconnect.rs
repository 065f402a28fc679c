//! Reconnection Policy
//!
//! Capped exponential backoff for re-opening the event stream.
//!
//! # Features
//!
//! - **Exponential Backoff**: delay for attempt `k` is `base_delay * 2^k`
//! - **Attempt Ceiling**: once `max_attempts` failures have been counted the
//!   policy stops producing delays until it is explicitly reset
//! - **Session Expiry Detection**: classifies call POST failures that mean the
//!   session is gone and a fresh stream is needed
//!
//! # Example
//!
//! ```ignore
//! use biomcp_client::mcp::reconnect::ReconnectPolicy;
//!
//! let mut policy = ReconnectPolicy::new(Duration::from_secs(1), 10);
//! while let Some(delay) = policy.next_delay() {
//!     tokio::time::sleep(delay).await;
//!     // reopen the stream...
//! }
//! ```

use std::time::Duration;

/// Body fragments that indicate the server no longer knows our session
const SESSION_EXPIRY_MARKERS: &[&str] = &["session", "expired"];

/// Reconnect state
///
/// # Fields
///
/// * `attempt` - Failures counted since the last successful handshake
/// * `base_delay` - Delay before the first reconnect (default: 1s)
/// * `max_attempts` - Ceiling after which the policy gives up (default: 10)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    attempt: u32,
    base_delay: Duration,
    max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), 10)
    }
}

impl ReconnectPolicy {
    /// Create a new policy with the attempt counter at zero
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            base_delay,
            max_attempts,
        }
    }

    /// Calculate delay for a given attempt
    ///
    /// Uses exponential backoff: delay = base_delay * 2^attempt.
    /// There is no upper cap other than `max_attempts`; the multiplication
    /// saturates instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Record a failure and return how long to wait before reopening
    ///
    /// Returns `None` once the ceiling is reached; the counter is left
    /// untouched so the policy stays exhausted until [`reset`](Self::reset).
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.delay_for(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    /// Reset the counter after a successful handshake or an explicit restart
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Whether the ceiling has been reached
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Failures counted so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Configured ceiling
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Configured base delay
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }
}

/// Check whether a failed call POST means the session has expired
///
/// Session expiry:
/// - 401 Unauthorized / 403 Forbidden
/// - Any non-2xx body mentioning the session or expiry
pub fn is_session_expired(status: u16, body: &str) -> bool {
    if matches!(status, 401 | 403) {
        return true;
    }
    let body = body.to_lowercase();
    SESSION_EXPIRY_MARKERS
        .iter()
        .any(|marker| body.contains(marker))
}
