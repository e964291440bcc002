//! Session configuration

use std::time::Duration;

/// Prefix of generated reply inboxes
pub const INBOX_PREFIX: &str = "_INBOX";

/// Session configuration options
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Per-subscription buffer; messages beyond it are dropped (slow consumer)
    pub subscription_capacity: usize,

    /// Timeout applied to requests that don't set their own
    pub request_timeout: Duration,

    /// Reconnect automatically when the link drops
    pub reconnect: bool,

    /// Delay between reconnect attempts
    pub reconnect_delay: Duration,

    /// Maximum reconnect attempts before giving up (0 = unlimited)
    pub max_reconnect_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            subscription_capacity: 1024,
            request_timeout: Duration::from_secs(5),
            reconnect: true,
            reconnect_delay: Duration::from_millis(250),
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

impl SessionConfig {
    /// Set the subscription buffer size
    pub fn subscription_capacity(mut self, capacity: usize) -> Self {
        self.subscription_capacity = capacity.max(1);
        self
    }

    /// Set the default request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Disable automatic reconnect
    pub fn disable_reconnect(mut self) -> Self {
        self.reconnect = false;
        self
    }

    /// Set the delay between reconnect attempts
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the maximum number of reconnect attempts
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }
}
