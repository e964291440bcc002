//! Request options and reply tokens

use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of generated reply tokens
pub const TOKEN_LEN: usize = 12;

/// Options for a single request
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Request timeout; the session default applies when unset
    pub timeout: Option<Duration>,

    /// Explicit reply subject; implies a dedicated reply subscription
    pub reply: Option<String>,

    /// Use a dedicated reply subscription instead of the shared inbox
    pub no_mux: bool,
}

impl RequestOptions {
    /// Create options with a timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }

    /// Set the timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set an explicit reply subject
    pub fn reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self.no_mux = true;
        self
    }

    /// Use a dedicated reply subscription
    pub fn no_mux(mut self) -> Self {
        self.no_mux = true;
        self
    }

    pub(crate) fn is_dedicated(&self) -> bool {
        self.no_mux || self.reply.is_some()
    }
}

/// Generate a short random alphanumeric token for reply subjects
pub fn reply_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}
