//! Kiosk configuration

use std::time::Duration;

use crate::bus::subject;

/// Default subject namespace for kiosk endpoints
pub const DEFAULT_NAMESPACE: &str = "kubecon";

/// Shared queue group for volunteer requests
pub const VOLUNTEERS_QUEUE: &str = "volunteers";

/// Subject prefix quickdraw replies are published under
pub const QUICKDRAW_REPLY_PREFIX: &str = "quickdraw_reply";

/// Durable stream holding survey submissions
pub const SURVEY_STREAM: &str = "survey";

/// Subject survey submissions are published on
pub const SURVEY_SUBJECT: &str = "survey.submitted";

/// Subject prefix for heartbeat metrics
pub const METRICS_PREFIX: &str = "metrics";

/// Peer configuration options
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Display name shown to other peers
    pub nickname: String,

    /// Subject namespace (`<ns>.handoff`, `<ns>.quickdraw`, ...)
    pub namespace: String,

    /// Service version advertised through discovery
    pub service_version: String,

    /// Administrative peers start out sharing and never volunteer
    pub is_admin: bool,

    /// How long to wait for a volunteer
    pub handoff_timeout: Duration,

    /// How long a quickdraw initiator waits for a winner
    pub quickdraw_timeout: Duration,

    /// Heartbeat period
    pub heartbeat_interval: Duration,

    /// Publish heartbeat metrics
    pub heartbeat_enabled: bool,

    /// Read the survey stream and publish tallies
    pub survey_enabled: bool,

    /// Capacity of the peer's command and event channels
    pub channel_capacity: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            nickname: String::from("anonymous"),
            namespace: DEFAULT_NAMESPACE.to_string(),
            service_version: String::from("0.0.1"),
            is_admin: false,
            handoff_timeout: Duration::from_secs(10),
            quickdraw_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_millis(2000),
            heartbeat_enabled: true,
            survey_enabled: true,
            channel_capacity: 256,
        }
    }
}

impl PeerConfig {
    /// Create a config for a peer with the given display name
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            ..Default::default()
        }
    }

    /// Set the subject namespace
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Mark the peer as an administrator
    pub fn admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    /// Set the volunteer request timeout
    pub fn handoff_timeout(mut self, timeout: Duration) -> Self {
        self.handoff_timeout = timeout;
        self
    }

    /// Set the quickdraw initiator timeout
    pub fn quickdraw_timeout(mut self, timeout: Duration) -> Self {
        self.quickdraw_timeout = timeout;
        self
    }

    /// Set the heartbeat period
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Disable heartbeat metrics
    pub fn disable_heartbeat(mut self) -> Self {
        self.heartbeat_enabled = false;
        self
    }

    /// Disable the survey reader
    pub fn disable_survey(mut self) -> Self {
        self.survey_enabled = false;
        self
    }

    /// Set the command and event channel capacity
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Subject for a kiosk endpoint, e.g. `kubecon.handoff`
    pub fn subject(&self, endpoint: &str) -> String {
        subject::join(&self.namespace, endpoint)
    }
}

/// Detection loop and inference service options
#[derive(Debug, Clone)]
pub struct DetectConfig {
    /// Subject frames are sent to
    pub subject: String,

    /// Prefix of the per-request reply subject
    pub reply_prefix: String,

    /// Per-frame request timeout
    pub timeout: Duration,

    /// Pause between frames
    pub interval: Duration,

    /// Model name reported by the inference service
    pub model_name: String,

    /// Confidence threshold reported by the inference service
    pub threshold: f64,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            subject: String::from("ai_detect"),
            reply_prefix: String::from("ai_detect.reply"),
            timeout: Duration::from_millis(5000),
            interval: Duration::from_millis(100),
            model_name: String::from("yolov4-tiny"),
            threshold: 0.5,
        }
    }
}

impl DetectConfig {
    /// Set the per-frame timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the pause between frames
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the model name and threshold
    pub fn model(mut self, name: impl Into<String>, threshold: f64) -> Self {
        self.model_name = name.into();
        self.threshold = threshold;
        self
    }

    /// Pattern matching every reply subject
    pub fn reply_pattern(&self) -> String {
        subject::join(&self.reply_prefix, subject::WILDCARD_TAIL)
    }
}
