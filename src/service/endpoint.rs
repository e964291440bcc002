//! Service endpoints
//!
//! An endpoint is a queue-group subscription owned by a service. Requests
//! arrive through `Endpoint::next` and are answered through the `Request`
//! handle, which records per-endpoint statistics as it goes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::config::{EndpointConfig, Metadata};
use super::instance::ServiceInner;
use super::request::Request;
use crate::session::{Session, Subscription};

/// Static description of an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub name: String,
    pub subject: String,
    pub queue_group: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Per-endpoint request statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointStats {
    pub name: String,
    pub subject: String,
    pub queue_group: String,
    pub num_requests: u64,
    pub num_errors: u64,
    #[serde(default)]
    pub last_error: String,
    /// Total time spent handling requests
    #[serde(with = "duration_nanos")]
    pub processing_time: Duration,
    #[serde(with = "duration_nanos")]
    pub average_processing_time: Duration,
    /// Custom data from the service's stats handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Default)]
struct Counters {
    num_requests: u64,
    num_errors: u64,
    last_error: String,
    processing_time: Duration,
}

/// State shared between an endpoint, its requests and its service
pub(crate) struct EndpointShared {
    pub(crate) name: String,
    pub(crate) sid: u64,
    info: EndpointInfo,
    counters: Mutex<Counters>,
}

impl EndpointShared {
    pub(crate) fn new(name: &str, sid: u64, config: &EndpointConfig) -> Self {
        Self {
            name: name.to_string(),
            sid,
            info: EndpointInfo {
                name: name.to_string(),
                subject: config.subject.clone(),
                queue_group: config.effective_queue_group().to_string(),
                metadata: config.metadata.clone(),
            },
            counters: Mutex::new(Counters::default()),
        }
    }

    pub(crate) fn info(&self) -> EndpointInfo {
        self.info.clone()
    }

    pub(crate) fn record_request(&self) {
        self.counters.lock().num_requests += 1;
    }

    pub(crate) fn record_handled(&self, elapsed: Duration) {
        self.counters.lock().processing_time += elapsed;
    }

    pub(crate) fn record_error(&self, code: &str, description: &str) {
        let mut counters = self.counters.lock();
        counters.num_errors += 1;
        counters.last_error = format!("{}:{}", code, description);
    }

    pub(crate) fn stats(&self, data: Option<serde_json::Value>) -> EndpointStats {
        let counters = self.counters.lock();
        let average_processing_time = match counters.num_requests {
            0 => Duration::ZERO,
            n => Duration::from_nanos((counters.processing_time.as_nanos() / n as u128) as u64),
        };
        EndpointStats {
            name: self.info.name.clone(),
            subject: self.info.subject.clone(),
            queue_group: self.info.queue_group.clone(),
            num_requests: counters.num_requests,
            num_errors: counters.num_errors,
            last_error: counters.last_error.clone(),
            processing_time: counters.processing_time,
            average_processing_time,
            data,
        }
    }

    pub(crate) fn reset(&self) {
        *self.counters.lock() = Counters::default();
    }
}

/// A registered endpoint
///
/// Dropping the endpoint (or calling `stop`) removes it from its service and
/// from the bus. `next` returns `None` once the service has been stopped. An
/// endpoint keeps its service alive.
pub struct Endpoint {
    shared: Arc<EndpointShared>,
    sub: Subscription,
    session: Session,
    service: Arc<ServiceInner>,
}

impl Endpoint {
    pub(crate) fn new(
        shared: Arc<EndpointShared>,
        sub: Subscription,
        session: Session,
        service: Arc<ServiceInner>,
    ) -> Self {
        Self {
            shared,
            sub,
            session,
            service,
        }
    }

    /// Endpoint name
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Subject the endpoint listens on
    pub fn subject(&self) -> &str {
        self.sub.subject()
    }

    /// Queue group the endpoint belongs to
    pub fn queue_group(&self) -> &str {
        &self.shared.info.queue_group
    }

    /// Current statistics
    pub fn stats(&self) -> EndpointStats {
        self.shared.stats(None)
    }

    /// Wait for the next request
    pub async fn next(&mut self) -> Option<Request> {
        let message = self.sub.next().await?;
        self.shared.record_request();
        Some(Request::new(
            message,
            self.session.clone(),
            self.shared.clone(),
            Instant::now(),
        ))
    }

    /// Remove the endpoint
    pub fn stop(self) {
        // Drop does the work
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.service.remove_endpoint(&self.shared.name, self.shared.sid);
        tracing::debug!(endpoint = %self.shared.name, "Endpoint stopped");
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.shared.name)
            .field("subject", &self.sub.subject())
            .field("queue_group", &self.shared.info.queue_group)
            .finish()
    }
}

mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_nanos)
    }
}
