//! Registered services
//!
//! A service groups endpoints under a name, a version and a unique id, and
//! answers discovery requests on `$SRV.PING`, `$SRV.INFO` and `$SRV.STATS`.
//! Each verb also accepts `.<name>` and `.<name>.<id>` suffixes to address a
//! single service or instance.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::config::{EndpointConfig, Metadata, ServiceConfig};
use super::endpoint::{Endpoint, EndpointInfo, EndpointShared, EndpointStats};
use crate::bus::{subject, Message};
use crate::error::{Error, Result};
use crate::session::{Session, Subscription};

/// Subject prefix for discovery requests
pub const DISCOVERY_PREFIX: &str = "$SRV";

pub const PING_RESPONSE_TYPE: &str = "peerbus.service.v1.ping_response";
pub const INFO_RESPONSE_TYPE: &str = "peerbus.service.v1.info_response";
pub const STATS_RESPONSE_TYPE: &str = "peerbus.service.v1.stats_response";

/// Produces custom per-endpoint data for `$SRV.STATS`
pub type StatsHandler = Arc<dyn Fn(&EndpointInfo) -> serde_json::Value + Send + Sync>;

/// Reply to `$SRV.PING`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Reply to `$SRV.INFO`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub endpoints: Vec<EndpointInfo>,
}

/// Reply to `$SRV.STATS`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub id: String,
    pub version: String,
    pub started: SystemTime,
    pub endpoints: Vec<EndpointStats>,
}

pub(crate) struct ServiceInner {
    session: Session,
    id: String,
    config: ServiceConfig,
    started: SystemTime,
    endpoints: Mutex<BTreeMap<String, Arc<EndpointShared>>>,
    stats_handler: Mutex<Option<StatsHandler>>,
    discovery: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl ServiceInner {
    pub(crate) fn remove_endpoint(&self, name: &str, sid: u64) {
        {
            let mut endpoints = self.endpoints.lock();
            if endpoints.get(name).map(|e| e.sid) == Some(sid) {
                endpoints.remove(name);
            }
        }
        self.session.remove_subscription(sid);
    }

    fn addressed_by(&self, name: Option<&str>, id: Option<&str>) -> bool {
        name.map_or(true, |n| n == self.config.name) && id.map_or(true, |i| i == self.id)
    }

    fn ping(&self) -> PingResponse {
        PingResponse {
            kind: PING_RESPONSE_TYPE.to_string(),
            name: self.config.name.clone(),
            id: self.id.clone(),
            version: self.config.version.clone(),
            metadata: self.config.metadata.clone(),
        }
    }

    fn info(&self) -> ServiceInfo {
        let endpoints = self.endpoints.lock().values().map(|e| e.info()).collect();
        ServiceInfo {
            kind: INFO_RESPONSE_TYPE.to_string(),
            name: self.config.name.clone(),
            id: self.id.clone(),
            version: self.config.version.clone(),
            description: self.config.description.clone(),
            metadata: self.config.metadata.clone(),
            endpoints,
        }
    }

    fn stats(&self) -> ServiceStats {
        let handler = self.stats_handler.lock().clone();
        let shared: Vec<Arc<EndpointShared>> = self.endpoints.lock().values().cloned().collect();
        let endpoints = shared
            .iter()
            .map(|e| {
                let data = handler.as_ref().map(|h| h(&e.info()));
                e.stats(data)
            })
            .collect();
        ServiceStats {
            kind: STATS_RESPONSE_TYPE.to_string(),
            name: self.config.name.clone(),
            id: self.id.clone(),
            version: self.config.version.clone(),
            started: self.started,
            endpoints,
        }
    }
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        if let Some(handle) = self.discovery.lock().take() {
            handle.abort();
        }
    }
}

async fn serve_discovery(weak: Weak<ServiceInner>, mut sub: Subscription) {
    while let Some(message) = sub.next().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let Some(reply) = message.reply.clone() else {
            continue;
        };

        // $SRV.<VERB>[.<name>[.<id>]]
        let mut tokens = message.subject.split('.').skip(1);
        let verb = tokens.next().unwrap_or_default();
        let name = tokens.next();
        let id = tokens.next();
        if tokens.next().is_some() || !inner.addressed_by(name, id) {
            continue;
        }

        let payload = match verb {
            "PING" => serde_json::to_vec(&inner.ping()),
            "INFO" => serde_json::to_vec(&inner.info()),
            "STATS" => serde_json::to_vec(&inner.stats()),
            _ => continue,
        };

        let result = match payload {
            Ok(payload) => inner
                .session
                .publish_message(Message::new(reply, payload.into()))
                .await
                .map(|_| ()),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!(service = %inner.config.name, verb = verb, error = %e, "Discovery reply failed");
        }
    }
}

/// Handle to a registered service
///
/// Cheap to clone. The service stays registered until `stop` is called or
/// every handle and endpoint is dropped.
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl Service {
    pub(crate) async fn start(session: Session, config: ServiceConfig, id: String) -> Result<Service> {
        config.validate()?;

        let discovery = session
            .subscribe(&subject::join(DISCOVERY_PREFIX, subject::WILDCARD_TAIL))
            .await?;

        let inner = Arc::new(ServiceInner {
            session,
            id,
            config,
            started: SystemTime::now(),
            endpoints: Mutex::new(BTreeMap::new()),
            stats_handler: Mutex::new(None),
            discovery: Mutex::new(None),
            stopped: AtomicBool::new(false),
        });

        let handle = tokio::spawn(serve_discovery(Arc::downgrade(&inner), discovery));
        *inner.discovery.lock() = Some(handle);

        tracing::info!(
            service = %inner.config.name,
            id = %inner.id,
            version = %inner.config.version,
            "Service registered"
        );

        Ok(Service { inner })
    }

    /// Unique instance id
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Service name
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Service version
    pub fn version(&self) -> &str {
        &self.inner.config.version
    }

    /// Session the service is registered on
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Discovery ping payload
    pub fn ping(&self) -> PingResponse {
        self.inner.ping()
    }

    /// Discovery info payload
    pub fn info(&self) -> ServiceInfo {
        self.inner.info()
    }

    /// Discovery stats payload
    pub fn stats(&self) -> ServiceStats {
        self.inner.stats()
    }

    /// Install a handler for custom per-endpoint stats data
    pub fn set_stats_handler<F>(&self, handler: F)
    where
        F: Fn(&EndpointInfo) -> serde_json::Value + Send + Sync + 'static,
    {
        *self.inner.stats_handler.lock() = Some(Arc::new(handler));
    }

    /// Names of the registered endpoints
    pub fn endpoint_names(&self) -> Vec<String> {
        self.inner.endpoints.lock().keys().cloned().collect()
    }

    /// Whether an endpoint is registered under `name`
    pub fn has_endpoint(&self, name: &str) -> bool {
        self.inner.endpoints.lock().contains_key(name)
    }

    /// Register an endpoint
    ///
    /// Endpoint names are unique within a service; a name becomes free again
    /// once its endpoint is dropped.
    pub async fn add_endpoint(&self, name: &str, config: EndpointConfig) -> Result<Endpoint> {
        if self.is_stopped() {
            return Err(Error::Registration(format!(
                "service '{}' is stopped",
                self.inner.config.name
            )));
        }
        config.validate(name)?;
        if self.has_endpoint(name) {
            return Err(duplicate(name));
        }

        let group = config.effective_queue_group().to_string();
        let sub = self
            .inner
            .session
            .queue_subscribe(&config.subject, &group)
            .await?;
        let shared = Arc::new(EndpointShared::new(name, sub.sid(), &config));

        {
            let mut endpoints = self.inner.endpoints.lock();
            if endpoints.contains_key(name) {
                // Raced with another add; dropping `sub` unsubscribes it
                return Err(duplicate(name));
            }
            endpoints.insert(name.to_string(), shared.clone());
        }

        tracing::debug!(
            service = %self.inner.config.name,
            endpoint = name,
            subject = %config.subject,
            queue_group = %group,
            "Endpoint added"
        );

        Ok(Endpoint::new(
            shared,
            sub,
            self.inner.session.clone(),
            self.inner.clone(),
        ))
    }

    /// Zero every endpoint's statistics
    pub fn reset(&self) {
        for endpoint in self.inner.endpoints.lock().values() {
            endpoint.reset();
        }
    }

    /// Deregister the service and all of its endpoints
    ///
    /// Endpoints stop yielding requests; discovery stops answering.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.inner.discovery.lock().take() {
            handle.abort();
        }
        let endpoints: Vec<Arc<EndpointShared>> = std::mem::take(&mut *self.inner.endpoints.lock())
            .into_values()
            .collect();
        for endpoint in &endpoints {
            self.inner.session.remove_subscription(endpoint.sid);
        }

        tracing::info!(
            service = %self.inner.config.name,
            id = %self.inner.id,
            endpoints = endpoints.len(),
            "Service stopped"
        );
    }

    /// Whether `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }
}

fn duplicate(name: &str) -> Error {
    Error::Registration(format!("endpoint '{}' already registered", name))
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.inner.config.name)
            .field("id", &self.inner.id)
            .field("version", &self.inner.config.version)
            .finish()
    }
}
