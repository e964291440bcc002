//! Service registry
//!
//! Hands out service ids and keeps track of the services registered on one
//! session. Ids are 22 random alphanumerics and are never reissued within a
//! process, even after the service that held one stops.

use std::collections::HashSet;
use std::sync::OnceLock;

use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;

use super::config::ServiceConfig;
use super::instance::Service;
use crate::error::Result;
use crate::session::Session;

/// Length of generated service ids
pub const SERVICE_ID_LEN: usize = 22;

fn issued_ids() -> &'static Mutex<HashSet<String>> {
    static ISSUED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    ISSUED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Generate a service id that hasn't been handed out before
pub fn next_service_id() -> String {
    loop {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SERVICE_ID_LEN)
            .map(char::from)
            .collect();
        if issued_ids().lock().insert(id.clone()) {
            return id;
        }
    }
}

/// Registers services on a session
pub struct ServiceRegistry {
    session: Session,
    services: Mutex<Vec<Service>>,
}

impl ServiceRegistry {
    /// Create a registry for `session`
    pub fn new(session: Session) -> Self {
        Self {
            session,
            services: Mutex::new(Vec::new()),
        }
    }

    /// Session services are registered on
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Register a service
    ///
    /// Fails with `Registration` when the name or version is invalid.
    pub async fn register(&self, config: ServiceConfig) -> Result<Service> {
        let name = config.name.clone();
        let service = match Service::start(self.session.clone(), config, next_service_id()).await {
            Ok(service) => service,
            Err(e) => {
                tracing::error!(service = %name, error = %e, "Service registration failed");
                return Err(e);
            }
        };

        let mut services = self.services.lock();
        services.retain(|s| !s.is_stopped());
        services.push(service.clone());
        Ok(service)
    }

    /// Services registered through this registry that are still running
    pub fn services(&self) -> Vec<Service> {
        self.services
            .lock()
            .iter()
            .filter(|s| !s.is_stopped())
            .cloned()
            .collect()
    }

    /// Stop every service registered through this registry
    pub fn stop_all(&self) {
        let services = std::mem::take(&mut *self.services.lock());
        for service in services {
            service.stop();
        }
    }
}

impl Drop for ServiceRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::bus::Broker;
    use crate::error::Error;
    use crate::service::{EndpointConfig, ServiceInfo, ServiceStats, DEFAULT_QUEUE_GROUP};
    use crate::session::{RequestOptions, SessionConfig};

    async fn session(broker: &Arc<Broker>, name: &str) -> Session {
        let config = SessionConfig::default().request_timeout(Duration::from_millis(200));
        Session::connect(broker.clone(), name, config).await.unwrap()
    }

    #[test]
    fn test_ids_are_unique() {
        let ids: HashSet<String> = (0..500).map(|_| next_service_id()).collect();
        assert_eq!(ids.len(), 500);
        assert!(ids.iter().all(|id| id.len() == SERVICE_ID_LEN));
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_config() {
        let broker = Arc::new(Broker::new());
        let registry = ServiceRegistry::new(session(&broker, "a").await);

        let result = registry.register(ServiceConfig::new("bad name", "0.0.1")).await;
        assert!(matches!(result, Err(Error::Registration(_))));
        let result = registry.register(ServiceConfig::new("kubecon", "latest")).await;
        assert!(matches!(result, Err(Error::Registration(_))));
    }

    #[tokio::test]
    async fn test_endpoint_request_response() {
        let broker = Arc::new(Broker::new());
        let registry = ServiceRegistry::new(session(&broker, "a").await);
        let client = session(&broker, "b").await;

        let service = registry
            .register(ServiceConfig::new("kubecon", "0.0.1"))
            .await
            .unwrap();
        let mut endpoint = service
            .add_endpoint("nickname", EndpointConfig::new("kubecon.nickname"))
            .await
            .unwrap();
        assert_eq!(endpoint.queue_group(), DEFAULT_QUEUE_GROUP);

        tokio::spawn(async move {
            let request = endpoint.next().await.unwrap();
            assert_eq!(request.endpoint(), "nickname");
            request.respond("Ada").await.unwrap();
            // Keep the endpoint registered until the reply is read
            endpoint.next().await;
        });

        let reply = client.request("kubecon.nickname", Bytes::new()).await.unwrap();
        assert_eq!(reply.text(), "Ada");
    }

    #[tokio::test]
    async fn test_respond_error_surfaces_as_service_error() {
        let broker = Arc::new(Broker::new());
        let registry = ServiceRegistry::new(session(&broker, "a").await);
        let client = session(&broker, "b").await;

        let service = registry
            .register(ServiceConfig::new("ai_detect", "0.0.1"))
            .await
            .unwrap();
        let mut endpoint = service
            .add_endpoint("detect", EndpointConfig::new("ai_detect"))
            .await
            .unwrap();

        let server = service.clone();
        tokio::spawn(async move {
            let request = endpoint.next().await.unwrap();
            request.respond_error("400", "invalid image").await.unwrap();
            let stats = server.stats();
            assert_eq!(stats.endpoints[0].num_errors, 1);
            endpoint.next().await;
        });

        match client.request("ai_detect", "not an image").await {
            Err(Error::Service { code, description }) => {
                assert_eq!(code, "400");
                assert_eq!(description, "invalid image");
            }
            other => panic!("expected service error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_endpoint_rejected_until_dropped() {
        let broker = Arc::new(Broker::new());
        let registry = ServiceRegistry::new(session(&broker, "a").await);
        let service = registry
            .register(ServiceConfig::new("kubecon", "0.0.1"))
            .await
            .unwrap();

        let first = service
            .add_endpoint("handoff", EndpointConfig::new("kubecon.handoff"))
            .await
            .unwrap();
        let again = service
            .add_endpoint("handoff", EndpointConfig::new("kubecon.handoff"))
            .await;
        assert!(matches!(again, Err(Error::Registration(_))));

        first.stop();
        assert!(!service.has_endpoint("handoff"));
        assert!(service
            .add_endpoint("handoff", EndpointConfig::new("kubecon.handoff"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_private_queue_group_reaches_one_peer() {
        let broker = Arc::new(Broker::new());
        let a = ServiceRegistry::new(session(&broker, "a").await);
        let b = ServiceRegistry::new(session(&broker, "b").await);
        let client = session(&broker, "c").await;

        let svc_a = a.register(ServiceConfig::new("kubecon", "0.0.1")).await.unwrap();
        let svc_b = b.register(ServiceConfig::new("kubecon", "0.0.1")).await.unwrap();
        assert_ne!(svc_a.id(), svc_b.id());

        let subject_a = format!("kubecon.{}.advertise", svc_a.id());
        let mut ep_a = svc_a
            .add_endpoint("advertise", EndpointConfig::new(&subject_a).queue_group(svc_a.id()))
            .await
            .unwrap();
        let subject_b = format!("kubecon.{}.advertise", svc_b.id());
        let _ep_b = svc_b
            .add_endpoint("advertise", EndpointConfig::new(&subject_b).queue_group(svc_b.id()))
            .await
            .unwrap();

        tokio::spawn(async move {
            let request = ep_a.next().await.unwrap();
            request.respond("a").await.unwrap();
            ep_a.next().await;
        });

        let reply = client.request(&subject_a, Bytes::new()).await.unwrap();
        assert_eq!(reply.text(), "a");
    }

    #[tokio::test]
    async fn test_discovery_info_and_stats() {
        let broker = Arc::new(Broker::new());
        let registry = ServiceRegistry::new(session(&broker, "a").await);
        let client = session(&broker, "b").await;

        let service = registry
            .register(ServiceConfig::new("kubecon", "0.0.1").description("Kiosk"))
            .await
            .unwrap();
        service.set_stats_handler(|_| serde_json::json!({ "server": "local" }));
        let _endpoint = service
            .add_endpoint(
                "quickdraw",
                EndpointConfig::new("kubecon.quickdraw").description("Quickdraw"),
            )
            .await
            .unwrap();

        let subject = format!("$SRV.INFO.kubecon.{}", service.id());
        let info: ServiceInfo = client
            .request_json(&subject, &(), RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(info.id, service.id());
        assert_eq!(info.description, "Kiosk");
        assert_eq!(info.endpoints.len(), 1);
        assert_eq!(info.endpoints[0].subject, "kubecon.quickdraw");

        let stats: ServiceStats = client
            .request_json("$SRV.STATS.kubecon", &(), RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(stats.endpoints[0].data, Some(serde_json::json!({ "server": "local" })));

        // Addressed to another service name: nobody answers
        let result = client.request("$SRV.PING.other", Bytes::new()).await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_stop_ends_endpoints() {
        let broker = Arc::new(Broker::new());
        let registry = ServiceRegistry::new(session(&broker, "a").await);
        let service = registry
            .register(ServiceConfig::new("kubecon", "0.0.1"))
            .await
            .unwrap();
        let mut endpoint = service
            .add_endpoint("nickname", EndpointConfig::new("kubecon.nickname"))
            .await
            .unwrap();

        service.stop();

        assert!(endpoint.next().await.is_none());
        assert!(service.is_stopped());
        assert!(registry.services().is_empty());
        let result = service
            .add_endpoint("again", EndpointConfig::new("kubecon.again"))
            .await;
        assert!(matches!(result, Err(Error::Registration(_))));
    }
}
