//! Service registry
//!
//! Request/reply services on top of a session. A service owns endpoints,
//! each a queue-group subscription, and answers discovery requests with its
//! identity, endpoint list and request statistics.
//!
//! ```text
//!                        ┌──────────────────────────┐
//!   kubecon.nickname ───►│ Endpoint  (queue "q")    │──► Request ──► respond()
//!                        ├──────────────────────────┤
//!   kubecon.<id>.… ─────►│ Endpoint  (queue <id>)   │──► Request ──► respond_error()
//!                        ├──────────────────────────┤
//!   $SRV.PING|INFO|… ───►│ discovery                │──► ServiceInfo / ServiceStats
//!                        └──────────────────────────┘
//! ```

pub mod config;
pub mod endpoint;
pub mod instance;
pub mod registry;
pub mod request;

pub use config::{EndpointConfig, Metadata, ServiceConfig, DEFAULT_QUEUE_GROUP};
pub use endpoint::{Endpoint, EndpointInfo, EndpointStats};
pub use instance::{PingResponse, Service, ServiceInfo, ServiceStats, DISCOVERY_PREFIX};
pub use registry::{next_service_id, ServiceRegistry, SERVICE_ID_LEN};
pub use request::Request;
