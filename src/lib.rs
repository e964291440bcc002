//! peerbus: cooperating peers on a shared message bus
//!
//! A process-local broker carries subject-based messaging between sessions.
//! On top of it sit a micro-service framework with discovery, durable
//! streams with ordered replay, and the kiosk peers that use all three.
//!
//! # Architecture
//!
//! ```text
//!   kiosk::Peer ──► service::ServiceRegistry ──► endpoints + $SRV discovery
//!        │                     │
//!        ▼                     ▼
//!   session::Session ◄── publish / subscribe / request / streams
//!        │
//!        ▼
//!   bus::Broker ──► subject routing, queue groups, stream logs
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use peerbus::{Broker, Session, SessionConfig};
//!
//! # async fn demo() -> peerbus::Result<()> {
//! let broker = Arc::new(Broker::new());
//! let session = Session::connect(broker, "Ada", SessionConfig::default()).await?;
//! let mut sub = session.subscribe("greetings.>").await?;
//! session.publish("greetings.hello", "hi").await?;
//! let _message = sub.next().await;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod error;
pub mod kiosk;
pub mod service;
pub mod session;
pub mod stats;
pub mod stream;

pub use bus::{Broker, BrokerConfig, Message};
pub use error::{Error, Result};
pub use service::{EndpointConfig, Request, Service, ServiceConfig, ServiceRegistry};
pub use session::{ConnectionStatus, RequestOptions, Session, SessionConfig, Subscription};
pub use stats::SessionStats;
pub use stream::{OrderedConsumer, StreamConfig};
