//! The shared message bus
//!
//! The bus is the only thing peers have in common. It offers subject-based
//! publish/subscribe with hierarchical wildcards, queue-group load balancing,
//! request/reply addressing and durable streams.
//!
//! # Architecture
//!
//! ```text
//!                         Arc<Broker>
//!                 ┌─────────────────────────────┐
//!                 │ interests: pattern, queue,  │
//!                 │            mpsc::Sender     │
//!                 │ streams:   name -> log      │
//!                 └──────────────┬──────────────┘
//!                                │
//!        ┌───────────────────────┼───────────────────────┐
//!        │                       │                       │
//!        ▼                       ▼                       ▼
//!    [Session A]             [Session B]             [Session C]
//!    publish()               sub.next()              consumer.next()
//! ```
//!
//! Payloads are `bytes::Bytes`, so a message fanned out to many subscribers
//! shares a single allocation.

pub mod broker;
pub mod config;
pub mod message;
pub mod subject;

pub use broker::{Broker, ClientId, Link, LinkEvent, RouteOutcome, ServerInfo};
pub use config::BrokerConfig;
pub use message::{Headers, Message};
