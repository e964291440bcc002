//! Bus sessions
//!
//! A session is one peer's connection to the bus: lifecycle and status,
//! publish, subscribe, request/reply and access to durable streams.

pub mod client;
pub mod config;
pub mod request;
pub mod state;
pub mod subscription;

pub use client::Session;
pub use config::SessionConfig;
pub use request::RequestOptions;
pub use state::ConnectionStatus;
pub use subscription::Subscription;
