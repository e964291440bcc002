//! Durable streams
//!
//! A durable stream is an append-only log retained by the bus. Publishing on
//! a subject the stream binds appends a record; ordered consumers replay the
//! log from the start and then follow it.
//!
//! ```text
//!   publish("survey.submitted")          ordered_consumer("survey")
//!              │                                   ▲
//!              ▼                                   │ seq 1, 2, 3, ...
//!   ┌──────────────────────────────────────────────┴──┐
//!   │ StreamLog "survey": [1] [2] [3] ... last_seq ──►│ watch
//!   └─────────────────────────────────────────────────┘
//! ```

pub mod consumer;
pub mod log;

pub use consumer::OrderedConsumer;
pub use log::{PubAck, StreamConfig, StreamInfo, StreamRecord};
