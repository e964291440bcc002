//! Messages carried by the bus
//!
//! A `Message` is cheap to clone: the payload is a `bytes::Bytes`, so fan-out
//! to several subscribers shares one allocation.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::Result;

/// Header carrying a service error code on a reply
pub const SERVICE_ERROR_CODE: &str = "Nats-Service-Error-Code";

/// Header carrying a service error description on a reply
pub const SERVICE_ERROR: &str = "Nats-Service-Error";

/// Message headers
pub type Headers = BTreeMap<String, String>;

/// A message delivered to a subscriber
#[derive(Debug, Clone)]
pub struct Message {
    /// Subject the message was published on
    pub subject: String,
    /// Reply subject, if the publisher expects an answer
    pub reply: Option<String>,
    /// Optional headers
    pub headers: Option<Headers>,
    /// Payload (zero-copy via reference counting)
    pub payload: Bytes,
}

impl Message {
    /// Create a message without reply subject or headers
    pub fn new(subject: impl Into<String>, payload: Bytes) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            headers: None,
            payload,
        }
    }

    /// Set the reply subject
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// Attach headers
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Decode the payload as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Decode the payload as UTF-8 text, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Look up a header value
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|h| h.get(name))
            .map(String::as_str)
    }

    /// Service error carried by this reply, as `(code, description)`
    pub fn service_error(&self) -> Option<(String, String)> {
        let code = self.header(SERVICE_ERROR_CODE)?;
        let description = self.header(SERVICE_ERROR).unwrap_or_default();
        Some((code.to_string(), description.to_string()))
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
