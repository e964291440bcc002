//! Incoming service requests

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::endpoint::EndpointShared;
use crate::bus::message::{Headers, SERVICE_ERROR, SERVICE_ERROR_CODE};
use crate::bus::Message;
use crate::error::Result;
use crate::session::Session;

/// A request delivered to an endpoint
///
/// Every `respond*` method consumes the request, so a request is answered
/// at most once. Dropping it without responding sends nothing.
pub struct Request {
    message: Message,
    session: Session,
    endpoint: Arc<EndpointShared>,
    received_at: Instant,
}

impl Request {
    pub(crate) fn new(
        message: Message,
        session: Session,
        endpoint: Arc<EndpointShared>,
        received_at: Instant,
    ) -> Self {
        Self {
            message,
            session,
            endpoint,
            received_at,
        }
    }

    /// Subject the request was sent to
    pub fn subject(&self) -> &str {
        &self.message.subject
    }

    /// Reply subject, if the sender expects an answer
    pub fn reply(&self) -> Option<&str> {
        self.message.reply.as_deref()
    }

    /// Raw payload
    pub fn data(&self) -> &Bytes {
        &self.message.payload
    }

    /// Underlying bus message
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Decode the payload as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        self.message.json()
    }

    /// Name of the endpoint that received the request
    pub fn endpoint(&self) -> &str {
        &self.endpoint.name
    }

    /// Answer with a payload
    pub async fn respond(self, payload: impl Into<Bytes>) -> Result<()> {
        self.send(payload.into(), None).await
    }

    /// Answer with a JSON-encoded value
    pub async fn respond_json<T: Serialize>(self, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.send(payload.into(), None).await
    }

    /// Answer with a service error
    ///
    /// The requester sees `Error::Service { code, description }`.
    pub async fn respond_error(self, code: impl Into<String>, description: impl Into<String>) -> Result<()> {
        let code = code.into();
        let description = description.into();
        self.endpoint.record_error(&code, &description);

        let mut headers = Headers::new();
        headers.insert(SERVICE_ERROR_CODE.to_string(), code);
        headers.insert(SERVICE_ERROR.to_string(), description);
        self.send(Bytes::new(), Some(headers)).await
    }

    async fn send(self, payload: Bytes, headers: Option<Headers>) -> Result<()> {
        self.endpoint.record_handled(self.received_at.elapsed());

        let Some(reply) = self.message.reply else {
            tracing::debug!(endpoint = %self.endpoint.name, subject = %self.message.subject, "Request has no reply subject");
            return Ok(());
        };

        let mut response = Message::new(reply, payload);
        if let Some(headers) = headers {
            response = response.with_headers(headers);
        }
        self.session.publish_message(response).await.map(|_| ())
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("endpoint", &self.endpoint.name)
            .field("subject", &self.message.subject)
            .field("reply", &self.message.reply)
            .field("len", &self.message.len())
            .finish()
    }
}
