//! Bus session
//!
//! A `Session` is one peer's connection to the bus. It owns the connection
//! lifecycle and exposes publish, subscribe and request/reply. When the link
//! drops, a supervisor task restores it and re-installs every live
//! subscription, so callers never re-register after a reconnect.
//!
//! Publishing while the link is down is rejected with `Error::Disconnected`;
//! nothing is buffered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::config::{SessionConfig, INBOX_PREFIX};
use super::request::{reply_token, RequestOptions};
use super::state::ConnectionStatus;
use super::subscription::Subscription;
use crate::bus::{subject, Broker, ClientId, LinkEvent, Message, RouteOutcome, ServerInfo};
use crate::error::{Error, Result};
use crate::stats::{SessionStats, StatsCounters};
use crate::stream::{OrderedConsumer, PubAck, StreamConfig, StreamInfo};

struct SubEntry {
    pattern: String,
    queue: Option<String>,
    tx: mpsc::Sender<Message>,
    interest: Option<u64>,
}

pub(crate) struct Inner {
    pub(crate) broker: Arc<Broker>,
    name: String,
    config: SessionConfig,
    info: RwLock<Option<ServerInfo>>,
    status_tx: watch::Sender<ConnectionStatus>,
    status_events: broadcast::Sender<ConnectionStatus>,
    subs: Mutex<HashMap<u64, SubEntry>>,
    next_sid: AtomicU64,
    inbox: String,
    pending: Mutex<HashMap<String, oneshot::Sender<Message>>>,
    mux: Mutex<Option<JoinHandle<()>>>,
    pub(crate) stats: StatsCounters,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Inner {
    fn set_status(&self, next: ConnectionStatus) {
        let current = *self.status_tx.borrow();
        if !current.can_transition_to(next) {
            tracing::debug!(name = %self.name, from = %current, to = %next, "Ignoring status transition");
            return;
        }

        self.status_tx.send_replace(next);
        let _ = self.status_events.send(next);
        tracing::info!(name = %self.name, from = %current, to = %next, "Connection status changed");
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    pub(crate) fn client_id(&self) -> Result<ClientId> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        self.info
            .read()
            .as_ref()
            .map(|info| info.client_id)
            .ok_or(Error::Disconnected)
    }

    fn publish_message(&self, message: Message) -> Result<RouteOutcome> {
        let client_id = self.client_id()?;
        if !self.status().is_connected() {
            return Err(Error::Disconnected);
        }

        let len = message.len();
        let outcome = self.broker.publish(client_id, message)?;
        self.stats.record_out(len);
        Ok(outcome)
    }

    fn subscribe(self: &Arc<Self>, pattern: &str, queue: Option<&str>) -> Result<Subscription> {
        subject::validate_pattern(pattern)?;

        let (tx, rx) = mpsc::channel(self.config.subscription_capacity);
        let sid = self.next_sid.fetch_add(1, Ordering::Relaxed);

        let mut subs = self.subs.lock();
        let interest = match self.client_id() {
            Ok(client_id) => match self.broker.subscribe(client_id, pattern, queue, tx.clone()) {
                Ok(id) => Some(id),
                // Link dropped under us; the supervisor installs it on reconnect
                Err(Error::Disconnected) => None,
                Err(e) => return Err(e),
            },
            Err(Error::Disconnected) if self.status() == ConnectionStatus::Reconnecting => None,
            Err(e) => return Err(e),
        };

        subs.insert(
            sid,
            SubEntry {
                pattern: pattern.to_string(),
                queue: queue.map(str::to_string),
                tx,
                interest,
            },
        );
        drop(subs);

        tracing::debug!(name = %self.name, sid = sid, pattern = pattern, queue = ?queue, "Subscribed");

        Ok(Subscription::new(
            sid,
            pattern.to_string(),
            queue.map(str::to_string),
            rx,
            Arc::downgrade(self),
        ))
    }

    pub(crate) fn remove_subscription(&self, sid: u64) {
        let entry = self.subs.lock().remove(&sid);
        if let Some(SubEntry {
            interest: Some(id), ..
        }) = entry
        {
            self.broker.unsubscribe(id);
        }
    }

    fn ensure_mux(self: &Arc<Self>) -> Result<()> {
        let mut mux = self.mux.lock();
        if mux.is_some() {
            return Ok(());
        }

        let mut sub = self.subscribe(&subject::join(&self.inbox, subject::WILDCARD_ONE), None)?;
        let weak = Arc::downgrade(self);

        *mux = Some(tokio::spawn(async move {
            while let Some(message) = sub.next().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let waiter = inner.pending.lock().remove(&message.subject);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(message);
                    }
                    None => {
                        tracing::debug!(subject = %message.subject, "Late or unknown reply dropped");
                    }
                }
            }
        }));

        Ok(())
    }

    fn on_link_lost(&self) {
        *self.info.write() = None;
        for entry in self.subs.lock().values_mut() {
            entry.interest = None;
        }
        self.set_status(ConnectionStatus::Reconnecting);
    }

    fn on_link_restored(&self, info: ServerInfo) {
        let client_id = info.client_id;
        let mut subs = self.subs.lock();
        *self.info.write() = Some(info);

        for (sid, entry) in subs.iter_mut() {
            match self
                .broker
                .subscribe(client_id, &entry.pattern, entry.queue.as_deref(), entry.tx.clone())
            {
                Ok(id) => entry.interest = Some(id),
                Err(e) => {
                    tracing::warn!(name = %self.name, sid = sid, error = %e, "Failed to restore subscription");
                }
            }
        }
        let restored = subs.len();
        drop(subs);

        self.stats.record_reconnect();
        tracing::info!(name = %self.name, client_id = client_id, subscriptions = restored, "Link restored");
        self.set_status(ConnectionStatus::Connected);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.mux.lock().take() {
            handle.abort();
        }
        if let Some(info) = self.info.read().as_ref() {
            self.broker.disconnect(info.client_id);
        }
    }
}

async fn supervise(weak: Weak<Inner>, mut events: mpsc::UnboundedReceiver<LinkEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Dropped => {}
        }

        let (reconnect, delay, max_attempts) = {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }
            inner.on_link_lost();
            (
                inner.config.reconnect,
                inner.config.reconnect_delay,
                inner.config.max_reconnect_attempts,
            )
        };

        if !reconnect {
            if let Some(inner) = weak.upgrade() {
                inner.set_status(ConnectionStatus::Disconnected);
            }
            return;
        }

        let mut attempt: u32 = 0;
        events = loop {
            attempt += 1;
            tokio::time::sleep(delay).await;

            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }

            match inner.broker.connect(&inner.name) {
                Ok(link) => {
                    inner.on_link_restored(link.info);
                    break link.events;
                }
                Err(e) => {
                    tracing::warn!(name = %inner.name, attempt = attempt, error = %e, "Reconnect failed");
                    if max_attempts > 0 && attempt >= max_attempts {
                        inner.set_status(ConnectionStatus::Disconnected);
                        return;
                    }
                }
            }
        };
    }
}

/// A peer's connection to the bus
///
/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Connect to a broker
    pub async fn connect(
        broker: Arc<Broker>,
        name: impl Into<String>,
        config: SessionConfig,
    ) -> Result<Session> {
        let name = name.into();
        let (status_tx, _) = watch::channel(ConnectionStatus::Connecting);
        let (status_events, _) = broadcast::channel(16);

        let link = match broker.connect(&name) {
            Ok(link) => link,
            Err(e) => {
                tracing::error!(name = %name, error = %e, "Connection failed");
                return Err(e);
            }
        };

        let inner = Arc::new(Inner {
            broker,
            name,
            config,
            info: RwLock::new(Some(link.info)),
            status_tx,
            status_events,
            subs: Mutex::new(HashMap::new()),
            next_sid: AtomicU64::new(1),
            inbox: subject::join(INBOX_PREFIX, &reply_token()),
            pending: Mutex::new(HashMap::new()),
            mux: Mutex::new(None),
            stats: StatsCounters::default(),
            supervisor: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        inner.set_status(ConnectionStatus::Connected);
        let supervisor = tokio::spawn(supervise(Arc::downgrade(&inner), link.events));
        *inner.supervisor.lock() = Some(supervisor);

        Ok(Session { inner })
    }

    /// Connection name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Current connection status
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status()
    }

    /// Observe the current status
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Receive every status transition from now on
    pub fn status_events(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.inner.status_events.subscribe()
    }

    /// Server details for the current link
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.inner.info.read().clone()
    }

    /// Broker-assigned id of the current link
    pub fn client_id(&self) -> Result<ClientId> {
        self.inner.client_id()
    }

    /// Traffic statistics
    pub fn stats(&self) -> SessionStats {
        self.inner.stats.snapshot()
    }

    /// Generate a fresh, unshared reply subject
    pub fn new_inbox(&self) -> String {
        subject::join(INBOX_PREFIX, &reply_token())
    }

    /// Publish a payload
    pub async fn publish(&self, subject: &str, payload: impl Into<Bytes>) -> Result<()> {
        self.inner
            .publish_message(Message::new(subject, payload.into()))
            .map(|_| ())
    }

    /// Publish a payload with a reply subject
    pub async fn publish_with_reply(
        &self,
        subject: &str,
        reply: &str,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        subject::validate_subject(reply)?;
        self.inner
            .publish_message(Message::new(subject, payload.into()).with_reply(reply))
            .map(|_| ())
    }

    /// Publish a prepared message, returning routing details
    pub async fn publish_message(&self, message: Message) -> Result<RouteOutcome> {
        self.inner.publish_message(message)
    }

    /// Publish a value encoded as JSON
    pub async fn publish_json<T: Serialize>(&self, subject: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.publish(subject, payload).await
    }

    /// Subscribe to a subject pattern
    pub async fn subscribe(&self, pattern: &str) -> Result<Subscription> {
        self.inner.subscribe(pattern, None)
    }

    /// Subscribe as a member of a queue group
    pub async fn queue_subscribe(&self, pattern: &str, queue: &str) -> Result<Subscription> {
        self.inner.subscribe(pattern, Some(queue))
    }

    /// Send a request using the session's default timeout
    pub async fn request(&self, subject: &str, payload: impl Into<Bytes>) -> Result<Message> {
        self.request_with(subject, payload, RequestOptions::default())
            .await
    }

    /// Send a request and wait for the first reply
    ///
    /// Fails with `NoResponders` when nothing is subscribed to `subject`,
    /// `Timeout` when nothing answers in time and `Service` when the responder
    /// replied with a service error.
    pub async fn request_with(
        &self,
        subject: &str,
        payload: impl Into<Bytes>,
        options: RequestOptions,
    ) -> Result<Message> {
        let timeout = options.timeout.unwrap_or(self.inner.config.request_timeout);
        let payload = payload.into();

        let response = if options.is_dedicated() {
            self.request_dedicated(subject, payload, options.reply, timeout)
                .await?
        } else {
            self.request_muxed(subject, payload, timeout).await?
        };

        if let Some((code, description)) = response.service_error() {
            return Err(Error::Service { code, description });
        }

        Ok(response)
    }

    async fn request_dedicated(
        &self,
        subject: &str,
        payload: Bytes,
        reply: Option<String>,
        timeout: Duration,
    ) -> Result<Message> {
        let reply = reply.unwrap_or_else(|| self.new_inbox());
        subject::validate_subject(&reply)?;

        let mut sub = self.subscribe(&reply).await?;
        let outcome = self
            .inner
            .publish_message(Message::new(subject, payload).with_reply(reply))?;
        if outcome.delivered == 0 {
            return Err(Error::NoResponders(subject.to_string()));
        }

        match tokio::time::timeout(timeout, sub.next()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(Error::Closed),
            Err(_) => Err(Error::Timeout {
                subject: subject.to_string(),
                after: timeout,
            }),
        }
    }

    async fn request_muxed(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Message> {
        self.inner.ensure_mux()?;

        let reply = subject::join(&self.inner.inbox, &reply_token());
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(reply.clone(), tx);

        let outcome = match self
            .inner
            .publish_message(Message::new(subject, payload).with_reply(reply.clone()))
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.inner.pending.lock().remove(&reply);
                return Err(e);
            }
        };
        if outcome.delivered == 0 {
            self.inner.pending.lock().remove(&reply);
            return Err(Error::NoResponders(subject.to_string()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                self.inner.pending.lock().remove(&reply);
                Err(Error::Timeout {
                    subject: subject.to_string(),
                    after: timeout,
                })
            }
        }
    }

    /// Send a JSON request and decode a JSON reply
    pub async fn request_json<T, R>(&self, subject: &str, value: &T, options: RequestOptions) -> Result<R>
    where
        T: Serialize,
        R: serde::de::DeserializeOwned,
    {
        let payload = serde_json::to_vec(value)?;
        self.request_with(subject, payload, options).await?.json()
    }

    /// Measure the round-trip time to the server
    pub async fn rtt(&self) -> Result<Duration> {
        let client_id = self.inner.client_id()?;
        let start = Instant::now();
        self.inner.broker.ping(client_id).await?;
        Ok(start.elapsed())
    }

    /// Confirm the server has seen everything published so far
    pub async fn flush(&self) -> Result<()> {
        self.rtt().await.map(|_| ())
    }

    /// Create a durable stream (idempotent for identical definitions)
    pub async fn add_stream(&self, config: StreamConfig) -> Result<StreamInfo> {
        self.inner.client_id()?;
        self.inner.broker.add_stream(config)
    }

    /// Get durable stream statistics
    pub async fn stream_info(&self, name: &str) -> Result<StreamInfo> {
        self.inner.client_id()?;
        self.inner.broker.stream_info(name)
    }

    /// Publish into a durable stream and wait for the acknowledgement
    ///
    /// Fails with `NoResponders` when no stream binds `subject`.
    pub async fn stream_publish(&self, subject: &str, payload: impl Into<Bytes>) -> Result<PubAck> {
        let outcome = self
            .inner
            .publish_message(Message::new(subject, payload.into()))?;
        outcome
            .ack
            .ok_or_else(|| Error::NoResponders(subject.to_string()))
    }

    /// Open an ordered consumer replaying `stream` from its first record
    ///
    /// `filter` restricts delivery to records whose subject matches it.
    pub async fn ordered_consumer(&self, stream: &str, filter: Option<&str>) -> Result<OrderedConsumer> {
        self.inner.client_id()?;
        OrderedConsumer::new(self.clone(), stream, filter)
    }

    pub(crate) fn broker(&self) -> &Arc<Broker> {
        &self.inner.broker
    }

    /// Remove a subscription by id; its receiver sees the end of the stream
    pub(crate) fn remove_subscription(&self, sid: u64) {
        self.inner.remove_subscription(sid);
    }

    /// Close the session
    ///
    /// Every subscription ends and pending requests fail with `Closed`.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.inner.supervisor.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.inner.mux.lock().take() {
            handle.abort();
        }

        let subs: Vec<SubEntry> = self.inner.subs.lock().drain().map(|(_, e)| e).collect();
        for entry in subs {
            if let Some(id) = entry.interest {
                self.inner.broker.unsubscribe(id);
            }
        }
        self.inner.pending.lock().clear();

        if let Some(info) = self.inner.info.write().take() {
            self.inner.broker.disconnect(info.client_id);
        }

        self.inner.set_status(ConnectionStatus::Disconnected);
        tracing::info!(name = %self.inner.name, "Session closed");
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.inner.name)
            .field("status", &self.status())
            .finish()
    }
}
