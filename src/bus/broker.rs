//! In-process message broker
//!
//! The broker is the shared bus every peer connects to. It routes published
//! messages to matching subscriptions, load balances across queue groups,
//! appends to durable streams and reports link loss to connected clients.
//!
//! Routing tables are guarded by `parking_lot` locks that are never held
//! across an `.await`, so the broker can be shared freely between tasks.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use super::config::BrokerConfig;
use super::message::Message;
use super::subject;
use crate::error::{Error, Result};
use crate::stream::log::{PubAck, StreamConfig, StreamInfo, StreamLog, StreamRecord};

/// Identifier the broker assigns to each client connection
pub type ClientId = u64;

/// Server details handed to a client on connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name
    pub server_name: String,
    /// Connection id assigned to this client
    pub client_id: ClientId,
    /// Server version
    pub version: String,
    /// Maximum accepted payload size (0 = unlimited)
    pub max_payload: usize,
}

/// Out-of-band events the broker sends to a client link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link was lost without the client asking for it
    Dropped,
}

/// An established client connection
#[derive(Debug)]
pub struct Link {
    /// Server details for this connection
    pub info: ServerInfo,
    /// Link events (drops)
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Outcome of routing one published message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Number of subscriptions the message was handed to
    pub delivered: usize,
    /// Stream acknowledgement, when a stream captured the message
    pub ack: Option<PubAck>,
}

struct ClientEntry {
    name: String,
    events: mpsc::UnboundedSender<LinkEvent>,
}

struct Interest {
    client_id: ClientId,
    pattern: String,
    queue: Option<String>,
    tx: mpsc::Sender<Message>,
}

#[derive(Default)]
struct Routing {
    clients: HashMap<ClientId, ClientEntry>,
    interests: BTreeMap<u64, Interest>,
}

/// Shared pub/sub bus
pub struct Broker {
    config: BrokerConfig,
    routing: RwLock<Routing>,
    queue_cursors: Mutex<HashMap<String, usize>>,
    streams: RwLock<HashMap<String, Arc<RwLock<StreamLog>>>>,
    next_client_id: AtomicU64,
    next_interest_id: AtomicU64,
    available: AtomicBool,
}

impl Broker {
    /// Create a broker with default configuration
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    /// Create a broker with custom configuration
    pub fn with_config(config: BrokerConfig) -> Self {
        Self {
            config,
            routing: RwLock::new(Routing::default()),
            queue_cursors: Mutex::new(HashMap::new()),
            streams: RwLock::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
            next_interest_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
        }
    }

    /// Get the broker configuration
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Open a client connection
    pub fn connect(&self, name: &str) -> Result<Link> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::Connection(format!(
                "server '{}' is unavailable",
                self.config.server_name
            )));
        }

        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (events_tx, events) = mpsc::unbounded_channel();

        self.routing.write().clients.insert(
            client_id,
            ClientEntry {
                name: name.to_string(),
                events: events_tx,
            },
        );

        tracing::info!(
            server = %self.config.server_name,
            client_id = client_id,
            name = name,
            "Client connected"
        );

        Ok(Link {
            info: ServerInfo {
                server_name: self.config.server_name.clone(),
                client_id,
                version: self.config.version.clone(),
                max_payload: self.config.max_payload,
            },
            events,
        })
    }

    /// Close a client connection at the client's request
    pub fn disconnect(&self, client_id: ClientId) {
        if let Some(entry) = self.remove_client(client_id) {
            tracing::info!(client_id = client_id, name = %entry.name, "Client disconnected");
        }
    }

    /// Sever a client link as if the network failed
    ///
    /// The client is notified through its link events and is expected to
    /// reconnect on its own.
    pub fn drop_client(&self, client_id: ClientId) {
        if let Some(entry) = self.remove_client(client_id) {
            tracing::warn!(client_id = client_id, name = %entry.name, "Client link dropped");
            let _ = entry.events.send(LinkEvent::Dropped);
        }
    }

    /// Take the broker offline or bring it back
    ///
    /// Going offline drops every connected client and refuses new connections.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if !available {
            let ids: Vec<ClientId> = self.routing.read().clients.keys().copied().collect();
            for id in ids {
                self.drop_client(id);
            }
        }
        tracing::info!(server = %self.config.server_name, available = available, "Availability changed");
    }

    /// Whether the broker accepts connections
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn remove_client(&self, client_id: ClientId) -> Option<ClientEntry> {
        let mut routing = self.routing.write();
        let entry = routing.clients.remove(&client_id)?;
        let mut queues = Vec::new();
        routing.interests.retain(|_, i| {
            if i.client_id != client_id {
                return true;
            }
            queues.extend(i.queue.clone());
            false
        });
        self.prune_cursors(&routing, queues);
        Some(entry)
    }

    /// Forget the round-robin cursor of every queue group left without members
    fn prune_cursors(&self, routing: &Routing, queues: Vec<String>) {
        if queues.is_empty() {
            return;
        }
        let mut cursors = self.queue_cursors.lock();
        for queue in queues {
            let in_use = routing
                .interests
                .values()
                .any(|i| i.queue.as_deref() == Some(queue.as_str()));
            if !in_use {
                cursors.remove(&queue);
            }
        }
    }

    fn ensure_connected(&self, client_id: ClientId) -> Result<()> {
        if self.routing.read().clients.contains_key(&client_id) {
            Ok(())
        } else {
            Err(Error::Disconnected)
        }
    }

    /// Register interest in a subject pattern
    ///
    /// Returns the interest id used to unsubscribe.
    pub fn subscribe(
        &self,
        client_id: ClientId,
        pattern: &str,
        queue: Option<&str>,
        tx: mpsc::Sender<Message>,
    ) -> Result<u64> {
        subject::validate_pattern(pattern)?;
        if let Some(q) = queue {
            if q.is_empty() || q.contains(char::is_whitespace) {
                return Err(Error::Registration(format!("invalid queue group '{}'", q)));
            }
        }

        let mut routing = self.routing.write();
        if !routing.clients.contains_key(&client_id) {
            return Err(Error::Disconnected);
        }

        let id = self.next_interest_id.fetch_add(1, Ordering::Relaxed);
        routing.interests.insert(
            id,
            Interest {
                client_id,
                pattern: pattern.to_string(),
                queue: queue.map(str::to_string),
                tx,
            },
        );

        tracing::debug!(
            client_id = client_id,
            interest = id,
            pattern = pattern,
            queue = ?queue,
            "Interest added"
        );

        Ok(id)
    }

    /// Remove a previously registered interest
    pub fn unsubscribe(&self, interest_id: u64) {
        let mut routing = self.routing.write();
        if let Some(interest) = routing.interests.remove(&interest_id) {
            self.prune_cursors(&routing, interest.queue.iter().cloned().collect());
            tracing::debug!(
                client_id = interest.client_id,
                interest = interest_id,
                pattern = %interest.pattern,
                "Interest removed"
            );
        }
    }

    /// Publish a message
    ///
    /// Every matching plain subscription receives a copy; each matching queue
    /// group receives one copy delivered to a single member, chosen round
    /// robin. Streams binding the subject append the payload.
    pub fn publish(&self, client_id: ClientId, message: Message) -> Result<RouteOutcome> {
        subject::validate_subject(&message.subject)?;
        self.ensure_connected(client_id)?;

        if self.config.max_payload > 0 && message.payload.len() > self.config.max_payload {
            return Err(Error::PayloadTooLarge {
                size: message.payload.len(),
                max: self.config.max_payload,
            });
        }

        let ack = self.append_to_streams(&message.subject, &message.payload);
        let delivered = self.route(message);

        Ok(RouteOutcome { delivered, ack })
    }

    fn route(&self, message: Message) -> usize {
        let routing = self.routing.read();

        let mut plain = Vec::new();
        let mut groups: BTreeMap<&str, Vec<&Interest>> = BTreeMap::new();

        for interest in routing.interests.values() {
            if !subject::matches(&interest.pattern, &message.subject) {
                continue;
            }
            match interest.queue.as_deref() {
                Some(queue) => groups.entry(queue).or_default().push(interest),
                None => plain.push(interest),
            }
        }

        let mut targets = plain;
        if !groups.is_empty() {
            let mut cursors = self.queue_cursors.lock();
            for (queue, members) in groups {
                let cursor = cursors.entry(queue.to_string()).or_insert(0);
                targets.push(members[*cursor % members.len()]);
                *cursor = cursor.wrapping_add(1);
            }
        }

        let mut delivered = 0;
        for interest in targets {
            match interest.tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Slow consumer: drop rather than block the publisher
                    tracing::warn!(
                        client_id = interest.client_id,
                        subject = %message.subject,
                        "Slow consumer, message dropped"
                    );
                    delivered += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }

        delivered
    }

    fn append_to_streams(&self, subject: &str, payload: &Bytes) -> Option<PubAck> {
        let streams = self.streams.read();
        let mut ack = None;

        for log in streams.values() {
            let mut log = log.write();
            if log.config().captures(subject) {
                let seq = log.append(subject, payload.clone());
                tracing::debug!(stream = %log.config().name, seq = seq, subject = subject, "Record appended");
                ack = Some(PubAck {
                    stream: log.config().name.clone(),
                    seq,
                });
            }
        }

        ack
    }

    /// Measure a round trip to the server
    pub async fn ping(&self, client_id: ClientId) -> Result<()> {
        self.ensure_connected(client_id)?;
        if !self.config.ping_latency.is_zero() {
            tokio::time::sleep(self.config.ping_latency * 2).await;
        }
        self.ensure_connected(client_id)
    }

    /// Create a durable stream
    ///
    /// Re-adding an identical definition is a no-op.
    pub fn add_stream(&self, config: StreamConfig) -> Result<StreamInfo> {
        config.validate()?;

        let mut streams = self.streams.write();
        if let Some(existing) = streams.get(&config.name) {
            let existing = existing.read();
            if existing.config() == &config {
                return Ok(existing.info());
            }
            return Err(Error::Registration(format!(
                "stream '{}' already exists with a different definition",
                config.name
            )));
        }

        let log = StreamLog::new(config.clone());
        let info = log.info();
        streams.insert(config.name.clone(), Arc::new(RwLock::new(log)));

        tracing::info!(stream = %config.name, subjects = ?config.subjects, "Stream created");

        Ok(info)
    }

    fn stream(&self, name: &str) -> Result<Arc<RwLock<StreamLog>>> {
        self.streams
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::StreamNotFound(name.to_string()))
    }

    /// Get stream statistics
    pub fn stream_info(&self, name: &str) -> Result<StreamInfo> {
        Ok(self.stream(name)?.read().info())
    }

    /// Read the record at `seq` on behalf of a connected client
    pub fn stream_read(
        &self,
        client_id: ClientId,
        name: &str,
        seq: u64,
    ) -> Result<Option<StreamRecord>> {
        self.ensure_connected(client_id)?;
        Ok(self.stream(name)?.read().get(seq).cloned())
    }

    /// Watch the last assigned sequence of a stream
    pub fn stream_watch(&self, name: &str) -> Result<watch::Receiver<u64>> {
        Ok(self.stream(name)?.read().watch())
    }

    pub(crate) fn attach_consumer(&self, name: &str) -> Result<()> {
        self.stream(name)?.read().attach_consumer();
        Ok(())
    }

    pub(crate) fn release_consumer(&self, name: &str) {
        if let Ok(log) = self.stream(name) {
            log.read().release_consumer();
        }
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.routing.read().clients.len()
    }

    /// Number of registered interests
    pub fn interest_count(&self) -> usize {
        self.routing.read().interests.len()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}
