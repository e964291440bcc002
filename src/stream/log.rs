//! Append-only stream storage
//!
//! A stream binds one or more subject patterns. Every message published on a
//! bound subject is appended with the next sequence number. Records are never
//! mutated or removed, so sequences are gap-free starting at 1.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::bus::subject;
use crate::error::{Error, Result};

/// Stream definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stream name (a single token, e.g. "survey")
    pub name: String,
    /// Subject patterns captured by the stream
    pub subjects: Vec<String>,
}

impl StreamConfig {
    /// Create a stream definition
    pub fn new(name: impl Into<String>, subjects: &[&str]) -> Self {
        Self {
            name: name.into(),
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains(['.', '*', '>', ' ']) {
            return Err(Error::Registration(format!(
                "invalid stream name '{}'",
                self.name
            )));
        }
        if self.subjects.is_empty() {
            return Err(Error::Registration(format!(
                "stream '{}' binds no subjects",
                self.name
            )));
        }
        for pattern in &self.subjects {
            subject::validate_pattern(pattern)?;
        }
        Ok(())
    }

    /// Whether this stream captures messages published on `subject`
    pub fn captures(&self, subject: &str) -> bool {
        self.subjects.iter().any(|p| subject::matches(p, subject))
    }
}

/// A durably appended record
#[derive(Debug, Clone)]
pub struct StreamRecord {
    /// Stream sequence, starting at 1
    pub seq: u64,
    /// Subject the record was published on
    pub subject: String,
    /// Record payload
    pub payload: Bytes,
    /// Append time
    pub published_at: SystemTime,
}

impl StreamRecord {
    /// Decode the payload as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Acknowledgement for a stream publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubAck {
    /// Stream that stored the record
    pub stream: String,
    /// Assigned sequence
    pub seq: u64,
}

/// Stream statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Stream definition
    pub config: StreamConfig,
    /// Number of stored records
    pub messages: u64,
    /// Last assigned sequence (0 when empty)
    pub last_seq: u64,
    /// Number of attached consumers
    pub consumer_count: u32,
}

/// Storage for one stream
pub(crate) struct StreamLog {
    config: StreamConfig,
    records: Vec<StreamRecord>,
    last_seq: watch::Sender<u64>,
    consumers: AtomicU32,
}

impl StreamLog {
    pub(crate) fn new(config: StreamConfig) -> Self {
        let (last_seq, _) = watch::channel(0);
        Self {
            config,
            records: Vec::new(),
            last_seq,
            consumers: AtomicU32::new(0),
        }
    }

    pub(crate) fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Append a record, returning its sequence
    pub(crate) fn append(&mut self, subject: &str, payload: Bytes) -> u64 {
        let seq = self.records.len() as u64 + 1;
        self.records.push(StreamRecord {
            seq,
            subject: subject.to_string(),
            payload,
            published_at: SystemTime::now(),
        });
        self.last_seq.send_replace(seq);
        seq
    }

    /// Get the record at `seq`
    pub(crate) fn get(&self, seq: u64) -> Option<&StreamRecord> {
        if seq == 0 {
            return None;
        }
        self.records.get((seq - 1) as usize)
    }

    pub(crate) fn watch(&self) -> watch::Receiver<u64> {
        self.last_seq.subscribe()
    }

    pub(crate) fn attach_consumer(&self) {
        self.consumers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn release_consumer(&self) {
        let _ = self
            .consumers
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub(crate) fn info(&self) -> StreamInfo {
        StreamInfo {
            config: self.config.clone(),
            messages: self.records.len() as u64,
            last_seq: *self.last_seq.borrow(),
            consumer_count: self.consumers.load(Ordering::Relaxed),
        }
    }
}
