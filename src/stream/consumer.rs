//! Ordered consumer
//!
//! An ordered consumer replays a durable stream from its first record and
//! then follows it live. It delivers records in append order with no gaps and
//! no duplicates. If the link drops, it waits for the session to reconnect and
//! resumes right after the last record it delivered.
//!
//! The position is not durable: dropping the consumer releases it, and a new
//! consumer always starts again from sequence 1.

use tokio::sync::watch;

use crate::bus::subject;
use crate::error::{Error, Result};
use crate::session::{ConnectionStatus, Session};

use super::log::StreamRecord;

/// In-order, gap-free reader over a durable stream
pub struct OrderedConsumer {
    session: Session,
    stream: String,
    filter: Option<String>,
    next_seq: u64,
    delivered: u64,
    last_seq: watch::Receiver<u64>,
    status: watch::Receiver<ConnectionStatus>,
}

impl OrderedConsumer {
    pub(crate) fn new(session: Session, stream: &str, filter: Option<&str>) -> Result<Self> {
        if let Some(pattern) = filter {
            subject::validate_pattern(pattern)?;
        }

        let broker = session.broker();
        let last_seq = broker.stream_watch(stream)?;
        broker.attach_consumer(stream)?;
        let status = session.watch_status();

        tracing::debug!(stream = stream, filter = ?filter, "Ordered consumer created");

        Ok(Self {
            session,
            stream: stream.to_string(),
            filter: filter.map(str::to_string),
            next_seq: 1,
            delivered: 0,
            last_seq,
            status,
        })
    }

    /// Stream this consumer reads
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Number of records delivered so far
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Start over from the first record
    pub fn restart(&mut self) {
        tracing::debug!(stream = %self.stream, from_seq = self.next_seq, "Ordered consumer restarted");
        self.next_seq = 1;
        self.delivered = 0;
    }

    /// Wait for the next record
    ///
    /// Fails with `Closed` once the session is closed and `Disconnected` once
    /// it has given up reconnecting.
    pub async fn next(&mut self) -> Result<StreamRecord> {
        loop {
            if self.session.is_closed() {
                return Err(Error::Closed);
            }

            let status = *self.status.borrow_and_update();
            match status {
                ConnectionStatus::Connected => {}
                ConnectionStatus::Disconnected => return Err(Error::Disconnected),
                ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => {
                    self.wait_status().await?;
                    continue;
                }
            }

            let last_seq = *self.last_seq.borrow_and_update();
            if self.next_seq > last_seq {
                tokio::select! {
                    changed = self.last_seq.changed() => {
                        changed.map_err(|_| Error::StreamNotFound(self.stream.clone()))?;
                    }
                    changed = self.status.changed() => {
                        changed.map_err(|_| Error::Closed)?;
                    }
                }
                continue;
            }

            let client_id = match self.session.client_id() {
                Ok(id) => id,
                Err(Error::Disconnected) => {
                    tokio::task::yield_now().await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match self
                .session
                .broker()
                .stream_read(client_id, &self.stream, self.next_seq)
            {
                Ok(Some(record)) => {
                    self.next_seq = record.seq + 1;
                    if self.accepts(&record.subject) {
                        self.delivered += 1;
                        return Ok(record);
                    }
                }
                Ok(None) => {
                    tracing::warn!(stream = %self.stream, seq = self.next_seq, "Sequence announced but missing");
                    self.last_seq.changed().await.map_err(|_| Error::StreamNotFound(self.stream.clone()))?;
                }
                // The status watch reports the drop on the next pass
                Err(Error::Disconnected) => tokio::task::yield_now().await,
                Err(e) => return Err(e),
            }
        }
    }

    async fn wait_status(&mut self) -> Result<()> {
        self.status.changed().await.map_err(|_| Error::Closed)
    }

    fn accepts(&self, record_subject: &str) -> bool {
        self.filter
            .as_deref()
            .map_or(true, |pattern| subject::matches(pattern, record_subject))
    }
}

impl Drop for OrderedConsumer {
    fn drop(&mut self) {
        self.session.broker().release_consumer(&self.stream);
        tracing::debug!(stream = %self.stream, delivered = self.delivered, "Ordered consumer released");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::bus::Broker;
    use crate::session::SessionConfig;
    use crate::stream::StreamConfig;

    async fn setup() -> (Arc<Broker>, Session) {
        let broker = Arc::new(Broker::new());
        let config = SessionConfig::default().reconnect_delay(Duration::from_millis(10));
        let session = Session::connect(broker.clone(), "reader", config).await.unwrap();
        session
            .add_stream(StreamConfig::new("survey", &["survey.>"]))
            .await
            .unwrap();
        (broker, session)
    }

    #[tokio::test]
    async fn test_replays_history_then_follows_live() {
        let (_broker, session) = setup().await;
        session.stream_publish("survey.submitted", "1").await.unwrap();
        session.stream_publish("survey.submitted", "2").await.unwrap();

        let mut consumer = session.ordered_consumer("survey", None).await.unwrap();
        assert_eq!(consumer.next().await.unwrap().payload, "1");
        assert_eq!(consumer.next().await.unwrap().payload, "2");

        let writer = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.stream_publish("survey.submitted", "3").await.unwrap();
        });

        let record = consumer.next().await.unwrap();
        assert_eq!(record.seq, 3);
        assert_eq!(record.payload, "3");
    }

    #[tokio::test]
    async fn test_resubscribe_replays_from_start() {
        let (broker, session) = setup().await;
        for i in 0..3 {
            session
                .stream_publish("survey.submitted", i.to_string())
                .await
                .unwrap();
        }

        let mut first = session.ordered_consumer("survey", None).await.unwrap();
        first.next().await.unwrap();
        first.next().await.unwrap();
        assert_eq!(broker.stream_info("survey").unwrap().consumer_count, 1);
        drop(first);
        assert_eq!(broker.stream_info("survey").unwrap().consumer_count, 0);

        let mut second = session.ordered_consumer("survey", None).await.unwrap();
        assert_eq!(second.next().await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn test_restart_rereads_from_first_record() {
        let (_broker, session) = setup().await;
        session.stream_publish("survey.submitted", "a").await.unwrap();
        session.stream_publish("survey.submitted", "b").await.unwrap();

        let mut consumer = session.ordered_consumer("survey", None).await.unwrap();
        consumer.next().await.unwrap();
        consumer.next().await.unwrap();

        consumer.restart();
        assert_eq!(consumer.delivered(), 0);
        assert_eq!(consumer.next().await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn test_resumes_without_duplicates_across_reconnect() {
        let (broker, session) = setup().await;
        session.stream_publish("survey.submitted", "a").await.unwrap();
        session.stream_publish("survey.submitted", "b").await.unwrap();

        let mut consumer = session.ordered_consumer("survey", None).await.unwrap();
        assert_eq!(consumer.next().await.unwrap().seq, 1);

        let mut status = session.watch_status();
        broker.drop_client(session.client_id().unwrap());
        loop {
            status.changed().await.unwrap();
            if *status.borrow() == ConnectionStatus::Connected {
                break;
            }
        }

        assert_eq!(consumer.next().await.unwrap().seq, 2);
        session.stream_publish("survey.submitted", "c").await.unwrap();
        assert_eq!(consumer.next().await.unwrap().seq, 3);
        assert_eq!(consumer.delivered(), 3);
    }

    #[tokio::test]
    async fn test_filter_skips_other_subjects() {
        let (_broker, session) = setup().await;
        session.stream_publish("survey.draft", "x").await.unwrap();
        session.stream_publish("survey.submitted", "y").await.unwrap();

        let mut consumer = session
            .ordered_consumer("survey", Some("survey.submitted"))
            .await
            .unwrap();
        let record = consumer.next().await.unwrap();
        assert_eq!(record.seq, 2);
        assert_eq!(record.payload, "y");
    }

    #[tokio::test]
    async fn test_closed_session_ends_consumer() {
        let (_broker, session) = setup().await;
        let mut consumer = session.ordered_consumer("survey", None).await.unwrap();

        session.close().await;

        assert!(matches!(consumer.next().await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_unknown_stream() {
        let (_broker, session) = setup().await;
        let result = session.ordered_consumer("missing", None).await;
        assert!(matches!(result, Err(Error::StreamNotFound(_))));
    }
}
