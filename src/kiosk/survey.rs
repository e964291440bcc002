//! Survey records and live tallies
//!
//! Submissions are appended to the `survey` stream. Every peer replays the
//! stream from the start with an ordered consumer and folds the records into
//! a tally. The tally is a pure function of the record sequence, so a reader
//! that restarts from scratch converges on the same counts.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::config::{SURVEY_STREAM, SURVEY_SUBJECT};
use crate::error::{Error, Result};
use crate::session::{ConnectionStatus, Session};
use crate::stream::StreamConfig;

macro_rules! survey_options {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $label)] $variant),+
        }

        impl $name {
            /// Every option, in display order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            fn index(self) -> usize {
                self as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

survey_options! {
    /// How familiar the attendee is with the messaging system
    Familiarity {
        Newbie => "I'm a complete newbie",
        HeardOf => "I've heard of it",
        Evaluated => "I've used it before",
        InProduction => "I'm using NATS in production",
    }
}

survey_options! {
    /// Use case the attendee wants to learn about
    UseCase {
        EventStreaming => "Event streaming in NATS",
        Microservices => "NATS for microservice architectures",
        IoT => "NATS for IoT, Edge and Fleet management",
        AI => "NATS for AI and Machine Learning",
    }
}

survey_options! {
    /// Attendee's industry
    Industry {
        Technology => "Technology",
        Finance => "Finance",
        Retail => "Retail",
        Healthcare => "Healthcare",
        Government => "Government",
        Entertainment => "Entertainment",
        Industrial => "Industrial",
        IoT => "IoT",
        Other => "Other",
    }
}

/// One survey submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyRecord {
    pub familiarity: Familiarity,
    pub use_case: UseCase,
    pub industry: Industry,
}

/// Counts for one question, one entry per option in display order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionTally {
    pub id: String,
    pub label: String,
    pub options: Vec<(String, u64)>,
}

/// Per-question option counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyTally {
    familiarity: [u64; 4],
    use_case: [u64; 4],
    industry: [u64; 9],
    total: u64,
}

impl SurveyTally {
    /// Fold a record sequence into a tally
    pub fn fold<'a>(records: impl IntoIterator<Item = &'a SurveyRecord>) -> Self {
        records.into_iter().fold(Self::default(), |mut tally, record| {
            tally.record(record);
            tally
        })
    }

    pub fn record(&mut self, record: &SurveyRecord) {
        self.familiarity[record.familiarity.index()] += 1;
        self.use_case[record.use_case.index()] += 1;
        self.industry[record.industry.index()] += 1;
        self.total += 1;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn familiarity(&self, option: Familiarity) -> u64 {
        self.familiarity[option.index()]
    }

    pub fn use_case(&self, option: UseCase) -> u64 {
        self.use_case[option.index()]
    }

    pub fn industry(&self, option: Industry) -> u64 {
        self.industry[option.index()]
    }

    /// Counts grouped by question, labelled for display
    pub fn questions(&self) -> Vec<QuestionTally> {
        vec![
            QuestionTally {
                id: "familiarity".into(),
                label: "How familiar are you with the NATS messaging system?".into(),
                options: Familiarity::ALL
                    .iter()
                    .map(|o| (o.label().to_string(), self.familiarity(*o)))
                    .collect(),
            },
            QuestionTally {
                id: "use_case".into(),
                label: "What use cases are you interested in learning more about?".into(),
                options: UseCase::ALL
                    .iter()
                    .map(|o| (o.label().to_string(), self.use_case(*o)))
                    .collect(),
            },
            QuestionTally {
                id: "industry".into(),
                label: "What industry do you work in?".into(),
                options: Industry::ALL
                    .iter()
                    .map(|o| (o.label().to_string(), self.industry(*o)))
                    .collect(),
            },
        ]
    }
}

/// Records seen so far and their running tally
#[derive(Debug, Clone, Default)]
pub struct SurveyAggregator {
    records: Vec<SurveyRecord>,
    tally: SurveyTally,
}

impl SurveyAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: SurveyRecord) {
        self.tally.record(&record);
        self.records.push(record);
    }

    pub fn reset(&mut self) {
        self.records.clear();
        self.tally = SurveyTally::default();
    }

    pub fn records(&self) -> &[SurveyRecord] {
        &self.records
    }

    pub fn tally(&self) -> &SurveyTally {
        &self.tally
    }
}

/// Stream definition for survey submissions
pub fn stream_config() -> StreamConfig {
    StreamConfig::new(SURVEY_STREAM, &[SURVEY_SUBJECT])
}

/// Append a submission to the survey stream
pub async fn submit(session: &Session, record: &SurveyRecord) -> Result<u64> {
    let payload = serde_json::to_vec(record)?;
    let ack = session.stream_publish(SURVEY_SUBJECT, payload).await?;
    tracing::debug!(seq = ack.seq, "Survey submitted");
    Ok(ack.seq)
}

/// Follow the survey stream and publish the tally after every record
///
/// Read errors replay the stream from the first record into an empty tally
/// after `restart_delay`. Returns once the session is closed or has given up
/// reconnecting.
pub async fn read_survey(session: Session, tally: watch::Sender<SurveyTally>, restart_delay: Duration) -> Result<()> {
    let mut consumer = loop {
        match session.ordered_consumer(SURVEY_STREAM, Some(SURVEY_SUBJECT)).await {
            Ok(consumer) => break consumer,
            Err(e) if is_terminal(&session, &e) => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Survey reader could not start");
                tokio::time::sleep(restart_delay).await;
            }
        }
    };
    let mut aggregator = SurveyAggregator::new();

    loop {
        aggregator.reset();
        tally.send_replace(SurveyTally::default());

        loop {
            match consumer.next().await {
                Ok(record) => match record.json::<SurveyRecord>() {
                    Ok(submission) => {
                        aggregator.push(submission);
                        tally.send_replace(aggregator.tally().clone());
                    }
                    Err(e) => {
                        tracing::warn!(seq = record.seq, error = %e, "Skipping undecodable survey record");
                    }
                },
                Err(e) if is_terminal(&session, &e) => return Err(e),
                Err(e) => {
                    tracing::warn!(delivered = consumer.delivered(), error = %e, "Survey reader failed, replaying");
                    break;
                }
            }
        }

        tokio::time::sleep(restart_delay).await;
        consumer.restart();
    }
}

/// Closed, or disconnected with reconnection abandoned
fn is_terminal(session: &Session, error: &Error) -> bool {
    match error {
        Error::Closed => true,
        Error::Disconnected => session.status() == ConnectionStatus::Disconnected,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bus::Broker;
    use crate::session::SessionConfig;

    fn sample() -> SurveyRecord {
        SurveyRecord {
            familiarity: Familiarity::HeardOf,
            use_case: UseCase::IoT,
            industry: Industry::Finance,
        }
    }

    #[test]
    fn test_record_wire_format() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["familiarity"], "I've heard of it");
        assert_eq!(json["use_case"], "NATS for IoT, Edge and Fleet management");
        assert_eq!(json["industry"], "Finance");

        let back: SurveyRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_unknown_option_rejected() {
        let result: std::result::Result<SurveyRecord, _> = serde_json::from_str(
            r#"{"familiarity":"Expert","use_case":"Event streaming in NATS","industry":"Retail"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_single_record_tally() {
        let tally = SurveyTally::fold(&[sample()]);

        assert_eq!(tally.familiarity(Familiarity::HeardOf), 1);
        for option in Familiarity::ALL.iter().filter(|o| **o != Familiarity::HeardOf) {
            assert_eq!(tally.familiarity(*option), 0);
        }
        assert_eq!(tally.use_case(UseCase::IoT), 1);
        assert_eq!(tally.industry(Industry::Finance), 1);
        assert_eq!(tally.total(), 1);
    }

    #[test]
    fn test_fold_is_deterministic() {
        let records = vec![
            sample(),
            SurveyRecord {
                familiarity: Familiarity::InProduction,
                use_case: UseCase::AI,
                industry: Industry::Other,
            },
            sample(),
        ];

        let first = SurveyTally::fold(&records);
        let second = SurveyTally::fold(&records);
        assert_eq!(first, second);
        assert_eq!(first.familiarity(Familiarity::HeardOf), 2);

        let mut aggregator = SurveyAggregator::new();
        for record in &records {
            aggregator.push(*record);
        }
        assert_eq!(aggregator.tally(), &first);
        assert_eq!(aggregator.records().len(), 3);
    }

    #[test]
    fn test_questions_follow_option_order() {
        let questions = SurveyTally::fold(&[sample()]).questions();
        assert_eq!(questions.len(), 3);
        assert_eq!(questions[2].options.len(), Industry::ALL.len());
        assert_eq!(questions[2].options[1], ("Finance".to_string(), 1));
    }

    #[tokio::test]
    async fn test_reader_replays_and_skips_garbage() {
        let broker = Arc::new(Broker::new());
        let session = Session::connect(broker, "reader", SessionConfig::default())
            .await
            .unwrap();
        session.add_stream(stream_config()).await.unwrap();

        submit(&session, &sample()).await.unwrap();
        session.stream_publish(SURVEY_SUBJECT, "garbage").await.unwrap();
        submit(&session, &sample()).await.unwrap();

        let (tx, mut rx) = watch::channel(SurveyTally::default());
        let reader = tokio::spawn(read_survey(session.clone(), tx, Duration::from_millis(10)));

        while rx.borrow_and_update().total() < 2 {
            rx.changed().await.unwrap();
        }
        assert_eq!(rx.borrow().familiarity(Familiarity::HeardOf), 2);

        session.close().await;
        assert!(matches!(reader.await.unwrap(), Err(Error::Closed)));
    }

    async fn wait_total(rx: &mut watch::Receiver<SurveyTally>, total: u64) -> SurveyTally {
        while rx.borrow_and_update().total() < total {
            rx.changed().await.unwrap();
        }
        rx.borrow().clone()
    }

    fn mixed() -> Vec<SurveyRecord> {
        vec![
            sample(),
            SurveyRecord {
                familiarity: Familiarity::Newbie,
                use_case: UseCase::Microservices,
                industry: Industry::Retail,
            },
            sample(),
        ]
    }

    #[tokio::test]
    async fn test_fresh_reader_reaches_same_tally() {
        let broker = Arc::new(Broker::new());
        let session = Session::connect(broker, "reader", SessionConfig::default())
            .await
            .unwrap();
        session.add_stream(stream_config()).await.unwrap();
        let records = mixed();
        for record in &records {
            submit(&session, record).await.unwrap();
        }

        let (tx, mut rx) = watch::channel(SurveyTally::default());
        let first = tokio::spawn(read_survey(session.clone(), tx, Duration::from_millis(10)));
        let before = wait_total(&mut rx, 3).await;
        first.abort();

        let (tx, mut rx) = watch::channel(SurveyTally::default());
        let second = tokio::spawn(read_survey(session.clone(), tx, Duration::from_millis(10)));
        let after = wait_total(&mut rx, 3).await;

        assert_eq!(before, after);
        assert_eq!(after, SurveyTally::fold(&records));
        second.abort();
    }

    #[tokio::test]
    async fn test_tally_unchanged_across_reconnect() {
        let broker = Arc::new(Broker::new());
        let config = SessionConfig::default().reconnect_delay(Duration::from_millis(10));
        let session = Session::connect(broker.clone(), "reader", config).await.unwrap();
        session.add_stream(stream_config()).await.unwrap();
        let mut records = mixed();
        for record in &records {
            submit(&session, record).await.unwrap();
        }

        let (tx, mut rx) = watch::channel(SurveyTally::default());
        let reader = tokio::spawn(read_survey(session.clone(), tx, Duration::from_millis(10)));
        let before = wait_total(&mut rx, 3).await;

        let mut status = session.watch_status();
        broker.drop_client(session.client_id().unwrap());
        loop {
            status.changed().await.unwrap();
            if *status.borrow() == ConnectionStatus::Connected {
                break;
            }
        }
        assert_eq!(*rx.borrow(), before);

        let late = SurveyRecord {
            familiarity: Familiarity::InProduction,
            use_case: UseCase::AI,
            industry: Industry::Other,
        };
        submit(&session, &late).await.unwrap();
        records.push(late);

        let after = wait_total(&mut rx, 4).await;
        assert_eq!(after, SurveyTally::fold(&records));
        assert_eq!(after.familiarity(Familiarity::HeardOf), 2);

        session.close().await;
        assert!(matches!(reader.await.unwrap(), Err(Error::Closed)));
    }
}
