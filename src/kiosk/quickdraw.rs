//! Quickdraw race
//!
//! The initiator sends one challenge to `<ns>.quickdraw` with a dedicated
//! reply subject `quickdraw_reply.<token>`. Every peer's quickdraw endpoint
//! is private, so all of them receive it and hold the reply subject. The
//! first peer to answer publishes its name there and wins. Every peer also
//! watches `quickdraw_reply.>`, so any answer closes the challenge
//! everywhere.

use std::time::{Duration, Instant};

use super::config::QUICKDRAW_REPLY_PREFIX;
use crate::bus::subject;
use crate::error::Result;
use crate::session::request::reply_token;
use crate::session::{RequestOptions, Session};

/// Pattern matching every quickdraw reply
pub fn reply_pattern() -> String {
    subject::join(QUICKDRAW_REPLY_PREFIX, subject::WILDCARD_TAIL)
}

/// A challenge waiting for a local answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickdrawChallenge {
    pub reply_subject: String,
    pub received_at: Instant,
}

/// Local quickdraw state: at most one pending challenge
#[derive(Debug, Default)]
pub struct QuickdrawBoard {
    pending: Option<QuickdrawChallenge>,
}

impl QuickdrawBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<&QuickdrawChallenge> {
        self.pending.as_ref()
    }

    /// Hold a new challenge, replacing any older one
    pub fn challenge(&mut self, reply_subject: impl Into<String>) -> &QuickdrawChallenge {
        self.pending.insert(QuickdrawChallenge {
            reply_subject: reply_subject.into(),
            received_at: Instant::now(),
        })
    }

    /// Take the pending reply subject to answer it
    pub fn take(&mut self) -> Option<QuickdrawChallenge> {
        self.pending.take()
    }

    /// Someone answered; returns whether a challenge was pending
    pub fn concluded(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Close the challenge without answering
    pub fn dismiss(&mut self) -> bool {
        self.pending.take().is_some()
    }
}

/// Start a race and wait for the winner's name
pub async fn run_quickdraw(session: &Session, subject: &str, timeout: Duration) -> Result<String> {
    let reply = subject::join(QUICKDRAW_REPLY_PREFIX, &reply_token());
    let options = RequestOptions::with_timeout(timeout).reply(reply.clone());

    tracing::info!(subject = subject, reply = %reply, "Quickdraw started");
    let message = session.request_with(subject, bytes::Bytes::new(), options).await?;
    let winner = message.text();
    tracing::info!(winner = %winner, "Quickdraw won");
    Ok(winner)
}

/// Answer a challenge with this peer's name
pub async fn answer(session: &Session, challenge: &QuickdrawChallenge, nickname: &str) -> Result<()> {
    session
        .publish(&challenge.reply_subject, nickname.to_string())
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bus::Broker;
    use crate::session::SessionConfig;

    #[test]
    fn test_board_holds_one_challenge() {
        let mut board = QuickdrawBoard::new();
        assert!(!board.dismiss());

        board.challenge("quickdraw_reply.a");
        board.challenge("quickdraw_reply.b");
        assert_eq!(board.pending().unwrap().reply_subject, "quickdraw_reply.b");

        assert!(board.concluded());
        assert!(board.pending().is_none());
        assert!(board.take().is_none());
    }

    #[tokio::test]
    async fn test_first_answer_wins() {
        let broker = Arc::new(Broker::new());
        let host = Session::connect(broker.clone(), "host", SessionConfig::default())
            .await
            .unwrap();
        let player = Session::connect(broker, "player", SessionConfig::default())
            .await
            .unwrap();
        let mut challenges = player.subscribe("kubecon.quickdraw").await.unwrap();

        tokio::spawn(async move {
            let message = challenges.next().await.unwrap();
            let mut board = QuickdrawBoard::new();
            board.challenge(message.reply.unwrap());
            let challenge = board.take().unwrap();
            assert!(challenge.reply_subject.starts_with("quickdraw_reply."));
            answer(&player, &challenge, "Bea").await.unwrap();
        });

        let winner = run_quickdraw(&host, "kubecon.quickdraw", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(winner, "Bea");
    }
}
