//! Subscriptions
//!
//! A subscription owns the receiving end of the channel the broker delivers
//! into. The session keeps the sending end, which is what lets it re-install
//! the subscription after a reconnect without the caller noticing.

use std::sync::Weak;

use tokio::sync::mpsc;

use super::client::Inner;
use crate::bus::Message;

/// A live subscription on a subject pattern
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    sid: u64,
    subject: String,
    queue: Option<String>,
    rx: mpsc::Receiver<Message>,
    session: Weak<Inner>,
}

impl Subscription {
    pub(super) fn new(
        sid: u64,
        subject: String,
        queue: Option<String>,
        rx: mpsc::Receiver<Message>,
        session: Weak<Inner>,
    ) -> Self {
        Self {
            sid,
            subject,
            queue,
            rx,
            session,
        }
    }

    /// Session-local subscription id
    pub fn sid(&self) -> u64 {
        self.sid
    }

    /// Subject pattern
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Queue group, if any
    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    /// Wait for the next message
    ///
    /// Returns `None` once the subscription has been removed or the session
    /// closed.
    pub async fn next(&mut self) -> Option<Message> {
        let message = self.rx.recv().await?;
        if let Some(inner) = self.session.upgrade() {
            inner.stats.record_in(message.len());
        }
        Some(message)
    }

    /// Take a message if one is already buffered
    pub fn try_next(&mut self) -> Option<Message> {
        let message = self.rx.try_recv().ok()?;
        if let Some(inner) = self.session.upgrade() {
            inner.stats.record_in(message.len());
        }
        Some(message)
    }

    /// Remove the subscription
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.session.upgrade() {
            inner.remove_subscription(self.sid);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("sid", &self.sid)
            .field("subject", &self.subject)
            .field("queue", &self.queue)
            .finish()
    }
}
