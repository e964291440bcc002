//! Broadcaster handoff
//!
//! Exactly one peer at a time shares its camera. The state is purely local:
//! every peer listens for handoff tokens and is `Sharing` iff the last token
//! it saw names it.
//!
//! ```text
//!   sharing peer                     volunteers (queue "volunteers")
//!        │  <ns>.any_volunteers ──────────►  one member
//!        │  ◄────────────── PeerIdentity ──  (if its policy accepts)
//!        │
//!        └── <ns>.handoff {id, name} ──────►  every peer applies the token
//! ```
//!
//! A sharing peer leaves the volunteers group, so it can't be handed the
//! camera by its own request.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::device::DeviceProfile;
use crate::error::Result;
use crate::session::{RequestOptions, Session};

/// A peer's service id and display name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub id: String,
    pub name: String,
}

impl PeerIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Names the active broadcaster; same wire shape as `PeerIdentity`
pub type HandoffToken = PeerIdentity;

/// Local sharing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandoffState {
    NotSharing,
    Sharing,
}

impl HandoffState {
    pub fn is_sharing(self) -> bool {
        self == HandoffState::Sharing
    }
}

impl std::fmt::Display for HandoffState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandoffState::NotSharing => write!(f, "not sharing"),
            HandoffState::Sharing => write!(f, "sharing"),
        }
    }
}

/// Result of applying a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: HandoffState,
    pub current: HandoffState,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

/// Handoff state machine for one peer
#[derive(Debug, Clone)]
pub struct Handoff {
    identity: PeerIdentity,
    state: HandoffState,
    broadcaster: Option<PeerIdentity>,
}

impl Handoff {
    pub fn new(identity: PeerIdentity, initial: HandoffState) -> Self {
        let broadcaster = initial.is_sharing().then(|| identity.clone());
        Self {
            identity,
            state: initial,
            broadcaster,
        }
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    pub fn state(&self) -> HandoffState {
        self.state
    }

    pub fn is_sharing(&self) -> bool {
        self.state.is_sharing()
    }

    /// The peer named by the last token seen, if any
    pub fn broadcaster(&self) -> Option<&PeerIdentity> {
        self.broadcaster.as_ref()
    }

    /// Apply a token; applying the same token twice is a no-op
    pub fn apply(&mut self, token: &HandoffToken) -> Transition {
        let previous = self.state;
        self.state = if token.id == self.identity.id {
            HandoffState::Sharing
        } else {
            HandoffState::NotSharing
        };
        self.broadcaster = Some(token.clone());
        Transition {
            previous,
            current: self.state,
        }
    }

    /// Give up the camera locally after a successful handoff broadcast
    pub fn release(&mut self) -> Transition {
        let previous = self.state;
        self.state = HandoffState::NotSharing;
        Transition {
            previous,
            current: self.state,
        }
    }

    /// Token naming this peer
    pub fn claim(&self) -> HandoffToken {
        self.identity.clone()
    }
}

/// Decides whether this peer takes over the camera when asked
pub trait VolunteerPolicy: Send + Sync {
    /// Whether the peer joins the volunteers group at all
    fn eligible(&self) -> bool {
        true
    }

    /// Whether to accept one volunteer request
    fn accept(&self) -> bool;
}

impl<F> VolunteerPolicy for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn accept(&self) -> bool {
        self()
    }
}

/// Never volunteers
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverVolunteer;

impl VolunteerPolicy for NeverVolunteer {
    fn eligible(&self) -> bool {
        false
    }

    fn accept(&self) -> bool {
        false
    }
}

/// Volunteers only from desktop devices, and never as an administrator
#[derive(Debug, Clone)]
pub struct DeviceVolunteerPolicy {
    is_admin: bool,
    desktop: bool,
}

impl DeviceVolunteerPolicy {
    pub fn new(is_admin: bool, profile: &DeviceProfile) -> Self {
        Self {
            is_admin,
            desktop: profile.device_type() == Some("desktop"),
        }
    }
}

impl VolunteerPolicy for DeviceVolunteerPolicy {
    fn eligible(&self) -> bool {
        !self.is_admin && self.desktop
    }

    fn accept(&self) -> bool {
        self.eligible()
    }
}

/// Ask the volunteers group for a peer to take over
///
/// Fails with `NoResponders` when nobody is in the group and `Timeout` when
/// the chosen member declines.
pub async fn request_volunteer(session: &Session, subject: &str, timeout: Duration) -> Result<PeerIdentity> {
    let reply = session
        .request_with(subject, bytes::Bytes::new(), RequestOptions::with_timeout(timeout))
        .await?;
    reply.json()
}

/// Broadcast a token to every peer
pub async fn broadcast(session: &Session, subject: &str, token: &HandoffToken) -> Result<()> {
    session.publish_json(subject, token).await
}
