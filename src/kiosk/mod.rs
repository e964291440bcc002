//! Conference kiosk peers
//!
//! Every attendee runs a peer on the shared bus. A peer registers one
//! service under `<namespace>.*` and coordinates with the others through it:
//!
//! ```text
//!   [Peer A: Sharing] ──volunteers queue──► [Peer B]   handoff
//!           │                                   │
//!           └───── <ns>.handoff broadcast ──────┘
//!
//!   [Peer] ── <ns>.quickdraw ──► every peer ── quickdraw_reply.<token> ──► first answer wins
//!   [Peer] ── survey.submitted ──► survey stream ──► ordered consumers ──► tally
//!   [Peer] ── metrics.<server>.<client> heartbeat
//! ```
//!
//! A peer is an actor: [`Peer::start`] returns a [`PeerHandle`] for commands
//! and a channel of [`PeerEvent`]s for display.

pub mod config;
pub mod detect;
pub mod device;
pub mod handoff;
pub mod heartbeat;
pub mod peer;
pub mod prefs;
pub mod quickdraw;
pub mod survey;

pub use config::{DetectConfig, PeerConfig, DEFAULT_NAMESPACE};
pub use detect::{
    Detection, DetectionFrame, DetectionStream, DetectError, Detector, DetectorOutput,
    FrameSource, Observation,
};
pub use device::DeviceProfile;
pub use handoff::{
    DeviceVolunteerPolicy, HandoffState, HandoffToken, NeverVolunteer, PeerIdentity,
    VolunteerPolicy,
};
pub use heartbeat::MetricsRecord;
pub use peer::{Peer, PeerCollaborators, PeerEvent, PeerHandle, PeerSnapshot};
pub use prefs::{FilePreferences, MemoryPreferences, Preferences};
pub use quickdraw::{QuickdrawBoard, QuickdrawChallenge};
pub use survey::{Familiarity, Industry, SurveyRecord, SurveyTally, UseCase};
