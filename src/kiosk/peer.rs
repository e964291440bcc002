//! Kiosk peer
//!
//! One `Peer` per connected client. It registers the kiosk service, owns all
//! local state (handoff, quickdraw, tallies, preferences) and is the only
//! writer of that state: endpoint requests, bus notifications and user
//! commands all arrive as messages to one task.
//!
//! ```text
//!  PeerHandle ──commands──►┐
//!  endpoints ──requests───►├──► Peer task ──events──► mpsc::Receiver<PeerEvent>
//!  quickdraw_reply.> ─────►│        │
//!  survey / heartbeat ────►┘        └──► publish / respond
//! ```
//!
//! Long round-trips (volunteer requests, quickdraw races) run in spawned
//! tasks and report back, so the peer keeps answering its endpoints while
//! they are in flight.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::config::PeerConfig;
use super::device::DeviceProfile;
use super::handoff::{self, DeviceVolunteerPolicy, Handoff, HandoffState, HandoffToken, PeerIdentity, VolunteerPolicy};
use super::heartbeat;
use super::prefs::{self, MemoryPreferences, Preferences};
use super::quickdraw::{self, QuickdrawBoard};
use super::survey::{self, SurveyRecord, SurveyTally};
use crate::bus::Message;
use crate::error::{Error, Result};
use crate::service::{Endpoint, EndpointConfig, Request, Service, ServiceConfig, ServiceRegistry};
use crate::session::{ConnectionStatus, Session, Subscription};

const SURVEY_RESTART_DELAY: Duration = Duration::from_millis(500);

/// Things a peer needs from its host
pub struct PeerCollaborators {
    /// Persistent settings: nickname, admin flag, survey flag, connect URL
    pub prefs: Arc<dyn Preferences>,
    /// Profile matched by `device_info` filters
    pub device: DeviceProfile,
    /// Defaults to volunteering from desktop devices when not an admin
    pub volunteer_policy: Option<Arc<dyn VolunteerPolicy>>,
}

impl Default for PeerCollaborators {
    fn default() -> Self {
        Self {
            prefs: Arc::new(MemoryPreferences::new()),
            device: DeviceProfile::host(),
            volunteer_policy: None,
        }
    }
}

impl PeerCollaborators {
    pub fn prefs(mut self, prefs: Arc<dyn Preferences>) -> Self {
        self.prefs = prefs;
        self
    }

    pub fn device(mut self, device: DeviceProfile) -> Self {
        self.device = device;
        self
    }

    pub fn volunteer_policy(mut self, policy: Arc<dyn VolunteerPolicy>) -> Self {
        self.volunteer_policy = Some(policy);
        self
    }
}

/// Notifications from a peer
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Human-readable activity line
    Log(String),
    /// This peer started or stopped broadcasting
    SharingChanged(HandoffState),
    /// A quickdraw challenge is waiting for an answer
    Challenge { reply_subject: String },
    /// The pending challenge was answered, dismissed or won elsewhere
    ChallengeCleared,
    /// Display name of a quickdraw winner, seen on any race
    Winner(String),
    /// Survey counts after a record was folded in
    Tally(SurveyTally),
    /// Connect URL advertised by an operator; `None` clears it
    Advertised(Option<String>),
    /// Latest heartbeat round-trip; `None` while the link is down
    Rtt(Option<Duration>),
    /// Connection status transition
    Status(ConnectionStatus),
}

/// Point-in-time view of a peer's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    /// Service id and display name
    pub identity: PeerIdentity,
    /// Whether this peer holds the camera
    pub state: HandoffState,
    /// Peer named by the last handoff token seen
    pub broadcaster: Option<PeerIdentity>,
    /// A quickdraw challenge is waiting for an answer
    pub challenge_pending: bool,
    /// Current survey counts
    pub tally: SurveyTally,
    /// Latest heartbeat round-trip
    pub rtt: Option<Duration>,
    /// Connect URL advertised by an operator
    pub connect_url: Option<String>,
    /// Bus connection status
    pub status: ConnectionStatus,
    /// Member of the volunteers queue group
    pub volunteering: bool,
}

enum PeerCommand {
    StopSharing(oneshot::Sender<Result<PeerIdentity>>),
    StartSharing(oneshot::Sender<Result<()>>),
    StartQuickdraw(oneshot::Sender<Result<String>>),
    AnswerQuickdraw(oneshot::Sender<Result<bool>>),
    DismissQuickdraw(oneshot::Sender<bool>),
    SubmitSurvey(SurveyRecord, oneshot::Sender<Result<u64>>),
    Snapshot(oneshot::Sender<PeerSnapshot>),
}

type HandoffOutcome = (Result<PeerIdentity>, oneshot::Sender<Result<PeerIdentity>>);

/// Handle for sending commands to a running peer
#[derive(Clone)]
pub struct PeerHandle {
    identity: PeerIdentity,
    commands: mpsc::Sender<PeerCommand>,
    shutdown: mpsc::Sender<oneshot::Sender<()>>,
}

impl PeerHandle {
    /// This peer's service id and display name
    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> PeerCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(command(tx)).await.map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Hand the camera to a volunteer
    ///
    /// Fails with `Rejected` unless this peer is sharing and has no handoff
    /// in flight, and with `Timeout` or `NoResponders` when nobody
    /// volunteers; the peer keeps sharing in every failure case.
    pub async fn stop_sharing(&self) -> Result<PeerIdentity> {
        self.call(PeerCommand::StopSharing).await?
    }

    /// Take the camera back by broadcasting a token naming this peer
    ///
    /// Only administrators may do this; other peers get `Rejected`.
    pub async fn start_sharing(&self) -> Result<()> {
        self.call(PeerCommand::StartSharing).await?
    }

    /// Challenge every peer and return the winner's name
    pub async fn quickdraw(&self) -> Result<String> {
        self.call(PeerCommand::StartQuickdraw).await?
    }

    /// Answer the pending challenge; `false` when there is none
    pub async fn answer_quickdraw(&self) -> Result<bool> {
        self.call(PeerCommand::AnswerQuickdraw).await?
    }

    /// Drop the pending challenge; `false` when there is none
    pub async fn dismiss_quickdraw(&self) -> Result<bool> {
        self.call(PeerCommand::DismissQuickdraw).await
    }

    /// Submit a survey, returning its stream sequence
    pub async fn submit_survey(&self, record: SurveyRecord) -> Result<u64> {
        self.call(|tx| PeerCommand::SubmitSurvey(record, tx)).await?
    }

    pub async fn snapshot(&self) -> Result<PeerSnapshot> {
        self.call(PeerCommand::Snapshot).await
    }

    /// Stop the service and every background loop
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.shutdown.send(tx).await.map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle")
            .field("identity", &self.identity)
            .finish()
    }
}

async fn next_request(endpoint: &mut Option<Endpoint>) -> Option<Request> {
    match endpoint {
        Some(endpoint) => endpoint.next().await,
        None => std::future::pending().await,
    }
}

/// The peer task's state
pub struct Peer {
    session: Session,
    config: PeerConfig,
    _registry: ServiceRegistry,
    service: Service,
    prefs: Arc<dyn Preferences>,
    device: DeviceProfile,
    policy: Arc<dyn VolunteerPolicy>,
    is_admin: bool,

    handoff: Handoff,
    handoff_in_flight: bool,
    board: QuickdrawBoard,
    tally: SurveyTally,
    rtt: Option<Duration>,

    device_info: Endpoint,
    advertise: Endpoint,
    nickname: Endpoint,
    quickdraw: Endpoint,
    handoff_endpoint: Endpoint,
    volunteers: Option<Endpoint>,
    quickdraw_replies: Subscription,

    commands: mpsc::Receiver<PeerCommand>,
    shutdown: mpsc::Receiver<oneshot::Sender<()>>,
    events: mpsc::Sender<PeerEvent>,
    outcomes_tx: mpsc::Sender<HandoffOutcome>,
    outcomes: mpsc::Receiver<HandoffOutcome>,
    tally_rx: watch::Receiver<SurveyTally>,
    tally_live: bool,
    rtt_rx: watch::Receiver<Option<Duration>>,
    rtt_live: bool,
    status_rx: watch::Receiver<ConnectionStatus>,
    background: Vec<JoinHandle<()>>,
}

impl Peer {
    /// Register the kiosk service and start the peer task
    pub async fn start(
        session: Session,
        config: PeerConfig,
        collaborators: PeerCollaborators,
    ) -> Result<(PeerHandle, mpsc::Receiver<PeerEvent>)> {
        let PeerCollaborators {
            prefs,
            device,
            volunteer_policy,
        } = collaborators;

        let is_admin = config.is_admin || prefs.flag(prefs::IS_ADMIN);
        let policy = volunteer_policy.unwrap_or_else(|| Arc::new(DeviceVolunteerPolicy::new(is_admin, &device)));

        let registry = ServiceRegistry::new(session.clone());
        let service = registry
            .register(
                ServiceConfig::new(&config.namespace, &config.service_version).description("Attendee Service"),
            )
            .await?;
        let stats_session = session.clone();
        service.set_stats_handler(move |_| {
            let server = stats_session.server_info().map(|info| info.server_name);
            serde_json::json!({ "server": server })
        });

        let identity = PeerIdentity::new(service.id(), &config.nickname);
        let private = service.id().to_string();

        let device_info = service
            .add_endpoint(
                "device_info",
                EndpointConfig::new(config.subject("device_info"))
                    .queue_group(&private)
                    .description("Returns device info with optional filtering."),
            )
            .await?;
        let advertise = service
            .add_endpoint(
                "advertise",
                EndpointConfig::new(config.subject("advertise"))
                    .queue_group(&private)
                    .description("Advertise a new server for clients to connect to."),
            )
            .await?;
        let nickname = service
            .add_endpoint(
                "nickname",
                EndpointConfig::new(config.subject("nickname")).description("Returns the name of the attendee."),
            )
            .await?;
        let quickdraw = service
            .add_endpoint(
                "quickdraw",
                EndpointConfig::new(config.subject("quickdraw"))
                    .queue_group(&private)
                    .description("Pops a dialog for attendees to reply to."),
            )
            .await?;
        let handoff_endpoint = service
            .add_endpoint(
                "handoff",
                EndpointConfig::new(config.subject("handoff"))
                    .queue_group(&private)
                    .description("Hands the camera to the named peer"),
            )
            .await?;
        let quickdraw_replies = session.subscribe(&quickdraw::reply_pattern()).await?;

        let mut background = Vec::new();

        let (tally_tx, tally_rx) = watch::channel(SurveyTally::default());
        if config.survey_enabled {
            session.add_stream(survey::stream_config()).await?;
            let reader_session = session.clone();
            background.push(tokio::spawn(async move {
                if let Err(e) = survey::read_survey(reader_session, tally_tx, SURVEY_RESTART_DELAY).await {
                    tracing::debug!(error = %e, "Survey reader ended");
                }
            }));
        }

        let (rtt_tx, rtt_rx) = watch::channel(None);
        if config.heartbeat_enabled {
            background.push(tokio::spawn(heartbeat::run_heartbeat(
                session.clone(),
                config.nickname.clone(),
                config.heartbeat_interval,
                rtt_tx,
            )));
        }

        let (commands_tx, commands) = mpsc::channel(config.channel_capacity);
        let (shutdown_tx, shutdown) = mpsc::channel(1);
        let (events, events_rx) = mpsc::channel(config.channel_capacity);
        let (outcomes_tx, outcomes) = mpsc::channel(4);
        let initial = if is_admin {
            HandoffState::Sharing
        } else {
            HandoffState::NotSharing
        };

        let mut peer = Peer {
            status_rx: session.watch_status(),
            session,
            _registry: registry,
            service,
            prefs,
            device,
            policy,
            is_admin,
            handoff: Handoff::new(identity.clone(), initial),
            handoff_in_flight: false,
            board: QuickdrawBoard::new(),
            tally: SurveyTally::default(),
            rtt: None,
            device_info,
            advertise,
            nickname,
            quickdraw,
            handoff_endpoint,
            volunteers: None,
            quickdraw_replies,
            commands,
            shutdown,
            events,
            outcomes_tx,
            outcomes,
            tally_live: config.survey_enabled,
            tally_rx,
            rtt_live: config.heartbeat_enabled,
            rtt_rx,
            background,
            config,
        };
        peer.sync_volunteering().await;

        let server = peer
            .session
            .server_info()
            .map(|info| info.server_name)
            .unwrap_or_default();
        peer.log(format!("Connected to {} as \"{}\"", server, peer.config.nickname));
        peer.log(format!(
            "Initialized \"{}\" service v{}",
            peer.service.name(),
            peer.service.version()
        ));

        tracing::info!(
            id = %identity.id,
            nickname = %identity.name,
            admin = is_admin,
            endpoints = ?peer.service.endpoint_names(),
            "Peer started"
        );

        tokio::spawn(peer.run());

        Ok((
            PeerHandle {
                identity,
                commands: commands_tx,
                shutdown: shutdown_tx,
            },
            events_rx,
        ))
    }

    async fn run(mut self) {
        let mut shutdown_ack = None;

        loop {
            // Bus traffic first, so a command observes every request that
            // arrived before it
            tokio::select! {
                biased;

                changed = self.status_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = *self.status_rx.borrow_and_update();
                    self.log(format!("Connection {}", status));
                    self.emit(PeerEvent::Status(status));
                }
                Some((result, reply)) = self.outcomes.recv() => {
                    self.on_handoff_outcome(result, reply).await;
                }
                request = self.device_info.next() => {
                    let Some(request) = request else { break };
                    self.on_device_info(request).await;
                }
                request = self.advertise.next() => {
                    let Some(request) = request else { break };
                    self.on_advertise(request);
                }
                request = self.nickname.next() => {
                    let Some(request) = request else { break };
                    self.on_nickname(request).await;
                }
                request = self.quickdraw.next() => {
                    let Some(request) = request else { break };
                    self.on_challenge(request);
                }
                request = self.handoff_endpoint.next() => {
                    let Some(request) = request else { break };
                    self.on_handoff(request).await;
                }
                request = next_request(&mut self.volunteers) => {
                    match request {
                        Some(request) => self.on_volunteer_request(request).await,
                        None => self.volunteers = None,
                    }
                }
                message = self.quickdraw_replies.next() => {
                    let Some(message) = message else { break };
                    self.on_quickdraw_reply(message);
                }
                changed = self.tally_rx.changed(), if self.tally_live => {
                    if changed.is_err() {
                        self.tally_live = false;
                        continue;
                    }
                    self.tally = self.tally_rx.borrow_and_update().clone();
                    self.emit(PeerEvent::Tally(self.tally.clone()));
                }
                changed = self.rtt_rx.changed(), if self.rtt_live => {
                    if changed.is_err() {
                        self.rtt_live = false;
                        continue;
                    }
                    self.rtt = *self.rtt_rx.borrow_and_update();
                    self.emit(PeerEvent::Rtt(self.rtt));
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                ack = self.shutdown.recv() => {
                    shutdown_ack = ack;
                    break;
                }
            }
        }

        self.stop();
        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }

    fn stop(&mut self) {
        self.volunteers = None;
        self.service.stop();
        for task in self.background.drain(..) {
            task.abort();
        }
        tracing::info!(id = %self.handoff.identity().id, "Peer stopped");
    }

    fn emit(&self, event: PeerEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.events.try_send(event) {
            tracing::debug!(event = ?event, "Peer event dropped, receiver is behind");
        }
    }

    fn log(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!(nickname = %self.config.nickname, "{}", line);
        self.emit(PeerEvent::Log(line));
    }

    async fn on_command(&mut self, command: PeerCommand) {
        match command {
            PeerCommand::StopSharing(reply) => self.begin_handoff(reply).await,
            PeerCommand::StartSharing(reply) => {
                let _ = reply.send(self.claim_camera().await);
            }
            PeerCommand::StartQuickdraw(reply) => {
                let session = self.session.clone();
                let subject = self.config.subject("quickdraw");
                let timeout = self.config.quickdraw_timeout;
                self.log("Starting quickdraw");
                tokio::spawn(async move {
                    let _ = reply.send(quickdraw::run_quickdraw(&session, &subject, timeout).await);
                });
            }
            PeerCommand::AnswerQuickdraw(reply) => {
                let result = match self.board.take() {
                    Some(challenge) => {
                        self.emit(PeerEvent::ChallengeCleared);
                        quickdraw::answer(&self.session, &challenge, &self.config.nickname)
                            .await
                            .map(|_| true)
                    }
                    None => Ok(false),
                };
                let _ = reply.send(result);
            }
            PeerCommand::DismissQuickdraw(reply) => {
                let dismissed = self.board.dismiss();
                if dismissed {
                    self.emit(PeerEvent::ChallengeCleared);
                }
                let _ = reply.send(dismissed);
            }
            PeerCommand::SubmitSurvey(record, reply) => {
                let _ = reply.send(self.submit_survey(&record).await);
            }
            PeerCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            identity: self.handoff.identity().clone(),
            state: self.handoff.state(),
            broadcaster: self.handoff.broadcaster().cloned(),
            challenge_pending: self.board.pending().is_some(),
            tally: self.tally.clone(),
            rtt: self.rtt,
            connect_url: self.prefs.get(prefs::CONNECT_URL),
            status: self.session.status(),
            volunteering: self.volunteers.is_some(),
        }
    }

    async fn submit_survey(&mut self, record: &SurveyRecord) -> Result<u64> {
        let seq = survey::submit(&self.session, record).await?;
        self.prefs.set_flag(prefs::SURVEY_SUBMITTED, true)?;
        self.prefs.set(prefs::NICKNAME, &self.config.nickname)?;
        Ok(seq)
    }

    async fn begin_handoff(&mut self, reply: oneshot::Sender<Result<PeerIdentity>>) {
        if !self.handoff.is_sharing() {
            let _ = reply.send(Err(Error::Rejected("not sharing".to_string())));
            return;
        }
        if self.handoff_in_flight {
            let _ = reply.send(Err(Error::Rejected("handoff already in progress".to_string())));
            return;
        }
        self.handoff_in_flight = true;
        self.sync_volunteering().await;

        let session = self.session.clone();
        let volunteers = self.config.subject("any_volunteers");
        let handoff = self.config.subject("handoff");
        let timeout = self.config.handoff_timeout;
        let outcomes = self.outcomes_tx.clone();

        self.log("Looking for a volunteer");
        tokio::spawn(async move {
            let result = async {
                let volunteer = handoff::request_volunteer(&session, &volunteers, timeout).await?;
                handoff::broadcast(&session, &handoff, &volunteer).await?;
                Ok(volunteer)
            }
            .await;
            let _ = outcomes.send((result, reply)).await;
        });
    }

    async fn on_handoff_outcome(&mut self, result: Result<PeerIdentity>, reply: oneshot::Sender<Result<PeerIdentity>>) {
        self.handoff_in_flight = false;
        match &result {
            Ok(volunteer) => {
                self.log(format!("{} volunteered to share", volunteer.name));
                let transition = self.handoff.release();
                if transition.changed() {
                    self.emit(PeerEvent::SharingChanged(transition.current));
                }
            }
            Err(e) => {
                self.log(format!("No volunteer: {}", e));
            }
        }
        self.sync_volunteering().await;
        let _ = reply.send(result);
    }

    async fn claim_camera(&mut self) -> Result<()> {
        if !self.is_admin {
            return Err(Error::Rejected("only administrators can take the camera".to_string()));
        }
        let token = self.handoff.claim();
        handoff::broadcast(&self.session, &self.config.subject("handoff"), &token).await?;
        self.apply_token(&token).await;
        Ok(())
    }

    async fn apply_token(&mut self, token: &HandoffToken) {
        let transition = self.handoff.apply(token);
        if transition.changed() {
            self.emit(PeerEvent::SharingChanged(transition.current));
        }
        self.sync_volunteering().await;
    }

    /// Join the volunteers group only while eligible, not sharing and not
    /// looking for a successor
    async fn sync_volunteering(&mut self) {
        let wanted = self.policy.eligible() && !self.handoff.is_sharing() && !self.handoff_in_flight;
        match (wanted, self.volunteers.is_some()) {
            (true, false) => {
                let config = EndpointConfig::new(self.config.subject("any_volunteers"))
                    .queue_group(super::config::VOLUNTEERS_QUEUE)
                    .description("Requests a handoff to another webcam");
                match self.service.add_endpoint("any_volunteers", config).await {
                    Ok(endpoint) => self.volunteers = Some(endpoint),
                    Err(e) => tracing::warn!(error = %e, "Could not join the volunteers group"),
                }
            }
            (false, true) => {
                self.volunteers = None;
                tracing::debug!(id = %self.handoff.identity().id, "Left the volunteers group");
            }
            _ => {}
        }
    }

    async fn on_device_info(&mut self, request: Request) {
        self.log(format!("Received request on {}", request.subject()));

        let matches = if request.data().is_empty() {
            true
        } else {
            match request.json::<serde_json::Value>() {
                Ok(filter) => self.device.matches(&filter),
                Err(e) => {
                    self.log(format!("\tRejecting request: {}", e));
                    if let Err(e) = request.respond_error("400", "invalid device filter").await {
                        tracing::debug!(error = %e, "device_info error reply not sent");
                    }
                    return;
                }
            }
        };

        if !matches {
            self.log("\tIgnoring request: Does not match device filter");
            return;
        }

        let payload = self.device.describe(&self.config.nickname);
        self.log(format!("\tSending response: {}", payload));
        if let Err(e) = request.respond_json(&payload).await {
            tracing::debug!(error = %e, "device_info reply not sent");
        }
    }

    fn on_advertise(&mut self, request: Request) {
        self.log(format!("Received request on {}", request.subject()));

        let url = String::from_utf8_lossy(request.data()).trim().to_string();
        let result = if url.is_empty() {
            self.prefs.remove(prefs::CONNECT_URL)
        } else {
            self.prefs.set(prefs::CONNECT_URL, &url)
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Could not store connect URL");
            return;
        }

        self.emit(PeerEvent::Advertised((!url.is_empty()).then_some(url)));
    }

    async fn on_nickname(&mut self, request: Request) {
        self.log(format!("Received request on {}", request.subject()));
        match request.respond(self.config.nickname.clone()).await {
            Ok(()) => self.log(format!("\tSending response: {}", self.config.nickname)),
            Err(e) => tracing::debug!(error = %e, "nickname reply not sent"),
        }
    }

    fn on_challenge(&mut self, request: Request) {
        self.log(format!("Received request on {}", request.subject()));
        let Some(reply) = request.reply() else {
            return;
        };
        let challenge = self.board.challenge(reply);
        let event = PeerEvent::Challenge {
            reply_subject: challenge.reply_subject.clone(),
        };
        self.emit(event);
    }

    async fn on_handoff(&mut self, request: Request) {
        let token = match request.json::<HandoffToken>() {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed handoff token");
                return;
            }
        };
        self.log(format!(
            "Handing off the camera to {}. It's your time to shine!",
            token.name
        ));
        self.apply_token(&token).await;
    }

    async fn on_volunteer_request(&mut self, request: Request) {
        if !self.policy.accept() {
            self.log("Declined to volunteer");
            return;
        }
        let identity = self.handoff.identity().clone();
        match request.respond_json(&identity).await {
            Ok(()) => self.log("Volunteered to share"),
            Err(e) => tracing::debug!(error = %e, "Volunteer reply not sent"),
        }
    }

    fn on_quickdraw_reply(&mut self, message: Message) {
        let winner = message.text();
        self.log(format!("{} is the winner!", winner));
        self.emit(PeerEvent::Winner(winner));
        if self.board.concluded() {
            self.emit(PeerEvent::ChallengeCleared);
        }
    }
}
