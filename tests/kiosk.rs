//! Multi-peer kiosk scenarios on one broker

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use peerbus::kiosk::detect::{self, Point};
use peerbus::kiosk::{
    DetectConfig, DetectError, Detection, DetectionStream, Detector, DetectorOutput, Familiarity,
    HandoffState, Industry, NeverVolunteer, Peer, PeerCollaborators, PeerConfig, PeerEvent,
    PeerHandle, SurveyRecord, UseCase,
};
use peerbus::{Broker, Error, RequestOptions, ServiceRegistry, Session, SessionConfig};
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

type Events = mpsc::Receiver<PeerEvent>;

async fn connect(broker: &Arc<Broker>, name: &str) -> Session {
    let config = SessionConfig::default().request_timeout(Duration::from_millis(300));
    Session::connect(broker.clone(), name, config).await.unwrap()
}

fn config(nickname: &str) -> PeerConfig {
    PeerConfig::new(nickname)
        .disable_heartbeat()
        .disable_survey()
        .handoff_timeout(Duration::from_millis(300))
        .quickdraw_timeout(Duration::from_secs(2))
}

async fn admin(broker: &Arc<Broker>) -> (PeerHandle, Events) {
    Peer::start(
        connect(broker, "host").await,
        config("Host").admin(true),
        PeerCollaborators::default(),
    )
    .await
    .unwrap()
}

async fn attendee(broker: &Arc<Broker>, nickname: &str, volunteers: bool) -> (PeerHandle, Events) {
    let collaborators = PeerCollaborators::default().volunteer_policy(Arc::new(move || volunteers));
    Peer::start(connect(broker, nickname).await, config(nickname), collaborators)
        .await
        .unwrap()
}

async fn wait_for(events: &mut Events, mut wanted: impl FnMut(&PeerEvent) -> bool) -> PeerEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.expect("peer stopped");
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not seen")
}

#[tokio::test]
async fn handoff_moves_camera_to_volunteer() {
    let broker = Arc::new(Broker::new());
    let (host, _host_events) = admin(&broker).await;
    let (bea, mut bea_events) = attendee(&broker, "Bea", true).await;

    let volunteer = assert_ok!(host.stop_sharing().await);
    assert_eq!(volunteer, *bea.identity());

    let event = wait_for(&mut bea_events, |e| matches!(e, PeerEvent::SharingChanged(_))).await;
    assert_eq!(event, PeerEvent::SharingChanged(HandoffState::Sharing));

    let host_view = host.snapshot().await.unwrap();
    assert_eq!(host_view.state, HandoffState::NotSharing);
    assert_eq!(host_view.broadcaster.as_ref(), Some(bea.identity()));

    let bea_view = bea.snapshot().await.unwrap();
    assert_eq!(bea_view.state, HandoffState::Sharing);
    assert!(!bea_view.volunteering);
}

#[tokio::test]
async fn handoff_without_volunteers_keeps_sharing() {
    let broker = Arc::new(Broker::new());
    let (host, _host_events) = admin(&broker).await;

    let result = host.stop_sharing().await;
    assert!(matches!(result, Err(Error::NoResponders(_))));
    assert_eq!(host.snapshot().await.unwrap().state, HandoffState::Sharing);
}

#[tokio::test]
async fn declining_volunteer_times_out() {
    let broker = Arc::new(Broker::new());
    let (host, _host_events) = admin(&broker).await;
    let (shy, _shy_events) = attendee(&broker, "Shy", false).await;

    let result = host.stop_sharing().await;
    assert!(matches!(result, Err(Error::Timeout { .. })));
    assert_eq!(host.snapshot().await.unwrap().state, HandoffState::Sharing);
    assert_eq!(shy.snapshot().await.unwrap().state, HandoffState::NotSharing);
}

#[tokio::test]
async fn ineligible_peers_never_join_volunteers() {
    let broker = Arc::new(Broker::new());
    let (host, _host_events) = admin(&broker).await;
    let (phone, _phone_events) = Peer::start(
        connect(&broker, "phone").await,
        config("Phone"),
        PeerCollaborators::default().volunteer_policy(Arc::new(NeverVolunteer)),
    )
    .await
    .unwrap();

    assert!(!phone.snapshot().await.unwrap().volunteering);
    assert_err!(host.stop_sharing().await);
}

#[tokio::test]
async fn stop_sharing_rejected_unless_sharing() {
    let broker = Arc::new(Broker::new());
    let (host, _host_events) = admin(&broker).await;
    let (bea, _bea_events) = attendee(&broker, "Bea", true).await;
    let (cal, _cal_events) = attendee(&broker, "Cal", true).await;

    let result = cal.stop_sharing().await;
    assert!(matches!(result, Err(Error::Rejected(_))));

    assert_eq!(host.snapshot().await.unwrap().state, HandoffState::Sharing);
    assert_eq!(bea.snapshot().await.unwrap().state, HandoffState::NotSharing);
    let cal_view = cal.snapshot().await.unwrap();
    assert_eq!(cal_view.state, HandoffState::NotSharing);
    assert!(cal_view.volunteering);
}

#[tokio::test]
async fn start_sharing_requires_admin() {
    let broker = Arc::new(Broker::new());
    let (host, _host_events) = admin(&broker).await;
    let (cal, _cal_events) = attendee(&broker, "Cal", true).await;

    let result = cal.start_sharing().await;
    assert!(matches!(result, Err(Error::Rejected(_))));

    assert_eq!(cal.snapshot().await.unwrap().state, HandoffState::NotSharing);
    let host_view = host.snapshot().await.unwrap();
    assert_eq!(host_view.state, HandoffState::Sharing);
    assert_eq!(host_view.broadcaster.as_ref(), Some(host.identity()));
}

#[tokio::test]
async fn second_handoff_rejected_while_first_in_flight() {
    let broker = Arc::new(Broker::new());
    let (host, _host_events) = admin(&broker).await;
    let (_shy, _shy_events) = attendee(&broker, "Shy", false).await;

    let (first, second) = tokio::join!(host.stop_sharing(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        host.stop_sharing().await
    });

    assert!(matches!(first, Err(Error::Timeout { .. })));
    assert!(matches!(second, Err(Error::Rejected(ref reason)) if reason.contains("in progress")));
    assert_eq!(host.snapshot().await.unwrap().state, HandoffState::Sharing);
}

#[tokio::test]
async fn start_sharing_takes_camera_back() {
    let broker = Arc::new(Broker::new());
    let (host, _host_events) = admin(&broker).await;
    let (bea, mut bea_events) = attendee(&broker, "Bea", true).await;

    host.stop_sharing().await.unwrap();
    wait_for(&mut bea_events, |e| *e == PeerEvent::SharingChanged(HandoffState::Sharing)).await;

    host.start_sharing().await.unwrap();
    wait_for(&mut bea_events, |e| *e == PeerEvent::SharingChanged(HandoffState::NotSharing)).await;

    assert_eq!(host.snapshot().await.unwrap().state, HandoffState::Sharing);
    let bea_view = bea.snapshot().await.unwrap();
    assert_eq!(bea_view.broadcaster.as_ref(), Some(host.identity()));
    assert!(bea_view.volunteering);
}

#[tokio::test]
async fn quickdraw_first_answer_wins_everywhere() {
    let broker = Arc::new(Broker::new());
    let (host, _host_events) = admin(&broker).await;
    let (bea, mut bea_events) = attendee(&broker, "Bea", true).await;
    let (cal, mut cal_events) = attendee(&broker, "Cal", true).await;

    let race = {
        let host = host.clone();
        tokio::spawn(async move { host.quickdraw().await })
    };

    wait_for(&mut bea_events, |e| matches!(e, PeerEvent::Challenge { .. })).await;
    wait_for(&mut cal_events, |e| matches!(e, PeerEvent::Challenge { .. })).await;

    assert!(bea.answer_quickdraw().await.unwrap());
    assert_eq!(race.await.unwrap().unwrap(), "Bea");

    let winner = wait_for(&mut cal_events, |e| matches!(e, PeerEvent::Winner(_))).await;
    assert_eq!(winner, PeerEvent::Winner("Bea".to_string()));
    wait_for(&mut cal_events, |e| *e == PeerEvent::ChallengeCleared).await;

    assert!(!cal.snapshot().await.unwrap().challenge_pending);
    assert!(!cal.answer_quickdraw().await.unwrap());
}

#[tokio::test]
async fn survey_submission_reaches_every_tally() {
    let broker = Arc::new(Broker::new());
    let survey_config = |name: &str| {
        PeerConfig::new(name)
            .disable_heartbeat()
            .handoff_timeout(Duration::from_millis(300))
    };
    let (ada, _ada_events) = Peer::start(
        connect(&broker, "ada").await,
        survey_config("Ada"),
        PeerCollaborators::default(),
    )
    .await
    .unwrap();
    let (_bea, mut bea_events) = Peer::start(
        connect(&broker, "bea").await,
        survey_config("Bea"),
        PeerCollaborators::default(),
    )
    .await
    .unwrap();

    let seq = ada
        .submit_survey(SurveyRecord {
            familiarity: Familiarity::HeardOf,
            use_case: UseCase::IoT,
            industry: Industry::Finance,
        })
        .await
        .unwrap();
    assert_eq!(seq, 1);

    let event = wait_for(&mut bea_events, |e| matches!(e, PeerEvent::Tally(t) if t.total() == 1)).await;
    let PeerEvent::Tally(tally) = event else {
        unreachable!()
    };
    assert_eq!(tally.familiarity(Familiarity::HeardOf), 1);
    assert_eq!(tally.familiarity(Familiarity::Newbie), 0);
    assert_eq!(tally.use_case(UseCase::IoT), 1);
    assert_eq!(tally.industry(Industry::Finance), 1);
}

#[tokio::test]
async fn device_info_ignores_non_matching_filter() {
    let broker = Arc::new(Broker::new());
    let (_bea, _events) = attendee(&broker, "Bea", true).await;
    let client = connect(&broker, "ops").await;

    let info: serde_json::Value = client
        .request_json(
            "kubecon.device_info",
            &serde_json::json!({"device": {"type": "desktop"}}),
            RequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(info["name"], "Bea");

    let result = client
        .request_with(
            "kubecon.device_info",
            r#"{"device":{"type":"smartphone"}}"#,
            RequestOptions::default(),
        )
        .await;
    assert!(matches!(result, Err(Error::Timeout { .. })));

    let result = client
        .request_with("kubecon.device_info", "{not json", RequestOptions::default())
        .await;
    assert!(matches!(result, Err(Error::Service { ref code, .. }) if code == "400"));
}

struct Duplicates;

impl Detector for Duplicates {
    fn detect(&self, image: &[u8]) -> Result<DetectorOutput, DetectError> {
        if image == b"broken" {
            return Err(DetectError::InvalidImage("not a jpeg".into()));
        }
        let found = |names: &[&str], p: f64| Detection {
            class_ids: vec![1; names.len()],
            class_names: names.iter().map(|n| n.to_string()).collect(),
            probabilities: vec![p; names.len()],
            start_point: Point::default(),
            end_point: Point { x: 1.0, y: 1.0 },
        };
        Ok(DetectorOutput {
            detections: vec![
                found(&["person"], 0.6),
                found(&[], 0.99),
                found(&["person"], 0.9),
                found(&["cup"], 0.7),
            ],
            network_time: Duration::from_millis(1),
        })
    }
}

#[tokio::test]
async fn detection_stream_shows_ranked_unique_detections() {
    let broker = Arc::new(Broker::new());
    let registry = ServiceRegistry::new(connect(&broker, "inference").await);
    let config = DetectConfig::default().interval(Duration::from_millis(5));
    let (_service, _server) = detect::serve_inference(&registry, &config, Arc::new(Duplicates))
        .await
        .unwrap();

    let stream = DetectionStream::start(
        connect(&broker, "camera").await,
        || Some(Bytes::from_static(b"frame")),
        config.clone(),
    );
    let mut displayed = stream.displayed();
    displayed.changed().await.unwrap();

    let frame = displayed.borrow().clone().unwrap();
    let labels: Vec<_> = frame.detections.iter().map(|d| d.label_key()).collect();
    assert_eq!(labels, vec!["person", "cup"]);
    assert_eq!(frame.detections[0].probabilities, vec![0.9]);
    assert_eq!(frame.model_name, "yolov4-tiny");
    assert!(!frame.frame_id.is_empty());

    assert!(stream.stop().await.unwrap() >= 1);
    assert!(displayed.borrow().is_none());
}

#[tokio::test]
async fn detection_stream_stops_on_service_error() {
    let broker = Arc::new(Broker::new());
    let registry = ServiceRegistry::new(connect(&broker, "inference").await);
    let config = DetectConfig::default().interval(Duration::from_millis(5));
    let (_service, _server) = detect::serve_inference(&registry, &config, Arc::new(Duplicates))
        .await
        .unwrap();

    let stream = DetectionStream::start(
        connect(&broker, "camera").await,
        || Some(Bytes::from_static(b"broken")),
        config,
    );
    let displayed = stream.displayed();

    let result = stream.finished().await;
    assert!(matches!(result, Err(Error::Service { ref code, .. }) if code == "400"));
    assert!(displayed.borrow().is_none());
}
