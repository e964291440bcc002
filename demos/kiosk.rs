//! Conference kiosk walkthrough on an in-process bus
//!
//! Run with: cargo run --example kiosk [PEERS]
//!
//! Starts one admin peer and PEERS attendees (default 3) on a single broker,
//! then walks through the kiosk features:
//!
//! - Camera handoff: the admin asks the volunteers group for a successor
//! - Quickdraw: one attendee answers first and everyone sees the winner
//! - Survey: a submission lands in the stream and every tally updates
//! - Detection: frames go to a toy inference service and come back ranked
//!
//! Set `RUST_LOG=peerbus=debug` to see the peers' activity logs.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use peerbus::kiosk::detect::{self, Point};
use peerbus::kiosk::{
    DetectConfig, DetectError, Detection, DetectionStream, Detector, DetectorOutput, Familiarity,
    Industry, Peer, PeerCollaborators, PeerConfig, PeerEvent, PeerHandle, SurveyRecord, UseCase,
};
use peerbus::{Broker, ServiceRegistry, Session, SessionConfig};
use tokio::sync::mpsc;

/// Pretends to find a person and a laptop in any non-empty frame
struct ToyDetector;

impl Detector for ToyDetector {
    fn detect(&self, image: &[u8]) -> Result<DetectorOutput, DetectError> {
        if image.is_empty() {
            return Err(DetectError::InvalidImage("empty frame".into()));
        }
        let found = |name: &str, p: f64| Detection {
            class_ids: vec![0],
            class_names: vec![name.to_string()],
            probabilities: vec![p],
            start_point: Point { x: 10.0, y: 10.0 },
            end_point: Point { x: 120.0, y: 200.0 },
        };
        Ok(DetectorOutput {
            detections: vec![found("laptop", 0.61), found("person", 0.93), found("person", 0.71)],
            network_time: Duration::from_millis(4),
        })
    }
}

async fn start_peer(
    broker: &Arc<Broker>,
    nickname: &str,
    admin: bool,
) -> Result<(PeerHandle, mpsc::Receiver<PeerEvent>), Box<dyn std::error::Error>> {
    let session = Session::connect(broker.clone(), nickname, SessionConfig::default()).await?;
    let config = PeerConfig::new(nickname)
        .admin(admin)
        .handoff_timeout(Duration::from_secs(2))
        .quickdraw_timeout(Duration::from_secs(5));
    Ok(Peer::start(session, config, PeerCollaborators::default()).await?)
}

fn print_usage() {
    println!("Usage: kiosk [PEERS]");
    println!();
    println!("Arguments:");
    println!("  PEERS    Number of attendee peers besides the admin (default: 3)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let attendees: usize = match args.get(1) {
        Some(count) => count.parse()?,
        None => 3,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("peerbus=info".parse()?),
        )
        .init();

    let broker = Arc::new(Broker::new());

    let (admin, _admin_events) = start_peer(&broker, "Host", true).await?;
    let mut peers = Vec::new();
    for i in 0..attendees.max(1) {
        peers.push(start_peer(&broker, &format!("attendee-{}", i + 1), false).await?);
    }

    // Camera handoff
    match admin.stop_sharing().await {
        Ok(volunteer) => println!("Camera handed to {}", volunteer.name),
        Err(e) => println!("Nobody took the camera: {}", e),
    }
    admin.start_sharing().await?;
    println!("Host took the camera back");

    // Quickdraw
    let race = {
        let admin = admin.clone();
        tokio::spawn(async move { admin.quickdraw().await })
    };
    let (first, first_events) = &mut peers[0];
    while let Some(event) = first_events.recv().await {
        if matches!(event, PeerEvent::Challenge { .. }) {
            first.answer_quickdraw().await?;
            break;
        }
    }
    println!("Quickdraw winner: {}", race.await??);

    // Survey
    let seq = peers[0]
        .0
        .submit_survey(SurveyRecord {
            familiarity: Familiarity::HeardOf,
            use_case: UseCase::IoT,
            industry: Industry::Finance,
        })
        .await?;
    println!("Survey stored at sequence {}", seq);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let snapshot = admin.snapshot().await?;
    for question in snapshot.tally.questions() {
        println!("{}", question.label);
        for (option, count) in question.options {
            println!("  {:>3}  {}", count, option);
        }
    }

    // Detection
    let session = Session::connect(broker.clone(), "inference", SessionConfig::default()).await?;
    let registry = ServiceRegistry::new(session.clone());
    let config = DetectConfig::default().interval(Duration::from_millis(20));
    let (_service, _server) = detect::serve_inference(&registry, &config, Arc::new(ToyDetector)).await?;

    let camera = Session::connect(broker.clone(), "camera", SessionConfig::default()).await?;
    let stream = DetectionStream::start(camera, || Some(Bytes::from_static(b"frame")), config);
    let mut displayed = stream.displayed();
    displayed.changed().await?;
    if let Some(frame) = displayed.borrow().clone() {
        for detection in &frame.detections {
            println!("Detected {} ({:.2})", detection.label_key(), detection.score());
        }
    }
    let frames = stream.stop().await?;
    println!("Detection processed {} frames", frames);

    for (peer, _) in &peers {
        peer.shutdown().await?;
    }
    admin.shutdown().await?;

    Ok(())
}
