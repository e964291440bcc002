//! Object detection streaming
//!
//! The sharing peer captures frames and sends each one to the `ai_detect`
//! service with its own reply subject `ai_detect.reply.<token>`. The reply
//! is normalised and replaces the displayed detections. The first failure
//! (timeout, transport error, undecodable reply) ends streaming and clears
//! the display; restarting is up to the caller.
//!
//! Observers see the same traffic without sending anything: they subscribe
//! to the frames on `ai_detect` and to every reply on `ai_detect.reply.>`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::config::DetectConfig;
use crate::bus::subject;
use crate::error::{Error, Result};
use crate::service::{EndpointConfig, Service, ServiceConfig, ServiceRegistry};
use crate::session::request::reply_token;
use crate::session::{RequestOptions, Session};

/// Pixel coordinate
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// One detected object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Detection {
    #[serde(rename = "ClassIDs", default)]
    pub class_ids: Vec<i64>,
    #[serde(default)]
    pub class_names: Vec<String>,
    #[serde(default)]
    pub probabilities: Vec<f64>,
    #[serde(default)]
    pub start_point: Point,
    #[serde(default)]
    pub end_point: Point,
}

impl Detection {
    /// Sum of the class probabilities
    pub fn score(&self) -> f64 {
        self.probabilities.iter().sum()
    }

    /// Class names joined into one key
    pub fn label_key(&self) -> String {
        self.class_names.concat()
    }
}

/// Inference result for one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DetectionFrame {
    /// Reply token of the request that produced the frame
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub frame_id: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub threshold: f64,
    /// Nanoseconds spent in the network
    #[serde(default)]
    pub network_only_time_taken: u64,
    /// Nanoseconds spent overall
    #[serde(default)]
    pub overall_time_taken: u64,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

impl DetectionFrame {
    /// Normalise the detections in place; see `normalize`
    pub fn normalize(&mut self) {
        self.detections = normalize(std::mem::take(&mut self.detections));
    }
}

/// Rank and dedupe detections
///
/// Sorted by summed probability, highest first. Entries without class names
/// are dropped and only the best entry per class-name set survives.
pub fn normalize(mut detections: Vec<Detection>) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score().total_cmp(&a.score()));

    let mut seen = HashSet::new();
    detections
        .into_iter()
        .filter(|d| !d.class_names.is_empty())
        .filter(|d| seen.insert(d.label_key()))
        .collect()
}

/// Produces frames to send for detection
pub trait FrameSource: Send {
    /// Next encoded frame, or `None` when none is ready yet
    fn capture(&mut self) -> Option<Bytes>;
}

impl<F> FrameSource for F
where
    F: FnMut() -> Option<Bytes> + Send,
{
    fn capture(&mut self) -> Option<Bytes> {
        self()
    }
}

async fn stream_frames<S: FrameSource>(
    session: Session,
    mut source: S,
    config: DetectConfig,
    displayed: watch::Sender<Option<DetectionFrame>>,
    mut stop: watch::Receiver<bool>,
) -> Result<u64> {
    let mut frames = 0u64;

    tracing::info!(subject = %config.subject, "Detection streaming started");

    loop {
        if *stop.borrow_and_update() {
            break;
        }

        if let Some(image) = source.capture() {
            let token = reply_token();
            let options = RequestOptions::with_timeout(config.timeout)
                .reply(subject::join(&config.reply_prefix, &token));

            let result = tokio::select! {
                result = session.request_with(&config.subject, image, options) => result,
                _ = stop.changed() => break,
            };

            match result.and_then(|reply| reply.json::<DetectionFrame>()) {
                Ok(mut frame) => {
                    frame.frame_id = token;
                    frame.normalize();
                    displayed.send_replace(Some(frame));
                    frames += 1;
                }
                Err(e) => {
                    tracing::warn!(frames = frames, error = %e, "Detection failed, streaming stopped");
                    displayed.send_replace(None);
                    return Err(e);
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            changed = stop.changed() => {
                // Handle dropped
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    displayed.send_replace(None);
    tracing::info!(frames = frames, "Detection streaming stopped");
    Ok(frames)
}

/// A running detection stream
pub struct DetectionStream {
    stop: watch::Sender<bool>,
    displayed: watch::Receiver<Option<DetectionFrame>>,
    task: JoinHandle<Result<u64>>,
}

impl DetectionStream {
    /// Start streaming frames from `source`
    pub fn start<S>(session: Session, source: S, config: DetectConfig) -> Self
    where
        S: FrameSource + 'static,
    {
        let (stop, stop_rx) = watch::channel(false);
        let (displayed_tx, displayed) = watch::channel(None);
        let task = tokio::spawn(stream_frames(session, source, config, displayed_tx, stop_rx));
        Self { stop, displayed, task }
    }

    /// The displayed detections; `None` when nothing is shown
    pub fn displayed(&self) -> watch::Receiver<Option<DetectionFrame>> {
        self.displayed.clone()
    }

    pub fn is_streaming(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop streaming and return the number of frames processed
    pub async fn stop(self) -> Result<u64> {
        let _ = self.stop.send(true);
        self.finished().await
    }

    /// Wait for streaming to end on its own
    pub async fn finished(self) -> Result<u64> {
        self.task.await.map_err(|_| Error::Closed)?
    }
}

/// Latest frame and detections seen by an observer
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub image: Option<Bytes>,
    pub frame: Option<DetectionFrame>,
}

/// Mirror another peer's detection stream without sending requests
///
/// Runs until the session closes.
pub async fn observe(session: Session, config: DetectConfig, out: watch::Sender<Observation>) -> Result<()> {
    let mut frames = session.subscribe(&config.subject).await?;
    let mut replies = session.subscribe(&config.reply_pattern()).await?;

    loop {
        tokio::select! {
            message = frames.next() => {
                let Some(message) = message else { break };
                out.send_modify(|o| o.image = Some(message.payload));
            }
            message = replies.next() => {
                let Some(message) = message else { break };
                if message.service_error().is_some() {
                    continue;
                }
                match message.json::<DetectionFrame>() {
                    Ok(mut frame) => {
                        frame.frame_id = message.subject.rsplit('.').next().unwrap_or_default().to_string();
                        frame.normalize();
                        out.send_modify(|o| o.frame = Some(frame));
                    }
                    Err(e) => tracing::debug!(subject = %message.subject, error = %e, "Ignoring detection reply"),
                }
            }
        }
    }

    Ok(())
}

/// Why a detector could not handle a frame
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    /// The payload isn't an image the detector understands
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// The detector failed on a valid image
    #[error("processing failed: {0}")]
    Processing(String),
}

impl DetectError {
    /// Service error code and description sent to the requester
    pub fn service_error(&self) -> (&'static str, &'static str) {
        match self {
            DetectError::InvalidImage(_) => ("400", "Error decoding image"),
            DetectError::Processing(_) => ("500", "Error processing image"),
        }
    }
}

/// Detector output for one frame
#[derive(Debug, Clone, Default)]
pub struct DetectorOutput {
    pub detections: Vec<Detection>,
    pub network_time: Duration,
}

/// Object detector behind the inference service
pub trait Detector: Send + Sync {
    fn detect(&self, image: &[u8]) -> std::result::Result<DetectorOutput, DetectError>;
}

/// Register the `ai_detect` inference service around `detector`
///
/// Requests are handled one at a time in a spawned task that ends when the
/// service is stopped.
pub async fn serve_inference(
    registry: &ServiceRegistry,
    config: &DetectConfig,
    detector: Arc<dyn Detector>,
) -> Result<(Service, JoinHandle<()>)> {
    let service = registry
        .register(
            ServiceConfig::new(config.subject.replace('.', "_"), "0.0.1")
                .description("Object detection for images"),
        )
        .await?;
    let mut endpoint = service
        .add_endpoint("detect", EndpointConfig::new(&config.subject))
        .await?;

    let model_name = config.model_name.clone();
    let threshold = config.threshold;

    let task = tokio::spawn(async move {
        while let Some(request) = endpoint.next().await {
            let started = Instant::now();
            let result = match detector.detect(request.data()) {
                Ok(output) => {
                    let frame = DetectionFrame {
                        frame_id: String::new(),
                        model_name: model_name.clone(),
                        threshold,
                        network_only_time_taken: output.network_time.as_nanos() as u64,
                        overall_time_taken: started.elapsed().as_nanos() as u64,
                        detections: output.detections,
                    };
                    request.respond_json(&frame).await
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Detection request failed");
                    let (code, description) = e.service_error();
                    request.respond_error(code, description).await
                }
            };
            if let Err(e) = result {
                tracing::debug!(error = %e, "Detection reply not sent");
            }
        }
    });

    tracing::info!(subject = %config.subject, model = %config.model_name, "Inference service listening");
    Ok((service, task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Broker;
    use crate::session::SessionConfig;

    fn detection(names: &[&str], probabilities: &[f64]) -> Detection {
        Detection {
            class_ids: vec![0; names.len()],
            class_names: names.iter().map(|s| s.to_string()).collect(),
            probabilities: probabilities.to_vec(),
            start_point: Point { x: 1.0, y: 2.0 },
            end_point: Point { x: 10.0, y: 20.0 },
        }
    }

    struct FixedDetector;

    impl Detector for FixedDetector {
        fn detect(&self, image: &[u8]) -> std::result::Result<DetectorOutput, DetectError> {
            match image {
                b"jpeg" => Ok(DetectorOutput {
                    detections: vec![detection(&["person"], &[90.0]), detection(&["person"], &[95.0])],
                    network_time: Duration::from_millis(3),
                }),
                b"crash" => Err(DetectError::Processing("gpu".into())),
                _ => Err(DetectError::InvalidImage("not a jpeg".into())),
            }
        }
    }

    #[test]
    fn test_normalize_dedupes_by_class_names() {
        let detections = vec![
            detection(&["person"], &[60.0]),
            detection(&[], &[99.0]),
            detection(&["person"], &[80.0]),
            detection(&["dog", "cat"], &[30.0, 30.0]),
        ];

        let normalized = normalize(detections);

        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].probabilities, vec![80.0]);
        assert_eq!(normalized[1].class_names, vec!["dog", "cat"]);
    }

    #[test]
    fn test_wire_field_names() {
        let json = r#"{
            "ModelName": "yolov4-tiny",
            "Threshold": 0.5,
            "NetworkOnlyTimeTaken": 1200,
            "OverallTimeTaken": 1500,
            "Detections": [{
                "ClassIDs": [0],
                "ClassNames": ["person"],
                "Probabilities": [97.5],
                "StartPoint": {"X": 10, "Y": 20},
                "EndPoint": {"X": 110, "Y": 220}
            }]
        }"#;

        let frame: DetectionFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.model_name, "yolov4-tiny");
        assert_eq!(frame.detections[0].class_ids, vec![0]);
        assert_eq!(frame.detections[0].end_point, Point { x: 110.0, y: 220.0 });
    }

    async fn setup() -> (ServiceRegistry, Session, JoinHandle<()>) {
        let broker = Arc::new(Broker::new());
        let server = Session::connect(broker.clone(), "orin", SessionConfig::default())
            .await
            .unwrap();
        let client = Session::connect(broker, "camera", SessionConfig::default())
            .await
            .unwrap();
        let registry = ServiceRegistry::new(server);
        let (_service, task) = serve_inference(&registry, &DetectConfig::default(), Arc::new(FixedDetector))
            .await
            .unwrap();
        (registry, client, task)
    }

    #[tokio::test]
    async fn test_stream_replaces_display_then_stops() {
        let (_registry, client, _task) = setup().await;
        let config = DetectConfig::default().interval(Duration::from_millis(5));
        let stream = DetectionStream::start(client, || Some(Bytes::from_static(b"jpeg")), config);
        let mut displayed = stream.displayed();

        displayed.changed().await.unwrap();
        let frame = displayed.borrow().clone().unwrap();
        assert_eq!(frame.detections.len(), 1);
        assert_eq!(frame.detections[0].probabilities, vec![95.0]);
        assert_eq!(frame.frame_id.len(), crate::session::request::TOKEN_LEN);

        let frames = stream.stop().await.unwrap();
        assert!(frames >= 1);
        assert!(displayed.borrow().is_none());
    }

    #[tokio::test]
    async fn test_service_error_ends_streaming_and_clears() {
        let (_registry, client, _task) = setup().await;
        let stream = DetectionStream::start(client, || Some(Bytes::from_static(b"crash")), DetectConfig::default());
        let displayed = stream.displayed();

        match stream.finished().await {
            Err(Error::Service { code, .. }) => assert_eq!(code, "500"),
            other => panic!("expected service error, got {:?}", other),
        }
        assert!(displayed.borrow().is_none());
    }

    #[tokio::test]
    async fn test_no_service_ends_streaming() {
        let broker = Arc::new(Broker::new());
        let client = Session::connect(broker, "camera", SessionConfig::default())
            .await
            .unwrap();
        let stream = DetectionStream::start(client, || Some(Bytes::from_static(b"jpeg")), DetectConfig::default());

        assert!(matches!(stream.finished().await, Err(Error::NoResponders(_))));
    }

    #[tokio::test]
    async fn test_observer_mirrors_frames() {
        let (registry, client, _task) = setup().await;
        let (tx, mut rx) = watch::channel(Observation::default());
        tokio::spawn(observe(registry.session().clone(), DetectConfig::default(), tx));
        // Let the observer subscribe
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let stream = DetectionStream::start(client, || Some(Bytes::from_static(b"jpeg")), DetectConfig::default());

        while rx.borrow_and_update().frame.is_none() {
            rx.changed().await.unwrap();
        }
        let observation = rx.borrow().clone();
        assert_eq!(observation.image.as_deref(), Some(&b"jpeg"[..]));
        assert_eq!(observation.frame.unwrap().detections.len(), 1);

        stream.stop().await.unwrap();
    }
}
