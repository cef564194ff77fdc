/// Capture-and-classify loop
///
/// Repeatedly opens a capture session on the configured interface, classifies
/// each frame, applies the station filter and publishes accepted messages into
/// the matching freshness buffer. Session interruptions are followed by a short
/// pause and a new session; configuration-level failures end the loop.
use crate::classifier::{MessageClassifier, StationFilter};
use crate::error::CaptureError;
use crate::freshness::MessageBuffers;
use crate::types::{MessageKind, V2xFrame, V2xMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// An open capture on one interface
#[async_trait]
pub trait CaptureSession: Send {
    /// Next captured frame, `Ok(None)` once the session has ended
    async fn next_frame(&mut self) -> Result<Option<V2xFrame>, CaptureError>;
}

/// Packet-capture boundary
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn open(&self, iface: &str) -> Result<Box<dyn CaptureSession>, CaptureError>;
}

/// What happened to a single captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Accepted(MessageKind),
    /// Recognized kind from a station other than the configured one
    Filtered(MessageKind),
    Unrecognized,
    DecodeFailed,
}

/// Running counters of the capture loop
#[derive(Debug, Default)]
pub struct CaptureStats {
    frames: AtomicU64,
    accepted_cam: AtomicU64,
    accepted_denm: AtomicU64,
    filtered: AtomicU64,
    unrecognized: AtomicU64,
    decode_failures: AtomicU64,
    evicted: AtomicU64,
    sessions: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CaptureStatsSnapshot {
    pub frames: u64,
    pub accepted_cam: u64,
    pub accepted_denm: u64,
    pub filtered: u64,
    pub unrecognized: u64,
    pub decode_failures: u64,
    /// Unread messages replaced by a fresher one
    pub evicted: u64,
    pub sessions: u64,
}

impl CaptureStats {
    fn record(&self, outcome: FrameOutcome) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            FrameOutcome::Accepted(MessageKind::Cam) => &self.accepted_cam,
            FrameOutcome::Accepted(MessageKind::Denm) => &self.accepted_denm,
            FrameOutcome::Filtered(_) => &self.filtered,
            FrameOutcome::Unrecognized => &self.unrecognized,
            FrameOutcome::DecodeFailed => &self.decode_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            accepted_cam: self.accepted_cam.load(Ordering::Relaxed),
            accepted_denm: self.accepted_denm.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            unrecognized: self.unrecognized.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
        }
    }
}

pub struct CaptureLoop {
    iface: String,
    source: Arc<dyn CaptureSource>,
    classifier: MessageClassifier,
    filter: StationFilter,
    buffers: Arc<MessageBuffers>,
    restart_delay: Duration,
    stats: Arc<CaptureStats>,
}

impl CaptureLoop {
    pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(50);

    pub fn new(
        iface: String,
        source: Arc<dyn CaptureSource>,
        classifier: MessageClassifier,
        filter: StationFilter,
        buffers: Arc<MessageBuffers>,
    ) -> Self {
        Self {
            iface,
            source,
            classifier,
            filter,
            buffers,
            restart_delay: Self::DEFAULT_RESTART_DELAY,
            stats: Arc::new(CaptureStats::default()),
        }
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    /// Classify, filter and publish one frame
    pub fn process_frame(&self, frame: &V2xFrame) -> FrameOutcome {
        let outcome = match self.classifier.classify(frame) {
            Ok(None) => {
                trace!(message_id = ?frame.message_id, "ignoring non CAM/DENM frame");
                FrameOutcome::Unrecognized
            }
            Err(e) => {
                debug!(error = %e, source = %frame.gn_address, "dropping undecodable frame");
                FrameOutcome::DecodeFailed
            }
            Ok(Some(msg)) if !self.filter.accepts(&msg) => {
                trace!(
                    kind = %msg.kind(),
                    station = msg.station_id(),
                    expected = self.filter.expected(msg.kind()),
                    "station filter mismatch"
                );
                FrameOutcome::Filtered(msg.kind())
            }
            Ok(Some(msg)) => {
                let kind = msg.kind();
                let evicted = match msg {
                    V2xMessage::Cam(cam) => self.buffers.cam.publish(cam).is_some(),
                    V2xMessage::Denm(denm) => self.buffers.denm.publish(denm).is_some(),
                };
                if evicted {
                    self.stats.evicted.fetch_add(1, Ordering::Relaxed);
                }
                FrameOutcome::Accepted(kind)
            }
        };
        self.stats.record(outcome);
        outcome
    }

    /// Process frames until the session ends. Returns the number of frames seen
    /// on a clean end of session.
    pub async fn drain_session(
        &self,
        session: &mut dyn CaptureSession,
    ) -> Result<u64, CaptureError> {
        let mut count = 0u64;
        while let Some(frame) = session.next_frame().await? {
            self.process_frame(&frame);
            count += 1;
        }
        Ok(count)
    }

    /// Run for the lifetime of the process. Only returns on a fatal error.
    pub async fn run(self) -> Result<(), CaptureError> {
        let mut opened_once = false;

        loop {
            match self.source.open(&self.iface).await {
                Ok(mut session) => {
                    opened_once = true;
                    self.stats.sessions.fetch_add(1, Ordering::Relaxed);
                    info!(iface = %self.iface, "capture session opened");

                    match self.drain_session(session.as_mut()).await {
                        Ok(frames) => {
                            info!(iface = %self.iface, frames, "capture session ended");
                        }
                        Err(e) if e.is_fatal() => {
                            error!(iface = %self.iface, error = %e, "capture failed");
                            return Err(e);
                        }
                        Err(e) => {
                            warn!(iface = %self.iface, error = %e, "capture session interrupted");
                        }
                    }
                }
                Err(e) if e.is_fatal() || !opened_once => {
                    error!(iface = %self.iface, error = %e, "cannot open capture");
                    return Err(e);
                }
                Err(e) => {
                    warn!(iface = %self.iface, error = %e, "reopening capture failed");
                }
            }

            tokio::time::sleep(self.restart_delay).await;
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<(), CaptureError>> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{JsonCodec, MessageCodec};
    use crate::types::{Cam, Denm, EventType, Situation};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedSession {
        frames: VecDeque<Result<Option<V2xFrame>, CaptureError>>,
    }

    #[async_trait]
    impl CaptureSession for ScriptedSession {
        async fn next_frame(&mut self) -> Result<Option<V2xFrame>, CaptureError> {
            self.frames.pop_front().unwrap_or(Ok(None))
        }
    }

    /// Hands out scripted sessions, then reports the interface as gone
    struct ScriptedSource {
        sessions: Mutex<VecDeque<Result<Vec<Result<Option<V2xFrame>, CaptureError>>, CaptureError>>>,
    }

    #[async_trait]
    impl CaptureSource for ScriptedSource {
        async fn open(&self, iface: &str) -> Result<Box<dyn CaptureSession>, CaptureError> {
            let next = self.sessions.lock().unwrap().pop_front();
            match next {
                Some(Ok(frames)) => Ok(Box::new(ScriptedSession {
                    frames: frames.into(),
                })),
                Some(Err(e)) => Err(e),
                None => Err(CaptureError::InterfaceNotFound(iface.to_string())),
            }
        }
    }

    fn cam_frame(station_id: u32, latitude: i32) -> V2xFrame {
        let cam = Cam {
            station_id,
            latitude,
            longitude: 100000000,
            heading_value: 90,
            speed_value: 10,
        };
        JsonCodec.encode(&V2xMessage::Cam(cam), "AA:AA").unwrap()
    }

    fn denm_frame(station_id: u32, sub_cause_code: u8) -> V2xFrame {
        let denm = Denm {
            protocol_version: 2,
            message_id: 1,
            station_id,
            originating_station_id: station_id,
            sequence_number: 1,
            detection_time: 0,
            reference_time: 0,
            latitude: 0,
            longitude: 0,
            semi_major_confidence: 0,
            semi_minor_confidence: 0,
            semi_major_orientation: 0,
            altitude_value: 0,
            altitude_confidence: "unavailable".to_string(),
            validity_duration: 1,
            station_type: 15,
            situation: Situation {
                information_quality: 4,
                event_type: EventType {
                    cause_code: 1,
                    sub_cause_code,
                },
            },
        };
        JsonCodec.encode(&V2xMessage::Denm(denm), "BB:BB").unwrap()
    }

    fn capture_loop(source: ScriptedSource, buffers: Arc<MessageBuffers>) -> CaptureLoop {
        CaptureLoop::new(
            "wlan1".to_string(),
            Arc::new(source),
            MessageClassifier::new(Arc::new(JsonCodec)),
            StationFilter::default(),
            buffers,
        )
        .with_restart_delay(Duration::from_millis(1))
    }

    fn empty_source() -> ScriptedSource {
        ScriptedSource {
            sessions: Mutex::new(VecDeque::new()),
        }
    }

    #[test]
    fn test_process_frame_outcomes() {
        let buffers = Arc::new(MessageBuffers::new());
        let capture = capture_loop(empty_source(), Arc::clone(&buffers));

        assert_eq!(
            capture.process_frame(&cam_frame(4316, 1)),
            FrameOutcome::Accepted(MessageKind::Cam)
        );
        assert_eq!(
            capture.process_frame(&cam_frame(999, 2)),
            FrameOutcome::Filtered(MessageKind::Cam)
        );
        assert_eq!(
            capture.process_frame(&denm_frame(12131, 3)),
            FrameOutcome::Accepted(MessageKind::Denm)
        );
        assert_eq!(
            capture.process_frame(&V2xFrame::new(Some(5), "CC".to_string(), vec![0])),
            FrameOutcome::Unrecognized
        );
        assert_eq!(
            capture.process_frame(&V2xFrame::new(Some(2), "CC".to_string(), b"garbage".to_vec())),
            FrameOutcome::DecodeFailed
        );

        assert_eq!(buffers.cam.try_consume().map(|c| c.latitude), Some(1));
        assert_eq!(buffers.denm.try_consume().map(|d| d.sub_cause_code()), Some(3));

        let stats = capture.stats().snapshot();
        assert_eq!(stats.frames, 5);
        assert_eq!(stats.accepted_cam, 1);
        assert_eq!(stats.accepted_denm, 1);
        assert_eq!(stats.filtered, 1);
        assert_eq!(stats.unrecognized, 1);
        assert_eq!(stats.decode_failures, 1);
    }

    #[test]
    fn test_fresher_message_evicts_unread_one() {
        let buffers = Arc::new(MessageBuffers::new());
        let capture = capture_loop(empty_source(), Arc::clone(&buffers));

        capture.process_frame(&cam_frame(4316, 1));
        capture.process_frame(&cam_frame(4316, 2));

        assert_eq!(buffers.cam.try_consume().map(|c| c.latitude), Some(2));
        assert_eq!(capture.stats().snapshot().evicted, 1);
    }

    #[tokio::test]
    async fn test_drain_session_survives_bad_frames() {
        let buffers = Arc::new(MessageBuffers::new());
        let capture = capture_loop(empty_source(), Arc::clone(&buffers));

        let mut session = ScriptedSession {
            frames: VecDeque::from(vec![
                Ok(Some(V2xFrame::new(Some(2), "X".to_string(), b"{".to_vec()))),
                Ok(Some(cam_frame(4316, 7))),
                Ok(None),
            ]),
        };
        let frames = capture.drain_session(&mut session).await.unwrap();
        assert_eq!(frames, 2);
        assert_eq!(buffers.cam.try_consume().map(|c| c.latitude), Some(7));
    }

    #[tokio::test]
    async fn test_run_restarts_interrupted_sessions() {
        let buffers = Arc::new(MessageBuffers::new());
        let source = ScriptedSource {
            sessions: Mutex::new(VecDeque::from(vec![
                Ok(vec![Ok(Some(cam_frame(4316, 1))), Err(CaptureError::SessionClosed)]),
                Err(CaptureError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "driver reset",
                ))),
                Ok(vec![Ok(Some(denm_frame(12131, 5)))]),
            ])),
        };
        let capture = capture_loop(source, Arc::clone(&buffers));
        let stats = capture.stats();

        // scripted sessions run out, the source then reports the interface as gone
        let result = capture.run().await;
        assert!(matches!(result, Err(CaptureError::InterfaceNotFound(_))));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sessions, 2);
        assert_eq!(snapshot.accepted_cam, 1);
        assert_eq!(snapshot.accepted_denm, 1);
        assert_eq!(buffers.denm.try_consume().map(|d| d.sub_cause_code()), Some(5));
    }

    #[tokio::test]
    async fn test_first_open_failure_is_fatal() {
        let source = ScriptedSource {
            sessions: Mutex::new(VecDeque::from(vec![Err(CaptureError::Io(
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "no bus"),
            ))])),
        };
        let capture = capture_loop(source, Arc::new(MessageBuffers::new()));
        let result = capture.run().await;
        assert!(matches!(result, Err(CaptureError::Io(_))));
    }
}
