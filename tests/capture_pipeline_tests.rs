/// Capture pipeline scenarios: frames in, freshest messages out
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use v2x_probe::capture::{CaptureLoop, CaptureSession, CaptureSource, FrameOutcome};
use v2x_probe::classifier::{JsonCodec, MessageClassifier, MessageCodec, StationFilter};
use v2x_probe::error::CaptureError;
use v2x_probe::freshness::MessageBuffers;
use v2x_probe::types::{Cam, MessageKind, V2xFrame, V2xMessage};

fn cam(station_id: u32, latitude: i32) -> Cam {
    Cam {
        station_id,
        latitude,
        longitude: 100000000,
        heading_value: 0,
        speed_value: 5,
    }
}

fn cam_frame(station_id: u32, latitude: i32) -> V2xFrame {
    JsonCodec
        .encode(&V2xMessage::Cam(cam(station_id, latitude)), "02:00:00:00:00:01")
        .unwrap()
}

fn denm_frame(station_id: u32, sequence_number: u16) -> V2xFrame {
    let mut denm = v2x_probe::attack_sim::forge::forge_denm(3, 0, 0);
    denm.station_id = station_id;
    denm.sequence_number = sequence_number;
    JsonCodec
        .encode(&V2xMessage::Denm(denm), "02:00:00:00:00:02")
        .unwrap()
}

fn capture_loop(source: Arc<dyn CaptureSource>, buffers: Arc<MessageBuffers>) -> CaptureLoop {
    CaptureLoop::new(
        "wlan1".to_string(),
        source,
        MessageClassifier::new(Arc::new(JsonCodec)),
        StationFilter::default(),
        buffers,
    )
    .with_restart_delay(Duration::from_millis(1))
}

struct OneShotSession {
    frames: VecDeque<V2xFrame>,
}

#[async_trait]
impl CaptureSession for OneShotSession {
    async fn next_frame(&mut self) -> Result<Option<V2xFrame>, CaptureError> {
        Ok(self.frames.pop_front())
    }
}

/// Serves one session of frames, then reports the interface gone
struct OneShotSource {
    frames: Mutex<Option<Vec<V2xFrame>>>,
}

#[async_trait]
impl CaptureSource for OneShotSource {
    async fn open(&self, iface: &str) -> Result<Box<dyn CaptureSession>, CaptureError> {
        match self.frames.lock().unwrap().take() {
            Some(frames) => Ok(Box::new(OneShotSession {
                frames: frames.into(),
            })),
            None => Err(CaptureError::InterfaceNotFound(iface.to_string())),
        }
    }
}

#[test]
fn test_only_accepted_subset_is_published_in_order() {
    let buffers = Arc::new(MessageBuffers::new());
    let source = Arc::new(OneShotSource {
        frames: Mutex::new(None),
    });
    let capture = capture_loop(source, Arc::clone(&buffers));

    let frames = vec![
        cam_frame(4316, 1),
        cam_frame(1, 2),
        denm_frame(12131, 1),
        V2xFrame::new(Some(4), "X".to_string(), vec![0xde, 0xad]),
        denm_frame(99, 2),
        cam_frame(4316, 3),
        V2xFrame::new(Some(1), "X".to_string(), b"{\"broken\":".to_vec()),
        denm_frame(12131, 3),
        cam_frame(4316, 4),
    ];

    let mut published = Vec::new();
    for frame in &frames {
        if let FrameOutcome::Accepted(_) = capture.process_frame(frame) {
            if let Some(cam) = buffers.cam.try_consume() {
                published.push(format!("cam:{}", cam.latitude));
            }
            if let Some(denm) = buffers.denm.try_consume() {
                published.push(format!("denm:{}", denm.sequence_number));
            }
        } else {
            assert!(buffers.cam.is_empty());
            assert!(buffers.denm.is_empty());
        }
    }

    assert_eq!(
        published,
        vec!["cam:1", "denm:1", "cam:3", "denm:3", "cam:4"]
    );

    let stats = capture.stats().snapshot();
    assert_eq!(stats.frames, 9);
    assert_eq!(stats.filtered, 2);
    assert_eq!(stats.unrecognized, 1);
    assert_eq!(stats.decode_failures, 1);
}

#[tokio::test]
async fn test_run_leaves_freshest_of_each_kind() {
    let buffers = Arc::new(MessageBuffers::new());
    let source = Arc::new(OneShotSource {
        frames: Mutex::new(Some(vec![
            cam_frame(4316, 10),
            denm_frame(12131, 1),
            cam_frame(4316, 11),
            cam_frame(5, 12),
            denm_frame(12131, 2),
            denm_frame(6, 3),
        ])),
    });
    let capture = capture_loop(source, Arc::clone(&buffers));
    let stats = capture.stats();

    let result = capture.run().await;
    assert!(matches!(result, Err(CaptureError::InterfaceNotFound(_))));

    assert_eq!(buffers.cam.consume().await.latitude, 11);
    assert_eq!(buffers.denm.consume().await.sequence_number, 2);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.accepted_cam, 2);
    assert_eq!(snapshot.accepted_denm, 2);
    assert_eq!(snapshot.evicted, 2);
    assert_eq!(snapshot.sessions, 1);
}

#[tokio::test]
async fn test_buffers_do_not_cross_contaminate() {
    let buffers = Arc::new(MessageBuffers::new());
    let source = Arc::new(OneShotSource {
        frames: Mutex::new(None),
    });
    let capture = capture_loop(source, Arc::clone(&buffers));

    let waiting_reader = {
        let buffers = Arc::clone(&buffers);
        tokio::spawn(async move { buffers.cam.consume().await })
    };

    assert_eq!(
        capture.process_frame(&denm_frame(12131, 8)),
        FrameOutcome::Accepted(MessageKind::Denm)
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiting_reader.is_finished());
    assert!(buffers.cam.is_empty());

    capture.process_frame(&cam_frame(4316, 42));
    let cam = tokio::time::timeout(Duration::from_secs(1), waiting_reader)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cam.latitude, 42);
    assert_eq!(buffers.denm.try_consume().map(|d| d.sequence_number), Some(8));
}
