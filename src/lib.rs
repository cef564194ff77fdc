pub mod attack_sim;
pub mod capture;
pub mod classifier;
pub mod config;
pub mod error;
pub mod freshness;
pub mod geo;
pub mod logging;
pub mod network;
pub mod server;
pub mod types;

pub use attack_sim::orchestrator::AttackOrchestrator;
pub use attack_sim::{AttackVariant, BurstReport, Transport};
pub use capture::{CaptureLoop, CaptureSession, CaptureSource, FrameOutcome};
pub use classifier::{JsonCodec, MessageClassifier, MessageCodec, StationFilter};
pub use config::{Config, Settings};
pub use freshness::{FreshnessBuffer, MessageBuffers, ReadPolicy};
pub use network::{AirCapture, AirClient, AirTransport, NetMessage};
pub use types::{Cam, Denm, MessageKind, V2xFrame, V2xMessage};
