use colored::*;
use std::sync::Arc;
use v2x_probe::attack_sim::orchestrator::AttackOrchestrator;
use v2x_probe::capture::CaptureLoop;
use v2x_probe::classifier::{JsonCodec, MessageClassifier, MessageCodec};
use v2x_probe::config::{self, Settings};
use v2x_probe::freshness::MessageBuffers;
use v2x_probe::logging;
use v2x_probe::network::{AirCapture, AirTransport};
use v2x_probe::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config_path = config::resolve_config_path(std::env::args().nth(1));
    let settings = match Settings::load(&config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            return Err(e.into());
        }
    };
    logging::init(&settings.log_level);

    println!("{}", "═══════════════════════════════════════════════════════════════".cyan().bold());
    println!("{}", "     V2X Probe - CAM/DENM capture and DENM injection           ".cyan().bold());
    println!("{}", "═══════════════════════════════════════════════════════════════".cyan().bold());
    println!("{}", "⚠  Only use on authorized test systems".yellow());
    println!();
    println!("  Config:    {}", config_path.display().to_string().bright_white());
    println!("  Interface: {}", settings.iface.bright_cyan());
    println!("  Air bus:   {}", settings.bus_address.bright_white());
    println!(
        "  Filters:   CAM station {} │ DENM station {}",
        settings.station_filter.cam_station.to_string().green(),
        settings.station_filter.denm_station.to_string().green()
    );
    println!("  HTTP:      {}", settings.http_bind.bright_white());
    if let Some(dir) = &settings.static_dir {
        println!("  Dashboard: {}", dir.display().to_string().bright_white());
    }
    println!();

    let buffers = Arc::new(MessageBuffers::new());
    let codec: Arc<dyn MessageCodec> = Arc::new(JsonCodec);

    let transport = AirTransport::connect(&settings.bus_address, &settings.iface)
        .await
        .map_err(|e| format!("cannot attach {} to {}: {}", settings.iface, settings.bus_address, e))?;
    let orchestrator = AttackOrchestrator::new(
        Arc::new(transport),
        Arc::clone(&codec),
        Arc::clone(&buffers),
        settings.attack.clone(),
    )
    .with_read_policy(settings.read_policy);

    let capture = CaptureLoop::new(
        settings.iface.clone(),
        Arc::new(AirCapture::new(settings.bus_address.clone())),
        MessageClassifier::new(codec),
        settings.station_filter,
        Arc::clone(&buffers),
    )
    .with_restart_delay(settings.restart_delay);
    let capture_task = capture.spawn();

    let listener = server::bind(&settings.http_bind).await?;
    let state = Arc::new(AppState {
        buffers,
        orchestrator: Arc::new(orchestrator),
        sub_cause_path: settings.sub_cause_path.clone(),
        read_policy: settings.read_policy,
        static_dir: settings.static_dir.clone(),
    });

    println!("{} Capture running, request boundary ready", "✓".green().bold());

    tokio::select! {
        result = server::serve(listener, state) => result?,
        result = capture_task => result??,
    }

    Ok(())
}
