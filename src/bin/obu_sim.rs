//! Traffic generator for the air bus: a vehicle broadcasting CAMs and a
//! roadside unit broadcasting DENMs.
use colored::*;
use std::time::Duration;
use v2x_probe::attack_sim::forge;
use v2x_probe::classifier::{JsonCodec, MessageCodec};
use v2x_probe::geo;
use v2x_probe::network::AirClient;
use v2x_probe::types::{encoding, Cam, V2xMessage};

const DEFAULT_BUS_ADDRESS: &str = "127.0.0.1:9100";
const STATION_NAME: &str = "OBU_SIM";
const VEHICLE_STATION_ID: u32 = 4316;
const RSU_STATION_ID: u32 = 12131;
const OTHER_STATION_ID: u32 = 7777;
const VEHICLE_GN_ADDRESS: &str = "02:00:00:00:10:DC";
const RSU_GN_ADDRESS: &str = "02:00:00:00:2F:63";
const UPDATE_INTERVAL_MS: u64 = 100; // 10 Hz CAM
const DENM_EVERY: u32 = 10;
const SPEED_MPS: f64 = 8.0;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_BUS_ADDRESS.to_string());

    println!("{}", "═══════════════════════════════════════".magenta().bold());
    println!("{}", "        OBU / RSU Traffic Generator    ".magenta().bold());
    println!("{}", "═══════════════════════════════════════".magenta().bold());
    println!();

    println!("{} Connecting to air bus at {}...", "→".cyan(), address);
    let client = AirClient::connect(&address, STATION_NAME.to_string()).await?;
    println!("{} Connected as {}!", "✓".green().bold(), client.client_name());
    println!();

    // Frames from other stations are not needed, but must be read off the socket
    let (reader, mut client) = client.split();
    let _drain = reader.spawn_drain();

    let codec = JsonCodec;
    let (mut lat, mut lon) = (
        encoding::descale_coordinate(forge::DEFAULT_LATITUDE),
        encoding::descale_coordinate(forge::DEFAULT_LONGITUDE) - 0.002,
    );
    let heading = 90u16;
    let mut counter = 0u32;

    loop {
        let step_km = SPEED_MPS * UPDATE_INTERVAL_MS as f64 / 1e6;
        (lat, lon) = geo::project(lat, lon, step_km, heading as f64);

        let cam = Cam {
            station_id: VEHICLE_STATION_ID,
            latitude: encoding::scale_coordinate(lat),
            longitude: encoding::scale_coordinate(lon),
            heading_value: heading,
            speed_value: (SPEED_MPS * 3.6) as u16,
        };
        client
            .send_frame(codec.encode(&V2xMessage::Cam(cam.clone()), VEHICLE_GN_ADDRESS)?)
            .await?;

        // A station the probe is not filtering for
        if counter % 5 == 0 {
            let other = Cam {
                station_id: OTHER_STATION_ID,
                ..cam.clone()
            };
            client
                .send_frame(codec.encode(&V2xMessage::Cam(other), VEHICLE_GN_ADDRESS)?)
                .await?;
        }

        if counter % DENM_EVERY == 0 {
            let mut denm = forge::forge_denm(
                0,
                forge::DEFAULT_LATITUDE,
                forge::DEFAULT_LONGITUDE,
            );
            denm.station_id = RSU_STATION_ID;
            denm.sequence_number = (counter / DENM_EVERY) as u16;
            client
                .send_frame(codec.encode(&V2xMessage::Denm(denm), RSU_GN_ADDRESS)?)
                .await?;
        }

        if counter % 20 == 0 {
            println!(
                "{} CAM: lat={:.6}, lon={:.6}, heading={}°",
                "→".bright_black(),
                lat,
                lon,
                heading
            );
        }

        counter = counter.wrapping_add(1);
        tokio::time::sleep(Duration::from_millis(UPDATE_INTERVAL_MS)).await;
    }
}
