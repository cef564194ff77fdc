//! Virtual V2X air: relays every frame to all other attached clients.
use colored::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use v2x_probe::network::NetMessage;
use v2x_probe::types::{MessageKind, V2xFrame};

const DEFAULT_BUS_ADDRESS: &str = "127.0.0.1:9100";
const BUFFER_SIZE: usize = 1000;

/// A frame tagged with the connection that sent it
type AirFrame = (u64, V2xFrame);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_BUS_ADDRESS.to_string());

    println!("{}", "═══════════════════════════════════════════════════════════════".magenta().bold());
    println!("{}", "                    V2X AIR BUS                                ".magenta().bold());
    println!("{}", "═══════════════════════════════════════════════════════════════".magenta().bold());
    println!();

    let (tx, _rx) = broadcast::channel::<AirFrame>(BUFFER_SIZE);
    let next_id = Arc::new(AtomicU64::new(1));

    let listener = TcpListener::bind(&address).await?;
    println!(
        "{} Air bus ready on {}! Waiting for stations...",
        "✓".green().bold(),
        address.bright_white()
    );
    println!();

    loop {
        let (socket, addr) = listener.accept().await?;
        let client_id = next_id.fetch_add(1, Ordering::Relaxed);
        println!(
            "{} New connection #{} from {}",
            "→".cyan(),
            client_id,
            addr.to_string().bright_white()
        );

        let tx = tx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(socket, client_id, tx).await {
                eprintln!("{} Client #{} error: {}", "✗".red(), client_id, e);
            }
        });
    }
}

async fn handle_client(
    socket: TcpStream,
    client_id: u64,
    tx: broadcast::Sender<AirFrame>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);

    // First message must be a registration
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let client_name = match serde_json::from_str::<NetMessage>(&line)? {
        NetMessage::Register { client_name } => client_name,
        _ => return Err("First message must be Register".into()),
    };
    println!(
        "  {} {} registered as #{}",
        "✓".green(),
        client_name.bright_cyan().bold(),
        client_id
    );

    let mut ack = serde_json::to_vec(&NetMessage::Ack)?;
    ack.push(b'\n');
    write_half.write_all(&ack).await?;

    // Forward everyone else's frames to this client
    let mut rx = tx.subscribe();
    let forwarder = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok((origin, frame)) if origin != client_id => {
                    let Ok(mut json) = serde_json::to_vec(&NetMessage::Frame(frame)) else {
                        continue;
                    };
                    json.push(b'\n');
                    if write_half.write_all(&json).await.is_err() || write_half.flush().await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    eprintln!("{} Client #{} lagged, {} frames dropped", "⚠".yellow(), client_id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut frame_count = 0u64;
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }

        match serde_json::from_str::<NetMessage>(&line) {
            Ok(NetMessage::Frame(frame)) => {
                frame_count += 1;
                let kind = frame
                    .message_id
                    .and_then(MessageKind::from_message_id)
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "OTHER".to_string());
                println!(
                    "  {} Frame #{:04} from {} - {} ({} bytes)",
                    "→".yellow(),
                    frame_count,
                    client_name.bright_cyan(),
                    kind,
                    frame.payload.len()
                );
                // No receivers is fine, the air does not care
                let _ = tx.send((client_id, frame));
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("{} Bad message from {}: {}", "✗".red(), client_name, e);
            }
        }
    }

    forwarder.abort();
    println!(
        "{} {} disconnected (sent {} frames)",
        "→".bright_black(),
        client_name.bright_black(),
        frame_count
    );
    Ok(())
}
