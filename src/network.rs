/// Virtual V2X air bus client
///
/// The air bus is a JSON-lines TCP relay standing in for the ITS-G5 radio:
/// every frame a client sends is delivered to all other attached clients.
/// [`AirCapture`] and [`AirTransport`] adapt it to the capture and transport
/// boundaries.
use crate::attack_sim::Transport;
use crate::capture::{CaptureSession, CaptureSource};
use crate::error::{CaptureError, TransportError};
use crate::types::V2xFrame;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Air bus wire messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NetMessage {
    /// A frame on the air
    Frame(V2xFrame),
    /// Client registration, the name is the interface it attaches as
    Register { client_name: String },
    Ack,
    Error(String),
}

/// Connection to the air bus
pub struct AirClient {
    stream: TcpStream,
    client_name: String,
}

impl AirClient {
    /// Connect to the air bus and register
    pub async fn connect(addr: &str, client_name: String) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let mut client = Self {
            stream,
            client_name: client_name.clone(),
        };

        client
            .send_message(&NetMessage::Register { client_name })
            .await?;

        Ok(client)
    }

    pub async fn send_message(&mut self, msg: &NetMessage) -> std::io::Result<()> {
        write_message(&mut self.stream, msg).await
    }

    pub async fn send_frame(&mut self, frame: V2xFrame) -> std::io::Result<()> {
        self.send_message(&NetMessage::Frame(frame)).await
    }

    /// Split the client into read and write halves
    pub fn split(self) -> (AirReader, AirWriter) {
        let (read_half, write_half) = self.stream.into_split();
        (
            AirReader {
                reader: BufReader::new(read_half),
                line: String::new(),
            },
            AirWriter { writer: write_half },
        )
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }
}

async fn write_message<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg: &NetMessage,
) -> std::io::Result<()> {
    let mut json = serde_json::to_vec(msg)?;
    json.push(b'\n');
    writer.write_all(&json).await?;
    writer.flush().await
}

/// Read half of the air bus client
pub struct AirReader {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    line: String,
}

impl AirReader {
    /// Next message from the bus, `Ok(None)` when the bus closed the connection
    pub async fn receive_message(&mut self) -> Result<Option<NetMessage>, CaptureError> {
        self.line.clear();
        let n = self.reader.read_line(&mut self.line).await?;
        if n == 0 {
            return Ok(None);
        }

        serde_json::from_str(&self.line)
            .map(Some)
            .map_err(|e| CaptureError::Malformed(e.to_string()))
    }

    /// Read and discard everything the bus sends until it closes the
    /// connection. Returns the number of messages discarded.
    ///
    /// Send-only clients run this so the relay never blocks writing to them.
    pub fn spawn_drain(mut self) -> JoinHandle<u64> {
        tokio::spawn(async move {
            let mut discarded = 0u64;
            loop {
                match self.receive_message().await {
                    Ok(Some(_)) | Err(CaptureError::Malformed(_)) => discarded += 1,
                    Ok(None) | Err(_) => return discarded,
                }
            }
        })
    }
}

/// Write half of the air bus client
pub struct AirWriter {
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl AirWriter {
    pub async fn send_message(&mut self, msg: &NetMessage) -> std::io::Result<()> {
        write_message(&mut self.writer, msg).await
    }

    pub async fn send_frame(&mut self, frame: V2xFrame) -> std::io::Result<()> {
        self.send_message(&NetMessage::Frame(frame)).await
    }
}

/// Capture source attaching to the air bus under the interface name
pub struct AirCapture {
    bus_address: String,
}

impl AirCapture {
    pub fn new(bus_address: String) -> Self {
        Self { bus_address }
    }
}

#[async_trait]
impl CaptureSource for AirCapture {
    async fn open(&self, iface: &str) -> Result<Box<dyn CaptureSession>, CaptureError> {
        if iface.trim().is_empty() {
            return Err(CaptureError::InterfaceNotFound(iface.to_string()));
        }

        let client = AirClient::connect(&self.bus_address, format!("{}-capture", iface)).await?;
        let (reader, _writer) = client.split();
        Ok(Box::new(AirSession { reader, _writer }))
    }
}

struct AirSession {
    reader: AirReader,
    // keeps the connection fully open while capturing
    _writer: AirWriter,
}

#[async_trait]
impl CaptureSession for AirSession {
    async fn next_frame(&mut self) -> Result<Option<V2xFrame>, CaptureError> {
        loop {
            let received = match self.reader.receive_message().await {
                Err(CaptureError::Malformed(reason)) => {
                    warn!(%reason, "skipping malformed air bus record");
                    continue;
                }
                other => other?,
            };
            match received {
                None => return Ok(None),
                Some(NetMessage::Frame(frame)) => return Ok(Some(frame)),
                Some(NetMessage::Error(reason)) => {
                    return Err(CaptureError::Malformed(reason));
                }
                Some(_) => continue,
            }
        }
    }
}

/// Transport sending frames onto the air bus
///
/// The link is re-established on the next send once a write fails or the bus
/// closes the connection. The send that hits the dead link still fails.
pub struct AirTransport {
    bus_address: String,
    client_name: String,
    link: Mutex<Option<TxLink>>,
}

struct TxLink {
    writer: AirWriter,
    drain: JoinHandle<u64>,
}

impl TxLink {
    async fn open(bus_address: &str, client_name: &str) -> std::io::Result<Self> {
        let client = AirClient::connect(bus_address, client_name.to_string()).await?;
        let (reader, writer) = client.split();
        Ok(Self {
            writer,
            drain: reader.spawn_drain(),
        })
    }

    /// The bus has closed its side
    fn is_closed(&self) -> bool {
        self.drain.is_finished()
    }
}

impl Drop for TxLink {
    fn drop(&mut self) {
        self.drain.abort();
    }
}

impl AirTransport {
    pub async fn connect(bus_address: &str, iface: &str) -> std::io::Result<Self> {
        let client_name = format!("{}-tx", iface);
        let link = TxLink::open(bus_address, &client_name).await?;
        Ok(Self {
            bus_address: bus_address.to_string(),
            client_name,
            link: Mutex::new(Some(link)),
        })
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }
}

#[async_trait]
impl Transport for AirTransport {
    async fn send(&self, frame: &V2xFrame) -> Result<(), TransportError> {
        let mut link = self.link.lock().await;

        if link.as_ref().map_or(true, TxLink::is_closed) {
            if link.take().is_some() {
                debug!(client = %self.client_name, "air bus link lost");
            }
            let fresh = TxLink::open(&self.bus_address, &self.client_name).await?;
            info!(client = %self.client_name, bus = %self.bus_address, "reattached to air bus");
            *link = Some(fresh);
        }

        let Some(active) = link.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        let sent = active.writer.send_frame(frame.clone()).await;
        if let Err(e) = sent {
            *link = None;
            return Err(e.into());
        }
        Ok(())
    }
}
