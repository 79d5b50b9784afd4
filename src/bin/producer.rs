//! Mock Audio Producer
//!
//! Opens one or more sessions on a relay and streams raw audio files to it in
//! real time, looping each file forever.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cloud_audio_relay::protocol::{Packet, SessionInfo};

#[derive(Parser)]
#[command(name = "mock-producer", about = "Stream raw audio files to a relay")]
struct Args {
    /// Number of concurrent streams; stream `i` reads `{input_dir}/{i}.raw`
    #[arg(short = 'n', default_value_t = 1)]
    streams: usize,
    /// Signalling server base URL
    #[arg(long, default_value = "http://localhost:2444")]
    srv: String,
    /// Send one packet per second instead of real time
    #[arg(long, short = 's')]
    slow: bool,
    /// Directory containing the raw audio files
    #[arg(long, default_value = ".")]
    input_dir: PathBuf,
    /// Payload bytes per packet
    #[arg(long, default_value_t = 1024)]
    packet_size: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    if args.packet_size == 0 {
        bail!("packet size must be non-zero");
    }

    tracing::info!("Starting up {} mock streams", args.streams);

    let client = reqwest::Client::new();
    let mut streams = JoinSet::new();
    for index in 0..args.streams {
        let client = client.clone();
        let srv = args.srv.clone();
        let path = args.input_dir.join(format!("{}.raw", index));
        let (slow, packet_size) = (args.slow, args.packet_size);
        streams.spawn(async move {
            tracing::info!("Starting stream {}", index);
            let result = stream(&client, &srv, path, slow, packet_size).await;
            (index, result)
        });
    }

    // Streams run forever; the first one to return ends the producer
    match streams.join_next().await {
        Some(Ok((index, Err(e)))) => {
            tracing::error!("Stream {} failed: {:#}", index, e);
        }
        Some(Ok((index, Ok(())))) => tracing::warn!("Stream {} finished", index),
        Some(Err(e)) => tracing::error!("Stream task panicked: {}", e),
        None => return Ok(()),
    }
    bail!("Abnormal mock stream termination")
}

async fn stream(
    client: &reqwest::Client,
    srv: &str,
    path: PathBuf,
    slow: bool,
    packet_size: usize,
) -> Result<()> {
    let audio = tokio::fs::read(&path)
        .await
        .with_context(|| format!("could not open {}", path.display()))?;
    if audio.is_empty() {
        bail!("{} is empty", path.display());
    }

    // Sample positions are i32 on the wire; once they run out, continue on a new session
    let mut offset = 0usize;
    loop {
        let info = connect(client, srv).await?;
        tracing::info!("Started stream with id: {}", info.session_id);
        send_session(&info, &audio, &mut offset, slow, packet_size).await?;
        tracing::info!(
            session_id = info.session_id,
            "Sample positions exhausted, moving to a new session"
        );
    }
}

async fn connect(client: &reqwest::Client, srv: &str) -> Result<SessionInfo> {
    let info = client
        .get(format!("{}/connect", srv.trim_end_matches('/')))
        .send()
        .await
        .context("could not connect to signalling server")?
        .error_for_status()?
        .json()
        .await
        .context("invalid signalling response")?;
    Ok(info)
}

/// Stream `audio` on one session until its sample positions are used up
async fn send_session(
    info: &SessionInfo,
    audio: &[u8],
    offset: &mut usize,
    slow: bool,
    packet_size: usize,
) -> Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket
        .connect((info.ip.as_str(), info.port))
        .await
        .context("could not connect to UDP server")?;

    let period = if slow {
        Duration::from_secs(1)
    } else {
        let byte_rate = info.audio_info.byte_rate().max(1);
        Duration::from_nanos(packet_size as u64 * 1_000_000_000 / byte_rate)
    };
    let mut ticker = tokio::time::interval(period);

    let mut position = Some(0i32);
    let mut payload = vec![0u8; packet_size];
    while let Some(current) = position {
        ticker.tick().await;
        fill_payload(&mut payload, audio, offset);

        let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let packet = Packet::new(info.session_id, timestamp, current, payload.clone());
        let datagram = packet.encode()?;
        position = next_position(current, packet_size);

        let sent = socket.send(&datagram).await.context("failed to send UDP packet")?;
        if sent != datagram.len() {
            bail!("failed to send full payload of UDP packet");
        }
    }
    Ok(())
}

/// Copy the next `payload.len()` bytes of `audio`, looping at the end
fn fill_payload(payload: &mut [u8], audio: &[u8], offset: &mut usize) {
    for byte in payload.iter_mut() {
        *byte = audio[*offset];
        *offset = (*offset + 1) % audio.len();
    }
}

/// Position of the packet after one of `payload_len` bytes at `position`
///
/// `None` once the next position no longer fits in i32.
fn next_position(position: i32, payload_len: usize) -> Option<i32> {
    i32::try_from(payload_len)
        .ok()
        .and_then(|len| position.checked_add(len))
}
