//! External transcoder wrapper
//!
//! Spawns ffmpeg with raw PCM on stdin and a compressed container on stdout. A
//! pump task feeds it from a [`StreamReader`]; stdout is exposed as a byte stream
//! suitable for an HTTP response body. Dropping the stream kills the child and
//! closes the reader.

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::config::TranscoderConfig;
use crate::error::{Error, Result};
use crate::protocol::AudioInfo;
use crate::session::StreamReader;

/// ffmpeg raw input format for a sample width
pub fn input_format(bytes_per_sample: u16) -> Result<&'static str> {
    match bytes_per_sample {
        1 => Ok("u8"),
        2 => Ok("s16le"),
        3 => Ok("s24le"),
        4 => Ok("s32le"),
        other => Err(Error::Transcoder(format!(
            "unsupported sample width: {} bytes",
            other
        ))),
    }
}

/// Command-line arguments converting raw `audio` into the configured output format
///
/// Explicit `args` in the config replace the generated ffmpeg arguments.
pub fn build_args(audio: &AudioInfo, config: &TranscoderConfig) -> Result<Vec<String>> {
    if !config.args.is_empty() {
        return Ok(config.args.clone());
    }
    let channels = audio.channels.to_string();
    Ok(vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "warning".into(),
        "-f".into(),
        input_format(audio.bytes_per_sample)?.into(),
        "-ar".into(),
        audio.sample_rate.to_string(),
        "-ac".into(),
        channels.clone(),
        "-i".into(),
        "-".into(),
        "-f".into(),
        config.output_format.clone(),
        "-ac".into(),
        channels,
        "-".into(),
    ])
}

/// A running transcoder process
pub struct Transcoder {
    child: Child,
    stdout: ChildStdout,
    pump: JoinHandle<()>,
    chunk_size: usize,
    session_id: u64,
}

impl Transcoder {
    /// Spawn the transcoder and start feeding it from `reader`
    pub fn spawn(reader: StreamReader, audio: AudioInfo, config: &TranscoderConfig) -> Result<Self> {
        let args = build_args(&audio, config)?;
        let session_id = reader.session_id();

        let mut child = Command::new(&config.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Transcoder(format!("failed to start {}: {}", config.program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transcoder("failed to create stdin pipe".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transcoder("failed to create stdout pipe".into()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "transcoder", session_id, "{}", line);
                }
            });
        }

        let chunk_size = config.chunk_size.max(1);
        let pump = tokio::spawn(async move {
            match pump(reader, stdin, chunk_size).await {
                Ok(total) => tracing::info!(session_id, "Done copying from reader: {} bytes", total),
                Err(e) => tracing::debug!(session_id, "Copy from session reader ended: {}", e),
            }
        });

        tracing::info!(session_id, program = %config.program, "Transcoder started");
        Ok(Self {
            child,
            stdout,
            pump,
            chunk_size,
            session_id,
        })
    }

    /// Read the next chunk of transcoded output; `None` at end of output
    pub async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let mut buf = BytesMut::with_capacity(self.chunk_size);
        let n = self.stdout.read_buf(&mut buf).await?;
        if n == 0 {
            match self.child.try_wait() {
                Ok(Some(status)) if !status.success() => {
                    tracing::warn!(session_id = self.session_id, "Transcoder exited with {}", status)
                }
                _ => tracing::debug!(session_id = self.session_id, "Transcoder output finished"),
            }
            return Ok(None);
        }
        Ok(Some(buf.freeze()))
    }

    /// Turn the transcoder output into a stream of chunks
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        futures_util::stream::unfold(Some(self), |state| async move {
            let mut transcoder = state?;
            match transcoder.next_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(transcoder))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

impl Drop for Transcoder {
    fn drop(&mut self) {
        // Dropping the pump future drops the reader, which deregisters it
        self.pump.abort();
        tracing::debug!(session_id = self.session_id, "Transcoder released");
    }
}

/// Copy reader output into the transcoder until end of stream or a write error
async fn pump(mut reader: StreamReader, mut stdin: ChildStdin, chunk_size: usize) -> io::Result<u64> {
    let mut buf = vec![0u8; chunk_size];
    let mut total = 0u64;
    loop {
        let n = reader.read_available(&mut buf).await;
        if n == 0 {
            break;
        }
        stdin.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    stdin.shutdown().await?;
    Ok(total)
}
