//! Per-consumer sequential byte stream over a session
//!
//! A `StreamReader` owns one reorder buffer. A drain task moves packets from the
//! reader's listener channel into the buffer while `read` pulls bytes out of it in
//! sample-position order. Lost audio is skipped rather than waited for: when the
//! next buffered packet starts past the read offset, the offset jumps forward.
//!
//! `read` is non-blocking and returns 0 when nothing is buffered yet; that is not
//! end of stream. `read_available` waits for data and returns 0 only once the
//! reader is closed or the session has stopped and everything buffered was read.
//! For that reason the reader deliberately does not implement `std::io::Read`.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};

use super::fanout::ListenerId;
use super::stream::Session;
use crate::audio::buffer::{Offer, ReorderBuffer, ReorderBufferStats};
use crate::config::ReaderConfig;
use crate::protocol::{Packet, SessionId};

struct ReaderState {
    buffer: ReorderBuffer,
    /// Packet currently being drained
    current: Option<Packet>,
}

struct Shared {
    state: Mutex<ReaderState>,
    readable: Notify,
    ended: AtomicBool,
}

/// Reconstructed byte stream of one session for one consumer
pub struct StreamReader {
    session: Arc<Session>,
    listener: Option<ListenerId>,
    shared: Arc<Shared>,
    quit: watch::Sender<bool>,
    poll_interval: Duration,
    closed: bool,
    bytes_read: u64,
    gaps_skipped: u64,
    bytes_skipped: u64,
}

impl StreamReader {
    /// Register a listener on `session` and start draining it
    pub fn subscribe(session: Arc<Session>, config: &ReaderConfig) -> Self {
        let (tx, packets) = mpsc::channel(config.channel_capacity());
        let listener = session.add_listener(tx);
        if listener.is_none() {
            tracing::debug!(session_id = session.id(), "Subscribed to a stopped session");
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(ReaderState {
                buffer: ReorderBuffer::new(config.reorder_capacity()),
                current: None,
            }),
            readable: Notify::new(),
            ended: AtomicBool::new(false),
        });
        let (quit, quit_rx) = watch::channel(false);

        tokio::spawn(drain(session.id(), listener, packets, shared.clone(), quit_rx));

        Self {
            session,
            listener,
            shared,
            quit,
            poll_interval: config.poll_interval(),
            closed: false,
            bytes_read: 0,
            gaps_skipped: 0,
            bytes_skipped: 0,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    pub fn listener_id(&self) -> Option<ListenerId> {
        self.listener
    }

    /// Copy up to `buf.len()` reconstructed bytes into `buf`
    ///
    /// Returns 0 when no audio is buffered right now.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut state = self.shared.state.lock();
        let ReaderState { buffer, current } = &mut *state;
        let mut n = 0;

        while n < buf.len() {
            if current.is_none() {
                *current = buffer.pop_min();
            }
            let Some(packet) = current.as_ref() else {
                break;
            };

            let start = packet.sample_position as i64;
            if start > buffer.read_offset() {
                let gap = start - buffer.read_offset();
                tracing::trace!(
                    session_id = packet.session_id,
                    from = buffer.read_offset(),
                    to = start,
                    "Skipping lost audio"
                );
                // Joining mid-stream is not lost audio
                if self.bytes_read > 0 || n > 0 {
                    self.gaps_skipped += 1;
                    self.bytes_skipped += gap as u64;
                }
                buffer.advance_to(start);
            }

            let skip = (buffer.read_offset() - start) as usize;
            if skip < packet.len() {
                let available = &packet.payload[skip..];
                let copied = available.len().min(buf.len() - n);
                buf[n..n + copied].copy_from_slice(&available[..copied]);
                n += copied;
                buffer.advance_to(buffer.read_offset() + copied as i64);
            }

            if buffer.read_offset() >= packet.end_position() {
                *current = None;
            }
        }

        self.bytes_read += n as u64;
        n
    }

    /// Wait until audio is available and read it
    ///
    /// Returns 0 only at end of stream.
    pub async fn read_available(&mut self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let shared = self.shared.clone();
        loop {
            let notified = shared.readable.notified();
            let n = self.read(buf);
            if n > 0 {
                return n;
            }
            if self.closed || shared.ended.load(Ordering::Acquire) {
                // The drain task may have buffered a last packet after the read above
                return self.read(buf);
            }
            let _ = tokio::time::timeout(self.poll_interval, notified).await;
        }
    }

    /// Next stream position this reader will emit
    pub fn read_offset(&self) -> i64 {
        self.shared.state.lock().buffer.read_offset()
    }

    /// Packets waiting in the reorder buffer
    pub fn buffered(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether no more packets will arrive
    pub fn is_ended(&self) -> bool {
        self.closed || self.shared.ended.load(Ordering::Acquire)
    }

    /// Deregister from the session and stop draining; safe to call repeatedly
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(id) = self.listener.take() {
            self.session.remove_listener(id);
        }
        self.quit.send_replace(true);
        tracing::debug!(
            session_id = self.session.id(),
            bytes_read = self.bytes_read,
            "Reader closed"
        );
    }

    /// Get statistics
    pub fn stats(&self) -> ReaderStats {
        ReaderStats {
            buffer: self.shared.state.lock().buffer.stats(),
            bytes_read: self.bytes_read,
            gaps_skipped: self.gaps_skipped,
            bytes_skipped: self.bytes_skipped,
        }
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reader statistics
#[derive(Debug, Clone, Default)]
pub struct ReaderStats {
    pub buffer: ReorderBufferStats,
    pub bytes_read: u64,
    pub gaps_skipped: u64,
    pub bytes_skipped: u64,
}

/// Drain task: moves packets from the listener channel into the reorder buffer
async fn drain(
    session_id: SessionId,
    listener: Option<ListenerId>,
    mut packets: mpsc::Receiver<Packet>,
    shared: Arc<Shared>,
    mut quit: watch::Receiver<bool>,
) {
    tracing::debug!(session_id, listener, "Building reader");
    loop {
        tokio::select! {
            biased;
            _ = quit.changed() => break,
            packet = packets.recv() => {
                let Some(packet) = packet else { break };
                let outcome = shared.state.lock().buffer.offer(packet);
                if let Offer::Evicted(position) = outcome {
                    tracing::trace!(session_id, listener, position, "Reorder buffer overflow");
                }
                shared.readable.notify_one();
            }
        }
    }
    shared.ended.store(true, Ordering::Release);
    shared.readable.notify_one();
    tracing::debug!(session_id, listener, "Reader drain finished");
}
