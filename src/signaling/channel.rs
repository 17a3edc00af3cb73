//! Signaling channel implementation

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    ReadHalf, WriteHalf,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::network::PeerId;
use crate::protocol::constants::{FRAME_DELIMITER, MAX_FRAME_SIZE};
use crate::protocol::{decode, encode, SignalingMessage};
use crate::stats::{ChannelStats, ChannelStatsSnapshot};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Something that happened on a channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A decoded message, in stream arrival order
    Message(SignalingMessage),
    /// The underlying stream ended or failed
    Closed,
}

/// Channel event tagged with its origin
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub channel_id: u64,
    pub peer: PeerId,
    pub event: ChannelEvent,
}

enum Outbound {
    Message(SignalingMessage),
    Close,
}

/// One signaling connection to a peer on a sub-protocol
///
/// Dropping the channel closes it.
pub struct SignalingChannel {
    id: u64,
    peer: PeerId,
    protocol: String,
    tx: mpsc::UnboundedSender<Outbound>,
    stats: Arc<ChannelStats>,
    reader: JoinHandle<()>,
}

impl SignalingChannel {
    /// Take ownership of an open stream and start its reader/writer tasks
    pub fn open<S>(
        peer: PeerId,
        protocol: impl Into<String>,
        stream: S,
        inbound: mpsc::UnboundedSender<InboundEvent>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let id = NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed);
        let protocol = protocol.into();
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(ChannelStats::new());

        tracing::debug!(
            channel_id = id,
            peer = %peer,
            protocol = %protocol,
            "Signaling channel opened"
        );

        tokio::spawn(write_loop(id, write_half, rx, Arc::clone(&stats)));
        let reader = tokio::spawn(read_loop(
            id,
            peer.clone(),
            read_half,
            inbound,
            Arc::clone(&stats),
        ));

        Self {
            id,
            peer,
            protocol,
            tx,
            stats,
            reader,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Queue a message; returns false if the channel is already closed
    pub fn send(&self, msg: SignalingMessage) -> bool {
        let topic = msg.topic();
        if self.tx.send(Outbound::Message(msg)).is_err() {
            tracing::debug!(
                channel_id = self.id,
                peer = %self.peer,
                topic = topic,
                "Dropping message on closed channel"
            );
            return false;
        }
        true
    }

    /// Flush queued messages, shut the stream down, and stop reading
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
        self.reader.abort();
    }

    pub fn stats(&self) -> ChannelStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SignalingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingChannel")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("protocol", &self.protocol)
            .finish()
    }
}

async fn write_loop<S>(
    channel_id: u64,
    mut writer: WriteHalf<S>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    stats: Arc<ChannelStats>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    while let Some(outbound) = rx.recv().await {
        let msg = match outbound {
            Outbound::Message(msg) => msg,
            Outbound::Close => break,
        };

        let frame = match encode(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(channel_id = channel_id, error = %e, "Failed to encode message");
                continue;
            }
        };

        if let Err(e) = writer.write_all(&frame).await {
            tracing::debug!(channel_id = channel_id, error = %e, "Signaling write failed");
            break;
        }
        if let Err(e) = writer.flush().await {
            tracing::debug!(channel_id = channel_id, error = %e, "Signaling flush failed");
            break;
        }

        stats.record_sent(frame.len());
        tracing::trace!(channel_id = channel_id, topic = msg.topic(), "Sent");
    }

    let _ = writer.shutdown().await;
}

async fn read_loop<S>(
    channel_id: u64,
    peer: PeerId,
    reader: ReadHalf<S>,
    inbound: mpsc::UnboundedSender<InboundEvent>,
    stats: Arc<ChannelStats>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(4096);

    loop {
        let n = match read_frame(&mut reader, &mut buf).await {
            Ok(Frame::End) => break,
            Ok(Frame::Line(n)) => n,
            Ok(Frame::Oversized(size)) => {
                stats.record_malformed();
                tracing::warn!(channel_id = channel_id, peer = %peer, size = size, "Dropping oversized frame");
                continue;
            }
            Err(e) => {
                tracing::debug!(channel_id = channel_id, peer = %peer, error = %e, "Signaling read failed");
                break;
            }
        };

        if buf.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }

        let msg = match decode(&buf) {
            Ok(msg) => msg,
            Err(Error::UnknownTopic(topic)) => {
                stats.record_unknown();
                tracing::debug!(channel_id = channel_id, peer = %peer, topic = %topic, "Ignoring unknown topic");
                continue;
            }
            Err(e) => {
                stats.record_malformed();
                tracing::warn!(channel_id = channel_id, peer = %peer, error = %e, "Dropping malformed message");
                continue;
            }
        };

        stats.record_received(n);
        tracing::trace!(channel_id = channel_id, peer = %peer, topic = msg.topic(), "Received");

        let event = InboundEvent {
            channel_id,
            peer: peer.clone(),
            event: ChannelEvent::Message(msg),
        };
        if inbound.send(event).is_err() {
            return;
        }
    }

    tracing::debug!(channel_id = channel_id, peer = %peer, "Signaling channel ended");
    let _ = inbound.send(InboundEvent {
        channel_id,
        peer,
        event: ChannelEvent::Closed,
    });
}

/// Outcome of reading one delimited frame
enum Frame {
    End,
    /// Frame of this many bytes is in the buffer
    Line(usize),
    /// Frame exceeded `MAX_FRAME_SIZE`; its bytes were discarded
    Oversized(usize),
}

/// Read one frame into `buf`, buffering at most `MAX_FRAME_SIZE + 1` bytes
///
/// The rest of an oversized frame is skipped up to and including the next
/// delimiter without being kept in memory.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let n = (&mut *reader)
        .take(MAX_FRAME_SIZE as u64 + 1)
        .read_until(FRAME_DELIMITER, buf)
        .await?;
    if n == 0 {
        return Ok(Frame::End);
    }
    if n <= MAX_FRAME_SIZE {
        return Ok(Frame::Line(n));
    }

    let mut size = n;
    if buf.last() != Some(&FRAME_DELIMITER) {
        loop {
            let (used, found) = {
                let available = reader.fill_buf().await?;
                if available.is_empty() {
                    break;
                }
                match available.iter().position(|b| *b == FRAME_DELIMITER) {
                    Some(i) => (i + 1, true),
                    None => (available.len(), false),
                }
            };
            reader.consume(used);
            size += used;
            if found {
                break;
            }
        }
    }
    buf.clear();
    Ok(Frame::Oversized(size))
}

/// Write one message as a frame, for request/response sub-protocols
pub async fn write_message<W>(writer: &mut W, msg: &SignalingMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read frames until a known message arrives; `None` at end of stream
///
/// Unknown topics are skipped. Malformed frames are returned as errors.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<SignalingMessage>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        match read_frame(reader, &mut buf).await? {
            Frame::End => return Ok(None),
            Frame::Line(_) => {}
            Frame::Oversized(size) => {
                return Err(Error::MalformedMessage(format!(
                    "frame of {} bytes exceeds {}",
                    size, MAX_FRAME_SIZE
                )))
            }
        }
        if buf.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }
        match decode(&buf) {
            Ok(msg) => return Ok(Some(msg)),
            Err(Error::UnknownTopic(_)) => continue,
            Err(e) => return Err(e),
        }
    }
}
