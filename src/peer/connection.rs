use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{Handshake, Message, StreamDemuxer, HANDSHAKE_LEN};
use crate::error::PeerError;

/// Instructions for a connection's outbound writer. `Close` is internal
/// only and never appears on the wire: it drains whatever is already
/// queued, then shuts the socket down.
#[derive(Debug)]
pub enum Outbound {
    Deliver(Message),
    Close,
}

/// Events a connection task reports to the session.
#[derive(Debug)]
pub enum PeerEvent {
    /// Handshake verified; the connection is live.
    Connected {
        addr: SocketAddr,
        peer_id: [u8; 20],
    },
    /// A parsed wire message arrived.
    Message { addr: SocketAddr, message: Message },
    /// The connection is gone: refused, timed out, protocol violation,
    /// or an orderly close. Terminal for this peer.
    Disconnected { addr: SocketAddr, reason: String },
}

/// The session's grip on one connection: the FIFO outbound queue and
/// the task to await when shutting down.
pub struct PeerHandle {
    pub addr: SocketAddr,
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub task: JoinHandle<()>,
}

impl PeerHandle {
    pub fn send(&self, message: Message) {
        // A closed channel means the writer is already gone; the
        // Disconnected event will reach the session on its own.
        let _ = self.outbound.send(Outbound::Deliver(message));
    }

    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

/// Connect-phase knobs, owned by the session config.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Spawn the reader/writer task pair for one remote peer.
///
/// The returned handle is usable immediately; until the handshake
/// verifies, queued messages simply wait in the channel. Every exit
/// path emits a `Disconnected` event so the session can release the
/// peer's assignment.
pub fn spawn_connection(
    addr: SocketAddr,
    info_hash: [u8; 20],
    our_peer_id: [u8; 20],
    expected_peer_id: Option<[u8; 20]>,
    limits: ConnectionLimits,
    events: mpsc::Sender<PeerEvent>,
) -> PeerHandle {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        let reason = match run_connection(
            addr,
            info_hash,
            our_peer_id,
            expected_peer_id,
            limits,
            &events,
            outbound_rx,
        )
        .await
        {
            Ok(()) => "connection closed".to_string(),
            Err(err) => err.to_string(),
        };

        debug!(%addr, %reason, "Peer connection finished");
        let _ = events.send(PeerEvent::Disconnected { addr, reason }).await;
    });

    PeerHandle {
        addr,
        outbound: outbound_tx,
        task,
    }
}

async fn run_connection(
    addr: SocketAddr,
    info_hash: [u8; 20],
    our_peer_id: [u8; 20],
    expected_peer_id: Option<[u8; 20]>,
    limits: ConnectionLimits,
    events: &mpsc::Sender<PeerEvent>,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) -> Result<(), PeerError> {
    info!("Connecting to peer: {}", addr);

    let mut stream = timeout(limits.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| PeerError::Timeout("connect"))?
        .map_err(|e| PeerError::ConnectionFailed {
            addr,
            reason: e.to_string(),
        })?;

    // Handshake goes out first, before anything else is written.
    let handshake = Handshake::new(info_hash, our_peer_id);
    stream.write_all(&handshake.encode()).await?;
    debug!("Sent handshake to {}", addr);

    let (remote_id, extra) = timeout(
        limits.handshake_timeout,
        await_handshake(&mut stream, addr, info_hash, expected_peer_id),
    )
    .await
    .map_err(|_| PeerError::Timeout("handshake"))??;

    info!("Handshake verified with peer: {}", addr);
    let _ = events
        .send(PeerEvent::Connected {
            addr,
            peer_id: remote_id,
        })
        .await;

    let (mut read_half, write_half) = stream.into_split();
    let mut writer = tokio::spawn(write_loop(write_half, outbound_rx, addr));

    // Bytes the peer pipelined behind its handshake are ordinary
    // protocol bytes and go through the demuxer first.
    let mut demux = StreamDemuxer::new();
    for message in demux.feed(&extra).map_err(PeerError::Protocol)? {
        let _ = events.send(PeerEvent::Message { addr, message }).await;
    }

    let mut buf = vec![0u8; 16 * 1024];
    loop {
        tokio::select! {
            // Writer finished means Close was processed and the queue
            // drained; stop reading.
            _ = &mut writer => return Ok(()),

            read = read_half.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    return Err(PeerError::ConnectionClosed);
                }
                let messages = demux.feed(&buf[..n]).map_err(PeerError::Protocol)?;
                for message in messages {
                    debug!("Received message from {}: {:?}", addr, message);
                    // Blocking here while the session is busy is
                    // backpressure on this one socket, nothing more.
                    let _ = events.send(PeerEvent::Message { addr, message }).await;
                }
            }
        }
    }
}

/// Read until the fixed 68-byte handshake is in hand and validate it.
/// Returns the remote peer id plus any trailing bytes that arrived in
/// the same segments. A peer whose first bytes are anything but a
/// handshake is a protocol violation.
async fn await_handshake(
    stream: &mut TcpStream,
    addr: SocketAddr,
    info_hash: [u8; 20],
    expected_peer_id: Option<[u8; 20]>,
) -> Result<([u8; 20], Vec<u8>), PeerError> {
    let mut received = Vec::with_capacity(HANDSHAKE_LEN);
    let mut buf = [0u8; 1024];

    while received.len() < HANDSHAKE_LEN {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(PeerError::ConnectionClosed);
        }
        received.extend_from_slice(&buf[..n]);
    }

    let (peer_handshake, extra) = Handshake::decode(&received).map_err(PeerError::Protocol)?;

    if peer_handshake.info_hash != info_hash {
        return Err(PeerError::HandshakeRejected(format!(
            "Info hash mismatch from {}",
            addr
        )));
    }

    if let Some(expected) = expected_peer_id {
        if peer_handshake.peer_id != expected {
            return Err(PeerError::HandshakeRejected(format!(
                "Peer id mismatch from {}",
                addr
            )));
        }
    }

    if !extra.is_empty() {
        debug!(
            "Peer {} pipelined {} bytes behind its handshake",
            addr,
            extra.len()
        );
    }

    Ok((peer_handshake.peer_id, extra.to_vec()))
}

/// Drain the outbound queue in strict FIFO order. On `Close`, or once
/// every sender is dropped, finish what is queued and shut the socket
/// down so no in-flight write is truncated.
async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    addr: SocketAddr,
) {
    while let Some(instruction) = outbound_rx.recv().await {
        match instruction {
            Outbound::Deliver(message) => {
                debug!("Sending message to {}: {:?}", addr, message);
                if let Err(e) = write_half.write_all(&message.encode()).await {
                    warn!("Write to {} failed: {}", addr, e);
                    return;
                }
            }
            Outbound::Close => break,
        }
    }

    if let Err(e) = write_half.shutdown().await {
        debug!("Shutdown of {} write half: {}", addr, e);
    }
}
