use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{DrizzleError, PieceError, Result};
use crate::peer::{
    spawn_connection, BlockInfo, ConnectionLimits, Message, Peer, PeerEvent, PeerHandle,
};
use crate::piece::{PieceStore, BLOCK_SIZE};
use crate::storage::Storage;
use crate::tracker::TrackerPeer;

/// Capacity of the connection→session event channel. A full channel
/// blocks that connection's reader, which is acceptable backpressure.
const EVENT_CHANNEL_CAPACITY: usize = 64;

struct PeerEntry {
    peer: Peer,
    handle: PeerHandle,
}

/// Owns the swarm for one download: the connected peers, the piece
/// store, and the request scheduler.
///
/// All mutation of shared state (piece assignment, peer bookkeeping,
/// hash verification) happens on the single event loop in `run`; the
/// per-connection tasks only move bytes. That loop is the one
/// serialization point the concurrency model requires.
pub struct Session {
    info_hash: [u8; 20],
    our_peer_id: [u8; 20],
    limits: ConnectionLimits,
    store: PieceStore,
    storage: Storage,
    peers: HashMap<SocketAddr, PeerEntry>,
    /// Connection tasks spawned and not yet reported Disconnected
    live_connections: usize,
    /// Offset mismatches, overflows and unrequested pieces observed.
    /// These can mean a misbehaving peer or a local scheduling bug, so
    /// they are counted rather than discarded.
    violations: u64,
    events_tx: mpsc::Sender<PeerEvent>,
    events_rx: mpsc::Receiver<PeerEvent>,
}

impl Session {
    pub fn new(
        info_hash: [u8; 20],
        our_peer_id: [u8; 20],
        store: PieceStore,
        storage: Storage,
        limits: ConnectionLimits,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            info_hash,
            our_peer_id,
            limits,
            store,
            storage,
            peers: HashMap::new(),
            live_connections: 0,
            violations: 0,
            events_tx,
            events_rx,
        }
    }

    pub fn violation_count(&self) -> u64 {
        self.violations
    }

    /// Download until every piece is verified, then write the target
    /// file. Individual peers failing is routine; the session only
    /// errors when no peer remains to make progress.
    pub async fn run(&mut self, candidates: Vec<TrackerPeer>) -> Result<()> {
        self.connect_candidates(candidates);

        while !self.store.is_complete() {
            if self.live_connections == 0 {
                return Err(DrizzleError::SessionAborted(format!(
                    "No peers remain with {}/{} pieces complete",
                    self.store.complete_count(),
                    self.store.piece_count()
                )));
            }

            // recv cannot return None here: we hold a sender ourselves.
            let Some(event) = self.events_rx.recv().await else {
                break;
            };
            self.handle_event(event);
        }

        info!("All {} pieces complete", self.store.piece_count());
        self.shutdown_peers().await;
        self.storage.write_out(&self.store).await?;

        if self.violations > 0 {
            warn!("Session finished with {} invariant violations", self.violations);
        }

        Ok(())
    }

    /// Try every tracker candidate; refused or timed-out connections
    /// just fall out of the swarm via their Disconnected event.
    fn connect_candidates(&mut self, candidates: Vec<TrackerPeer>) {
        for candidate in candidates {
            let expected_peer_id = candidate.peer_id_bytes();
            if expected_peer_id == Some(self.our_peer_id) {
                debug!("Skipping our own address in the tracker list");
                continue;
            }
            if self.peers.contains_key(&candidate.addr) {
                continue;
            }

            let handle = spawn_connection(
                candidate.addr,
                self.info_hash,
                self.our_peer_id,
                expected_peer_id,
                self.limits,
                self.events_tx.clone(),
            );

            self.live_connections += 1;
            self.peers.insert(
                candidate.addr,
                PeerEntry {
                    peer: Peer::new(candidate.addr),
                    handle,
                },
            );
        }
    }

    fn handle_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Connected { addr, peer_id } => {
                if let Some(entry) = self.peers.get_mut(&addr) {
                    entry.peer.hands_shook = true;
                    entry.peer.peer_id = Some(peer_id);
                    // The peer starts out choking us; asking to be
                    // unchoked is all we may do.
                    entry.peer.state.am_interested = true;
                    entry.handle.send(Message::Interested);
                }
            }
            PeerEvent::Message { addr, message } => self.handle_message(addr, message),
            PeerEvent::Disconnected { addr, reason } => {
                self.live_connections = self.live_connections.saturating_sub(1);
                if let Some(entry) = self.peers.remove(&addr) {
                    info!("Peer {} disconnected: {}", addr, reason);
                    self.release_assignment(entry.peer.assigned_piece);
                    self.reschedule();
                }
            }
        }
    }

    /// Per-message-type handlers. Runs on the event loop, so peer
    /// fields and the piece store never race.
    fn handle_message(&mut self, addr: SocketAddr, message: Message) {
        let Some(entry) = self.peers.get_mut(&addr) else {
            return;
        };

        match message {
            Message::KeepAlive => {}
            Message::Choke => {
                entry.peer.state.peer_choking = true;
                // Express interest and sit tight; requesting anything
                // from a choking peer is a protocol violation.
                entry.peer.state.am_interested = true;
                entry.handle.send(Message::Interested);
            }
            Message::Unchoke => {
                entry.peer.state.peer_choking = false;
                match entry.peer.assigned_piece {
                    // Resume the piece this peer was already working on
                    Some(index) => self.request_next_range(addr, index),
                    None => self.try_assign(addr),
                }
            }
            Message::Interested => entry.peer.state.peer_interested = true,
            Message::NotInterested => entry.peer.state.peer_interested = false,
            Message::Have { piece_index } => {
                entry.peer.record_have(piece_index);
                if !entry.peer.state.peer_choking && entry.peer.assigned_piece.is_none() {
                    self.try_assign(addr);
                }
            }
            Message::Bitfield { bits } => {
                let num_pieces = self.store.piece_count() as u32;
                if let Err(err) = entry.peer.apply_bitfield(&bits, num_pieces) {
                    // The declared piece set is garbage from here on;
                    // the connection has to go.
                    warn!("Dropping peer {}: {}", addr, err);
                    self.drop_peer(addr);
                }
            }
            Message::Request { block } => {
                // We do not seed; accepted and ignored by policy.
                debug!("Ignoring request from {} for piece {}", addr, block.index);
            }
            Message::Piece {
                index,
                begin,
                block,
            } => self.handle_block(addr, index, begin, block),
        }
    }

    fn handle_block(&mut self, addr: SocketAddr, index: u32, begin: u32, block: Vec<u8>) {
        let assigned = self
            .peers
            .get(&addr)
            .and_then(|entry| entry.peer.assigned_piece);

        if assigned != Some(index) {
            warn!(
                "Peer {} sent unrequested piece {} (assigned: {:?})",
                addr, index, assigned
            );
            self.violations += 1;
            self.drop_peer(addr);
            return;
        }

        match self.store.download(index, begin as usize, &block) {
            Ok(()) => {
                let complete = self
                    .store
                    .piece(index)
                    .map(|p| p.is_complete())
                    .unwrap_or(false);

                if complete {
                    debug!("Piece {} complete via {}", index, addr);
                    if let Some(entry) = self.peers.get_mut(&addr) {
                        entry.peer.assigned_piece = None;
                    }
                    self.try_assign(addr);
                } else {
                    self.request_next_range(addr, index);
                }
            }
            Err(PieceError::HashMismatch { index }) => {
                // Bad data, not necessarily a bad peer: the piece goes
                // back in the pool and the peer keeps its connection.
                warn!("Piece {} from {} failed verification", index, addr);
                if let Ok(piece) = self.store.piece_mut(index) {
                    piece.reset();
                }
                if let Some(entry) = self.peers.get_mut(&addr) {
                    entry.peer.assigned_piece = None;
                }
                self.reschedule();
            }
            Err(err) => {
                // Offset mismatch, overflow: either the peer is lying
                // or our scheduler is broken. Count it either way.
                warn!("Invariant violation from {}: {}", addr, err);
                self.violations += 1;
                self.drop_peer(addr);
            }
        }
    }

    /// Scheduling step: give an idle, unchoked peer the lowest-index
    /// pending piece it has, and fire the first request.
    fn try_assign(&mut self, addr: SocketAddr) {
        let Some(entry) = self.peers.get_mut(&addr) else {
            return;
        };

        if entry.peer.state.peer_choking
            || !entry.peer.hands_shook
            || entry.peer.assigned_piece.is_some()
        {
            return;
        }

        let Some(index) = self.store.next_pending_for(&entry.peer.has_pieces) else {
            return;
        };

        if let Ok(piece) = self.store.piece_mut(index) {
            piece.mark_in_flight();
        }
        if let Some(entry) = self.peers.get_mut(&addr) {
            entry.peer.assigned_piece = Some(index);
        }
        debug!("Assigned piece {} to {}", index, addr);
        self.request_next_range(addr, index);
    }

    /// Request the next unfetched byte range of `index` from `addr`.
    fn request_next_range(&mut self, addr: SocketAddr, index: u32) {
        let Some(range) = self.store.piece(index).and_then(|p| p.next_range(BLOCK_SIZE)) else {
            return;
        };

        if let Some(entry) = self.peers.get(&addr) {
            entry.handle.send(Message::Request {
                block: BlockInfo::new(index, range.0, range.1),
            });
        }
    }

    /// Hand every idle unchoked peer a new assignment. Called whenever
    /// a piece returns to the pool so nothing stalls waiting for a
    /// message that will never come.
    fn reschedule(&mut self) {
        let idle: Vec<SocketAddr> = self
            .peers
            .iter()
            .filter(|(_, e)| {
                e.peer.hands_shook
                    && !e.peer.state.peer_choking
                    && e.peer.assigned_piece.is_none()
            })
            .map(|(addr, _)| *addr)
            .collect();

        for addr in idle {
            self.try_assign(addr);
        }
    }

    /// A piece whose peer went away goes back to Pending; bytes already
    /// received stay, since the next peer continues from that offset.
    fn release_assignment(&mut self, assignment: Option<u32>) {
        if let Some(index) = assignment {
            if let Ok(piece) = self.store.piece_mut(index) {
                piece.release();
            }
        }
    }

    fn drop_peer(&mut self, addr: SocketAddr) {
        let assignment = match self.peers.get_mut(&addr) {
            Some(entry) => {
                // Stop accepting outbound work, drain, then tear down;
                // the task's Disconnected event finishes the
                // bookkeeping. Taking the assignment now keeps the
                // later Disconnected event from releasing a piece that
                // has since been handed to another peer.
                entry.handle.close();
                entry.peer.assigned_piece.take()
            }
            None => None,
        };
        self.release_assignment(assignment);
        self.reschedule();
    }

    /// Close every connection, letting each outbound queue drain
    /// before its socket goes down.
    async fn shutdown_peers(&mut self) {
        // Connection tasks must not block reporting events we will
        // never read.
        self.events_rx.close();

        for entry in self.peers.values() {
            entry.handle.close();
        }

        for (_, entry) in self.peers.drain() {
            let _ = entry.handle.task.await;
        }
    }
}
