//! RTSP session slots and the per-connection session state machine.
//!
//! The server keeps a fixed table of `max_clients` slots. A slot is claimed
//! when a connection is accepted and released when its handler exits.
//! Only three things in a slot are shared between the connection handler
//! and the stream pump, all behind the slot's mutex:
//!
//! - `connected`: the slot is owned by a live handler,
//! - `playing`: the pump should send media to this slot,
//! - the socket handle, `None` once closed.
//!
//! Everything else about the session ([`RtspSession`]) belongs to the
//! handler alone.
//!
//! ## Session lifecycle (RFC 2326 §A.1)
//!
//! ```text
//! accept        -> Init
//! SETUP         -> Ready
//! PLAY          -> Playing
//! TEARDOWN      -> Closed   (from any state)
//! socket error  -> Closed   (from any state)
//! ```

pub mod transport;

use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StreamError};
pub use transport::TransportHeader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no SETUP yet.
    Init,
    /// SETUP accepted; a session id has been assigned.
    Ready,
    /// PLAY accepted; the pump sends frames.
    Playing,
    /// TEARDOWN received or the socket failed.
    Closed,
}

/// Handler-private state of one RTSP session.
#[derive(Debug)]
pub struct RtspSession {
    /// Slot index in the [`SessionTable`].
    pub id: usize,
    pub peer_addr: SocketAddr,
    pub state: SessionState,
    pub cseq_last_seen: Option<String>,
    /// Assigned on the first successful SETUP.
    pub session_id: Option<u32>,
}

impl RtspSession {
    pub fn new(id: usize, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            state: SessionState::Init,
            cseq_last_seen: None,
            session_id: None,
        }
    }

    pub fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!(
                slot = self.id,
                from = ?self.state,
                to = ?next,
                "session state transition"
            );
            self.state = next;
        }
    }
}

#[derive(Debug, Default)]
struct SlotShared {
    connected: bool,
    playing: bool,
    socket: Option<TcpStream>,
    peer_addr: Option<SocketAddr>,
}

/// One entry of the session table.
#[derive(Debug)]
pub struct SessionSlot {
    index: usize,
    session_id: u32,
    shared: Mutex<SlotShared>,
}

impl SessionSlot {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Session id handed out by this slot. Stable for the slot's lifetime.
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    pub fn is_playing(&self) -> bool {
        let shared = self.shared.lock();
        shared.playing && shared.socket.is_some()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.lock().peer_addr
    }

    pub fn set_playing(&self, playing: bool) {
        let mut shared = self.shared.lock();
        if shared.socket.is_some() {
            shared.playing = playing;
        }
    }

    /// Write control traffic (an RTSP response) on the slot's socket.
    ///
    /// Fails with [`StreamError::SendFailed`] if the socket was already
    /// closed or the write fails; a failed write closes the socket.
    pub fn send_control(&self, bytes: &[u8]) -> Result<()> {
        let mut shared = self.shared.lock();
        let Some(socket) = shared.socket.as_mut() else {
            return Err(StreamError::SendFailed(io::ErrorKind::NotConnected.into()));
        };
        let result = io::Write::write_all(socket, bytes);
        if let Err(e) = result {
            Self::close_locked(&mut shared);
            return Err(StreamError::SendFailed(e));
        }
        Ok(())
    }

    /// Run `send` against the socket if this slot is playing.
    ///
    /// Returns `None` when the slot is not playing. On failure the slot is
    /// closed before the lock is released, so the handler's next read sees
    /// the closed socket and no later send can reach it.
    pub fn send_media<F>(&self, send: F) -> Option<Result<()>>
    where
        F: FnOnce(&mut TcpStream) -> io::Result<()>,
    {
        let mut shared = self.shared.lock();
        if !shared.playing {
            return None;
        }
        let socket = shared.socket.as_mut()?;
        match send(socket) {
            Ok(()) => Some(Ok(())),
            Err(e) => {
                Self::close_locked(&mut shared);
                Some(Err(StreamError::SendFailed(e)))
            }
        }
    }

    /// Shut the socket down and clear the handle. Idempotent.
    pub fn close(&self) {
        Self::close_locked(&mut self.shared.lock());
    }

    fn close_locked(shared: &mut SlotShared) {
        shared.playing = false;
        if let Some(socket) = shared.socket.take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }
}

/// Fixed-size table of session slots, shared by the accept loop, the
/// connection handlers and the pump.
#[derive(Clone)]
pub struct SessionTable {
    slots: Arc<[SessionSlot]>,
}

impl SessionTable {
    pub fn new(max_clients: usize) -> Self {
        let mut ids: Vec<u32> = Vec::with_capacity(max_clients);
        while ids.len() < max_clients {
            let id = rand::random::<u32>();
            if id != 0 && !ids.contains(&id) {
                ids.push(id);
            }
        }

        let slots = ids
            .into_iter()
            .enumerate()
            .map(|(index, session_id)| SessionSlot {
                index,
                session_id,
                shared: Mutex::new(SlotShared::default()),
            })
            .collect();
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> Option<&SessionSlot> {
        self.slots.get(index)
    }

    /// Slots in fixed index order.
    pub fn slots(&self) -> impl Iterator<Item = &SessionSlot> {
        self.slots.iter()
    }

    /// Claim the lowest free slot for a new connection.
    ///
    /// `socket` is the write half shared with the pump. The returned lease
    /// frees the slot when dropped.
    pub fn claim(&self, peer_addr: SocketAddr, socket: TcpStream) -> Result<SessionLease> {
        for slot in self.slots.iter() {
            let mut shared = slot.shared.lock();
            if !shared.connected {
                *shared = SlotShared {
                    connected: true,
                    playing: false,
                    socket: Some(socket),
                    peer_addr: Some(peer_addr),
                };
                tracing::debug!(slot = slot.index, %peer_addr, "session slot claimed");
                return Ok(SessionLease {
                    table: self.clone(),
                    index: slot.index,
                });
            }
        }
        Err(StreamError::SessionLimitReached {
            max: self.slots.len(),
        })
    }

    pub fn connected_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_connected()).count()
    }

    pub fn playing_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_playing()).count()
    }

    /// Close every client socket (server shutdown).
    pub fn close_all(&self) {
        for slot in self.slots.iter() {
            slot.close();
        }
    }

    fn release(&self, index: usize) {
        if let Some(slot) = self.slots.get(index) {
            let mut shared = slot.shared.lock();
            SessionSlot::close_locked(&mut shared);
            *shared = SlotShared::default();
            tracing::debug!(slot = index, "session slot released");
        }
    }
}

/// Ownership of a claimed slot; dropping it closes the socket and frees
/// the slot for the next connection.
pub struct SessionLease {
    table: SessionTable,
    index: usize,
}

impl SessionLease {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn slot(&self) -> &SessionSlot {
        &self.table.slots[self.index]
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.table.release(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    /// Connected (client, server) socket pair on loopback.
    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[test]
    fn slot_ids_are_distinct_and_stable() {
        let table = SessionTable::new(3);
        let ids: Vec<u32> = table.slots().map(|s| s.session_id()).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids[0] != ids[1] && ids[1] != ids[2] && ids[0] != ids[2]);

        let (_c, s) = socket_pair();
        let lease = table.claim(peer(), s).unwrap();
        assert_eq!(lease.slot().session_id(), ids[0]);
    }

    #[test]
    fn claim_refuses_beyond_capacity_and_recovers() {
        let table = SessionTable::new(2);
        let (_c1, s1) = socket_pair();
        let (_c2, s2) = socket_pair();
        let (_c3, s3) = socket_pair();
        let (_c4, s4) = socket_pair();

        let first = table.claim(peer(), s1).unwrap();
        let _second = table.claim(peer(), s2).unwrap();
        assert!(matches!(
            table.claim(peer(), s3),
            Err(StreamError::SessionLimitReached { max: 2 })
        ));

        drop(first);
        let third = table.claim(peer(), s4).unwrap();
        assert_eq!(third.index(), 0, "lowest free slot is reused");
        assert_eq!(table.connected_count(), 2);
    }

    #[test]
    fn media_only_reaches_playing_slots() {
        let table = SessionTable::new(1);
        let (_c, s) = socket_pair();
        let lease = table.claim(peer(), s).unwrap();

        assert!(lease.slot().send_media(|_| Ok(())).is_none());
        lease.slot().set_playing(true);
        assert!(matches!(lease.slot().send_media(|_| Ok(())), Some(Ok(()))));
        assert_eq!(table.playing_count(), 1);
    }

    #[test]
    fn failed_media_send_closes_slot_once() {
        let table = SessionTable::new(1);
        let (mut client, server) = socket_pair();
        let lease = table.claim(peer(), server).unwrap();
        lease.slot().set_playing(true);

        let result = lease
            .slot()
            .send_media(|_| Err(io::ErrorKind::BrokenPipe.into()));
        assert!(matches!(result, Some(Err(StreamError::SendFailed(_)))));
        assert!(!lease.slot().is_playing());
        assert!(lease.slot().is_connected(), "handler still owns the slot");
        assert!(lease.slot().send_control(b"x").is_err());

        // The peer observes the shutdown.
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap(), 0);

        // Closing again is harmless.
        lease.slot().close();
    }

    #[test]
    fn set_playing_ignored_after_close() {
        let table = SessionTable::new(1);
        let (_c, s) = socket_pair();
        let lease = table.claim(peer(), s).unwrap();
        lease.slot().close();
        lease.slot().set_playing(true);
        assert!(!lease.slot().is_playing());
    }
}
