//! Session Registry
//!
//! Fixed-size slot table mapping connections to player identities. The
//! registry owns the slot-to-connection mapping and nothing else - no
//! simulation state lives here, and its side effects are observable only
//! as protocol messages sent through the handles it stores.
//!
//! Slots are an arena of exactly `MAX_PLAYERS` entries with explicit
//! occupancy; capacity is a hard invariant, so nothing here grows.

use std::net::SocketAddr;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::network::protocol::Packet;
use crate::MAX_PLAYERS;

/// Outbound queue depth per client. A client that falls further behind
/// than this starts losing snapshots rather than stalling the server.
pub const CLIENT_CHANNEL_CAPACITY: usize = 64;

/// Admission failures.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Every slot is bound; the connection must be turned away.
    #[error("all {MAX_PLAYERS} player slots are bound")]
    RosterFull,
}

/// The registry's view of one connection: where to send packets, and who
/// the peer is for logging.
#[derive(Clone, Debug)]
pub struct ClientHandle {
    /// Outbound packet queue, drained by the connection's writer task.
    pub sender: mpsc::Sender<Packet>,
    /// Peer address.
    pub addr: SocketAddr,
}

/// Slot table for the match roster.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    slots: [Option<ClientHandle>; MAX_PLAYERS],
}

impl SessionRegistry {
    /// Empty registry, all slots free.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a connection to the lowest free slot.
    pub fn admit(&mut self, handle: ClientHandle) -> Result<usize, RegistryError> {
        let slot = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(RegistryError::RosterFull)?;
        debug!(slot, addr = %handle.addr, "client bound to slot");
        self.slots[slot] = Some(handle);
        Ok(slot)
    }

    /// Free a slot. Dropping the stored handle closes the client's
    /// outbound queue, which ends its writer task and with it the
    /// connection. Other slots are never reassigned. Returns whether the
    /// slot was bound.
    pub fn release(&mut self, slot: usize) -> bool {
        match self.slots.get_mut(slot) {
            Some(entry) => {
                let was_bound = entry.take().is_some();
                if was_bound {
                    debug!(slot, "slot released");
                }
                was_bound
            }
            None => false,
        }
    }

    /// Number of bound slots.
    pub fn count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether a slot currently has a connection.
    pub fn is_bound(&self, slot: usize) -> bool {
        self.slots.get(slot).is_some_and(|s| s.is_some())
    }

    /// Queue a packet to one slot without blocking. A full queue drops the
    /// packet for that client; a closed queue is left for the reader side
    /// to notice and release.
    pub fn send_to(&self, slot: usize, packet: Packet) {
        let Some(handle) = self.slots.get(slot).and_then(|s| s.as_ref()) else {
            return;
        };
        match handle.sender.try_send(packet) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(slot, "client outbound queue full, dropping packet");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(slot, "client outbound queue closed");
            }
        }
    }

    /// Queue a packet to every bound slot without blocking.
    pub fn broadcast(&self, packet: &Packet) {
        for slot in 0..MAX_PLAYERS {
            if self.is_bound(slot) {
                self.send_to(slot, packet.clone());
            }
        }
    }

    /// Clone out the bound senders, for fan-out after the world lock has
    /// been released.
    pub fn senders(&self) -> Vec<(usize, mpsc::Sender<Packet>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_ref().map(|h| (slot, h.sender.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ClientHandle, mpsc::Receiver<Packet>) {
        let (tx, rx) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
        (
            ClientHandle {
                sender: tx,
                addr: "127.0.0.1:40000".parse().unwrap(),
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_admit_assigns_lowest_free_slot() {
        let mut registry = SessionRegistry::new();
        let (h0, _rx0) = handle();
        let (h1, _rx1) = handle();

        assert_eq!(registry.admit(h0).unwrap(), 0);
        assert_eq!(registry.admit(h1).unwrap(), 1);
        assert_eq!(registry.count(), 2);
    }

    #[tokio::test]
    async fn test_admit_rejects_when_full() {
        let mut registry = SessionRegistry::new();
        for _ in 0..MAX_PLAYERS {
            let (h, _rx) = handle();
            registry.admit(h).unwrap();
        }

        let (extra, _rx) = handle();
        assert!(matches!(
            registry.admit(extra),
            Err(RegistryError::RosterFull)
        ));
    }

    #[tokio::test]
    async fn test_release_frees_only_that_slot() {
        let mut registry = SessionRegistry::new();
        let (h0, _rx0) = handle();
        let (h1, _rx1) = handle();
        registry.admit(h0).unwrap();
        registry.admit(h1).unwrap();

        assert!(registry.release(0));
        assert!(!registry.release(0));
        assert!(!registry.release(99));
        assert!(!registry.is_bound(0));
        assert!(registry.is_bound(1));
        assert_eq!(registry.count(), 1);

        // The freed slot is the next one handed out.
        let (h2, _rx2) = handle();
        assert_eq!(registry.admit(h2).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_bound_slot() {
        let mut registry = SessionRegistry::new();
        let (h0, mut rx0) = handle();
        let (h1, mut rx1) = handle();
        registry.admit(h0).unwrap();
        registry.admit(h1).unwrap();

        registry.broadcast(&Packet::WaitingStatus(2));

        assert_eq!(rx0.recv().await.unwrap(), Packet::WaitingStatus(2));
        assert_eq!(rx1.recv().await.unwrap(), Packet::WaitingStatus(2));
    }

    #[tokio::test]
    async fn test_slow_client_drops_instead_of_blocking() {
        let mut registry = SessionRegistry::new();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let slow = ClientHandle {
            sender: slow_tx,
            addr: "127.0.0.1:40001".parse().unwrap(),
        };
        let (fast, mut fast_rx) = handle();
        registry.admit(slow).unwrap();
        registry.admit(fast).unwrap();

        registry.broadcast(&Packet::WaitingStatus(1));
        registry.broadcast(&Packet::WaitingStatus(2));

        // The slow client kept only the first message; the fast one got both.
        assert_eq!(slow_rx.recv().await.unwrap(), Packet::WaitingStatus(1));
        assert_eq!(fast_rx.recv().await.unwrap(), Packet::WaitingStatus(1));
        assert_eq!(fast_rx.recv().await.unwrap(), Packet::WaitingStatus(2));
    }
}
