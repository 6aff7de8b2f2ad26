//! In-flight request cache.
//!
//! Every login or command request sent with caching enabled waits here until
//! its reply is correlated, the retry budget runs out, or the client
//! disconnects.  Entries are kept in send order: login replies carry no
//! identifier and are matched first-in first-out.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use tokio::sync::oneshot;

use crate::client::{ClientError, Delivery};
use crate::packet::{Packet, PacketSubType, PacketType};

/// One-shot continuation resolved with the reply or a terminal error.
pub type Responder = oneshot::Sender<Result<Delivery, ClientError>>;

/// A sent request awaiting its reply.
#[derive(Debug)]
pub struct PendingRequest {
    /// Monotonic submission index, unique for the lifetime of a client.
    pub id: u64,
    /// The request exactly as first sent; retransmitted unmodified.
    pub packet: Packet,
    /// Bytes written by the original transmission.
    pub bytes_sent: usize,
    responder: Responder,
}

impl PendingRequest {
    /// Resolve the caller's continuation.  A caller that stopped waiting is
    /// not an error.
    pub fn resolve(self, result: Result<Delivery, ClientError>) {
        let _ = self.responder.send(result);
    }

    /// Resolve with a successful reply.
    pub fn complete(self, reply: Packet) {
        let bytes_sent = self.bytes_sent;
        self.resolve(Ok(Delivery {
            reply: Some(reply),
            bytes_sent,
        }));
    }

    fn is_command(&self, sequence: u8) -> bool {
        self.packet.packet_type == PacketType::Command && self.packet.sequence() == Some(sequence)
    }
}

#[derive(Debug, Default)]
pub struct PendingCache {
    entries: Vec<PendingRequest>,
    next_id: u64,
}

impl PendingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a request, returning its submission id.
    pub fn push(&mut self, packet: Packet, bytes_sent: usize, responder: Responder) -> u64 {
        debug_assert_eq!(packet.sub_type, PacketSubType::Request);
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(PendingRequest {
            id,
            packet,
            bytes_sent,
            responder,
        });
        id
    }

    /// True if a command with `sequence` is still waiting for its reply.
    pub fn has_command(&self, sequence: u8) -> bool {
        self.entries.iter().any(|e| e.is_command(sequence))
    }

    /// Remove and return the oldest pending login.
    pub fn take_login(&mut self) -> Option<PendingRequest> {
        let index = self
            .entries
            .iter()
            .position(|e| e.packet.packet_type == PacketType::Login)?;
        Some(self.entries.remove(index))
    }

    /// Remove and return the pending command with `sequence`.
    pub fn take_command(&mut self, sequence: u8) -> Option<PendingRequest> {
        let index = self.entries.iter().position(|e| e.is_command(sequence))?;
        Some(self.entries.remove(index))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PendingRequest> {
        self.entries.iter_mut()
    }

    /// Empty the cache, yielding every entry in send order.
    pub fn drain(&mut self) -> impl Iterator<Item = PendingRequest> + '_ {
        self.entries.drain(..)
    }
}
