//! Multipart command reply reassembly.
//!
//! Command output larger than one datagram arrives as several
//! [`PacketSubType::SplitReply`] fragments sharing the request's sequence
//! number, each tagged with the fragment count and its own index.  Fragments
//! may arrive in any order and may be duplicated.  Once every index has been
//! seen the bytes are joined in index order and handed back as a single
//! ordinary command reply.

use std::collections::HashMap;

use crate::packet::{attr, Attributes, Packet, PacketSubType, PacketType};

#[derive(Debug)]
struct Partial {
    fragments: Vec<Option<Vec<u8>>>,
    received: usize,
}

impl Partial {
    fn new(count: u8) -> Self {
        Self {
            fragments: vec![None; count as usize],
            received: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.received == self.fragments.len()
    }
}

/// Fragment buffers for every sequence number with a reply in progress.
#[derive(Debug, Default)]
pub struct SplitReassembler {
    partials: HashMap<u8, Partial>,
}

impl SplitReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sequences with fragments still outstanding.
    pub fn in_progress(&self) -> usize {
        self.partials.len()
    }

    /// Feed one decoded fragment.  Returns the assembled command reply once
    /// the last missing fragment arrives.
    ///
    /// A fragment whose count disagrees with earlier fragments of the same
    /// sequence restarts that sequence's buffer.
    pub fn push(&mut self, fragment: &Packet) -> Option<Packet> {
        let sequence = fragment.sequence()?;
        let count = fragment.attributes.byte(attr::FRAGMENT_COUNT)?;
        let index = fragment.attributes.byte(attr::FRAGMENT_INDEX)?;
        let data = fragment.attributes.bytes(attr::DATA).unwrap_or_default();
        if index >= count {
            return None;
        }

        let partial = self
            .partials
            .entry(sequence)
            .or_insert_with(|| Partial::new(count));
        if partial.fragments.len() != count as usize {
            log::warn!(
                "[rcon] seq={sequence} fragment count changed {} -> {count}; restarting",
                partial.fragments.len()
            );
            *partial = Partial::new(count);
        }

        let slot = &mut partial.fragments[index as usize];
        if slot.is_none() {
            *slot = Some(data.to_vec());
            partial.received += 1;
        }
        log::debug!(
            "[rcon] seq={sequence} fragment {}/{count} ({} bytes)",
            index + 1,
            data.len()
        );

        if !partial.is_complete() {
            return None;
        }

        let partial = self.partials.remove(&sequence)?;
        let joined: Vec<u8> = partial.fragments.into_iter().flatten().flatten().collect();

        let mut attributes = Attributes::new();
        attributes.set(attr::SEQUENCE, sequence);
        attributes.set(attr::DATA, String::from_utf8_lossy(&joined).into_owned());
        Some(Packet::new(PacketType::Command, PacketSubType::Reply, attributes))
    }

    /// Drop any partial reply for `sequence`.
    pub fn discard(&mut self, sequence: u8) {
        self.partials.remove(&sequence);
    }

    pub fn clear(&mut self) {
        self.partials.clear();
    }
}
