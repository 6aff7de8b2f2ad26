//! Command sequence number allocation.
//!
//! Command replies are correlated with their request by a single byte, so the
//! counter runs 0..=255 and wraps back to 0.  One counter exists per
//! connection and is advanced once per command request.

#[derive(Debug, Clone, Default)]
pub struct SequenceCounter {
    next: u8,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the current sequence number and advance the counter.
    pub fn next(&mut self) -> u8 {
        let sequence = self.next;
        self.next = self.next.wrapping_add(1);
        sequence
    }

    /// The number the next call to [`next`](Self::next) will hand out.
    pub fn peek(&self) -> u8 {
        self.next
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }
}
