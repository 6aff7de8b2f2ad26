//! Connection state of a [`crate::client::Client`].
//!
//! ```text
//!   DISCONNECTED ──any datagram from the server──▶ CONNECTED
//!        │                                              │
//!        │ retry budget spent / disconnect()            │ retry budget spent / disconnect()
//!        ▼                                              ▼
//!      CLOSED ◀─────────────────────────────────────────┘
//! ```
//!
//! BattlEye has no handshake at the transport level: the first datagram the
//! server sends is what makes the client connected.  `Closed` is terminal;
//! reconnecting takes a new client and a new socket.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Socket bound, nothing heard from the server yet.
    #[default]
    Disconnected,
    /// At least one datagram has arrived from the server.
    Connected,
    /// Torn down; the socket and resend timer are released.
    Closed,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
