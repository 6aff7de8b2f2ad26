//! `battleye-rcon`: a client for the BattlEye RCon protocol used to
//! administer ARMA-family game servers.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │  login / command / heartbeat
//!  ┌───▼──────────────────────────────┐
//!  │            Session               │  sequence numbers, login flag
//!  └───┬──────────────────────────────┘
//!      │  send(packet) → reply
//!  ┌───▼──────────────────────────────┐      ┌────────────────────┐
//!  │             Client               │─────▶│ Connection/Message │
//!  │ (event loop: correlation, resend │      │     listeners      │
//!  │  sweep, acknowledgements)        │      └────────────────────┘
//!  └───┬──────────────────────────────┘
//!      │ raw UDP datagrams
//!  ┌───▼──────┐
//!  │  Socket  │  (thin async wrapper around tokio UdpSocket)
//!  └──────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]: wire format (serialise / deserialise, CRC-32)
//! - [`client`]: transport: request/reply correlation and retries
//! - [`pending`]: in-flight request cache
//! - [`split`]: multipart command reply reassembly
//! - [`timer`]: resend schedule and configuration
//! - [`listener`]: connection and message observers
//! - [`sequence`]: command sequence numbers
//! - [`session`]: login / command / heartbeat convenience layer
//! - [`state`]: connection state type
//! - [`socket`]: async UDP socket abstraction

pub mod client;
pub mod listener;
pub mod packet;
pub mod pending;
pub mod sequence;
pub mod session;
pub mod socket;
pub mod split;
pub mod state;
pub mod timer;

pub use client::{Client, ClientError, ClientStats, Delivery};
pub use listener::{ConnectionListener, MessageListener};
pub use packet::{Packet, PacketError, PacketSubType, PacketType};
pub use session::{Session, SessionError};
pub use timer::{ConfigError, ResendConfig};
