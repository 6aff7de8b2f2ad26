//! BattlEye RCon transport: request/reply messaging over one UDP socket.
//!
//! # Architecture
//!
//! ```text
//!  Client (cloneable handle)                  event loop task
//!  ┌──────────────────────┐   Request    ┌───────────────────────────────┐
//!  │ send / disconnect    │─────────────▶│ PendingCache   (in flight)    │
//!  │ stats / listeners    │   mpsc       │ SplitReassembler              │
//!  └──────────▲───────────┘              │ Socket  ◀──── datagrams ────▶ │ server
//!             │ oneshot per request      │ resend sweep (interval)       │
//!             └──────────────────────────┴───────────────────────────────┘
//! ```
//!
//! The event loop is the only code that touches the pending cache, so inbound
//! datagrams, caller requests and the resend sweep are serialised by
//! construction.  Each request's caller waits on a `oneshot` that is resolved
//! exactly once: with the correlated reply, or with the error that ended the
//! connection.
//!
//! # Correlation
//!
//! - Login replies resolve the oldest pending login.
//! - Command replies resolve the pending command with the same sequence byte.
//!   Multipart replies are reassembled first (see [`crate::split`]).
//! - Server messages go to every [`MessageListener`] and are acknowledged.
//!
//! Anything else is logged as unexpected and ignored.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

use crate::listener::{ConnectionListener, ListenerRegistry, MessageListener};
use crate::packet::{attr, Packet, PacketError, PacketSubType, PacketType};
use crate::pending::{PendingCache, Responder};
use crate::socket::{Socket, MAX_DATAGRAM};
use crate::split::SplitReassembler;
use crate::state::ConnectionState;
use crate::timer::{ConfigError, ResendAction, ResendConfig};

/// Reason used when a disconnect is requested without one.
pub const DEFAULT_DISCONNECT_REASON: &str = "Disconnected.";
/// Reason used when the retry budget runs out after the server was heard from.
pub const CONNECTION_LOST: &str = "Connection lost!";
/// Reason used when the retry budget runs out before the server ever answered.
pub const CONNECTION_FAILED: &str = "Connection failed!";

const REQUEST_QUEUE: usize = 64;
/// Consecutive socket receive errors tolerated before the connection is torn
/// down.
const MAX_RECV_ERRORS: u32 = 8;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Outcome of a successful [`Client::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// The correlated reply; `None` for fire-and-forget sends.
    pub reply: Option<Packet>,
    /// Bytes written by the original transmission.
    pub bytes_sent: usize,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("invalid resend configuration: {0}")]
    Config(#[from] ConfigError),
    /// The connection is gone; carries the disconnect reason.
    #[error("{0}")]
    Disconnected(String),
    #[error("sequence number {0} is already awaiting a reply")]
    SequenceInUse(u8),
    #[error("packet was sent without waiting for a reply")]
    NoReply,
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Traffic counters of one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub corrupted_packets_received: u64,
}

// ---------------------------------------------------------------------------
// Shared state (handle ⇄ event loop)
// ---------------------------------------------------------------------------

enum Request {
    Send {
        packet: Packet,
        cache: bool,
        respond: Responder,
    },
    Disconnect {
        reason: String,
        done: oneshot::Sender<()>,
    },
}

#[derive(Default)]
struct Shared {
    state: Mutex<ConnectionState>,
    close_reason: Mutex<Option<String>>,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    corrupted_packets_received: AtomicU64,
    pending: AtomicUsize,
    connection_listeners: ListenerRegistry<dyn ConnectionListener>,
    message_listeners: ListenerRegistry<dyn MessageListener>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ConnectionState) -> ConnectionState {
        std::mem::replace(&mut *lock(&self.state), state)
    }

    fn closed_error(&self) -> ClientError {
        let reason = lock(&self.close_reason)
            .clone()
            .unwrap_or_else(|| DEFAULT_DISCONNECT_REASON.to_string());
        ClientError::Disconnected(reason)
    }
}

fn normalize_reason(reason: Option<&str>) -> String {
    match reason.map(str::trim) {
        Some(r) if !r.is_empty() => r.to_string(),
        _ => DEFAULT_DISCONNECT_REASON.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Client handle
// ---------------------------------------------------------------------------

/// Handle to one BattlEye connection.
///
/// Cloning is cheap; all clones drive the same socket.  The connection is
/// torn down by [`Client::disconnect`], by retry exhaustion, or when the last
/// handle is dropped.
#[derive(Clone)]
pub struct Client {
    requests: mpsc::Sender<Request>,
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state())
            .finish()
    }
}

impl Client {
    /// Bind a socket for `remote_addr` and start the event loop with its
    /// resend sweep.  No datagram is sent.
    ///
    /// Fails with [`ClientError::Config`] before binding if `config` has a
    /// zero interval.  Must be called from within a tokio runtime.
    pub async fn bind(remote_addr: SocketAddr, config: ResendConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let socket = Socket::bind(remote_addr).await?;
        let local_addr = socket.local_addr;
        let shared = Arc::new(Shared::default());
        let (requests, request_rx) = mpsc::channel(REQUEST_QUEUE);

        log::debug!("[rcon] bound {local_addr} for server {remote_addr}");

        let event_loop = EventLoop {
            socket,
            config,
            shared: Arc::clone(&shared),
            pending: PendingCache::new(),
            split: SplitReassembler::new(),
            recv_errors: RecvErrors::default(),
        };
        tokio::spawn(event_loop.run(request_rx));

        Ok(Self {
            requests,
            shared,
            local_addr,
            remote_addr,
        })
    }

    /// Send `packet` and wait for the outcome.
    ///
    /// With `cache == true` a login or command request is kept until its
    /// reply arrives and is returned in [`Delivery::reply`].  Anything else
    /// (acknowledgements, `cache == false`) resolves as soon as the datagram
    /// is written.
    ///
    /// Fails with [`ClientError::Packet`] for packets that cannot be encoded,
    /// before any I/O, and with [`ClientError::Disconnected`] if the
    /// connection ends while the request is pending.
    pub async fn send(&self, packet: Packet, cache: bool) -> Result<Delivery, ClientError> {
        let (respond, response) = oneshot::channel();
        let request = Request::Send {
            packet,
            cache,
            respond,
        };
        if self.requests.send(request).await.is_err() {
            return Err(self.shared.closed_error());
        }
        response.await.unwrap_or_else(|_| Err(self.shared.closed_error()))
    }

    /// Send a cached request and return its reply.
    pub async fn request(&self, packet: Packet) -> Result<Packet, ClientError> {
        self.send(packet, true).await?.reply.ok_or(ClientError::NoReply)
    }

    /// Tear the connection down: stop the resend sweep, close the socket,
    /// fail every pending request with `reason`, and notify connection
    /// listeners.  Returns once that has happened.  Calling it again, or on
    /// a connection that already ended, does nothing.
    pub async fn disconnect(&self, reason: Option<&str>) {
        let (done, finished) = oneshot::channel();
        let request = Request::Disconnect {
            reason: normalize_reason(reason),
            done,
        };
        if self.requests.send(request).await.is_ok() {
            let _ = finished.await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Why the connection ended, once it has.
    pub fn close_reason(&self) -> Option<String> {
        lock(&self.shared.close_reason).clone()
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            packets_sent: self.shared.packets_sent.load(Ordering::Relaxed),
            packets_received: self.shared.packets_received.load(Ordering::Relaxed),
            corrupted_packets_received: self.shared.corrupted_packets_received.load(Ordering::Relaxed),
        }
    }

    /// Requests currently awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.load(Ordering::Relaxed)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn connection_listeners(&self) -> &ListenerRegistry<dyn ConnectionListener> {
        &self.shared.connection_listeners
    }

    pub fn message_listeners(&self) -> &ListenerRegistry<dyn MessageListener> {
        &self.shared.message_listeners
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

struct EventLoop {
    socket: Socket,
    config: ResendConfig,
    shared: Arc<Shared>,
    pending: PendingCache,
    split: SplitReassembler,
    recv_errors: RecvErrors,
}

/// Run of consecutive socket receive failures.
#[derive(Debug, Default)]
struct RecvErrors {
    consecutive: u32,
}

impl RecvErrors {
    fn succeeded(&mut self) {
        self.consecutive = 0;
    }

    /// Record a failure.  Returns a disconnect reason once
    /// [`MAX_RECV_ERRORS`] failures have happened in a row.
    fn failed(&mut self, error: &std::io::Error) -> Option<String> {
        self.consecutive += 1;
        log::warn!(
            "[rcon] receive failed ({}/{MAX_RECV_ERRORS}): {error}",
            self.consecutive
        );
        (self.consecutive >= MAX_RECV_ERRORS).then(|| format!("Receive failed: {error}"))
    }
}

impl EventLoop {
    async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut waiters = Vec::new();

        let reason = loop {
            tokio::select! {
                // ── Branch 1: caller requests ────────────────────────────────
                request = requests.recv() => match request {
                    // Every handle is gone.
                    None => break DEFAULT_DISCONNECT_REASON.to_string(),
                    Some(Request::Send { packet, cache, respond }) => {
                        if let Err(reason) = self.send(packet, cache, respond).await {
                            break reason;
                        }
                    }
                    Some(Request::Disconnect { reason, done }) => {
                        waiters.push(done);
                        break reason;
                    }
                },

                // ── Branch 2: inbound datagram ───────────────────────────────
                result = self.socket.recv(&mut buf) => match result {
                    Ok(n) => {
                        self.recv_errors.succeeded();
                        self.receive(&buf[..n]).await;
                    }
                    Err(e) => {
                        if let Some(reason) = self.recv_errors.failed(&e) {
                            break reason;
                        }
                    }
                },

                // ── Branch 3: resend sweep ───────────────────────────────────
                _ = sweep.tick() => {
                    if let Some(reason) = self.sweep().await {
                        break reason;
                    }
                }
            }
        };

        drop(sweep);
        self.shutdown(&reason);

        // Resolve whatever was queued behind the request that ended the loop.
        requests.close();
        while let Ok(request) = requests.try_recv() {
            match request {
                Request::Send { respond, .. } => {
                    let _ = respond.send(Err(ClientError::Disconnected(reason.clone())));
                }
                Request::Disconnect { done, .. } => waiters.push(done),
            }
        }
        for done in waiters {
            let _ = done.send(());
        }
    }

    /// Transmit a caller's packet.  `Err` carries a disconnect reason when the
    /// socket itself failed.
    async fn send(&mut self, mut packet: Packet, cache: bool, respond: Responder) -> Result<(), String> {
        let bytes = match packet.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("[rcon] refusing to send {packet}: {e}");
                let _ = respond.send(Err(e.into()));
                return Ok(());
            }
        };

        let tracked = cache && packet.sub_type == PacketSubType::Request;
        if tracked && packet.packet_type == PacketType::Command {
            if let Some(sequence) = packet.sequence().filter(|&s| self.pending.has_command(s)) {
                let _ = respond.send(Err(ClientError::SequenceInUse(sequence)));
                return Ok(());
            }
        }

        packet.time_stamp = Instant::now();
        match self.socket.send(&bytes).await {
            Ok(bytes_sent) => {
                self.shared.packets_sent.fetch_add(1, Ordering::Relaxed);
                log::debug!("[rcon] → {packet} ({bytes_sent} bytes)");
                if tracked {
                    self.pending.push(packet, bytes_sent, respond);
                    self.publish_pending();
                } else {
                    let _ = respond.send(Ok(Delivery {
                        reply: None,
                        bytes_sent,
                    }));
                }
                Ok(())
            }
            Err(e) => {
                log::warn!("[rcon] send of {packet} failed: {e}");
                let reason = format!("Send failed: {e}");
                let _ = respond.send(Err(ClientError::Io(e)));
                Err(reason)
            }
        }
    }

    /// Handle one datagram from the server.  Never fails: malformed input is
    /// counted, logged and dropped.
    async fn receive(&mut self, datagram: &[u8]) {
        if self.shared.set_state(ConnectionState::Connected) != ConnectionState::Connected {
            log::info!("[rcon] connected to {}", self.socket.remote_addr);
        }
        self.shared.connection_listeners.notify_connect();

        let packet = match Packet::decode(datagram) {
            Ok(packet) => packet,
            Err(e) if e.is_corrupt() => {
                self.shared.corrupted_packets_received.fetch_add(1, Ordering::Relaxed);
                log::warn!("[rcon] ← corrupt datagram ({} bytes): {e}", datagram.len());
                return;
            }
            Err(e) => {
                log::warn!("[rcon] ← malformed datagram ({} bytes): {e}", datagram.len());
                return;
            }
        };
        self.shared.packets_received.fetch_add(1, Ordering::Relaxed);
        log::debug!("[rcon] ← {packet}");

        match (packet.packet_type, packet.sub_type) {
            (PacketType::Login, PacketSubType::Reply) => match self.pending.take_login() {
                Some(request) => request.complete(packet),
                None => unexpected(&packet),
            },
            (PacketType::Command, PacketSubType::Reply) => {
                let matched = packet.sequence().and_then(|s| self.pending.take_command(s));
                match matched {
                    Some(request) => {
                        if let Some(sequence) = packet.sequence() {
                            self.split.discard(sequence);
                        }
                        request.complete(packet);
                    }
                    None => unexpected(&packet),
                }
            }
            (PacketType::Command, PacketSubType::SplitReply) => self.receive_fragment(packet),
            (PacketType::ServerMessage, PacketSubType::Reply) => {
                let message = packet.attributes.text(attr::MESSAGE).unwrap_or_default();
                self.shared.message_listeners.notify_message(message);
                if let Some(sequence) = packet.sequence() {
                    self.acknowledge(sequence).await;
                }
            }
            _ => unexpected(&packet),
        }

        self.publish_pending();
    }

    fn receive_fragment(&mut self, fragment: Packet) {
        let Some(sequence) = fragment.sequence() else {
            return unexpected(&fragment);
        };
        if !self.pending.has_command(sequence) {
            return unexpected(&fragment);
        }
        if let Some(reply) = self.split.push(&fragment) {
            if let Some(request) = self.pending.take_command(sequence) {
                request.complete(reply);
            }
        }
    }

    /// Acknowledge a server message.  Failures are logged only: the server
    /// re-sends messages it does not see acknowledged.
    async fn acknowledge(&mut self, sequence: u8) {
        let ack = Packet::acknowledge(sequence);
        let result = match ack.encode() {
            Ok(bytes) => self.socket.send(&bytes).await.map_err(ClientError::from),
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(_) => {
                self.shared.packets_sent.fetch_add(1, Ordering::Relaxed);
                log::debug!("[rcon] → {ack}");
            }
            Err(e) => log::warn!("[rcon] acknowledging seq={sequence} failed: {e}"),
        }
    }

    /// Retransmit overdue requests.  Returns a disconnect reason once any
    /// request has exhausted its retry budget.
    async fn sweep(&mut self) -> Option<String> {
        let now = Instant::now();
        let mut due = Vec::new();

        for entry in self.pending.iter_mut() {
            let elapsed = now.saturating_duration_since(entry.packet.time_stamp);
            match self.config.decide(elapsed, entry.packet.resend_count) {
                ResendAction::Wait => {}
                ResendAction::Resend => {
                    entry.packet.increment_resend_count();
                    due.push((entry.id, entry.packet.clone()));
                }
                ResendAction::GiveUp => {
                    log::warn!(
                        "[rcon] {} (request #{}) unanswered after {} resends",
                        entry.packet,
                        entry.id,
                        entry.packet.resend_count
                    );
                    let reason = if self.shared.state().is_connected() {
                        CONNECTION_LOST
                    } else {
                        CONNECTION_FAILED
                    };
                    return Some(reason.to_string());
                }
            }
        }

        for (id, packet) in due {
            self.retransmit(id, &packet).await;
        }
        None
    }

    /// Re-send a cached request as is; its timestamp is left untouched so the
    /// schedule stays anchored to the first transmission.
    async fn retransmit(&mut self, id: u64, packet: &Packet) {
        let result = match packet.encode() {
            Ok(bytes) => self.socket.send(&bytes).await.map_err(ClientError::from),
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(_) => {
                self.shared.packets_sent.fetch_add(1, Ordering::Relaxed);
                log::debug!("[rcon] ↻ {packet} (request #{id}, resend {})", packet.resend_count);
            }
            Err(e) => log::warn!("[rcon] resend of request #{id} failed: {e}"),
        }
    }

    fn publish_pending(&self) {
        self.shared.pending.store(self.pending.len(), Ordering::Relaxed);
    }

    /// Release the socket and fail everything still pending.
    fn shutdown(self, reason: &str) {
        let EventLoop {
            socket,
            shared,
            mut pending,
            mut split,
            ..
        } = self;

        shared.set_state(ConnectionState::Closed);
        *lock(&shared.close_reason) = Some(reason.to_string());
        drop(socket);

        let failed = pending.len();
        for request in pending.drain() {
            request.resolve(Err(ClientError::Disconnected(reason.to_string())));
        }
        split.clear();
        shared.pending.store(0, Ordering::Relaxed);

        log::info!("[rcon] disconnected: {reason} ({failed} pending request(s) failed)");
        shared.connection_listeners.notify_disconnect(reason);
    }
}

fn unexpected(packet: &Packet) {
    log::warn!("[rcon] ← unexpected packet: {packet} {:?}", packet.attributes);
}
