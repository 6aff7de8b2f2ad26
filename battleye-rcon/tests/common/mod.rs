//! Fake BattlEye server and recording listeners shared by the integration
//! tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;

use battleye_rcon::packet::frame;
use battleye_rcon::{Client, ConnectionListener, MessageListener, ResendConfig};

/// Upper bound for any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

/// Resend settings that run a full retry cycle in a fraction of a second.
pub fn fast_resends() -> ResendConfig {
    ResendConfig {
        resend_interval: Duration::from_millis(60),
        sweep_interval: Duration::from_millis(5),
        max_resends: 4,
    }
}

/// A loopback socket standing in for the game server.
pub struct FakeServer {
    pub socket: UdpSocket,
    pub addr: SocketAddr,
}

/// A datagram the client sent, split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub packet_type: u8,
    pub payload: Vec<u8>,
    pub from: SocketAddr,
    pub raw: Vec<u8>,
}

impl Sent {
    pub fn sequence(&self) -> u8 {
        self.payload[0]
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload[1..]).into_owned()
    }
}

impl FakeServer {
    pub async fn bind() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind fake server");
        let addr = socket.local_addr().unwrap();
        Self { socket, addr }
    }

    pub async fn client(&self, config: ResendConfig) -> Client {
        Client::bind(self.addr, config).await.expect("bind client")
    }

    /// Receive the next datagram from the client.
    pub async fn recv(&self) -> Sent {
        let mut buf = vec![0u8; 2048];
        let (n, from) = tokio::time::timeout(WAIT, self.socket.recv_from(&mut buf))
            .await
            .expect("server recv timed out")
            .expect("server recv failed");
        buf.truncate(n);
        assert_eq!(&buf[..2], b"BE", "client sent a datagram without header");
        assert_eq!(buf[6], 0xFF, "client sent a datagram without marker");
        Sent {
            packet_type: buf[7],
            payload: buf[8..].to_vec(),
            from,
            raw: buf,
        }
    }

    /// True if nothing arrives within `window`.
    pub async fn silent_for(&self, window: Duration) -> bool {
        let mut buf = vec![0u8; 2048];
        tokio::time::timeout(window, self.socket.recv_from(&mut buf))
            .await
            .is_err()
    }

    pub async fn send_raw(&self, to: SocketAddr, bytes: &[u8]) {
        self.socket.send_to(bytes, to).await.expect("server send");
    }

    /// Frame and send marker + `packet_type` + `payload`.
    pub async fn reply(&self, to: SocketAddr, packet_type: u8, payload: &[u8]) {
        let mut body = vec![0xFF, packet_type];
        body.extend_from_slice(payload);
        self.send_raw(to, &frame(&body)).await;
    }

    pub async fn login_reply(&self, to: SocketAddr, accepted: bool) {
        self.reply(to, 0, &[u8::from(accepted)]).await;
    }

    pub async fn command_reply(&self, to: SocketAddr, sequence: u8, data: &str) {
        let mut payload = vec![sequence];
        payload.extend_from_slice(data.as_bytes());
        self.reply(to, 1, &payload).await;
    }

    pub async fn command_fragment(&self, to: SocketAddr, sequence: u8, count: u8, index: u8, data: &[u8]) {
        let mut payload = vec![sequence, 0x00, count, index];
        payload.extend_from_slice(data);
        self.reply(to, 1, &payload).await;
    }

    /// Answer every bare heartbeat from now on, leaving other requests
    /// unanswered.  Abort the returned task to stop.
    pub fn answer_heartbeats(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            while let Ok((n, from)) = self.socket.recv_from(&mut buf).await {
                // Header, checksum, marker, type 1 and a lone sequence byte.
                if n == 9 && buf[7] == 1 {
                    let sequence = buf[8];
                    self.command_reply(from, sequence, "").await;
                }
            }
        })
    }

    pub async fn server_message(&self, to: SocketAddr, sequence: u8, message: &str) {
        let mut payload = vec![sequence];
        payload.extend_from_slice(message.as_bytes());
        self.reply(to, 2, &payload).await;
    }
}

/// Records every listener callback as a string.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl ConnectionListener for Recorder {
    fn on_connect(&self) {
        self.push("connect".to_string());
    }

    fn on_disconnect(&self, reason: &str) {
        self.push(format!("disconnect:{reason}"));
    }
}

impl MessageListener for Recorder {
    fn on_message_received(&self, message: &str) {
        self.push(format!("message:{message}"));
    }
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
