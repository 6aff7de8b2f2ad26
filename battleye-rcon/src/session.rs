//! Logged-in RCon session on top of a [`Client`].
//!
//! A [`Session`] owns the sequence counter for command requests, remembers
//! whether the server accepted the password, and can keep the connection
//! alive with periodic heartbeats (bare command packets).  BattlEye drops
//! clients it has not heard from for roughly 45 seconds, hence the default
//! heartbeat period of 30 seconds.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::client::{Client, ClientError};
use crate::listener::ConnectionListener;
use crate::packet::{attr, Packet};
use crate::sequence::SequenceCounter;
use crate::timer::ResendConfig;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("not logged in")]
    NotLoggedIn,
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

/// Login flag, cleared by the client when the connection ends.
#[derive(Debug, Default)]
struct LoginState {
    logged_in: AtomicBool,
}

impl ConnectionListener for LoginState {
    fn on_disconnect(&self, _reason: &str) {
        self.logged_in.store(false, Ordering::Relaxed);
    }
}

/// State shared with the heartbeat task.
#[derive(Debug)]
struct Commander {
    client: Client,
    sequence: Mutex<SequenceCounter>,
    login: Arc<LoginState>,
}

impl Commander {
    /// Send a command (or a heartbeat, for `None`) and return its output.
    async fn command(&self, command: Option<&str>) -> Result<String, SessionError> {
        if !self.login.logged_in.load(Ordering::Relaxed) {
            return Err(SessionError::NotLoggedIn);
        }
        let sequence = self
            .sequence
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .next();
        let reply = self.client.request(Packet::command(sequence, command)).await?;
        Ok(reply
            .attributes
            .text(attr::DATA)
            .unwrap_or_default()
            .to_string())
    }
}

pub struct Session {
    commander: Arc<Commander>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Bind a client for `remote_addr`.  Nothing is sent until [`login`](Self::login).
    pub async fn connect(remote_addr: SocketAddr, config: ResendConfig) -> Result<Self, SessionError> {
        let client = Client::bind(remote_addr, config).await?;
        Ok(Self::from_client(client))
    }

    /// Wrap an existing client.  The session registers itself as one of the
    /// client's connection listeners.
    pub fn from_client(client: Client) -> Self {
        let login = Arc::new(LoginState::default());
        client.connection_listeners().add(login.clone());
        Self {
            commander: Arc::new(Commander {
                client,
                sequence: Mutex::new(SequenceCounter::new()),
                login,
            }),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &Client {
        &self.commander.client
    }

    pub fn is_logged_in(&self) -> bool {
        self.commander.login.logged_in.load(Ordering::Relaxed)
    }

    /// Log in with the server's RCon password.  Returns whether the server
    /// accepted it.
    pub async fn login(&self, password: &str) -> Result<bool, SessionError> {
        let reply = self.commander.client.request(Packet::login(password)).await?;
        let accepted = match reply.attributes.byte(attr::RESULT) {
            Some(result) => result == 1,
            None => return Err(SessionError::UnexpectedReply(reply.to_string())),
        };
        self.commander.login.logged_in.store(accepted, Ordering::Relaxed);
        if accepted {
            self.commander
                .sequence
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .reset();
        }
        log::info!("[session] login {}", if accepted { "accepted" } else { "rejected" });
        Ok(accepted)
    }

    /// Run an RCon command and return its output (empty if the server sent
    /// none).
    pub async fn command(&self, command: &str) -> Result<String, SessionError> {
        self.commander.command(Some(command)).await
    }

    /// Send an empty command to keep the connection alive.
    pub async fn heartbeat(&self) -> Result<(), SessionError> {
        self.commander.command(None).await.map(|_| ())
    }

    /// End the RCon login; the socket stays open.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let result = self.commander.command(Some("logout")).await.map(|_| ());
        self.commander.login.logged_in.store(false, Ordering::Relaxed);
        result
    }

    /// Start sending a heartbeat every `interval`.  Returns `false` if
    /// heartbeats are already running or `interval` is zero.
    ///
    /// The task ends by itself once the session is logged out or the
    /// connection is gone.
    pub fn enable_heartbeat(&self, interval: Duration) -> bool {
        if interval.is_zero() {
            log::warn!("[session] refusing a zero heartbeat interval");
            return false;
        }
        let mut heartbeat = self.heartbeat.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if heartbeat.as_ref().is_some_and(|task| !task.is_finished()) {
            return false;
        }

        let commander = Arc::clone(&self.commander);
        *heartbeat = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                match commander.command(None).await {
                    Ok(_) => log::debug!("[session] heartbeat answered"),
                    Err(SessionError::Client(ClientError::Disconnected(reason))) => {
                        log::debug!("[session] heartbeat stopped: {reason}");
                        break;
                    }
                    Err(SessionError::NotLoggedIn) => {
                        log::debug!("[session] heartbeat stopped: not logged in");
                        break;
                    }
                    Err(e) => log::warn!("[session] heartbeat failed: {e}"),
                }
            }
        }));
        true
    }

    /// Whether the periodic heartbeat task is running.
    pub fn heartbeat_enabled(&self) -> bool {
        self.heartbeat
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop periodic heartbeats.  Returns `false` if none were running.
    pub fn disable_heartbeat(&self) -> bool {
        let task = self
            .heartbeat
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match task {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Stop heartbeats and tear the connection down.
    pub async fn disconnect(&self, reason: Option<&str>) {
        self.disable_heartbeat();
        self.commander.client.disconnect(reason).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disable_heartbeat();
    }
}
