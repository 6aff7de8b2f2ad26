//! Integration tests for the logged-in session layer.

mod common;

use std::sync::Arc;
use std::time::Duration;

use battleye_rcon::{ClientError, Session, SessionError};

use common::{eventually, fast_resends, FakeServer, WAIT};

async fn new_session(server: &FakeServer) -> Session {
    Session::from_client(server.client(fast_resends()).await)
}

#[tokio::test]
async fn commands_require_login() {
    let server = FakeServer::bind().await;
    let session = new_session(&server).await;

    let err = session.command("players").await.expect_err("not logged in");
    assert!(matches!(err, SessionError::NotLoggedIn), "got {err:?}");
    assert!(server.silent_for(Duration::from_millis(50)).await);
}

#[tokio::test]
async fn login_command_heartbeat_logout() {
    let server = FakeServer::bind().await;
    let session = Arc::new(new_session(&server).await);

    let login = {
        let session = session.clone();
        tokio::spawn(async move { session.login("secret").await })
    };
    let sent = server.recv().await;
    assert_eq!(sent.packet_type, 0);
    assert_eq!(sent.payload, b"secret");
    server.login_reply(sent.from, true).await;
    assert!(login.await.unwrap().expect("login"));
    assert!(session.is_logged_in());

    let command = {
        let session = session.clone();
        tokio::spawn(async move { session.command("players").await })
    };
    let sent = server.recv().await;
    assert_eq!((sent.packet_type, sent.sequence(), sent.text()), (1, 0, "players".to_string()));
    server.command_reply(sent.from, 0, "Players on server:").await;
    assert_eq!(command.await.unwrap().expect("command"), "Players on server:");

    let heartbeat = {
        let session = session.clone();
        tokio::spawn(async move { session.heartbeat().await })
    };
    let sent = server.recv().await;
    assert_eq!(sent.payload, vec![1]);
    server.command_reply(sent.from, 1, "").await;
    heartbeat.await.unwrap().expect("heartbeat");

    let logout = {
        let session = session.clone();
        tokio::spawn(async move { session.logout().await })
    };
    let sent = server.recv().await;
    assert_eq!((sent.sequence(), sent.text()), (2, "logout".to_string()));
    server.command_reply(sent.from, 2, "").await;
    logout.await.unwrap().expect("logout");
    assert!(!session.is_logged_in());
}

#[tokio::test]
async fn rejected_password() {
    let server = FakeServer::bind().await;
    let session = Arc::new(new_session(&server).await);

    let login = {
        let session = session.clone();
        tokio::spawn(async move { session.login("wrong").await })
    };
    let sent = server.recv().await;
    server.login_reply(sent.from, false).await;

    assert!(!login.await.unwrap().expect("login reply"));
    assert!(!session.is_logged_in());
}

#[tokio::test]
async fn disconnect_clears_login() {
    let server = FakeServer::bind().await;
    let session = Arc::new(new_session(&server).await);

    let login = {
        let session = session.clone();
        tokio::spawn(async move { session.login("secret").await })
    };
    let sent = server.recv().await;
    server.login_reply(sent.from, true).await;
    assert!(login.await.unwrap().unwrap());

    session.disconnect(None).await;
    assert!(!session.is_logged_in());
    let err = session.command("players").await.expect_err("closed");
    assert!(matches!(err, SessionError::NotLoggedIn), "got {err:?}");
}

#[tokio::test]
async fn heartbeat_task_runs_until_disabled() {
    let server = FakeServer::bind().await;
    let session = Arc::new(new_session(&server).await);

    let login = {
        let session = session.clone();
        tokio::spawn(async move { session.login("secret").await })
    };
    let sent = server.recv().await;
    server.login_reply(sent.from, true).await;
    assert!(login.await.unwrap().unwrap());

    assert!(session.enable_heartbeat(Duration::from_millis(20)));
    assert!(!session.enable_heartbeat(Duration::from_millis(20)));

    for expected in 0..2u8 {
        let beat = server.recv().await;
        assert_eq!(beat.packet_type, 1);
        assert_eq!(beat.payload, vec![expected]);
        server.command_reply(beat.from, expected, "").await;
    }

    assert!(session.disable_heartbeat());
    assert!(!session.disable_heartbeat());
    eventually(|| session.client().pending_count() == 0).await;
    assert!(server.silent_for(Duration::from_millis(100)).await);
}

#[tokio::test]
async fn heartbeat_stops_when_connection_fails() {
    let server = FakeServer::bind().await;
    let session = Arc::new(new_session(&server).await);

    let login = {
        let session = session.clone();
        tokio::spawn(async move { session.login("secret").await })
    };
    let sent = server.recv().await;
    server.login_reply(sent.from, true).await;
    assert!(login.await.unwrap().unwrap());

    session.enable_heartbeat(Duration::from_millis(20));
    eventually(|| session.client().close_reason().is_some()).await;
    assert_eq!(session.client().close_reason().as_deref(), Some("Connection lost!"));
    assert!(!session.is_logged_in());

    let err = tokio::time::timeout(WAIT, session.client().request(battleye_rcon::Packet::command(9, None)))
        .await
        .expect("closed client answers at once")
        .expect_err("closed");
    assert!(matches!(err, ClientError::Disconnected(_)), "got {err:?}");
}

/// Log in on a session whose server is `server`.
async fn logged_in(server: &FakeServer) -> Arc<Session> {
    let session = Arc::new(new_session(server).await);
    let login = {
        let session = session.clone();
        tokio::spawn(async move { session.login("secret").await })
    };
    let sent = server.recv().await;
    server.login_reply(sent.from, true).await;
    assert!(login.await.unwrap().expect("login"));
    session
}

#[tokio::test]
async fn heartbeat_stops_when_another_request_times_out() {
    let server = Arc::new(FakeServer::bind().await);
    let session = logged_in(&server).await;

    assert!(session.enable_heartbeat(Duration::from_millis(40)));
    let responder = server.clone().answer_heartbeats();

    let err = tokio::time::timeout(WAIT, session.command("players"))
        .await
        .expect("command resolves")
        .expect_err("server never answers commands");
    assert!(
        matches!(&err, SessionError::Client(ClientError::Disconnected(r)) if r == "Connection lost!"),
        "got {err:?}"
    );

    eventually(|| !session.heartbeat_enabled()).await;
    responder.abort();
}

#[tokio::test]
async fn heartbeat_stops_after_logout() {
    let server = Arc::new(FakeServer::bind().await);
    let session = logged_in(&server).await;

    assert!(session.enable_heartbeat(Duration::from_millis(20)));
    let logout = {
        let session = session.clone();
        tokio::spawn(async move { session.logout().await })
    };
    // Heartbeats may interleave with the logout request.
    loop {
        let sent = server.recv().await;
        server.command_reply(sent.from, sent.sequence(), "").await;
        if sent.text() == "logout" {
            break;
        }
    }
    logout.await.unwrap().expect("logout");

    eventually(|| !session.heartbeat_enabled()).await;
    assert!(session.enable_heartbeat(Duration::from_millis(20)));
}

#[tokio::test]
async fn zero_heartbeat_interval_is_refused() {
    let server = FakeServer::bind().await;
    let session = logged_in(&server).await;

    assert!(!session.enable_heartbeat(Duration::ZERO));
    assert!(!session.heartbeat_enabled());
}
