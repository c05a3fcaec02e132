//! End-to-end tests driving a real `TcpListener` on `127.0.0.1:0` with a
//! real `ChatClient` peer — covers the testable properties in spec.md §8.

use std::sync::Arc;

use clawd_chat::client::ChatClient;
use clawd_chat::context::ServerContext;
use clawd_chat::crypto::RsaIdentity;
use clawd_chat::listener::Listener;
use clawd_chat::store::SqliteStore;

/// Spins up a server on an OS-assigned port and returns its address. The
/// `tempfile::TempDir` is leaked so the SQLite file outlives the test —
/// the process exit cleans it up.
async fn spawn_server() -> String {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::connect(&dir.path().join("test.db")).await.unwrap());
    std::mem::forget(dir);

    let identity = Arc::new(RsaIdentity::generate().unwrap());
    let ctx = ServerContext::new(identity, store);

    let listener = Listener::bind("127.0.0.1:0", ctx).await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let _ = listener.serve().await;
    });
    addr
}

#[tokio::test]
async fn signup_login_whoisonline_happy_path() {
    let addr = spawn_server().await;

    let mut alice = ChatClient::connect(&addr).await.unwrap();
    let signup = alice.signup("Alice Liddell", "alice@example.com", "wonderland").await.unwrap();
    assert_eq!(signup.payload["status"], "ok");

    let login = alice.login("alice@example.com", "wonderland").await.unwrap();
    assert_eq!(login.payload["status"], "ok");
    assert_eq!(login.payload["user_info"]["email"], "alice@example.com");

    let who = alice.whoisonline().await.unwrap();
    let users = who.payload["users"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["full_name"], "Alice Liddell");
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let addr = spawn_server().await;
    let mut alice = ChatClient::connect(&addr).await.unwrap();
    alice.signup("Alice", "alice@example.com", "right").await.unwrap();

    let result = alice.login("alice@example.com", "wrong").await.unwrap();
    assert_eq!(result.kind, "response");
    assert_eq!(result.payload["status"], "error");
}

#[tokio::test]
async fn pre_auth_command_is_rejected() {
    let addr = spawn_server().await;
    let mut alice = ChatClient::connect(&addr).await.unwrap();

    let result = alice.whoisonline().await.unwrap();
    assert_eq!(result.kind, "response");
    assert_eq!(result.payload["status"], "error");
}

#[tokio::test]
async fn online_chat_is_delivered_live() {
    let addr = spawn_server().await;

    let mut alice = ChatClient::connect(&addr).await.unwrap();
    alice.signup("Alice", "alice@example.com", "p1").await.unwrap();
    let alice_login = alice.login("alice@example.com", "p1").await.unwrap();
    let alice_id = alice_login.payload["user_info"]["id"].as_str().unwrap().to_string();

    let mut bob = ChatClient::connect(&addr).await.unwrap();
    bob.signup("Bob", "bob@example.com", "p2").await.unwrap();
    let bob_login = bob.login("bob@example.com", "p2").await.unwrap();
    let bob_id = bob_login.payload["user_info"]["id"].as_str().unwrap().to_string();

    alice.chat(&bob_id, "hello bob").await.unwrap();

    let delivered = bob.recv().await.unwrap().expect("bob receives the live message");
    assert_eq!(delivered.kind, "new_message");
    assert_eq!(delivered.payload["sender_id"], alice_id);
    assert_eq!(delivered.payload["text"], "hello bob");
}

#[tokio::test]
async fn offline_chat_is_persisted_not_delivered() {
    let addr = spawn_server().await;

    let mut alice = ChatClient::connect(&addr).await.unwrap();
    alice.signup("Alice", "alice@example.com", "p1").await.unwrap();
    alice.login("alice@example.com", "p1").await.unwrap();

    // Bob signs up but never logs in — never goes online.
    let mut bob = ChatClient::connect(&addr).await.unwrap();
    let bob_signup = bob.signup("Bob", "bob@example.com", "p2").await.unwrap();
    assert_eq!(bob_signup.payload["status"], "ok");

    let bob_id = clawd_chat::auth::derive_user_id("bob@example.com");
    let info = alice.chat(&bob_id, "catch you later").await;
    assert!(info.is_ok());

    let response = alice.recv().await.unwrap().expect("an offline-store notice arrives");
    assert_eq!(response.payload["status"], "info");
}

#[tokio::test]
async fn tampered_frame_disconnects_without_a_response() {
    use clawd_chat::protocol::envelope::{self, Envelope};
    use tokio::io::BufReader;
    use tokio::net::TcpStream;

    let addr = spawn_server().await;
    let stream = TcpStream::connect(&addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let start = envelope::read_envelope(&mut reader).await.unwrap();
    assert_eq!(start.kind, "handshake_start");

    // Send garbage instead of a real key_exchange; the server must close
    // the connection rather than reply with anything.
    let bogus = Envelope::new("key_exchange", serde_json::json!({ "key": "not-valid-base64" }));
    envelope::write_envelope(&mut write_half, &bogus).await.unwrap();

    let result = envelope::read_envelope(&mut reader).await;
    assert!(result.is_err());
}
