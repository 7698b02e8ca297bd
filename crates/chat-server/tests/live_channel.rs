use chat_server::config::{AppState, ServerConfig};
use chat_server::properties::NewProperty;
use chat_server::relay::{LocalRelay, Relay};
use chat_server::{build_router, build_state};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct LiveServer {
    _dir: TempDir,
    state: AppState,
    addr: SocketAddr,
}

async fn start_server() -> LiveServer {
    let dir = tempdir().unwrap();
    let mut config = ServerConfig::with_data_dir(dir.path());
    config.bcrypt_cost = 4;
    let relay: Arc<dyn Relay> = Arc::new(LocalRelay::default());
    let state = build_state(config, relay).await.unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = build_router(state.clone());
    tokio::spawn(async move { axum::serve(listener, router).await });

    LiveServer {
        _dir: dir,
        state,
        addr,
    }
}

impl LiveServer {
    async fn token_for(&self, email: &str) -> String {
        self.state
            .auth
            .signup(email, "Tester", "correct horse battery")
            .await
            .unwrap();
        let (_, session) = self
            .state
            .auth
            .login(email, "correct horse battery")
            .await
            .unwrap();
        session.token
    }

    async fn connect(&self, thread_id: &str, token: &str) -> Client {
        let url = format!("ws://{}/chat/ws/{thread_id}?token={token}", self.addr);
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        ws
    }

    async fn wait_for_connections(&self, expected: usize) {
        for _ in 0..100 {
            if self.state.registry.connection_count() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(self.state.registry.connection_count(), expected);
    }
}

async fn next_message(ws: &mut Client) -> Message {
    tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timeout waiting for frame")
        .expect("stream ended")
        .expect("read error")
}

async fn next_frame(ws: &mut Client) -> Value {
    let msg = next_message(ws).await;
    let Message::Text(text) = msg else {
        panic!("expected text frame, got {:?}", msg);
    };
    serde_json::from_str(&text).unwrap()
}

async fn send_text(ws: &mut Client, text: &str) {
    ws.send(Message::Text(json!({ "text": text }).to_string()))
        .await
        .unwrap();
}

async fn assert_policy_close(ws: &mut Client) {
    match next_message(ws).await {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Policy),
        other => panic!("expected policy close, got {:?}", other),
    }
}

#[tokio::test]
async fn test_live_thread_delivery() {
    let server = start_server().await;
    let owner_token = server.token_for("owner@example.com").await;
    let buyer_token = server.token_for("buyer@example.com").await;

    let property = server
        .state
        .properties
        .register(
            "owner@example.com",
            NewProperty {
                title: "Garden flat".into(),
                category: String::new(),
                location: "Old Town".into(),
                description: String::new(),
            },
        )
        .await
        .unwrap();
    let thread = server
        .state
        .chat
        .get_or_create_thread(property.property_id, "buyer@example.com")
        .await
        .unwrap();
    server
        .state
        .chat
        .send_message(thread.thread_id, "buyer@example.com", "Is it still available?")
        .await
        .unwrap();
    let thread_id = thread.thread_id.to_string();

    let mut buyer = server.connect(&thread_id, &buyer_token).await;
    let mut owner = server.connect(&thread_id, &owner_token).await;

    for ws in [&mut buyer, &mut owner] {
        let history = next_frame(ws).await;
        assert_eq!(history["type"], "history");
        assert_eq!(history["thread_id"], thread_id);
        assert_eq!(history["messages"].as_array().unwrap().len(), 1);
        assert_eq!(history["messages"][0]["seq"], 1);
    }
    assert_eq!(server.state.registry.connection_count(), 2);

    // buyer's message is acked to the buyer and relayed to the owner
    send_text(&mut buyer, "Can I view it Saturday?").await;
    let ack = next_frame(&mut buyer).await;
    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["message"]["seq"], 2);
    assert_eq!(ack["message"]["sender"], "buyer@example.com");

    let relayed = next_frame(&mut owner).await;
    assert_eq!(relayed["type"], "message");
    assert_eq!(relayed["thread_id"], thread_id);
    assert_eq!(relayed["message"]["seq"], 2);
    assert_eq!(relayed["message"]["text"], "Can I view it Saturday?");

    send_text(&mut owner, "Saturday works").await;
    assert_eq!(next_frame(&mut owner).await["message"]["seq"], 3);
    let reply = next_frame(&mut buyer).await;
    assert_eq!(reply["type"], "message");
    assert_eq!(reply["message"]["sender"], "owner@example.com");

    // rejected frames get an error reply and keep the connection open
    send_text(&mut buyer, "   ").await;
    assert_eq!(next_frame(&mut buyer).await["type"], "error");
    buyer
        .send(Message::Text("not json".to_string()))
        .await
        .unwrap();
    assert_eq!(next_frame(&mut buyer).await["type"], "error");

    // a bad token is refused without registering anything
    let mut intruder = server.connect(&thread_id, "not-a-real-token").await;
    assert_policy_close(&mut intruder).await;
    let stranger_token = server.token_for("stranger@example.com").await;
    let mut stranger = server.connect(&thread_id, &stranger_token).await;
    assert_policy_close(&mut stranger).await;
    assert_eq!(server.state.registry.connection_count(), 2);

    owner.close(None).await.unwrap();
    server.wait_for_connections(1).await;

    // the buyer stays live after the owner leaves
    send_text(&mut buyer, "Thanks").await;
    assert_eq!(next_frame(&mut buyer).await["message"]["seq"], 4);

    buyer.close(None).await.unwrap();
    server.wait_for_connections(0).await;

    let stored = server
        .state
        .chat
        .list_messages(thread.thread_id, "owner@example.com")
        .await
        .unwrap();
    assert_eq!(stored.len(), 4);
}
