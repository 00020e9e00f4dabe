use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use gamerlink_db::Database;
use gamerlink_gateway::auth::JwtKeys;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    http: reqwest::Client,
    base: String,
    ws_base: String,
    db: Arc<Database>,
    _dir: tempfile::TempDir,
}

struct TestUser {
    id: i64,
    email: String,
    token: String,
}

async fn spawn_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::open(&dir.path().join("e2e.db")).unwrap());
    let tokens = JwtKeys::new("e2e-test-secret", chrono::Duration::minutes(30));
    let app = gamerlink_server::app(db.clone(), tokens, None);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        http: reqwest::Client::new(),
        base: format!("http://{addr}"),
        ws_base: format!("ws://{addr}"),
        db,
        _dir: dir,
    }
}

impl TestServer {
    async fn register(&self, email: &str, game: &str) -> TestUser {
        let res = self
            .http
            .post(format!("{}/auth/register", self.base))
            .json(&json!({ "email": email, "password": "hunter2hunter2", "game": game }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 201);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["token_type"], "bearer");
        TestUser {
            id: body["user"]["id"].as_i64().unwrap(),
            email: email.to_string(),
            token: body["access_token"].as_str().unwrap().to_string(),
        }
    }

    async fn get(&self, user: &TestUser, path: &str) -> reqwest::Response {
        self.http
            .get(format!("{}{}", self.base, path))
            .bearer_auth(&user.token)
            .send()
            .await
            .unwrap()
    }

    async fn post(&self, user: &TestUser, path: &str, body: Value) -> reqwest::Response {
        self.http
            .post(format!("{}{}", self.base, path))
            .bearer_auth(&user.token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn like(&self, liker: &TestUser, target: &TestUser) -> Value {
        let res = self
            .post(liker, &format!("/matches/like/{}", target.id), json!({}))
            .await;
        assert_eq!(res.status(), 200);
        res.json().await.unwrap()
    }

    /// Register two players of the same game and make them like each other.
    async fn matched_pair(&self) -> (TestUser, TestUser, i64) {
        let alice = self.register("alice@example.com", "Valorant").await;
        let bob = self.register("bob@example.com", "Valorant").await;
        self.like(&alice, &bob).await;
        let matched = self.like(&bob, &alice).await;
        assert_eq!(matched["status"], "MATCHED");
        let match_id = matched["match_id"].as_i64().unwrap();
        (alice, bob, match_id)
    }

    async fn connect(&self, user: &TestUser, match_id: i64) -> Ws {
        let url = format!("{}/chat/ws/{}?token={}", self.ws_base, match_id, user.token);
        let (ws, _) = connect_async(url).await.unwrap();
        ws
    }

    /// Connect and wait for the ready event so the session is registered.
    async fn join(&self, user: &TestUser, match_id: i64) -> Ws {
        let mut ws = self.connect(user, match_id).await;
        let ready = next_event(&mut ws).await;
        assert_eq!(ready["type"], "ready");
        assert_eq!(ready["match_id"], match_id);
        assert_eq!(ready["user_id"], user.id);
        ws
    }
}

/// Next text frame as JSON, skipping control frames.
async fn next_event(ws: &mut Ws) -> Value {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for an event")
            .expect("socket ended")
            .expect("socket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

/// Close code sent by the server, skipping everything before it.
async fn close_code(ws: &mut Ws) -> u16 {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for close")
            .expect("socket ended without a close frame")
            .expect("socket error");
        if let Message::Close(frame) = msg {
            return frame.map(|f| u16::from(f.code)).unwrap_or(1005);
        }
    }
}

async fn send_chat(ws: &mut Ws, content: &str) {
    let payload = json!({ "content": content }).to_string();
    ws.send(Message::text(payload)).await.unwrap();
}

#[tokio::test]
async fn like_match_and_chat() {
    let server = spawn_server().await;
    let alice = server.register("alice@example.com", "Valorant").await;
    let bob = server.register("bob@example.com", "Valorant").await;
    let carol = server.register("carol@example.com", "Chess").await;

    let recs: Value = server.get(&alice, "/users/recommendations").await.json().await.unwrap();
    let rec_ids: Vec<i64> = recs.as_array().unwrap().iter().map(|u| u["id"].as_i64().unwrap()).collect();
    assert_eq!(rec_ids, vec![bob.id]);
    assert!(!rec_ids.contains(&carol.id));

    let first = server.like(&alice, &bob).await;
    assert_eq!(first["status"], "LIKED");
    assert!(first.get("match_id").is_none());

    let received: Value = server.get(&bob, "/matches/likes-received").await.json().await.unwrap();
    assert_eq!(received.as_array().unwrap().len(), 1);
    assert_eq!(received[0]["user_id"], alice.id);

    let second = server.like(&bob, &alice).await;
    assert_eq!(second["status"], "MATCHED");
    assert_eq!(second["message"], "It's a match!");
    let match_id = second["match_id"].as_i64().unwrap();

    // Matured likes no longer show up as pending.
    let sent: Value = server.get(&alice, "/matches/likes-sent").await.json().await.unwrap();
    assert!(sent.as_array().unwrap().is_empty());
    let received: Value = server.get(&bob, "/matches/likes-received").await.json().await.unwrap();
    assert!(received.as_array().unwrap().is_empty());

    let again = server.like(&alice, &bob).await;
    assert_eq!(again["status"], "ALREADY_LIKED");

    for user in [&alice, &bob] {
        let matches: Value = server.get(user, "/matches").await.json().await.unwrap();
        assert_eq!(matches.as_array().unwrap().len(), 1);
        assert_eq!(matches[0]["id"], match_id);
        assert_eq!(matches[0]["status"], "matched");
    }

    let mut alice_ws = server.join(&alice, match_id).await;
    let mut bob_ws = server.join(&bob, match_id).await;

    send_chat(&mut alice_ws, "  gg, duo queue?  ").await;
    for ws in [&mut alice_ws, &mut bob_ws] {
        let event = next_event(ws).await;
        assert_eq!(event["type"], "message");
        assert_eq!(event["content"], "gg, duo queue?");
        assert_eq!(event["sender_id"], alice.id);
        assert_eq!(event["sender_identity"], alice.email);
        assert_eq!(event["match_id"], match_id);
    }

    let res = server
        .post(&bob, &format!("/chat/messages/{match_id}"), json!({ "content": "sure" }))
        .await;
    assert_eq!(res.status(), 201);
    let stored: Value = res.json().await.unwrap();
    assert_eq!(stored["sender_id"], bob.id);

    for ws in [&mut alice_ws, &mut bob_ws] {
        let event = next_event(ws).await;
        assert_eq!(event["content"], "sure");
        assert_eq!(event["id"], stored["id"]);
        assert_eq!(event["sender_identity"], bob.email);
    }

    let rooms: Value = server.get(&alice, "/chat/rooms").await.json().await.unwrap();
    assert_eq!(rooms.as_array().unwrap().len(), 1);
    assert_eq!(rooms[0]["other_user"]["id"], bob.id);
    assert_eq!(rooms[0]["last_message"]["content"], "sure");
    assert_eq!(rooms[0]["unread_count"], 1);

    let history: Value = server.get(&alice, &format!("/chat/messages/{match_id}")).await.json().await.unwrap();
    let contents: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["gg, duo queue?", "sure"]);

    let rooms: Value = server.get(&alice, "/chat/rooms").await.json().await.unwrap();
    assert_eq!(rooms[0]["unread_count"], 0);
}

#[tokio::test]
async fn outsiders_are_kept_out_of_rooms() {
    let server = spawn_server().await;
    let (_alice, _bob, match_id) = server.matched_pair().await;
    let mallory = server.register("mallory@example.com", "Valorant").await;

    let res = server.get(&mallory, &format!("/chat/messages/{match_id}")).await;
    assert_eq!(res.status(), 404);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["detail"], "Chat not found or access denied");

    let res = server
        .post(&mallory, &format!("/chat/messages/{match_id}"), json!({ "content": "hi" }))
        .await;
    assert_eq!(res.status(), 404);

    let mut ws = server.connect(&mallory, match_id).await;
    assert_eq!(close_code(&mut ws).await, 1008);

    let url = format!("{}/chat/ws/{}?token=garbage", server.ws_base, match_id);
    let (mut ws, _) = connect_async(url).await.unwrap();
    assert_eq!(close_code(&mut ws).await, 1008);

    let url = format!("{}/chat/ws/{}", server.ws_base, match_id);
    let (mut ws, _) = connect_async(url).await.unwrap();
    assert_eq!(close_code(&mut ws).await, 1008);
}

#[tokio::test]
async fn messages_arrive_in_send_order() {
    let server = spawn_server().await;
    let (alice, bob, match_id) = server.matched_pair().await;

    let mut alice_ws = server.join(&alice, match_id).await;
    let mut bob_ws = server.join(&bob, match_id).await;

    for i in 0..10 {
        send_chat(&mut alice_ws, &format!("msg {i}")).await;
    }

    for ws in [&mut bob_ws, &mut alice_ws] {
        let mut last_id = 0;
        let mut last_created = chrono::DateTime::<chrono::Utc>::MIN_UTC;
        for i in 0..10 {
            let event = next_event(ws).await;
            assert_eq!(event["content"], format!("msg {i}"));
            let id = event["id"].as_i64().unwrap();
            assert!(id > last_id);
            last_id = id;

            let created = chrono::DateTime::parse_from_rfc3339(event["created_at"].as_str().unwrap())
                .unwrap()
                .with_timezone(&chrono::Utc);
            assert!(created >= last_created, "message {i} stamped before its predecessor");
            last_created = created;
        }
    }

    let history: Value = server.get(&bob, &format!("/chat/messages/{match_id}")).await.json().await.unwrap();
    assert_eq!(history.as_array().unwrap().len(), 10);
    assert_eq!(history[9]["content"], "msg 9");
}

#[tokio::test]
async fn store_failure_closes_the_sender_without_broadcasting() {
    let server = spawn_server().await;
    let (alice, bob, match_id) = server.matched_pair().await;

    let mut alice_ws = server.join(&alice, match_id).await;
    let mut bob_ws = server.join(&bob, match_id).await;

    server
        .db
        .with_conn_mut(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_messages BEFORE INSERT ON chat_messages
                 BEGIN SELECT RAISE(ABORT, 'store unavailable'); END;",
            )?;
            Ok(())
        })
        .unwrap();

    send_chat(&mut alice_ws, "lost in transit").await;
    assert_eq!(close_code(&mut alice_ws).await, 1011);

    let leaked = tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            match bob_ws.next().await {
                Some(Ok(Message::Text(text))) => return Some(text),
                Some(Ok(_)) => continue,
                _ => return None,
            }
        }
    })
    .await;
    assert!(!matches!(leaked, Ok(Some(_))), "bob received {leaked:?}");
}

#[tokio::test]
async fn malformed_payloads_are_dropped_without_closing() {
    let server = spawn_server().await;
    let (alice, _bob, match_id) = server.matched_pair().await;
    let mut ws = server.join(&alice, match_id).await;

    ws.send(Message::text("not json")).await.unwrap();
    ws.send(Message::text(r#"{"content":"   "}"#)).await.unwrap();
    ws.send(Message::text(json!({ "content": "x".repeat(2001) }).to_string()))
        .await
        .unwrap();
    send_chat(&mut ws, "still here").await;

    let event = next_event(&mut ws).await;
    assert_eq!(event["content"], "still here");

    let history: Value = server.get(&alice, &format!("/chat/messages/{match_id}")).await.json().await.unwrap();
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn auth_and_like_edge_cases() {
    let server = spawn_server().await;
    let alice = server.register("alice@example.com", "Valorant").await;

    let res = server
        .http
        .post(format!("{}/auth/register", server.base))
        .json(&json!({ "email": "ALICE@example.com", "password": "another-password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 409);

    let res = server
        .http
        .post(format!("{}/auth/login", server.base))
        .json(&json!({ "email": "alice@example.com", "password": "wrong-password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let res = server
        .http
        .post(format!("{}/auth/login", server.base))
        .json(&json!({ "email": "alice@example.com", "password": "hunter2hunter2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let me: Value = server.get(&alice, "/users/me").await.json().await.unwrap();
    assert_eq!(me["id"], alice.id);

    let self_like = server.like(&alice, &alice).await;
    assert_eq!(self_like["status"], "ERROR");

    let res = server.post(&alice, "/matches/like/999999", json!({})).await;
    assert_eq!(res.status(), 404);

    let res = server
        .http
        .patch(format!("{}/users/me", server.base))
        .bearer_auth(&alice.token)
        .json(&json!({ "is_active": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    // Deactivated accounts lose access with their existing token.
    let res = server.get(&alice, "/users/me").await;
    assert_eq!(res.status(), 401);
}
