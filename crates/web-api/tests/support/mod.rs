#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use application::{Clock, InMemoryStorage, SystemClock};
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Message as TungsteniteMessage},
    MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;
use web_api::{router, AppState, JwtConfig, JwtService, Repositories};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const TEST_SECRET: &str = "test-secret-key-with-at-least-32-chars";

pub fn build_state() -> (AppState, Arc<InMemoryStorage>) {
    let storage = Arc::new(InMemoryStorage::default());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let jwt_service = Arc::new(JwtService::new(JwtConfig {
        secret: TEST_SECRET.to_string(),
        expiration_hours: 1,
    }));

    let state = AppState::new(
        Repositories {
            users: storage.clone(),
            rooms: storage.clone(),
            messages: storage.clone(),
        },
        jwt_service,
        clock,
    );
    (state, storage)
}

pub struct TestUser {
    pub id: Uuid,
    pub username: String,
    pub token: String,
}

pub struct TestServer {
    pub base_http: String,
    pub base_ws: String,
    pub client: Client,
    pub storage: Arc<InMemoryStorage>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn spawn_server() -> TestServer {
    let (state, storage) = build_state();
    let app = router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    TestServer {
        base_http: format!("http://{}", addr),
        base_ws: format!("ws://{}", addr),
        client: Client::new(),
        storage,
        shutdown: Some(shutdown_tx),
    }
}

impl TestServer {
    pub async fn register(&self, username: &str) -> TestUser {
        let body = self
            .client
            .post(format!("{}/api/v1/users", self.base_http))
            .json(&json!({ "username": username }))
            .send()
            .await
            .expect("register")
            .json::<Value>()
            .await
            .expect("register json");

        TestUser {
            id: body["user"]["id"]
                .as_str()
                .expect("user id")
                .parse()
                .expect("uuid"),
            username: username.to_string(),
            token: body["token"].as_str().expect("token").to_string(),
        }
    }

    pub async fn create_room(&self, owner: &TestUser, name: &str, members: &[Uuid]) -> String {
        let body = self
            .client
            .post(format!("{}/api/v1/rooms", self.base_http))
            .bearer_auth(&owner.token)
            .json(&json!({ "room_name": name, "user_ids": members }))
            .send()
            .await
            .expect("create room")
            .json::<Value>()
            .await
            .expect("room json");
        body["id"].as_str().expect("room id").to_string()
    }

    pub async fn add_members(&self, owner: &TestUser, room_id: &str, members: &[Uuid]) {
        let response = self
            .client
            .post(format!("{}/api/v1/rooms/{}/members", self.base_http, room_id))
            .bearer_auth(&owner.token)
            .json(&json!({ "user_ids": members }))
            .send()
            .await
            .expect("add members");
        assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
    }

    pub async fn remove_members(&self, owner: &TestUser, room_id: &str, members: &[Uuid]) {
        let response = self
            .client
            .delete(format!("{}/api/v1/rooms/{}/members", self.base_http, room_id))
            .bearer_auth(&owner.token)
            .json(&json!({ "user_ids": members }))
            .send()
            .await
            .expect("remove members");
        assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
    }

    pub async fn history(&self, user: &TestUser, room_id: &str, cursor: Option<&str>) -> Value {
        let mut request = self
            .client
            .get(format!("{}/api/v1/rooms/{}/messages", self.base_http, room_id))
            .bearer_auth(&user.token);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        request
            .send()
            .await
            .expect("history")
            .json::<Value>()
            .await
            .expect("history json")
    }

    pub fn chat_url(&self, room_id: &str) -> String {
        format!("{}/ws/chat/{}/", self.base_ws, room_id)
    }

    pub async fn connect(
        &self,
        room_id: &str,
        authorization: Option<String>,
    ) -> Result<WsClient, tokio_tungstenite::tungstenite::Error> {
        let mut request = self.chat_url(room_id).into_client_request()?;
        if let Some(value) = authorization {
            request
                .headers_mut()
                .insert("authorization", value.parse().expect("header value"));
        }
        connect_async(request).await.map(|(ws, _)| ws)
    }

    pub async fn join(&self, room_id: &str, user: &TestUser) -> WsClient {
        self.connect(room_id, Some(format!("Bearer {}", user.token)))
            .await
            .expect("websocket connect")
    }
}

/// 读取下一条 JSON 事件，跳过控制帧
pub async fn next_event(ws: &mut WsClient) -> Value {
    loop {
        let message = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("websocket error");
        match message {
            TungsteniteMessage::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("event json")
            }
            TungsteniteMessage::Ping(_) | TungsteniteMessage::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// 确认短时间内没有新事件
pub async fn assert_silent(ws: &mut WsClient) {
    if let Ok(Some(Ok(message))) = timeout(Duration::from_millis(200), ws.next()).await {
        panic!("unexpected frame: {message:?}");
    }
}

pub fn text_frame(value: Value) -> TungsteniteMessage {
    TungsteniteMessage::Text(value.to_string().into())
}

pub fn media_frame(metadata: Value, payload: &[u8]) -> TungsteniteMessage {
    let mut bytes = metadata.to_string().into_bytes();
    bytes.extend_from_slice(b"<delimiter>");
    bytes.extend_from_slice(payload);
    TungsteniteMessage::Binary(bytes.into())
}
