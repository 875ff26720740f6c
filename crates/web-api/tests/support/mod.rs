#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::memory::PlaintextPasswordHasher;
use config::AppConfig;
use futures_util::StreamExt;
use reqwest::{multipart, Client};
use serde_json::Value;
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, Collaborators};

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// 内存存储上运行的测试服务器
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    _shutdown: oneshot::Sender<()>,
}

pub struct Session {
    pub id: String,
    pub token: String,
}

impl TestServer {
    pub async fn start() -> Self {
        let collaborators = Collaborators::in_memory(Arc::new(PlaintextPasswordHasher));
        let (state, _worker) = AppState::assemble(collaborators, AppConfig::default());
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

        Self {
            addr,
            client: Client::new(),
            _shutdown: shutdown_tx,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn register_form(name: &str, username: &str, password: &str) -> multipart::Form {
        let avatar = multipart::Part::bytes(vec![0x89, 0x50, 0x4e, 0x47])
            .file_name("avatar.png")
            .mime_str("image/png")
            .expect("mime");
        multipart::Form::new()
            .text("name", name.to_string())
            .text("username", username.to_string())
            .text("password", password.to_string())
            .text("bio", format!("hi, I am {name}"))
            .part("avatar", avatar)
    }

    pub async fn register(&self, name: &str, username: &str) -> Session {
        let response = self
            .client
            .post(self.url("/api/v1/user/new"))
            .multipart(Self::register_form(name, username, "secret"))
            .send()
            .await
            .expect("register");
        assert_eq!(response.status(), 201);
        let body: Value = response.json().await.expect("register json");
        Session {
            id: body["user"]["_id"].as_str().expect("user id").to_string(),
            token: body["token"].as_str().expect("token").to_string(),
        }
    }

    pub async fn get(&self, path: &str, token: &str) -> (u16, Value) {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("get");
        let status = response.status().as_u16();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    pub async fn put(&self, path: &str, token: &str, body: Value) -> (u16, Value) {
        let response = self
            .client
            .put(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("put");
        let status = response.status().as_u16();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    pub async fn connect_ws(&self, token: &str) -> WsStream {
        let url = format!("ws://{}/ws?token={}", self.addr, token);
        let (stream, _) = connect_async(url).await.expect("ws connect");
        stream
    }
}

/// 读取下一条文本帧并解析为 JSON
pub async fn next_event(ws: &mut WsStream) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for websocket event")
            .expect("websocket closed")
            .expect("websocket error");
        if let TungsteniteMessage::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("event json");
        }
    }
}

/// 跳过其他事件，直到收到指定类型
pub async fn wait_for(ws: &mut WsStream, kind: &str) -> Value {
    loop {
        let event = next_event(ws).await;
        if event["event"] == kind {
            return event;
        }
    }
}
