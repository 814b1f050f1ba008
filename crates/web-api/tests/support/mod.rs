#![allow(dead_code)]

use std::{collections::VecDeque, net::SocketAddr, sync::Arc, time::Duration};

use application::{
    repository::memory::MemoryPostRepository, score_store::memory::MemoryScoreStore,
    ConnectionHub, EngagementRanker, FeedAssembler, FeedService, HubConfig, HubHandle, Rescorer,
    ScoreStore,
};
use domain::{PostRepository, UserId};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;
use web_api::{router, AppState, JwtConfig, JwtService, SessionConfig};

pub const TEST_SECRET: &str = "integration-test-secret-key-with-32-chars";

/// 绑定在随机端口上的完整应用，数据层全部使用内存实现
pub struct TestApp {
    pub addr: SocketAddr,
    pub hub: HubHandle,
    pub posts: MemoryPostRepository,
    pub store: Arc<MemoryScoreStore>,
    pub http: reqwest::Client,
    jwt: Arc<JwtService>,
    _shutdown: oneshot::Sender<()>,
}

pub async fn spawn_app() -> TestApp {
    let store = Arc::new(MemoryScoreStore::new(Duration::from_secs(1800)));
    serve(store.clone(), store).await
}

/// 使用指定排行缓存启动应用，此时 `TestApp::store` 不参与排行
pub async fn spawn_app_with_score_store(score_store: Arc<dyn ScoreStore>) -> TestApp {
    let detached = Arc::new(MemoryScoreStore::new(Duration::from_secs(1800)));
    serve(score_store, detached).await
}

async fn serve(score_store: Arc<dyn ScoreStore>, store: Arc<MemoryScoreStore>) -> TestApp {
    let posts = MemoryPostRepository::new();
    let repository: Arc<dyn PostRepository> = Arc::new(posts.clone());

    let ranker = Arc::new(EngagementRanker::new(repository.clone(), score_store));
    let feed = Arc::new(FeedService::new(
        ranker.clone(),
        FeedAssembler::new(repository),
    ));
    let (hub, _hub_task) = ConnectionHub::spawn(HubConfig::default(), None);
    let jwt = Arc::new(JwtService::new(JwtConfig {
        secret: TEST_SECRET.to_string(),
        expiration_hours: 1,
    }));

    let state = AppState::new(
        hub.clone(),
        feed,
        ranker as Arc<dyn Rescorer>,
        jwt.clone(),
        SessionConfig::default(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let app = router(state);
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    TestApp {
        addr,
        hub,
        posts,
        store,
        http: reqwest::Client::new(),
        jwt,
        _shutdown: shutdown_tx,
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, token: Option<&str>) -> String {
        match token {
            Some(token) => format!("ws://{}/ws?token={}", self.addr, token),
            None => format!("ws://{}/ws", self.addr),
        }
    }

    pub fn token_for(&self, user_id: UserId) -> String {
        self.jwt
            .generate_token(Uuid::from(user_id))
            .expect("token")
    }

    /// 任意用户的 bearer 头，用于调用需要认证的接口
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token_for(UserId::from(Uuid::new_v4())))
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.http
            .get(self.url(path))
            .header("Authorization", self.bearer())
            .send()
            .await
            .expect("request")
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.http
            .post(self.url(path))
            .header("Authorization", self.bearer())
            .json(body)
            .send()
            .await
            .expect("request")
    }

    pub async fn post_empty(&self, path: &str) -> reqwest::Response {
        self.http
            .post(self.url(path))
            .header("Authorization", self.bearer())
            .send()
            .await
            .expect("request")
    }

    pub async fn delete(&self, path: &str) -> reqwest::Response {
        self.http
            .delete(self.url(path))
            .header("Authorization", self.bearer())
            .send()
            .await
            .expect("request")
    }

    /// 以 `user_id` 身份建立实时连接，并等待推送中心完成注册
    pub async fn connect(&self, user_id: UserId) -> WsClient {
        let before = self.hub.session_count(user_id);
        let token = self.token_for(user_id);
        let (stream, _) = connect_async(self.ws_url(Some(token.as_str())))
            .await
            .expect("websocket handshake");

        self.wait_until(|| self.hub.session_count(user_id) > before)
            .await;
        WsClient {
            stream,
            pending: VecDeque::new(),
        }
    }

    pub async fn wait_until(&self, condition: impl Fn() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }
}

/// 实时连接客户端，按行拆分合并写出的事件
pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pending: VecDeque<Value>,
}

impl WsClient {
    pub async fn next_event(&mut self) -> Value {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }

            let frame = timeout(Duration::from_secs(5), self.stream.next())
                .await
                .expect("timed out waiting for event")
                .expect("stream ended")
                .expect("websocket error");

            match frame {
                Message::Text(text) => {
                    for line in text.as_str().lines() {
                        self.pending
                            .push_back(serde_json::from_str(line).expect("event json"));
                    }
                }
                Message::Close(_) => panic!("connection closed while waiting for event"),
                _ => {}
            }
        }
    }

    pub async fn send_text(&mut self, text: &str) {
        self.stream
            .send(Message::text(text.to_string()))
            .await
            .expect("send");
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
