use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use application::HubStats;
use domain::{Post, PostId, UserId};

use crate::{error::ApiError, state::AppState, ws_connection::run_session};

const DEFAULT_FEED_LIMIT: usize = 20;
const MAX_FEED_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeedQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Serialize)]
struct FeedPage {
    posts: Vec<Post>,
    limit: usize,
    offset: usize,
}

#[derive(Debug, Serialize)]
struct OnlineUsers {
    user_ids: Vec<UserId>,
    count: usize,
}

#[derive(Debug, Serialize)]
struct UserPresence {
    user_id: UserId,
    online: bool,
    sessions: usize,
}

#[derive(Debug, Serialize)]
struct DeliveryReceipt {
    accepted: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/feed/engagement", get(engagement_feed))
        .route("/presence/online", get(online_users))
        .route("/presence/stats", get(hub_stats))
        .route("/presence/{user_id}", get(user_presence))
        .route("/notifications/{user_id}", post(notify_user))
        .route("/broadcast", post(broadcast))
        .route(
            "/engagement/posts/{post_id}",
            post(track_post).delete(remove_post),
        )
        .route("/engagement/posts/{post_id}/rescore", post(rescore_post))
        .route("/engagement/index", delete(invalidate_index))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// 握手前完成认证，失败直接返回 401，不建立会话
async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let user_id = state
        .jwt_service
        .extract_user(query.token.as_deref(), &headers)?;
    let ws = ws.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;

    let hub = state.hub.clone();
    let session = state.session;
    Ok(ws
        .max_message_size(session.max_message_bytes)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            run_session(sink, stream, hub, user_id, session).await;
        }))
}

async fn engagement_feed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FeedQuery>,
) -> Result<Json<FeedPage>, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_FEED_LIMIT)
        .min(MAX_FEED_LIMIT);
    let offset = query.offset.unwrap_or(0);
    let posts = state.feed.ranked_feed(limit, offset).await?;

    Ok(Json(FeedPage {
        posts,
        limit,
        offset,
    }))
}

async fn online_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<OnlineUsers>, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;

    let user_ids = state.hub.online_user_ids();
    let count = user_ids.len();
    Ok(Json(OnlineUsers { user_ids, count }))
}

async fn hub_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<HubStats>, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;
    Ok(Json(state.hub.stats()))
}

async fn user_presence(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserPresence>, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;

    let user_id = UserId::from(user_id);
    Ok(Json(UserPresence {
        user_id,
        online: state.hub.is_online(user_id),
        sessions: state.hub.session_count(user_id),
    }))
}

/// 定向通知，尽力投递：用户离线时静默丢弃
async fn notify_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<DeliveryReceipt>), ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;

    let accepted = state.hub.send_to_user(UserId::from(user_id), payload);
    Ok((StatusCode::ACCEPTED, Json(DeliveryReceipt { accepted })))
}

async fn broadcast(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<DeliveryReceipt>), ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;

    let accepted = state.hub.broadcast_all(payload);
    Ok((StatusCode::ACCEPTED, Json(DeliveryReceipt { accepted })))
}

/// 互动（点赞、评论、浏览）变化后重算帖子热度
async fn rescore_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;
    state.rescorer.update_score(PostId::from(post_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn track_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;
    state.rescorer.track_new_post(PostId::from(post_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;
    state.rescorer.remove_post(PostId::from(post_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn invalidate_index(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;
    state.feed.ranker().invalidate().await;
    Ok(StatusCode::NO_CONTENT)
}
