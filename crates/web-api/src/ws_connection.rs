//! 实时连接会话
//!
//! 每个连接拆成两个任务：
//! - 写任务：消费会话队列，批量合并后写出；空闲时发送协议 ping
//! - 读任务：维护心跳截止时间，处理客户端控制帧
//!
//! 任意一侧退出都会经由推送中心注销会话。

use std::time::Duration;

use application::{HubHandle, SessionHandle, SessionQueue, SessionReplier};
use axum::body::Bytes;
use axum::extract::ws::Message as WsMessage;
use config::RealtimeConfig;
use domain::{ClientFrame, Pong, ServerEvent, UserId};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};

/// 会话计时与大小限制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub write_wait: Duration,
    pub max_message_bytes: usize,
}

impl From<&RealtimeConfig> for SessionConfig {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            pong_wait: config.pong_wait(),
            ping_period: config.ping_period(),
            write_wait: config.write_wait(),
            max_message_bytes: config.max_message_bytes,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&RealtimeConfig::default())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PumpError {
    #[error("transport error: {0}")]
    Transport(#[from] axum::Error),
    #[error("write timed out")]
    Timeout,
    #[error("inbound message too large: {0} bytes")]
    TooLarge(usize),
    #[error("no liveness acknowledgement before deadline")]
    Idle,
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// 运行一个已完成握手的会话，直到任意一侧结束
pub async fn run_session<S, St>(
    sink: S,
    stream: St,
    hub: HubHandle,
    user_id: UserId,
    config: SessionConfig,
) where
    S: Sink<WsMessage, Error = axum::Error> + Unpin + Send + 'static,
    St: Stream<Item = Result<WsMessage, axum::Error>> + Unpin + Send + 'static,
{
    let (handle, queue) = SessionHandle::open(user_id, hub.session_queue_capacity());
    let session_id = handle.id();
    let replier = queue.replier();

    if let Err(err) = hub.register(handle).await {
        tracing::warn!(user_id = %user_id, error = %err, "会话注册失败");
        return;
    }
    tracing::info!(user_id = %user_id, session_id = %session_id, "实时连接已建立");

    let mut write_task = tokio::spawn(write_pump(sink, queue, config));
    let mut read_task = tokio::spawn(read_pump(stream, replier, user_id, config));

    tokio::select! {
        result = &mut write_task => {
            log_pump_exit(user_id, "write", result);
            read_task.abort();
            hub.unregister(user_id, session_id).await;
        }
        result = &mut read_task => {
            log_pump_exit(user_id, "read", result);
            // 注销后队列关闭，写任务发送 close 帧后自行退出
            hub.unregister(user_id, session_id).await;
            if timeout(config.write_wait, &mut write_task).await.is_err() {
                write_task.abort();
            }
        }
    }

    tracing::info!(user_id = %user_id, session_id = %session_id, "实时连接已关闭");
}

fn log_pump_exit(
    user_id: UserId,
    pump: &'static str,
    result: Result<Result<(), PumpError>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(())) => tracing::debug!(user_id = %user_id, pump, "pump finished"),
        Ok(Err(err)) => tracing::info!(user_id = %user_id, pump, error = %err, "会话因错误结束"),
        Err(err) => tracing::warn!(user_id = %user_id, pump, error = %err, "pump task failed"),
    }
}

/// 在写超时内发送一帧
async fn send_within<S>(sink: &mut S, frame: WsMessage, write_wait: Duration) -> Result<(), PumpError>
where
    S: Sink<WsMessage, Error = axum::Error> + Unpin,
{
    match timeout(write_wait, sink.send(frame)).await {
        Ok(result) => result.map_err(PumpError::from),
        Err(_) => Err(PumpError::Timeout),
    }
}

fn encode(event: &ServerEvent) -> Result<String, PumpError> {
    Ok(serde_json::to_string(event)?)
}

async fn write_pump<S>(mut sink: S, mut queue: SessionQueue, config: SessionConfig) -> Result<(), PumpError>
where
    S: Sink<WsMessage, Error = axum::Error> + Unpin,
{
    let mut ticker = interval_at(Instant::now() + config.ping_period, config.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = queue.recv() => {
                let Some(event) = next else {
                    let _ = send_within(&mut sink, WsMessage::Close(None), config.write_wait).await;
                    return Ok(());
                };

                // 把此刻已排队的事件合并成一帧，按行分隔
                let mut batch = encode(&event)?;
                while let Some(event) = queue.try_recv() {
                    batch.push('\n');
                    batch.push_str(&encode(&event)?);
                }
                send_within(&mut sink, WsMessage::Text(batch.into()), config.write_wait).await?;
                ticker.reset();
            }
            _ = ticker.tick() => {
                send_within(&mut sink, WsMessage::Ping(Bytes::new()), config.write_wait).await?;
            }
        }
    }
}

async fn read_pump<St>(
    mut stream: St,
    replier: SessionReplier,
    user_id: UserId,
    config: SessionConfig,
) -> Result<(), PumpError>
where
    St: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
{
    let mut deadline = Instant::now() + config.pong_wait;

    loop {
        let frame = match timeout_at(deadline, stream.next()).await {
            Err(_) => return Err(PumpError::Idle),
            Ok(None) => return Ok(()),
            Ok(Some(Err(err))) => return Err(PumpError::Transport(err)),
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            WsMessage::Text(text) => {
                let size = text.as_str().len();
                if size > config.max_message_bytes {
                    return Err(PumpError::TooLarge(size));
                }
                match ClientFrame::parse(text.as_str()) {
                    Some(ClientFrame::Ping) => {
                        deadline = Instant::now() + config.pong_wait;
                        if !replier.reply(ServerEvent::Pong(Pong::now())) {
                            tracing::debug!(user_id = %user_id, "pong 未能写入会话队列");
                        }
                    }
                    Some(ClientFrame::ReadReceipt { notification_id }) => {
                        tracing::debug!(user_id = %user_id, notification_id = ?notification_id, "收到已读回执");
                    }
                    Some(ClientFrame::Unknown) | None => {
                        tracing::debug!(user_id = %user_id, "忽略无法识别的客户端消息");
                    }
                }
            }
            WsMessage::Binary(data) => {
                if data.len() > config.max_message_bytes {
                    return Err(PumpError::TooLarge(data.len()));
                }
            }
            WsMessage::Pong(_) => {
                deadline = Instant::now() + config.pong_wait;
            }
            // 协议层 ping 由 axum 自动应答
            WsMessage::Ping(_) => {}
            WsMessage::Close(_) => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use application::{ConnectionHub, HubConfig};
    use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
    use serde_json::{json, Value};
    use uuid::Uuid;

    type FrameTx = UnboundedSender<Result<WsMessage, axum::Error>>;

    fn config() -> SessionConfig {
        SessionConfig {
            pong_wait: Duration::from_secs(10),
            ping_period: Duration::from_secs(9),
            write_wait: Duration::from_secs(1),
            max_message_bytes: 64,
        }
    }

    fn user() -> UserId {
        UserId::from(Uuid::new_v4())
    }

    fn outbound() -> (
        impl Sink<WsMessage, Error = axum::Error> + Unpin + Send + 'static,
        UnboundedReceiver<WsMessage>,
    ) {
        let (tx, rx) = unbounded();
        (tx.sink_map_err(|err| axum::Error::new(err)), rx)
    }

    fn inbound() -> (FrameTx, UnboundedReceiver<Result<WsMessage, axum::Error>>) {
        unbounded()
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn text(frame: WsMessage) -> String {
        match frame {
            WsMessage::Text(text) => text.as_str().to_owned(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    fn lines(frame: WsMessage) -> Vec<Value> {
        text(frame)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn queued_events_are_coalesced_into_one_frame() {
        let (handle, queue) = SessionHandle::open(user(), 8);
        let replier = queue.replier();
        assert!(replier.reply(ServerEvent::Notification(json!({"n": 1}))));
        assert!(replier.reply(ServerEvent::Broadcast(json!({"n": 2}))));

        let (sink, mut frames) = outbound();
        let pump = tokio::spawn(write_pump(sink, queue, config()));

        let batch = lines(frames.next().await.unwrap());
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0]["type"], "notification");
        assert_eq!(batch[1]["type"], "broadcast");
        assert_eq!(batch[1]["payload"]["n"], 2);

        // 队列关闭后发送 close 帧并退出
        drop(handle);
        assert!(matches!(frames.next().await, Some(WsMessage::Close(None))));
        assert!(pump.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_writer_sends_protocol_ping() {
        let (_handle, queue) = SessionHandle::open(user(), 8);
        let (sink, mut frames) = outbound();
        let started = Instant::now();
        let _pump = tokio::spawn(write_pump(sink, queue, config()));

        assert!(matches!(frames.next().await, Some(WsMessage::Ping(_))));
        assert!(started.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test]
    async fn write_pump_fails_when_peer_is_gone() {
        let (_handle, queue) = SessionHandle::open(user(), 8);
        let replier = queue.replier();
        let (sink, frames) = outbound();
        drop(frames);

        assert!(replier.reply(ServerEvent::Broadcast(json!({}))));
        let result = write_pump(sink, queue, config()).await;
        assert!(matches!(result, Err(PumpError::Transport(_))));
    }

    #[tokio::test]
    async fn json_ping_is_answered_on_own_queue() {
        let (_handle, mut queue) = SessionHandle::open(user(), 8);
        let (tx, rx) = inbound();
        let pump = tokio::spawn(read_pump(rx, queue.replier(), user(), config()));

        tx.unbounded_send(Ok(WsMessage::Text(String::from(r#"{"type":"ping"}"#).into())))
            .unwrap();
        let reply = queue.recv().await.unwrap();
        assert!(matches!(*reply, ServerEvent::Pong(_)));

        // 已读回执、未知类型、非法 JSON 都不产生回复，也不断开
        for frame in [r#"{"type":"read_receipt"}"#, r#"{"type":"typing"}"#, "not json"] {
            tx.unbounded_send(Ok(WsMessage::Text(String::from(frame).into())))
                .unwrap();
        }
        drop(tx);

        assert!(pump.await.unwrap().is_ok());
        assert!(queue.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_hits_liveness_deadline() {
        let (_handle, queue) = SessionHandle::open(user(), 8);
        let (_tx, rx) = inbound();

        let result = read_pump(rx, queue.replier(), user(), config()).await;
        assert!(matches!(result, Err(PumpError::Idle)));
    }

    #[tokio::test(start_paused = true)]
    async fn pong_frame_extends_deadline() {
        let (_handle, queue) = SessionHandle::open(user(), 8);
        let (tx, rx) = inbound();
        let pump = tokio::spawn(read_pump(rx, queue.replier(), user(), config()));

        tokio::time::sleep(Duration::from_secs(8)).await;
        tx.unbounded_send(Ok(WsMessage::Pong(Bytes::new()))).unwrap();
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert!(!pump.is_finished());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(matches!(pump.await.unwrap(), Err(PumpError::Idle)));
    }

    #[tokio::test]
    async fn oversized_message_ends_session() {
        let (_handle, queue) = SessionHandle::open(user(), 8);
        let (tx, rx) = inbound();
        tx.unbounded_send(Ok(WsMessage::Text("x".repeat(65).into())))
            .unwrap();

        let result = read_pump(rx, queue.replier(), user(), config()).await;
        assert!(matches!(result, Err(PumpError::TooLarge(65))));
    }

    #[tokio::test]
    async fn session_registers_receives_and_unregisters() {
        let (hub, _task) = ConnectionHub::spawn(HubConfig::default(), None);
        let user_id = user();
        let (sink, mut frames) = outbound();
        let (tx, rx) = inbound();

        let session = tokio::spawn(run_session(sink, rx, hub.clone(), user_id, config()));
        wait_until(|| hub.is_online(user_id)).await;

        assert!(hub.send_to_user(user_id, json!({"message": "hello"})));
        let mut notification = None;
        while notification.is_none() {
            let frame = frames.next().await.unwrap();
            notification = lines(frame)
                .into_iter()
                .find(|event| event["type"] == "notification");
        }
        assert_eq!(notification.unwrap()["payload"]["message"], "hello");

        drop(tx);
        session.await.unwrap();
        wait_until(|| !hub.is_online(user_id)).await;
        assert_eq!(hub.session_count(user_id), 0);
        assert!(matches!(frames.next().await, Some(WsMessage::Close(None))));
    }
}
