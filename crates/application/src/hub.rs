//! 实时推送中心
//!
//! 单个事件循环独占所有会话的注册表：注册/注销走控制通道，
//! 推送请求走有界的投递通道。投递时对每个会话的发送队列做非阻塞写入，
//! 队列写满的慢速会话会被立即踢出，与正常注销走同一条移除路径
//! （包括最后一个会话离开时的下线广播）。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use domain::{Envelope, ServerEvent, SessionId, UserId};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::task::JoinHandle;

use crate::error::{ApplicationError, ApplicationResult};
use crate::presence::{PresenceDirectory, PresenceObserver};

/// 发送队列中的事件，广播时多个会话共享同一份
pub type OutboundEvent = Arc<ServerEvent>;

/// 推送中心容量配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    pub control_capacity: usize,
    pub delivery_capacity: usize,
    pub session_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            control_capacity: 64,
            delivery_capacity: 256,
            session_queue_capacity: 256,
        }
    }
}

impl From<&config::RealtimeConfig> for HubConfig {
    fn from(config: &config::RealtimeConfig) -> Self {
        Self {
            control_capacity: config.control_capacity,
            delivery_capacity: config.delivery_capacity,
            session_queue_capacity: config.outbound_queue_capacity,
        }
    }
}

/// 会话的投递端，注册后由推送中心独占持有。
///
/// 推送中心丢弃它即关闭该会话的发送队列。
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    user_id: UserId,
    sender: mpsc::Sender<OutboundEvent>,
}

impl SessionHandle {
    /// 为用户新建一个会话及其有界发送队列
    pub fn open(user_id: UserId, capacity: usize) -> (Self, SessionQueue) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let id = SessionId::generate();
        let queue = SessionQueue {
            id,
            user_id,
            replier: SessionReplier {
                sender: sender.downgrade(),
            },
            receiver,
        };
        (
            Self {
                id,
                user_id,
                sender,
            },
            queue,
        )
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

/// 会话发送队列的读取端，由写循环持有
#[derive(Debug)]
pub struct SessionQueue {
    id: SessionId,
    user_id: UserId,
    replier: SessionReplier,
    receiver: mpsc::Receiver<OutboundEvent>,
}

impl SessionQueue {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// 等待下一条事件，推送中心关闭队列且已取完时返回 `None`
    pub async fn recv(&mut self) -> Option<OutboundEvent> {
        self.receiver.recv().await
    }

    /// 取出一条已在队列中的事件，不等待
    pub fn try_recv(&mut self) -> Option<OutboundEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn replier(&self) -> SessionReplier {
        self.replier.clone()
    }
}

/// 直接向本会话回写（例如心跳应答）。
///
/// 只持有弱引用，不会阻止推送中心关闭队列。
#[derive(Debug, Clone)]
pub struct SessionReplier {
    sender: mpsc::WeakSender<OutboundEvent>,
}

impl SessionReplier {
    /// 队列已关闭或已满时返回 false
    pub fn reply(&self, event: ServerEvent) -> bool {
        match self.sender.upgrade() {
            Some(sender) => sender.try_send(Arc::new(event)).is_ok(),
            None => false,
        }
    }
}

#[derive(Debug)]
enum ControlCommand {
    Register(SessionHandle),
    Unregister {
        user_id: UserId,
        session_id: SessionId,
    },
}

#[derive(Debug, Default)]
struct HubCounters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

/// 推送中心运行统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// 成功写入会话队列的事件数
    pub delivered: u64,
    /// 投递通道已满被丢弃的推送请求数
    pub dropped: u64,
    /// 因发送队列写满被踢出的会话数
    pub evicted: u64,
    pub online_users: usize,
    pub sessions: usize,
}

/// 推送中心的句柄，可以任意克隆
#[derive(Clone)]
pub struct HubHandle {
    control: mpsc::Sender<ControlCommand>,
    delivery: mpsc::Sender<Envelope>,
    directory: Arc<PresenceDirectory>,
    counters: Arc<HubCounters>,
    session_queue_capacity: usize,
}

impl HubHandle {
    /// 新会话使用的发送队列容量
    pub fn session_queue_capacity(&self) -> usize {
        self.session_queue_capacity
    }

    /// 注册会话，控制通道满时等待
    pub async fn register(&self, session: SessionHandle) -> ApplicationResult<()> {
        self.control
            .send(ControlCommand::Register(session))
            .await
            .map_err(|_| ApplicationError::HubUnavailable)
    }

    /// 注销会话，重复注销或会话已被踢出时不产生任何效果
    pub async fn unregister(&self, user_id: UserId, session_id: SessionId) {
        let command = ControlCommand::Unregister {
            user_id,
            session_id,
        };
        if self.control.send(command).await.is_err() {
            tracing::debug!(user_id = %user_id, session_id = %session_id, "推送中心已停止，忽略注销");
        }
    }

    /// 推送通知给某个用户的所有会话
    pub fn send_to_user(&self, user_id: UserId, payload: Value) -> bool {
        self.deliver(Envelope::to_user(user_id, payload))
    }

    /// 广播给所有在线会话
    pub fn broadcast_all(&self, payload: Value) -> bool {
        self.deliver(Envelope::broadcast(payload))
    }

    /// 非阻塞地提交一条推送，投递通道已满时丢弃并返回 false
    pub fn deliver(&self, envelope: Envelope) -> bool {
        match self.delivery.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(envelope)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    kind = envelope.event.kind(),
                    target = ?envelope.target,
                    "投递通道已满，丢弃推送"
                );
                false
            }
            Err(TrySendError::Closed(envelope)) => {
                tracing::warn!(kind = envelope.event.kind(), "推送中心已停止，丢弃推送");
                false
            }
        }
    }

    pub fn online_user_ids(&self) -> Vec<UserId> {
        self.directory.online_user_ids()
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.directory.is_online(user_id)
    }

    pub fn session_count(&self, user_id: UserId) -> usize {
        self.directory.session_count(user_id)
    }

    pub fn total_session_count(&self) -> usize {
        self.directory.total_session_count()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            online_users: self.directory.online_user_ids().len(),
            sessions: self.directory.total_session_count(),
        }
    }
}

/// 推送中心事件循环，独占会话注册表
pub struct ConnectionHub {
    sessions: HashMap<UserId, HashMap<SessionId, mpsc::Sender<OutboundEvent>>>,
    control: mpsc::Receiver<ControlCommand>,
    delivery: mpsc::Receiver<Envelope>,
    directory: Arc<PresenceDirectory>,
    counters: Arc<HubCounters>,
    observer: Option<Arc<dyn PresenceObserver>>,
}

impl ConnectionHub {
    pub fn new(
        config: HubConfig,
        observer: Option<Arc<dyn PresenceObserver>>,
    ) -> (Self, HubHandle) {
        let (control_tx, control_rx) = mpsc::channel(config.control_capacity.max(1));
        let (delivery_tx, delivery_rx) = mpsc::channel(config.delivery_capacity.max(1));
        let directory = Arc::new(PresenceDirectory::new());
        let counters = Arc::new(HubCounters::default());

        let handle = HubHandle {
            control: control_tx,
            delivery: delivery_tx,
            directory: directory.clone(),
            counters: counters.clone(),
            session_queue_capacity: config.session_queue_capacity.max(1),
        };
        let hub = Self {
            sessions: HashMap::new(),
            control: control_rx,
            delivery: delivery_rx,
            directory,
            counters,
            observer,
        };
        (hub, handle)
    }

    /// 创建并在后台运行推送中心；所有句柄被丢弃后循环退出
    pub fn spawn(
        config: HubConfig,
        observer: Option<Arc<dyn PresenceObserver>>,
    ) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config, observer);
        let task = tokio::spawn(hub.run());
        (handle, task)
    }

    pub async fn run(mut self) {
        tracing::info!("实时推送中心启动");
        loop {
            tokio::select! {
                biased;
                command = self.control.recv() => match command {
                    Some(command) => self.handle_control(command),
                    None => break,
                },
                envelope = self.delivery.recv() => match envelope {
                    Some(envelope) => self.dispatch(envelope),
                    None => break,
                },
            }
        }
        self.shutdown();
    }

    fn handle_control(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Register(session) => self.register(session),
            ControlCommand::Unregister {
                user_id,
                session_id,
            } => {
                if self.remove_session(user_id, session_id) {
                    self.announce(user_id, false);
                }
            }
        }
    }

    fn register(&mut self, session: SessionHandle) {
        let SessionHandle {
            id,
            user_id,
            sender,
        } = session;
        let sessions = self.sessions.entry(user_id).or_default();
        let first = sessions.is_empty();
        sessions.insert(id, sender);
        let count = sessions.len();
        self.directory.record(user_id, count);

        tracing::debug!(user_id = %user_id, session_id = %id, sessions = count, "会话已注册");

        if first {
            self.announce(user_id, true);
        }
    }

    /// 移除会话，返回该用户是否因此下线
    fn remove_session(&mut self, user_id: UserId, session_id: SessionId) -> bool {
        let Some(sessions) = self.sessions.get_mut(&user_id) else {
            return false;
        };
        if sessions.remove(&session_id).is_none() {
            return false;
        }
        let remaining = sessions.len();
        self.directory.record(user_id, remaining);

        tracing::debug!(user_id = %user_id, session_id = %session_id, sessions = remaining, "会话已移除");

        if remaining == 0 {
            self.sessions.remove(&user_id);
            true
        } else {
            false
        }
    }

    fn announce(&mut self, user_id: UserId, online: bool) {
        self.notify_observer(user_id, online);
        self.dispatch(Envelope::presence(user_id, online));
    }

    fn notify_observer(&self, user_id: UserId, online: bool) {
        if let Some(observer) = &self.observer {
            observer.presence_changed(user_id, online);
        }
    }

    /// 扇出一条推送；被踢出的会话产生的下线事件排在后面继续扇出
    fn dispatch(&mut self, envelope: Envelope) {
        let mut pending = VecDeque::from([envelope]);
        while let Some(envelope) = pending.pop_front() {
            let event = Arc::new(envelope.event);
            let evicted = self.fan_out(envelope.target, &event);

            for (user_id, session_id) in evicted {
                if self.remove_session(user_id, session_id) {
                    self.notify_observer(user_id, false);
                    pending.push_back(Envelope::presence(user_id, false));
                }
            }
        }
    }

    fn fan_out(&self, target: Option<UserId>, event: &OutboundEvent) -> Vec<(UserId, SessionId)> {
        let mut evicted = Vec::new();
        let mut offer = |user_id: UserId, session_id: SessionId, sender: &mpsc::Sender<OutboundEvent>| {
            match sender.try_send(Arc::clone(event)) {
                Ok(()) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    self.counters.evicted.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        user_id = %user_id,
                        session_id = %session_id,
                        "发送队列已满，断开慢速会话"
                    );
                    evicted.push((user_id, session_id));
                }
                Err(TrySendError::Closed(_)) => {
                    evicted.push((user_id, session_id));
                }
            }
        };

        match target {
            Some(user_id) => {
                if let Some(sessions) = self.sessions.get(&user_id) {
                    for (session_id, sender) in sessions {
                        offer(user_id, *session_id, sender);
                    }
                }
            }
            None => {
                for (user_id, sessions) in &self.sessions {
                    for (session_id, sender) in sessions {
                        offer(*user_id, *session_id, sender);
                    }
                }
            }
        }
        evicted
    }

    fn shutdown(&mut self) {
        let sessions: usize = self.sessions.values().map(HashMap::len).sum();
        self.sessions.clear();
        self.directory.clear();
        tracing::info!(sessions, "实时推送中心停止");
    }
}
