/// 连接生命周期管理器
///
/// 拥有端点、注册器、当前会话和所有定时器。所有状态只在一个任务中修改：
/// 端点回调、定时器到期都以 `LifecycleEvent` 的形式进入事件队列，逐个处理。
///
/// 每次构造端点都会分配新的 generation，已释放端点发出的事件会被忽略。
/// 远程控制 NOTIFY 进入单独的 FIFO 队列，前一条执行完才处理下一条。
use super::backoff::{delay_with, RetryState};
use super::keepalive::KeepAlive;
use super::state::{
    ConnectionState, RegistrationState, StatusBoard, StatusSink, StatusSnapshot,
};
use crate::broadsoft::{remote_control, AutoAnswerScheduler, RemoteControlOptions};
use crate::config::{AgentOptions, EndpointConfig};
use crate::error::{ConfigError, SipError};
use crate::registration::Registrar;
use crate::signaling::{
    EndpointDelegate, EndpointSpec, IncomingInvite, IncomingNotify, MediaStream, Session,
    SessionState, SignalingEndpoint, SignalingEngine,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 进入管理器事件队列的事件
#[derive(Debug)]
pub enum LifecycleEvent {
    Connected { generation: u64 },
    Disconnected { generation: u64, reason: Option<String> },
    Invite { generation: u64, invite: IncomingInvite },
    Notify { generation: u64, notify: IncomingNotify },
    RetryDue { generation: u64 },
    /// 注册器后台刷新失败
    RegistrationLost { generation: u64, reason: String },
}

/// 把端点回调转成带 generation 的事件
struct EventForwarder {
    generation: u64,
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl EventForwarder {
    fn forward(&self, event: LifecycleEvent) {
        if self.tx.send(event).is_err() {
            debug!("生命周期管理器已退出，丢弃端点事件");
        }
    }
}

impl EndpointDelegate for EventForwarder {
    fn on_connect(&self) {
        self.forward(LifecycleEvent::Connected {
            generation: self.generation,
        });
    }

    fn on_disconnect(&self, reason: Option<String>) {
        self.forward(LifecycleEvent::Disconnected {
            generation: self.generation,
            reason,
        });
    }

    fn on_invite(&self, invite: IncomingInvite) {
        self.forward(LifecycleEvent::Invite {
            generation: self.generation,
            invite,
        });
    }

    fn on_notify(&self, notify: IncomingNotify) {
        self.forward(LifecycleEvent::Notify {
            generation: self.generation,
            notify,
        });
    }
}

/// 按到达顺序逐条执行远程控制 NOTIFY
struct NotifyQueue {
    tx: mpsc::UnboundedSender<IncomingNotify>,
    task: JoinHandle<()>,
}

impl NotifyQueue {
    fn spawn(options: RemoteControlOptions) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<IncomingNotify>();
        let task = tokio::spawn(async move {
            while let Some(notify) = rx.recv().await {
                if remote_control::handle_notify(&notify, &options).await {
                    info!("BroadSoft 远程控制 NOTIFY 已处理");
                }
            }
        });
        Self { tx, task }
    }

    fn push(&self, notify: IncomingNotify) -> Result<(), IncomingNotify> {
        self.tx.send(notify).map_err(|e| e.0)
    }
}

impl Drop for NotifyQueue {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct ConnectionLifecycleManager {
    engine: Arc<dyn SignalingEngine>,
    options: AgentOptions,
    status: StatusBoard,
    auto_answer: AutoAnswerScheduler,

    events_tx: mpsc::UnboundedSender<LifecycleEvent>,
    events_rx: mpsc::UnboundedReceiver<LifecycleEvent>,

    config: Option<EndpointConfig>,
    identity: Option<String>,
    generation: u64,
    endpoint: Option<Arc<dyn SignalingEndpoint>>,
    registrar: Option<Box<dyn Registrar>>,
    media: Option<Arc<dyn MediaStream>>,
    current_session: Option<Arc<dyn Session>>,

    retry: RetryState,
    keepalive: KeepAlive,
    notify_queue: Option<NotifyQueue>,
}

impl ConnectionLifecycleManager {
    pub fn new(
        engine: Arc<dyn SignalingEngine>,
        options: AgentOptions,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            engine,
            auto_answer: AutoAnswerScheduler::new(options.auto_answer.clone()),
            options,
            status: StatusBoard::new(sink),
            events_tx,
            events_rx,
            config: None,
            identity: None,
            generation: 0,
            endpoint: None,
            registrar: None,
            media: None,
            current_session: None,
            retry: RetryState::new(),
            keepalive: KeepAlive::new(),
            notify_queue: None,
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    pub fn retry_attempt(&self) -> u32 {
        self.retry.attempt()
    }

    pub fn current_session(&self) -> Option<Arc<dyn Session>> {
        self.current_session.clone()
    }

    /// 使用 `config` 完整地（重新）初始化端点和注册
    ///
    /// 配置错误：状态置为 Error，不重试。传输错误：状态置为 Error，按退避安排重试。
    /// 两种情况都返回 `Err`，注册失败只记录日志。
    pub async fn initialize(&mut self, config: EndpointConfig) -> Result<(), SipError> {
        info!("初始化 SIP 端点: user={}, server={}", config.username, config.server);

        self.teardown().await;
        self.config = Some(config.clone());

        let (domain, server) = match Self::resolve(&config) {
            Ok(resolved) => resolved,
            Err(e) => {
                error!("配置无效: {}", e);
                self.status.set_connection(ConnectionState::Error);
                return Err(e.into());
            }
        };

        let identity = format!("sip:{}@{}", config.username, domain);
        self.status.set_identity(&config.username, &domain);
        self.identity = Some(identity.clone());
        self.status.set_connection(ConnectionState::Connecting);

        let media = self.ensure_media().await;

        self.generation += 1;
        let delegate = Arc::new(EventForwarder {
            generation: self.generation,
            tx: self.events_tx.clone(),
        });
        let spec = EndpointSpec {
            identity,
            server,
            username: config.username.clone(),
            password: config.password.clone(),
            user_agent: config.user_agent.clone(),
            media,
        };

        let endpoint = match self.engine.create_endpoint(spec, delegate) {
            Ok(endpoint) => endpoint,
            Err(e) => return Err(self.on_start_failed(e)),
        };
        self.endpoint = Some(endpoint.clone());

        if let Err(e) = endpoint.start().await {
            return Err(self.on_start_failed(e));
        }

        self.on_connected();
        self.register(endpoint.as_ref()).await;
        Ok(())
    }

    /// 用最近一次的配置重新初始化
    pub async fn reconnect(&mut self) -> Result<(), SipError> {
        let config = self
            .config
            .clone()
            .ok_or_else(|| ConfigError::Missing("configuration".into()))?;
        info!("手动重连");
        self.initialize(config).await
    }

    /// 停止一切：取消定时器，挂断当前会话，注销，停止端点
    pub async fn shutdown(&mut self) {
        info!("关闭 SIP 端点");
        self.retry.cancel();
        self.keepalive.stop();
        self.notify_queue = None;

        if let Some(session) = self.current_session.take() {
            if !matches!(
                session.state(),
                SessionState::Terminating | SessionState::Terminated
            ) {
                if let Err(e) = session.hangup().await {
                    warn!("挂断当前会话失败: {}", e);
                }
            }
        }

        self.teardown().await;
        self.status.set_connection(ConnectionState::Disconnected);
        self.status.set_registration(RegistrationState::Unregistered);
    }

    /// 等待下一个事件
    pub async fn next_event(&mut self) -> Option<LifecycleEvent> {
        self.events_rx.recv().await
    }

    pub async fn handle_event(&mut self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::RetryDue { generation } => {
                if !self.retry.take_if_current(generation) {
                    debug!("忽略过期的重连定时器");
                    return;
                }
                let Some(config) = self.config.clone() else {
                    return;
                };
                info!("重连第 {} 次", self.retry.attempt());
                if let Err(e) = self.initialize(config).await {
                    warn!("重连失败: {}", e);
                }
            }
            LifecycleEvent::Connected { generation } if generation == self.generation => {
                self.on_connected();
            }
            LifecycleEvent::Disconnected { generation, reason } if generation == self.generation => {
                self.on_disconnected(reason);
            }
            LifecycleEvent::Invite { generation, invite } if generation == self.generation => {
                self.on_invite(invite);
            }
            LifecycleEvent::Notify { generation, notify } if generation == self.generation => {
                self.on_notify(notify);
            }
            LifecycleEvent::RegistrationLost { generation, reason }
                if generation == self.generation =>
            {
                error!("注册刷新失败，注册已失效: {}", reason);
                self.status.set_registration(RegistrationState::Unregistered);
            }
            other => debug!("忽略已释放端点的事件: {:?}", other),
        }
    }

    /// 独立运行事件循环，直到事件队列关闭
    pub async fn run(mut self) {
        while let Some(event) = self.next_event().await {
            self.handle_event(event).await;
        }
    }

    fn resolve(config: &EndpointConfig) -> Result<(String, rsip::Uri), ConfigError> {
        config.validate()?;
        let server = config.server_uri()?;
        let domain = config.resolve_domain()?;
        Ok((domain, server))
    }

    /// 媒体流只获取一次，失效后重新获取
    async fn ensure_media(&mut self) -> Option<Arc<dyn MediaStream>> {
        if let Some(media) = self.media.as_ref().filter(|m| m.is_active()) {
            return Some(media.clone());
        }
        match self.engine.acquire_media().await {
            Ok(media) => {
                info!("本地媒体流已就绪");
                self.media = Some(media.clone());
                Some(media)
            }
            Err(e) => {
                error!("获取本地媒体流失败，来电将无法应答: {}", e);
                self.media = None;
                None
            }
        }
    }

    /// 先释放注册，再停止端点
    async fn teardown(&mut self) {
        self.keepalive.stop();
        self.retry.cancel();

        if let Some(mut registrar) = self.registrar.take() {
            if let Err(e) = registrar.dispose().await {
                warn!("释放注册失败: {}", e);
            }
            self.status.set_registration(RegistrationState::Unregistered);
        }
        if let Some(endpoint) = self.endpoint.take() {
            if let Err(e) = endpoint.stop().await {
                warn!("停止端点失败: {}", e);
            }
        }
        // 之后到达的旧端点事件一律忽略
        self.generation += 1;
    }

    fn on_connected(&mut self) {
        self.status.set_connection(ConnectionState::Connected);
        self.retry.reset();

        if let (Some(endpoint), Some(identity)) = (self.endpoint.clone(), self.identity.clone()) {
            self.keepalive
                .start(endpoint, identity, self.options.timings.keepalive_interval());
        }
    }

    fn on_disconnected(&mut self, reason: Option<String>) {
        warn!("传输断开: {}", reason.as_deref().unwrap_or("unknown"));
        self.status.set_connection(ConnectionState::Disconnected);
        self.status.set_registration(RegistrationState::Unregistered);
        self.keepalive.stop();
        self.schedule_retry();
    }

    fn on_start_failed(&mut self, e: SipError) -> SipError {
        if !e.is_recoverable() {
            error!("端点配置错误: {}", e);
            self.status.set_connection(ConnectionState::Error);
            return e;
        }
        error!("端点启动失败: {} ({})", e, e.error_code());
        self.status.set_connection(ConnectionState::Error);
        self.schedule_retry();
        e
    }

    fn schedule_retry(&mut self) {
        let attempt = self.retry.record_failure();
        let timings = &self.options.timings;
        let delay_ms = delay_with(attempt, timings.backoff_base_ms, timings.backoff_max_ms);
        info!("{}ms 后重连 (第 {} 次)", delay_ms, attempt);

        let tx = self.events_tx.clone();
        self.retry.arm(delay_ms, move |generation| {
            let _ = tx.send(LifecycleEvent::RetryDue { generation });
        });
    }

    async fn register(&mut self, endpoint: &dyn SignalingEndpoint) {
        let mut registrar = match endpoint.create_registrar() {
            Ok(registrar) => registrar,
            Err(e) => {
                error!("创建注册器失败: {}", e);
                return;
            }
        };

        let tx = self.events_tx.clone();
        let generation = self.generation;
        registrar.on_refresh_failed(Arc::new(move |reason| {
            let _ = tx.send(LifecycleEvent::RegistrationLost { generation, reason });
        }));

        self.status.set_registration(RegistrationState::Registering);
        match registrar.register().await {
            Ok(()) => {
                info!("✓ 注册成功");
                self.status.set_registration(RegistrationState::Registered);
            }
            Err(e) => {
                error!("注册失败: {}", e);
                self.status.set_registration(RegistrationState::Unregistered);
            }
        }
        self.registrar = Some(registrar);
    }

    fn on_invite(&mut self, invite: IncomingInvite) {
        info!(
            "收到来电: from={}, session={}",
            invite.remote_uri,
            invite.session.id()
        );
        self.current_session = Some(invite.session.clone());

        if !self.auto_answer.schedule(&invite) {
            info!("没有自动应答请求，振铃中，等待远程控制");
        }
    }

    fn on_notify(&mut self, notify: IncomingNotify) {
        debug!("收到 NOTIFY: event={:?}", notify.event);
        let options = &self.options.remote_control;
        let queue = self
            .notify_queue
            .get_or_insert_with(|| NotifyQueue::spawn(options.clone()));
        if let Err(notify) = queue.push(notify) {
            warn!("NOTIFY 队列已关闭，重新创建");
            let queue = NotifyQueue::spawn(self.options.remote_control.clone());
            let _ = queue.push(notify);
            self.notify_queue = Some(queue);
        }
    }
}
