/// 信令引擎接口
///
/// 生命周期管理器和 BroadSoft 扩展只通过这里的 trait 访问底层 SIP 协议栈：
///
/// - `SignalingEngine`: 获取本地媒体流、构造端点
/// - `SignalingEndpoint`: 启动/停止传输、发送 OPTIONS 探测、创建注册器
/// - `Session`: 读取会话状态，执行 accept / re-INVITE / BYE
/// - `EndpointDelegate`: 端点向管理器上报的类型化事件
///
/// `sip_client` 模块提供基于 rsipstack 的实现。
use crate::broadsoft::sdp::DirectionModifier;
use crate::error::{SignalingError, SipError};
use crate::registration::Registrar;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// 会话状态（由信令引擎维护，这里只读）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Initial,
    Establishing,
    Established,
    Terminating,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Initial => "Initial",
            SessionState::Establishing => "Establishing",
            SessionState::Established => "Established",
            SessionState::Terminating => "Terminating",
            SessionState::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

/// 一路呼叫会话
#[async_trait]
pub trait Session: Send + Sync {
    /// 会话标识（通常是 Call-ID）
    fn id(&self) -> String;

    /// 当前状态
    fn state(&self) -> SessionState;

    /// 应答来电
    async fn accept(&self) -> Result<(), SignalingError>;

    /// 发起重协商，`modifier` 改写本端 SDP 的媒体方向
    async fn renegotiate(&self, modifier: &DirectionModifier) -> Result<(), SignalingError>;

    /// 挂断
    async fn hangup(&self) -> Result<(), SignalingError>;
}

/// 本地媒体流，跨重新初始化复用
pub trait MediaStream: Send + Sync {
    fn is_active(&self) -> bool;

    /// 本端 SDP（媒体方向为 sendrecv）
    fn session_description(&self) -> String;
}

/// 来电
#[derive(Clone)]
pub struct IncomingInvite {
    pub session: Arc<dyn Session>,
    /// 按出现顺序排列的 Call-Info 报文头原始值
    pub call_info: Vec<String>,
    /// 主叫 URI（日志用）
    pub remote_uri: String,
}

impl fmt::Debug for IncomingInvite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingInvite")
            .field("session", &self.session.id())
            .field("call_info", &self.call_info)
            .field("remote_uri", &self.remote_uri)
            .finish()
    }
}

/// 对话内收到的 NOTIFY
#[derive(Clone)]
pub struct IncomingNotify {
    pub session: Arc<dyn Session>,
    /// Event 报文头（可能缺失）
    pub event: Option<String>,
    /// 消息体（可能为空）
    pub body: Option<String>,
}

impl fmt::Debug for IncomingNotify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingNotify")
            .field("session", &self.session.id())
            .field("event", &self.event)
            .field("body", &self.body)
            .finish()
    }
}

/// 端点回调接口，由生命周期管理器实现并在构造端点时注册一次
pub trait EndpointDelegate: Send + Sync {
    /// 传输在 `start()` 成功之后重新建立
    fn on_connect(&self);

    /// 传输断开
    fn on_disconnect(&self, reason: Option<String>);

    fn on_invite(&self, invite: IncomingInvite);

    fn on_notify(&self, notify: IncomingNotify);
}

/// 构造端点所需的参数
#[derive(Clone)]
pub struct EndpointSpec {
    /// 注册身份 "sip:user@domain"
    pub identity: String,
    /// 连接目标（服务器 URI）
    pub server: rsip::Uri,
    pub username: String,
    pub password: String,
    pub user_agent: String,
    /// 来电应答使用的媒体流；配置测试端点不携带
    pub media: Option<Arc<dyn MediaStream>>,
}

impl fmt::Debug for EndpointSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointSpec")
            .field("identity", &self.identity)
            .field("server", &self.server.to_string())
            .field("username", &self.username)
            .field("user_agent", &self.user_agent)
            .field("media", &self.media.is_some())
            .finish()
    }
}

/// 一个 SIP 端点（传输 + 事务层）
#[async_trait]
pub trait SignalingEndpoint: Send + Sync {
    /// 建立传输连接。返回 `Ok` 即表示已连接
    async fn start(&self) -> Result<(), SipError>;

    async fn stop(&self) -> Result<(), SipError>;

    /// 向 `target` 发送 OPTIONS
    async fn send_options(&self, target: &str) -> Result<(), SipError>;

    /// 创建绑定到本端点的注册器
    fn create_registrar(&self) -> Result<Box<dyn Registrar>, SipError>;
}

/// 信令引擎
#[async_trait]
pub trait SignalingEngine: Send + Sync {
    /// 获取本地媒体流
    async fn acquire_media(&self) -> Result<Arc<dyn MediaStream>, SipError>;

    /// 构造（但不启动）一个端点
    fn create_endpoint(
        &self,
        spec: EndpointSpec,
        delegate: Arc<dyn EndpointDelegate>,
    ) -> Result<Arc<dyn SignalingEndpoint>, SipError>;
}
