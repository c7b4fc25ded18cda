/// Registration traits 定义
///
/// 使用 trait 抽象注册行为，生命周期管理器和配置测试只依赖这个接口
use crate::error::SipError;
use async_trait::async_trait;
use std::sync::Arc;

/// 注册结果
pub type RegistrationResult = Result<(), SipError>;

/// 后台刷新失败通知，参数为失败原因
pub type RefreshFailedHandler = Arc<dyn Fn(String) + Send + Sync>;

/// 注册器 trait
///
/// 定义 SIP 注册的核心行为
#[async_trait]
pub trait Registrar: Send {
    /// 执行注册
    ///
    /// # 返回
    /// - `Ok(())`: 服务器返回 200 OK
    /// - `Err`: 注册失败（错误文本包含状态码，供配置测试分类）
    async fn register(&mut self) -> RegistrationResult;

    /// 执行注销
    ///
    /// 发送 expires=0 的 REGISTER 请求
    async fn unregister(&mut self) -> RegistrationResult;

    /// 释放注册器：已注册时先注销，并停止刷新
    async fn dispose(&mut self) -> RegistrationResult {
        if self.is_registered() {
            self.unregister().await
        } else {
            Ok(())
        }
    }

    /// 获取注册状态
    fn is_registered(&self) -> bool;

    /// 设置刷新失败通知。刷新失败后注册器停止刷新，视为未注册
    fn on_refresh_failed(&mut self, handler: RefreshFailedHandler);
}

/// 注册配置
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    /// 用户名
    pub username: String,

    /// 密码
    pub password: String,

    /// 认证域 (realm)，None 时从 401 响应中提取
    pub realm: Option<String>,

    /// 注册服务器 URI
    pub server: rsip::Uri,

    /// 默认过期时间（秒）
    pub default_expires: u32,
}

impl RegistrationConfig {
    /// 创建新的注册配置
    pub fn new(username: String, password: String, server: rsip::Uri) -> Self {
        Self {
            username,
            password,
            realm: None,
            server,
            default_expires: 3600,
        }
    }

    /// 设置过期时间
    pub fn with_expires(mut self, expires: u32) -> Self {
        self.default_expires = expires;
        self
    }

    /// Registrar 使用的 Request-URI：去掉 transport 参数
    pub fn register_uri(&self) -> rsip::Uri {
        let mut uri = self.server.clone();
        uri.params.retain(|p| !matches!(p, rsip::Param::Transport(_)));
        uri
    }

    /// 刷新间隔：到期前 10% 重新注册，至少 30 秒
    pub fn refresh_interval(&self) -> std::time::Duration {
        let secs = (u64::from(self.default_expires) * 9 / 10).max(30);
        std::time::Duration::from_secs(secs)
    }
}
