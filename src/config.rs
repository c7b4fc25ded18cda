/// 端点配置
///
/// 描述一个 SIP 账号：身份（用户名 + 域）、凭证和服务器地址。
/// 域可以显式指定，否则从服务器 URI 的主机部分推导。
use crate::broadsoft::{AutoAnswerOptions, RemoteControlOptions};
use crate::error::ConfigError;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_USER_AGENT: &str = concat!("sip-agent/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// SIP 用户名
    pub username: String,

    /// SIP 密码
    pub password: String,

    /// 服务器地址（例如 "pbx.example.com:5060" 或 "sip:pbx.example.com;transport=udp"）
    pub server: String,

    /// 显式指定的 SIP 域（可选）
    pub domain: Option<String>,

    /// User-Agent字符串
    pub user_agent: String,
}

impl EndpointConfig {
    pub fn new(server: &str, user: &str, password: &str) -> Result<Self, ConfigError> {
        let config = Self {
            username: user.trim().to_string(),
            password: password.to_string(),
            server: server.trim().to_string(),
            domain: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        let domain = domain.into();
        self.domain = if domain.trim().is_empty() {
            None
        } else {
            Some(domain.trim().to_string())
        };
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// 检查必填字段
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.username.is_empty() {
            return Err(ConfigError::Missing("username".into()));
        }
        if self.password.is_empty() {
            return Err(ConfigError::Missing("password".into()));
        }
        if self.server.is_empty() {
            return Err(ConfigError::Missing("server".into()));
        }
        Ok(())
    }

    /// 服务器 URI，缺少 scheme 时补全 "sip:"
    pub fn server_uri(&self) -> Result<rsip::Uri, ConfigError> {
        if self.server.is_empty() {
            return Err(ConfigError::Missing("server".into()));
        }
        let text = if self.server.starts_with("sip:") || self.server.starts_with("sips:") {
            self.server.clone()
        } else {
            format!("sip:{}", self.server)
        };
        rsip::Uri::try_from(text.as_str())
            .map_err(|e| ConfigError::Invalid(format!("invalid server URI {}: {}", self.server, e)))
    }

    /// 解析实际使用的 SIP 域：显式域优先，否则取服务器 URI 的主机名（不含端口）
    pub fn resolve_domain(&self) -> Result<String, ConfigError> {
        if let Some(domain) = self.domain.as_deref().filter(|d| !d.is_empty()) {
            return Ok(domain.to_string());
        }
        let uri = self.server_uri().map_err(|e| {
            warn!("无法从服务器地址推导 SIP 域: {}", e);
            ConfigError::Invalid(format!("cannot determine SIP domain: {}", e))
        })?;
        let host = uri.host_with_port.host.to_string();
        if host.is_empty() {
            return Err(ConfigError::Invalid(
                "cannot determine SIP domain from server URI".into(),
            ));
        }
        Ok(host)
    }

    /// 注册身份 "sip:user@domain"
    pub fn identity_uri(&self) -> Result<String, ConfigError> {
        Ok(format!("sip:{}@{}", self.username, self.resolve_domain()?))
    }
}

/// 配置来源（由宿主应用提供）
pub trait ConfigProvider: Send + Sync {
    fn load(&self) -> Result<EndpointConfig, ConfigError>;
}

impl ConfigProvider for EndpointConfig {
    fn load(&self) -> Result<EndpointConfig, ConfigError> {
        self.validate()?;
        Ok(self.clone())
    }
}

/// 从环境变量读取配置：SIP_SERVER / SIP_USER / SIP_PASSWORD / SIP_DOMAIN
#[derive(Debug, Default, Clone)]
pub struct EnvConfigProvider;

impl EnvConfigProvider {
    fn var(name: &str) -> Result<String, ConfigError> {
        std::env::var(name).map_err(|_| ConfigError::Missing(name.to_string()))
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn load(&self) -> Result<EndpointConfig, ConfigError> {
        let config = EndpointConfig::new(
            &Self::var("SIP_SERVER")?,
            &Self::var("SIP_USER")?,
            &Self::var("SIP_PASSWORD")?,
        )?;
        Ok(match std::env::var("SIP_DOMAIN") {
            Ok(domain) => config.with_domain(domain),
            Err(_) => config,
        })
    }
}

/// 生命周期相关的时间参数（毫秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleTimings {
    /// 重连退避的初始延迟
    pub backoff_base_ms: u64,
    /// 重连退避的上限
    pub backoff_max_ms: u64,
    /// OPTIONS 保活间隔
    pub keepalive_interval_ms: u64,
    /// 配置测试：传输连接超时
    pub test_connect_timeout_ms: u64,
    /// 配置测试：注册超时
    pub test_register_timeout_ms: u64,
    /// 配置测试：注册正在进行时等待多久再读取当前状态
    pub in_progress_wait_ms: u64,
}

impl Default for LifecycleTimings {
    fn default() -> Self {
        Self {
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            keepalive_interval_ms: 15_000,
            test_connect_timeout_ms: 5000,
            test_register_timeout_ms: 5000,
            in_progress_wait_ms: 3000,
        }
    }
}

impl LifecycleTimings {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

/// 代理的运行选项
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub auto_answer: AutoAnswerOptions,
    pub remote_control: RemoteControlOptions,
    pub timings: LifecycleTimings,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            auto_answer: AutoAnswerOptions::enabled(),
            remote_control: RemoteControlOptions::default(),
            timings: LifecycleTimings::default(),
        }
    }
}
