use thiserror::Error;

#[derive(Error, Debug)]
pub enum SipError {
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("SIP protocol error: {0}")]
    Protocol(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{operation} timeout ({duration_ms}ms)")]
    Timeout { operation: &'static str, duration_ms: u64 },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl From<rsipstack::Error> for SipError {
    fn from(err: rsipstack::Error) -> Self {
        SipError::Protocol(err.to_string())
    }
}

impl From<rsip::Error> for SipError {
    fn from(err: rsip::Error) -> Self {
        SipError::InvalidUri(err.to_string())
    }
}

impl From<Box<dyn std::error::Error>> for SipError {
    fn from(err: Box<dyn std::error::Error>) -> Self {
        SipError::Other(err.to_string())
    }
}

impl SipError {
    /// 判断错误是否可恢复（配置错误需要调用方修正后重新初始化）
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SipError::Config(_) | SipError::InvalidUri(_))
    }

    /// 获取标准错误代码，用于日志分析
    pub fn error_code(&self) -> &'static str {
        match self {
            SipError::Network(_) => "NETWORK_ERROR",
            SipError::Protocol(_) => "SIP_PROTOCOL_ERROR",
            SipError::InvalidUri(_) => "INVALID_URI",
            SipError::RegistrationFailed(_) => "REGISTRATION_FAILED",
            SipError::Transport(_) => "TRANSPORT_ERROR",
            SipError::Timeout { .. } => "TIMEOUT",
            SipError::Config(_) => "INVALID_CONFIG",
            SipError::Media(_) => "MEDIA_ERROR",
            SipError::Other(_) => "UNKNOWN_ERROR",
        }
    }

    pub fn timeout(operation: &'static str, duration_ms: u64) -> Self {
        SipError::Timeout {
            operation,
            duration_ms,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    Missing(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// 会话信令操作（accept / re-INVITE / BYE）的错误类型
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("信令请求被拒绝: {0}")]
    Rejected(String),

    #[error("会话状态不允许该操作: {0}")]
    InvalidState(String),

    #[error("会话没有可用的媒体流")]
    NoMedia,

    #[error("SIP协议栈错误: {0}")]
    Stack(#[from] rsipstack::Error),
}

/// 用户回调返回的错误
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// 用户回调的返回值
pub type HookResult = Result<(), HookError>;
