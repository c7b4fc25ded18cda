// 声明所有模块
pub mod broadsoft;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod media;
pub mod registration;
pub mod signaling;
pub mod sip_client;
pub mod sip_session;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

/// 重新导出thiserror错误类型
pub use crate::error::{ConfigError, SignalingError, SipError};

/// 主要API重新导出，简化使用
pub use crate::broadsoft::{AutoAnswerOptions, RemoteControlOptions};
pub use crate::config::{AgentOptions, ConfigProvider, EndpointConfig, EnvConfigProvider, LifecycleTimings};
pub use crate::lifecycle::{
    ConfigTestReport, ConnectionState, FailureKind, LifecycleHandle, RegistrationState,
    StatusSink, StatusSnapshot, TracingStatusSink,
};
pub use crate::sip_client::RsipEngine;

/// 版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 便捷函数：使用 rsipstack 引擎和默认选项启动生命周期管理器
pub fn spawn_agent(options: AgentOptions) -> (LifecycleHandle, tokio::task::JoinHandle<()>) {
    LifecycleHandle::spawn(
        std::sync::Arc::new(RsipEngine::new()),
        options,
        std::sync::Arc::new(TracingStatusSink),
    )
}
