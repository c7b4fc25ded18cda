/// 连接 / 注册生命周期
///
/// - `manager`: 状态机本体（重连退避、保活、完整重新初始化）
/// - `config_test`: 用临时端点验证候选配置
/// - `handle`: 供宿主应用使用的异步句柄
pub mod backoff;
pub mod config_test;
pub mod handle;
pub mod keepalive;
pub mod manager;
pub mod state;

pub use backoff::{delay_for, RetryState};
pub use config_test::{ConfigTestReport, ConfigTestRunner, FailureKind};
pub use handle::LifecycleHandle;
pub use keepalive::KeepAlive;
pub use manager::{ConnectionLifecycleManager, LifecycleEvent};
pub use state::{
    ConnectionState, RegistrationState, StatusBoard, StatusSink, StatusSnapshot, TracingStatusSink,
};
