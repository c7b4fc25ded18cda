/// 配置测试
///
/// 用一个临时端点和注册器验证候选配置，不影响正在运行的连接。
/// 传输连接和注册分别有超时；无论成败都会清理临时端点。
use super::state::{ConnectionState, RegistrationState, StatusSnapshot};
use crate::config::{EndpointConfig, LifecycleTimings};
use crate::error::SipError;
use crate::registration::Registrar;
use crate::signaling::{
    EndpointDelegate, EndpointSpec, IncomingInvite, IncomingNotify, SignalingEndpoint,
    SignalingEngine,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// 失败类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Configuration,
    ConnectionTimeout,
    RegistrationTimeout,
    AuthenticationFailed,
    ServerUnreachable,
    Other,
}

impl FailureKind {
    pub fn description(&self) -> &'static str {
        match self {
            FailureKind::Configuration => "Invalid configuration",
            FailureKind::ConnectionTimeout => "Connection timeout - server not responding",
            FailureKind::RegistrationTimeout => "Registration timeout - check credentials",
            FailureKind::AuthenticationFailed => "Authentication failed - check username/password",
            FailureKind::ServerUnreachable => "Cannot connect to server - check server address",
            FailureKind::Other => "Configuration test failed",
        }
    }
}

/// 配置测试结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigTestReport {
    Verified {
        message: String,
    },
    Failed {
        kind: FailureKind,
        detail: String,
    },
    /// 注册正在进行中，当前状态无法给出结论
    Inconclusive {
        connection: ConnectionState,
        registration: RegistrationState,
    },
}

impl ConfigTestReport {
    pub fn is_success(&self) -> bool {
        matches!(self, ConfigTestReport::Verified { .. })
    }
}

impl fmt::Display for ConfigTestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigTestReport::Verified { message } => write!(f, "✓ {}", message),
            ConfigTestReport::Failed { kind, detail } => {
                write!(f, "✗ {}: {}", kind.description(), detail)
            }
            ConfigTestReport::Inconclusive {
                connection,
                registration,
            } => write!(
                f,
                "? Registration in progress (connection={}, registration={})",
                connection, registration
            ),
        }
    }
}

/// 错误文本表明另一个 REGISTER 仍在进行
pub fn is_registration_in_progress(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("register request already in progress")
        || message.contains("waiting for final response")
}

/// 按错误文本分类（不区分大小写）
pub fn classify_failure(message: &str) -> FailureKind {
    let message = message.to_lowercase();
    let has = |needle: &str| message.contains(needle);

    if has("registration timeout") {
        FailureKind::RegistrationTimeout
    } else if has("timeout") {
        FailureKind::ConnectionTimeout
    } else if has("401") || has("403") || has("auth") || has("unauthorized") {
        FailureKind::AuthenticationFailed
    } else if has("websocket") || has("network") || has("econnrefused") || has("connect") {
        FailureKind::ServerUnreachable
    } else {
        FailureKind::Other
    }
}

/// 临时端点不关心任何事件
struct DetachedDelegate;

impl EndpointDelegate for DetachedDelegate {
    fn on_connect(&self) {}

    fn on_disconnect(&self, reason: Option<String>) {
        debug!("测试端点断开: {:?}", reason);
    }

    fn on_invite(&self, invite: IncomingInvite) {
        debug!("测试端点忽略来电: {}", invite.remote_uri);
    }

    fn on_notify(&self, _notify: IncomingNotify) {}
}

pub struct ConfigTestRunner {
    engine: Arc<dyn SignalingEngine>,
    timings: LifecycleTimings,
    live_status: watch::Receiver<StatusSnapshot>,
}

impl ConfigTestRunner {
    /// `live_status` 是正在运行的管理器的状态，用于判断"注册进行中"的情况
    pub fn new(
        engine: Arc<dyn SignalingEngine>,
        timings: LifecycleTimings,
        live_status: watch::Receiver<StatusSnapshot>,
    ) -> Self {
        Self {
            engine,
            timings,
            live_status,
        }
    }

    pub async fn run(&self, config: &EndpointConfig) -> ConfigTestReport {
        info!("测试配置: user={}, server={}", config.username, config.server);

        let spec = match Self::spec_for(config) {
            Ok(spec) => spec,
            Err(e) => {
                return ConfigTestReport::Failed {
                    kind: FailureKind::Configuration,
                    detail: e.to_string(),
                }
            }
        };

        let endpoint = match self.engine.create_endpoint(spec, Arc::new(DetachedDelegate)) {
            Ok(endpoint) => endpoint,
            Err(e) => return self.report_failure(e).await,
        };

        let mut registrar = None;
        let outcome = self.exercise(endpoint.as_ref(), &mut registrar).await;
        Self::cleanup(endpoint.as_ref(), registrar).await;

        match outcome {
            Ok(()) => {
                info!("✓ 配置测试通过");
                ConfigTestReport::Verified {
                    message: "Configuration verified".into(),
                }
            }
            Err(e) => self.report_failure(e).await,
        }
    }

    fn spec_for(config: &EndpointConfig) -> Result<EndpointSpec, SipError> {
        config.validate()?;
        let server = config.server_uri()?;
        Ok(EndpointSpec {
            identity: config.identity_uri()?,
            server,
            username: config.username.clone(),
            password: config.password.clone(),
            user_agent: config.user_agent.clone(),
            media: None,
        })
    }

    /// 连接并注册，各自带超时；超时的一方被丢弃
    async fn exercise(
        &self,
        endpoint: &dyn SignalingEndpoint,
        registrar: &mut Option<Box<dyn Registrar>>,
    ) -> Result<(), SipError> {
        let connect_ms = self.timings.test_connect_timeout_ms;
        tokio::time::timeout(Duration::from_millis(connect_ms), endpoint.start())
            .await
            .map_err(|_| SipError::timeout("Connection", connect_ms))??;
        debug!("测试端点已连接");

        let registrar = registrar.insert(endpoint.create_registrar()?);
        let register_ms = self.timings.test_register_timeout_ms;
        tokio::time::timeout(Duration::from_millis(register_ms), registrar.register())
            .await
            .map_err(|_| SipError::timeout("Registration", register_ms))??;
        Ok(())
    }

    /// 只要创建过注册器就发送注销，迟到的 REGISTER 也不会留下绑定
    async fn cleanup(endpoint: &dyn SignalingEndpoint, registrar: Option<Box<dyn Registrar>>) {
        if let Some(mut registrar) = registrar {
            if let Err(e) = registrar.unregister().await {
                warn!("测试注册清理失败: {}", e);
            }
        }
        if let Err(e) = endpoint.stop().await {
            warn!("测试端点停止失败: {}", e);
        }
    }

    async fn report_failure(&self, e: SipError) -> ConfigTestReport {
        let detail = e.to_string();
        warn!("配置测试失败: {}", detail);

        if is_registration_in_progress(&detail) {
            return self.live_report().await;
        }

        let kind = match e {
            SipError::Config(_) | SipError::InvalidUri(_) => FailureKind::Configuration,
            _ => classify_failure(&detail),
        };
        ConfigTestReport::Failed { kind, detail }
    }

    /// 等待一段时间后以当前运行中的连接状态作为结论
    async fn live_report(&self) -> ConfigTestReport {
        info!(
            "注册正在进行，{}ms 后读取当前状态",
            self.timings.in_progress_wait_ms
        );
        tokio::time::sleep(Duration::from_millis(self.timings.in_progress_wait_ms)).await;

        let status = self.live_status.borrow().clone();
        match (status.connection, status.registration) {
            (ConnectionState::Connected, RegistrationState::Registered) => {
                ConfigTestReport::Verified {
                    message: "Configuration verified (connection is active)".into(),
                }
            }
            (ConnectionState::Connected, RegistrationState::Registering) => {
                ConfigTestReport::Verified {
                    message: "Configuration appears valid (registration in progress)".into(),
                }
            }
            (connection, registration) => ConfigTestReport::Inconclusive {
                connection,
                registration,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::state::{StatusBoard, TracingStatusSink};
    use crate::testing::MockEngine;

    fn config() -> EndpointConfig {
        EndpointConfig::new("pbx.example.com", "1001", "secret").unwrap()
    }

    fn runner(engine: &MockEngine, board: &StatusBoard) -> ConfigTestRunner {
        ConfigTestRunner::new(
            Arc::new(engine.clone()),
            LifecycleTimings::default(),
            board.subscribe(),
        )
    }

    #[test]
    fn test_classify_failure() {
        assert_eq!(
            classify_failure("Registration timeout (5000ms)"),
            FailureKind::RegistrationTimeout
        );
        assert_eq!(
            classify_failure("Connection timeout (5000ms)"),
            FailureKind::ConnectionTimeout
        );
        assert_eq!(
            classify_failure("Registration failed: 401 Unauthorized"),
            FailureKind::AuthenticationFailed
        );
        assert_eq!(classify_failure("403"), FailureKind::AuthenticationFailed);
        assert_eq!(
            classify_failure("Transport error: connect ECONNREFUSED"),
            FailureKind::ServerUnreachable
        );
        assert_eq!(classify_failure("WebSocket closed"), FailureKind::ServerUnreachable);
        assert_eq!(classify_failure("something odd"), FailureKind::Other);
    }

    #[test]
    fn test_in_progress_detection() {
        assert!(is_registration_in_progress(
            "REGISTER request already in progress, waiting for final response"
        ));
        assert!(is_registration_in_progress("Waiting for final response"));
        assert!(!is_registration_in_progress("401 Unauthorized"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_cleans_up() {
        let engine = MockEngine::new();
        let board = StatusBoard::new(Arc::new(TracingStatusSink));

        let report = runner(&engine, &board).run(&config()).await;
        assert!(report.is_success());
        assert_eq!(engine.register_count(), 1);
        assert_eq!(engine.unregister_count(), 1);
        assert_eq!(engine.stop_count(), 1);
        assert!(engine.last_spec().unwrap().media.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let engine = MockEngine::new();
        engine.hang_start(true);
        let board = StatusBoard::new(Arc::new(TracingStatusSink));

        let report = runner(&engine, &board).run(&config()).await;
        match report {
            ConfigTestReport::Failed { kind, .. } => assert_eq!(kind, FailureKind::ConnectionTimeout),
            other => panic!("unexpected report: {:?}", other),
        }
        assert_eq!(engine.stop_count(), 1);
        assert_eq!(engine.register_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_timeout() {
        let engine = MockEngine::new();
        engine.hang_register(true);
        let board = StatusBoard::new(Arc::new(TracingStatusSink));

        let report = runner(&engine, &board).run(&config()).await;
        assert_eq!(
            report,
            ConfigTestReport::Failed {
                kind: FailureKind::RegistrationTimeout,
                detail: "Registration timeout (5000ms)".into(),
            }
        );
        assert_eq!(engine.stop_count(), 1);
        assert_eq!(engine.unregister_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_registration_still_unregisters() {
        let engine = MockEngine::new();
        engine.fail_register(Some("403 Forbidden"));
        let board = StatusBoard::new(Arc::new(TracingStatusSink));

        let report = runner(&engine, &board).run(&config()).await;
        assert!(!report.is_success());
        assert_eq!(engine.unregister_count(), 1);
        assert_eq!(engine.stop_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure() {
        let engine = MockEngine::new();
        engine.fail_register(Some("401 Unauthorized"));
        let board = StatusBoard::new(Arc::new(TracingStatusSink));

        match runner(&engine, &board).run(&config()).await {
            ConfigTestReport::Failed { kind, detail } => {
                assert_eq!(kind, FailureKind::AuthenticationFailed);
                assert!(detail.contains("401"));
            }
            other => panic!("unexpected report: {:?}", other),
        }
        assert_eq!(engine.stop_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_is_unreachable() {
        let engine = MockEngine::new();
        engine.fail_next_starts(1);
        let board = StatusBoard::new(Arc::new(TracingStatusSink));

        match runner(&engine, &board).run(&config()).await {
            ConfigTestReport::Failed { kind, .. } => assert_eq!(kind, FailureKind::ServerUnreachable),
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config() {
        let engine = MockEngine::new();
        let board = StatusBoard::new(Arc::new(TracingStatusSink));
        let mut bad = config();
        bad.username = String::new();

        match runner(&engine, &board).run(&bad).await {
            ConfigTestReport::Failed { kind, .. } => assert_eq!(kind, FailureKind::Configuration),
            other => panic!("unexpected report: {:?}", other),
        }
        assert_eq!(engine.endpoint_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_progress_reads_live_status() {
        let engine = MockEngine::new();
        engine.fail_register(Some("REGISTER request already in progress"));
        let board = StatusBoard::new(Arc::new(TracingStatusSink));
        board.set_connection(ConnectionState::Connected);
        board.set_registration(RegistrationState::Registered);

        let report = runner(&engine, &board).run(&config()).await;
        assert!(report.is_success());

        board.set_registration(RegistrationState::Registering);
        let report = runner(&engine, &board).run(&config()).await;
        assert_eq!(
            report,
            ConfigTestReport::Verified {
                message: "Configuration appears valid (registration in progress)".into()
            }
        );

        board.set_connection(ConnectionState::Disconnected);
        let report = runner(&engine, &board).run(&config()).await;
        assert_eq!(
            report,
            ConfigTestReport::Inconclusive {
                connection: ConnectionState::Disconnected,
                registration: RegistrationState::Registering,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_progress_waits_before_reading_status() {
        let engine = MockEngine::new();
        engine.fail_register(Some("waiting for final response"));
        let board = Arc::new(StatusBoard::new(Arc::new(TracingStatusSink)));
        board.set_connection(ConnectionState::Connected);

        let b = board.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2000)).await;
            b.set_registration(RegistrationState::Registered);
        });

        let start = tokio::time::Instant::now();
        let report = runner(&engine, &board).run(&config()).await;
        assert!(start.elapsed() >= Duration::from_millis(3000));
        assert_eq!(
            report,
            ConfigTestReport::Verified {
                message: "Configuration verified (connection is active)".into()
            }
        );
    }
}
