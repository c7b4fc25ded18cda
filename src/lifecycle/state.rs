/// 连接 / 注册状态
///
/// 状态只由生命周期管理器修改。设置为当前值是空操作，
/// 只有真正的状态迁移才会通知 `StatusSink` 和 watch 订阅者。
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistrationState::Unregistered => "unregistered",
            RegistrationState::Registering => "registering",
            RegistrationState::Registered => "registered",
        };
        f.write_str(name)
    }
}

/// 状态快照
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub connection: ConnectionState,
    pub registration: RegistrationState,
    pub username: String,
    pub domain: String,
    /// 最近一次状态迁移的时间
    pub timestamp: DateTime<Utc>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            registration: RegistrationState::Unregistered,
            username: String::new(),
            domain: String::new(),
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} connection={} registration={}",
            self.username, self.domain, self.connection, self.registration
        )
    }
}

/// 状态通知接收方（宿主应用实现）
pub trait StatusSink: Send + Sync {
    fn on_status(&self, snapshot: &StatusSnapshot);
}

/// 默认实现：只写日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn on_status(&self, snapshot: &StatusSnapshot) {
        info!("状态更新: {}", snapshot);
    }
}

/// 状态发布器
pub struct StatusBoard {
    tx: watch::Sender<StatusSnapshot>,
    sink: Arc<dyn StatusSink>,
}

impl StatusBoard {
    pub fn new(sink: Arc<dyn StatusSink>) -> Self {
        let (tx, _rx) = watch::channel(StatusSnapshot::default());
        Self { tx, sink }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }

    pub fn registration(&self) -> RegistrationState {
        self.tx.borrow().registration
    }

    /// 更新身份信息（不算状态迁移，不通知）
    pub fn set_identity(&self, username: &str, domain: &str) {
        self.tx.send_if_modified(|status| {
            status.username = username.to_string();
            status.domain = domain.to_string();
            false
        });
    }

    /// 设置连接状态，返回是否发生了迁移
    pub fn set_connection(&self, state: ConnectionState) -> bool {
        let changed = self.tx.send_if_modified(|status| {
            if status.connection == state {
                return false;
            }
            info!("连接状态: {} -> {}", status.connection, state);
            status.connection = state;
            status.timestamp = Utc::now();
            true
        });
        if changed {
            self.notify();
        }
        changed
    }

    /// 设置注册状态，返回是否发生了迁移
    pub fn set_registration(&self, state: RegistrationState) -> bool {
        let changed = self.tx.send_if_modified(|status| {
            if status.registration == state {
                return false;
            }
            info!("注册状态: {} -> {}", status.registration, state);
            status.registration = state;
            status.timestamp = Utc::now();
            true
        });
        if changed {
            self.notify();
        }
        changed
    }

    fn notify(&self) {
        let snapshot = self.snapshot();
        self.sink.on_status(&snapshot);
    }
}
