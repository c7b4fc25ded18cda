/// 生命周期管理器的对外句柄
///
/// 管理器运行在独立任务中，句柄通过命令通道与其交互。
/// 状态查询直接读取 watch 通道，不经过管理器任务。
use super::config_test::{ConfigTestReport, ConfigTestRunner};
use super::manager::ConnectionLifecycleManager;
use super::state::{StatusSink, StatusSnapshot};
use crate::config::{AgentOptions, ConfigProvider, EndpointConfig, LifecycleTimings};
use crate::error::SipError;
use crate::signaling::SignalingEngine;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

enum Command {
    Initialize {
        config: EndpointConfig,
        reply: oneshot::Sender<Result<(), SipError>>,
    },
    Reconnect {
        reply: oneshot::Sender<Result<(), SipError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Clone)]
pub struct LifecycleHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<StatusSnapshot>,
    engine: Arc<dyn SignalingEngine>,
    timings: LifecycleTimings,
}

impl LifecycleHandle {
    /// 启动管理器任务并返回句柄
    ///
    /// 所有句柄都被释放后，管理器执行一次关闭并退出
    pub fn spawn(
        engine: Arc<dyn SignalingEngine>,
        options: AgentOptions,
        sink: Arc<dyn StatusSink>,
    ) -> (Self, JoinHandle<()>) {
        let timings = options.timings;
        let manager = ConnectionLifecycleManager::new(engine.clone(), options, sink);
        let status = manager.subscribe();
        let (commands, rx) = mpsc::channel(16);

        let task = tokio::spawn(run_manager(manager, rx));
        let handle = Self {
            commands,
            status,
            engine,
            timings,
        };
        (handle, task)
    }

    pub async fn initialize(&self, config: EndpointConfig) -> Result<(), SipError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Initialize { config, reply }).await?;
        rx.await.map_err(|_| manager_gone())?
    }

    /// 从 `provider` 读取配置后初始化
    pub async fn initialize_from(&self, provider: &dyn ConfigProvider) -> Result<(), SipError> {
        let config = provider.load()?;
        self.initialize(config).await
    }

    pub async fn reconnect(&self) -> Result<(), SipError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Reconnect { reply }).await?;
        rx.await.map_err(|_| manager_gone())?
    }

    pub async fn shutdown(&self) -> Result<(), SipError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        rx.await.map_err(|_| manager_gone())
    }

    /// 用临时端点测试一份配置，不影响当前连接
    pub async fn test_configuration(&self, config: &EndpointConfig) -> ConfigTestReport {
        ConfigTestRunner::new(self.engine.clone(), self.timings, self.status.clone())
            .run(config)
            .await
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    /// 订阅状态迁移
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    async fn send(&self, command: Command) -> Result<(), SipError> {
        self.commands.send(command).await.map_err(|_| manager_gone())
    }
}

fn manager_gone() -> SipError {
    SipError::Other("lifecycle manager task has stopped".into())
}

async fn run_manager(mut manager: ConnectionLifecycleManager, mut commands: mpsc::Receiver<Command>) {
    debug!("生命周期管理器任务启动");
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Initialize { config, reply }) => {
                    let _ = reply.send(manager.initialize(config).await);
                }
                Some(Command::Reconnect { reply }) => {
                    let _ = reply.send(manager.reconnect().await);
                }
                Some(Command::Shutdown { reply }) => {
                    manager.shutdown().await;
                    let _ = reply.send(());
                }
                None => break,
            },
            Some(event) = manager.next_event() => {
                manager.handle_event(event).await;
            }
        }
    }
    manager.shutdown().await;
    info!("生命周期管理器任务退出");
}
