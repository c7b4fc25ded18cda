/// OPTIONS 保活探测
///
/// 连接期间立即发送一次 OPTIONS，之后按固定间隔发送。
/// 探测失败只记录日志，不影响连接状态。
use crate::signaling::SignalingEndpoint;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct KeepAlive {
    task: Option<JoinHandle<()>>,
}

impl KeepAlive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// 启动探测；已在运行的探测会被替换
    pub fn start(&mut self, endpoint: Arc<dyn SignalingEndpoint>, target: String, interval: Duration) {
        self.stop();
        info!("启动 OPTIONS 保活: target={}, interval={:?}", target, interval);

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match endpoint.send_options(&target).await {
                    Ok(()) => debug!("OPTIONS 保活成功: {}", target),
                    Err(e) => warn!("OPTIONS 保活失败: {} ({})", e, e.error_code()),
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("停止 OPTIONS 保活");
            task.abort();
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.stop();
    }
}
