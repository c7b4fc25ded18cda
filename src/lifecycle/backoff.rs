/// 重连退避
///
/// 延迟按 `base * 2^(attempt-1)` 增长并截断到上限；
/// `RetryState` 最多持有一个待触发的重试定时器。
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

pub const BASE_DELAY_MS: u64 = 1000;
pub const MAX_DELAY_MS: u64 = 30_000;

/// 第 `attempt` 次重试的延迟（毫秒），attempt 从 1 开始，0 按 1 处理
pub fn delay_for(attempt: u32) -> u64 {
    delay_with(attempt, BASE_DELAY_MS, MAX_DELAY_MS)
}

pub fn delay_with(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    let exponent = attempt.max(1) - 1;
    let factor = 2u64.saturating_pow(exponent);
    base_ms.saturating_mul(factor).min(max_ms)
}

/// 重试计数和待触发的定时器
#[derive(Debug, Default)]
pub struct RetryState {
    attempt: u32,
    generation: u64,
    pending: Option<JoinHandle<()>>,
    last_delay_ms: Option<u64>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// 最近一次安排的重试延迟
    pub fn last_delay_ms(&self) -> Option<u64> {
        self.last_delay_ms
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// 记录一次失败，返回新的尝试次数
    pub fn record_failure(&mut self) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.attempt
    }

    /// 连接成功后清零
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// 安排一次重试；已有的定时器先取消
    ///
    /// 到期时以本次的 generation 调用 `fire`，返回该 generation
    pub fn arm<F>(&mut self, delay_ms: u64, fire: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        self.generation += 1;
        self.last_delay_ms = Some(delay_ms);

        let generation = self.generation;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            fire(generation);
        }));
        generation
    }

    /// 取消待触发的重试。已经排队的到期事件由 `take_if_current` 过滤
    pub fn cancel(&mut self) {
        if let Some(task) = self.pending.take() {
            debug!("取消待触发的重连");
            task.abort();
        }
        self.generation += 1;
    }

    /// 到期事件属于当前定时器时消费它并返回 true
    pub fn take_if_current(&mut self, generation: u64) -> bool {
        if self.pending.is_some() && generation == self.generation {
            self.pending = None;
            true
        } else {
            false
        }
    }
}

impl Drop for RetryState {
    fn drop(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }
}
