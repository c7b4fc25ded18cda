/// BroadSoft 自动应答
///
/// 来电 INVITE 的 Call-Info 报文头带有 answer-after 参数时，
/// 在指定延迟后自动应答。
use super::call_info;
use super::run_hook;
use crate::error::HookResult;
use crate::signaling::{IncomingInvite, Session, SessionState};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// 自动应答前回调，参数为实际延迟（秒）
pub type BeforeAnswerHook = Arc<dyn Fn(u32) -> HookResult + Send + Sync>;

/// 自动应答成功后回调
pub type AfterAnswerHook = Arc<dyn Fn() -> HookResult + Send + Sync>;

/// 自动应答配置
#[derive(Clone, Default)]
pub struct AutoAnswerOptions {
    /// 是否启用自动应答
    pub enabled: bool,
    /// 覆盖报文头中的延迟（秒）
    pub delay_override: Option<u32>,
    pub on_before_answer: Option<BeforeAnswerHook>,
    pub on_after_answer: Option<AfterAnswerHook>,
}

impl AutoAnswerOptions {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    pub fn with_delay_override(mut self, seconds: u32) -> Self {
        self.delay_override = Some(seconds);
        self
    }

    pub fn on_before_answer(mut self, hook: impl Fn(u32) -> HookResult + Send + Sync + 'static) -> Self {
        self.on_before_answer = Some(Arc::new(hook));
        self
    }

    pub fn on_after_answer(mut self, hook: impl Fn() -> HookResult + Send + Sync + 'static) -> Self {
        self.on_after_answer = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for AutoAnswerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoAnswerOptions")
            .field("enabled", &self.enabled)
            .field("delay_override", &self.delay_override)
            .field("on_before_answer", &self.on_before_answer.is_some())
            .field("on_after_answer", &self.on_after_answer.is_some())
            .finish()
    }
}

/// 自动应答调度器
#[derive(Debug, Clone, Default)]
pub struct AutoAnswerScheduler {
    options: AutoAnswerOptions,
}

impl AutoAnswerScheduler {
    pub fn new(options: AutoAnswerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &AutoAnswerOptions {
        &self.options
    }

    /// 来电是否请求自动应答（不考虑是否启用）
    pub fn should_auto_answer(&self, invite: &IncomingInvite) -> bool {
        call_info::has_auto_answer(&invite.call_info)
    }

    /// 安排自动应答
    ///
    /// 未启用或来电没有 answer-after 时返回 false；否则启动定时器并立即返回 true。
    /// 应答本身的成败不体现在返回值中。
    pub fn schedule(&self, invite: &IncomingInvite) -> bool {
        if !self.options.enabled {
            return false;
        }

        let Some(header_delay) = call_info::first_auto_answer_delay(&invite.call_info) else {
            return false;
        };

        let delay_seconds = self.options.delay_override.unwrap_or(header_delay);

        if let Some(hook) = &self.options.on_before_answer {
            run_hook("onBeforeAutoAnswer", || hook(delay_seconds));
        }

        info!(
            "自动应答已安排: session={}, delay={}s",
            invite.session.id(),
            delay_seconds
        );

        let session = invite.session.clone();
        let on_after_answer = self.options.on_after_answer.clone();
        let delay = Duration::from_millis(u64::from(delay_seconds) * 1000);

        // 会话提前结束时不取消定时器，到期后按状态跳过
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            answer_if_eligible(session, on_after_answer).await;
        });

        true
    }
}

async fn answer_if_eligible(session: Arc<dyn Session>, on_after_answer: Option<AfterAnswerHook>) {
    let state = session.state();
    if !matches!(state, SessionState::Initial | SessionState::Establishing) {
        debug!("跳过自动应答: session={} 当前状态 {}", session.id(), state);
        return;
    }

    match session.accept().await {
        Ok(()) => {
            info!("自动应答完成: session={}", session.id());
            if let Some(hook) = &on_after_answer {
                run_hook("onAfterAutoAnswer", || hook());
            }
        }
        Err(e) => error!("Auto-answer failed: session={} {}", session.id(), e),
    }
}
