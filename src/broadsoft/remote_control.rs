/// BroadSoft 远程控制
///
/// 处理对话内 NOTIFY 事件（Event: talk / Event: hold）：
/// 分类 Event 报文头、解析消息体，并根据会话当前状态执行对应的信令动作。
use super::run_hook;
use super::sdp::DirectionModifier;
use crate::error::{HookResult, SignalingError};
use crate::signaling::{IncomingNotify, Session, SessionState};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// BroadSoft NOTIFY 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Talk,
    Hold,
}

/// talk 事件动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TalkAction {
    /// 应答 / 恢复通话
    Talk,
    /// 静音（仅提示，不产生信令）
    Mute,
}

/// hold 事件动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HoldAction {
    Hold,
    Unhold,
    /// unhold 的别名
    Resume,
}

/// 解析后的 NOTIFY 事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyEvent {
    Talk(TalkAction),
    Hold(HoldAction),
}

impl NotifyEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            NotifyEvent::Talk(_) => EventKind::Talk,
            NotifyEvent::Hold(_) => EventKind::Hold,
        }
    }
}

/// talk 动作的执行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TalkOutcome {
    /// 振铃中的来电被应答
    Answered,
    /// 已建立的通话通过重协商恢复 sendrecv
    Resumed,
    /// 状态或动作不需要信令
    Ignored,
}

/// 对 Event 报文头分类
///
/// 取第一个 `;` 之前的部分，去空白、转小写后匹配 talk / hold
pub fn classify(event_header: Option<&str>) -> Option<EventKind> {
    let value = event_header?;
    let token = value.split(';').next().unwrap_or_default().trim();
    match token.to_ascii_lowercase().as_str() {
        "talk" => Some(EventKind::Talk),
        "hold" => Some(EventKind::Hold),
        _ => None,
    }
}

pub fn is_recognized(event_header: Option<&str>) -> bool {
    classify(event_header).is_some()
}

/// 解析 NOTIFY 消息体
///
/// talk 事件的空消息体视为 talk（部分服务器恢复通话时不带消息体）
pub fn parse_body(body: Option<&str>, kind: EventKind) -> Option<NotifyEvent> {
    let action = body.unwrap_or_default().trim().to_ascii_lowercase();

    match kind {
        EventKind::Talk => match action.as_str() {
            "" | "talk" => Some(NotifyEvent::Talk(TalkAction::Talk)),
            "mute" => Some(NotifyEvent::Talk(TalkAction::Mute)),
            _ => None,
        },
        EventKind::Hold => match action.as_str() {
            "hold" => Some(NotifyEvent::Hold(HoldAction::Hold)),
            "unhold" => Some(NotifyEvent::Hold(HoldAction::Unhold)),
            "resume" => Some(NotifyEvent::Hold(HoldAction::Resume)),
            _ => None,
        },
    }
}

/// 对会话执行 talk 动作
///
/// - Initial: 应答来电
/// - Established: re-INVITE 设置 sendrecv
/// - 其他状态: 不做处理
pub async fn apply_talk(
    session: &dyn Session,
    action: TalkAction,
) -> Result<TalkOutcome, SignalingError> {
    if action == TalkAction::Mute {
        debug!("talk 事件 mute 仅作提示: session={}", session.id());
        return Ok(TalkOutcome::Ignored);
    }

    match session.state() {
        SessionState::Initial => {
            info!("远程控制应答来电: session={}", session.id());
            session.accept().await?;
            Ok(TalkOutcome::Answered)
        }
        SessionState::Established => {
            info!("远程控制恢复通话: session={}", session.id());
            session.renegotiate(&DirectionModifier::Resume).await?;
            Ok(TalkOutcome::Resumed)
        }
        state => {
            debug!("会话状态 {} 下忽略 talk 事件: session={}", state, session.id());
            Ok(TalkOutcome::Ignored)
        }
    }
}

/// 对会话执行 hold 动作，仅在 Established 状态下生效
///
/// 返回是否发出了重协商
pub async fn apply_hold(session: &dyn Session, action: HoldAction) -> Result<bool, SignalingError> {
    let state = session.state();
    if state != SessionState::Established {
        debug!("会话状态 {} 下忽略 hold 事件: session={}", state, session.id());
        return Ok(false);
    }

    let modifier = match action {
        HoldAction::Hold => DirectionModifier::Hold,
        HoldAction::Unhold | HoldAction::Resume => DirectionModifier::Resume,
    };
    info!(
        "远程控制 {:?}: session={} direction={}",
        action,
        session.id(),
        modifier.target()
    );
    session.renegotiate(&modifier).await?;
    Ok(true)
}

pub type TalkHook = Arc<dyn Fn(TalkAction) -> HookResult + Send + Sync>;
pub type HoldHook = Arc<dyn Fn(HoldAction) -> HookResult + Send + Sync>;

/// 远程控制配置
#[derive(Clone)]
pub struct RemoteControlOptions {
    /// 是否启用远程控制
    pub enabled: bool,
    /// 是否自动执行动作
    pub auto_apply: bool,
    /// 是否处理 Event: hold（部分部署只发 talk）
    pub hold_events: bool,
    pub on_talk_event: Option<TalkHook>,
    pub on_hold_event: Option<HoldHook>,
}

impl Default for RemoteControlOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_apply: true,
            hold_events: true,
            on_talk_event: None,
            on_hold_event: None,
        }
    }
}

impl RemoteControlOptions {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn without_hold_events(mut self) -> Self {
        self.hold_events = false;
        self
    }

    pub fn on_talk_event(mut self, hook: impl Fn(TalkAction) -> HookResult + Send + Sync + 'static) -> Self {
        self.on_talk_event = Some(Arc::new(hook));
        self
    }

    pub fn on_hold_event(mut self, hook: impl Fn(HoldAction) -> HookResult + Send + Sync + 'static) -> Self {
        self.on_hold_event = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for RemoteControlOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteControlOptions")
            .field("enabled", &self.enabled)
            .field("auto_apply", &self.auto_apply)
            .field("hold_events", &self.hold_events)
            .field("on_talk_event", &self.on_talk_event.is_some())
            .field("on_hold_event", &self.on_hold_event.is_some())
            .finish()
    }
}

/// 处理一条 NOTIFY
///
/// 返回该 NOTIFY 是否作为 BroadSoft 远程控制事件被处理。
/// 回调和信令错误只记录日志，不重试（对端重发 NOTIFY 时会再次执行）。
pub async fn handle_notify(notify: &IncomingNotify, options: &RemoteControlOptions) -> bool {
    if !options.enabled {
        return false;
    }

    let Some(kind) = classify(notify.event.as_deref()) else {
        return false;
    };
    if kind == EventKind::Hold && !options.hold_events {
        debug!("hold 事件未启用，忽略: session={}", notify.session.id());
        return false;
    }

    let Some(event) = parse_body(notify.body.as_deref(), kind) else {
        debug!(
            "无法解析 NOTIFY 消息体: event={:?} body={:?}",
            notify.event, notify.body
        );
        return false;
    };

    let session = notify.session.as_ref();
    match event {
        NotifyEvent::Talk(action) => {
            if let Some(hook) = &options.on_talk_event {
                run_hook("onTalkEvent", || hook(action));
            }
            if options.auto_apply {
                if let Err(e) = apply_talk(session, action).await {
                    error!("Error applying talk action: session={} {}", session.id(), e);
                }
            }
        }
        NotifyEvent::Hold(action) => {
            if let Some(hook) = &options.on_hold_event {
                run_hook("onHoldEvent", || hook(action));
            }
            if options.auto_apply {
                if let Err(e) = apply_hold(session, action).await {
                    error!("Error applying hold action: session={} {}", session.id(), e);
                }
            }
        }
    }

    true
}
