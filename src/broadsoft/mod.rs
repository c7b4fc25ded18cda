/// BroadSoft Access-Side 扩展
///
/// 支持三种常见的 BroadSoft 扩展：
///
/// 1. `Call-Info: <...>; answer-after=1`：自动应答
/// 2. `NOTIFY (Event: talk)`：远程控制：应答 / 恢复通话
/// 3. `NOTIFY (Event: hold)`：远程控制：保持 / 恢复通话
///
/// ```rust
/// use sip_agent::broadsoft::{call_info, remote_control, EventKind};
///
/// let delay = call_info::first_auto_answer_delay(["<sip:example.com>; answer-after=2"]);
/// assert_eq!(delay, Some(2));
///
/// assert_eq!(remote_control::classify(Some("talk;id=1")), Some(EventKind::Talk));
/// ```

pub mod auto_answer;
pub mod call_info;
pub mod remote_control;
pub mod sdp;

pub use auto_answer::{AutoAnswerOptions, AutoAnswerScheduler};
pub use call_info::{CallInfoHeader, ParamValue};
pub use remote_control::{
    EventKind, HoldAction, NotifyEvent, RemoteControlOptions, TalkAction, TalkOutcome,
};
pub use sdp::{DirectionModifier, MediaDirection};

use crate::error::HookResult;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

/// 执行用户回调：错误和 panic 都只记录日志，不影响信令流程
pub(crate) fn run_hook(name: &str, hook: impl FnOnce() -> HookResult) {
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Error in {} callback: {}", name, e),
        Err(_) => error!("{} callback panicked", name),
    }
}
