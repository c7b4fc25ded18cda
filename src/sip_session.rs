/// 基于 rsipstack 服务端 INVITE 对话的会话
///
/// 对话状态由后台任务从 `DialogState` 通道同步到 `SessionState`。
use crate::broadsoft::sdp::DirectionModifier;
use crate::error::SignalingError;
use crate::signaling::{EndpointDelegate, IncomingInvite, MediaStream, Session, SessionState};
use async_trait::async_trait;
use rsipstack::dialog::dialog::{DialogState, DialogStateReceiver};
use rsipstack::dialog::server_dialog::ServerInviteDialog;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// 按 Call-ID 索引的活动会话
pub type SessionRegistry = Arc<Mutex<HashMap<String, Arc<RsipSession>>>>;

pub struct RsipSession {
    call_id: String,
    dialog: ServerInviteDialog,
    media: Option<Arc<dyn MediaStream>>,
    state: watch::Sender<SessionState>,
    /// 最近一次发出的本端 SDP
    local_sdp: Mutex<Option<String>>,
}

impl RsipSession {
    pub fn new(
        call_id: String,
        dialog: ServerInviteDialog,
        media: Option<Arc<dyn MediaStream>>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Initial);
        Arc::new(Self {
            call_id,
            dialog,
            media,
            state,
            local_sdp: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!("会话 {} 状态: {} -> {}", self.call_id, current, next);
            *current = next;
            true
        });
    }

    fn sdp_headers() -> Vec<rsip::Header> {
        vec![rsip::Header::ContentType(
            "application/sdp".to_string().into(),
        )]
    }

    fn current_sdp(&self) -> Result<String, SignalingError> {
        if let Some(sdp) = self.local_sdp.lock().ok().and_then(|s| s.clone()) {
            return Ok(sdp);
        }
        self.media
            .as_ref()
            .map(|m| m.session_description())
            .ok_or(SignalingError::NoMedia)
    }

    fn remember_sdp(&self, sdp: String) {
        if let Ok(mut local) = self.local_sdp.lock() {
            *local = Some(sdp);
        }
    }

    /// 跟随对话状态，直到对话结束
    ///
    /// 对话进入 Calling 后才向上报告来电并发送 180，此时事务已能发送响应。
    pub(crate) async fn follow_dialog(
        self: Arc<Self>,
        mut states: DialogStateReceiver,
        mut announce: Option<(IncomingInvite, Arc<dyn EndpointDelegate>)>,
        registry: SessionRegistry,
    ) {
        while let Some(state) = states.recv().await {
            match state {
                DialogState::Calling(_) => {
                    if let Some((invite, delegate)) = announce.take() {
                        if let Err(e) = self.dialog.ringing(None, None) {
                            warn!("发送 180 Ringing 失败: {}", e);
                        }
                        delegate.on_invite(invite);
                    }
                }
                DialogState::WaitAck(..) => self.set_state(SessionState::Establishing),
                DialogState::Confirmed(..) => {
                    info!("会话已建立: {}", self.call_id);
                    self.set_state(SessionState::Established);
                }
                DialogState::Terminated(_, reason) => {
                    info!("会话结束: {} ({:?})", self.call_id, reason);
                    self.set_state(SessionState::Terminated);
                    break;
                }
                _ => {}
            }
        }

        if self.state() != SessionState::Terminated {
            self.set_state(SessionState::Terminated);
        }
        if let Ok(mut sessions) = registry.lock() {
            sessions.remove(&self.call_id);
        }
    }
}

#[async_trait]
impl Session for RsipSession {
    fn id(&self) -> String {
        self.call_id.clone()
    }

    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    async fn accept(&self) -> Result<(), SignalingError> {
        let state = self.state();
        if !matches!(state, SessionState::Initial | SessionState::Establishing) {
            return Err(SignalingError::InvalidState(state.to_string()));
        }
        let media = self.media.as_ref().ok_or(SignalingError::NoMedia)?;
        let sdp = media.session_description();

        self.dialog
            .accept(Some(Self::sdp_headers()), Some(sdp.clone().into_bytes()))?;
        self.remember_sdp(sdp);
        self.set_state(SessionState::Establishing);
        info!("已应答来电: {}", self.call_id);
        Ok(())
    }

    async fn renegotiate(&self, modifier: &DirectionModifier) -> Result<(), SignalingError> {
        let state = self.state();
        if state != SessionState::Established {
            return Err(SignalingError::InvalidState(state.to_string()));
        }

        let sdp = modifier.apply(&self.current_sdp()?);
        info!("re-INVITE: session={} direction={}", self.call_id, modifier.target());

        let response = self
            .dialog
            .reinvite(Some(Self::sdp_headers()), Some(sdp.clone().into_bytes()))
            .await?;
        if let Some(response) = response {
            if response.status_code != rsip::StatusCode::OK {
                return Err(SignalingError::Rejected(format!(
                    "re-INVITE answered {}",
                    response.status_code.code()
                )));
            }
        }
        self.remember_sdp(sdp);
        Ok(())
    }

    async fn hangup(&self) -> Result<(), SignalingError> {
        match self.state() {
            SessionState::Terminating | SessionState::Terminated => return Ok(()),
            SessionState::Established => {
                self.set_state(SessionState::Terminating);
                self.dialog.bye().await?;
            }
            SessionState::Initial | SessionState::Establishing => {
                self.set_state(SessionState::Terminating);
                self.dialog
                    .reject(Some(rsip::StatusCode::BusyHere), None)?;
            }
        }
        self.set_state(SessionState::Terminated);
        Ok(())
    }
}
