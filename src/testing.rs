//! 测试用的信令引擎替身
//!
//! 记录端点、注册和会话上的调用，并可以按脚本注入失败或挂起。

use crate::broadsoft::sdp::DirectionModifier;
use crate::error::{SignalingError, SipError};
use crate::registration::{RefreshFailedHandler, Registrar, RegistrationResult};
use crate::signaling::{
    EndpointDelegate, EndpointSpec, MediaStream, Session, SessionState, SignalingEndpoint,
    SignalingEngine,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct MockSession {
    id: String,
    state: Mutex<SessionState>,
    accepts: AtomicU32,
    hangups: AtomicU32,
    renegotiations: Mutex<Vec<DirectionModifier>>,
    fail_accept: AtomicBool,
    hold_delay: Mutex<Option<Duration>>,
}

impl MockSession {
    pub fn new(state: SessionState) -> Arc<Self> {
        Arc::new(Self {
            id: format!("mock-{}", uuid::Uuid::new_v4()),
            state: Mutex::new(state),
            accepts: AtomicU32::new(0),
            hangups: AtomicU32::new(0),
            renegotiations: Mutex::new(Vec::new()),
            fail_accept: AtomicBool::new(false),
            hold_delay: Mutex::new(None),
        })
    }

    pub fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn fail_accept(&self, fail: bool) {
        self.fail_accept.store(fail, Ordering::SeqCst);
    }

    /// 保持重协商在 `delay` 之后才完成
    pub fn slow_hold(&self, delay: Duration) {
        *self.hold_delay.lock().unwrap() = Some(delay);
    }

    pub fn accept_count(&self) -> u32 {
        self.accepts.load(Ordering::SeqCst)
    }

    pub fn hangup_count(&self) -> u32 {
        self.hangups.load(Ordering::SeqCst)
    }

    /// 已完成的重协商，按完成顺序
    pub fn renegotiations(&self) -> Vec<DirectionModifier> {
        self.renegotiations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Session for MockSession {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    async fn accept(&self) -> Result<(), SignalingError> {
        self.accepts.fetch_add(1, Ordering::SeqCst);
        if self.fail_accept.load(Ordering::SeqCst) {
            return Err(SignalingError::Rejected("486 Busy Here".into()));
        }
        self.set_state(SessionState::Established);
        Ok(())
    }

    async fn renegotiate(&self, modifier: &DirectionModifier) -> Result<(), SignalingError> {
        let delay = *self.hold_delay.lock().unwrap();
        if let (DirectionModifier::Hold, Some(delay)) = (modifier, delay) {
            tokio::time::sleep(delay).await;
        }
        self.renegotiations.lock().unwrap().push(*modifier);
        Ok(())
    }

    async fn hangup(&self) -> Result<(), SignalingError> {
        self.hangups.fetch_add(1, Ordering::SeqCst);
        self.set_state(SessionState::Terminated);
        Ok(())
    }
}

pub struct MockMedia {
    active: AtomicBool,
}

impl MockMedia {
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }
}

impl MediaStream for MockMedia {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn session_description(&self) -> String {
        "v=0\r\nm=audio 4000 RTP/AVP 0\r\na=sendrecv\r\n".into()
    }
}

#[derive(Default)]
struct EngineState {
    endpoints: AtomicU32,
    starts: AtomicU32,
    stops: AtomicU32,
    options: AtomicU32,
    registers: AtomicU32,
    unregisters: AtomicU32,
    media_acquired: AtomicU32,
    fail_starts: AtomicU32,
    hang_start: AtomicBool,
    hang_register: AtomicBool,
    register_error: Mutex<Option<String>>,
    options_targets: Mutex<Vec<String>>,
    specs: Mutex<Vec<EndpointSpec>>,
    delegates: Mutex<Vec<Arc<dyn EndpointDelegate>>>,
    media: Mutex<Vec<Arc<MockMedia>>>,
    refresh_handlers: Mutex<Vec<RefreshFailedHandler>>,
}

/// 可脚本化的信令引擎
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<EngineState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 接下来 `count` 次 `start()` 返回传输错误
    pub fn fail_next_starts(&self, count: u32) {
        self.state.fail_starts.store(count, Ordering::SeqCst);
    }

    pub fn hang_start(&self, hang: bool) {
        self.state.hang_start.store(hang, Ordering::SeqCst);
    }

    pub fn hang_register(&self, hang: bool) {
        self.state.hang_register.store(hang, Ordering::SeqCst);
    }

    pub fn fail_register(&self, error: Option<&str>) {
        *self.state.register_error.lock().unwrap() = error.map(str::to_string);
    }

    pub fn endpoint_count(&self) -> u32 {
        self.state.endpoints.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> u32 {
        self.state.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> u32 {
        self.state.stops.load(Ordering::SeqCst)
    }

    pub fn options_count(&self) -> u32 {
        self.state.options.load(Ordering::SeqCst)
    }

    pub fn options_targets(&self) -> Vec<String> {
        self.state.options_targets.lock().unwrap().clone()
    }

    pub fn register_count(&self) -> u32 {
        self.state.registers.load(Ordering::SeqCst)
    }

    pub fn unregister_count(&self) -> u32 {
        self.state.unregisters.load(Ordering::SeqCst)
    }

    pub fn media_acquired(&self) -> u32 {
        self.state.media_acquired.load(Ordering::SeqCst)
    }

    pub fn last_media(&self) -> Option<Arc<MockMedia>> {
        self.state.media.lock().unwrap().last().cloned()
    }

    pub fn last_spec(&self) -> Option<EndpointSpec> {
        self.state.specs.lock().unwrap().last().cloned()
    }

    /// 让第 `index` 个注册器（从 0 开始）报告后台刷新失败
    pub fn fail_refresh(&self, index: usize, reason: &str) {
        let handler = self.state.refresh_handlers.lock().unwrap().get(index).cloned();
        handler.expect("registrar has no refresh handler")(reason.to_string());
    }

    /// 最近一次构造端点时注册的回调
    pub fn last_delegate(&self) -> Option<Arc<dyn EndpointDelegate>> {
        self.state.delegates.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl SignalingEngine for MockEngine {
    async fn acquire_media(&self) -> Result<Arc<dyn MediaStream>, SipError> {
        self.state.media_acquired.fetch_add(1, Ordering::SeqCst);
        let media = Arc::new(MockMedia {
            active: AtomicBool::new(true),
        });
        self.state.media.lock().unwrap().push(media.clone());
        Ok(media)
    }

    fn create_endpoint(
        &self,
        spec: EndpointSpec,
        delegate: Arc<dyn EndpointDelegate>,
    ) -> Result<Arc<dyn SignalingEndpoint>, SipError> {
        self.state.endpoints.fetch_add(1, Ordering::SeqCst);
        self.state.specs.lock().unwrap().push(spec);
        self.state.delegates.lock().unwrap().push(delegate);
        Ok(Arc::new(MockEndpoint {
            state: self.state.clone(),
        }))
    }
}

struct MockEndpoint {
    state: Arc<EngineState>,
}

#[async_trait]
impl SignalingEndpoint for MockEndpoint {
    async fn start(&self) -> Result<(), SipError> {
        self.state.starts.fetch_add(1, Ordering::SeqCst);
        if self.state.hang_start.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let remaining = self.state.fail_starts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.state.fail_starts.store(remaining - 1, Ordering::SeqCst);
            return Err(SipError::Transport("connect ECONNREFUSED".into()));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), SipError> {
        self.state.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_options(&self, target: &str) -> Result<(), SipError> {
        self.state.options.fetch_add(1, Ordering::SeqCst);
        self.state
            .options_targets
            .lock()
            .unwrap()
            .push(target.to_string());
        Ok(())
    }

    fn create_registrar(&self) -> Result<Box<dyn Registrar>, SipError> {
        Ok(Box::new(MockRegistrar {
            state: self.state.clone(),
            registered: false,
        }))
    }
}

struct MockRegistrar {
    state: Arc<EngineState>,
    registered: bool,
}

#[async_trait]
impl Registrar for MockRegistrar {
    async fn register(&mut self) -> RegistrationResult {
        self.state.registers.fetch_add(1, Ordering::SeqCst);
        if self.state.hang_register.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let error = self.state.register_error.lock().unwrap().clone();
        if let Some(error) = error {
            return Err(SipError::RegistrationFailed(error));
        }
        self.registered = true;
        Ok(())
    }

    async fn unregister(&mut self) -> RegistrationResult {
        self.state.unregisters.fetch_add(1, Ordering::SeqCst);
        self.registered = false;
        Ok(())
    }

    fn is_registered(&self) -> bool {
        self.registered
    }

    fn on_refresh_failed(&mut self, handler: RefreshFailedHandler) {
        self.state.refresh_handlers.lock().unwrap().push(handler);
    }
}
