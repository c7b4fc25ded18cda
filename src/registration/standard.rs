/// 标准注册实现
///
/// 使用 rsipstack 内置的 Registration 类，注册成功后后台按过期时间刷新
use super::traits::{RefreshFailedHandler, Registrar, RegistrationConfig, RegistrationResult};
use crate::error::SipError;
use async_trait::async_trait;
use rsipstack::{
    dialog::{authenticate::Credential, registration::Registration},
    transaction::endpoint::EndpointInnerRef,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// 标准注册器
///
/// 适用于直接连接到 SIP 服务器的场景
pub struct StandardRegistrar {
    /// rsipstack 的 Registration 实例（刷新任务共享）
    registration: Arc<Mutex<Registration>>,

    /// 配置
    config: RegistrationConfig,

    /// 是否已注册（刷新失败时由刷新任务清除）
    is_registered: Arc<AtomicBool>,

    /// 刷新任务
    refresh_task: Option<JoinHandle<()>>,

    refresh_failed: Option<RefreshFailedHandler>,
}

impl StandardRegistrar {
    /// 创建新的标准注册器
    pub fn new(endpoint: EndpointInnerRef, config: RegistrationConfig) -> Self {
        info!("创建标准注册器: 用户 {}", config.username);

        // 创建认证凭证
        let credential = Credential {
            username: config.username.clone(),
            password: config.password.clone(),
            realm: config.realm.clone(),
        };

        let mut registration = Registration::new(endpoint, Some(credential));
        registration.call_id = crate::utils::make_call_id(None);

        Self {
            registration: Arc::new(Mutex::new(registration)),
            config,
            is_registered: Arc::new(AtomicBool::new(false)),
            refresh_task: None,
            refresh_failed: None,
        }
    }

    async fn send_register(
        registration: &Mutex<Registration>,
        uri: rsip::Uri,
        expires: u32,
    ) -> RegistrationResult {
        let response = registration
            .lock()
            .await
            .register(uri, Some(expires))
            .await
            .map_err(|e| SipError::RegistrationFailed(e.to_string()))?;

        if response.status_code == rsip::StatusCode::OK {
            Ok(())
        } else {
            Err(SipError::RegistrationFailed(format!(
                "{} {}",
                response.status_code.code(),
                String::from_utf8_lossy(&response.body)
            )))
        }
    }

    fn start_refresh(&mut self) {
        self.stop_refresh();

        let registration = self.registration.clone();
        let uri = self.config.register_uri();
        let expires = self.config.default_expires;
        let interval = self.config.refresh_interval();
        let is_registered = self.is_registered.clone();
        let refresh_failed = self.refresh_failed.clone();

        self.refresh_task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                debug!("刷新注册: {}", uri);
                if let Err(e) = Self::send_register(&registration, uri.clone(), expires).await {
                    error!("刷新注册失败，停止刷新: {}", e);
                    is_registered.store(false, Ordering::SeqCst);
                    if let Some(handler) = &refresh_failed {
                        handler(e.to_string());
                    }
                    break;
                }
            }
        }));
    }

    fn stop_refresh(&mut self) {
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
    }
}

impl Drop for StandardRegistrar {
    fn drop(&mut self) {
        self.stop_refresh();
    }
}

#[async_trait]
impl Registrar for StandardRegistrar {
    async fn register(&mut self) -> RegistrationResult {
        let uri = self.config.register_uri();
        let expires = self.config.default_expires;

        info!("执行标准注册: server={}, expires={}", uri, expires);
        debug!("用户: {}, realm: {:?}", self.config.username, self.config.realm);

        match Self::send_register(&self.registration, uri, expires).await {
            Ok(()) => {
                self.is_registered.store(true, Ordering::SeqCst);
                info!("✓ 标准注册成功");
                self.start_refresh();
                Ok(())
            }
            Err(e) => {
                self.is_registered.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn unregister(&mut self) -> RegistrationResult {
        info!("执行标准注销");
        self.stop_refresh();
        self.is_registered.store(false, Ordering::SeqCst);

        Self::send_register(&self.registration, self.config.register_uri(), 0).await
    }

    async fn dispose(&mut self) -> RegistrationResult {
        self.stop_refresh();
        if self.is_registered() {
            self.unregister().await
        } else {
            Ok(())
        }
    }

    fn is_registered(&self) -> bool {
        self.is_registered.load(Ordering::SeqCst)
    }

    fn on_refresh_failed(&mut self, handler: RefreshFailedHandler) {
        self.refresh_failed = Some(handler);
    }
}
