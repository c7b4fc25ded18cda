/// Registration 模块
///
/// 提供 SIP 注册实现
///
/// - `Registrar` trait: 定义注册行为接口
/// - `StandardRegistrar`: 基于 rsipstack `Registration` 的标准实现，
///   注册成功后在过期前自动刷新
///
/// ## 使用示例
///
/// ```rust,no_run
/// use sip_agent::registration::*;
///
/// # async fn example(endpoint: rsipstack::transaction::endpoint::EndpointInnerRef) -> Result<(), sip_agent::SipError> {
/// let server = rsip::Uri::try_from("sip:pbx.example.com:5060").unwrap();
/// let config = RegistrationConfig::new("alice".into(), "password".into(), server);
/// let mut registrar = StandardRegistrar::new(endpoint, config);
///
/// registrar.register().await?;
/// # Ok(())
/// # }
/// ```

mod standard;
mod traits;

// 导出公共接口
pub use standard::StandardRegistrar;
pub use traits::{RefreshFailedHandler, Registrar, RegistrationConfig, RegistrationResult};
