/// SIP 工具函数模块
///
/// 日志初始化、本地地址探测、Call-ID 生成和报文头读取等辅助函数

use std::net::IpAddr;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// 初始化 tracing 日志
///
/// `level` 可以是单个级别（"info"），也可以是完整的 EnvFilter 表达式
/// （"sip_agent=debug,rsipstack=info"）。`RUST_LOG` 优先。
pub fn initialize_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// 获取第一个非回环的网络接口 IP 地址
///
/// 遍历系统所有网络接口，返回第一个非回环的 IPv4 地址
///
/// # 返回
/// - `Ok(IpAddr)` - 成功找到的 IPv4 地址
/// - `Err` - 未找到可用的 IPv4 接口
pub fn get_first_non_loopback_interface() -> Result<IpAddr, Box<dyn std::error::Error>> {
    for interface in get_if_addrs::get_if_addrs()? {
        if !interface.is_loopback() {
            match interface.addr {
                get_if_addrs::IfAddr::V4(ref addr) => return Ok(IpAddr::V4(addr.ip)),
                _ => continue,
            }
        }
    }
    Err("未找到 IPv4 接口".into())
}

/// 生成基于 UUID 的 Call-ID
///
/// 使用 UUID v4 代替随机文本，确保全局唯一性
///
/// # 示例
/// ```rust
/// use sip_agent::utils::make_call_id;
///
/// let call_id = make_call_id(Some("example.com"));
/// assert!(call_id.to_string().contains("@example.com"));
/// ```
pub fn make_call_id(domain: Option<&str>) -> rsip::headers::CallId {
    let uuid = Uuid::new_v4();

    match domain {
        Some(d) => format!("{}@{}", uuid, d).into(),
        None => uuid.to_string().into(),
    }
}

/// 按名称读取报文头的值（忽略大小写，保持出现顺序）
///
/// rsip 对部分报文头有强类型表示，这里统一从文本形式 "Name: value" 中取值，
/// 同时匹配紧凑形式 `compact`（例如 Event 的 "o"）。
pub fn header_values(headers: &rsip::Headers, name: &str, compact: Option<&str>) -> Vec<String> {
    headers
        .iter()
        .filter_map(|header| {
            let text = header.to_string();
            let (header_name, value) = text.split_once(':')?;
            let header_name = header_name.trim();
            let matches = header_name.eq_ignore_ascii_case(name)
                || compact.is_some_and(|c| header_name.eq_ignore_ascii_case(c));
            matches.then(|| value.trim().to_string())
        })
        .collect()
}

/// 从 URI 的 transport 参数中取出传输协议，缺省为 UDP
pub fn extract_transport(uri: &rsip::Uri) -> rsip::Transport {
    uri.params
        .iter()
        .find_map(|p| match p {
            rsip::Param::Transport(t) => Some(t.clone()),
            _ => None,
        })
        .unwrap_or(rsip::Transport::Udp)
}
