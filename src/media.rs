/// 本地媒体流
///
/// 绑定一个 RTP 端口并生成本端 SDP（PCMU + telephone-event，sendrecv）。
/// 编解码协商不在这里处理。
use crate::error::SipError;
use crate::signaling::MediaStream;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// RTP 端口搜索起点
pub const DEFAULT_RTP_START_PORT: u16 = 20000;

const PORT_ATTEMPTS: u16 = 100;

pub struct LocalMediaStream {
    socket: Mutex<Option<Arc<UdpSocket>>>,
    local_addr: SocketAddr,
    ssrc: u32,
    active: AtomicBool,
}

impl LocalMediaStream {
    /// 从 `start_port` 开始按偶数端口尝试绑定
    pub async fn bind(ip: IpAddr, start_port: u16) -> Result<Arc<Self>, SipError> {
        for offset in 0..PORT_ATTEMPTS {
            let Some(port) = start_port.checked_add(offset * 2) else {
                break;
            };
            match UdpSocket::bind(SocketAddr::new(ip, port)).await {
                Ok(socket) => {
                    let local_addr = socket.local_addr()?;
                    let stream = Arc::new(Self {
                        socket: Mutex::new(Some(Arc::new(socket))),
                        local_addr,
                        ssrc: uuid::Uuid::new_v4().as_fields().0,
                        active: AtomicBool::new(true),
                    });
                    info!("RTP 端口已绑定: {}", local_addr);
                    return Ok(stream);
                }
                Err(e) => debug!("RTP 端口 {} 绑定失败: {}", port, e),
            }
        }
        Err(SipError::Media(format!(
            "no free RTP port from {} on {}",
            start_port, ip
        )))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 释放端口，之后 `is_active` 返回 false
    pub fn close(&self) {
        if let Ok(mut socket) = self.socket.lock() {
            socket.take();
        }
        self.active.store(false, Ordering::SeqCst);
        info!("RTP 端口已释放: {}", self.local_addr);
    }
}

impl MediaStream for LocalMediaStream {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn session_description(&self) -> String {
        let ip = self.local_addr.ip();
        let family = if ip.is_ipv6() { "IP6" } else { "IP4" };
        format!(
            "v=0\r\n\
            o=- {ssrc} {ssrc} IN {family} {ip}\r\n\
            s=sip-agent\r\n\
            c=IN {family} {ip}\r\n\
            t=0 0\r\n\
            m=audio {port} RTP/AVP 0 101\r\n\
            a=rtpmap:0 PCMU/8000\r\n\
            a=rtpmap:101 telephone-event/8000\r\n\
            a=fmtp:101 0-16\r\n\
            a=ssrc:{ssrc}\r\n\
            a=sendrecv\r\n",
            ssrc = self.ssrc,
            family = family,
            ip = ip,
            port = self.local_addr.port(),
        )
    }
}
