/// SIP 客户端核心模块
///
/// 基于 rsipstack 的信令引擎实现：UDP 传输、事务层、服务端 INVITE 对话，
/// 以及 OPTIONS 探测和 REGISTER。
use crate::config::DEFAULT_USER_AGENT;
use crate::error::{ConfigError, SipError};
use crate::media::{LocalMediaStream, DEFAULT_RTP_START_PORT};
use crate::registration::{Registrar, RegistrationConfig, StandardRegistrar};
use crate::signaling::{
    EndpointDelegate, EndpointSpec, IncomingInvite, IncomingNotify, MediaStream,
    SignalingEndpoint, SignalingEngine,
};
use crate::sip_session::{RsipSession, SessionRegistry};
use crate::utils;
use async_trait::async_trait;
use rsip::{SipMessage, StatusCode};
use rsipstack::{
    dialog::{authenticate::Credential, dialog_layer::DialogLayer},
    transaction::{
        endpoint::EndpointInnerRef,
        key::{TransactionKey, TransactionRole},
        make_tag,
        transaction::Transaction,
        Endpoint, TransactionReceiver,
    },
    transport::{udp::UdpConnection, TransportLayer},
    EndpointBuilder,
};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// rsipstack 信令引擎
#[derive(Debug, Clone, Default)]
pub struct RsipEngine {
    /// 本地绑定地址，None 时使用第一个非回环接口
    pub local_ip: Option<IpAddr>,
    pub rtp_start_port: Option<u16>,
}

impl RsipEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local_ip(mut self, ip: IpAddr) -> Self {
        self.local_ip = Some(ip);
        self
    }

    fn resolve_local_ip(&self) -> Result<IpAddr, SipError> {
        match self.local_ip {
            Some(ip) => Ok(ip),
            None => {
                let ip = utils::get_first_non_loopback_interface()?;
                info!(
                    "检测到本地出口IP: {} ({})",
                    ip,
                    if ip.is_ipv6() { "IPv6" } else { "IPv4" }
                );
                Ok(ip)
            }
        }
    }
}

#[async_trait]
impl SignalingEngine for RsipEngine {
    async fn acquire_media(&self) -> Result<Arc<dyn MediaStream>, SipError> {
        let ip = self.resolve_local_ip()?;
        let stream = LocalMediaStream::bind(ip, self.rtp_start_port.unwrap_or(DEFAULT_RTP_START_PORT)).await?;
        Ok(stream)
    }

    fn create_endpoint(
        &self,
        spec: EndpointSpec,
        delegate: Arc<dyn EndpointDelegate>,
    ) -> Result<Arc<dyn SignalingEndpoint>, SipError> {
        let transport = utils::extract_transport(&spec.server);
        if transport != rsip::Transport::Udp {
            return Err(ConfigError::Invalid(format!(
                "unsupported transport {}, only UDP is available",
                transport
            ))
            .into());
        }
        Ok(Arc::new(RsipEndpoint::new(spec, delegate, self.local_ip)))
    }
}

/// 传入请求处理需要的共享状态
struct EndpointShared {
    spec: EndpointSpec,
    delegate: Arc<dyn EndpointDelegate>,
    dialog_layer: Arc<DialogLayer>,
    contact: rsip::Uri,
    sessions: SessionRegistry,
}

struct Running {
    endpoint: Endpoint,
    shared: Arc<EndpointShared>,
}

/// 一个 rsipstack 端点
pub struct RsipEndpoint {
    spec: EndpointSpec,
    delegate: Arc<dyn EndpointDelegate>,
    local_ip: Option<IpAddr>,
    cancel_token: CancellationToken,
    running: Mutex<Option<Running>>,
    options_seq: AtomicU32,
}

impl RsipEndpoint {
    pub fn new(spec: EndpointSpec, delegate: Arc<dyn EndpointDelegate>, local_ip: Option<IpAddr>) -> Self {
        Self {
            spec,
            delegate,
            local_ip,
            cancel_token: CancellationToken::new(),
            running: Mutex::new(None),
            options_seq: AtomicU32::new(0),
        }
    }

    fn inner(&self) -> Result<EndpointInnerRef, SipError> {
        self.running
            .lock()
            .map_err(|_| SipError::Other("endpoint state poisoned".into()))?
            .as_ref()
            .map(|running| running.endpoint.inner.clone())
            .ok_or_else(|| SipError::Transport("endpoint is not started".into()))
    }

    fn identity_uri(&self) -> Result<rsip::Uri, SipError> {
        Ok(rsip::Uri::try_from(self.spec.identity.as_str())?)
    }

    /// 启动传入请求处理器
    fn start_incoming_handler(
        mut incoming: TransactionReceiver,
        shared: Arc<EndpointShared>,
        cancel_token: CancellationToken,
    ) {
        tokio::spawn(async move {
            while let Some(mut transaction) = tokio::select! {
                tx = incoming.recv() => tx,
                _ = cancel_token.cancelled() => None,
            } {
                let method = transaction.original.method;
                debug!("收到传入请求: {}", method);

                let shared = shared.clone();
                match method {
                    rsip::Method::Options => {
                        if let Err(e) = transaction.reply(StatusCode::OK).await {
                            warn!("回复 OPTIONS 失败: {}", e);
                        }
                    }
                    // 按接收顺序处理，保证远程控制事件不乱序
                    rsip::Method::Notify => {
                        if let Err(e) = handle_notify(&shared, transaction).await {
                            error!("处理 NOTIFY 请求失败: {}", e);
                        }
                    }
                    _ => {
                        if let Some(mut dialog) = shared.dialog_layer.match_dialog(&transaction.original) {
                            tokio::spawn(async move {
                                if let Err(e) = dialog.handle(&mut transaction).await {
                                    error!("处理 {} 请求失败: {}", method, e);
                                }
                            });
                        } else if method == rsip::Method::Invite {
                            tokio::spawn(async move {
                                if let Err(e) = handle_invite(&shared, transaction).await {
                                    error!("处理来电失败: {}", e);
                                }
                            });
                        } else {
                            warn!("未找到匹配的对话: {}", method);
                            transaction
                                .reply(StatusCode::CallTransactionDoesNotExist)
                                .await
                                .ok();
                        }
                    }
                }
            }
            debug!("传入请求处理器退出");
        });
    }
}

#[async_trait]
impl SignalingEndpoint for RsipEndpoint {
    async fn start(&self) -> Result<(), SipError> {
        if self.cancel_token.is_cancelled() {
            return Err(SipError::Transport("endpoint already stopped".into()));
        }

        let local_ip = match self.local_ip {
            Some(ip) => ip,
            None => utils::get_first_non_loopback_interface()?,
        };

        // 创建传输层
        let transport_layer = TransportLayer::new(self.cancel_token.clone());
        let connection = UdpConnection::create_connection(
            SocketAddr::new(local_ip, 0),
            None,
            Some(self.cancel_token.child_token()),
        )
        .await
        .map_err(|e| SipError::Transport(format!("connect failed: {}", e)))?;
        transport_layer.add_transport(connection.into());

        // 创建端点
        let user_agent = if self.spec.user_agent.is_empty() {
            DEFAULT_USER_AGENT
        } else {
            self.spec.user_agent.as_str()
        };
        let mut endpoint_builder = EndpointBuilder::new();
        endpoint_builder
            .with_cancel_token(self.cancel_token.clone())
            .with_transport_layer(transport_layer)
            .with_user_agent(user_agent);
        let endpoint = endpoint_builder.build();

        let local_addr = endpoint
            .get_addrs()
            .first()
            .map(|addr| addr.addr.to_string())
            .ok_or_else(|| SipError::Transport("no local address bound".into()))?;
        info!("本地绑定的实际地址: {}", local_addr);

        let contact = rsip::Uri::try_from(
            format!("sip:{}@{}", self.spec.username, local_addr).as_str(),
        )?;

        // 启动端点服务；非主动停止时上报断开
        let endpoint_for_serve = endpoint.inner.clone();
        let delegate = self.delegate.clone();
        let cancel_token = self.cancel_token.clone();
        tokio::spawn(async move {
            let result = endpoint_for_serve.serve().await;
            if cancel_token.is_cancelled() {
                return;
            }
            let reason = match result {
                Ok(()) => "endpoint service stopped".to_string(),
                Err(e) => e.to_string(),
            };
            warn!("SIP 端点服务退出: {}", reason);
            delegate.on_disconnect(Some(reason));
        });

        let shared = Arc::new(EndpointShared {
            spec: self.spec.clone(),
            delegate: self.delegate.clone(),
            dialog_layer: Arc::new(DialogLayer::new(endpoint.inner.clone())),
            contact,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        });

        Self::start_incoming_handler(
            endpoint.incoming_transactions()?,
            shared.clone(),
            self.cancel_token.clone(),
        );

        let mut running = self
            .running
            .lock()
            .map_err(|_| SipError::Other("endpoint state poisoned".into()))?;
        *running = Some(Running { endpoint, shared });
        info!("✓ SIP 端点已启动: {}", self.spec.identity);
        Ok(())
    }

    async fn stop(&self) -> Result<(), SipError> {
        info!("停止 SIP 端点: {}", self.spec.identity);
        self.cancel_token.cancel();
        let running = self
            .running
            .lock()
            .map_err(|_| SipError::Other("endpoint state poisoned".into()))?
            .take();
        if let Some(running) = running {
            if let Ok(mut sessions) = running.shared.sessions.lock() {
                sessions.clear();
            }
        }
        Ok(())
    }

    async fn send_options(&self, target: &str) -> Result<(), SipError> {
        let inner = self.inner()?;
        let to_uri = rsip::Uri::try_from(target)?;
        let from_uri = self.identity_uri()?;

        let mut request_uri = self.spec.server.clone();
        request_uri
            .params
            .retain(|p| !matches!(p, rsip::Param::Transport(_)));

        let to = rsip::typed::To {
            display_name: None,
            uri: to_uri,
            params: vec![],
        };
        let from = rsip::typed::From {
            display_name: None,
            uri: from_uri,
            params: vec![],
        }
        .with_tag(make_tag());

        let via = inner.get_via(None, None)?;
        let seq = self.options_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let mut request =
            inner.make_request(rsip::Method::Options, request_uri, via, from, to, seq, None);
        request
            .headers
            .unique_push(utils::make_call_id(None).into());

        let key = TransactionKey::from_request(&request, TransactionRole::Client)?;
        let mut tx = Transaction::new_client(key, request, inner, None);
        tx.send().await?;

        while let Some(msg) = tx.receive().await {
            if let SipMessage::Response(resp) = msg {
                if resp.status_code == StatusCode::Trying {
                    continue;
                }
                // 任何最终响应都说明链路可用
                debug!("OPTIONS 响应: {}", resp.status_code);
                return Ok(());
            }
        }
        Err(SipError::Transport(
            "OPTIONS transaction terminated without response".into(),
        ))
    }

    fn create_registrar(&self) -> Result<Box<dyn Registrar>, SipError> {
        let config = RegistrationConfig::new(
            self.spec.username.clone(),
            self.spec.password.clone(),
            self.spec.server.clone(),
        );
        Ok(Box::new(StandardRegistrar::new(self.inner()?, config)))
    }
}

impl Drop for RsipEndpoint {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

fn first_header(request: &rsip::Request, name: &str, compact: &str) -> Option<String> {
    utils::header_values(&request.headers, name, Some(compact))
        .into_iter()
        .next()
}

async fn handle_invite(shared: &EndpointShared, mut tx: Transaction) -> Result<(), SipError> {
    let call_id = first_header(&tx.original, "Call-ID", "i")
        .ok_or_else(|| SipError::Protocol("INVITE without Call-ID".into()))?;
    let remote_uri = first_header(&tx.original, "From", "f").unwrap_or_default();
    let call_info = utils::header_values(&tx.original.headers, "Call-Info", None);
    info!("收到 INVITE: call_id={}, from={}", call_id, remote_uri);

    let credential = Credential {
        username: shared.spec.username.clone(),
        password: shared.spec.password.clone(),
        realm: None,
    };
    let (state_sender, state_receiver) = shared.dialog_layer.new_dialog_state_channel();
    let mut dialog = shared.dialog_layer.get_or_create_server_invite(
        &tx,
        state_sender,
        Some(credential),
        Some(shared.contact.clone()),
    )?;

    let session = RsipSession::new(call_id.clone(), dialog.clone(), shared.spec.media.clone());
    if let Ok(mut sessions) = shared.sessions.lock() {
        sessions.insert(call_id, session.clone());
    }

    let invite = IncomingInvite {
        session: session.clone(),
        call_info,
        remote_uri,
    };
    tokio::spawn(session.follow_dialog(
        state_receiver,
        Some((invite, shared.delegate.clone())),
        shared.sessions.clone(),
    ));

    dialog.handle(&mut tx).await?;
    Ok(())
}

async fn handle_notify(shared: &EndpointShared, mut tx: Transaction) -> Result<(), SipError> {
    let call_id = first_header(&tx.original, "Call-ID", "i").unwrap_or_default();
    let session = shared
        .sessions
        .lock()
        .ok()
        .and_then(|sessions| sessions.get(&call_id).cloned());

    let Some(session) = session else {
        debug!("NOTIFY 不属于任何会话: call_id={}", call_id);
        tx.reply(StatusCode::CallTransactionDoesNotExist).await?;
        return Ok(());
    };

    let event = first_header(&tx.original, "Event", "o");
    let body = Some(String::from_utf8_lossy(&tx.original.body).into_owned())
        .filter(|body| !body.is_empty());
    tx.reply(StatusCode::OK).await?;

    shared.delegate.on_notify(IncomingNotify {
        session,
        event,
        body,
    });
    Ok(())
}
