/// 代理端（公网侧）
///
/// 两个监听器并行跑：公网监听器收外部流量，隧道监听器收客户端的
/// 反向连接，中间由调度器按 FIFO 配对。监听器出错走关闭重建，
/// 单条连接的错误只影响它自己。
mod dispatcher;

use dispatcher::{Dispatcher, PublicConn, RequestOffer, TunnelConn, TunnelOffer};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::ProxyConfig;
use crate::crypto::CipherSpec;
use crate::error::{Result, TunnelError};
use crate::io_util::{bridge, set_long_lived, BridgeConfig, COPY_BUFFER_SIZE};
use crate::protocol::verify_challenge;

/// 监听器重建间隔
const LISTENER_RESTART_DELAY: Duration = Duration::from_secs(1);

/// 公网侧连接统一成 trait 对象，TCP 与 TLS 走同一条处理路径
pub(crate) trait PublicStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> PublicStream for T {}
pub(crate) type BoxedPublic = Box<dyn PublicStream>;

/// 运行中的代理进程句柄
pub struct ProxyHandle {
    shutdown: broadcast::Sender<()>,
    listeners: Vec<JoinHandle<()>>,
}

impl ProxyHandle {
    /// 停止监听并断开所有已接受的连接
    pub fn shutdown(self) {
        let _ = self.shutdown.send(());
        for task in &self.listeners {
            task.abort();
        }
    }
}

/// 两个监听循环共享的运行环境
struct ProxyShared {
    config: ProxyConfig,
    cipher: Option<CipherSpec>,
    tls: Option<TlsAcceptor>,
    dispatcher: Arc<Dispatcher>,
    shutdown: broadcast::Sender<()>,
}

/// 启动代理：绑定两个监听端口后即返回，接受循环在后台继续
pub async fn start_proxy(config: ProxyConfig) -> Result<ProxyHandle> {
    config.validate()?;

    let cipher = config.cipher_spec()?;
    let tls = match (&config.cert_path, &config.key_path) {
        (Some(cert), Some(key)) => {
            Some(crate::tls::TlsIdentity::from_pem_files(cert, key)?.into_acceptor()?)
        }
        _ => None,
    };

    let public_listener = bind(&config.bind_addr, config.proxy_port).await?;
    let tunnel_listener = bind(&config.bind_addr, config.tunnel_port).await?;

    info!(
        "proxy listening on {}:{} ({}), tunnels on port {}",
        config.bind_addr,
        config.proxy_port,
        if tls.is_some() { "tls" } else { "tcp" },
        config.tunnel_port,
    );

    let (shutdown, _) = broadcast::channel(1);
    let shared = Arc::new(ProxyShared {
        config,
        cipher,
        tls,
        dispatcher: Arc::new(Dispatcher::new()),
        shutdown: shutdown.clone(),
    });

    let listeners = vec![
        tokio::spawn(run_public_listener(public_listener, shared.clone())),
        tokio::spawn(run_tunnel_listener(tunnel_listener, shared.clone())),
    ];

    Ok(ProxyHandle {
        shutdown,
        listeners,
    })
}

async fn bind(host: &str, port: u16) -> Result<TcpListener> {
    TcpListener::bind((host, port))
        .await
        .map_err(|e| TunnelError::listen_failed(format!("{}:{}", host, port), e))
}

/// 接受循环出错后的恢复路径：丢掉旧监听器，重试绑定直到成功
async fn rebind(host: &str, port: u16) -> TcpListener {
    loop {
        tokio::time::sleep(LISTENER_RESTART_DELAY).await;
        match TcpListener::bind((host, port)).await {
            Ok(listener) => {
                info!("listener restarted on {}:{}", host, port);
                return listener;
            }
            Err(e) => warn!("failed to rebind {}:{}: {}", host, port, e),
        }
    }
}

/// 连接处理任务统一挂在停机广播下，停机时一起断开
fn spawn_connection<F>(shared: &Arc<ProxyShared>, fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let mut shutdown = shared.shutdown.subscribe();
    tokio::spawn(async move {
        tokio::select! {
            _ = fut => {}
            _ = shutdown.recv() => {}
        }
    });
}

async fn run_public_listener(mut listener: TcpListener, shared: Arc<ProxyShared>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("public connection from {}", peer);
                let shared_conn = shared.clone();
                spawn_connection(&shared, handle_public_conn(stream, shared_conn));
            }
            Err(e) => {
                error!("public listener error: {}, restarting", e);
                drop(listener);
                listener = rebind(&shared.config.bind_addr, shared.config.proxy_port).await;
            }
        }
    }
}

async fn run_tunnel_listener(mut listener: TcpListener, shared: Arc<ProxyShared>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("tunnel connection from {}", peer);
                let shared_conn = shared.clone();
                spawn_connection(&shared, handle_tunnel_conn(stream, shared_conn));
            }
            Err(e) => {
                error!("tunnel listener error: {}, restarting", e);
                drop(listener);
                listener = rebind(&shared.config.bind_addr, shared.config.tunnel_port).await;
            }
        }
    }
}

/// 排队等待期间的下一步
enum WaitStep<T> {
    Paired(std::result::Result<T, oneshot::error::RecvError>),
    TimedOut,
    Read(std::io::Result<usize>),
}

/// 处理一条公网请求：配上就桥接，配不上就排队等隧道
async fn handle_public_conn(stream: TcpStream, shared: Arc<ProxyShared>) {
    let stream: BoxedPublic = match &shared.tls {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => Box::new(tls_stream),
            Err(e) => {
                debug!("tls accept failed: {}", e);
                return;
            }
        },
        None => Box::new(stream),
    };

    let conn = PublicConn {
        stream,
        first_chunk: None,
    };
    let (id, mut rx, mut conn) = match shared.dispatcher.offer_request(conn).await {
        RequestOffer::Paired => return,
        RequestOffer::Queued { id, rx, conn } => (id, rx, conn),
    };

    // 排队期间：等配对、等超时，同时预读首块数据以便及时发现对端关闭
    let deadline = async {
        match shared.config.request_timeout() {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    loop {
        let step = tokio::select! {
            res = &mut rx => WaitStep::Paired(res),
            _ = &mut deadline => WaitStep::TimedOut,
            n = conn.stream.read(&mut buf), if conn.first_chunk.is_none() => WaitStep::Read(n),
        };

        match step {
            WaitStep::Paired(Ok(tunnel)) => {
                pair_bridge(conn, tunnel, &shared).await;
                return;
            }
            WaitStep::Paired(Err(_)) => return,
            WaitStep::TimedOut => {
                debug!("request timed out waiting for a tunnel");
                shared.dispatcher.retire_request(id).await;
                return;
            }
            WaitStep::Read(Ok(0)) | WaitStep::Read(Err(_)) => {
                debug!("queued request closed before a tunnel arrived");
                shared.dispatcher.retire_request(id).await;
                return;
            }
            WaitStep::Read(Ok(n)) => {
                conn.first_chunk = Some(buf[..n].to_vec());
            }
        }
    }
}

/// 处理一条隧道连接：先过挑战应答，然后进池或直接配对
async fn handle_tunnel_conn(mut stream: TcpStream, shared: Arc<ProxyShared>) {
    if let Some(secret) = &shared.config.secret {
        let timeout = shared.config.challenge_timeout();
        if let Err(e) = verify_challenge(&mut stream, secret.as_bytes(), timeout).await {
            info!("tunnel handshake failed: {}", e);
            return;
        }
    }

    if let Err(e) = set_long_lived(&stream) {
        warn!("failed to enable keep-alive on tunnel socket: {}", e);
    }

    let conn = TunnelConn {
        stream,
        first_chunk: None,
        online: shared.dispatcher.online_guard(),
    };
    let (id, mut rx, mut conn) = match shared.dispatcher.offer_tunnel(conn).await {
        TunnelOffer::Paired => return,
        TunnelOffer::Queued { id, rx, conn } => (id, rx, conn),
    };

    // 入池等待：隧道没有空闲超时，但要盯着对端是否先断
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let step = tokio::select! {
            res = &mut rx => WaitStep::Paired(res),
            n = conn.stream.read(&mut buf), if conn.first_chunk.is_none() => WaitStep::Read(n),
        };

        match step {
            WaitStep::Paired(Ok(request)) => {
                pair_bridge(request, conn, &shared).await;
                return;
            }
            WaitStep::Paired(Err(_)) => return,
            WaitStep::TimedOut => unreachable!("idle tunnels have no deadline"),
            WaitStep::Read(Ok(0)) | WaitStep::Read(Err(_)) => {
                debug!("idle tunnel closed, removing from pool");
                shared.dispatcher.retire_tunnel(id).await;
                return;
            }
            WaitStep::Read(Ok(n)) => {
                conn.first_chunk = Some(buf[..n].to_vec());
            }
        }
    }
}

/// 把一条请求和一条隧道接成配对并桥接到任一端结束
///
/// 代理方向约定：请求 -> 隧道加密，隧道 -> 请求解密。请求侧的空闲
/// 超时在配对后依然有效；隧道侧靠 keep-alive 维持，不设超时。
async fn pair_bridge(request: PublicConn, tunnel: TunnelConn, shared: &ProxyShared) {
    let (encryptor, decryptor) = match &shared.cipher {
        Some(spec) => match (spec.encryptor(), spec.decryptor()) {
            (Ok(enc), Ok(dec)) => (Some(enc), Some(dec)),
            _ => {
                error!("failed to initialize tunnel cipher, dropping pair");
                return;
            }
        },
        None => (None, None),
    };

    let TunnelConn {
        stream: tunnel_stream,
        first_chunk: tunnel_first,
        online,
    } = tunnel;

    debug!("paired public request with tunnel");
    let config = BridgeConfig {
        a_to_b: encryptor,
        b_to_a: decryptor,
        a_first: request.first_chunk,
        b_first: tunnel_first,
        idle_timeout: shared.config.request_timeout(),
    };

    if let Err(e) = bridge(request.stream, tunnel_stream, config).await {
        debug!("pair ended: {}", e);
    }
    drop(online);
}
