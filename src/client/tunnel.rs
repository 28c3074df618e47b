/// 单条隧道的生命周期
///
/// 两个连接并行发起：远端腿连上代理的隧道端口后立刻做挑战应答，
/// 本地腿连本地应用。两条腿都就绪（且远端通过验证）才进入 piping；
/// 任一侧先出错则整体关闭，错误吞掉并上报一次 Closed 事件。
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::ClientShared;
use crate::error::{Result, TunnelError};
use crate::io_util::{bridge, set_long_lived, BridgeConfig};
use crate::protocol::answer_challenge;

/// 隧道上报给池管理器的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TunnelEvent {
    /// 两条腿都就绪，进入 piping
    Connected(u64),
    /// 隧道结束（含从未连上的情况），每条隧道恰好一次
    Closed(u64),
}

pub(crate) async fn run_tunnel(
    id: u64,
    shared: Arc<ClientShared>,
    events: mpsc::UnboundedSender<TunnelEvent>,
) {
    let mut shutdown = shared.shutdown.subscribe();
    tokio::select! {
        result = tunnel_session(id, &shared, &events) => {
            if let Err(e) = result {
                debug!("tunnel {} closed: {}", id, e);
            }
        }
        _ = shutdown.recv() => {}
    }
    let _ = events.send(TunnelEvent::Closed(id));
}

async fn tunnel_session(
    id: u64,
    shared: &ClientShared,
    events: &mpsc::UnboundedSender<TunnelEvent>,
) -> Result<()> {
    let remote_addr = format!(
        "{}:{}",
        shared.config.proxy_host, shared.config.tunnel_port
    );
    let local_addr = format!("{}:{}", shared.config.app_host, shared.config.app_port);

    // 远端腿：连上就发 secret，不等本地腿
    let remote_leg = async {
        let mut stream = TcpStream::connect(&remote_addr)
            .await
            .map_err(|e| TunnelError::connection_failed(remote_addr.clone(), e))?;
        if let Some(secret) = &shared.config.secret {
            answer_challenge(
                &mut stream,
                secret.as_bytes(),
                shared.config.challenge_timeout(),
            )
            .await?;
        }
        Ok(stream)
    };
    let local_leg = async {
        TcpStream::connect(&local_addr)
            .await
            .map_err(|e| TunnelError::connection_failed(local_addr.clone(), e))
    };

    // 任一条腿失败立刻放弃另一条
    let (remote, local) = tokio::try_join!(remote_leg, local_leg)?;

    if let Err(e) = set_long_lived(&remote) {
        warn!("failed to enable keep-alive on tunnel socket: {}", e);
    }
    if let Err(e) = set_long_lived(&local) {
        warn!("failed to enable keep-alive on app socket: {}", e);
    }

    let _ = events.send(TunnelEvent::Connected(id));
    debug!("tunnel {} piping", id);

    // 客户端方向约定：隧道 -> 应用解密，应用 -> 隧道加密
    let (encryptor, decryptor) = match &shared.cipher {
        Some(spec) => (Some(spec.encryptor()?), Some(spec.decryptor()?)),
        None => (None, None),
    };
    let config = BridgeConfig {
        a_to_b: decryptor,
        b_to_a: encryptor,
        a_first: None,
        b_first: None,
        idle_timeout: None,
    };

    bridge(remote, local, config).await?;
    Ok(())
}
