/// 客户端（内网侧）
///
/// 池管理器维持目标数量的并发隧道：先开一条探测隧道确认代理可达，
/// 成功后批量补齐；运行中每条隧道关闭都会触发一次去抖后的重新评估，
/// 池子空了就退回探测阶段按 reconnect_delay 重试。
mod tunnel;

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::crypto::CipherSpec;
use crate::error::Result;
use tunnel::TunnelEvent;

/// 隧道关闭后的去抖窗口，把一波连锁关闭合并成一次重评估
const REFILL_DEBOUNCE: Duration = Duration::from_millis(300);

/// 运行中的客户端句柄
pub struct ClientHandle {
    shutdown: broadcast::Sender<()>,
    manager: JoinHandle<()>,
}

impl ClientHandle {
    /// 停止池管理器并断开所有隧道
    pub fn shutdown(self) {
        let _ = self.shutdown.send(());
        self.manager.abort();
    }
}

/// 池管理器和所有隧道任务共享的运行环境
pub(crate) struct ClientShared {
    pub(crate) config: ClientConfig,
    pub(crate) cipher: Option<CipherSpec>,
    pub(crate) shutdown: broadcast::Sender<()>,
}

/// 启动客户端：配置校验通过即返回，隧道池在后台维持
pub async fn start_client(config: ClientConfig) -> Result<ClientHandle> {
    config.validate()?;
    let cipher = config.cipher_spec()?;

    let (shutdown, _) = broadcast::channel(1);
    let shared = Arc::new(ClientShared {
        config,
        cipher,
        shutdown: shutdown.clone(),
    });

    info!(
        "client connecting to {}:{}, pool size {}",
        shared.config.proxy_host, shared.config.tunnel_port, shared.config.pool_size
    );

    let manager = tokio::spawn(run_pool_manager(shared));
    Ok(ClientHandle { shutdown, manager })
}

/// 池管理器主循环
async fn run_pool_manager(shared: Arc<ClientShared>) {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut pool: HashSet<u64> = HashSet::new();
    let mut next_id: u64 = 0;
    let reconnect_delay = shared.config.reconnect_delay();

    'boot: loop {
        // 上一轮残留的事件作废
        while event_rx.try_recv().is_ok() {}
        pool.clear();

        // 探测：单独开一条隧道，确认代理可达再补满
        let probe = spawn_tunnel(&mut next_id, &shared, &event_tx);
        pool.insert(probe);

        let probe_ok = loop {
            match event_rx.recv().await {
                Some(TunnelEvent::Connected(id)) if id == probe => break true,
                Some(TunnelEvent::Connected(_)) => {}
                Some(TunnelEvent::Closed(id)) => {
                    pool.remove(&id);
                    if id == probe {
                        break false;
                    }
                }
                None => return,
            }
        };

        if !probe_ok {
            warn!(
                "proxy unreachable, retrying in {} ms",
                shared.config.reconnect_delay_ms
            );
            sleep(reconnect_delay).await;
            continue 'boot;
        }

        info!("tunnel verified, filling pool to {}", shared.config.pool_size);
        fill_pool(&mut pool, &mut next_id, &shared, &event_tx);

        // 稳态：消化关闭事件，去抖后要么补齐要么整体重连
        loop {
            let event = match event_rx.recv().await {
                Some(event) => event,
                None => return,
            };
            let TunnelEvent::Closed(id) = event else {
                continue;
            };
            pool.remove(&id);

            let debounce = sleep(REFILL_DEBOUNCE);
            tokio::pin!(debounce);
            loop {
                tokio::select! {
                    _ = &mut debounce => break,
                    event = event_rx.recv() => match event {
                        Some(TunnelEvent::Closed(id)) => {
                            pool.remove(&id);
                        }
                        Some(TunnelEvent::Connected(_)) => {}
                        None => return,
                    }
                }
            }

            if pool.is_empty() {
                warn!(
                    "all tunnels are down, reconnecting in {} ms",
                    shared.config.reconnect_delay_ms
                );
                sleep(reconnect_delay).await;
                continue 'boot;
            }

            debug!("pool at {}/{}, refilling", pool.len(), shared.config.pool_size);
            fill_pool(&mut pool, &mut next_id, &shared, &event_tx);
        }
    }
}

/// 补足隧道数到目标值；永不超过 pool_size
fn fill_pool(
    pool: &mut HashSet<u64>,
    next_id: &mut u64,
    shared: &Arc<ClientShared>,
    events: &mpsc::UnboundedSender<TunnelEvent>,
) {
    while pool.len() < shared.config.pool_size {
        let id = spawn_tunnel(next_id, shared, events);
        pool.insert(id);
    }
}

fn spawn_tunnel(
    next_id: &mut u64,
    shared: &Arc<ClientShared>,
    events: &mpsc::UnboundedSender<TunnelEvent>,
) -> u64 {
    let id = *next_id;
    *next_id += 1;
    tokio::spawn(tunnel::run_tunnel(id, shared.clone(), events.clone()));
    id
}
