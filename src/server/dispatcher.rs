/// 配对调度器
///
/// 持有两个 FIFO 队列：空闲隧道和等待中的公网请求。不变式是任一时刻
/// 至多只有一个队列非空——offer 在同一把锁里先试着从对面队列配对，
/// 配不上才入队，所以"同时"到达的一对恰好配对一次，两个队列都不增长。
///
/// 队列里只存 oneshot 发送端；套接字始终由各自的任务持有。配对时
/// 后到的一方把自己的连接经 oneshot 交给排队的任务，由后者桥接。
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tracing::info;

use super::BoxedPublic;

/// 一条已接受的公网请求连接
pub struct PublicConn {
    pub stream: BoxedPublic,
    /// 排队期间预读到的首块数据，配对后最先送入隧道
    pub first_chunk: Option<Vec<u8>>,
}

/// 一条已通过验证的隧道连接
pub struct TunnelConn {
    pub stream: TcpStream,
    /// 排队期间预读到的首块数据，配对后最先送回请求端
    pub first_chunk: Option<Vec<u8>>,
    /// 在线计数的 RAII 守卫，连接的所有路径结束时自动回收
    pub online: TunnelGuard,
}

/// offer_request 的结果
pub enum RequestOffer {
    /// 已与一条空闲隧道配对，连接交由隧道任务桥接
    Paired,
    /// 无空闲隧道，已入队等待
    Queued {
        id: u64,
        rx: oneshot::Receiver<TunnelConn>,
        conn: PublicConn,
    },
}

/// offer_tunnel 的结果
pub enum TunnelOffer {
    /// 已与一条等待中的请求配对，连接交由请求任务桥接
    Paired,
    /// 无等待请求，已入池
    Queued {
        id: u64,
        rx: oneshot::Receiver<PublicConn>,
        conn: TunnelConn,
    },
}

struct Waiter<T> {
    id: u64,
    tx: oneshot::Sender<T>,
}

#[derive(Default)]
struct Queues {
    idle_tunnels: VecDeque<Waiter<PublicConn>>,
    waiting_requests: VecDeque<Waiter<TunnelConn>>,
    next_id: u64,
}

/// 调度器本体
#[derive(Default)]
pub struct Dispatcher {
    queues: Mutex<Queues>,
    online_tunnels: AtomicUsize,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 提交一条新的公网请求：能配对就配对，否则入队
    pub async fn offer_request(&self, mut conn: PublicConn) -> RequestOffer {
        let mut queues = self.queues.lock().await;

        // 队首隧道的任务可能已经退出（接收端被丢弃），跳过继续取
        while let Some(waiter) = queues.idle_tunnels.pop_front() {
            match waiter.tx.send(conn) {
                Ok(()) => return RequestOffer::Paired,
                Err(returned) => conn = returned,
            }
        }

        let (tx, rx) = oneshot::channel();
        let id = queues.next_id;
        queues.next_id += 1;
        queues.waiting_requests.push_back(Waiter { id, tx });
        RequestOffer::Queued { id, rx, conn }
    }

    /// 提交一条新验证的隧道：能配对就配对，否则入池
    pub async fn offer_tunnel(&self, mut conn: TunnelConn) -> TunnelOffer {
        let mut queues = self.queues.lock().await;

        while let Some(waiter) = queues.waiting_requests.pop_front() {
            match waiter.tx.send(conn) {
                Ok(()) => return TunnelOffer::Paired,
                Err(returned) => conn = returned,
            }
        }

        let (tx, rx) = oneshot::channel();
        let id = queues.next_id;
        queues.next_id += 1;
        queues.idle_tunnels.push_back(Waiter { id, tx });
        TunnelOffer::Queued { id, rx, conn }
    }

    /// 把一条等待中的请求移出队列；不在队列里也没关系
    pub async fn retire_request(&self, id: u64) {
        let mut queues = self.queues.lock().await;
        queues.waiting_requests.retain(|w| w.id != id);
    }

    /// 把一条空闲隧道移出池；不在池里也没关系
    pub async fn retire_tunnel(&self, id: u64) {
        let mut queues = self.queues.lock().await;
        queues.idle_tunnels.retain(|w| w.id != id);
    }

    /// 一条隧道通过验证后登记在线，返回负责注销的守卫
    pub fn online_guard(self: &Arc<Self>) -> TunnelGuard {
        if self.online_tunnels.fetch_add(1, Ordering::SeqCst) == 0 {
            info!("app connected");
        }
        TunnelGuard {
            dispatcher: Arc::clone(self),
        }
    }

    fn tunnel_offline(&self) {
        if self.online_tunnels.fetch_sub(1, Ordering::SeqCst) == 1 {
            info!("app disconnected");
        }
    }

    #[cfg(test)]
    pub async fn queue_lens(&self) -> (usize, usize) {
        let queues = self.queues.lock().await;
        (queues.idle_tunnels.len(), queues.waiting_requests.len())
    }
}

/// 隧道在线计数守卫
pub struct TunnelGuard {
    dispatcher: Arc<Dispatcher>,
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        self.dispatcher.tunnel_offline();
    }
}

impl std::fmt::Debug for TunnelGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelGuard").finish()
    }
}
