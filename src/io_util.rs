/// 套接字桥接与调优
///
/// 一条配对的生命期内，两个方向各跑一个拷贝任务；任一方向先结束
/// 即触发互毁：给另一方向一个约 500ms 的宽限期冲掉残余数据，然后
/// 强制中止，两端套接字一起关闭，避免留下半开连接。
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::{JoinError, JoinHandle};

use crate::crypto::TunnelCipher;

/// 拷贝缓冲区大小
pub const COPY_BUFFER_SIZE: usize = 8192;

/// 互毁宽限期
const DESTROY_GRACE: Duration = Duration::from_millis(500);

/// 长连接 keep-alive 探测间隔
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// 把套接字标记为长连接：开启 TCP keep-alive，约 10s 探测一次
///
/// 隧道在池中可能长时间空闲，必须靠 keep-alive 维持；公网请求
/// 套接字则保留空闲超时，不走这条路径。
pub fn set_long_lived(stream: &TcpStream) -> io::Result<()> {
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(KEEPALIVE_INTERVAL)
        .with_interval(KEEPALIVE_INTERVAL);
    socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

/// 桥接参数，方向约定：a -> b 为正向
#[derive(Debug, Default)]
pub struct BridgeConfig {
    /// 正向（a 读出、写入 b）的流加密
    pub a_to_b: Option<TunnelCipher>,
    /// 反向的流加密
    pub b_to_a: Option<TunnelCipher>,
    /// 配对前已从 a 读出的首块数据，会在正向最先送出
    pub a_first: Option<Vec<u8>>,
    /// 配对前已从 b 读出的首块数据
    pub b_first: Option<Vec<u8>>,
    /// 配对整体的空闲超时；None 表示不限
    pub idle_timeout: Option<Duration>,
}

/// 双向桥接两条字节流，直到任一端结束
///
/// 返回最先结束的方向的结果；空闲超时返回 `TimedOut`。
pub async fn bridge<A, B>(a: A, b: B, config: BridgeConfig) -> io::Result<()>
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let clock = config.idle_timeout.map(|_| Arc::new(ActivityClock::new()));
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);

    let mut forward = tokio::spawn(pump(
        a_read,
        b_write,
        config.a_to_b,
        config.a_first,
        clock.clone(),
    ));
    let mut reverse = tokio::spawn(pump(
        b_read,
        a_write,
        config.b_to_a,
        config.b_first,
        clock.clone(),
    ));

    tokio::select! {
        res = &mut forward => finish(res, &mut reverse).await,
        res = &mut reverse => finish(res, &mut forward).await,
        _ = idle_watch(clock, config.idle_timeout) => {
            forward.abort();
            reverse.abort();
            Err(io::Error::new(io::ErrorKind::TimedOut, "pair idle timeout"))
        }
    }
}

/// 一个方向结束后的互毁收尾
async fn finish(
    first: Result<io::Result<u64>, JoinError>,
    other: &mut JoinHandle<io::Result<u64>>,
) -> io::Result<()> {
    let _ = tokio::time::timeout(DESTROY_GRACE, &mut *other).await;
    other.abort();
    match first {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(e) => Err(io::Error::other(e)),
    }
}

/// 单方向拷贝：可选地套一层流加密，可选地先送出记住的首块数据
async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    mut cipher: Option<TunnelCipher>,
    first: Option<Vec<u8>>,
    clock: Option<Arc<ActivityClock>>,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    let result = async {
        if let Some(mut chunk) = first {
            if let Some(cipher) = cipher.as_mut() {
                cipher.apply(&mut chunk);
            }
            writer.write_all(&chunk).await?;
            total += chunk.len() as u64;
            if let Some(clock) = &clock {
                clock.touch();
            }
        }

        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            if let Some(cipher) = cipher.as_mut() {
                cipher.apply(&mut buf[..n]);
            }
            writer.write_all(&buf[..n]).await?;
            total += n as u64;
            if let Some(clock) = &clock {
                clock.touch();
            }
        }
    }
    .await;

    // 无论成败都把 FIN 传给对端
    let _ = writer.shutdown().await;
    result.map(|_: ()| total)
}

/// 记录配对最近一次活动的时刻，两个拷贝任务共享
struct ActivityClock {
    epoch: Instant,
    last_ms: AtomicU64,
}

impl ActivityClock {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        self.last_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.epoch.elapsed().saturating_sub(last)
    }
}

async fn idle_watch(clock: Option<Arc<ActivityClock>>, limit: Option<Duration>) {
    let (clock, limit) = match (clock, limit) {
        (Some(clock), Some(limit)) => (clock, limit),
        _ => return std::future::pending().await,
    };
    loop {
        let idle = clock.idle_for();
        if idle >= limit {
            return;
        }
        tokio::time::sleep(limit - idle).await;
    }
}
