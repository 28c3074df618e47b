/// 隧道挑战应答协议
///
/// 配置了 secret 时，每条新隧道在承载任何数据之前先完成一次
/// 挑战应答：客户端连上后立即写入 secret 原文，代理端读取等长
/// 字节并回写一个状态字节。状态字节是线上格式的一部分，取值固定。
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Result, TunnelError};

/// 挑战应答状态字节
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChallengeStatus {
    /// 超时或流提前结束，未收到完整 secret
    Empty = 0x00,
    /// secret 匹配，隧道可用
    Verified = 0x01,
    /// secret 不匹配
    Incorrect = 0x02,
}

impl ChallengeStatus {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Empty),
            0x01 => Some(Self::Verified),
            0x02 => Some(Self::Incorrect),
            _ => None,
        }
    }
}

/// 代理端：校验对端发来的 secret
///
/// 读取恰好 `secret.len()` 个字节，在 `wait` 内未读满按 Empty 处理。
/// 无论结果如何都尽力回写一个状态字节；只有 Verified 返回 Ok。
pub async fn verify_challenge<S>(stream: &mut S, secret: &[u8], wait: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; secret.len()];
    let status = match timeout(wait, stream.read_exact(&mut buf)).await {
        Err(_) => ChallengeStatus::Empty,
        Ok(Err(_)) => ChallengeStatus::Empty,
        Ok(Ok(_)) if buf == secret => ChallengeStatus::Verified,
        Ok(Ok(_)) => ChallengeStatus::Incorrect,
    };

    match status {
        ChallengeStatus::Verified => {
            stream.write_all(&[status.as_byte()]).await?;
            stream.flush().await?;
            debug!("tunnel challenge verified");
            Ok(())
        }
        ChallengeStatus::Empty => {
            stream.write_all(&[status.as_byte()]).await.ok();
            Err(TunnelError::auth_failed("challenge timed out or stream ended"))
        }
        ChallengeStatus::Incorrect => {
            stream.write_all(&[status.as_byte()]).await.ok();
            Err(TunnelError::auth_failed("incorrect secret"))
        }
    }
}

/// 客户端：发送 secret 并等待裁决
///
/// 立即写入 secret，读取一个状态字节；除 Verified 外一律视为被拒绝，
/// 由调用方关闭隧道。
pub async fn answer_challenge<S>(stream: &mut S, secret: &[u8], wait: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(secret).await?;
    stream.flush().await?;

    let mut status = [0u8; 1];
    match timeout(wait, stream.read_exact(&mut status)).await {
        Err(_) => Err(TunnelError::timeout(wait)),
        Ok(Err(e)) => Err(TunnelError::Io(e)),
        Ok(Ok(_)) => match ChallengeStatus::from_byte(status[0]) {
            Some(ChallengeStatus::Verified) => Ok(()),
            Some(other) => Err(TunnelError::auth_failed(format!(
                "tunnel rejected with status {:?}",
                other
            ))),
            None => Err(TunnelError::auth_failed(format!(
                "unknown challenge status byte 0x{:02x}",
                status[0]
            ))),
        },
    }
}
