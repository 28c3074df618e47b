// 配置管理模块 - 使用模块化设计

mod builder;
mod validator;

// 重新导出 builder 和 validator
pub use builder::{ClientConfigBuilder, ProxyConfigBuilder};
pub use validator::ConfigValidator;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::crypto::{CipherKind, CipherSpec, DEFAULT_CIPHER};
use crate::error::{Result, TunnelError};

/// 挑战应答默认超时（毫秒）
pub const DEFAULT_CHALLENGE_TIMEOUT_MS: u64 = 4000;
/// 公网请求默认空闲超时（毫秒）
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;
/// 客户端隧道池默认大小
pub const DEFAULT_POOL_SIZE: usize = 20;
/// 客户端全断后的默认重连间隔（毫秒）
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_app_host() -> String {
    "localhost".to_string()
}

fn default_cipher_name() -> String {
    DEFAULT_CIPHER.to_string()
}

fn default_challenge_timeout() -> u64 {
    DEFAULT_CHALLENGE_TIMEOUT_MS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

fn default_reconnect_delay() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

/// 隧道流加密配置，两端必须完全一致
///
/// key/iv 以 hex 编码书写，长度由所选算法决定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// 算法名（aes-128-ctr / aes-192-ctr / aes-256-ctr）
    #[serde(default = "default_cipher_name")]
    pub cipher: String,
    /// 密钥，hex 编码
    #[serde(default)]
    pub key: String,
    /// 初始向量，hex 编码
    #[serde(default)]
    pub iv: String,
}

impl EncryptionConfig {
    /// 三项齐备才算启用
    pub fn is_active(&self) -> bool {
        !self.cipher.is_empty() && !self.key.is_empty() && !self.iv.is_empty()
    }

    /// 解析为可实例化的加密参数
    pub fn to_spec(&self) -> Result<CipherSpec> {
        let kind = CipherKind::from_name(&self.cipher)?;
        let key = hex::decode(&self.key)
            .map_err(|e| TunnelError::config_error(format!("encryption key is not valid hex: {}", e)))?;
        let iv = hex::decode(&self.iv)
            .map_err(|e| TunnelError::config_error(format!("encryption iv is not valid hex: {}", e)))?;
        CipherSpec::new(kind, key, iv)
    }
}

/// 代理端（公网侧）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// 监听绑定地址
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// 公网流量端口
    pub proxy_port: u16,
    /// 反向隧道端口，必须不同于 proxy_port
    pub tunnel_port: u16,
    /// TLS 证书路径（与 key_path 同时设置才启用 TLS）
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    /// TLS 私钥路径
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// 隧道流加密（可选，需与客户端一致）
    #[serde(default)]
    pub encryption: Option<EncryptionConfig>,
    /// 隧道接入口令（可选，需与客户端一致）
    #[serde(default)]
    pub secret: Option<String>,
    /// 挑战应答超时（毫秒）
    #[serde(default = "default_challenge_timeout")]
    pub challenge_timeout_ms: u64,
    /// 公网请求空闲超时（毫秒），0 表示不限
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl ProxyConfig {
    /// 创建 Builder
    pub fn builder() -> ProxyConfigBuilder {
        ProxyConfigBuilder::new()
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        ConfigValidator::validate_proxy_config(self)
    }

    /// 是否启用公网侧 TLS
    pub fn tls_enabled(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }

    /// 生效的加密参数；未启用时为 None
    pub fn cipher_spec(&self) -> Result<Option<CipherSpec>> {
        cipher_spec_of(&self.encryption)
    }

    pub fn challenge_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.challenge_timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<std::time::Duration> {
        match self.request_timeout_ms {
            0 => None,
            ms => Some(std::time::Duration::from_millis(ms)),
        }
    }
}

/// 客户端（内网侧）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// 代理主机地址
    pub proxy_host: String,
    /// 代理的反向隧道端口
    pub tunnel_port: u16,
    /// 本地应用地址
    #[serde(default = "default_app_host")]
    pub app_host: String,
    /// 本地应用端口
    pub app_port: u16,
    /// 隧道流加密（需与代理端一致）
    #[serde(default)]
    pub encryption: Option<EncryptionConfig>,
    /// 隧道接入口令（需与代理端一致）
    #[serde(default)]
    pub secret: Option<String>,
    /// 挑战应答超时（毫秒）
    #[serde(default = "default_challenge_timeout")]
    pub challenge_timeout_ms: u64,
    /// 并发隧道数
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// 全断后的重连间隔（毫秒）
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
}

impl ClientConfig {
    /// 创建 Builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        ConfigValidator::validate_client_config(self)
    }

    /// 生效的加密参数；未启用时为 None
    pub fn cipher_spec(&self) -> Result<Option<CipherSpec>> {
        cipher_spec_of(&self.encryption)
    }

    pub fn challenge_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.challenge_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reconnect_delay_ms)
    }
}

fn cipher_spec_of(encryption: &Option<EncryptionConfig>) -> Result<Option<CipherSpec>> {
    match encryption {
        Some(enc) if enc.is_active() => Ok(Some(enc.to_spec()?)),
        _ => Ok(None),
    }
}

/// 应用配置：一个配置文件要么是代理端、要么是客户端
#[derive(Debug, Clone)]
pub enum AppConfig {
    Proxy(ProxyConfig),
    Client(ClientConfig),
}

impl AppConfig {
    /// 从文件加载配置，按顶层表（[proxy] / [client]）判断类型并验证
    pub fn load(path: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct ConfigFile {
            proxy: Option<ProxyConfig>,
            client: Option<ClientConfig>,
        }

        let content = std::fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&content)
            .map_err(|e| TunnelError::config_error(format!("failed to parse {}: {}", path, e)))?;

        match (file.proxy, file.client) {
            (Some(proxy), None) => {
                proxy.validate()?;
                Ok(AppConfig::Proxy(proxy))
            }
            (None, Some(client)) => {
                client.validate()?;
                Ok(AppConfig::Client(client))
            }
            (Some(_), Some(_)) => Err(TunnelError::config_error(format!(
                "{} defines both [proxy] and [client]; pick one",
                path
            ))),
            (None, None) => Err(TunnelError::config_error(format!(
                "{} defines neither a [proxy] nor a [client] table",
                path
            ))),
        }
    }

    /// 从文件加载代理端配置
    pub fn load_proxy_config(path: &str) -> Result<ProxyConfig> {
        match Self::load(path)? {
            AppConfig::Proxy(config) => Ok(config),
            AppConfig::Client(_) => Err(TunnelError::config_error(format!(
                "{} is a client configuration, expected [proxy]",
                path
            ))),
        }
    }

    /// 从文件加载客户端配置
    pub fn load_client_config(path: &str) -> Result<ClientConfig> {
        match Self::load(path)? {
            AppConfig::Client(config) => Ok(config),
            AppConfig::Proxy(_) => Err(TunnelError::config_error(format!(
                "{} is a proxy configuration, expected [client]",
                path
            ))),
        }
    }
}
