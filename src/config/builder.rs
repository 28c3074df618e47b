use std::path::PathBuf;

use super::{
    validator::ConfigValidator, ClientConfig, EncryptionConfig, ProxyConfig,
    DEFAULT_CHALLENGE_TIMEOUT_MS, DEFAULT_POOL_SIZE, DEFAULT_RECONNECT_DELAY_MS,
    DEFAULT_REQUEST_TIMEOUT_MS,
};
use crate::error::{Result, TunnelError};

/// ProxyConfig Builder
#[derive(Debug, Default)]
pub struct ProxyConfigBuilder {
    bind_addr: Option<String>,
    proxy_port: Option<u16>,
    tunnel_port: Option<u16>,
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
    encryption: Option<EncryptionConfig>,
    secret: Option<String>,
    challenge_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
}

impl ProxyConfigBuilder {
    /// 创建新的 Builder
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置绑定地址
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = Some(addr.into());
        self
    }

    /// 设置公网端口
    pub fn proxy_port(mut self, port: u16) -> Self {
        self.proxy_port = Some(port);
        self
    }

    /// 设置隧道端口
    pub fn tunnel_port(mut self, port: u16) -> Self {
        self.tunnel_port = Some(port);
        self
    }

    /// 设置证书路径
    pub fn cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cert_path = Some(path.into());
        self
    }

    /// 设置私钥路径
    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    /// 设置隧道流加密
    pub fn encryption(mut self, encryption: EncryptionConfig) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// 设置隧道接入口令
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// 设置挑战应答超时（毫秒）
    pub fn challenge_timeout_ms(mut self, ms: u64) -> Self {
        self.challenge_timeout_ms = Some(ms);
        self
    }

    /// 设置公网请求空闲超时（毫秒）
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = Some(ms);
        self
    }

    /// 构建 ProxyConfig 并验证
    pub fn build(self) -> Result<ProxyConfig> {
        let config = ProxyConfig {
            bind_addr: self.bind_addr.unwrap_or_else(super::default_bind_addr),
            proxy_port: self
                .proxy_port
                .ok_or_else(|| TunnelError::config_error("proxy_port is required"))?,
            tunnel_port: self
                .tunnel_port
                .ok_or_else(|| TunnelError::config_error("tunnel_port is required"))?,
            cert_path: self.cert_path,
            key_path: self.key_path,
            encryption: self.encryption,
            secret: self.secret,
            challenge_timeout_ms: self
                .challenge_timeout_ms
                .unwrap_or(DEFAULT_CHALLENGE_TIMEOUT_MS),
            request_timeout_ms: self.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
        };

        // 验证配置
        ConfigValidator::validate_proxy_config(&config)?;

        Ok(config)
    }
}

/// ClientConfig Builder
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    proxy_host: Option<String>,
    tunnel_port: Option<u16>,
    app_host: Option<String>,
    app_port: Option<u16>,
    encryption: Option<EncryptionConfig>,
    secret: Option<String>,
    challenge_timeout_ms: Option<u64>,
    pool_size: Option<usize>,
    reconnect_delay_ms: Option<u64>,
}

impl ClientConfigBuilder {
    /// 创建新的 Builder
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置代理主机
    pub fn proxy_host(mut self, host: impl Into<String>) -> Self {
        self.proxy_host = Some(host.into());
        self
    }

    /// 设置隧道端口
    pub fn tunnel_port(mut self, port: u16) -> Self {
        self.tunnel_port = Some(port);
        self
    }

    /// 设置本地应用地址
    pub fn app_host(mut self, host: impl Into<String>) -> Self {
        self.app_host = Some(host.into());
        self
    }

    /// 设置本地应用端口
    pub fn app_port(mut self, port: u16) -> Self {
        self.app_port = Some(port);
        self
    }

    /// 设置隧道流加密
    pub fn encryption(mut self, encryption: EncryptionConfig) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// 设置隧道接入口令
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// 设置挑战应答超时（毫秒）
    pub fn challenge_timeout_ms(mut self, ms: u64) -> Self {
        self.challenge_timeout_ms = Some(ms);
        self
    }

    /// 设置隧道池大小
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    /// 设置重连间隔（毫秒）
    pub fn reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.reconnect_delay_ms = Some(ms);
        self
    }

    /// 构建 ClientConfig 并验证
    pub fn build(self) -> Result<ClientConfig> {
        let config = ClientConfig {
            proxy_host: self
                .proxy_host
                .ok_or_else(|| TunnelError::config_error("proxy_host is required"))?,
            tunnel_port: self
                .tunnel_port
                .ok_or_else(|| TunnelError::config_error("tunnel_port is required"))?,
            app_host: self.app_host.unwrap_or_else(super::default_app_host),
            app_port: self
                .app_port
                .ok_or_else(|| TunnelError::config_error("app_port is required"))?,
            encryption: self.encryption,
            secret: self.secret,
            challenge_timeout_ms: self
                .challenge_timeout_ms
                .unwrap_or(DEFAULT_CHALLENGE_TIMEOUT_MS),
            pool_size: self.pool_size.unwrap_or(DEFAULT_POOL_SIZE),
            reconnect_delay_ms: self.reconnect_delay_ms.unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
        };

        // 验证配置
        ConfigValidator::validate_client_config(&config)?;

        Ok(config)
    }
}
