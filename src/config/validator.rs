use super::{ClientConfig, EncryptionConfig, ProxyConfig};
use crate::error::{Result, TunnelError};

/// 配置验证器 - 负责所有配置验证逻辑
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证端口号
    pub fn validate_port(port: u16, context: &str) -> Result<()> {
        if port == 0 {
            return Err(TunnelError::config_error(format!(
                "{}: port cannot be 0",
                context
            )));
        }
        Ok(())
    }

    /// 验证地址不为空
    pub fn validate_address(addr: &str, context: &str) -> Result<()> {
        if addr.trim().is_empty() {
            return Err(TunnelError::config_error(format!(
                "{}: address cannot be empty",
                context
            )));
        }
        Ok(())
    }

    /// 验证隧道接入口令（如果设置了）
    pub fn validate_secret(secret: &Option<String>) -> Result<()> {
        if let Some(secret) = secret {
            if secret.is_empty() {
                return Err(TunnelError::config_error(
                    "secret cannot be empty; omit it to disable the challenge",
                ));
            }
        }
        Ok(())
    }

    /// 验证加密配置
    ///
    /// key 与 iv 要么都省略（不启用），要么都给出且能通过算法的长度检查；
    /// 只填一半必然是配置写错了，直接报错而不是静默不加密
    pub fn validate_encryption(encryption: &Option<EncryptionConfig>) -> Result<()> {
        let Some(enc) = encryption else {
            return Ok(());
        };

        if enc.key.is_empty() && enc.iv.is_empty() {
            return Ok(());
        }
        if enc.key.is_empty() || enc.iv.is_empty() {
            return Err(TunnelError::config_error(
                "encryption key and iv must both be set, or both omitted to disable encryption",
            ));
        }

        enc.to_spec().map(|_| ())
    }

    /// 验证代理端配置
    pub fn validate_proxy_config(config: &ProxyConfig) -> Result<()> {
        // 验证绑定地址
        Self::validate_address(&config.bind_addr, "Proxy bind_addr")?;

        // 验证端口
        Self::validate_port(config.proxy_port, "Proxy proxy_port")?;
        Self::validate_port(config.tunnel_port, "Proxy tunnel_port")?;

        // 公网端口和隧道端口不能相同
        if config.proxy_port == config.tunnel_port {
            return Err(TunnelError::config_error(format!(
                "proxy_port and tunnel_port must differ (both are {})",
                config.proxy_port
            )));
        }

        // 验证证书配置
        match (&config.cert_path, &config.key_path) {
            (Some(_), Some(_)) | (None, None) => {}
            _ => {
                return Err(TunnelError::config_error(
                    "cert_path and key_path must both be set, or both omitted for plain TCP",
                ))
            }
        }

        // 验证口令与加密配置
        Self::validate_secret(&config.secret)?;
        Self::validate_encryption(&config.encryption)?;

        if config.challenge_timeout_ms == 0 {
            return Err(TunnelError::config_error(
                "challenge_timeout_ms must be greater than 0",
            ));
        }

        Ok(())
    }

    /// 验证客户端配置
    pub fn validate_client_config(config: &ClientConfig) -> Result<()> {
        // 验证地址
        Self::validate_address(&config.proxy_host, "Client proxy_host")?;
        Self::validate_address(&config.app_host, "Client app_host")?;

        // 验证端口
        Self::validate_port(config.tunnel_port, "Client tunnel_port")?;
        Self::validate_port(config.app_port, "Client app_port")?;

        // 验证口令与加密配置
        Self::validate_secret(&config.secret)?;
        Self::validate_encryption(&config.encryption)?;

        if config.pool_size == 0 {
            return Err(TunnelError::config_error(
                "pool_size must be at least 1",
            ));
        }
        if config.challenge_timeout_ms == 0 {
            return Err(TunnelError::config_error(
                "challenge_timeout_ms must be greater than 0",
            ));
        }
        if config.reconnect_delay_ms == 0 {
            return Err(TunnelError::config_error(
                "reconnect_delay_ms must be greater than 0",
            ));
        }

        Ok(())
    }
}
