/// 公网侧 TLS 材料
///
/// 隧道本身始终走明文 TCP（可选流加密），TLS 只出现在公网监听器上。
/// 证书与私钥按 PEM 读入并在构造时完成解析，任何解析失败都按配置
/// 错误上报，和加密参数（CipherSpec）的校验时机保持一致。
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::rustls;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::WebPkiSupportedAlgorithms;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use tokio_rustls::rustls::{DigitallySignedStruct, SignatureScheme};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::{Result, TunnelError};

/// 公网监听器的证书身份
#[derive(Debug)]
pub struct TlsIdentity {
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl TlsIdentity {
    /// 从 PEM 文件对读入证书链与私钥
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let certs = read_cert_chain(cert_path)?;
        if certs.is_empty() {
            return Err(TunnelError::config_error(format!(
                "no certificates found in {}",
                cert_path.display()
            )));
        }
        let key = read_private_key(key_path)?;
        Ok(Self { certs, key })
    }

    /// 实例化公网监听器的 TLS 接受端
    pub fn into_acceptor(self) -> Result<TlsAcceptor> {
        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(self.certs, self.key)
            .map_err(|e| {
                TunnelError::config_error(format!("certificate rejected by TLS stack: {}", e))
            })?;
        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

/// 构造公网侧的 TLS 客户端连接器
///
/// 以公网客户端身份访问 TLS 监听器时使用。ca_path 指定额外信任的
/// 根证书，否则用系统根；trust_any 完全跳过证书校验，只应出现在测试里。
pub fn client_connector(ca_path: Option<&Path>, trust_any: bool) -> Result<TlsConnector> {
    let mut roots = rustls::RootCertStore::empty();
    if let Some(path) = ca_path {
        let (added, _) = roots.add_parsable_certificates(read_cert_chain(path)?);
        if added == 0 {
            return Err(TunnelError::config_error(format!(
                "no usable CA certificates in {}",
                path.display()
            )));
        }
    } else if !trust_any {
        let loaded = rustls_native_certs::load_native_certs();
        let _ = roots.add_parsable_certificates(loaded.certs);
    }

    let mut config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    if trust_any {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(TrustAnyCert::new()));
    }
    Ok(TlsConnector::from(Arc::new(config)))
}

/// 自签名证书，生成后以 PEM 形式持有
pub struct SelfSignedCert {
    pub cert_pem: String,
    pub key_pem: String,
}

impl SelfSignedCert {
    /// 为一组主机名生成自签名证书；列表为空时退回 localhost
    pub fn generate(hostnames: &[String]) -> Result<Self> {
        let names: Vec<String> = if hostnames.is_empty() {
            vec!["localhost".to_string()]
        } else {
            hostnames.to_vec()
        };

        let issued = rcgen::generate_simple_self_signed(names).map_err(|e| {
            TunnelError::config_error(format!("certificate generation failed: {}", e))
        })?;

        Ok(Self {
            cert_pem: issued.cert.pem(),
            key_pem: issued.signing_key.serialize_pem(),
        })
    }

    /// 写入 PEM 文件对
    pub fn write_to(&self, cert_out: &Path, key_out: &Path) -> Result<()> {
        std::fs::write(cert_out, &self.cert_pem)?;
        std::fs::write(key_out, &self.key_pem)?;
        Ok(())
    }
}

fn read_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = std::fs::read(path)
        .map_err(|e| TunnelError::config_error(format!("cannot read {}: {}", path.display(), e)))?;
    rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| {
            TunnelError::config_error(format!("bad certificate in {}: {}", path.display(), e))
        })
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem = std::fs::read(path)
        .map_err(|e| TunnelError::config_error(format!("cannot read {}: {}", path.display(), e)))?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| {
            TunnelError::config_error(format!("bad private key in {}: {}", path.display(), e))
        })?
        .ok_or_else(|| {
            TunnelError::config_error(format!("no private key found in {}", path.display()))
        })
}

/// 接受任何服务器证书的校验器（仅用于测试）
///
/// 证书一律放行，签名方案沿用默认 crypto provider 支持的集合
#[derive(Debug)]
struct TrustAnyCert(WebPkiSupportedAlgorithms);

impl TrustAnyCert {
    fn new() -> Self {
        Self(rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms)
    }
}

impl ServerCertVerifier for TrustAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.supported_schemes()
    }
}
