#![allow(dead_code)]
// Common utilities for integration tests

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::time::timeout;

use nat_tunnel::config::{ClientConfig, ProxyConfig};
use nat_tunnel::EncryptionConfig;

/// Find an available port
pub fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to random port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Generate temporary certificate files for testing
pub fn generate_test_certs() -> (PathBuf, PathBuf) {
    use nat_tunnel::tls::SelfSignedCert;

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    let temp_dir = std::env::temp_dir();
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);
    let unique_id = format!("{}-{}-{}", timestamp, counter, std::process::id());

    let cert_path = temp_dir.join(format!("nat-tunnel-test-cert-{}.pem", unique_id));
    let key_path = temp_dir.join(format!("nat-tunnel-test-key-{}.pem", unique_id));

    SelfSignedCert::generate(&["127.0.0.1".to_string(), "localhost".to_string()])
        .expect("Failed to generate test certificates")
        .write_to(&cert_path, &key_path)
        .expect("Failed to write test certificates");

    (cert_path, key_path)
}

/// Track how many connections an app server has accepted
#[derive(Clone, Default)]
pub struct ConnCounter(Arc<AtomicUsize>);

impl ConnCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Create a simple echo server for testing; returns a counter of accepted connections
pub async fn start_echo_server(port: u16) -> ConnCounter {
    let counter = ConnCounter::default();
    let accepted = counter.clone();

    let listener = TokioTcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .expect("Failed to bind echo server");

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    accepted.0.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 8192];
                        loop {
                            match socket.read(&mut buf).await {
                                Ok(0) => break, // Connection closed
                                Ok(n) => {
                                    if socket.write_all(&buf[..n]).await.is_err() {
                                        break;
                                    }
                                }
                                Err(_) => break,
                            }
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });

    counter
}

/// App server that answers "PING\n" with "PONG\n" and closes on anything else
pub async fn start_ping_pong_server(port: u16) {
    let listener = TokioTcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .expect("Failed to bind ping-pong server");

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 64];
                        loop {
                            match socket.read(&mut buf).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) if &buf[..n] == b"PING\n" => {
                                    if socket.write_all(b"PONG\n").await.is_err() {
                                        break;
                                    }
                                }
                                Ok(_) => break,
                            }
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });
}

/// Send `data` to the proxy's public port and read back `expected_len` bytes
pub async fn round_trip(
    proxy_port: u16,
    data: &[u8],
    expected_len: usize,
    timeout_duration: Duration,
) -> Result<Vec<u8>, String> {
    timeout(timeout_duration, async {
        let mut stream = TcpStream::connect(format!("127.0.0.1:{}", proxy_port))
            .await
            .map_err(|e| format!("Failed to connect to proxy: {}", e))?;
        round_trip_on(&mut stream, data, expected_len).await
    })
    .await
    .map_err(|_| "Timeout waiting for response".to_string())?
}

/// Same as `round_trip` on an already-connected stream (used by the TLS tests)
pub async fn round_trip_on<S>(
    stream: &mut S,
    data: &[u8],
    expected_len: usize,
) -> Result<Vec<u8>, String>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    stream
        .write_all(data)
        .await
        .map_err(|e| format!("Failed to write data: {}", e))?;
    stream
        .flush()
        .await
        .map_err(|e| format!("Failed to flush: {}", e))?;

    let mut response = Vec::new();
    let mut buf = vec![0u8; 8192];
    while response.len() < expected_len {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => response.extend_from_slice(&buf[..n]),
            Err(e) => return Err(format!("Failed to read response: {}", e)),
        }
    }
    Ok(response)
}

/// Wait until a TCP connect to the port succeeds
pub async fn wait_for_port(port: u16, max_attempts: u32) -> bool {
    for _ in 0..max_attempts {
        if TcpStream::connect(format!("127.0.0.1:{}", port))
            .await
            .is_ok()
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

/// Proxy config pointing at loopback with short timeouts for tests
pub fn test_proxy_config(proxy_port: u16, tunnel_port: u16) -> ProxyConfig {
    ProxyConfig::builder()
        .bind_addr("127.0.0.1")
        .proxy_port(proxy_port)
        .tunnel_port(tunnel_port)
        .build()
        .expect("valid test proxy config")
}

/// Client config pointing at loopback with short reconnect delay for tests
pub fn test_client_config(tunnel_port: u16, app_port: u16, pool_size: usize) -> ClientConfig {
    ClientConfig::builder()
        .proxy_host("127.0.0.1")
        .tunnel_port(tunnel_port)
        .app_host("127.0.0.1")
        .app_port(app_port)
        .pool_size(pool_size)
        .reconnect_delay_ms(300)
        .build()
        .expect("valid test client config")
}

/// A matching encryption config for both ends
pub fn test_encryption() -> EncryptionConfig {
    EncryptionConfig {
        cipher: "aes-256-ctr".to_string(),
        key: "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f".to_string(),
        iv: "0f0e0d0c0b0a09080706050403020100".to_string(),
    }
}

/// Cleanup function for test resources
pub struct TestCleanup {
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
}

impl TestCleanup {
    pub fn new(cert_path: PathBuf, key_path: PathBuf) -> Self {
        Self {
            cert_path: Some(cert_path),
            key_path: Some(key_path),
        }
    }
}

impl Drop for TestCleanup {
    fn drop(&mut self) {
        if let Some(cert) = self.cert_path.take() {
            let _ = std::fs::remove_file(cert);
        }
        if let Some(key) = self.key_path.take() {
            let _ = std::fs::remove_file(key);
        }
    }
}
