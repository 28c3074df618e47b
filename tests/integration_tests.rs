/// End-to-end tests driving a real Proxy + Client pair over loopback
mod common;

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::sleep;

use nat_tunnel::{start_client, start_proxy};

#[tokio::test]
async fn test_basic_relay() {
    let proxy_port = common::get_available_port();
    let tunnel_port = common::get_available_port();
    let app_port = common::get_available_port();

    common::start_ping_pong_server(app_port).await;

    let proxy = start_proxy(common::test_proxy_config(proxy_port, tunnel_port))
        .await
        .expect("proxy should start");
    let client = start_client(common::test_client_config(tunnel_port, app_port, 1))
        .await
        .expect("client should start");

    sleep(Duration::from_millis(500)).await;

    let response = common::round_trip(proxy_port, b"PING\n", 5, Duration::from_secs(5))
        .await
        .expect("relay should work");
    assert_eq!(response, b"PONG\n");

    proxy.shutdown();
    client.shutdown();
}

#[tokio::test]
async fn test_relay_with_secret() {
    let proxy_port = common::get_available_port();
    let tunnel_port = common::get_available_port();
    let app_port = common::get_available_port();

    let _counter = common::start_echo_server(app_port).await;

    let mut proxy_config = common::test_proxy_config(proxy_port, tunnel_port);
    proxy_config.secret = Some("hunter2".to_string());
    let mut client_config = common::test_client_config(tunnel_port, app_port, 2);
    client_config.secret = Some("hunter2".to_string());

    let proxy = start_proxy(proxy_config).await.expect("proxy should start");
    let client = start_client(client_config).await.expect("client should start");

    sleep(Duration::from_millis(500)).await;

    let response = common::round_trip(proxy_port, b"authed traffic", 14, Duration::from_secs(5))
        .await
        .expect("relay should work with matching secrets");
    assert_eq!(response, b"authed traffic");

    proxy.shutdown();
    client.shutdown();
}

#[tokio::test]
async fn test_encrypted_relay() {
    let proxy_port = common::get_available_port();
    let tunnel_port = common::get_available_port();
    let app_port = common::get_available_port();

    let _counter = common::start_echo_server(app_port).await;

    let mut proxy_config = common::test_proxy_config(proxy_port, tunnel_port);
    proxy_config.encryption = Some(common::test_encryption());
    let mut client_config = common::test_client_config(tunnel_port, app_port, 2);
    client_config.encryption = Some(common::test_encryption());

    let proxy = start_proxy(proxy_config).await.expect("proxy should start");
    let client = start_client(client_config).await.expect("client should start");

    sleep(Duration::from_millis(500)).await;

    // 两端配置一致时，公网到本地应用必须是字节恒等
    let request = b"GET / HTTP/1.1\r\n\r\n";
    let response = common::round_trip(proxy_port, request, request.len(), Duration::from_secs(5))
        .await
        .expect("encrypted relay should work");
    assert_eq!(response, request);

    proxy.shutdown();
    client.shutdown();
}

#[tokio::test]
async fn test_pool_refill_after_request() {
    let proxy_port = common::get_available_port();
    let tunnel_port = common::get_available_port();
    let app_port = common::get_available_port();

    let counter = common::start_echo_server(app_port).await;

    let proxy = start_proxy(common::test_proxy_config(proxy_port, tunnel_port))
        .await
        .expect("proxy should start");
    let client = start_client(common::test_client_config(tunnel_port, app_port, 3))
        .await
        .expect("client should start");

    sleep(Duration::from_millis(800)).await;
    assert_eq!(counter.get(), 3, "pool should open one app connection per tunnel");

    // 消费一条隧道，客户端应在去抖窗口后补一条新的
    let response = common::round_trip(proxy_port, b"consume", 7, Duration::from_secs(5))
        .await
        .expect("relay should work");
    assert_eq!(response, b"consume");

    sleep(Duration::from_millis(1500)).await;
    assert!(
        counter.get() >= 4,
        "a replacement tunnel should have opened (got {})",
        counter.get()
    );

    // 补齐后的池子仍然可用
    let response = common::round_trip(proxy_port, b"again", 5, Duration::from_secs(5))
        .await
        .expect("relay should still work after refill");
    assert_eq!(response, b"again");

    proxy.shutdown();
    client.shutdown();
}

#[tokio::test]
async fn test_total_outage_recovery() {
    let proxy_port = common::get_available_port();
    let tunnel_port = common::get_available_port();
    let app_port = common::get_available_port();

    let counter = common::start_echo_server(app_port).await;

    let proxy = start_proxy(common::test_proxy_config(proxy_port, tunnel_port))
        .await
        .expect("proxy should start");
    let client = start_client(common::test_client_config(tunnel_port, app_port, 3))
        .await
        .expect("client should start");

    sleep(Duration::from_millis(800)).await;
    let before = counter.get();
    assert_eq!(before, 3);

    // 代理整体消失，客户端应观察到全部隧道关闭
    proxy.shutdown();
    sleep(Duration::from_millis(500)).await;

    // 同端口重启代理，客户端按 reconnect_delay 重连并补满池子
    let proxy = start_proxy(common::test_proxy_config(proxy_port, tunnel_port))
        .await
        .expect("proxy should restart on the same ports");

    sleep(Duration::from_millis(1500)).await;
    assert!(
        counter.get() >= before + 3,
        "client should rebuild the pool after the outage (got {})",
        counter.get()
    );

    let response = common::round_trip(proxy_port, b"recovered", 9, Duration::from_secs(5))
        .await
        .expect("relay should work after recovery");
    assert_eq!(response, b"recovered");

    proxy.shutdown();
    client.shutdown();
}

#[tokio::test]
async fn test_request_timeout_without_tunnels() {
    let proxy_port = common::get_available_port();
    let tunnel_port = common::get_available_port();

    let mut proxy_config = common::test_proxy_config(proxy_port, tunnel_port);
    proxy_config.request_timeout_ms = 200;

    let proxy = start_proxy(proxy_config).await.expect("proxy should start");
    sleep(Duration::from_millis(100)).await;

    // 没有任何客户端隧道：请求静置 200ms 后应被代理关闭
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", proxy_port))
        .await
        .expect("public connect should succeed");

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf)).await;
    match read {
        Ok(Ok(0)) | Ok(Err(_)) => {}
        Ok(Ok(n)) => panic!("unexpected {} bytes from proxy", n),
        Err(_) => panic!("proxy did not close the idle request in time"),
    }

    proxy.shutdown();
}

#[tokio::test]
async fn test_request_queued_before_any_tunnel() {
    let proxy_port = common::get_available_port();
    let tunnel_port = common::get_available_port();
    let app_port = common::get_available_port();

    let _counter = common::start_echo_server(app_port).await;

    let proxy = start_proxy(common::test_proxy_config(proxy_port, tunnel_port))
        .await
        .expect("proxy should start");
    sleep(Duration::from_millis(100)).await;

    // 公网请求先到，带着数据排队
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", proxy_port))
        .await
        .expect("public connect should succeed");
    stream.write_all(b"early bytes").await.unwrap();

    sleep(Duration::from_millis(200)).await;

    // 客户端后到，队首请求应被第一条隧道接走，预读的数据不能丢
    let client = start_client(common::test_client_config(tunnel_port, app_port, 1))
        .await
        .expect("client should start");

    let mut response = vec![0u8; 11];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut response))
        .await
        .expect("queued request should be served")
        .expect("echoed data should arrive");
    assert_eq!(&response, b"early bytes");

    proxy.shutdown();
    client.shutdown();
}

#[tokio::test]
async fn test_idle_tunnels_serve_sequential_requests() {
    let proxy_port = common::get_available_port();
    let tunnel_port = common::get_available_port();
    let app_port = common::get_available_port();

    let _counter = common::start_echo_server(app_port).await;

    let proxy = start_proxy(common::test_proxy_config(proxy_port, tunnel_port))
        .await
        .expect("proxy should start");
    let client = start_client(common::test_client_config(tunnel_port, app_port, 2))
        .await
        .expect("client should start");

    // 隧道先入池等待
    sleep(Duration::from_millis(500)).await;

    for i in 0..3u8 {
        let message = format!("message {}", i);
        let response = common::round_trip(
            proxy_port,
            message.as_bytes(),
            message.len(),
            Duration::from_secs(5),
        )
        .await
        .expect("each request should be served by a pooled tunnel");
        assert_eq!(response, message.as_bytes());
        sleep(Duration::from_millis(600)).await;
    }

    proxy.shutdown();
    client.shutdown();
}

#[tokio::test]
async fn test_multiple_concurrent_connections() {
    let proxy_port = common::get_available_port();
    let tunnel_port = common::get_available_port();
    let app_port = common::get_available_port();

    let _counter = common::start_echo_server(app_port).await;

    let proxy = start_proxy(common::test_proxy_config(proxy_port, tunnel_port))
        .await
        .expect("proxy should start");
    let client = start_client(common::test_client_config(tunnel_port, app_port, 5))
        .await
        .expect("client should start");

    sleep(Duration::from_millis(800)).await;

    let mut handles = vec![];
    for i in 0..10 {
        let message = format!("Message {}", i);
        handles.push(tokio::spawn(async move {
            common::round_trip(
                proxy_port,
                message.as_bytes(),
                message.len(),
                Duration::from_secs(8),
            )
            .await
        }));
    }

    let mut success_count = 0;
    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.expect("task panicked");
        if let Ok(response) = result {
            let expected = format!("Message {}", i);
            if response == expected.as_bytes() {
                success_count += 1;
            }
        }
    }

    assert!(
        success_count >= 8,
        "most connections should succeed: {}/10",
        success_count
    );

    proxy.shutdown();
    client.shutdown();
}

#[tokio::test]
async fn test_large_data_transfer() {
    let proxy_port = common::get_available_port();
    let tunnel_port = common::get_available_port();
    let app_port = common::get_available_port();

    let _counter = common::start_echo_server(app_port).await;

    let proxy = start_proxy(common::test_proxy_config(proxy_port, tunnel_port))
        .await
        .expect("proxy should start");
    let client = start_client(common::test_client_config(tunnel_port, app_port, 2))
        .await
        .expect("client should start");

    sleep(Duration::from_millis(500)).await;

    // Transfer 512KB
    let test_data: Vec<u8> = (0..512 * 1024).map(|i| (i % 256) as u8).collect();
    let response = common::round_trip(
        proxy_port,
        &test_data,
        test_data.len(),
        Duration::from_secs(10),
    )
    .await
    .expect("large transfer should work");

    assert_eq!(response.len(), test_data.len());
    assert_eq!(response, test_data);

    proxy.shutdown();
    client.shutdown();
}

#[tokio::test]
async fn test_tls_public_listener() {
    use tokio_rustls::rustls::pki_types::ServerName;

    let proxy_port = common::get_available_port();
    let tunnel_port = common::get_available_port();
    let app_port = common::get_available_port();

    let (cert_path, key_path) = common::generate_test_certs();
    let _cleanup = common::TestCleanup::new(cert_path.clone(), key_path.clone());

    let _counter = common::start_echo_server(app_port).await;

    let mut proxy_config = common::test_proxy_config(proxy_port, tunnel_port);
    proxy_config.cert_path = Some(cert_path.clone());
    proxy_config.key_path = Some(key_path.clone());

    let proxy = start_proxy(proxy_config).await.expect("proxy should start");
    let client = start_client(common::test_client_config(tunnel_port, app_port, 2))
        .await
        .expect("client should start");

    sleep(Duration::from_millis(500)).await;

    // 公网客户端走 TLS，隧道明文，两段拼起来仍是字节恒等
    let connector = nat_tunnel::tls::client_connector(Some(&cert_path), true)
        .expect("client TLS connector should build");

    let tcp = TcpStream::connect(format!("127.0.0.1:{}", proxy_port))
        .await
        .expect("public connect should succeed");
    let server_name = ServerName::try_from("localhost").expect("valid server name");
    let mut stream = connector
        .connect(server_name, tcp)
        .await
        .expect("TLS handshake should succeed");

    let response = common::round_trip_on(&mut stream, b"over tls", 8)
        .await
        .expect("TLS relay should work");
    assert_eq!(response, b"over tls");

    proxy.shutdown();
    client.shutdown();
}
