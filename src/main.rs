use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use tracing::info;

use nat_tunnel::cli::{Cli, Commands};
use nat_tunnel::config::AppConfig;
use nat_tunnel::{client, server, tls};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_level.as_str())
        .with_target(false)
        .init();

    info!("nat-tunnel v{}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Proxy { config } => {
            info!("Loading proxy configuration from: {}", config);
            let proxy_config = AppConfig::load_proxy_config(config)?;

            let handle = server::start_proxy(proxy_config).await?;
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            info!("Received shutdown signal, stopping proxy...");
            handle.shutdown();
        }
        Commands::Client { config } => {
            info!("Loading client configuration from: {}", config);
            let client_config = AppConfig::load_client_config(config)?;

            let handle = client::start_client(client_config).await?;
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            info!("Received shutdown signal, stopping client...");
            handle.shutdown();
        }
        Commands::Check { config } => {
            check_config(config)?;
        }
        Commands::Cert {
            cert_out,
            key_out,
            common_name,
            alt_names,
        } => {
            let mut names = alt_names.clone();
            if !names.contains(common_name) {
                names.push(common_name.clone());
            }
            tls::SelfSignedCert::generate(&names)?
                .write_to(Path::new(cert_out), Path::new(key_out))?;
            println!("Generated self-signed certificate: {}", cert_out);
            println!("Generated private key: {}", key_out);
        }
    }

    Ok(())
}

/// 检查配置文件：按顶层表识别类型，打印解析结果
fn check_config(config_path: &str) -> Result<()> {
    if !Path::new(config_path).exists() {
        anyhow::bail!("Configuration file not found: {}", config_path);
    }

    println!("Checking configuration file: {}\n", config_path);

    match AppConfig::load(config_path) {
        Ok(AppConfig::Proxy(proxy_config)) => {
            println!("✓ Configuration type: Proxy");
            println!("✓ Bind address: {}", proxy_config.bind_addr);
            println!("✓ Public port: {}", proxy_config.proxy_port);
            println!("✓ Tunnel port: {}", proxy_config.tunnel_port);
            println!(
                "✓ TLS: {}",
                if proxy_config.tls_enabled() {
                    "enabled"
                } else {
                    "disabled (plain TCP)"
                }
            );
            println!(
                "✓ Secret: {}",
                if proxy_config.secret.is_some() {
                    "configured"
                } else {
                    "not configured"
                }
            );
            println!(
                "✓ Encryption: {}",
                match proxy_config.cipher_spec()? {
                    Some(spec) => spec.kind().name(),
                    None => "disabled",
                }
            );

            println!("\n✓ Proxy configuration is valid!");
            Ok(())
        }
        Ok(AppConfig::Client(client_config)) => {
            println!("✓ Configuration type: Client");
            println!("✓ Proxy host: {}", client_config.proxy_host);
            println!("✓ Tunnel port: {}", client_config.tunnel_port);
            println!(
                "✓ Local app: {}:{}",
                client_config.app_host, client_config.app_port
            );
            println!("✓ Pool size: {}", client_config.pool_size);
            println!(
                "✓ Secret: {}",
                if client_config.secret.is_some() {
                    "configured"
                } else {
                    "not configured"
                }
            );
            println!(
                "✓ Encryption: {}",
                match client_config.cipher_spec()? {
                    Some(spec) => spec.kind().name(),
                    None => "disabled",
                }
            );

            println!("\n✓ Client configuration is valid!");
            Ok(())
        }
        Err(e) => {
            println!("✗ Configuration validation failed!");
            println!("\nError details:");
            println!("{:#}", anyhow::Error::from(e));

            println!("\nCommon issues:");
            println!("  1. Check TOML syntax (brackets, quotes, commas)");
            println!("  2. Ensure all required fields are present");
            println!("  3. For proxy config: [proxy] table with proxy_port and tunnel_port (they must differ)");
            println!("  4. For client config: [client] table with proxy_host, tunnel_port and app_port");
            println!("  5. Encryption key/iv must be hex and match the cipher's lengths");

            anyhow::bail!("invalid configuration file")
        }
    }
}
