use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "nat-tunnel")]
#[command(author, version, about = "Expose a private TCP service through reverse tunnels", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 运行公网侧代理
    Proxy {
        /// 配置文件路径
        #[arg(short, long, default_value = "proxy.toml")]
        config: String,
    },
    /// 运行内网侧客户端
    Client {
        /// 配置文件路径
        #[arg(short, long, default_value = "client.toml")]
        config: String,
    },
    /// 检查配置文件格式是否正确
    Check {
        /// 配置文件路径
        #[arg(short, long)]
        config: String,
    },
    /// 生成自签名 TLS 证书
    Cert {
        /// 证书输出路径
        #[arg(long, default_value = "cert.pem")]
        cert_out: String,

        /// 私钥输出路径
        #[arg(long, default_value = "key.pem")]
        key_out: String,

        /// 证书通用名
        #[arg(long, default_value = "localhost")]
        common_name: String,

        /// 备用名列表（SAN）
        #[arg(long)]
        alt_names: Vec<String>,
    },
}
