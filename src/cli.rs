use crate::config::TunnelConfig;
use crate::error::Result;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "local-tunnel")]
#[command(author, version, about = "Expose a local TCP port through a localtunnel broker", long_about = None)]
pub struct Cli {
    /// 输出调试日志（-v debug，-vv trace）
    #[arg(short, action = ArgAction::Count)]
    pub verbose: u8,

    /// 请求指定的子域名（默认由 broker 生成）
    #[arg(short, long)]
    pub domain: Option<String>,

    /// Broker 地址
    #[arg(short, long, value_name = "URL")]
    pub broker: Option<String>,

    /// 配置文件路径（TOML）
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// 本地服务端口（默认 8000）
    #[arg(value_name = "PORT")]
    pub port: Option<u16>,
}

impl Cli {
    /// 根据 -v 次数选择日志级别
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    }

    /// 合并配置文件、环境变量和命令行参数，命令行优先
    pub fn to_config(&self) -> Result<TunnelConfig> {
        let mut config = match &self.config {
            Some(path) => TunnelConfig::from_file(path)?,
            None => TunnelConfig::default(),
        };
        config.apply_env();

        if let Some(ref domain) = self.domain {
            config.domain = Some(domain.clone());
        }
        if let Some(ref broker) = self.broker {
            config.broker_url = broker.clone();
        }
        if let Some(port) = self.port {
            config.local_port = port;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["local-tunnel"]).unwrap();
        assert_eq!(cli.verbose, 0);
        assert!(cli.port.is_none());
        assert_eq!(cli.log_filter(), "warn");
    }

    #[test]
    fn test_verbose_and_port() {
        let cli = Cli::try_parse_from(["local-tunnel", "-v", "3000"]).unwrap();
        assert_eq!(cli.verbose, 1);
        assert_eq!(cli.port, Some(3000));
        assert_eq!(cli.log_filter(), "debug");

        let cli = Cli::try_parse_from(["local-tunnel", "-vv"]).unwrap();
        assert_eq!(cli.log_filter(), "trace");
    }

    #[test]
    fn test_usage_errors() {
        assert!(Cli::try_parse_from(["local-tunnel", "-x"]).is_err());
        assert!(Cli::try_parse_from(["local-tunnel", "eighty"]).is_err());
        assert!(Cli::try_parse_from(["local-tunnel", "70000"]).is_err());
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::try_parse_from([
            "local-tunnel",
            "--domain",
            "alice",
            "--broker",
            "http://127.0.0.1:9000/",
            "3000",
        ])
        .unwrap();

        let config = cli.to_config().unwrap();
        assert_eq!(config.domain.as_deref(), Some("alice"));
        assert_eq!(config.broker_url, "http://127.0.0.1:9000/");
        assert_eq!(config.local_port, 3000);
    }

    #[test]
    fn test_invalid_domain_is_config_error() {
        let cli = Cli::try_parse_from(["local-tunnel", "-d", "bad_domain"]).unwrap();
        assert!(cli.to_config().unwrap_err().is_config_error());
    }
}
