// 配置管理模块 - 使用模块化设计

mod builder;
mod validator;

pub use builder::TunnelConfigBuilder;
pub use validator::ConfigValidator;

use crate::backoff::ReconnectPolicy;
use crate::error::{Result, TunnelError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "LOCAL_TUNNEL_";

/// 默认 broker 地址
pub const DEFAULT_BROKER_URL: &str = "http://localtunnel.me/";
/// 默认本地服务端口
pub const DEFAULT_LOCAL_PORT: u16 = 8000;
/// 单次读取的块大小
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// 隧道客户端配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Broker 基础地址，中继连接拨号到该地址的主机
    pub broker_url: String,
    /// 请求的子域名，None 表示由 broker 分配
    pub domain: Option<String>,
    /// 本地服务主机
    pub local_host: String,
    /// 本地服务端口
    pub local_port: u16,
    /// 每次读取的最大字节数
    pub chunk_size: usize,
    /// 建立 TCP 连接的超时（毫秒）
    pub connect_timeout_ms: u64,
    /// 分配请求的超时（毫秒）
    pub request_timeout_ms: u64,
    /// TCP keepalive 首次探测时间（秒），None 表示不设置
    pub keepalive_secs: Option<u64>,
    /// 中继连接数上限，None 表示使用 broker 给出的 max_conn_count
    pub max_connections: Option<usize>,
    /// 重连退避策略
    pub reconnect: ReconnectPolicy,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            domain: None,
            local_host: "localhost".to_string(),
            local_port: DEFAULT_LOCAL_PORT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout_ms: 5_000,
            request_timeout_ms: 10_000,
            keepalive_secs: Some(30),
            max_connections: None,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl TunnelConfig {
    pub fn builder() -> TunnelConfigBuilder {
        TunnelConfigBuilder::new()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn keepalive(&self) -> Option<Duration> {
        self.keepalive_secs.map(Duration::from_secs)
    }

    /// 从 TOML 文件加载配置（`[tunnel]` 表）
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TunnelError::config_error(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// 从 TOML 文本解析配置
    pub fn from_toml(content: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct TunnelConfigWrapper {
            #[serde(default)]
            tunnel: TunnelConfig,
        }

        let wrapper: TunnelConfigWrapper = toml::from_str(content).map_err(|e| {
            TunnelError::config_error(format!("Failed to parse tunnel configuration: {}", e))
        })?;
        wrapper.tunnel.validate()?;
        Ok(wrapper.tunnel)
    }

    /// 使用环境变量覆盖配置项
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| get(&format!("{}{}", ENV_PREFIX, name));

        if let Some(url) = var("BROKER_URL") {
            self.broker_url = url;
        }
        if let Some(domain) = var("DOMAIN") {
            self.domain = Some(domain).filter(|d| !d.is_empty());
        }
        if let Some(host) = var("LOCAL_HOST") {
            self.local_host = host;
        }
        if let Some(ms) = var("CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.connect_timeout_ms = ms;
        }
        if let Some(ms) = var("RECONNECT_INITIAL_MS").and_then(|v| v.parse().ok()) {
            self.reconnect.initial_delay_ms = ms;
        }
        if let Some(ms) = var("RECONNECT_MAX_MS").and_then(|v| v.parse().ok()) {
            self.reconnect.max_delay_ms = ms;
        }
        if let Some(max) = var("MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            self.max_connections = Some(max);
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        ConfigValidator::validate_tunnel_config(self)
    }
}
