use crate::backoff::ReconnectPolicy;
use crate::error::Result;

use super::TunnelConfig;

/// TunnelConfig Builder
#[derive(Debug, Default)]
pub struct TunnelConfigBuilder {
    broker_url: Option<String>,
    domain: Option<String>,
    local_host: Option<String>,
    local_port: Option<u16>,
    chunk_size: Option<usize>,
    connect_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    keepalive_secs: Option<Option<u64>>,
    max_connections: Option<usize>,
    reconnect: Option<ReconnectPolicy>,
}

impl TunnelConfigBuilder {
    /// 创建新的 Builder
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置 broker 地址
    pub fn broker_url(mut self, url: impl Into<String>) -> Self {
        self.broker_url = Some(url.into());
        self
    }

    /// 设置请求的子域名
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// 设置本地服务主机
    pub fn local_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = Some(host.into());
        self
    }

    /// 设置本地服务端口
    pub fn local_port(mut self, port: u16) -> Self {
        self.local_port = Some(port);
        self
    }

    /// 设置读取块大小
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    /// 设置连接超时（毫秒）
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = Some(ms);
        self
    }

    /// 设置分配请求超时（毫秒）
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = Some(ms);
        self
    }

    /// 设置 keepalive（秒），None 表示关闭
    pub fn keepalive_secs(mut self, secs: Option<u64>) -> Self {
        self.keepalive_secs = Some(secs);
        self
    }

    /// 设置中继连接数上限
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// 设置重连策略
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    /// 构建并验证配置
    pub fn build(self) -> Result<TunnelConfig> {
        let defaults = TunnelConfig::default();
        let config = TunnelConfig {
            broker_url: self.broker_url.unwrap_or(defaults.broker_url),
            domain: self.domain.or(defaults.domain),
            local_host: self.local_host.unwrap_or(defaults.local_host),
            local_port: self.local_port.unwrap_or(defaults.local_port),
            chunk_size: self.chunk_size.unwrap_or(defaults.chunk_size),
            connect_timeout_ms: self
                .connect_timeout_ms
                .unwrap_or(defaults.connect_timeout_ms),
            request_timeout_ms: self
                .request_timeout_ms
                .unwrap_or(defaults.request_timeout_ms),
            keepalive_secs: self.keepalive_secs.unwrap_or(defaults.keepalive_secs),
            max_connections: self.max_connections.or(defaults.max_connections),
            reconnect: self.reconnect.unwrap_or(defaults.reconnect),
        };

        config.validate()?;
        Ok(config)
    }
}
