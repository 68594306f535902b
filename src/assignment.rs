/// 分配握手模块
///
/// 向 broker 请求一个公网地址，返回中继连接池所需的参数
use crate::config::{ConfigValidator, TunnelConfig};
use crate::error::{Result, TunnelError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// 单个连接池允许的最大中继连接数，broker 返回更大的值视为协议错误
pub const MAX_RELAYS: usize = 1024;

/// Broker 分配结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedPool {
    /// Broker 分配的标识
    pub id: String,
    /// 公网访问地址
    pub url: String,
    /// 所有中继连接拨号的 broker 端口
    pub port: u16,
    /// 允许的并行中继连接数
    pub max_conn_count: usize,
    /// 部分 broker 会额外返回缓存地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_url: Option<String>,
}

impl AssignedPool {
    /// 检查 broker 给出的参数是否可用
    pub fn check(&self) -> Result<()> {
        if self.max_conn_count == 0 {
            return Err(TunnelError::protocol("max_conn_count must be positive"));
        }
        if self.max_conn_count > MAX_RELAYS {
            return Err(TunnelError::protocol(format!(
                "max_conn_count {} exceeds the limit of {}",
                self.max_conn_count, MAX_RELAYS
            )));
        }
        if self.port == 0 {
            return Err(TunnelError::protocol("assigned port cannot be 0"));
        }
        Ok(())
    }
}

/// 分配来源
///
/// 连接池通过该 trait 获取分配结果，测试中可以替换为固定值
#[async_trait]
pub trait Assigner: Send + Sync {
    /// 请求分配；domain 为 None 时由 broker 生成子域名
    async fn request_assignment(&self, domain: Option<&str>) -> Result<AssignedPool>;

    /// 中继连接拨号使用的 broker 主机名
    fn broker_host(&self) -> &str;
}

/// 基于 HTTP 的分配客户端
#[derive(Debug, Clone)]
pub struct AssignmentClient {
    http: reqwest::Client,
    base: Url,
    broker_host: String,
}

impl AssignmentClient {
    /// 根据配置创建客户端
    pub fn new(config: &TunnelConfig) -> Result<Self> {
        let mut base = ConfigValidator::validate_broker_url(&config.broker_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let broker_host = base
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .ok_or_else(|| TunnelError::config_error("broker_url has no host"))?;

        let mut builder = reqwest::Client::builder().timeout(config.request_timeout());
        if is_loopback(&base) {
            builder = builder.no_proxy();
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            base,
            broker_host,
        })
    }

    /// 计算分配请求的地址
    pub fn assignment_url(&self, domain: Option<&str>) -> Result<Url> {
        let reference = match domain {
            Some(domain) => {
                ConfigValidator::validate_domain(domain)?;
                domain.to_string()
            }
            None => "?new".to_string(),
        };

        self.base.join(&reference).map_err(|e| {
            TunnelError::config_error(format!("invalid assignment url '{}': {}", reference, e))
        })
    }
}

#[async_trait]
impl Assigner for AssignmentClient {
    async fn request_assignment(&self, domain: Option<&str>) -> Result<AssignedPool> {
        let url = self.assignment_url(domain)?;
        debug!("Requesting assignment from {}", url);

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TunnelError::Broker {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        parse_assignment(&body)
    }

    fn broker_host(&self) -> &str {
        &self.broker_host
    }
}

/// 本机 broker 不经过系统代理
fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// 解析 broker 返回的 JSON
pub fn parse_assignment(body: &[u8]) -> Result<AssignedPool> {
    let pool: AssignedPool = serde_json::from_slice(body)
        .map_err(|e| TunnelError::protocol(format!("malformed assignment response: {}", e)))?;

    pool.check()?;
    Ok(pool)
}
