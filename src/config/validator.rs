use crate::assignment::MAX_RELAYS;
use crate::error::{Result, TunnelError};

use super::TunnelConfig;

/// 配置验证器 - 负责所有配置验证逻辑
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证子域名：非空，只包含 ASCII 字母数字和 '-'，且不以 '-' 开头或结尾
    pub fn validate_domain(domain: &str) -> Result<()> {
        if domain.is_empty() {
            return Err(TunnelError::config_error("domain cannot be empty"));
        }
        if domain.len() > 63 {
            return Err(TunnelError::config_error(format!(
                "domain '{}' is longer than 63 characters",
                domain
            )));
        }
        if domain.starts_with('-') || domain.ends_with('-') {
            return Err(TunnelError::config_error(format!(
                "domain '{}' cannot start or end with '-'",
                domain
            )));
        }
        if !domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(TunnelError::config_error(format!(
                "domain '{}' may only contain letters, digits and '-'",
                domain
            )));
        }
        Ok(())
    }

    /// 验证 broker 地址可以解析并带有主机名
    pub fn validate_broker_url(broker_url: &str) -> Result<url::Url> {
        let url = url::Url::parse(broker_url).map_err(|e| {
            TunnelError::config_error(format!("invalid broker_url '{}': {}", broker_url, e))
        })?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(TunnelError::config_error(format!(
                    "broker_url scheme must be http or https, got '{}'",
                    other
                )))
            }
        }
        if url.host_str().is_none() {
            return Err(TunnelError::config_error(format!(
                "broker_url '{}' has no host",
                broker_url
            )));
        }
        Ok(url)
    }

    /// 验证隧道配置
    pub fn validate_tunnel_config(config: &TunnelConfig) -> Result<()> {
        Self::validate_broker_url(&config.broker_url)?;

        if let Some(ref domain) = config.domain {
            Self::validate_domain(domain)?;
        }

        if config.local_host.trim().is_empty() {
            return Err(TunnelError::config_error("local_host cannot be empty"));
        }
        if config.local_port == 0 {
            return Err(TunnelError::config_error("local_port cannot be 0"));
        }
        if config.chunk_size == 0 {
            return Err(TunnelError::config_error("chunk_size must be > 0"));
        }
        if let Some(max) = config.max_connections {
            if max == 0 || max > MAX_RELAYS {
                return Err(TunnelError::config_error(format!(
                    "max_connections must be between 1 and {}",
                    MAX_RELAYS
                )));
            }
        }

        let reconnect = &config.reconnect;
        if reconnect.max_delay_ms < reconnect.initial_delay_ms {
            return Err(TunnelError::config_error(
                "reconnect.max_delay_ms must be >= reconnect.initial_delay_ms",
            ));
        }
        if !reconnect.multiplier.is_finite() || reconnect.multiplier < 1.0 {
            return Err(TunnelError::config_error(
                "reconnect.multiplier must be a finite number >= 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&reconnect.jitter) {
            return Err(TunnelError::config_error(
                "reconnect.jitter must be between 0.0 and 1.0",
            ));
        }

        Ok(())
    }
}
