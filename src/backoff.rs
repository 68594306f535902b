/// 重连退避策略
///
/// 指数退避加随机抖动，避免对端不可达时重连形成忙循环
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 重连策略配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// 首次重连前的等待时间（毫秒）
    pub initial_delay_ms: u64,
    /// 最大等待时间（毫秒）
    pub max_delay_ms: u64,
    /// 每次失败后的放大倍数
    pub multiplier: f64,
    /// 抖动比例，0.0 ~ 1.0
    pub jitter: f64,
    /// 最大连续重试次数，None 表示无限重试
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 50,
            max_delay_ms: 5_000,
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// 创建退避状态
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            attempt: 0,
            current: self.initial_delay(),
        }
    }
}

/// 退避状态
///
/// 在连续失败之间保留，只有连接确认可用后才调用 reset 归零
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
    current: Duration,
}

impl Backoff {
    /// 已经尝试的次数
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// 连接恢复正常后归零，下次重连重新从立即重试开始
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current = self.policy.initial_delay();
    }

    /// 下一次重试前的等待时间；超过最大次数时返回 None
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.policy.max_attempts {
            if self.attempt >= max {
                return None;
            }
        }
        self.attempt += 1;

        // 第一次立即重试：对端只是关闭了本代连接时不需要等待
        if self.attempt == 1 {
            return Some(Duration::ZERO);
        }

        let max = self.policy.max_delay();
        let base = self.current.min(max);
        self.current = scale(base, self.policy.multiplier.max(1.0), max);

        Some(apply_jitter(base, self.policy.jitter, max))
    }
}

/// delay * factor，溢出、NaN 或超过 max 时取 max
fn scale(delay: Duration, factor: f64, max: Duration) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor)
        .map_or(max, |scaled| scaled.min(max))
}

fn apply_jitter(delay: Duration, jitter: f64, max: Duration) -> Duration {
    let jitter = if jitter.is_nan() { 0.0 } else { jitter.clamp(0.0, 1.0) };
    if jitter == 0.0 || delay.is_zero() {
        return delay;
    }
    let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
    // 抖动允许略超过上限，但不能溢出
    scale(delay, factor, max.saturating_add(max.mul_f64(jitter)))
}
