use crate::assignment::{AssignedPool, Assigner, AssignmentClient};
use crate::config::TunnelConfig;
use crate::error::{Result, TunnelError};
use crate::observer::{RelayObserver, TracingObserver};
use crate::relay::{RelayConnection, RelaySettings, RelayTarget};
use crate::stats::RelayStats;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 连接池状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// 尚未请求分配
    Uninitialized,
    /// 已获得分配，尚未启动中继
    Assigned,
    /// 中继连接正在运行
    Running,
    /// 已停止（终态）
    Stopped,
}

/// 可跨任务使用的停止句柄
#[derive(Debug, Clone)]
pub struct StopHandle {
    cancel: CancellationToken,
}

impl StopHandle {
    /// 取消连接池的所有中继连接
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// 中继连接池
///
/// 一次分配，max_conn_count 条中继连接，统一启动、等待和停止
pub struct ConnectionPool {
    config: TunnelConfig,
    assigner: Arc<dyn Assigner>,
    observer: Arc<dyn RelayObserver>,
    state: PoolState,
    assignment: Option<AssignedPool>,
    relays: Vec<RelayConnection>,
    cancel: CancellationToken,
}

impl ConnectionPool {
    /// 使用 HTTP 分配客户端和 tracing 观察者创建连接池
    pub fn new(config: TunnelConfig) -> Result<Self> {
        Self::with_observer(config, TracingObserver::shared())
    }

    /// 注入自定义观察者
    pub fn with_observer(config: TunnelConfig, observer: Arc<dyn RelayObserver>) -> Result<Self> {
        let assigner = Arc::new(AssignmentClient::new(&config)?);
        Self::with_assigner(config, assigner, observer)
    }

    /// 注入自定义分配来源和观察者
    pub fn with_assigner(
        config: TunnelConfig,
        assigner: Arc<dyn Assigner>,
        observer: Arc<dyn RelayObserver>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            assigner,
            observer,
            state: PoolState::Uninitialized,
            assignment: None,
            relays: Vec::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// 获取分配结果；每个连接池只请求一次
    pub async fn ensure_assigned(&mut self) -> Result<&AssignedPool> {
        if self.assignment.is_none() {
            let assignment = self
                .assigner
                .request_assignment(self.config.domain.as_deref())
                .await?;
            assignment.check()?;
            self.observer.assigned(&assignment);
            self.assignment = Some(assignment);
            if self.state == PoolState::Uninitialized {
                self.state = PoolState::Assigned;
            }
        }

        self.assignment
            .as_ref()
            .ok_or_else(|| TunnelError::protocol("assignment missing after request"))
    }

    pub async fn assignment(&mut self) -> Result<&AssignedPool> {
        self.ensure_assigned().await
    }

    pub async fn url(&mut self) -> Result<&str> {
        Ok(self.ensure_assigned().await?.url.as_str())
    }

    pub async fn broker_port(&mut self) -> Result<u16> {
        Ok(self.ensure_assigned().await?.port)
    }

    /// 实际启动的中继连接数（考虑本地配置的上限）
    pub async fn max_conn_count(&mut self) -> Result<usize> {
        let granted = self.ensure_assigned().await?.max_conn_count;
        Ok(match self.config.max_connections {
            Some(limit) => granted.min(limit),
            None => granted,
        })
    }

    /// 启动所有中继连接
    ///
    /// 任意一条中继初始连接失败时，已启动的中继会被停止，连接池回到
    /// Assigned 状态并返回该错误
    pub async fn start(&mut self, local_port: u16) -> Result<&mut Self> {
        match self.state {
            PoolState::Running | PoolState::Stopped => return Err(TunnelError::AlreadyStarted),
            PoolState::Uninitialized | PoolState::Assigned => {}
        }
        if local_port == 0 {
            return Err(TunnelError::config_error("local port cannot be 0"));
        }

        let count = self.max_conn_count().await?;
        let broker_port = self.broker_port().await?;
        let broker = RelayTarget::new(self.assigner.broker_host(), broker_port);
        let local = RelayTarget::new(self.config.local_host.clone(), local_port);
        let settings = RelaySettings::from(&self.config);

        info!(
            "Starting {} relay connections: {} <-> {}",
            count, broker, local
        );

        let mut relays: Vec<RelayConnection> = Vec::new();
        for index in 0..count {
            let mut relay = RelayConnection::new(
                index,
                broker.clone(),
                local.clone(),
                settings.clone(),
                self.observer.clone(),
                &self.cancel,
            );

            if let Err(e) = relay.start().await {
                warn!(
                    "Relay {:03} failed to start ({}), stopping {} started relays",
                    index,
                    e,
                    relays.len()
                );
                for started in relays.iter_mut() {
                    started.stop();
                }
                for started in relays.iter_mut() {
                    if let Err(rollback) = started.wait().await {
                        warn!(
                            "Relay {:03} failed during rollback: {}",
                            started.index(),
                            rollback
                        );
                    }
                }
                return Err(e);
            }

            relays.push(relay);
        }

        self.relays = relays;
        self.state = PoolState::Running;
        debug!("All {} relay connections started", count);
        Ok(self)
    }

    /// 等待所有中继连接的 pump 任务结束
    ///
    /// 正常情况下只有 stop() 或不可恢复错误才会结束；返回第一个错误
    pub async fn wait(&mut self) -> Result<()> {
        let mut failure = None;
        for relay in self.relays.iter_mut() {
            if let Err(e) = relay.wait().await {
                failure.get_or_insert(e);
            }
        }
        if self.cancel.is_cancelled() {
            self.state = PoolState::Stopped;
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 强制停止所有中继连接，不等待其自然结束
    pub fn stop(&mut self) {
        self.cancel.cancel();
        for relay in self.relays.iter_mut() {
            relay.stop();
        }
        if self.state == PoolState::Running {
            info!("Stopped {} relay connections", self.relays.len());
        }
        self.state = PoolState::Stopped;
    }

    /// 获取一个可在其他任务中调用的停止句柄
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            cancel: self.cancel.clone(),
        }
    }

    pub fn relays(&self) -> &[RelayConnection] {
        &self.relays
    }

    /// 所有中继连接的统计快照
    pub fn stats(&self) -> Vec<RelayStats> {
        self.relays.iter().map(|relay| relay.stats()).collect()
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
