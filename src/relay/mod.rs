/// 中继连接
///
/// 每条中继连接持有一个 broker 侧 socket 和一个本地侧 socket，并在其上运行
/// 两个 pump 任务：lr 把本地数据复制到 broker，rl 把 broker 数据复制到本地。
/// 任一侧遇到 EOF 或瞬时错误时自动重新拨号。
mod endpoint;
mod pump;

use crate::backoff::ReconnectPolicy;
use crate::config::TunnelConfig;
use crate::error::{Result, TunnelError};
use crate::observer::RelayObserver;
use crate::stats::{Direction, RelayStats, RelayStatsTracker};
use endpoint::Endpoint;
use pump::Pump;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Which socket of a relay connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Broker,
    Local,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Broker => f.write_str("broker"),
            Side::Local => f.write_str("local"),
        }
    }
}

/// Fixed dial target of one side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTarget {
    pub host: String,
    pub port: u16,
}

impl RelayTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for RelayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Per-relay tuning derived from [`TunnelConfig`]
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub chunk_size: usize,
    pub connect_timeout: Duration,
    pub keepalive: Option<Duration>,
    pub reconnect: ReconnectPolicy,
}

impl From<&TunnelConfig> for RelaySettings {
    fn from(config: &TunnelConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            connect_timeout: config.connect_timeout(),
            keepalive: config.keepalive(),
            reconnect: config.reconnect.clone(),
        }
    }
}

pub struct RelayConnection {
    index: usize,
    broker: RelayTarget,
    local: RelayTarget,
    settings: RelaySettings,
    observer: Arc<dyn RelayObserver>,
    stats: RelayStatsTracker,
    cancel: CancellationToken,
    tasks: JoinSet<Result<()>>,
    started: bool,
    reported: bool,
    #[cfg(test)]
    broker_endpoint: std::sync::Weak<Endpoint>,
}

impl RelayConnection {
    /// `parent` is the owning pool's token; stopping the pool stops this relay.
    pub fn new(
        index: usize,
        broker: RelayTarget,
        local: RelayTarget,
        settings: RelaySettings,
        observer: Arc<dyn RelayObserver>,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            index,
            broker,
            local,
            settings,
            observer,
            stats: RelayStatsTracker::new(index),
            cancel: parent.child_token(),
            tasks: JoinSet::new(),
            started: false,
            reported: false,
            #[cfg(test)]
            broker_endpoint: std::sync::Weak::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn broker_target(&self) -> &RelayTarget {
        &self.broker
    }

    pub fn local_target(&self) -> &RelayTarget {
        &self.local
    }

    /// Dial both sides and launch the two pump tasks.
    ///
    /// Fails with [`TunnelError::ConnectionFailed`] if either initial dial
    /// fails; nothing is left running in that case.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(TunnelError::AlreadyStarted);
        }

        let broker = Arc::new(self.open(Side::Broker).await?);
        let local = Arc::new(self.open(Side::Local).await?);
        self.started = true;
        #[cfg(test)]
        {
            self.broker_endpoint = Arc::downgrade(&broker);
        }

        self.observer.relay_started(
            self.index,
            &self.broker.to_string(),
            &self.local.to_string(),
        );

        self.spawn_pump(Direction::LocalToBroker, local.clone(), broker.clone());
        self.spawn_pump(Direction::BrokerToLocal, broker, local);
        Ok(())
    }

    async fn open(&self, side: Side) -> Result<Endpoint> {
        let target = match side {
            Side::Broker => self.broker.clone(),
            Side::Local => self.local.clone(),
        };
        Endpoint::open(
            self.index,
            side,
            target,
            self.settings.clone(),
            self.cancel.clone(),
            self.stats.clone(),
            self.observer.clone(),
        )
        .await
    }

    fn spawn_pump(
        &mut self,
        direction: Direction,
        source: Arc<Endpoint>,
        destination: Arc<Endpoint>,
    ) {
        let pump = Pump {
            index: self.index,
            direction,
            source,
            destination,
            chunk_size: self.settings.chunk_size,
            stats: self.stats.clone(),
            observer: self.observer.clone(),
        };
        let cancel = self.cancel.clone();
        let observer = self.observer.clone();
        let index = self.index;

        self.tasks.spawn(async move {
            match pump.run().await {
                Err(TunnelError::Cancelled) => Ok(()),
                Err(e) => {
                    // 一个方向失败即终止整条中继，另一方向随之退出
                    observer.relay_failed(index, &e);
                    cancel.cancel();
                    Err(e)
                }
                Ok(()) => Ok(()),
            }
        });
    }

    /// Resolve once both pump tasks have terminated.
    ///
    /// Returns the error that terminated the relay, if any. A stopped relay
    /// resolves with `Ok(())`.
    pub async fn wait(&mut self) -> Result<()> {
        let mut failure = None;

        while let Some(joined) = self.tasks.join_next().await {
            let outcome = match joined {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Ok(()),
                Err(e) => Err(TunnelError::Io(io::Error::other(e.to_string()))),
            };
            if let Err(e) = outcome {
                failure.get_or_insert(e);
            }
        }

        if self.started && !self.reported {
            self.reported = true;
            self.observer.relay_stopped(&self.stats.get_stats());
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Cancel both pump tasks; their sockets are released as the tasks drop.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        self.tasks.abort_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of pump tasks not yet collected by [`wait`](Self::wait)
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn stats(&self) -> RelayStats {
        self.stats.get_stats()
    }

    /// 让 broker 侧下一次读取失败
    #[cfg(test)]
    pub(crate) fn inject_broker_fault(&self, kind: io::ErrorKind) {
        if let Some(endpoint) = self.broker_endpoint.upgrade() {
            endpoint.inject_fault(kind);
        }
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        self.stop();
    }
}
