/// 中继生命周期观察者
///
/// 连接池和每条中继连接在创建时获得 `Arc<dyn RelayObserver>`，通过它报告事件
use crate::assignment::AssignedPool;
use crate::error::TunnelError;
use crate::relay::Side;
use crate::stats::{Direction, RelayStats};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Receives lifecycle events from the pool and its relay connections.
///
/// All methods have no-op defaults so implementations only override what
/// they care about.
pub trait RelayObserver: Send + Sync {
    fn assigned(&self, _pool: &AssignedPool) {}

    fn relay_started(&self, _index: usize, _broker_addr: &str, _local_addr: &str) {}

    fn chunk_relayed(&self, _index: usize, _direction: Direction, _bytes: usize, _total: u64) {}

    fn reconnecting(
        &self,
        _index: usize,
        _side: Side,
        _attempt: u32,
        _delay: Duration,
        _cause: &str,
    ) {
    }

    fn reconnected(&self, _index: usize, _side: Side, _generation: u64) {}

    fn relay_failed(&self, _index: usize, _error: &TunnelError) {}

    fn relay_stopped(&self, _stats: &RelayStats) {}
}

/// Observer that forwards every event to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl TracingObserver {
    pub fn shared() -> Arc<dyn RelayObserver> {
        Arc::new(TracingObserver)
    }
}

impl RelayObserver for TracingObserver {
    fn assigned(&self, pool: &AssignedPool) {
        info!(
            "Assigned {} (id: {}, port: {}, max_conn_count: {})",
            pool.url, pool.id, pool.port, pool.max_conn_count
        );
    }

    fn relay_started(&self, index: usize, broker_addr: &str, local_addr: &str) {
        debug!("{:03} started: {} <-> {}", index, broker_addr, local_addr);
    }

    fn chunk_relayed(&self, index: usize, direction: Direction, bytes: usize, total: u64) {
        trace!("{:03} {}:   relayed {}, total {}", index, direction, bytes, total);
    }

    fn reconnecting(&self, index: usize, side: Side, attempt: u32, delay: Duration, cause: &str) {
        if attempt <= 1 {
            debug!("{:03} {} side lost ({}), reconnecting", index, side, cause);
        } else {
            warn!(
                "{:03} {} side reconnect attempt {} in {:?} ({})",
                index, side, attempt, delay, cause
            );
        }
    }

    fn reconnected(&self, index: usize, side: Side, generation: u64) {
        debug!("{:03} {} side reconnected (generation {})", index, side, generation);
    }

    fn relay_failed(&self, index: usize, err: &TunnelError) {
        error!("{:03} relay terminated: {}", index, err);
    }

    fn relay_stopped(&self, stats: &RelayStats) {
        debug!(
            "{:03} stopped: lr total {}, rl total {}",
            stats.index, stats.local_to_broker, stats.broker_to_local
        );
    }
}

/// Observer that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RelayObserver for NoopObserver {}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// 记录失败和停止事件
    #[derive(Default)]
    pub(crate) struct FailureRecorder {
        pub failed: Mutex<Vec<usize>>,
        pub stopped: Mutex<Vec<RelayStats>>,
    }

    impl RelayObserver for FailureRecorder {
        fn relay_failed(&self, index: usize, _error: &TunnelError) {
            self.failed.lock().push(index);
        }

        fn relay_stopped(&self, stats: &RelayStats) {
            self.stopped.lock().push(*stats);
        }
    }
}
