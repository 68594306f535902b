use super::endpoint::Endpoint;
use crate::error::{Result, TunnelError};
use crate::observer::RelayObserver;
use crate::stats::{Direction, RelayStatsTracker};
use std::sync::Arc;

/// 单方向的数据泵：从 source 读取，写入 destination
pub(crate) struct Pump {
    pub index: usize,
    pub direction: Direction,
    pub source: Arc<Endpoint>,
    pub destination: Arc<Endpoint>,
    pub chunk_size: usize,
    pub stats: RelayStatsTracker,
    pub observer: Arc<dyn RelayObserver>,
}

impl Pump {
    /// 持续转发直到被取消或遇到无法恢复的错误
    ///
    /// 每个块只在成功写入后计数一次，重连重试不会重复计数
    pub(crate) async fn run(self) -> Result<()> {
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            let n = self
                .source
                .read(&mut buf)
                .await
                .map_err(|e| self.classify(e))?;

            self.destination
                .write_all(&buf[..n])
                .await
                .map_err(|e| self.classify(e))?;

            let total = self.stats.add_bytes(self.direction, n as u64);
            self.observer
                .chunk_relayed(self.index, self.direction, n, total);
        }
    }

    fn classify(&self, err: TunnelError) -> TunnelError {
        match err {
            TunnelError::Io(source) => TunnelError::relay(self.index, self.direction, source),
            other => other,
        }
    }
}
