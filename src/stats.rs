use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Relay direction of a pump task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// local service -> broker
    #[serde(rename = "lr")]
    LocalToBroker,
    /// broker -> local service
    #[serde(rename = "rl")]
    BrokerToLocal,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::LocalToBroker => "lr",
            Direction::BrokerToLocal => "rl",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics for a single relay connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStats {
    /// Relay slot index
    pub index: usize,
    /// Total bytes relayed local -> broker
    pub local_to_broker: u64,
    /// Total bytes relayed broker -> local
    pub broker_to_local: u64,
    /// Number of reconnects performed on the broker side
    pub broker_reconnects: u64,
    /// Number of reconnects performed on the local side
    pub local_reconnects: u64,
}

/// Statistics tracker shared between a relay and its two pump tasks
#[derive(Debug, Clone)]
pub struct RelayStatsTracker {
    index: usize,
    local_to_broker: Arc<AtomicU64>,
    broker_to_local: Arc<AtomicU64>,
    broker_reconnects: Arc<AtomicU64>,
    local_reconnects: Arc<AtomicU64>,
}

impl RelayStatsTracker {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            local_to_broker: Arc::new(AtomicU64::new(0)),
            broker_to_local: Arc::new(AtomicU64::new(0)),
            broker_reconnects: Arc::new(AtomicU64::new(0)),
            local_reconnects: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Add relayed bytes, returns the new cumulative total for that direction
    pub fn add_bytes(&self, direction: Direction, bytes: u64) -> u64 {
        let counter = match direction {
            Direction::LocalToBroker => &self.local_to_broker,
            Direction::BrokerToLocal => &self.broker_to_local,
        };
        counter.fetch_add(bytes, Ordering::Relaxed) + bytes
    }

    pub fn bytes(&self, direction: Direction) -> u64 {
        match direction {
            Direction::LocalToBroker => self.local_to_broker.load(Ordering::Relaxed),
            Direction::BrokerToLocal => self.broker_to_local.load(Ordering::Relaxed),
        }
    }

    pub fn record_reconnect(&self, side: crate::relay::Side) {
        let counter = match side {
            crate::relay::Side::Broker => &self.broker_reconnects,
            crate::relay::Side::Local => &self.local_reconnects,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of stats
    pub fn get_stats(&self) -> RelayStats {
        RelayStats {
            index: self.index,
            local_to_broker: self.local_to_broker.load(Ordering::Relaxed),
            broker_to_local: self.broker_to_local.load(Ordering::Relaxed),
            broker_reconnects: self.broker_reconnects.load(Ordering::Relaxed),
            local_reconnects: self.local_reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Format bytes in a human readable unit
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
