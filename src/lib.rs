/// Local Tunnel 库入口
///
/// 将核心模块导出为库，方便测试和复用
pub mod assignment;
pub mod backoff;
pub mod cli;
pub mod config;
pub mod connection_pool;
pub mod error;
pub mod exit_code;
pub mod observer;
pub mod relay;
pub mod stats;

// 重新导出常用类型
pub use assignment::{AssignedPool, Assigner, AssignmentClient};
pub use backoff::ReconnectPolicy;
pub use config::TunnelConfig;
pub use connection_pool::{ConnectionPool, PoolState, StopHandle};
pub use error::{Result, TunnelError};
pub use exit_code::SysExit;
pub use observer::{NoopObserver, RelayObserver, TracingObserver};
pub use relay::{RelayConnection, RelaySettings, RelayTarget, Side};
pub use stats::{Direction, RelayStats};
