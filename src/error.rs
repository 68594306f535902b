/// 自定义错误类型
///
/// 使用 thiserror 定义隧道客户端的错误分类，调用者可以据此决定
/// 是否重试以及进程退出码
use crate::exit_code::SysExit;
use crate::stats::Direction;
use std::io;
use thiserror::Error;

/// Local Tunnel 的主要错误类型
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Broker 返回了非成功状态码
    #[error("Broker rejected assignment request with status {status}")]
    Broker { status: u16 },

    /// 分配响应格式错误
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 初始连接失败
    #[error("Failed to connect to {addr}: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 分配请求本身失败（DNS、连接、超时等）
    #[error("Assignment request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 连接池已经启动过
    #[error("Connection pool has already been started")]
    AlreadyStarted,

    /// 中继过程中出现无法恢复的 I/O 错误
    #[error("Relay {index:03} {direction} failed: {source}")]
    Relay {
        index: usize,
        direction: Direction,
        #[source]
        source: io::Error,
    },

    /// 操作被 stop() 取消
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, TunnelError>;

impl TunnelError {
    /// 创建连接失败错误
    pub fn connection_failed(addr: impl Into<String>, source: io::Error) -> Self {
        Self::ConnectionFailed {
            addr: addr.into(),
            source,
        }
    }

    /// 创建协议错误
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// 创建配置错误
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// 创建中继错误
    pub fn relay(index: usize, direction: Direction, source: io::Error) -> Self {
        Self::Relay {
            index,
            direction,
            source,
        }
    }

    pub fn is_broker_error(&self) -> bool {
        matches!(self, Self::Broker { .. })
    }

    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    pub fn is_connect_error(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. })
    }

    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// 映射到 BSD sysexits 退出码
    pub fn exit_code(&self) -> SysExit {
        match self {
            Self::Config(_) => SysExit::Config,
            Self::Broker { .. } | Self::Http(_) => SysExit::Unavailable,
            Self::Protocol(_) => SysExit::Protocol,
            Self::ConnectionFailed { .. } => SysExit::NoHost,
            Self::Io(_) | Self::Relay { .. } => SysExit::IoErr,
            Self::AlreadyStarted | Self::Cancelled => SysExit::Software,
        }
    }
}

/// 判断 I/O 错误是否属于可通过重连恢复的瞬时错误
///
/// 读到 EOF、对端重置或管道断开都意味着这一代连接已经失效，
/// 重新拨号即可继续；其他错误交给调用者按致命错误处理。
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::WriteZero
    )
}
