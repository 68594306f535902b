/// 中继连接的一侧（broker 或本地服务）
///
/// 同一个 Endpoint 被两个方向的 pump 任务共享：一个任务读取，另一个任务写入。
/// 当前 socket 保存在带代号（generation）的 Link 中，重连在 reconnect_lock 下
/// 完成“关闭旧连接 -> 拨号 -> 安装新连接”，另一任务只会看到完整替换后的连接。
use super::{RelaySettings, RelayTarget, Side};
use crate::backoff::Backoff;
use crate::error::{is_transient, Result, TunnelError};
use crate::observer::RelayObserver;
use crate::stats::RelayStatsTracker;
use parking_lot::Mutex as SyncMutex;
use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// 某一代 socket
pub(crate) struct Link {
    generation: u64,
    opened: Instant,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    /// 被替换时取消，正在使用该连接的任务立即放弃
    closed: CancellationToken,
}

impl Link {
    fn new(stream: TcpStream, generation: u64) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            generation,
            opened: Instant::now(),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: CancellationToken::new(),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.lock().await.read(buf).await
    }

    async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        self.writer.lock().await.write_all(data).await
    }

    /// 标记关闭并关闭写端；读写该连接的任务会在 closed 上被唤醒并释放锁
    async fn close(&self) {
        self.closed.cancel();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

enum Attempt<T> {
    Done(T),
    Retry(String),
}

pub(crate) struct Endpoint {
    index: usize,
    side: Side,
    target: RelayTarget,
    settings: RelaySettings,
    current: SyncMutex<Arc<Link>>,
    reconnect_lock: Mutex<()>,
    /// 跨多次重连保留，连续失败时等待时间逐步增加
    backoff: SyncMutex<Backoff>,
    cancel: CancellationToken,
    stats: RelayStatsTracker,
    observer: Arc<dyn RelayObserver>,
    #[cfg(test)]
    fault: SyncMutex<Option<io::ErrorKind>>,
}

impl Endpoint {
    /// 建立初始连接，失败时返回 ConnectionFailed，不重试
    pub(crate) async fn open(
        index: usize,
        side: Side,
        target: RelayTarget,
        settings: RelaySettings,
        cancel: CancellationToken,
        stats: RelayStatsTracker,
        observer: Arc<dyn RelayObserver>,
    ) -> Result<Self> {
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TunnelError::Cancelled),
            result = dial(&target, &settings) => result,
        }
        .map_err(|e| TunnelError::connection_failed(target.to_string(), e))?;

        let backoff = SyncMutex::new(settings.reconnect.backoff());
        Ok(Self {
            index,
            side,
            target,
            settings,
            current: SyncMutex::new(Arc::new(Link::new(stream, 0))),
            reconnect_lock: Mutex::new(()),
            backoff,
            cancel,
            #[cfg(test)]
            fault: SyncMutex::new(None),
            stats,
            observer,
        })
    }

    /// 下一次 read 直接返回指定类型的错误
    #[cfg(test)]
    pub(crate) fn inject_fault(&self, kind: io::ErrorKind) {
        *self.fault.lock() = Some(kind);
    }

    pub(crate) fn link(&self) -> Arc<Link> {
        self.current.lock().clone()
    }

    /// 读取至少 1 个字节；EOF 和瞬时错误会触发重连后重试
    pub(crate) async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        #[cfg(test)]
        if let Some(kind) = self.fault.lock().take() {
            return Err(TunnelError::Io(io::Error::new(kind, "injected fault")));
        }

        loop {
            let link = self.link();
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TunnelError::Cancelled),
                _ = link.closed.cancelled() => Attempt::Retry("replaced".to_string()),
                result = link.read(buf) => match result {
                    Ok(0) => Attempt::Retry("end of stream".to_string()),
                    Ok(n) => Attempt::Done(n),
                    Err(e) if is_transient(&e) => Attempt::Retry(e.to_string()),
                    Err(e) => return Err(TunnelError::Io(e)),
                },
            };

            match outcome {
                Attempt::Done(n) => {
                    // 对端确实发来了数据，说明这一代连接可用
                    self.backoff.lock().reset();
                    return Ok(n);
                }
                Attempt::Retry(cause) => self.reconnect(&link, cause).await?,
            }
        }
    }

    /// 写入整个块；瞬时错误会触发重连后重写该块
    pub(crate) async fn write_all(&self, data: &[u8]) -> Result<()> {
        loop {
            let link = self.link();
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TunnelError::Cancelled),
                _ = link.closed.cancelled() => Attempt::Retry("replaced".to_string()),
                result = link.write_all(data) => match result {
                    Ok(()) => Attempt::Done(()),
                    Err(e) if is_transient(&e) => Attempt::Retry(e.to_string()),
                    Err(e) => return Err(TunnelError::Io(e)),
                },
            };

            match outcome {
                Attempt::Done(()) => return Ok(()),
                Attempt::Retry(cause) => self.reconnect(&link, cause).await?,
            }
        }
    }

    /// 替换 stale 这一代连接
    ///
    /// 如果另一个任务已经完成替换，直接返回，调用者在新连接上重试
    async fn reconnect(&self, stale: &Link, mut cause: String) -> Result<()> {
        let _guard = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TunnelError::Cancelled),
            guard = self.reconnect_lock.lock() => guard,
        };

        if self.link().generation() != stale.generation() {
            return Ok(());
        }

        stale.close().await;

        // 存活足够久的连接视为正常，之前的失败不再累计
        if stale.opened.elapsed() >= self.settings.reconnect.max_delay() {
            self.backoff.lock().reset();
        }

        loop {
            let (delay, attempt) = {
                let mut backoff = self.backoff.lock();
                let attempt = backoff.attempt();
                match backoff.next_delay() {
                    Some(delay) => (delay, backoff.attempt()),
                    None => {
                        return Err(TunnelError::connection_failed(
                            self.target.to_string(),
                            io::Error::new(
                                io::ErrorKind::TimedOut,
                                format!("gave up after {} reconnect attempts", attempt),
                            ),
                        ))
                    }
                }
            };

            self.observer
                .reconnecting(self.index, self.side, attempt, delay, &cause);

            let dialed = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TunnelError::Cancelled),
                result = async {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    dial(&self.target, &self.settings).await
                } => result,
            };

            match dialed {
                Ok(stream) => {
                    let generation = stale.generation() + 1;
                    *self.current.lock() = Arc::new(Link::new(stream, generation));
                    self.stats.record_reconnect(self.side);
                    self.observer.reconnected(self.index, self.side, generation);
                    return Ok(());
                }
                Err(e) => cause = e.to_string(),
            }
        }
    }
}

/// 拨号到固定目标
async fn dial(target: &RelayTarget, settings: &RelaySettings) -> io::Result<TcpStream> {
    let stream = tokio::time::timeout(
        settings.connect_timeout,
        TcpStream::connect((target.host.as_str(), target.port)),
    )
    .await
    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connection timeout"))??;

    stream.set_nodelay(true)?;
    apply_keepalive(&stream, settings.keepalive);
    Ok(stream)
}

fn apply_keepalive(stream: &TcpStream, time: Option<Duration>) {
    let Some(time) = time else {
        return;
    };

    let keepalive = TcpKeepalive::new().with_time(time);
    let sock_ref = SockRef::from(stream);
    if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
        warn!(
            "Failed to set TCP keepalive on {}: {}",
            stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".into()),
            e
        );
    }
}
