//! 采集器（对外 API）
//!
//! [`Ingestor`] 持有监督线程、批处理线程和（可选的）写入线程：
//!
//! ```text
//! bus ──► supervisor thread ──push──► [ingress queue] ──► batch thread ──► EventHub ──► sinks
//!                                                              │
//!                                                              └──► writer thread ──► HistoryStore
//! ```
//!
//! 通过 [`IngestorBuilder`](crate::IngestorBuilder) 创建。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::Receiver;
use tracing::{error, info};
use vibra_bus::RawMessage;

use crate::context::IngestContext;
use crate::error::DriverError;
use crate::events::{ChannelSink, EventSink, PipelineEvent};
use crate::metrics::MetricsSnapshot;
use crate::queue::IngressSender;

/// 线程退出等待上限
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 带超时的 join
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();
        // 看门狗线程代为 join，超时后留给进程退出时回收
        spawn(move || {
            let _ = tx.send(self.join());
        });

        match rx.recv_timeout(timeout) {
            Ok(result) => result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// 振动数据采集器
pub struct Ingestor {
    ctx: Arc<IngestContext>,
    sender: IngressSender,
    supervisor_thread: Option<JoinHandle<()>>,
    batch_thread: Option<JoinHandle<()>>,
    writer_thread: Option<JoinHandle<()>>,
    is_running: Arc<AtomicBool>,
}

impl Ingestor {
    pub(crate) fn from_parts(
        ctx: Arc<IngestContext>,
        sender: IngressSender,
        supervisor_thread: Option<JoinHandle<()>>,
        batch_thread: JoinHandle<()>,
        writer_thread: Option<JoinHandle<()>>,
        is_running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            ctx,
            sender,
            supervisor_thread,
            batch_thread: Some(batch_thread),
            writer_thread,
            is_running,
        }
    }

    /// 接管监督线程；启动失败时停止已启动的线程并返回错误
    pub(crate) fn attach_supervisor(
        &mut self,
        spawned: std::io::Result<JoinHandle<()>>,
    ) -> Result<(), DriverError> {
        match spawned {
            Ok(handle) => {
                self.supervisor_thread = Some(handle);
                Ok(())
            },
            Err(e) => {
                error!("Failed to start connection supervisor: {}", e);
                self.stop();
                Err(e.into())
            },
        }
    }

    /// 开始保存某个型号的数据
    pub fn start_saving(&self, model: &str, filename: &str) {
        if let Some(previous) = self.ctx.saving.start(model, filename) {
            info!("Saving {} switched from {} to {}", model, previous, filename);
        } else {
            info!("Saving {} to {}", model, filename);
        }
    }

    /// 停止保存；下一帧起不再写入
    pub fn stop_saving(&self, model: &str) {
        if let Some(filename) = self.ctx.saving.stop(model) {
            info!("Stopped saving {} ({})", model, filename);
        }
    }

    pub fn is_saving(&self, model: &str) -> bool {
        self.ctx.saving.is_saving(model)
    }

    /// 登记活跃订阅，`channel = None` 表示全部通道
    pub fn add_active_feature(&self, feature: &str, model: &str, channel: Option<&str>) {
        self.ctx.active.add(feature, model, channel);
    }

    pub fn remove_active_feature(&self, feature: &str, model: &str, channel: Option<&str>) {
        self.ctx.active.remove(feature, model, channel);
    }

    /// 以通道形式订阅全部事件
    ///
    /// 消费者跟不上时事件被丢弃，不会阻塞管线。
    pub fn subscribe(&self, capacity: usize) -> Receiver<PipelineEvent> {
        let (sink, rx) = ChannelSink::new(capacity);
        self.add_sink(Arc::new(sink));
        rx
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.ctx.hub.write().add_sink(sink);
    }

    /// 直接放入一条消息（绕过总线，回放用）
    pub fn enqueue(&self, topic: &str, payload: impl Into<Bytes>) -> Result<(), DriverError> {
        self.sender.push(RawMessage::new(topic, payload))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    /// 运行标志已设置且所有线程都在运行
    pub fn is_healthy(&self) -> bool {
        let alive = |handle: &Option<JoinHandle<()>>| handle.as_ref().is_none_or(|h| !h.is_finished());
        self.is_running.load(Ordering::Acquire)
            && self.batch_thread.as_ref().is_some_and(|h| !h.is_finished())
            && alive(&self.supervisor_thread)
            && alive(&self.writer_thread)
    }

    /// 入口队列为空，且已进入队列的消息都已有结果（解码、出错、跳过或被丢弃）
    pub fn is_drained(&self) -> bool {
        let m = self.ctx.metrics.snapshot();
        let settled = m.frames_decoded + m.decode_errors + m.topics_skipped;
        self.sender.is_empty() && settled + m.messages_dropped >= m.messages_received
    }

    /// 等待入口队列中的消息全部处理完
    ///
    /// 只覆盖已经进入入口队列的消息。经由总线发布的消息可能还在总线线程手里，
    /// 此时应使用 [`Ingestor::wait_for_messages`]。返回 `false` 表示超时。
    pub fn wait_for_drain(&self, timeout: Duration) -> bool {
        self.wait_for_messages(0, timeout)
    }

    /// 等待至少 `expected` 条消息进入入口队列，并全部处理完（回放用）
    ///
    /// 返回 `false` 表示超时。
    pub fn wait_for_messages(&self, expected: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.received() >= expected && self.is_drained() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// 已进入入口队列的消息数
    pub fn received(&self) -> u64 {
        self.ctx.metrics.snapshot().messages_received
    }

    /// 停止所有线程并等待退出
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Release: 停止前的所有写入对工作线程可见
        if self.is_running.swap(false, Ordering::AcqRel) {
            info!("Shutting down ingestor");
        }

        // 监督线程先退出（关闭连接），然后批处理线程；
        // 批处理线程退出时释放写入队列，写入线程随之退出
        let threads = [
            ("Supervisor", self.supervisor_thread.take()),
            ("Batch", self.batch_thread.take()),
            ("Writer", self.writer_thread.take()),
        ];
        for (name, handle) in threads {
            if let Some(handle) = handle
                && handle.join_timeout(JOIN_TIMEOUT).is_err()
            {
                error!(
                    "{} thread panicked or failed to shut down within {:?}",
                    name, JOIN_TIMEOUT
                );
            }
        }
    }
}

impl Drop for Ingestor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_timeout_finished_thread() {
        let handle = spawn(|| {});
        assert!(handle.join_timeout(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_join_timeout_slow_thread() {
        let handle = spawn(|| std::thread::sleep(Duration::from_millis(300)));
        let start = Instant::now();
        assert!(handle.join_timeout(Duration::from_millis(20)).is_err());
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn test_join_timeout_panicked_thread() {
        let handle = spawn(|| panic!("boom"));
        assert!(handle.join_timeout(Duration::from_secs(1)).is_err());
    }
}
