//! 入口队列
//!
//! 总线线程只负责 `push`，批处理线程负责消费。队列有上限，满时丢弃最旧的消息，
//! 生产者永远不会阻塞。
//!
//! 丢弃最旧消息的做法：生产端持有一个接收端克隆，队列满时先 `try_recv` 取走队首，
//! 再放入新消息。同一主题内的先后顺序不变。
//!
//! 由于生产端持有接收端克隆，底层通道永远不会断开。消费端被丢弃（批处理线程退出）时
//! 设置 `closed` 标志，之后的 `push` 返回 [`DriverError::QueueClosed`]。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use tracing::warn;
use vibra_bus::RawMessage;

use crate::error::DriverError;
use crate::metrics::IngestMetrics;

/// 每丢弃多少条消息输出一次告警
const DROP_WARN_EVERY: u64 = 1000;

/// 创建入口队列
pub fn ingress_queue(
    capacity: usize,
    metrics: Arc<IngestMetrics>,
) -> (IngressSender, IngressReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    let closed = Arc::new(AtomicBool::new(false));
    (
        IngressSender {
            tx,
            overflow: rx.clone(),
            closed: closed.clone(),
            metrics,
        },
        IngressReceiver { rx, closed },
    )
}

/// 生产端（可克隆，可跨线程）
#[derive(Clone)]
pub struct IngressSender {
    tx: Sender<RawMessage>,
    overflow: Receiver<RawMessage>,
    closed: Arc<AtomicBool>,
    metrics: Arc<IngestMetrics>,
}

impl IngressSender {
    /// 放入一条消息，队列满时丢弃最旧的一条
    ///
    /// 消费端已被丢弃时返回 [`DriverError::QueueClosed`]，消息不计入统计。
    pub fn push(&self, message: RawMessage) -> Result<(), DriverError> {
        if self.is_closed() {
            return Err(DriverError::QueueClosed);
        }
        self.metrics.messages_received.fetch_add(1, Ordering::Relaxed);

        let mut message = message;
        loop {
            match self.tx.try_send(message) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Disconnected(_)) => return Err(DriverError::QueueClosed),
                Err(TrySendError::Full(rejected)) => {
                    message = rejected;
                    if self.overflow.try_recv().is_ok() {
                        let dropped = self.metrics.messages_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        if dropped % DROP_WARN_EVERY == 1 {
                            warn!(
                                "Ingress queue full (capacity {}), dropping oldest messages ({} dropped so far)",
                                self.capacity(),
                                dropped
                            );
                        }
                    }
                },
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// 消费端（批处理线程独占）
pub struct IngressReceiver {
    rx: Receiver<RawMessage>,
    closed: Arc<AtomicBool>,
}

impl Drop for IngressReceiver {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl IngressReceiver {
    pub fn recv_timeout(&self, timeout: Duration) -> Result<RawMessage, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Option<RawMessage> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
