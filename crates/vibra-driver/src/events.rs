//! 事件输出
//!
//! 管线对外只有一个出口：[`PipelineEvent`]。连接状态、保存结果和数据事件都经由
//! [`EventHub`] 分发给已注册的 [`EventSink`]。
//!
//! # 使用示例
//!
//! ```rust
//! use vibra_driver::events::{ChannelSink, EventHub, EventSink, PipelineEvent};
//! use std::sync::Arc;
//!
//! let mut hub = EventHub::new();
//! let (sink, rx) = ChannelSink::new(16);
//! hub.add_sink(Arc::new(sink) as Arc<dyn EventSink>);
//!
//! hub.emit(&PipelineEvent::ConnectionStatus("Connected to broker".to_string()));
//! assert!(matches!(rx.try_recv(), Ok(PipelineEvent::ConnectionStatus(_))));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::dispatch::DispatchEvent;

/// 管线对外事件
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// 连接状态变化（已连接 / 已断开 / 连接失败）
    ConnectionStatus(String),
    /// 每次持久化尝试的结果
    SaveStatus(String),
    /// 数据事件
    Data(DispatchEvent),
}

/// 事件接收者
///
/// 在批处理线程（数据、保存结果）或总线线程（连接状态）上同步调用，
/// 实现必须尽快返回，耗时工作应转交其他线程（参考 [`ChannelSink`]）。
/// 调用时不持有分发器的锁，`on_event` 内可以注册新的接收者，新接收者从下一个事件开始生效。
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

impl<F> EventSink for F
where
    F: Fn(&PipelineEvent) + Send + Sync,
{
    fn on_event(&self, event: &PipelineEvent) {
        self(event)
    }
}

/// 事件分发器
///
/// 本身不是线程安全的，共享时放在 `RwLock<EventHub>` 中。
#[derive(Default)]
pub struct EventHub {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventHub {
    #[must_use]
    pub const fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn clear(&mut self) {
        self.sinks.clear();
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// 当前接收者列表的快照
    pub fn snapshot(&self) -> Vec<Arc<dyn EventSink>> {
        self.sinks.clone()
    }

    /// 按注册顺序通知所有接收者
    pub fn emit(&self, event: &PipelineEvent) {
        for sink in &self.sinks {
            sink.on_event(event);
        }
    }
}

/// 基于有界通道的接收者
///
/// 使用 `try_send`，消费者跟不上时丢弃事件并计数，不会阻塞管线。
pub struct ChannelSink {
    tx: Sender<PipelineEvent>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, Receiver<PipelineEvent>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// 丢弃计数器的共享引用
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelSink {
    fn on_event(&self, event: &PipelineEvent) {
        if self.tx.try_send(event.clone()).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_hub_emits_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hub = EventHub::new();
        for id in 0..3 {
            let log = log.clone();
            hub.add_sink(Arc::new(move |_: &PipelineEvent| log.lock().push(id)));
        }
        hub.emit(&PipelineEvent::SaveStatus("ok".to_string()));
        assert_eq!(*log.lock(), vec![0, 1, 2]);
        assert_eq!(hub.len(), 3);

        hub.clear();
        assert!(hub.is_empty());
    }

    #[test]
    fn test_channel_sink_counts_drops() {
        let (sink, rx) = ChannelSink::new(1);
        let counter = sink.dropped_counter();
        sink.on_event(&PipelineEvent::SaveStatus("a".to_string()));
        sink.on_event(&PipelineEvent::SaveStatus("b".to_string()));
        assert_eq!(sink.dropped(), 1);
        assert_eq!(counter.load(Ordering::Relaxed), 1);

        match rx.try_recv().unwrap() {
            PipelineEvent::SaveStatus(text) => assert_eq!(text, "a"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
