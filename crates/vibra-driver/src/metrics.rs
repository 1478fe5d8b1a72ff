//! 采集管线性能指标
//!
//! 无锁原子计数器，可在任意线程读取，不引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// 采集管线实时指标
///
/// # 使用示例
///
/// ```rust
/// use vibra_driver::IngestMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = IngestMetrics::new();
/// metrics.messages_received.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().messages_received, 1);
/// ```
#[derive(Debug, Default)]
pub struct IngestMetrics {
    /// 进入入口队列的消息数
    pub messages_received: AtomicU64,

    /// 队列满时被丢弃的最旧消息数
    pub messages_dropped: AtomicU64,

    /// 处理过的非空批次数
    pub batches_processed: AtomicU64,

    /// 解码成功的帧数
    pub frames_decoded: AtomicU64,

    /// 解码失败的消息数
    pub decode_errors: AtomicU64,

    /// 因主题无法解析而跳过的消息数
    pub topics_skipped: AtomicU64,

    /// 发出的数据事件数
    pub events_emitted: AtomicU64,

    /// 因无人订阅而抑制的数据事件数
    pub events_suppressed: AtomicU64,

    /// 写入历史库成功的记录数
    pub records_saved: AtomicU64,

    /// 写入历史库失败（含队列满）的记录数
    pub record_failures: AtomicU64,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指标快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            topics_skipped: self.topics_skipped.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            events_suppressed: self.events_suppressed.load(Ordering::Relaxed),
            records_saved: self.records_saved.load(Ordering::Relaxed),
            record_failures: self.record_failures.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.messages_received.store(0, Ordering::Relaxed);
        self.messages_dropped.store(0, Ordering::Relaxed);
        self.batches_processed.store(0, Ordering::Relaxed);
        self.frames_decoded.store(0, Ordering::Relaxed);
        self.decode_errors.store(0, Ordering::Relaxed);
        self.topics_skipped.store(0, Ordering::Relaxed);
        self.events_emitted.store(0, Ordering::Relaxed);
        self.events_suppressed.store(0, Ordering::Relaxed);
        self.records_saved.store(0, Ordering::Relaxed);
        self.record_failures.store(0, Ordering::Relaxed);
    }
}

/// 指标快照（不可变，用于读取）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub batches_processed: u64,
    pub frames_decoded: u64,
    pub decode_errors: u64,
    pub topics_skipped: u64,
    pub events_emitted: u64,
    pub events_suppressed: u64,
    pub records_saved: u64,
    pub record_failures: u64,
}

impl MetricsSnapshot {
    /// 解码失败率（百分比），没有消息时为 0
    pub fn decode_error_rate(&self) -> f64 {
        let attempts = self.frames_decoded + self.decode_errors;
        if attempts == 0 {
            return 0.0;
        }
        (self.decode_errors as f64 / attempts as f64) * 100.0
    }

    /// 丢弃率（百分比），没有消息时为 0
    pub fn drop_rate(&self) -> f64 {
        if self.messages_received == 0 {
            return 0.0;
        }
        (self.messages_dropped as f64 / self.messages_received as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_metrics_default() {
        let snapshot = IngestMetrics::new().snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
        assert_eq!(snapshot.decode_error_rate(), 0.0);
        assert_eq!(snapshot.drop_rate(), 0.0);
    }

    #[test]
    fn test_metrics_rates() {
        let metrics = IngestMetrics::new();
        metrics.frames_decoded.fetch_add(3, Ordering::Relaxed);
        metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
        metrics.messages_received.fetch_add(10, Ordering::Relaxed);
        metrics.messages_dropped.fetch_add(5, Ordering::Relaxed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.decode_error_rate(), 25.0);
        assert_eq!(snapshot.drop_rate(), 50.0);
    }

    #[test]
    fn test_metrics_reset() {
        let metrics = IngestMetrics::new();
        metrics.events_emitted.fetch_add(100, Ordering::Relaxed);
        metrics.records_saved.fetch_add(7, Ordering::Relaxed);
        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_metrics_concurrent_updates() {
        let metrics = Arc::new(IngestMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let metrics = metrics.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.snapshot().messages_received, 4000);
    }
}
