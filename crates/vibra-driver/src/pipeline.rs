//! 批处理循环
//!
//! 批处理线程独占解码、持久化和分发的全部状态。每个周期：
//!
//! 1. 在 `batch_interval` 内从入口队列收集消息（短超时轮询，及时响应停止信号）
//! 2. 按主题分组（保持主题首次出现的顺序），每个主题只解析一次拓扑
//! 3. 按到达顺序逐条解码，失败只跳过该条
//! 4. 每帧先经过持久化闸门，再交给分发路由

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, info, trace, warn};
use vibra_bus::RawMessage;
use vibra_protocol::Frame;

use crate::context::IngestContext;
use crate::dispatch::DispatchRouter;
use crate::events::PipelineEvent;
use crate::queue::IngressReceiver;
use crate::recording::PersistenceGate;
use crate::topology::{Resolver, Topology};

/// Pipeline 配置
///
/// # Example
///
/// ```
/// use vibra_driver::PipelineConfig;
///
/// // 默认：50ms 批次，10ms 轮询超时
/// let config = PipelineConfig::default();
/// assert_eq!(config.batch_interval_ms, 50);
///
/// let config = PipelineConfig {
///     batch_interval_ms: 20,
///     queue_capacity: 1_000,
///     ..PipelineConfig::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// 批次时间窗口（毫秒）
    pub batch_interval_ms: u64,
    /// 单次轮询超时（毫秒），决定停止信号的响应延迟
    pub poll_timeout_ms: u64,
    /// 入口队列容量，满时丢弃最旧消息
    pub queue_capacity: usize,
    /// 重连间隔（毫秒）
    pub reconnect_interval_ms: u64,
    /// 写入线程队列容量
    pub persistence_queue_capacity: usize,
    /// 是否按活跃订阅过滤数据事件
    pub filter_inactive_features: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_interval_ms: 50,
            poll_timeout_ms: 10,
            queue_capacity: 10_000,
            reconnect_interval_ms: 2_000,
            persistence_queue_capacity: 1_024,
            filter_inactive_features: false,
        }
    }
}

impl PipelineConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

/// 一个批次的处理结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub messages: usize,
    pub frames: usize,
    pub decode_errors: usize,
    /// 因主题无法解析而跳过的消息数
    pub skipped: usize,
    pub events: usize,
    pub suppressed: usize,
}

/// 批处理器
pub struct BatchProcessor {
    resolver: Resolver,
    router: DispatchRouter,
    gate: Option<PersistenceGate>,
    ctx: Arc<IngestContext>,
    filter_inactive: bool,
}

impl BatchProcessor {
    /// `gate = None` 时不做持久化
    pub fn new(
        resolver: Resolver,
        router: DispatchRouter,
        gate: Option<PersistenceGate>,
        ctx: Arc<IngestContext>,
        filter_inactive: bool,
    ) -> Self {
        Self {
            resolver,
            router,
            gate,
            ctx,
            filter_inactive,
        }
    }

    pub fn router(&self) -> &DispatchRouter {
        &self.router
    }

    /// 处理一个批次
    pub fn process_batch(&mut self, batch: Vec<RawMessage>) -> BatchSummary {
        let mut summary = BatchSummary {
            messages: batch.len(),
            ..BatchSummary::default()
        };
        if batch.is_empty() {
            return summary;
        }

        self.resolver.begin_cycle();

        for (topic, messages) in group_by_topic(batch) {
            let topology = match self.resolver.resolve(&topic) {
                Ok(topology) => topology,
                Err(e) => {
                    warn!("Skipping {} message(s) on '{}': {}", messages.len(), topic, e);
                    summary.skipped += messages.len();
                    continue;
                },
            };

            for message in messages {
                let fallback = topology.channel_count.get();
                let frame = match vibra_protocol::decode(&message.payload, fallback) {
                    Ok(frame) => Arc::new(frame),
                    Err(e) => {
                        warn!(
                            "Failed to decode {} byte message on '{}': {}",
                            message.payload.len(),
                            topic,
                            e
                        );
                        summary.decode_errors += 1;
                        continue;
                    },
                };
                summary.frames += 1;
                self.handle_frame(&frame, &topology, &mut summary);
            }
        }

        let metrics = &self.ctx.metrics;
        metrics.batches_processed.fetch_add(1, Ordering::Relaxed);
        metrics.frames_decoded.fetch_add(summary.frames as u64, Ordering::Relaxed);
        metrics.decode_errors.fetch_add(summary.decode_errors as u64, Ordering::Relaxed);
        metrics.topics_skipped.fetch_add(summary.skipped as u64, Ordering::Relaxed);
        metrics.events_emitted.fetch_add(summary.events as u64, Ordering::Relaxed);
        metrics.events_suppressed.fetch_add(summary.suppressed as u64, Ordering::Relaxed);

        trace!("Batch processed: {:?}", summary);
        summary
    }

    fn handle_frame(
        &mut self,
        frame: &Arc<Frame>,
        topology: &Topology,
        summary: &mut BatchSummary,
    ) {
        if let Some(gate) = &self.gate {
            gate.maybe_persist(frame, topology);
        }

        let active = self.filter_inactive.then_some(&self.ctx.active);
        let outcome = self.router.dispatch(frame, topology, active);
        summary.events += outcome.events.len();
        summary.suppressed += outcome.suppressed;

        for event in outcome.events {
            self.ctx.emit(&PipelineEvent::Data(event));
        }
    }
}

/// 按主题分组，主题顺序为首次出现顺序，主题内保持到达顺序
fn group_by_topic(batch: Vec<RawMessage>) -> Vec<(String, Vec<RawMessage>)> {
    let mut groups: Vec<(String, Vec<RawMessage>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for message in batch {
        match index.get(&message.topic) {
            Some(&i) => groups[i].1.push(message),
            None => {
                index.insert(message.topic.clone(), groups.len());
                groups.push((message.topic.clone(), vec![message]));
            },
        }
    }
    groups
}

/// 批处理线程循环
///
/// 停止信号在每个批次开始和每次轮询后检查，退出延迟不超过
/// `batch_interval + poll_timeout`。已收集的消息在退出前处理完。
pub fn batch_loop(
    receiver: IngressReceiver,
    mut processor: BatchProcessor,
    config: PipelineConfig,
    is_running: Arc<AtomicBool>,
) {
    info!("Batch processor started");
    let batch_interval = config.batch_interval();
    let poll_timeout = config.poll_timeout();

    loop {
        // Acquire: 看到 false 时也能看到停止前的所有写入
        if !is_running.load(Ordering::Acquire) {
            trace!("Batch thread: is_running flag is false, exiting");
            break;
        }

        let deadline = Instant::now() + batch_interval;
        let mut batch = Vec::new();
        let mut closed = false;

        loop {
            let now = Instant::now();
            if now >= deadline || !is_running.load(Ordering::Acquire) {
                break;
            }
            match receiver.recv_timeout(poll_timeout.min(deadline - now)) {
                Ok(message) => {
                    batch.push(message);
                    while let Some(message) = receiver.try_recv() {
                        batch.push(message);
                    }
                },
                Err(RecvTimeoutError::Timeout) => {},
                Err(RecvTimeoutError::Disconnected) => {
                    closed = true;
                    break;
                },
            }
        }

        if !batch.is_empty() {
            processor.process_batch(batch);
        }
        if closed {
            debug!("Ingress queue closed, batch processor exiting");
            break;
        }
    }
    info!("Batch processor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{FeatureBinding, ShapePolicy};
    use crate::events::{ChannelSink, EventSink};
    use crate::metrics::IngestMetrics;
    use crate::queue::ingress_queue;
    use crate::recording::MemoryHistoryStore;
    use crate::topology::InMemoryProjects;
    use vibra_protocol::encode_binary;
    use vibra_tools::{ModelConfig, ProjectData};

    fn payload(index: u32) -> Vec<u8> {
        let main: Vec<Vec<u16>> = (0..4).map(|c| vec![c as u16; 2]).collect();
        encode_binary(index, 1000, &main, &[vec![7, 7], vec![0, 1]]).unwrap()
    }

    fn processor(ctx: Arc<IngestContext>, store: Option<Arc<MemoryHistoryStore>>) -> BatchProcessor {
        let projects = InMemoryProjects::new();
        projects.upsert(
            ProjectData::new("Plant-1")
                .with_model(ModelConfig::new("ModelA", "sensors/a"))
                .with_model(ModelConfig::new("ModelB", "sensors/b")),
        );
        let resolver = Resolver::new(Arc::new(projects), "Plant-1");
        let router = DispatchRouter::new(vec![
            FeatureBinding::new("Tabular View", &["TabularView"], ShapePolicy::WholeFrame),
            FeatureBinding::new("FFT", &["FFT"], ShapePolicy::PerChannel),
        ]);
        let gate = store.map(|s| PersistenceGate::inline(s, ctx.clone()));
        BatchProcessor::new(resolver, router, gate, ctx, false)
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.batch_interval(), Duration::from_millis(50));
        assert_eq!(config.poll_timeout(), Duration::from_millis(10));
        assert_eq!(config.queue_capacity, 10_000);
        assert!(!config.filter_inactive_features);
    }

    #[test]
    fn test_group_by_topic_keeps_order() {
        let batch = vec![
            RawMessage::new("b", vec![1]),
            RawMessage::new("a", vec![2]),
            RawMessage::new("b", vec![3]),
        ];
        let groups = group_by_topic(batch);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "b");
        let payloads: Vec<u8> = groups[0].1.iter().map(|m| m.payload[0]).collect();
        assert_eq!(payloads, vec![1, 3]);
    }

    #[test]
    fn test_bad_topic_does_not_block_others() {
        let ctx = Arc::new(IngestContext::new());
        let mut processor = processor(ctx.clone(), None);
        let summary = processor.process_batch(vec![
            RawMessage::new("sensors/unknown", payload(1)),
            RawMessage::new("sensors/a", payload(2)),
        ]);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.frames, 1);
        assert_eq!(summary.events, 1 + 4);
        assert_eq!(ctx.metrics.snapshot().topics_skipped, 1);
    }

    #[test]
    fn test_decode_failure_skips_single_message() {
        let ctx = Arc::new(IngestContext::new());
        let (sink, rx) = ChannelSink::new(64);
        ctx.hub.write().add_sink(Arc::new(sink) as Arc<dyn EventSink>);
        let mut processor = processor(ctx.clone(), None);

        let summary = processor.process_batch(vec![
            RawMessage::new("sensors/a", payload(1)),
            RawMessage::new("sensors/a", vec![0u8; 7]),
            RawMessage::new("sensors/a", payload(3)),
        ]);
        assert_eq!(summary.decode_errors, 1);
        assert_eq!(summary.frames, 2);

        let indices: Vec<u32> = rx
            .try_iter()
            .filter_map(|e| match e {
                PipelineEvent::Data(event) if event.feature == "Tabular View" => Some(event.frame_index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![1, 3]);
    }

    #[test]
    fn test_persist_before_dispatch() {
        let ctx = Arc::new(IngestContext::new());
        let store = Arc::new(MemoryHistoryStore::new());
        let mut processor = processor(ctx.clone(), Some(store.clone()));
        ctx.saving.start("ModelA", "data7");

        processor.process_batch(vec![
            RawMessage::new("sensors/a", payload(1)),
            RawMessage::new("sensors/b", payload(1)),
        ]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].model, "ModelA");
    }

    #[test]
    fn test_filter_inactive_features() {
        let ctx = Arc::new(IngestContext::new());
        let mut processor = processor(ctx.clone(), None);
        processor.filter_inactive = true;
        ctx.active.add("FFT", "ModelA", Some("Channel 2"));

        let summary = processor.process_batch(vec![RawMessage::new("sensors/a", payload(1))]);
        assert_eq!(summary.events, 1);
        assert_eq!(summary.suppressed, 1 + 3);
    }

    #[test]
    fn test_batch_loop_stops_on_flag() {
        let metrics = Arc::new(IngestMetrics::new());
        let (tx, rx) = ingress_queue(16, metrics);
        let ctx = Arc::new(IngestContext::new());
        let is_running = Arc::new(AtomicBool::new(true));
        let config = PipelineConfig {
            batch_interval_ms: 20,
            poll_timeout_ms: 5,
            ..PipelineConfig::default()
        };

        let processor = processor(ctx.clone(), None);
        let flag = is_running.clone();
        let handle = std::thread::spawn(move || batch_loop(rx, processor, config, flag));

        tx.push(RawMessage::new("sensors/a", payload(1))).unwrap();
        let start = Instant::now();
        while ctx.metrics.snapshot().frames_decoded == 0 && start.elapsed() < Duration::from_secs(2) {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(ctx.metrics.snapshot().frames_decoded, 1);

        is_running.store(false, Ordering::Release);
        let stop = Instant::now();
        handle.join().unwrap();
        assert!(stop.elapsed() < Duration::from_millis(500));
    }
}
