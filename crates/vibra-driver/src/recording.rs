//! 持久化闸门（Persistence Gate）
//!
//! 型号处于保存状态时，把帧展平为 [`HistoryRecord`] 写入历史库，并以 `save_status`
//! 上报结果。写入失败只上报，不影响分发。
//!
//! 两种模式：
//!
//! - **Inline**: 在批处理线程上同步写入（测试 / 快速存储）
//! - **Background**: 记录在批处理线程上构造，经有界通道交给独立写入线程；
//!   通道满时丢弃该记录并上报，批处理线程不会被慢存储拖住
//!
//! ```text
//! batch thread ──maybe_persist──► [bounded(N)] ──► writer thread ──► HistoryStore
//! ```

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use vibra_protocol::Frame;
use vibra_tools::{HistoryRecord, JsonLinesHistoryStore};

use crate::context::IngestContext;
use crate::error::PersistenceError;
use crate::topology::Topology;

/// 历史库
pub trait HistoryStore: Send + Sync {
    fn save_record(
        &self,
        project: &str,
        model: &str,
        record: &HistoryRecord,
    ) -> Result<(), PersistenceError>;
}

impl<T: HistoryStore + ?Sized> HistoryStore for Arc<T> {
    fn save_record(
        &self,
        project: &str,
        model: &str,
        record: &HistoryRecord,
    ) -> Result<(), PersistenceError> {
        (**self).save_record(project, model, record)
    }
}

impl HistoryStore for JsonLinesHistoryStore {
    fn save_record(
        &self,
        project: &str,
        model: &str,
        record: &HistoryRecord,
    ) -> Result<(), PersistenceError> {
        self.append(project, model, record)
            .map_err(|e| PersistenceError::Store(format!("{e:#}")))
    }
}

/// 已保存的一条记录（内存历史库）
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub project: String,
    pub model: String,
    pub record: HistoryRecord,
}

/// 内存历史库（回放 / 测试）
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: Mutex<Vec<StoredRecord>>,
    failure: Mutex<Option<String>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后的写入都以 `message` 失败；`None` 恢复正常
    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.lock() = message.map(str::to_string);
    }

    pub fn records(&self) -> Vec<StoredRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn save_record(
        &self,
        project: &str,
        model: &str,
        record: &HistoryRecord,
    ) -> Result<(), PersistenceError> {
        if let Some(message) = self.failure.lock().clone() {
            return Err(PersistenceError::Store(message));
        }
        self.records.lock().push(StoredRecord {
            project: project.to_string(),
            model: model.to_string(),
            record: record.clone(),
        });
        Ok(())
    }
}

/// 一次持久化尝试的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// 该型号未处于保存状态
    NotSaving,
    /// 已同步写入
    Saved,
    /// 已交给写入线程
    Queued,
    Failed(PersistenceError),
}

struct PersistJob {
    project: String,
    model: String,
    record: HistoryRecord,
}

enum GateMode {
    Inline(Arc<dyn HistoryStore>),
    Background {
        tx: Sender<PersistJob>,
        capacity: usize,
    },
}

/// 持久化闸门（批处理线程独占）
pub struct PersistenceGate {
    mode: GateMode,
    ctx: Arc<IngestContext>,
}

impl PersistenceGate {
    /// 同步写入
    pub fn inline(store: Arc<dyn HistoryStore>, ctx: Arc<IngestContext>) -> Self {
        Self {
            mode: GateMode::Inline(store),
            ctx,
        }
    }

    /// 独立写入线程
    ///
    /// 闸门被 drop 后通道关闭，写入线程处理完剩余记录后退出。
    pub fn background(
        store: Arc<dyn HistoryStore>,
        capacity: usize,
        ctx: Arc<IngestContext>,
    ) -> std::io::Result<(Self, JoinHandle<()>)> {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        let writer_ctx = ctx.clone();
        let handle = std::thread::Builder::new()
            .name("vibra-writer".to_string())
            .spawn(move || writer_loop(rx, store, writer_ctx))?;
        Ok((
            Self {
                mode: GateMode::Background { tx, capacity },
                ctx,
            },
            handle,
        ))
    }

    /// 型号处于保存状态时写入一帧
    pub fn maybe_persist(&self, frame: &Frame, topology: &Topology) -> PersistOutcome {
        let Some(filename) = self.ctx.saving.filename_for(&topology.model) else {
            return PersistOutcome::NotSaving;
        };
        let record = HistoryRecord::from_frame(frame, &topology.tag_name, &filename);

        match &self.mode {
            GateMode::Inline(store) => {
                let written = write_record(
                    store.as_ref(),
                    &self.ctx,
                    &topology.project,
                    &topology.model,
                    &record,
                );
                match written {
                    Ok(()) => PersistOutcome::Saved,
                    Err(e) => PersistOutcome::Failed(e),
                }
            },
            GateMode::Background { tx, capacity } => {
                let job = PersistJob {
                    project: topology.project.clone(),
                    model: topology.model.clone(),
                    record,
                };
                match tx.try_send(job) {
                    Ok(()) => PersistOutcome::Queued,
                    Err(TrySendError::Full(job)) => {
                        let err = PersistenceError::QueueFull(*capacity);
                        warn!("{}, dropping frame {}", err, job.record.frame_index);
                        self.report_failure(&err);
                        PersistOutcome::Failed(err)
                    },
                    Err(TrySendError::Disconnected(_)) => {
                        let err = PersistenceError::WriterStopped;
                        error!("{}", err);
                        self.report_failure(&err);
                        PersistOutcome::Failed(err)
                    },
                }
            },
        }
    }

    fn report_failure(&self, err: &PersistenceError) {
        self.ctx.metrics.record_failures.fetch_add(1, Ordering::Relaxed);
        self.ctx.save_status(format!("Failed to save history message: {err}"));
    }
}

/// 写入一条记录并上报结果
fn write_record(
    store: &dyn HistoryStore,
    ctx: &IngestContext,
    project: &str,
    model: &str,
    record: &HistoryRecord,
) -> Result<(), PersistenceError> {
    match store.save_record(project, model, record) {
        Ok(()) => {
            ctx.metrics.records_saved.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Saved data to {}, frame {} ({}/{})",
                record.filename, record.frame_index, project, model
            );
            ctx.save_status(format!(
                "Saved data to {}, frame {}",
                record.filename, record.frame_index
            ));
            Ok(())
        },
        Err(e) => {
            ctx.metrics.record_failures.fetch_add(1, Ordering::Relaxed);
            error!("Failed to save history message: {}", e);
            ctx.save_status(format!("Failed to save history message: {e}"));
            Err(e)
        },
    }
}

fn writer_loop(rx: Receiver<PersistJob>, store: Arc<dyn HistoryStore>, ctx: Arc<IngestContext>) {
    info!("Persistence writer started");
    while let Ok(job) = rx.recv() {
        let _ = write_record(store.as_ref(), &ctx, &job.project, &job.model, &job.record);
    }
    info!("Persistence writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelSink, EventSink, PipelineEvent};
    use vibra_protocol::ChannelCount;

    fn topology() -> Topology {
        Topology {
            project: "Plant-1".to_string(),
            model: "ModelA".to_string(),
            tag_name: "sensors/a".to_string(),
            channel_count: ChannelCount::Four,
            channel_names: Vec::new(),
        }
    }

    fn frame() -> Frame {
        let main = (0..4).map(|c| vec![c as f64; 3]).collect();
        Frame::new(5, 1000.0, main, vec![vec![60.0; 3], vec![1.0; 3]]).unwrap()
    }

    #[test]
    fn test_not_saving_is_noop() {
        let store = Arc::new(MemoryHistoryStore::new());
        let ctx = Arc::new(IngestContext::new());
        let gate = PersistenceGate::inline(store.clone(), ctx);
        assert_eq!(gate.maybe_persist(&frame(), &topology()), PersistOutcome::NotSaving);
        assert!(store.is_empty());
    }

    #[test]
    fn test_inline_save_flattens_frame() {
        let store = Arc::new(MemoryHistoryStore::new());
        let ctx = Arc::new(IngestContext::new());
        let (sink, rx) = ChannelSink::new(8);
        ctx.hub.write().add_sink(Arc::new(sink) as Arc<dyn EventSink>);
        ctx.saving.start("ModelA", "data7");

        let gate = PersistenceGate::inline(store.clone(), ctx.clone());
        assert_eq!(gate.maybe_persist(&frame(), &topology()), PersistOutcome::Saved);

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].project, "Plant-1");
        assert_eq!(records[0].record.filename, "data7");
        assert_eq!(records[0].record.topic, "sensors/a");
        assert_eq!(records[0].record.message.len(), 4 * 3 + 3 * 2);
        assert_eq!(ctx.metrics.snapshot().records_saved, 1);

        match rx.try_recv().unwrap() {
            PipelineEvent::SaveStatus(text) => assert_eq!(text, "Saved data to data7, frame 5"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_store_failure_reported_not_fatal() {
        let store = Arc::new(MemoryHistoryStore::new());
        store.set_failure(Some("disk full"));
        let ctx = Arc::new(IngestContext::new());
        let (sink, rx) = ChannelSink::new(8);
        ctx.hub.write().add_sink(Arc::new(sink) as Arc<dyn EventSink>);
        ctx.saving.start("ModelA", "data7");

        let gate = PersistenceGate::inline(store.clone(), ctx.clone());
        assert_eq!(
            gate.maybe_persist(&frame(), &topology()),
            PersistOutcome::Failed(PersistenceError::Store("disk full".to_string()))
        );
        assert_eq!(ctx.metrics.snapshot().record_failures, 1);
        match rx.try_recv().unwrap() {
            PipelineEvent::SaveStatus(text) => {
                assert_eq!(text, "Failed to save history message: disk full")
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_background_writer_drains_on_drop() {
        let store = Arc::new(MemoryHistoryStore::new());
        let ctx = Arc::new(IngestContext::new());
        ctx.saving.start("ModelA", "data1");

        let (gate, handle) = PersistenceGate::background(store.clone(), 16, ctx.clone()).unwrap();
        for _ in 0..3 {
            assert_eq!(gate.maybe_persist(&frame(), &topology()), PersistOutcome::Queued);
        }
        drop(gate);
        handle.join().unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(ctx.metrics.snapshot().records_saved, 3);
    }

    #[test]
    fn test_json_lines_store_adapter() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesHistoryStore::new(dir.path());
        let record = HistoryRecord::from_frame(&frame(), "sensors/a", "data2");
        store.save_record("Plant-1", "ModelA", &record).unwrap();
        assert_eq!(store.read_records("Plant-1", "ModelA", "data2").unwrap().len(), 1);
    }
}
