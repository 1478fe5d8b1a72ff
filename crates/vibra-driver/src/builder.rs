//! Builder 模式实现
//!
//! 提供链式构造 [`Ingestor`] 实例的便捷方式。

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tracing::info;
use vibra_bus::BusClient;

use crate::context::IngestContext;
use crate::dispatch::{DispatchRouter, FeatureBinding};
use crate::error::DriverError;
use crate::events::EventSink;
use crate::ingestor::Ingestor;
use crate::pipeline::{BatchProcessor, PipelineConfig, batch_loop};
use crate::queue::ingress_queue;
use crate::recording::{HistoryStore, PersistenceGate};
use crate::supervisor::Supervisor;
use crate::topology::{ProjectSource, Resolver};

/// Ingestor Builder（链式构造）
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use vibra_driver::{InMemoryProjects, IngestorBuilder, MemoryHistoryStore, PipelineConfig};
/// use vibra_bus::MockBus;
///
/// let (bus, _handle) = MockBus::new();
/// let ingestor = IngestorBuilder::new(Arc::new(InMemoryProjects::new()), "Plant-1")
///     .config(PipelineConfig { batch_interval_ms: 20, ..PipelineConfig::default() })
///     .history_store(Arc::new(MemoryHistoryStore::new()))
///     .bus(bus)
///     .build()
///     .unwrap();
/// ingestor.shutdown();
/// ```
pub struct IngestorBuilder {
    projects: Arc<dyn ProjectSource>,
    project: String,
    config: PipelineConfig,
    bindings: Vec<FeatureBinding>,
    history_store: Option<Arc<dyn HistoryStore>>,
    inline_persistence: bool,
    sinks: Vec<Arc<dyn EventSink>>,
    bus: Option<Box<dyn BusClient>>,
}

impl IngestorBuilder {
    /// `project` 为当前活跃项目
    pub fn new(projects: Arc<dyn ProjectSource>, project: impl Into<String>) -> Self {
        Self {
            projects,
            project: project.into(),
            config: PipelineConfig::default(),
            bindings: FeatureBinding::defaults(),
            history_store: None,
            inline_persistence: false,
            sinks: Vec::new(),
            bus: None,
        }
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// 替换默认功能表
    pub fn bindings(mut self, bindings: Vec<FeatureBinding>) -> Self {
        self.bindings = bindings;
        self
    }

    /// 设置历史库（未设置时不做持久化）
    pub fn history_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history_store = Some(store);
        self
    }

    /// 在批处理线程上同步写入，不启动写入线程
    pub fn inline_persistence(mut self, inline: bool) -> Self {
        self.inline_persistence = inline;
        self
    }

    /// 预先注册事件接收者（在第一条消息之前生效）
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// 设置总线（未设置时只能通过 [`Ingestor::enqueue`] 输入）
    pub fn bus<B: BusClient + 'static>(mut self, bus: B) -> Self {
        self.bus = Some(Box::new(bus));
        self
    }

    fn validate(&self) -> Result<(), DriverError> {
        let config = &self.config;
        if config.batch_interval_ms == 0 {
            return Err(DriverError::InvalidConfig("batch_interval_ms must be > 0".to_string()));
        }
        if config.queue_capacity == 0 {
            return Err(DriverError::InvalidConfig("queue_capacity must be > 0".to_string()));
        }
        if self.history_store.is_some()
            && !self.inline_persistence
            && config.persistence_queue_capacity == 0
        {
            return Err(DriverError::InvalidConfig(
                "persistence_queue_capacity must be > 0".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for binding in &self.bindings {
            if binding.feature.trim().is_empty() {
                return Err(DriverError::InvalidConfig("feature name must not be empty".to_string()));
            }
            if !seen.insert(binding.feature.as_str()) {
                return Err(DriverError::InvalidConfig(format!(
                    "duplicate feature binding: {}",
                    binding.feature
                )));
            }
        }
        Ok(())
    }

    /// 启动线程并返回 [`Ingestor`]
    pub fn build(self) -> Result<Ingestor, DriverError> {
        self.validate()?;

        let ctx = Arc::new(IngestContext::new());
        for sink in self.sinks {
            ctx.hub.write().add_sink(sink);
        }

        let (sender, receiver) = ingress_queue(self.config.queue_capacity, ctx.metrics.clone());
        let is_running = Arc::new(AtomicBool::new(true));

        let (gate, writer_thread) = match self.history_store {
            None => (None, None),
            Some(store) if self.inline_persistence => {
                (Some(PersistenceGate::inline(store, ctx.clone())), None)
            },
            Some(store) => {
                let (gate, handle) = PersistenceGate::background(
                    store,
                    self.config.persistence_queue_capacity,
                    ctx.clone(),
                )?;
                (Some(gate), Some(handle))
            },
        };

        let processor = BatchProcessor::new(
            Resolver::new(self.projects.clone(), self.project.clone()),
            DispatchRouter::new(self.bindings),
            gate,
            ctx.clone(),
            self.config.filter_inactive_features,
        );
        let batch_thread = {
            let config = self.config.clone();
            let is_running = is_running.clone();
            std::thread::Builder::new()
                .name("vibra-batch".to_string())
                .spawn(move || batch_loop(receiver, processor, config, is_running))?
        };

        let persistence = match (&writer_thread, self.inline_persistence) {
            (Some(_), _) => "background",
            (None, true) => "inline",
            (None, false) => "off",
        };
        // 先持有已启动的线程；监督线程启动失败时由 Ingestor 负责停止它们
        let mut ingestor = Ingestor::from_parts(
            ctx.clone(),
            sender.clone(),
            None,
            batch_thread,
            writer_thread,
            is_running.clone(),
        );

        let has_bus = self.bus.is_some();
        if let Some(bus) = self.bus {
            let supervisor = Supervisor {
                bus,
                sender,
                projects: self.projects,
                project: self.project.clone(),
                ctx,
                config: self.config.clone(),
            };
            let spawned = std::thread::Builder::new()
                .name("vibra-supervisor".to_string())
                .spawn(move || supervisor.run(is_running));
            ingestor.attach_supervisor(spawned)?;
        }

        info!(
            "Ingestor started for project '{}' (bus: {}, persistence: {})",
            self.project, has_bus, persistence
        );
        Ok(ingestor)
    }
}
