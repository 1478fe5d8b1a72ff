//! 采集运行时
//!
//! 本 crate 把总线上的振动数据变成类型化的事件，包括：
//! - 连接监督线程（连接、重连、订阅）
//! - 有界入口队列（满时丢弃最旧消息）
//! - 批处理线程：主题解析、解码、持久化、分发
//! - 事件输出（连接状态、保存结果、数据事件）
//!
//! # 使用场景
//!
//! 大多数用户应该通过 `vibra-sdk` 使用本 crate，从 [`IngestorBuilder`] 开始。

pub mod active;
mod builder;
pub mod context;
pub mod dispatch;
mod error;
pub mod events;
mod ingestor;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod recording;
pub mod saving;
pub mod supervisor;
pub mod topology;

pub use active::{ActiveFeature, ActiveFeatureSet};
pub use builder::IngestorBuilder;
pub use context::IngestContext;
pub use dispatch::{
    DispatchEvent, DispatchOutcome, DispatchRouter, EventValues, FeatureBinding, ShapePolicy,
};
pub use error::{DriverError, PersistenceError, ResolutionError};
pub use events::{ChannelSink, EventHub, EventSink, PipelineEvent};
pub use ingestor::Ingestor;
pub use metrics::{IngestMetrics, MetricsSnapshot};
pub use pipeline::{BatchProcessor, BatchSummary, PipelineConfig, batch_loop};
pub use queue::{IngressReceiver, IngressSender, ingress_queue};
pub use recording::{HistoryStore, MemoryHistoryStore, PersistOutcome, PersistenceGate, StoredRecord};
pub use saving::SavingState;
pub use supervisor::{STATUS_CONNECTED, STATUS_DISCONNECTED, Supervisor};
pub use topology::{InMemoryProjects, ProjectSource, Resolver, Topology, subscription_topics};
