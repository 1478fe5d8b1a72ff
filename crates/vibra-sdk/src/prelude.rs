//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use vibra_sdk::prelude::*;
//! ```

// 驱动层
pub use vibra_driver::{
    DispatchEvent, EventSink, EventValues, FeatureBinding, InMemoryProjects, Ingestor,
    IngestorBuilder, MemoryHistoryStore, MetricsSnapshot, PipelineConfig, PipelineEvent,
    ProjectSource, ShapePolicy,
};

// 总线
pub use vibra_bus::{BusClient, BusEndpoint, MockBus};
#[cfg(feature = "mqtt")]
pub use vibra_bus::MqttBus;

// 协议与配置
pub use vibra_protocol::{ChannelCount, Frame, decode};
pub use vibra_tools::{
    ChannelConfig, ChannelCountToken, JsonLinesHistoryStore, ModelConfig, ProjectCatalog,
    ProjectData,
};

// 错误类型
pub use vibra_bus::BusError;
pub use vibra_driver::DriverError;
pub use vibra_protocol::DecodeError;
