//! Vibra SDK - 振动监测数据采集 Rust SDK
//!
//! 从消息总线接收 DAQ 设备上报的振动数据，解码为类型化的帧，按需写入历史库，
//! 并以事件的形式分发给各个分析视图。
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **协议层** (`protocol`): 载荷解码（二进制 / JSON）与通道布局
//! - **总线层** (`bus`): 消息总线抽象，内存实现与 MQTT 后端
//! - **工具层** (`tools`): 项目配置、历史记录、标定换算
//! - **驱动层** (`driver`): 入口队列、批处理线程、持久化与分发
//!
//! # 快速开始
//!
//! ```rust
//! use std::sync::Arc;
//! use vibra_sdk::prelude::*;
//!
//! let projects = InMemoryProjects::new();
//! projects.upsert(ProjectData::new("Plant-1").with_model(ModelConfig::new("ModelA", "sensors/a")));
//!
//! let ingestor = IngestorBuilder::new(Arc::new(projects), "Plant-1").build().unwrap();
//! let events = ingestor.subscribe(256);
//! # drop(events);
//! ingestor.shutdown();
//! ```

mod logging;
pub mod prelude;

pub use vibra_bus as bus;
pub use vibra_driver as driver;
pub use vibra_protocol as protocol;
pub use vibra_tools as tools;

pub use logging::{DEFAULT_LOG_FILTER, init_logger, init_logger_with};

// 常用类型
pub use vibra_driver::{DriverError, Ingestor, IngestorBuilder, PipelineConfig, PipelineEvent};
pub use vibra_protocol::{DecodeError, Frame};
