//! # Vibra Tools - 共享数据结构和算法
//!
//! **依赖原则**: 只依赖 `vibra-protocol`，不引入线程、总线或运行时依赖
//!
//! ## 包含模块
//!
//! - `project` - 项目配置（TOML 文件模型，只读）
//! - `history` - 历史记录格式与 JSON-lines 文件历史库
//! - `calibration` - 信号标定（纯函数）

pub mod calibration;
pub mod history;
pub mod project;

// 重新导出常用类型
pub use history::{HistoryRecord, JsonLinesHistoryStore};
pub use project::{ChannelConfig, ChannelCountToken, ModelConfig, ProjectCatalog, ProjectData};
