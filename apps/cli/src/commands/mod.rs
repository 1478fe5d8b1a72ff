//! 命令定义和实现

pub mod decode;
pub mod listen;
pub mod project;
pub mod replay;

pub use decode::DecodeCommand;
pub use listen::ListenCommand;
pub use project::ProjectCommand;
pub use replay::ReplayCommand;

use clap::Args;
use vibra_sdk::PipelineConfig;

/// 管线调优参数（replay / listen 共用）
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// 批次时间窗口（毫秒）
    #[arg(long, default_value_t = 50)]
    pub batch_interval_ms: u64,

    /// 入口队列容量
    #[arg(long, default_value_t = 10_000)]
    pub queue_capacity: usize,
}

impl PipelineArgs {
    pub fn to_config(&self) -> PipelineConfig {
        PipelineConfig {
            batch_interval_ms: self.batch_interval_ms,
            queue_capacity: self.queue_capacity,
            ..PipelineConfig::default()
        }
    }
}
