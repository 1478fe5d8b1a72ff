//! 驱动层错误类型定义

use thiserror::Error;
use vibra_bus::BusError;
use vibra_protocol::DecodeError;

/// 主题解析错误（按主题、按批次恢复）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// 当前项目中没有型号声明该 tag
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// 项目配置的通道数无法识别（可恢复：回退到 4 通道）
    #[error("Invalid channel count '{token}' for project '{project}'")]
    InvalidChannelCount { project: String, token: String },

    /// 项目配置不可用
    #[error("Project '{0}' not found")]
    ProjectUnavailable(String),
}

/// 持久化错误（以 save_status 上报，不影响分发）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// 历史库写入失败
    #[error("{0}")]
    Store(String),

    /// 写入队列已满
    #[error("Persistence queue full (capacity: {0})")]
    QueueFull(usize),

    /// 写入线程已退出
    #[error("Persistence writer stopped")]
    WriterStopped,
}

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 载荷解码错误
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// 总线错误
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// 主题解析错误
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    /// 持久化错误
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// 入口队列已关闭（批处理线程退出）
    #[error("Ingress queue closed")]
    QueueClosed,

    /// 线程创建失败
    #[error("Failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// 无效配置
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
