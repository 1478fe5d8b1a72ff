//! # Vibra Bus Adapter Layer
//!
//! 发布/订阅消息总线抽象层，提供统一的总线客户端接口。
//!
//! - [`mock::MockBus`]: 内存实现，用于测试与离线回放
//! - `mqtt::MqttBus`: 基于 rumqttc 的 MQTT 客户端（需要 `mqtt` feature）
//!
//! 客户端只负责搬运字节：收到的载荷原样包装成 [`RawMessage`]，不做任何解码。

use std::time::{Duration, Instant};

use bytes::Bytes;
use thiserror::Error;

pub mod mock;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use mock::{MockBus, MockBusHandle};

#[cfg(feature = "mqtt")]
pub use mqtt::MqttBus;

/// 总线适配层统一错误类型
#[derive(Error, Debug)]
pub enum BusError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Connect(String),
    #[error("Subscribe to '{topic}' failed: {message}")]
    Subscribe { topic: String, message: String },
    #[error("Not connected")]
    NotConnected,
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

/// Broker 地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEndpoint {
    pub host: String,
    pub port: u16,
    pub client_id: String,
}

impl BusEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }
}

impl Default for BusEndpoint {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: format!("vibra-{}", std::process::id()),
        }
    }
}

/// 一条原始消息
///
/// 由总线线程产生，恰好被批处理线程消费一次，解码后即丢弃。
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Bytes,
    pub received_at: Instant,
}

impl RawMessage {
    /// 以当前时间为接收时间创建消息
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Instant::now(),
        }
    }
}

/// 总线事件
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// 与 broker 的会话已建立（应在此时订阅）
    Connected,
    /// 会话断开，附带原因（若有）
    Disconnected(Option<String>),
    /// 收到一条消息
    Message(RawMessage),
}

/// 总线客户端
///
/// 所有方法都在同一个线程（连接监督线程）上调用。
pub trait BusClient: Send {
    /// 发起连接
    ///
    /// 返回 `Ok` 只表示连接已经发起；会话建立后 [`poll`](Self::poll) 返回
    /// [`BusEvent::Connected`]。
    fn connect(&mut self) -> Result<(), BusError>;

    /// 订阅一个主题
    fn subscribe(&mut self, topic: &str) -> Result<(), BusError>;

    /// 等待下一个事件，超时返回 `Ok(None)`
    ///
    /// 返回 `Err` 表示传输层故障，调用方应视为断线并重连。
    fn poll(&mut self, timeout: Duration) -> Result<Option<BusEvent>, BusError>;

    /// 关闭连接（幂等）
    fn disconnect(&mut self) -> Result<(), BusError>;

    fn is_connected(&self) -> bool;
}

impl<T: BusClient + ?Sized> BusClient for Box<T> {
    fn connect(&mut self) -> Result<(), BusError> {
        (**self).connect()
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), BusError> {
        (**self).subscribe(topic)
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<BusEvent>, BusError> {
        (**self).poll(timeout)
    }

    fn disconnect(&mut self) -> Result<(), BusError> {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
