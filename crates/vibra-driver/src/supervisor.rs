//! 连接监督线程
//!
//! 独占 [`BusClient`]，只做三件事：维持连接、(重新)订阅、把消息放进入口队列。
//! 不做任何解码。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};
use vibra_bus::{BusClient, BusEvent};

use crate::context::IngestContext;
use crate::pipeline::PipelineConfig;
use crate::queue::IngressSender;
use crate::topology::{ProjectSource, subscription_topics};

pub const STATUS_CONNECTED: &str = "Connected to broker";
pub const STATUS_DISCONNECTED: &str = "Disconnected from broker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Session {
    /// 需要发起连接
    Idle,
    /// 已发起，等待会话建立
    Connecting,
    Connected,
}

/// 监督线程所需的全部输入
pub struct Supervisor {
    pub bus: Box<dyn BusClient>,
    pub sender: IngressSender,
    pub projects: Arc<dyn ProjectSource>,
    pub project: String,
    pub ctx: Arc<IngestContext>,
    pub config: PipelineConfig,
}

impl Supervisor {
    /// 运行直到 `is_running` 被清除，退出前关闭连接
    pub fn run(mut self, is_running: Arc<AtomicBool>) {
        info!("Connection supervisor started for project '{}'", self.project);
        let poll_timeout = self.config.poll_timeout();
        let reconnect_interval = self.config.reconnect_interval();
        let mut session = Session::Idle;

        while is_running.load(Ordering::Acquire) {
            if session == Session::Idle {
                match self.bus.connect() {
                    Ok(()) => {
                        debug!("Connection initiated");
                        session = Session::Connecting;
                    },
                    Err(e) => {
                        warn!("Connection failed: {}", e);
                        self.ctx.connection_status(format!("Connection failed: {e}"));
                        sleep_while_running(&is_running, reconnect_interval, poll_timeout);
                    },
                }
                continue;
            }

            match self.bus.poll(poll_timeout) {
                Ok(None) => {},
                Ok(Some(BusEvent::Connected)) => {
                    info!("Connected to broker");
                    self.ctx.connection_status(STATUS_CONNECTED);
                    session = Session::Connected;
                    self.subscribe_all();
                },
                Ok(Some(BusEvent::Message(message))) => {
                    trace!("Received {} bytes on '{}'", message.payload.len(), message.topic);
                    if self.sender.push(message).is_err() {
                        warn!("Ingress queue closed, connection supervisor exiting");
                        break;
                    }
                },
                Ok(Some(BusEvent::Disconnected(reason))) => {
                    match reason {
                        Some(reason) => warn!("Disconnected from broker: {}", reason),
                        None => info!("Disconnected from broker"),
                    }
                    self.ctx.connection_status(STATUS_DISCONNECTED);
                    session = Session::Idle;
                },
                Err(e) => {
                    if session == Session::Connected {
                        warn!("Connection lost: {}", e);
                        self.ctx.connection_status(STATUS_DISCONNECTED);
                    } else {
                        warn!("Connection failed: {}", e);
                        self.ctx.connection_status(format!("Connection failed: {e}"));
                    }
                    let _ = self.bus.disconnect();
                    session = Session::Idle;
                    sleep_while_running(&is_running, reconnect_interval, poll_timeout);
                },
            }
        }

        if let Err(e) = self.bus.disconnect() {
            warn!("Failed to disconnect cleanly: {}", e);
        }
        info!("Connection supervisor stopped");
    }

    /// 按当前项目配置订阅全部 tag（每次连接都重新读取）
    fn subscribe_all(&mut self) {
        let topics = subscription_topics(self.projects.as_ref(), &self.project);
        if topics.is_empty() {
            warn!("Project '{}' declares no tags, nothing to subscribe", self.project);
        }
        for topic in &topics {
            match self.bus.subscribe(topic) {
                Ok(()) => debug!("Subscribed to {}", topic),
                Err(e) => warn!("Failed to subscribe to {}: {}", topic, e),
            }
        }
        info!("Subscribed to {} topic(s)", topics.len());
    }
}

/// 分段睡眠，停止信号到来时提前返回
fn sleep_while_running(is_running: &AtomicBool, total: Duration, step: Duration) {
    let deadline = Instant::now() + total;
    while is_running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(step.min(deadline - now));
    }
}
