//! 内存总线
//!
//! [`MockBus`] 交给连接监督线程使用，[`MockBusHandle`] 留在测试（或回放工具）一侧，
//! 用于发布消息、模拟断线和连接失败，并观察订阅情况。
//!
//! 与真实 broker 一致：只有已订阅主题的消息才会被投递。

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{BusClient, BusError, BusEvent, RawMessage};

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    subscriptions: BTreeSet<String>,
    failing_connects: usize,
    connect_attempts: usize,
    disconnect_calls: usize,
    published: usize,
}

/// 内存总线客户端
pub struct MockBus {
    state: Arc<Mutex<MockState>>,
    inbox: Receiver<BusEvent>,
    outbox: Sender<BusEvent>,
}

/// 测试侧句柄
#[derive(Clone)]
pub struct MockBusHandle {
    state: Arc<Mutex<MockState>>,
    outbox: Sender<BusEvent>,
}

impl MockBus {
    pub fn new() -> (Self, MockBusHandle) {
        let (outbox, inbox) = unbounded();
        let state = Arc::new(Mutex::new(MockState::default()));
        let handle = MockBusHandle {
            state: state.clone(),
            outbox: outbox.clone(),
        };
        (
            Self {
                state,
                inbox,
                outbox,
            },
            handle,
        )
    }
}

impl BusClient for MockBus {
    fn connect(&mut self) -> Result<(), BusError> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(BusError::Connect("mock broker refused connection".to_string()));
        }
        state.connected = true;
        drop(state);

        debug!("Mock bus connected");
        let _ = self.outbox.send(BusEvent::Connected);
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), BusError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(BusError::NotConnected);
        }
        state.subscriptions.insert(topic.to_string());
        trace!("Mock bus subscribed to {}", topic);
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<BusEvent>, BusError> {
        match self.inbox.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(BusError::ConnectionLost("mock inbox closed".to_string()))
            },
        }
    }

    fn disconnect(&mut self) -> Result<(), BusError> {
        let mut state = self.state.lock();
        state.disconnect_calls += 1;
        state.connected = false;
        state.subscriptions.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}

impl MockBusHandle {
    /// 发布一条消息；主题未被订阅或未连接时丢弃并返回 `false`
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        let mut state = self.state.lock();
        if !state.connected || !state.subscriptions.contains(topic) {
            return false;
        }
        let sent = self
            .outbox
            .send(BusEvent::Message(RawMessage::new(topic, payload)))
            .is_ok();
        if sent {
            state.published += 1;
        }
        sent
    }

    /// 已投递到总线的消息数（不含被丢弃的发布）
    pub fn published(&self) -> usize {
        self.state.lock().published
    }

    /// 模拟 broker 主动断开
    pub fn drop_connection(&self, reason: &str) {
        {
            let mut state = self.state.lock();
            state.connected = false;
            state.subscriptions.clear();
        }
        let _ = self.outbox.send(BusEvent::Disconnected(Some(reason.to_string())));
    }

    /// 让接下来的 `n` 次连接失败
    pub fn fail_next_connects(&self, n: usize) {
        self.state.lock().failing_connects = n;
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().subscriptions.iter().cloned().collect()
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.lock().connect_attempts
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state.lock().disconnect_calls
    }

    /// 等待某个主题被订阅（测试同步用）
    pub fn wait_for_subscription(&self, topic: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.state.lock().subscriptions.contains(topic) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }
}
