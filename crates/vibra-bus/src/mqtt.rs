//! MQTT 后端（rumqttc 同步客户端）
//!
//! `rumqttc::Connection` 由调用线程驱动：每次 [`BusClient::poll`] 推进一次事件循环。
//! 连接请求在 `connect()` 时创建，CONNACK 到达后才上报 [`BusEvent::Connected`]。

use std::time::Duration;

use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::{BusClient, BusEndpoint, BusError, BusEvent, RawMessage};

/// 请求通道容量（rumqttc 内部的 client → eventloop 队列）
const REQUEST_CAPACITY: usize = 64;
const KEEP_ALIVE: Duration = Duration::from_secs(30);

pub struct MqttBus {
    endpoint: BusEndpoint,
    session: Option<(Client, Connection)>,
    connected: bool,
}

impl MqttBus {
    pub fn new(endpoint: BusEndpoint) -> Self {
        Self {
            endpoint,
            session: None,
            connected: false,
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.endpoint.client_id.clone(),
            self.endpoint.host.clone(),
            self.endpoint.port,
        );
        options.set_keep_alive(KEEP_ALIVE);
        options
    }

    fn reset(&mut self) {
        self.session = None;
        self.connected = false;
    }
}

impl BusClient for MqttBus {
    fn connect(&mut self) -> Result<(), BusError> {
        if self.session.is_some() {
            return Ok(());
        }
        info!(
            "Connecting to MQTT broker {}:{}",
            self.endpoint.host, self.endpoint.port
        );
        self.session = Some(Client::new(self.options(), REQUEST_CAPACITY));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), BusError> {
        let (client, _) = self.session.as_mut().ok_or(BusError::NotConnected)?;
        client
            .subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| BusError::Subscribe {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<BusEvent>, BusError> {
        let Some((_, connection)) = self.session.as_mut() else {
            return Err(BusError::NotConnected);
        };

        match connection.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                self.reset();
                Err(BusError::ConnectionLost("event loop closed".to_string()))
            },
            Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => {
                self.connected = true;
                Ok(Some(BusEvent::Connected))
            },
            Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => Ok(Some(BusEvent::Message(
                RawMessage::new(publish.topic, publish.payload),
            ))),
            Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                self.reset();
                Ok(Some(BusEvent::Disconnected(None)))
            },
            Ok(Ok(event)) => {
                debug!("MQTT event: {:?}", event);
                Ok(None)
            },
            Ok(Err(e)) => {
                let was_connected = self.connected;
                self.reset();
                if was_connected {
                    warn!("MQTT connection lost: {}", e);
                    Ok(Some(BusEvent::Disconnected(Some(e.to_string()))))
                } else {
                    Err(BusError::Connect(e.to_string()))
                }
            },
        }
    }

    fn disconnect(&mut self) -> Result<(), BusError> {
        if let Some((client, _)) = self.session.as_mut() {
            // 会话可能已经断开，忽略失败
            let _ = client.disconnect();
        }
        self.reset();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
