//! Shared test transport: records everything a session does and lets tests
//! inject inbound traffic.

// Not every test binary exercises every helper.
#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sparkplug_b::{ConnectOptions, Error, MqttTransport, Result, TransportHandler};

/// One recorded publish.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

/// One recorded Last Will, captured at connect time.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmedWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

#[derive(Default)]
pub struct MockState {
    pub connects: usize,
    pub disconnects: usize,
    pub wills: Vec<ArmedWill>,
    pub published: Vec<PublishedMessage>,
    pub subscriptions: Vec<(String, u8)>,
    pub handler: Option<Arc<dyn TransportHandler>>,
    pub fail_publishes: bool,
}

/// In-memory [`MqttTransport`] double. Cloning shares the recorded state,
/// so tests keep a clone for inspection while the session owns the boxed
/// original.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state().published.clone()
    }

    pub fn last_will(&self) -> Option<ArmedWill> {
        self.state().wills.last().cloned()
    }

    pub fn subscriptions(&self) -> Vec<(String, u8)> {
        self.state().subscriptions.clone()
    }

    /// Delivers an inbound message the way the real transport would: on a
    /// thread that holds no session lock.
    pub fn inject_message(&self, topic: &str, payload: &[u8]) {
        let handler = self.state().handler.clone();
        if let Some(handler) = handler {
            handler.on_message(topic, payload);
        }
    }

    /// Simulates abnormal connection loss.
    pub fn drop_connection(&self, cause: &str) {
        let handler = self.state().handler.clone();
        if let Some(handler) = handler {
            handler.on_connection_lost(cause);
        }
    }
}

impl MqttTransport for MockTransport {
    fn connect(
        &mut self,
        options: ConnectOptions<'_>,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<()> {
        let mut state = self.state();
        state.connects += 1;
        if let Some(will) = options.last_will {
            state.wills.push(ArmedWill {
                topic: will.topic.to_string(),
                payload: will.payload.to_vec(),
                qos: will.qos,
                retain: will.retain,
            });
        }
        state.handler = Some(handler);
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: u8, retain: bool) -> Result<()> {
        let mut state = self.state();
        if state.fail_publishes {
            return Err(Error::PublishFailed {
                message_type: "message",
                details: "mock transport failure".to_string(),
            });
        }
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        Ok(())
    }

    fn subscribe(&mut self, filter: &str, qos: u8) -> Result<()> {
        self.state().subscriptions.push((filter.to_string(), qos));
        Ok(())
    }

    fn disconnect(&mut self, _timeout: Duration) -> Result<()> {
        let mut state = self.state();
        state.disconnects += 1;
        state.handler = None;
        Ok(())
    }
}
