//! Per-connection redelivery filter

use crate::transport::Message;
use rumqttc::QoS;

/// Drops a QoS>=1 message whose id equals the immediately preceding one
#[derive(Debug, Default)]
pub struct DeliveryDeduplicator {
    last_id: Option<u16>,
}

impl DeliveryDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false for a redelivery; otherwise remembers the id and returns true
    pub fn accept(&mut self, message: &Message) -> bool {
        if message.qos != QoS::AtMostOnce && self.last_id == Some(message.id) {
            return false;
        }
        self.last_id = Some(message.id);
        true
    }

    /// Forget the last id (disconnect or connection loss)
    pub fn reset(&mut self) {
        self.last_id = None;
    }

    pub fn last_id(&self) -> Option<u16> {
        self.last_id
    }
}
