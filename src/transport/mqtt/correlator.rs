//! Pure bookkeeping that ties request ids to rumqttc packets
//!
//! rumqttc writes requests in the order they were queued and reports each
//! write as an `Outgoing` event carrying the packet id it assigned. Queued
//! request ids are therefore matched to packet ids in FIFO order, then to the
//! broker's acknowledgement by packet id.

use crate::transport::RequestId;
use rumqttc::QoS;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Default)]
pub struct RequestCorrelator {
    connect: Option<RequestId>,
    disconnect: Option<RequestId>,
    queued_publishes: VecDeque<(RequestId, QoS)>,
    queued_subscribes: VecDeque<RequestId>,
    queued_unsubscribes: VecDeque<RequestId>,
    awaiting_puback: HashMap<u16, RequestId>,
    awaiting_pubcomp: HashMap<u16, RequestId>,
    awaiting_suback: HashMap<u16, RequestId>,
    awaiting_unsuback: HashMap<u16, RequestId>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connect(&mut self, id: RequestId) {
        self.connect = Some(id);
    }

    pub fn take_connect(&mut self) -> Option<RequestId> {
        self.connect.take()
    }

    pub fn has_pending_connect(&self) -> bool {
        self.connect.is_some()
    }

    pub fn set_disconnect(&mut self, id: RequestId) {
        self.disconnect = Some(id);
    }

    pub fn take_disconnect(&mut self) -> Option<RequestId> {
        self.disconnect.take()
    }

    /// Take the disconnect request only if it is still `id`
    pub fn take_disconnect_if(&mut self, id: RequestId) -> bool {
        if self.disconnect == Some(id) {
            self.disconnect = None;
            true
        } else {
            false
        }
    }

    pub fn queue_publish(&mut self, id: RequestId, qos: QoS) {
        self.queued_publishes.push_back((id, qos));
    }

    pub fn queue_subscribe(&mut self, id: RequestId) {
        self.queued_subscribes.push_back(id);
    }

    pub fn queue_unsubscribe(&mut self, id: RequestId) {
        self.queued_unsubscribes.push_back(id);
    }

    /// Drop a queued request that the client refused to enqueue
    pub fn cancel(&mut self, id: RequestId) {
        self.queued_publishes.retain(|(queued, _)| *queued != id);
        self.queued_subscribes.retain(|queued| *queued != id);
        self.queued_unsubscribes.retain(|queued| *queued != id);
    }

    /// A PUBLISH was written; returns the request to complete now (QoS 0)
    pub fn publish_written(&mut self, pkid: u16) -> Option<RequestId> {
        if pkid != 0
            && (self.awaiting_puback.contains_key(&pkid) || self.awaiting_pubcomp.contains_key(&pkid))
        {
            // retransmission of an in-flight publish
            return None;
        }

        let (id, qos) = self.queued_publishes.pop_front()?;
        match qos {
            QoS::AtMostOnce => Some(id),
            QoS::AtLeastOnce => {
                self.awaiting_puback.insert(pkid, id);
                None
            }
            QoS::ExactlyOnce => {
                self.awaiting_pubcomp.insert(pkid, id);
                None
            }
        }
    }

    pub fn puback(&mut self, pkid: u16) -> Option<RequestId> {
        self.awaiting_puback.remove(&pkid)
    }

    pub fn pubcomp(&mut self, pkid: u16) -> Option<RequestId> {
        self.awaiting_pubcomp.remove(&pkid)
    }

    pub fn subscribe_written(&mut self, pkid: u16) {
        if self.awaiting_suback.contains_key(&pkid) {
            return;
        }
        if let Some(id) = self.queued_subscribes.pop_front() {
            self.awaiting_suback.insert(pkid, id);
        }
    }

    pub fn suback(&mut self, pkid: u16) -> Option<RequestId> {
        self.awaiting_suback.remove(&pkid)
    }

    pub fn unsubscribe_written(&mut self, pkid: u16) {
        if self.awaiting_unsuback.contains_key(&pkid) {
            return;
        }
        if let Some(id) = self.queued_unsubscribes.pop_front() {
            self.awaiting_unsuback.insert(pkid, id);
        }
    }

    pub fn unsuback(&mut self, pkid: u16) -> Option<RequestId> {
        self.awaiting_unsuback.remove(&pkid)
    }

    /// Every outstanding request, leaving the correlator empty
    pub fn drain(&mut self) -> Vec<RequestId> {
        let mut ids: Vec<RequestId> = self
            .connect
            .take()
            .into_iter()
            .chain(self.disconnect.take())
            .chain(self.queued_publishes.drain(..).map(|(id, _)| id))
            .chain(self.queued_subscribes.drain(..))
            .chain(self.queued_unsubscribes.drain(..))
            .chain(self.awaiting_puback.drain().map(|(_, id)| id))
            .chain(self.awaiting_pubcomp.drain().map(|(_, id)| id))
            .chain(self.awaiting_suback.drain().map(|(_, id)| id))
            .chain(self.awaiting_unsuback.drain().map(|(_, id)| id))
            .collect();
        ids.sort();
        ids
    }

    pub fn outstanding(&self) -> usize {
        usize::from(self.connect.is_some())
            + usize::from(self.disconnect.is_some())
            + self.queued_publishes.len()
            + self.queued_subscribes.len()
            + self.queued_unsubscribes.len()
            + self.awaiting_puback.len()
            + self.awaiting_pubcomp.len()
            + self.awaiting_suback.len()
            + self.awaiting_unsuback.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos0_completes_on_write() {
        let mut correlator = RequestCorrelator::new();
        correlator.queue_publish(RequestId(1), QoS::AtMostOnce);
        assert_eq!(correlator.publish_written(0), Some(RequestId(1)));
        assert_eq!(correlator.outstanding(), 0);
    }

    #[test]
    fn test_qos1_completes_on_puback() {
        let mut correlator = RequestCorrelator::new();
        correlator.queue_publish(RequestId(1), QoS::AtLeastOnce);
        correlator.queue_publish(RequestId(2), QoS::AtLeastOnce);
        assert_eq!(correlator.publish_written(10), None);
        assert_eq!(correlator.publish_written(11), None);

        assert_eq!(correlator.puback(11), Some(RequestId(2)));
        assert_eq!(correlator.puback(10), Some(RequestId(1)));
        assert_eq!(correlator.puback(10), None);
    }

    #[test]
    fn test_qos2_completes_on_pubcomp() {
        let mut correlator = RequestCorrelator::new();
        correlator.queue_publish(RequestId(3), QoS::ExactlyOnce);
        assert_eq!(correlator.publish_written(5), None);
        assert_eq!(correlator.puback(5), None);
        assert_eq!(correlator.pubcomp(5), Some(RequestId(3)));
    }

    #[test]
    fn test_retransmission_does_not_consume_queue() {
        let mut correlator = RequestCorrelator::new();
        correlator.queue_publish(RequestId(1), QoS::AtLeastOnce);
        correlator.queue_publish(RequestId(2), QoS::AtMostOnce);
        assert_eq!(correlator.publish_written(7), None);
        assert_eq!(correlator.publish_written(7), None);
        assert_eq!(correlator.publish_written(0), Some(RequestId(2)));
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let mut correlator = RequestCorrelator::new();
        correlator.queue_subscribe(RequestId(1));
        correlator.queue_unsubscribe(RequestId(2));
        correlator.subscribe_written(3);
        correlator.unsubscribe_written(4);
        assert_eq!(correlator.suback(3), Some(RequestId(1)));
        assert_eq!(correlator.unsuback(4), Some(RequestId(2)));
    }

    #[test]
    fn test_cancel_removes_queued_request() {
        let mut correlator = RequestCorrelator::new();
        correlator.queue_publish(RequestId(1), QoS::AtMostOnce);
        correlator.queue_publish(RequestId(2), QoS::AtMostOnce);
        correlator.cancel(RequestId(1));
        assert_eq!(correlator.publish_written(0), Some(RequestId(2)));
    }

    #[test]
    fn test_disconnect_tracking() {
        let mut correlator = RequestCorrelator::new();
        correlator.set_disconnect(RequestId(9));
        assert!(!correlator.take_disconnect_if(RequestId(8)));
        assert!(correlator.take_disconnect_if(RequestId(9)));
        assert_eq!(correlator.take_disconnect(), None);
    }

    #[test]
    fn test_drain_returns_everything() {
        let mut correlator = RequestCorrelator::new();
        correlator.set_connect(RequestId(1));
        correlator.queue_publish(RequestId(2), QoS::AtLeastOnce);
        correlator.queue_subscribe(RequestId(3));
        correlator.publish_written(4);

        assert_eq!(correlator.outstanding(), 3);
        assert_eq!(
            correlator.drain(),
            vec![RequestId(1), RequestId(2), RequestId(3)]
        );
        assert_eq!(correlator.outstanding(), 0);
        assert!(!correlator.has_pending_connect());
    }
}
