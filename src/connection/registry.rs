//! Desired subscriptions, replayed after a transport-driven reconnect

use rumqttc::QoS;
use std::collections::HashMap;

/// Topic to QoS mapping of every subscription the caller currently wants
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    topics: HashMap<String, QoS>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription; returns the previous QoS if the topic was present
    pub fn insert(&mut self, topic: &str, qos: QoS) -> Option<QoS> {
        self.topics.insert(topic.to_string(), qos)
    }

    pub fn remove(&mut self, topic: &str) -> Option<QoS> {
        self.topics.remove(topic)
    }

    pub fn get(&self, topic: &str) -> Option<QoS> {
        self.topics.get(topic).copied()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Owned copy for replay, sorted by topic
    ///
    /// Replay iterates the copy, so registry mutations during replay never
    /// add, drop or repeat a topic.
    pub fn snapshot(&self) -> Vec<(String, QoS)> {
        let mut entries: Vec<(String, QoS)> = self
            .topics
            .iter()
            .map(|(topic, qos)| (topic.clone(), *qos))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_are_unique() {
        let mut registry = SubscriptionRegistry::new();
        assert_eq!(registry.insert("a/b", QoS::AtMostOnce), None);
        assert_eq!(
            registry.insert("a/b", QoS::AtLeastOnce),
            Some(QoS::AtMostOnce)
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a/b"), Some(QoS::AtLeastOnce));
    }

    #[test]
    fn test_remove() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert("a/b", QoS::AtLeastOnce);
        assert!(registry.contains("a/b"));
        assert_eq!(registry.remove("a/b"), Some(QoS::AtLeastOnce));
        assert_eq!(registry.remove("a/b"), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert("b", QoS::AtLeastOnce);
        registry.insert("a", QoS::ExactlyOnce);

        let snapshot = registry.snapshot();
        registry.insert("c", QoS::AtMostOnce);
        registry.remove("a");

        assert_eq!(
            snapshot,
            vec![
                ("a".to_string(), QoS::ExactlyOnce),
                ("b".to_string(), QoS::AtLeastOnce)
            ]
        );
    }
}
