//! Topic validation and reserved gateway topic construction

use thiserror::Error;

/// Default upper bound on topic length accepted by the broker
pub const MAX_TOPIC_LEN: usize = 128;

/// Prefix of every topic carrying gateway operation results
pub const GATEWAY_RESULT_PREFIX: &str = "$gateway/operation/result/";

/// Reject empty (or whitespace-only) and over-length topics
pub fn validate_topic(topic: &str, max_len: usize) -> Result<(), TopicError> {
    if topic.trim().is_empty() {
        return Err(TopicError::Empty);
    }

    let len = topic.chars().count();
    if len > max_len {
        return Err(TopicError::TooLong { len, max: max_len });
    }

    Ok(())
}

/// Validate a product id or device name used to build topics
pub fn validate_identifier(identifier: &str) -> Result<(), TopicError> {
    if identifier.is_empty() {
        return Err(TopicError::EmptyIdentifier);
    }

    for ch in identifier.chars() {
        if matches!(ch, '/' | '+' | '#') || ch.is_whitespace() {
            return Err(TopicError::InvalidIdentifierChar(ch));
        }
    }

    Ok(())
}

/// Gateway topic patterns
pub struct GatewayTopics;

impl GatewayTopics {
    /// Build result subscription topic: `$gateway/operation/result/{product_id}/{device_name}`
    pub fn result_topic(product_id: &str, device_name: &str) -> String {
        format!("{GATEWAY_RESULT_PREFIX}{product_id}/{device_name}")
    }

    /// Build event publish topic: `{topic_root}/event`
    pub fn event_topic(topic_root: &str) -> String {
        format!("{}/event", topic_root.trim_end_matches('/'))
    }

    /// Default topic root of a device: `{product_id}/{device_name}`
    pub fn default_root(product_id: &str, device_name: &str) -> String {
        format!("{product_id}/{device_name}")
    }

    /// Split a result topic into `(product_id, device_name)`
    ///
    /// Returns `None` when the topic is outside the reserved prefix or lacks
    /// the `/` separating the two identifiers.
    pub fn parse_result_topic(topic: &str) -> Option<(&str, &str)> {
        let rest = topic.strip_prefix(GATEWAY_RESULT_PREFIX)?;
        let (product_id, device_name) = rest.split_once('/')?;
        Some((product_id, device_name))
    }
}

/// Topic and identifier validation errors
#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic is empty")]
    Empty,
    #[error("Topic length {len} exceeds maximum {max}")]
    TooLong { len: usize, max: usize },
    #[error("Identifier cannot be empty")]
    EmptyIdentifier,
    #[error("Identifier contains invalid character: '{0}'")]
    InvalidIdentifierChar(char),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn over_length_topics_are_rejected(topic in "[a-z/]{129,300}") {
            prop_assert!(
                matches!(validate_topic(&topic, MAX_TOPIC_LEN), Err(TopicError::TooLong { .. })),
                "topic of {} chars must be rejected", topic.len()
            );
        }

        #[test]
        fn bounded_topics_are_accepted(topic in "[a-z0-9]{1}[a-z0-9/]{0,127}") {
            prop_assert!(validate_topic(&topic, MAX_TOPIC_LEN).is_ok());
        }

        #[test]
        fn result_topic_parses_back(
            product_id in "[A-Z0-9]{1,16}",
            device_name in "[a-zA-Z0-9_-]{1,32}"
        ) {
            let topic = GatewayTopics::result_topic(&product_id, &device_name);
            let parsed = GatewayTopics::parse_result_topic(&topic);
            prop_assert_eq!(parsed, Some((product_id.as_str(), device_name.as_str())));
        }
    }

    #[test]
    fn test_empty_topics() {
        assert_eq!(validate_topic("", MAX_TOPIC_LEN), Err(TopicError::Empty));
        assert_eq!(validate_topic("   ", MAX_TOPIC_LEN), Err(TopicError::Empty));
    }

    #[test]
    fn test_length_boundary() {
        let exact = "t".repeat(MAX_TOPIC_LEN);
        assert!(validate_topic(&exact, MAX_TOPIC_LEN).is_ok());

        let over = "t".repeat(MAX_TOPIC_LEN + 1);
        assert_eq!(
            validate_topic(&over, MAX_TOPIC_LEN),
            Err(TopicError::TooLong {
                len: MAX_TOPIC_LEN + 1,
                max: MAX_TOPIC_LEN
            })
        );
    }

    #[test]
    fn test_gateway_topics() {
        assert_eq!(
            GatewayTopics::result_topic("PID", "gw-1"),
            "$gateway/operation/result/PID/gw-1"
        );
        assert_eq!(GatewayTopics::event_topic("PID/gw-1"), "PID/gw-1/event");
        assert_eq!(GatewayTopics::event_topic("PID/gw-1/"), "PID/gw-1/event");
        assert_eq!(GatewayTopics::default_root("PID", "gw-1"), "PID/gw-1");
    }

    #[test]
    fn test_parse_result_topic_edge_cases() {
        assert_eq!(GatewayTopics::parse_result_topic("PID/gw-1/event"), None);
        assert_eq!(
            GatewayTopics::parse_result_topic("$gateway/operation/result/PID"),
            None
        );
        // Everything after the first separator belongs to the device name
        assert_eq!(
            GatewayTopics::parse_result_topic("$gateway/operation/result/PID/a/b"),
            Some(("PID", "a/b"))
        );
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("1M8L1A6TIF").is_ok());
        assert!(validate_identifier("dev-w7ZsXcPQ").is_ok());
        assert_eq!(validate_identifier(""), Err(TopicError::EmptyIdentifier));
        assert_eq!(
            validate_identifier("dev/1"),
            Err(TopicError::InvalidIdentifierChar('/'))
        );
        assert_eq!(
            validate_identifier("dev#"),
            Err(TopicError::InvalidIdentifierChar('#'))
        );
        assert_eq!(
            validate_identifier("dev 1"),
            Err(TopicError::InvalidIdentifierChar(' '))
        );
    }
}
