//! Topic registry.
//!
//! The set of topics is closed: anything not in `Topic::ALL` is rejected
//! before its payload is looked at.

use switchboard_types::bus::Topic;
use switchboard_types::envelope::TopicPayload;

use super::validate::ValidationError;

/// Whether `topic` names a registered topic.
pub fn is_known_topic(topic: &str) -> bool {
    topic.parse::<Topic>().is_ok()
}

/// Resolve a wire topic name, failing with `INVALID_TOPIC` when unknown.
pub fn validate_topic(topic: &str) -> Result<Topic, ValidationError> {
    topic
        .parse::<Topic>()
        .map_err(|_| ValidationError::InvalidTopic(topic.to_string()))
}

/// Decode `payload` under the schema bound to `topic`.
pub fn decode_payload(topic: Topic, payload: &[u8]) -> Result<TopicPayload, ValidationError> {
    if payload.is_empty() {
        return Err(ValidationError::field("payload", "is required"));
    }
    TopicPayload::decode(topic, payload).map_err(|e| ValidationError::InvalidPayload {
        topic,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_topics_are_recognized() {
        for topic in Topic::ALL {
            assert!(is_known_topic(topic.as_str()));
            assert_eq!(validate_topic(topic.as_str()).unwrap(), topic);
        }
    }

    #[test]
    fn unknown_topic_is_invalid_topic() {
        assert!(!is_known_topic("weather-report"));
        let err = validate_topic("weather-report").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTopic(ref t) if t == "weather-report"));
        assert_eq!(err.code(), "INVALID_TOPIC");
    }

    #[test]
    fn empty_topic_is_invalid_topic() {
        assert!(matches!(
            validate_topic(""),
            Err(ValidationError::InvalidTopic(_))
        ));
    }

    #[test]
    fn empty_payload_is_rejected() {
        let err = decode_payload(Topic::DmCheckin, b"").unwrap_err();
        assert_eq!(err.code(), "INVALID_MESSAGE");
    }

    #[test]
    fn payload_decodes_under_topic_schema() {
        let payload = decode_payload(Topic::DmCheckin, br#"{"text":"how did it go?"}"#).unwrap();
        assert_eq!(payload.topic(), Topic::DmCheckin);

        let err = decode_payload(Topic::ChatMessage, br#"{"text":"how did it go?"}"#).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidPayload {
                topic: Topic::ChatMessage,
                ..
            }
        ));
    }
}
