//! Field-level validation for `BusMessage`.
//!
//! `validate` is a pure function shared by `Bus::publish` and any caller that
//! wants to reject a message before it reaches the bus. Payload decoding is
//! part of validation: a message whose payload does not decode under its
//! topic's schema is malformed, not merely incomplete.

use switchboard_types::bus::{BusMessage, Topic};
use switchboard_types::envelope::TopicPayload;
use thiserror::Error;
use uuid::{Uuid, Version};

use super::topic::{decode_payload, validate_topic};

/// Longest accepted canonical string, in bytes.
pub const MAX_CANONICAL_LEN: usize = 512;

/// Reasons a message fails validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The topic is not part of the registry.
    #[error("invalid topic: '{0}'")]
    InvalidTopic(String),

    /// A populated field violates its constraints.
    #[error("invalid message: {field} {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// The payload does not decode under the topic's schema.
    #[error("invalid message: payload is not a valid {topic} payload: {reason}")]
    InvalidPayload { topic: Topic, reason: String },
}

impl ValidationError {
    pub(crate) fn field(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Stable error code for callers that branch on error kind.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::InvalidTopic(_) => "INVALID_TOPIC",
            ValidationError::InvalidField { .. } | ValidationError::InvalidPayload { .. } => {
                "INVALID_MESSAGE"
            }
        }
    }
}

/// Validate a message and return its resolved topic.
///
/// Rules are applied in order: diagnostic id, topic, conversation key,
/// idempotency key, payload, then the optional tracing and extension fields.
/// `direction` and `channel` are closed enums and valid by construction.
pub fn validate(msg: &BusMessage) -> Result<Topic, ValidationError> {
    validate_and_decode(msg).map(|(topic, _)| topic)
}

/// Validate a message and also return its decoded payload.
pub fn validate_and_decode(msg: &BusMessage) -> Result<(Topic, TopicPayload), ValidationError> {
    if let Some(id) = &msg.id {
        check_canonical("id", id)?;
    }

    let topic = validate_topic(&msg.topic)?;

    check_canonical("conversation_key", &msg.conversation_key)?;
    check_canonical("idempotency_key", &msg.idempotency_key)?;

    let payload = decode_payload(topic, &msg.payload)?;
    check_payload(&payload)?;

    check_optional("participant_key", msg.participant_key.as_deref())?;
    check_optional("correlation_id", msg.correlation_id.as_deref())?;
    check_optional("causation_id", msg.causation_id.as_deref())?;

    let ext = &msg.extensions;
    check_optional("extensions.platform_message_id", ext.platform_message_id.as_deref())?;
    check_optional("extensions.reply_to", ext.reply_to.as_deref())?;
    check_optional("extensions.team_id", ext.team_id.as_deref())?;
    check_optional("extensions.chat_id", ext.chat_id.as_deref())?;
    for user in &ext.mentioned_users {
        check_canonical("extensions.mentioned_users", user)?;
    }
    if let Some(session_id) = &ext.session_id {
        let parsed = Uuid::parse_str(session_id).map_err(|e| {
            ValidationError::field("extensions.session_id", format!("is not a UUID: {e}"))
        })?;
        check_time_ordered("extensions.session_id", &parsed)?;
    }

    Ok((topic, payload))
}

/// Check that `value` is a canonical string.
///
/// Canonical means: non-empty after trimming, no surrounding whitespace, no
/// control characters, and at most [`MAX_CANONICAL_LEN`] bytes.
pub fn check_canonical(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::field(field, "must not be empty"));
    }
    if trimmed.len() != value.len() {
        return Err(ValidationError::field(
            field,
            "must not have leading or trailing whitespace",
        ));
    }
    if value.chars().any(char::is_control) {
        return Err(ValidationError::field(
            field,
            "must not contain control characters",
        ));
    }
    if value.len() > MAX_CANONICAL_LEN {
        return Err(ValidationError::field(
            field,
            format!("must be at most {MAX_CANONICAL_LEN} bytes"),
        ));
    }
    Ok(())
}

fn check_optional(field: &'static str, value: Option<&str>) -> Result<(), ValidationError> {
    match value {
        Some(v) => check_canonical(field, v),
        None => Ok(()),
    }
}

fn check_time_ordered(field: &'static str, id: &Uuid) -> Result<(), ValidationError> {
    match id.get_version() {
        Some(Version::SortRand) => Ok(()),
        other => Err(ValidationError::field(
            field,
            format!("must be a time-ordered UUIDv7, got {other:?}"),
        )),
    }
}

fn check_payload(payload: &TopicPayload) -> Result<(), ValidationError> {
    if let Some(env) = payload.envelope() {
        check_canonical("payload.message_id", &env.message_id)?;
        check_time_ordered("payload.session_id", &env.session_id)?;
        check_optional("payload.reply_to", env.reply_to.as_deref())?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
