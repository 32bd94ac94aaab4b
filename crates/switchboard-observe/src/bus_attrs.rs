//! Span and event field names for bus instrumentation.
//!
//! Usable as constant field names in `tracing` macros:
//! `info_span!("replay", { BUS_CHANNEL } = %channel)`.

/// Channel the message belongs to (`telegram`, `slack`, ...).
pub const BUS_CHANNEL: &str = "bus.channel";

/// Topic name (`chat-message`, `dm-reply`, ...).
pub const BUS_TOPIC: &str = "bus.topic";

/// Conversation partition key (`telegram:chat:42`).
pub const BUS_CONVERSATION_KEY: &str = "bus.conversation_key";

pub const BUS_IDEMPOTENCY_KEY: &str = "bus.idempotency_key";

/// Platform-native id used for inbound dedup.
pub const BUS_PLATFORM_MESSAGE_ID: &str = "bus.platform_message_id";

/// Admission budget of the bus.
pub const BUS_MAX_IN_FLIGHT: &str = "bus.max_in_flight";

/// Delivery error stage (`dispatch` or `handler`).
pub const BUS_DELIVERY_STAGE: &str = "bus.delivery.stage";

// --- Operation names ---

pub const OP_REPLAY: &str = "replay";
pub const OP_HANDLE: &str = "handle";
