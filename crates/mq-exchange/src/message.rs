//! Message types for exchange operations including core domain identifiers.

use crate::error::ValidationError;
use bitflags::bitflags;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Length in bytes of message and correlation identifiers
pub const IDENTIFIER_LENGTH: usize = 24;

static IDENTIFIER_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Generate 24 identifier bytes: a random v4 UUID followed by a
/// process-wide sequence number.
fn generate_identifier() -> [u8; IDENTIFIER_LENGTH] {
    let mut bytes = [0u8; IDENTIFIER_LENGTH];
    bytes[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    let sequence = IDENTIFIER_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    bytes[16..].copy_from_slice(&sequence.to_be_bytes());
    bytes
}

fn parse_identifier(field: &str, s: &str) -> Result<[u8; IDENTIFIER_LENGTH], ValidationError> {
    let decoded = hex::decode(s).map_err(|e| ValidationError::InvalidFormat {
        field: field.to_string(),
        message: e.to_string(),
    })?;

    decoded
        .try_into()
        .map_err(|bytes: Vec<u8>| ValidationError::OutOfRange {
            field: field.to_string(),
            message: format!(
                "must be {} bytes, got {}",
                IDENTIFIER_LENGTH,
                bytes.len()
            ),
        })
}

/// Broker-unique identifier of a single message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId([u8; IDENTIFIER_LENGTH]);

impl MessageId {
    /// The empty identifier; on put it asks the broker to assign a fresh one
    pub const NONE: Self = Self([0u8; IDENTIFIER_LENGTH]);

    /// Generate a new unique message ID
    pub fn generate() -> Self {
        Self(generate_identifier())
    }

    /// Wrap raw identifier bytes
    pub const fn from_bytes(bytes: [u8; IDENTIFIER_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; IDENTIFIER_LENGTH] {
        &self.0
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::NONE
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_identifier("message_id", s).map(Self)
    }
}

/// Identifier used to match a reply to its request. Not unique: many
/// messages may share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId([u8; IDENTIFIER_LENGTH]);

impl CorrelationId {
    /// The empty correlation identifier
    pub const NONE: Self = Self([0u8; IDENTIFIER_LENGTH]);

    /// Generate a new random correlation ID
    pub fn generate() -> Self {
        Self(generate_identifier())
    }

    /// Wrap raw identifier bytes
    pub const fn from_bytes(bytes: [u8; IDENTIFIER_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; IDENTIFIER_LENGTH] {
        &self.0
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::NONE
    }
}

impl From<MessageId> for CorrelationId {
    fn from(id: MessageId) -> Self {
        Self(id.0)
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for CorrelationId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_identifier("correlation_id", s).map(Self)
    }
}

/// Validated queue name with length and character restrictions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Maximum length of a queue name
    pub const MAX_LENGTH: usize = 48;

    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > Self::MAX_LENGTH {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: format!("must be 1-{} characters", Self::MAX_LENGTH),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '%'))
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, '.', '_', '/' and '%' allowed".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for QueueName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Destinations
// ============================================================================

/// Whether a destination is a point-to-point queue or a publish/subscribe topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DestinationKind {
    Queue,
    Topic,
}

/// A named endpoint that messages are sent to or received from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub name: String,
    pub kind: DestinationKind,
    /// Owning queue manager, for queues hosted elsewhere
    pub owner_qualifier: Option<String>,
}

impl Destination {
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Queue,
            owner_qualifier: None,
        }
    }

    pub fn topic(topic_string: impl Into<String>) -> Self {
        Self {
            name: topic_string.into(),
            kind: DestinationKind::Topic,
            owner_qualifier: None,
        }
    }

    /// Qualify the destination with its owning queue manager. Blank
    /// qualifiers are treated as absent.
    pub fn with_owner(mut self, owner: Option<String>) -> Self {
        self.owner_qualifier = owner.filter(|o| !o.trim().is_empty());
        self
    }
}

impl From<&QueueName> for Destination {
    fn from(name: &QueueName) -> Self {
        Self::queue(name.as_str())
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.owner_qualifier {
            Some(owner) => write!(f, "{}@{}", self.name, owner),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Where the responder should send its reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTo {
    pub queue: String,
    pub queue_manager: Option<String>,
}

impl ReplyTo {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            queue_manager: None,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.queue.trim().is_empty()
    }
}

// ============================================================================
// Message Descriptor Fields
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageType {
    #[default]
    Datagram,
    Request,
    Reply,
    Report,
}

/// Body format tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageFormat {
    /// Character data
    String,
    /// Opaque bytes
    #[default]
    Binary,
}

impl MessageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Binary => "binary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Persistence {
    NotPersistent,
    Persistent,
    /// Use the destination's default persistence
    #[default]
    AsDestinationDefault,
}

bitflags! {
    /// Report options carried on a message. A responder reads them to decide
    /// how to populate a reply's identifiers, expiry and report fields.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ReportOptions: u32 {
        /// Reply correlation id is the request's message id (default behaviour)
        const COPY_MSG_ID_TO_CORREL_ID = 1 << 0;
        /// Reply gets a freshly generated message id (default behaviour)
        const NEW_MSG_ID = 1 << 1;
        /// Reply correlation id is the request's correlation id
        const PASS_CORREL_ID = 1 << 6;
        /// Reply message id is the request's message id
        const PASS_MSG_ID = 1 << 7;
        /// Reply inherits the request's expiry and discard option
        const PASS_DISCARD_AND_EXPIRY = 1 << 14;
        /// Discard the message if it cannot be delivered
        const DISCARD_MSG = 1 << 27;
    }
}

impl ReportOptions {
    /// No report options
    pub const NONE: Self = Self::empty();

    /// The options that control how reply identifiers are set
    pub const IDENTIFIER_OPTIONS: Self = Self::COPY_MSG_ID_TO_CORREL_ID
        .union(Self::PASS_MSG_ID)
        .union(Self::PASS_CORREL_ID)
        .union(Self::NEW_MSG_ID);
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be sent through the broker
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_id: MessageId,
    pub correlation_id: CorrelationId,
    pub reply_to: Option<ReplyTo>,
    pub message_type: MessageType,
    pub format: MessageFormat,
    pub persistence: Persistence,
    pub report: ReportOptions,
    pub time_to_live: Option<Duration>,
    pub body: Bytes,
}

impl Message {
    /// Create new datagram with body; the broker assigns the message id
    pub fn new(body: Bytes) -> Self {
        Self {
            message_id: MessageId::NONE,
            correlation_id: CorrelationId::NONE,
            reply_to: None,
            message_type: MessageType::Datagram,
            format: MessageFormat::Binary,
            persistence: Persistence::AsDestinationDefault,
            report: ReportOptions::NONE,
            time_to_live: None,
            body,
        }
    }

    /// Create a message carrying character data
    pub fn text(body: impl Into<Bytes>) -> Self {
        Self::new(body.into()).with_format(MessageFormat::String)
    }

    pub fn with_message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_reply_to(mut self, reply_to: ReplyTo) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    pub fn with_message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_format(mut self, format: MessageFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_report(mut self, report: ReportOptions) -> Self {
        self.report = report;
        self
    }

    /// Add time-to-live for message expiration
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }
}

/// A message taken from a destination: one delivery attempt, with the
/// broker-maintained backout count
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Descriptor and body as stored; `time_to_live` holds the remaining lifetime
    pub message: Message,
    /// Number of times this message was previously backed out
    pub backout_count: u32,
    pub put_time: Timestamp,
    /// Name of the queue the message was taken from
    pub source: String,
}

impl ReceivedMessage {
    pub fn message_id(&self) -> MessageId {
        self.message.message_id
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.message.correlation_id
    }

    pub fn body(&self) -> &Bytes {
        &self.message.body
    }

    /// Check if message has reached the backout threshold
    pub fn has_reached_backout_threshold(&self, threshold: u32) -> bool {
        self.backout_count >= threshold
    }
}

// ============================================================================
// Put and Get Options
// ============================================================================

/// Options for putting messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Put inside the current unit of work; visible only after commit
    pub syncpoint: bool,
}

impl PutOptions {
    pub fn syncpoint() -> Self {
        Self { syncpoint: true }
    }

    pub fn no_syncpoint() -> Self {
        Self { syncpoint: false }
    }
}

/// Options for getting messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetOptions {
    /// How long to wait for a message before reporting none available
    pub wait: std::time::Duration,
    /// Take the message inside the current unit of work
    pub syncpoint: bool,
    /// Only return a message with this correlation id
    pub match_correlation_id: Option<CorrelationId>,
    /// Inspect without removing
    pub browse: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            wait: std::time::Duration::from_secs(5),
            syncpoint: false,
            match_correlation_id: None,
            browse: false,
        }
    }
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wait(mut self, wait: std::time::Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Return immediately if no message is available
    pub fn no_wait(mut self) -> Self {
        self.wait = std::time::Duration::ZERO;
        self
    }

    pub fn with_syncpoint(mut self) -> Self {
        self.syncpoint = true;
        self
    }

    pub fn matching(mut self, correlation_id: CorrelationId) -> Self {
        self.match_correlation_id = Some(correlation_id);
        self
    }

    pub fn browse(mut self) -> Self {
        self.browse = true;
        self.syncpoint = false;
        self
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
