//! # MQ Exchange
//!
//! Transactional messaging patterns over a point-to-point and
//! publish/subscribe broker.
//!
//! This library provides:
//! - Connection sessions owning their destination handles
//! - Request/response with temporary reply queues and correlation matching
//! - A syncpoint receive loop with backout and poison-message redirection
//! - Reply routing driven by the requester's report options
//! - Basic put/get and publish/subscribe consumption
//! - Endpoint failover over a JSON endpoint configuration
//! - An in-memory broker for tests and local runs
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all exchange operations
//! - [`message`] - Message descriptors, identifiers and options
//! - [`codec`] - JSON payload codec
//! - [`connection`] - Provider traits
//! - [`session`] - Sessions and destination handles
//! - [`router`] - Reply routing
//! - [`correlation`] - Request preparation and reply matching
//! - [`receiver`] - Transactional receive loop
//! - [`request`] - Requester client
//! - [`consumer`] - Non-transactional drain loop
//! - [`config`] - Endpoint configuration
//! - [`endpoints`] - Endpoint failover
//! - [`providers`] - Provider implementations
//!
//! ## Example
//!
//! ```
//! use mq_exchange::{
//!     ConnectParams, Destination, GetOptions, InMemoryBroker, Message, OpenMode, PutOptions,
//!     Session,
//! };
//!
//! # tokio_test::block_on(async {
//! let broker = InMemoryBroker::default();
//! let params = ConnectParams::new("QM1").with_connection_name("localhost(1414)");
//! let mut session = Session::connect(&broker, &params).await?;
//!
//! let queue = Destination::queue("DEV.QUEUE.1");
//! session
//!     .put1(&queue, &Message::text(r#"{"value": 42}"#), PutOptions::no_syncpoint())
//!     .await?;
//!
//! let input = session.open(&queue, OpenMode::Input).await?;
//! let received = session.get(&input, &GetOptions::new().no_wait()).await?;
//! assert!(received.is_some());
//!
//! session.close().await?;
//! # Ok::<(), mq_exchange::ExchangeError>(())
//! # }).unwrap();
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod correlation;
pub mod endpoints;
pub mod error;
pub mod message;
pub mod providers;
pub mod receiver;
pub mod request;
pub mod router;
pub mod session;

pub use crate::config::{ConnectionConfig, Endpoint, EndpointConfig};
pub use codec::JsonCodec;
pub use connection::{
    BrokerConnection, BrokerProvider, ConnectParams, Credentials, OpenMode, TlsSettings,
};
pub use consumer::{DrainSummary, SimpleConsumer};
pub use correlation::{CorrelationEngine, MatchOutcome};
pub use endpoints::{EndpointTask, Failover};
pub use error::{
    ConfigurationError, DecodeError, ExchangeError, OpenFailureReason, RoutingError,
    ValidationError,
};
pub use message::{
    CorrelationId, Destination, DestinationKind, GetOptions, Message, MessageFormat, MessageId,
    MessageType, Persistence, PutOptions, QueueName, ReceivedMessage, ReplyTo, ReportOptions,
    Timestamp,
};
pub use providers::{InMemoryBroker, InMemoryConfig};
pub use receiver::{
    Disposition, MessageHandler, ReceiveSummary, ReceiverConfig, ReceiverState, RedirectPolicy,
    ReplyContext, StopReason, TransactionalReceiver,
};
pub use request::{PendingRequest, ReplyOutcome, RequestOptions, RequestResponseClient};
pub use router::{ReplyRouter, RoutedReply};
pub use session::{DestinationHandle, Session};
