//! Provider seam: the traits a broker implementation must satisfy.
//!
//! [`BrokerProvider`] establishes connections; [`BrokerConnection`] is one
//! live connection with its own unit of work. Everything above this seam
//! ([`Session`](crate::session::Session), the receiver, the request client)
//! is provider-agnostic.

use crate::error::ExchangeError;
use crate::message::{Destination, GetOptions, Message, MessageId, PutOptions, ReceivedMessage};
use async_trait::async_trait;
use std::fmt;

/// How a destination is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    /// Shared input
    Input,
    /// Input that no other connection may share
    InputExclusive,
    Output,
}

impl OpenMode {
    pub fn is_input(&self) -> bool {
        matches!(self, Self::Input | Self::InputExclusive)
    }
}

/// User credentials presented on connect
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// TLS settings passed through to the provider
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TlsSettings {
    pub cipher_spec: Option<String>,
    pub key_repository: Option<String>,
}

/// Everything a provider needs to connect to one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub queue_manager: String,
    /// `host(port)` list; `None` when a CCDT resolves the channel
    pub connection_name: Option<String>,
    pub channel: Option<String>,
    pub ccdt_url: Option<String>,
    pub credentials: Option<Credentials>,
    pub tls: Option<TlsSettings>,
}

impl ConnectParams {
    pub fn new(queue_manager: impl Into<String>) -> Self {
        Self {
            queue_manager: queue_manager.into(),
            connection_name: None,
            channel: None,
            ccdt_url: None,
            credentials: None,
            tls: None,
        }
    }

    pub fn with_connection_name(mut self, connection_name: impl Into<String>) -> Self {
        self.connection_name = Some(connection_name.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_credentials(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            user: user.into(),
            password: password.into(),
        });
        self
    }

    /// Name used to identify the endpoint in logs and errors
    pub fn endpoint_label(&self) -> String {
        match (&self.connection_name, &self.ccdt_url) {
            (Some(conn), _) => format!("{}@{}", self.queue_manager, conn),
            (None, Some(ccdt)) => format!("{}@{}", self.queue_manager, ccdt),
            (None, None) => self.queue_manager.clone(),
        }
    }
}

/// A broker object opened on a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedObject {
    /// Provider handle, unique within the connection
    pub handle: u64,
    /// Resolved object name (broker-generated for dynamic and managed queues)
    pub name: String,
}

/// Establishes connections to a broker
#[async_trait]
pub trait BrokerProvider: Send + Sync {
    /// Connect to the endpoint described by `params`
    async fn connect(&self, params: &ConnectParams)
        -> Result<Box<dyn BrokerConnection>, ExchangeError>;
}

/// One live broker connection. Not safe for concurrent use; callers
/// serialise access (the [`Session`](crate::session::Session) does this
/// through `&mut self`).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerConnection: Send {
    /// Open a queue or topic
    async fn open(
        &mut self,
        destination: &Destination,
        mode: OpenMode,
    ) -> Result<OpenedObject, ExchangeError>;

    /// Open a model queue for exclusive input, creating a temporary dynamic
    /// queue named from `name_prefix` (a trailing `*` is replaced by a
    /// unique suffix). The queue is deleted when closed.
    async fn open_dynamic(
        &mut self,
        model_queue: &str,
        name_prefix: &str,
    ) -> Result<OpenedObject, ExchangeError>;

    /// Create a managed, non-durable subscription to a topic string. The
    /// returned object is the broker-created queue publications arrive on.
    async fn subscribe(&mut self, topic: &str) -> Result<OpenedObject, ExchangeError>;

    async fn close(&mut self, handle: u64) -> Result<(), ExchangeError>;

    async fn put(
        &mut self,
        handle: u64,
        message: &Message,
        options: &PutOptions,
    ) -> Result<MessageId, ExchangeError>;

    /// Open, put one message and close in a single call
    async fn put1(
        &mut self,
        destination: &Destination,
        message: &Message,
        options: &PutOptions,
    ) -> Result<MessageId, ExchangeError>;

    /// `Ok(None)` means no message arrived within the wait interval
    async fn get(
        &mut self,
        handle: u64,
        options: &GetOptions,
    ) -> Result<Option<ReceivedMessage>, ExchangeError>;

    async fn commit(&mut self) -> Result<(), ExchangeError>;

    async fn backout(&mut self) -> Result<(), ExchangeError>;

    async fn disconnect(&mut self) -> Result<(), ExchangeError>;
}
