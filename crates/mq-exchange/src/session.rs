//! Connection sessions.
//!
//! A [`Session`] owns at most one live broker connection and every
//! destination handle opened through it. Operations take `&mut self`, so a
//! session is driven by a single worker at a time; independent sessions may
//! run concurrently.
//!
//! Teardown order matters: [`Session::close`] closes every open handle
//! (including the cached backout-queue handle) before disconnecting, and is
//! safe to call repeatedly or after a partial failure.

use crate::connection::{BrokerConnection, BrokerProvider, ConnectParams, OpenMode};
use crate::error::ExchangeError;
use crate::message::{
    Destination, GetOptions, Message, MessageId, PutOptions, QueueName, ReceivedMessage,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

/// An open destination belonging to exactly one [`Session`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationHandle {
    session_id: Uuid,
    handle: u64,
    destination: Destination,
    mode: OpenMode,
}

impl DestinationHandle {
    /// Resolved destination name (broker-generated for dynamic queues and
    /// managed subscriptions)
    pub fn name(&self) -> &str {
        &self.destination.name
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn id(&self) -> u64 {
        self.handle
    }
}

/// A connection to one broker endpoint and the handles opened on it
pub struct Session {
    id: Uuid,
    endpoint: String,
    connection: Option<Box<dyn BrokerConnection>>,
    open_handles: BTreeMap<u64, Destination>,
    backout_queue: Option<DestinationHandle>,
    uncommitted: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("connected", &self.connection.is_some())
            .field("open_handles", &self.open_handles.len())
            .finish()
    }
}

impl Session {
    /// Connect to the endpoint described by `params`
    pub async fn connect(
        provider: &dyn BrokerProvider,
        params: &ConnectParams,
    ) -> Result<Self, ExchangeError> {
        let endpoint = params.endpoint_label();
        info!(endpoint = %endpoint, "Establishing connection");

        let connection = provider.connect(params).await.map_err(|e| {
            warn!(endpoint = %endpoint, error = %e, "Connection failed");
            e
        })?;

        Ok(Self::from_connection(connection, endpoint))
    }

    /// Wrap an already established connection
    pub fn from_connection(connection: Box<dyn BrokerConnection>, endpoint: String) -> Self {
        let id = Uuid::new_v4();
        debug!(session_id = %id, endpoint = %endpoint, "Session created");
        Self {
            id,
            endpoint,
            connection: Some(connection),
            open_handles: BTreeMap::new(),
            backout_queue: None,
            uncommitted: false,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn open_handle_count(&self) -> usize {
        self.open_handles.len()
    }

    /// Whether gets or puts have been made under syncpoint since the last
    /// commit or backout
    pub fn has_uncommitted_work(&self) -> bool {
        self.uncommitted
    }

    fn connection_mut(&mut self) -> Result<&mut Box<dyn BrokerConnection>, ExchangeError> {
        self.connection.as_mut().ok_or(ExchangeError::SessionClosed)
    }

    fn check_handle(&self, handle: &DestinationHandle) -> Result<(), ExchangeError> {
        if self.connection.is_none() {
            return Err(ExchangeError::SessionClosed);
        }

        if handle.session_id != self.id || !self.open_handles.contains_key(&handle.handle) {
            return Err(ExchangeError::InvalidHandle {
                handle: handle.handle,
            });
        }

        Ok(())
    }

    fn register(
        &mut self,
        handle: u64,
        destination: Destination,
        mode: OpenMode,
    ) -> DestinationHandle {
        self.open_handles.insert(handle, destination.clone());
        DestinationHandle {
            session_id: self.id,
            handle,
            destination,
            mode,
        }
    }

    // ------------------------------------------------------------------------
    // Opening destinations
    // ------------------------------------------------------------------------

    /// Open a queue or topic
    pub async fn open(
        &mut self,
        destination: &Destination,
        mode: OpenMode,
    ) -> Result<DestinationHandle, ExchangeError> {
        let opened = self.connection_mut()?.open(destination, mode).await.map_err(|e| {
            warn!(destination = %destination, mode = ?mode, error = %e, "Open failed");
            e
        })?;

        info!(destination = %destination, mode = ?mode, "Opened destination");
        let resolved = Destination {
            name: opened.name,
            kind: destination.kind,
            owner_qualifier: destination.owner_qualifier.clone(),
        };
        Ok(self.register(opened.handle, resolved, mode))
    }

    /// Create a temporary dynamic queue from a model queue, open for
    /// exclusive input. The queue disappears when its handle is closed.
    pub async fn open_dynamic(
        &mut self,
        model_queue: &str,
        name_prefix: &str,
    ) -> Result<DestinationHandle, ExchangeError> {
        let opened = self
            .connection_mut()?
            .open_dynamic(model_queue, name_prefix)
            .await
            .map_err(|e| {
                warn!(model_queue = %model_queue, error = %e, "Opening model queue failed");
                e
            })?;

        info!(model_queue = %model_queue, dynamic_queue = %opened.name, "Created dynamic queue");
        Ok(self.register(
            opened.handle,
            Destination::queue(opened.name),
            OpenMode::InputExclusive,
        ))
    }

    /// Create a managed subscription to `topic`; the handle reads publications
    pub async fn subscribe(&mut self, topic: &str) -> Result<DestinationHandle, ExchangeError> {
        let opened = self.connection_mut()?.subscribe(topic).await.map_err(|e| {
            warn!(topic = %topic, error = %e, "Subscription failed");
            e
        })?;

        info!(topic = %topic, managed_queue = %opened.name, "Subscribed to topic");
        Ok(self.register(opened.handle, Destination::queue(opened.name), OpenMode::Input))
    }

    /// Output handle to the backout queue, opened on first use and kept
    /// until the session closes
    pub async fn backout_queue(
        &mut self,
        name: &QueueName,
    ) -> Result<DestinationHandle, ExchangeError> {
        if let Some(handle) = &self.backout_queue {
            if handle.name() == name.as_str() {
                return Ok(handle.clone());
            }
        }

        if let Some(previous) = self.backout_queue.take() {
            self.close_handle(previous).await?;
        }

        let handle = self.open(&Destination::from(name), OpenMode::Output).await?;
        self.backout_queue = Some(handle.clone());
        Ok(handle)
    }

    pub async fn close_handle(&mut self, handle: DestinationHandle) -> Result<(), ExchangeError> {
        self.check_handle(&handle)?;
        self.open_handles.remove(&handle.handle);
        if self
            .backout_queue
            .as_ref()
            .is_some_and(|b| b.handle == handle.handle)
        {
            self.backout_queue = None;
        }

        debug!(destination = %handle.destination, "Closing destination");
        self.connection_mut()?.close(handle.handle).await
    }

    // ------------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------------

    /// Put a message; returns the message id actually used
    pub async fn put(
        &mut self,
        handle: &DestinationHandle,
        message: &Message,
        options: PutOptions,
    ) -> Result<MessageId, ExchangeError> {
        self.check_handle(handle)?;
        let id = self
            .connection_mut()?
            .put(handle.handle, message, &options)
            .await
            .map_err(|e| {
                warn!(destination = %handle.destination, error = %e, "Put failed");
                e
            })?;

        self.uncommitted |= options.syncpoint;
        debug!(
            destination = %handle.destination,
            message_id = %id,
            syncpoint = options.syncpoint,
            "Put message"
        );
        Ok(id)
    }

    /// Put a single message without keeping a handle open
    pub async fn put1(
        &mut self,
        destination: &Destination,
        message: &Message,
        options: PutOptions,
    ) -> Result<MessageId, ExchangeError> {
        let id = self
            .connection_mut()?
            .put1(destination, message, &options)
            .await
            .map_err(|e| {
                warn!(destination = %destination, error = %e, "Put1 failed");
                e
            })?;

        self.uncommitted |= options.syncpoint;
        debug!(destination = %destination, message_id = %id, "Put message");
        Ok(id)
    }

    /// Get a message, waiting up to `options.wait`. `Ok(None)` is the
    /// normal "no message available" outcome.
    pub async fn get(
        &mut self,
        handle: &DestinationHandle,
        options: &GetOptions,
    ) -> Result<Option<ReceivedMessage>, ExchangeError> {
        self.check_handle(handle)?;
        if !handle.mode.is_input() {
            return Err(ExchangeError::ReceiveFailed {
                destination: handle.name().to_string(),
                message: "destination is not open for input".to_string(),
            });
        }

        let received = self.connection_mut()?.get(handle.handle, options).await?;
        if received.is_some() && options.syncpoint && !options.browse {
            self.uncommitted = true;
        }
        Ok(received)
    }

    /// Make all syncpoint gets and puts since the last commit or backout
    /// permanent
    pub async fn commit(&mut self) -> Result<(), ExchangeError> {
        self.connection_mut()?.commit().await?;
        self.uncommitted = false;
        Ok(())
    }

    /// Undo all syncpoint gets and puts since the last commit or backout;
    /// gotten messages become available again with their backout count
    /// incremented
    pub async fn backout(&mut self) -> Result<(), ExchangeError> {
        self.connection_mut()?.backout().await?;
        self.uncommitted = false;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Close every open handle, then disconnect. Idempotent; every close is
    /// attempted even if an earlier one fails, and the first error is
    /// returned.
    pub async fn close(&mut self) -> Result<(), ExchangeError> {
        let Some(mut connection) = self.connection.take() else {
            return Ok(());
        };

        if self.uncommitted {
            warn!(
                endpoint = %self.endpoint,
                "Closing session with uncommitted work; it will be backed out"
            );
        }

        let mut first_error = None;
        self.backout_queue = None;

        // Close in reverse open order
        let handles = std::mem::take(&mut self.open_handles);
        for (handle, destination) in handles.into_iter().rev() {
            if let Err(e) = connection.close(handle).await {
                warn!(destination = %destination, error = %e, "Closing destination failed");
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = connection.disconnect().await {
            warn!(endpoint = %self.endpoint, error = %e, "Disconnect failed");
            first_error.get_or_insert(e);
        }

        self.uncommitted = false;
        info!(endpoint = %self.endpoint, "Session closed");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.connection.is_some() {
            warn!(
                session_id = %self.id,
                endpoint = %self.endpoint,
                "Session dropped without close; the provider will reclaim its resources"
            );
        }
    }
}
