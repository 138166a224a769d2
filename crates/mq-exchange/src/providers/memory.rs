//! In-memory broker provider implementation for testing and development.
//!
//! This module provides a fully functional in-process broker that:
//! - Supports syncpoint units of work per connection (commit / backout)
//! - Maintains backout counts across redeliveries
//! - Creates temporary dynamic queues from model queues
//! - Delivers topic publications to managed subscriptions
//! - Enforces exclusive input, put-inhibit, maximum depth, maximum message
//!   length and message expiry
//!
//! Waiting gets park on a shared [`Notify`] and are woken whenever messages
//! become visible; they never spin.

use crate::connection::{
    BrokerConnection, BrokerProvider, ConnectParams, Credentials, OpenMode, OpenedObject,
};
use crate::error::{ExchangeError, OpenFailureReason};
use crate::message::{
    Destination, DestinationKind, GetOptions, Message, MessageId, PutOptions, QueueName,
    ReceivedMessage, Timestamp,
};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

const MANAGED_QUEUE_PREFIX: &str = "SYSTEM.MANAGED.NDURABLE.";

// ============================================================================
// Configuration
// ============================================================================

/// In-memory broker configuration
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    pub queue_manager: String,
    /// Connection names (`host(port)`) the broker accepts connections on
    pub listeners: Vec<String>,
    /// Local queues defined at startup
    pub queues: Vec<String>,
    /// Model queues usable as templates for dynamic queues
    pub model_queues: Vec<String>,
    /// When set, connections must present exactly these credentials
    pub credentials: Option<Credentials>,
    pub max_queue_depth: usize,
    pub max_message_length: usize,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            queue_manager: "QM1".to_string(),
            listeners: vec!["localhost(1414)".to_string()],
            queues: vec![
                "DEV.QUEUE.1".to_string(),
                "DEV.QUEUE.2".to_string(),
                "DEV.QUEUE.3".to_string(),
                "DEV.DEAD.LETTER.QUEUE".to_string(),
            ],
            model_queues: vec!["DEV.APP.MODEL.QUEUE".to_string()],
            credentials: None,
            max_queue_depth: 5000,
            max_message_length: 4 * 1024 * 1024,
        }
    }
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// A message stored on a queue with broker-maintained metadata
#[derive(Debug, Clone)]
struct StoredMessage {
    message: Message,
    backout_count: u32,
    put_time: Timestamp,
    expires_at: Option<Timestamp>,
}

impl StoredMessage {
    fn new(message: &Message, queue_manager: &str) -> Self {
        let now = Timestamp::now();
        let mut message = message.clone();

        if message.message_id.is_none() {
            message.message_id = MessageId::generate();
        }

        // The broker records where replies should be routed
        if let Some(reply_to) = message.reply_to.as_mut() {
            if reply_to.queue_manager.as_deref().map_or(true, |q| q.trim().is_empty()) {
                reply_to.queue_manager = Some(queue_manager.to_string());
            }
        }

        let expires_at = message
            .time_to_live
            .map(|ttl| Timestamp::from_datetime(now.as_datetime() + ttl));

        Self {
            message,
            backout_count: 0,
            put_time: now,
            expires_at,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .as_ref()
            .is_some_and(|expires_at| Timestamp::now() >= *expires_at)
    }

    fn to_received(&self, source: &str) -> ReceivedMessage {
        let mut message = self.message.clone();
        message.time_to_live = self
            .expires_at
            .as_ref()
            .map(|expires_at| expires_at.as_datetime() - Timestamp::now().as_datetime());

        ReceivedMessage {
            message,
            backout_count: self.backout_count,
            put_time: self.put_time.clone(),
            source: source.to_string(),
        }
    }
}

/// State of a single queue
#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<StoredMessage>,
    put_inhibited: bool,
    /// Connection owning a temporary queue
    owner: Option<u64>,
    exclusive_reader: Option<u64>,
    shared_readers: usize,
}

/// Thread-safe storage for the whole broker
#[derive(Debug)]
struct BrokerState {
    config: InMemoryConfig,
    queues: HashMap<String, QueueState>,
    model_queues: HashSet<String>,
    /// Topic string to managed subscription queue names
    subscriptions: HashMap<String, BTreeSet<String>>,
    listeners: HashSet<String>,
    next_connection_id: u64,
    next_generated_name: u64,
}

impl BrokerState {
    fn new(config: InMemoryConfig) -> Self {
        let queues = config
            .queues
            .iter()
            .map(|name| (name.clone(), QueueState::default()))
            .collect();
        let model_queues = config.model_queues.iter().cloned().collect();
        let listeners = config.listeners.iter().cloned().collect();

        Self {
            config,
            queues,
            model_queues,
            subscriptions: HashMap::new(),
            listeners,
            next_connection_id: 1,
            next_generated_name: 1,
        }
    }

    /// Unique suffix for broker-generated object names
    fn generated_suffix(&mut self) -> String {
        let counter = self.next_generated_name;
        self.next_generated_name += 1;
        let millis = Timestamp::now().as_datetime().timestamp_millis() as u64;
        format!("{:08X}{:08X}", millis & 0xFFFF_FFFF, counter & 0xFFFF_FFFF)
    }

    fn remove_queue(&mut self, name: &str) {
        self.queues.remove(name);
        for subscribers in self.subscriptions.values_mut() {
            subscribers.remove(name);
        }
        self.subscriptions.retain(|_, subscribers| !subscribers.is_empty());
    }

    /// Delete every temporary queue created by `connection_id`
    fn remove_owned_queues(&mut self, connection_id: u64) -> usize {
        let owned: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, queue)| queue.owner == Some(connection_id))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &owned {
            self.remove_queue(name);
        }
        owned.len()
    }

    /// Queues a put to `target` lands on
    fn resolve_targets(&self, target: &ObjectTarget) -> Vec<String> {
        match target {
            ObjectTarget::Queue(name) => vec![name.clone()],
            ObjectTarget::Topic(topic) => self
                .subscriptions
                .get(topic)
                .map(|subscribers| subscribers.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }

    fn check_remote(&self, destination: &Destination) -> Result<(), ExchangeError> {
        match &destination.owner_qualifier {
            Some(owner) if owner != &self.config.queue_manager => Err(ExchangeError::OpenFailed {
                destination: destination.to_string(),
                reason: OpenFailureReason::UnknownQueueManager(owner.clone()),
            }),
            _ => Ok(()),
        }
    }
}

struct BrokerShared {
    state: Mutex<BrokerState>,
    arrivals: Notify,
}

impl BrokerShared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// InMemoryBroker
// ============================================================================

/// In-process broker; clones share the same queues
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<BrokerShared>,
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("InMemoryBroker")
            .field("queue_manager", &state.config.queue_manager)
            .field("queues", &state.queues.len())
            .finish()
    }
}

impl InMemoryBroker {
    /// Create new in-memory broker with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            shared: Arc::new(BrokerShared {
                state: Mutex::new(BrokerState::new(config)),
                arrivals: Notify::new(),
            }),
        }
    }

    pub fn queue_manager(&self) -> String {
        self.shared.lock().config.queue_manager.clone()
    }

    /// Define a local queue; an existing queue is left untouched
    pub fn define_queue(&self, name: &str) {
        self.shared
            .lock()
            .queues
            .entry(name.to_string())
            .or_default();
    }

    pub fn define_model_queue(&self, name: &str) {
        self.shared.lock().model_queues.insert(name.to_string());
    }

    /// Inhibit or allow puts to a queue. Returns false if the queue does not exist.
    pub fn set_put_inhibited(&self, name: &str, inhibited: bool) -> bool {
        match self.shared.lock().queues.get_mut(name) {
            Some(queue) => {
                queue.put_inhibited = inhibited;
                true
            }
            None => false,
        }
    }

    /// Start accepting connections on `connection_name`
    pub fn add_listener(&self, connection_name: &str) {
        self.shared
            .lock()
            .listeners
            .insert(connection_name.to_string());
    }

    /// Stop accepting new connections on `connection_name`
    pub fn remove_listener(&self, connection_name: &str) {
        self.shared.lock().listeners.remove(connection_name);
    }

    /// Number of committed, unexpired messages on a queue
    pub fn queue_depth(&self, name: &str) -> Option<usize> {
        self.shared
            .lock()
            .queues
            .get(name)
            .map(|queue| queue.messages.iter().filter(|m| !m.is_expired()).count())
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.shared.lock().queues.contains_key(name)
    }

    /// Snapshot of the committed messages on a queue, in delivery order
    pub fn browse_queue(&self, name: &str) -> Vec<ReceivedMessage> {
        self.shared
            .lock()
            .queues
            .get(name)
            .map(|queue| {
                queue
                    .messages
                    .iter()
                    .filter(|m| !m.is_expired())
                    .map(|m| m.to_received(name))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of managed subscriptions on a topic string
    pub fn subscription_count(&self, topic: &str) -> usize {
        self.shared
            .lock()
            .subscriptions
            .get(topic)
            .map_or(0, BTreeSet::len)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl BrokerProvider for InMemoryBroker {
    async fn connect(
        &self,
        params: &ConnectParams,
    ) -> Result<Box<dyn BrokerConnection>, ExchangeError> {
        let endpoint = params.endpoint_label();
        let mut state = self.shared.lock();

        if let Some(connection_name) = &params.connection_name {
            let reachable = connection_name
                .split(',')
                .any(|candidate| state.listeners.contains(candidate.trim()));
            if !reachable {
                return Err(ExchangeError::ConnectFailed {
                    endpoint,
                    message: "host not available".to_string(),
                });
            }
        }

        let queue_manager = state.config.queue_manager.clone();
        if !params.queue_manager.trim().is_empty() && params.queue_manager != queue_manager {
            return Err(ExchangeError::ConnectFailed {
                endpoint,
                message: format!("queue manager name error: '{}'", params.queue_manager),
            });
        }

        if let Some(required) = &state.config.credentials {
            if params.credentials.as_ref() != Some(required) {
                let user = params
                    .credentials
                    .as_ref()
                    .map(|c| c.user.clone())
                    .unwrap_or_default();
                return Err(ExchangeError::AuthenticationFailed { endpoint, user });
            }
        }

        let id = state.next_connection_id;
        state.next_connection_id += 1;
        drop(state);

        if params.tls.is_some() {
            debug!(
                endpoint = %endpoint,
                "TLS settings supplied; the in-memory broker does not negotiate TLS"
            );
        }

        info!(endpoint = %endpoint, connection_id = id, "Connected");
        Ok(Box::new(InMemoryConnection {
            id,
            shared: Arc::clone(&self.shared),
            queue_manager,
            handles: HashMap::new(),
            next_handle: 1,
            unit_of_work: UnitOfWork::default(),
            connected: true,
        }))
    }
}

// ============================================================================
// InMemoryConnection
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum ObjectTarget {
    Queue(String),
    Topic(String),
}

#[derive(Debug)]
struct OpenObject {
    target: ObjectTarget,
    mode: OpenMode,
    /// Delete the queue on close (dynamic queues, managed subscriptions)
    temporary: bool,
}

/// Syncpoint gets and puts not yet committed or backed out
#[derive(Debug, Default)]
struct UnitOfWork {
    gets: Vec<(String, StoredMessage)>,
    puts: Vec<(String, StoredMessage)>,
}

impl UnitOfWork {
    fn pending_puts_to(&self, queue: &str) -> usize {
        self.puts.iter().filter(|(q, _)| q == queue).count()
    }
}

/// One connection to an [`InMemoryBroker`]
pub struct InMemoryConnection {
    id: u64,
    shared: Arc<BrokerShared>,
    queue_manager: String,
    handles: HashMap<u64, OpenObject>,
    next_handle: u64,
    unit_of_work: UnitOfWork,
    connected: bool,
}

impl InMemoryConnection {
    fn ensure_connected(&self) -> Result<(), ExchangeError> {
        if self.connected {
            Ok(())
        } else {
            Err(ExchangeError::SessionClosed)
        }
    }

    fn allocate_handle(&mut self, object: OpenObject) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(handle, object);
        handle
    }

    fn object(&self, handle: u64) -> Result<&OpenObject, ExchangeError> {
        self.handles
            .get(&handle)
            .ok_or(ExchangeError::InvalidHandle { handle })
    }

    /// Validate an output target and return where puts go
    fn output_target(
        state: &BrokerState,
        destination: &Destination,
    ) -> Result<ObjectTarget, ExchangeError> {
        match destination.kind {
            DestinationKind::Queue => {
                state.check_remote(destination)?;
                if !state.queues.contains_key(&destination.name) {
                    return Err(ExchangeError::OpenFailed {
                        destination: destination.to_string(),
                        reason: OpenFailureReason::NotFound,
                    });
                }
                Ok(ObjectTarget::Queue(destination.name.clone()))
            }
            DestinationKind::Topic => {
                if destination.name.trim().is_empty() {
                    return Err(ExchangeError::OpenFailed {
                        destination: destination.to_string(),
                        reason: OpenFailureReason::Other("empty topic string".to_string()),
                    });
                }
                Ok(ObjectTarget::Topic(destination.name.clone()))
            }
        }
    }

    fn put_to_target(
        &mut self,
        target: &ObjectTarget,
        label: &str,
        message: &Message,
        options: &PutOptions,
    ) -> Result<MessageId, ExchangeError> {
        let mut state = self.shared.lock();

        if message.body.len() > state.config.max_message_length {
            return Err(ExchangeError::SendFailed {
                destination: label.to_string(),
                message: format!(
                    "message length {} exceeds maximum {}",
                    message.body.len(),
                    state.config.max_message_length
                ),
            });
        }

        let targets = state.resolve_targets(target);
        let max_depth = state.config.max_queue_depth;
        for queue_name in &targets {
            let queue = state
                .queues
                .get(queue_name)
                .ok_or_else(|| ExchangeError::SendFailed {
                    destination: label.to_string(),
                    message: format!("queue '{}' no longer exists", queue_name),
                })?;

            if queue.put_inhibited {
                return Err(ExchangeError::SendFailed {
                    destination: label.to_string(),
                    message: "put inhibited".to_string(),
                });
            }

            if queue.messages.len() + self.unit_of_work.pending_puts_to(queue_name) >= max_depth {
                return Err(ExchangeError::SendFailed {
                    destination: label.to_string(),
                    message: format!("queue full (max depth {})", max_depth),
                });
            }
        }

        let stored = StoredMessage::new(message, &self.queue_manager);
        let message_id = stored.message.message_id;

        if targets.is_empty() {
            debug!(topic = %label, "Publication matched no subscriptions");
        }

        if options.syncpoint {
            for queue_name in targets {
                self.unit_of_work.puts.push((queue_name, stored.clone()));
            }
        } else {
            for queue_name in targets {
                if let Some(queue) = state.queues.get_mut(&queue_name) {
                    queue.messages.push_back(stored.clone());
                }
            }
            drop(state);
            self.shared.arrivals.notify_waiters();
        }

        Ok(message_id)
    }

    fn try_get(
        &mut self,
        queue_name: &str,
        options: &GetOptions,
    ) -> Result<Option<ReceivedMessage>, ExchangeError> {
        let mut state = self.shared.lock();
        let queue = state
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| ExchangeError::ReceiveFailed {
                destination: queue_name.to_string(),
                message: "queue no longer exists".to_string(),
            })?;

        let before = queue.messages.len();
        queue.messages.retain(|m| !m.is_expired());
        if queue.messages.len() < before {
            debug!(
                queue = %queue_name,
                expired = before - queue.messages.len(),
                "Discarded expired messages"
            );
        }

        let position = queue.messages.iter().position(|m| {
            options
                .match_correlation_id
                .map_or(true, |correl| m.message.correlation_id == correl)
        });

        let Some(position) = position else {
            return Ok(None);
        };

        if options.browse {
            return Ok(queue.messages.get(position).map(|m| m.to_received(queue_name)));
        }

        let Some(stored) = queue.messages.remove(position) else {
            return Ok(None);
        };
        let received = stored.to_received(queue_name);

        if options.syncpoint {
            self.unit_of_work.gets.push((queue_name.to_string(), stored));
        }

        Ok(Some(received))
    }

    fn commit_unit_of_work(&mut self) {
        let puts = std::mem::take(&mut self.unit_of_work.puts);
        self.unit_of_work.gets.clear();

        if puts.is_empty() {
            return;
        }

        let mut state = self.shared.lock();
        for (queue_name, stored) in puts {
            match state.queues.get_mut(&queue_name) {
                Some(queue) => queue.messages.push_back(stored),
                None => debug!(queue = %queue_name, "Committed put dropped; queue was deleted"),
            }
        }
        drop(state);
        self.shared.arrivals.notify_waiters();
    }

    fn backout_unit_of_work(&mut self) {
        let gets = std::mem::take(&mut self.unit_of_work.gets);
        self.unit_of_work.puts.clear();

        if gets.is_empty() {
            return;
        }

        let mut state = self.shared.lock();
        // Restore in reverse so the earliest get ends up at the head
        for (queue_name, mut stored) in gets.into_iter().rev() {
            stored.backout_count += 1;
            if let Some(queue) = state.queues.get_mut(&queue_name) {
                queue.messages.push_front(stored);
            }
        }
        drop(state);
        self.shared.arrivals.notify_waiters();
    }

    fn release(&mut self, handle: u64) -> Result<(), ExchangeError> {
        let object = self
            .handles
            .remove(&handle)
            .ok_or(ExchangeError::InvalidHandle { handle })?;

        let ObjectTarget::Queue(queue_name) = &object.target else {
            return Ok(());
        };

        let mut state = self.shared.lock();
        if object.temporary {
            let owned = state
                .queues
                .get(queue_name)
                .is_some_and(|queue| queue.owner == Some(self.id));
            if owned {
                state.remove_queue(queue_name);
                debug!(queue = %queue_name, "Deleted temporary queue");
            }
            return Ok(());
        }

        if let Some(queue) = state.queues.get_mut(queue_name) {
            match object.mode {
                OpenMode::InputExclusive => {
                    if queue.exclusive_reader == Some(self.id) {
                        queue.exclusive_reader = None;
                    }
                }
                OpenMode::Input => queue.shared_readers = queue.shared_readers.saturating_sub(1),
                OpenMode::Output => {}
            }
        }
        Ok(())
    }

    fn teardown(&mut self) {
        if !self.connected {
            return;
        }

        self.backout_unit_of_work();
        let handles: Vec<u64> = self.handles.keys().copied().collect();
        for handle in handles {
            // The handle was just listed, so release cannot miss it
            let _ = self.release(handle);
        }

        let orphaned = self.shared.lock().remove_owned_queues(self.id);
        if orphaned > 0 {
            debug!(connection_id = self.id, orphaned, "Deleted leftover temporary queues");
        }
        self.connected = false;
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        if self.connected {
            warn!(connection_id = self.id, "Connection dropped without disconnect; backing out");
            self.teardown();
        }
    }
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    async fn open(
        &mut self,
        destination: &Destination,
        mode: OpenMode,
    ) -> Result<OpenedObject, ExchangeError> {
        self.ensure_connected()?;

        if mode == OpenMode::Output {
            let target = {
                let state = self.shared.lock();
                Self::output_target(&state, destination)?
            };
            let handle = self.allocate_handle(OpenObject {
                target,
                mode,
                temporary: false,
            });
            return Ok(OpenedObject {
                handle,
                name: destination.name.clone(),
            });
        }

        if destination.kind == DestinationKind::Topic {
            return Err(ExchangeError::OpenFailed {
                destination: destination.to_string(),
                reason: OpenFailureReason::Other(
                    "topics are read through a subscription".to_string(),
                ),
            });
        }

        {
            let mut state = self.shared.lock();
            if let Some(owner) = &destination.owner_qualifier {
                if owner != &state.config.queue_manager {
                    return Err(ExchangeError::OpenFailed {
                        destination: destination.to_string(),
                        reason: OpenFailureReason::Other(
                            "remote queues cannot be opened for input".to_string(),
                        ),
                    });
                }
            }

            let queue = state.queues.get_mut(&destination.name).ok_or_else(|| {
                ExchangeError::OpenFailed {
                    destination: destination.to_string(),
                    reason: OpenFailureReason::NotFound,
                }
            })?;

            let in_use = match mode {
                OpenMode::InputExclusive => {
                    queue.exclusive_reader.is_some() || queue.shared_readers > 0
                }
                _ => queue.exclusive_reader.is_some(),
            };
            if in_use {
                return Err(ExchangeError::OpenFailed {
                    destination: destination.to_string(),
                    reason: OpenFailureReason::InUse,
                });
            }

            match mode {
                OpenMode::InputExclusive => queue.exclusive_reader = Some(self.id),
                _ => queue.shared_readers += 1,
            }
        }

        let handle = self.allocate_handle(OpenObject {
            target: ObjectTarget::Queue(destination.name.clone()),
            mode,
            temporary: false,
        });
        Ok(OpenedObject {
            handle,
            name: destination.name.clone(),
        })
    }

    async fn open_dynamic(
        &mut self,
        model_queue: &str,
        name_prefix: &str,
    ) -> Result<OpenedObject, ExchangeError> {
        self.ensure_connected()?;

        let name = {
            let mut state = self.shared.lock();
            if !state.model_queues.contains(model_queue) {
                return Err(ExchangeError::OpenFailed {
                    destination: model_queue.to_string(),
                    reason: OpenFailureReason::NotFound,
                });
            }

            let name = match name_prefix.strip_suffix('*') {
                Some(stem) => {
                    let mut name = format!("{}{}", stem, state.generated_suffix());
                    name.truncate(QueueName::MAX_LENGTH);
                    name
                }
                None => name_prefix.to_string(),
            };

            QueueName::new(name.clone()).map_err(|e| ExchangeError::OpenFailed {
                destination: name.clone(),
                reason: OpenFailureReason::Other(e.to_string()),
            })?;

            if state.queues.contains_key(&name) {
                return Err(ExchangeError::OpenFailed {
                    destination: name,
                    reason: OpenFailureReason::Other("object already exists".to_string()),
                });
            }

            state.queues.insert(
                name.clone(),
                QueueState {
                    owner: Some(self.id),
                    exclusive_reader: Some(self.id),
                    ..QueueState::default()
                },
            );
            name
        };

        let handle = self.allocate_handle(OpenObject {
            target: ObjectTarget::Queue(name.clone()),
            mode: OpenMode::InputExclusive,
            temporary: true,
        });
        Ok(OpenedObject { handle, name })
    }

    async fn subscribe(&mut self, topic: &str) -> Result<OpenedObject, ExchangeError> {
        self.ensure_connected()?;

        if topic.trim().is_empty() {
            return Err(ExchangeError::OpenFailed {
                destination: topic.to_string(),
                reason: OpenFailureReason::Other("empty topic string".to_string()),
            });
        }

        let name = {
            let mut state = self.shared.lock();
            let name = format!("{}{}", MANAGED_QUEUE_PREFIX, state.generated_suffix());
            state.queues.insert(
                name.clone(),
                QueueState {
                    owner: Some(self.id),
                    shared_readers: 1,
                    ..QueueState::default()
                },
            );
            state
                .subscriptions
                .entry(topic.to_string())
                .or_default()
                .insert(name.clone());
            name
        };

        let handle = self.allocate_handle(OpenObject {
            target: ObjectTarget::Queue(name.clone()),
            mode: OpenMode::Input,
            temporary: true,
        });
        Ok(OpenedObject { handle, name })
    }

    async fn close(&mut self, handle: u64) -> Result<(), ExchangeError> {
        self.ensure_connected()?;
        self.release(handle)
    }

    async fn put(
        &mut self,
        handle: u64,
        message: &Message,
        options: &PutOptions,
    ) -> Result<MessageId, ExchangeError> {
        self.ensure_connected()?;
        let object = self.object(handle)?;

        let (target, label) = match &object.target {
            ObjectTarget::Queue(name) => (object.target.clone(), name.clone()),
            ObjectTarget::Topic(topic) => (object.target.clone(), topic.clone()),
        };

        if object.mode != OpenMode::Output {
            return Err(ExchangeError::SendFailed {
                destination: label,
                message: "destination is not open for output".to_string(),
            });
        }

        self.put_to_target(&target, &label, message, options)
    }

    async fn put1(
        &mut self,
        destination: &Destination,
        message: &Message,
        options: &PutOptions,
    ) -> Result<MessageId, ExchangeError> {
        self.ensure_connected()?;
        let target = {
            let state = self.shared.lock();
            Self::output_target(&state, destination)?
        };
        self.put_to_target(&target, &destination.to_string(), message, options)
    }

    async fn get(
        &mut self,
        handle: u64,
        options: &GetOptions,
    ) -> Result<Option<ReceivedMessage>, ExchangeError> {
        self.ensure_connected()?;
        let object = self.object(handle)?;
        let ObjectTarget::Queue(queue_name) = object.target.clone() else {
            return Err(ExchangeError::ReceiveFailed {
                destination: format!("{:?}", object.target),
                message: "topics are read through a subscription".to_string(),
            });
        };

        if !object.mode.is_input() {
            return Err(ExchangeError::ReceiveFailed {
                destination: queue_name,
                message: "destination is not open for input".to_string(),
            });
        }

        let start = Instant::now();
        let deadline = start
            .checked_add(options.wait)
            .unwrap_or_else(|| start + std::time::Duration::from_secs(86_400 * 365));
        let shared = Arc::clone(&self.shared);

        loop {
            // Register interest before checking so an arrival between the
            // check and the wait is not missed
            let notified = shared.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(received) = self.try_get(&queue_name, options)? {
                return Ok(Some(received));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return self.try_get(&queue_name, options);
            }
        }
    }

    async fn commit(&mut self) -> Result<(), ExchangeError> {
        self.ensure_connected()?;
        self.commit_unit_of_work();
        Ok(())
    }

    async fn backout(&mut self) -> Result<(), ExchangeError> {
        self.ensure_connected()?;
        self.backout_unit_of_work();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ExchangeError> {
        self.ensure_connected()?;
        self.teardown();
        info!(connection_id = self.id, "Disconnected");
        Ok(())
    }
}
