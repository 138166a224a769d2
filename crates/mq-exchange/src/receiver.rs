//! Transactional request processing with poison-message handling.
//!
//! The [`TransactionalReceiver`] takes each message inside a unit of work,
//! decodes it, hands it to a [`MessageHandler`] and commits only after the
//! handler (and every reply it sent) succeeded. Failures are backed out so
//! the broker redelivers the message with an incremented backout count;
//! once the count reaches the configured threshold the message is moved to
//! the backout queue instead, so a poison message cannot block the input
//! queue forever.
//!
//! ```text
//! Waiting --get--> Processing --ok--> Committing --> Waiting
//!                      |
//!                      +--fail, count < threshold--> BackingOut --> Waiting
//!                      +--fail, count >= threshold--> Redirecting --> Waiting
//! Waiting --no message--> Stopped
//! ```

use crate::codec::JsonCodec;
use crate::error::ExchangeError;
use crate::message::{
    Destination, GetOptions, Message, MessageId, PutOptions, QueueName, ReceivedMessage,
};
use crate::router::ReplyRouter;
use crate::session::{DestinationHandle, Session};
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "receiver_tests.rs"]
mod tests;

/// Default number of backouts after which a message is redirected
pub const DEFAULT_BACKOUT_THRESHOLD: u32 = 5;

// ============================================================================
// Configuration
// ============================================================================

/// Bounded retry of the backout-queue put
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectPolicy {
    /// Retries after the first failed attempt
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl RedirectPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Total attempts including the first
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// How long each get waits before the receiver stops
    pub wait_interval: Duration,
    pub backout_threshold: u32,
    /// Where poison messages go; without one they cannot be redirected
    pub backout_queue: Option<QueueName>,
    pub redirect: RedirectPolicy,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            wait_interval: Duration::from_secs(5),
            backout_threshold: DEFAULT_BACKOUT_THRESHOLD,
            backout_queue: None,
            redirect: RedirectPolicy::default(),
        }
    }
}

impl ReceiverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wait_interval(mut self, wait_interval: Duration) -> Self {
        self.wait_interval = wait_interval;
        self
    }

    pub fn with_backout_threshold(mut self, threshold: u32) -> Self {
        self.backout_threshold = threshold;
        self
    }

    pub fn with_backout_queue(mut self, queue: QueueName) -> Self {
        self.backout_queue = Some(queue);
        self
    }

    pub fn with_redirect_policy(mut self, policy: RedirectPolicy) -> Self {
        self.redirect = policy;
        self
    }
}

// ============================================================================
// States and Outcomes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Waiting,
    Processing,
    Committing,
    BackingOut,
    Redirecting,
    Stopped,
}

/// Why the receive loop ended normally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No message arrived within the wait interval
    NoMessageAvailable,
    Cancelled,
}

/// What happened to one delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Committed,
    /// Returned to the input queue; `backout_count` is the count the next
    /// delivery will carry
    BackedOut { backout_count: u32 },
    Redirected { backout_queue: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveSummary {
    pub committed: u64,
    pub backed_out: u64,
    pub redirected: u64,
    pub stop_reason: StopReason,
}

impl ReceiveSummary {
    fn new(stop_reason: StopReason) -> Self {
        Self {
            committed: 0,
            backed_out: 0,
            redirected: 0,
            stop_reason,
        }
    }

    fn record(&mut self, disposition: &Disposition) {
        match disposition {
            Disposition::Committed => self.committed += 1,
            Disposition::BackedOut { .. } => self.backed_out += 1,
            Disposition::Redirected { .. } => self.redirected += 1,
        }
    }

    pub fn processed(&self) -> u64 {
        self.committed + self.backed_out + self.redirected
    }
}

// ============================================================================
// Handler Seam
// ============================================================================

/// Application logic for one decoded request.
///
/// Returning an error rolls back the whole unit of work, including any
/// replies already sent through the [`ReplyContext`]. A failed reply or
/// send through the context rolls it back too, even if the handler
/// ignores the error.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    type Request: DeserializeOwned + Send;

    async fn handle(
        &self,
        request: Self::Request,
        context: &mut ReplyContext<'_>,
    ) -> anyhow::Result<()>;
}

/// Sends replies and forwards inside the current unit of work
pub struct ReplyContext<'a> {
    session: &'a mut Session,
    received: &'a ReceivedMessage,
    puts: usize,
    /// First send or routing failure in this unit of work
    failure: Option<String>,
}

impl<'a> ReplyContext<'a> {
    fn new(session: &'a mut Session, received: &'a ReceivedMessage) -> Self {
        Self {
            session,
            received,
            puts: 0,
            failure: None,
        }
    }

    fn record_failure(&mut self, error: ExchangeError) -> ExchangeError {
        if self.failure.is_none() {
            self.failure = Some(error.to_string());
        }
        error
    }

    /// Whether a send or routing failure has been seen in this unit of work
    pub fn has_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// The delivery being processed
    pub fn received(&self) -> &ReceivedMessage {
        self.received
    }

    /// Number of messages put in this unit of work so far
    pub fn puts(&self) -> usize {
        self.puts
    }

    /// Encode `payload` as JSON and send it as the reply to the request
    pub async fn reply<T>(&mut self, payload: &T) -> Result<MessageId, ExchangeError>
    where
        T: Serialize + ?Sized + Sync,
    {
        let body = JsonCodec::encode(payload)?;
        self.reply_bytes(body).await
    }

    /// Send `body` as the reply, routed and correlated from the request's
    /// reply-to and report options
    pub async fn reply_bytes(&mut self, body: Bytes) -> Result<MessageId, ExchangeError> {
        let routed = ReplyRouter::build_reply(&self.received.message, body)
            .map_err(|e| self.record_failure(e.into()))?;
        debug!(
            request_id = %self.received.message_id(),
            destination = %routed.destination,
            correlation_id = %routed.message.correlation_id,
            "Sending reply"
        );
        self.send(&routed.destination, &routed.message).await
    }

    /// Put an arbitrary message under syncpoint
    pub async fn send(
        &mut self,
        destination: &Destination,
        message: &Message,
    ) -> Result<MessageId, ExchangeError> {
        match self
            .session
            .put1(destination, message, PutOptions::syncpoint())
            .await
        {
            Ok(id) => {
                self.puts += 1;
                Ok(id)
            }
            Err(e) => Err(self.record_failure(e)),
        }
    }

    /// Forward the request unchanged to another destination
    pub async fn forward(&mut self, destination: &Destination) -> Result<MessageId, ExchangeError> {
        let message = self.received.message.clone();
        self.send(destination, &message).await
    }
}

// ============================================================================
// TransactionalReceiver
// ============================================================================

/// Syncpoint receive loop for one input queue
pub struct TransactionalReceiver<H: MessageHandler> {
    config: ReceiverConfig,
    handler: H,
    state: ReceiverState,
}

impl<H: MessageHandler> TransactionalReceiver<H> {
    pub fn new(config: ReceiverConfig, handler: H) -> Self {
        Self {
            config,
            handler,
            state: ReceiverState::Waiting,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Process messages until none arrives within the wait interval or
    /// `cancel` fires. Cancellation is observed between messages only.
    ///
    /// Commit, backout and redirect failures end the loop with an error;
    /// the session's unit of work is left backed out where possible.
    pub async fn run(
        &mut self,
        session: &mut Session,
        input: &DestinationHandle,
        cancel: &CancellationToken,
    ) -> Result<ReceiveSummary, ExchangeError> {
        info!(queue = %input.name(), "Receiver started");
        let mut summary = ReceiveSummary::new(StopReason::NoMessageAvailable);

        loop {
            if cancel.is_cancelled() {
                summary.stop_reason = StopReason::Cancelled;
                break;
            }

            match self.process_next(session, input).await {
                Ok(Some(disposition)) => summary.record(&disposition),
                Ok(None) => {
                    summary.stop_reason = StopReason::NoMessageAvailable;
                    break;
                }
                Err(e) => {
                    self.state = ReceiverState::Stopped;
                    error!(queue = %input.name(), error = %e, "Receiver stopped on error");
                    return Err(e);
                }
            }
        }

        self.state = ReceiverState::Stopped;
        info!(
            queue = %input.name(),
            committed = summary.committed,
            backed_out = summary.backed_out,
            redirected = summary.redirected,
            stop_reason = ?summary.stop_reason,
            "Receiver stopped"
        );
        Ok(summary)
    }

    /// Wait for and fully process one message. `Ok(None)` means nothing
    /// arrived within the wait interval.
    pub async fn process_next(
        &mut self,
        session: &mut Session,
        input: &DestinationHandle,
    ) -> Result<Option<Disposition>, ExchangeError> {
        self.state = ReceiverState::Waiting;
        let options = GetOptions::new()
            .with_wait(self.config.wait_interval)
            .with_syncpoint();

        let Some(received) = session.get(input, &options).await? else {
            debug!(queue = %input.name(), "No message available");
            return Ok(None);
        };

        self.state = ReceiverState::Processing;
        let message_id = received.message_id();
        let backout_count = received.backout_count;
        debug!(
            queue = %input.name(),
            message_id = %message_id,
            backout_count,
            "Received message"
        );

        // Already failed at the threshold once; do not run the handler again
        if backout_count > self.config.backout_threshold {
            warn!(message_id = %message_id, backout_count, "Poison message detected");
            return self.redirect(session, &received).await.map(Some);
        }

        let (result, puts) = {
            let mut context = ReplyContext::new(session, &received);
            let result = self.dispatch(&mut context).await;
            let result = match context.failure.take() {
                Some(failure) if result.is_ok() => {
                    Err(anyhow::anyhow!("send failed in unit of work: {}", failure))
                }
                _ => result,
            };
            (result, context.puts())
        };

        match result {
            Ok(()) => {
                self.state = ReceiverState::Committing;
                session.commit().await.map_err(|e| transaction_failed("commit", e))?;
                info!(message_id = %message_id, replies = puts, "Committed message");
                Ok(Some(Disposition::Committed))
            }
            Err(e) => {
                warn!(
                    message_id = %message_id,
                    backout_count,
                    error = %e,
                    "Processing failed"
                );

                let at_threshold =
                    received.has_reached_backout_threshold(self.config.backout_threshold);
                if at_threshold && puts == 0 {
                    warn!(message_id = %message_id, backout_count, "Poison message detected");
                    return self.redirect(session, &received).await.map(Some);
                }

                // Puts from the failed attempt must not be committed with a
                // redirect, so back out and redirect on the next delivery
                self.back_out(session, &received).await.map(Some)
            }
        }
    }

    async fn dispatch(&self, context: &mut ReplyContext<'_>) -> anyhow::Result<()> {
        let request: H::Request = JsonCodec::decode(context.received().body())?;
        self.handler.handle(request, context).await
    }

    async fn back_out(
        &mut self,
        session: &mut Session,
        received: &ReceivedMessage,
    ) -> Result<Disposition, ExchangeError> {
        self.state = ReceiverState::BackingOut;
        session
            .backout()
            .await
            .map_err(|e| transaction_failed("backout", e))?;

        let backout_count = received.backout_count + 1;
        info!(message_id = %received.message_id(), backout_count, "Backed out message");
        Ok(Disposition::BackedOut { backout_count })
    }

    /// Move the original message to the backout queue and commit
    async fn redirect(
        &mut self,
        session: &mut Session,
        received: &ReceivedMessage,
    ) -> Result<Disposition, ExchangeError> {
        self.state = ReceiverState::Redirecting;
        let message_id = received.message_id();

        let Some(queue) = self.config.backout_queue.clone() else {
            session
                .backout()
                .await
                .map_err(|e| transaction_failed("backout", e))?;
            return Err(ExchangeError::RedirectFailed {
                message_id: message_id.to_string(),
                attempts: 0,
                message: "no backout queue configured".to_string(),
            });
        };

        let policy = self.config.redirect.clone();
        let mut last_error = None;

        for attempt in 1..=policy.attempts() {
            match Self::put_to_backout_queue(session, &queue, &received.message).await {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) => {
                    warn!(
                        message_id = %message_id,
                        backout_queue = %queue,
                        attempt,
                        error = %e,
                        "Redirect attempt failed"
                    );
                    last_error = Some(e);
                    if attempt < policy.attempts() {
                        tokio::time::sleep(policy.retry_delay).await;
                    }
                }
            }
        }

        if let Some(e) = last_error {
            session
                .backout()
                .await
                .map_err(|e| transaction_failed("backout", e))?;
            return Err(ExchangeError::RedirectFailed {
                message_id: message_id.to_string(),
                attempts: policy.attempts(),
                message: e.to_string(),
            });
        }

        session
            .commit()
            .await
            .map_err(|e| transaction_failed("commit", e))?;

        info!(
            message_id = %message_id,
            backout_queue = %queue,
            "Message sent to the backout queue"
        );
        Ok(Disposition::Redirected {
            backout_queue: queue.as_str().to_string(),
        })
    }

    async fn put_to_backout_queue(
        session: &mut Session,
        queue: &QueueName,
        message: &Message,
    ) -> Result<(), ExchangeError> {
        let handle = session.backout_queue(queue).await?;
        session.put(&handle, message, PutOptions::syncpoint()).await?;
        Ok(())
    }
}

fn transaction_failed(operation: &str, error: ExchangeError) -> ExchangeError {
    match error {
        ExchangeError::SessionClosed => ExchangeError::SessionClosed,
        other => ExchangeError::TransactionFailed {
            operation: operation.to_string(),
            message: other.to_string(),
        },
    }
}
