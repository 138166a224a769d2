//! Requester side of the request/response pattern.
//!
//! Each request gets its own temporary reply queue created from a model
//! queue. The request is put outside syncpoint so the responder sees it
//! immediately, then the client waits once for the correlated reply and
//! deletes the reply queue.

use crate::codec::JsonCodec;
use crate::correlation::{CorrelationEngine, MatchOutcome};
use crate::error::{DecodeError, ExchangeError};
use crate::message::{
    CorrelationId, MessageId, Persistence, PutOptions, ReceivedMessage, ReplyTo, ReportOptions,
};
use crate::session::{DestinationHandle, Session};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;

pub const DEFAULT_MODEL_QUEUE: &str = "DEV.APP.MODEL.QUEUE";
pub const DEFAULT_DYNAMIC_PREFIX: &str = "APP.REPLIES.*";

/// Options for the requester
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub model_queue: String,
    /// Dynamic reply queue name; a trailing `*` makes it unique
    pub dynamic_prefix: String,
    pub reply_timeout: Duration,
    /// Correlation scheme asked of the responder
    pub report: ReportOptions,
    pub time_to_live: Option<chrono::Duration>,
    pub persistence: Persistence,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            model_queue: DEFAULT_MODEL_QUEUE.to_string(),
            dynamic_prefix: DEFAULT_DYNAMIC_PREFIX.to_string(),
            reply_timeout: Duration::from_secs(5),
            report: ReportOptions::COPY_MSG_ID_TO_CORREL_ID,
            time_to_live: None,
            persistence: Persistence::AsDestinationDefault,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model_queue(
        mut self,
        model_queue: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        self.model_queue = model_queue.into();
        self.dynamic_prefix = prefix.into();
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_report(mut self, report: ReportOptions) -> Self {
        self.report = report;
        self
    }

    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }
}

/// A request that has been put and awaits its reply
#[derive(Debug)]
pub struct PendingRequest {
    pub message_id: MessageId,
    /// Correlation id the reply will carry
    pub correlation_id: CorrelationId,
    pub reply_queue: DestinationHandle,
}

#[derive(Debug, Clone)]
pub enum ReplyOutcome {
    Reply(ReceivedMessage),
    Timeout,
}

impl ReplyOutcome {
    pub fn reply(&self) -> Option<&ReceivedMessage> {
        match self {
            Self::Reply(reply) => Some(reply),
            Self::Timeout => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestResponseClient {
    options: RequestOptions,
}

impl RequestResponseClient {
    pub fn new(options: RequestOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Create a reply queue and put the request to `request_queue`
    pub async fn send<T>(
        &self,
        session: &mut Session,
        request_queue: &DestinationHandle,
        payload: &T,
    ) -> Result<PendingRequest, ExchangeError>
    where
        T: Serialize + ?Sized + Sync,
    {
        let body = JsonCodec::encode(payload)?;
        let reply_queue = session
            .open_dynamic(&self.options.model_queue, &self.options.dynamic_prefix)
            .await?;

        let mut request = CorrelationEngine::prepare_request(ReplyTo::new(reply_queue.name()), body)
            .with_report(self.options.report)
            .with_persistence(self.options.persistence);
        if let Some(ttl) = self.options.time_to_live {
            request = request.with_ttl(ttl);
        }
        if self.options.report.contains(ReportOptions::PASS_CORREL_ID) {
            request = request.with_correlation_id(CorrelationId::generate());
        }

        let message_id = match session
            .put(request_queue, &request, PutOptions::no_syncpoint())
            .await
        {
            Ok(id) => id,
            Err(e) => {
                if let Err(close_error) = session.close_handle(reply_queue).await {
                    warn!(error = %close_error, "Failed to delete reply queue after put failure");
                }
                return Err(e);
            }
        };

        let correlation_id = CorrelationEngine::expected_reply_correlation(&request, message_id);
        info!(
            request_queue = %request_queue.name(),
            reply_queue = %reply_queue.name(),
            message_id = %message_id,
            "Request sent"
        );

        Ok(PendingRequest {
            message_id,
            correlation_id,
            reply_queue,
        })
    }

    /// Wait once for the reply to `pending`, then delete its reply queue
    pub async fn await_reply(
        &self,
        session: &mut Session,
        pending: PendingRequest,
    ) -> Result<ReplyOutcome, ExchangeError> {
        let outcome = CorrelationEngine::await_match(
            session,
            &pending.reply_queue,
            pending.correlation_id,
            self.options.reply_timeout,
        )
        .await;

        let closed = session.close_handle(pending.reply_queue).await;

        let outcome = match outcome? {
            MatchOutcome::Matched(reply) => {
                debug!(request_id = %pending.message_id, "Reply received");
                ReplyOutcome::Reply(reply)
            }
            MatchOutcome::Timeout => {
                info!(
                    request_id = %pending.message_id,
                    timeout_ms = self.options.reply_timeout.as_millis() as u64,
                    "No reply before timeout"
                );
                ReplyOutcome::Timeout
            }
        };

        closed?;
        Ok(outcome)
    }

    /// Send a request and wait for its reply
    pub async fn request<T>(
        &self,
        session: &mut Session,
        request_queue: &DestinationHandle,
        payload: &T,
    ) -> Result<ReplyOutcome, ExchangeError>
    where
        T: Serialize + ?Sized + Sync,
    {
        let pending = self.send(session, request_queue, payload).await?;
        self.await_reply(session, pending).await
    }

    pub fn decode_reply<T: DeserializeOwned>(reply: &ReceivedMessage) -> Result<T, DecodeError> {
        JsonCodec::decode(reply.body())
    }
}
