//! Request preparation and reply matching.
//!
//! A requester stamps its reply queue on the request and asks the responder
//! (through report options) to copy the request's message id into the
//! reply's correlation id. It then waits on the reply queue for a message
//! carrying that correlation id.

use crate::error::ExchangeError;
use crate::message::{
    CorrelationId, GetOptions, Message, MessageFormat, MessageId, MessageType, ReceivedMessage,
    ReplyTo, ReportOptions,
};
use crate::session::{DestinationHandle, Session};
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "correlation_tests.rs"]
mod tests;

/// Result of waiting for a correlated reply
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Matched(ReceivedMessage),
    Timeout,
}

impl MatchOutcome {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationEngine;

impl CorrelationEngine {
    /// Build a request whose reply will be routed to `reply_to`. The broker
    /// assigns the message id on put.
    pub fn prepare_request(reply_to: ReplyTo, body: Bytes) -> Message {
        Message::new(body)
            .with_message_id(MessageId::NONE)
            .with_reply_to(reply_to)
            .with_message_type(MessageType::Request)
            .with_format(MessageFormat::String)
            .with_report(ReportOptions::COPY_MSG_ID_TO_CORREL_ID)
    }

    /// Correlation id a conforming responder will put on the reply to
    /// `request`, given the message id the broker assigned to it. Follows
    /// the same identifier rules as [`ReplyRouter::build_reply`]; a request
    /// carrying only `PASS_MSG_ID` gets a reply with no correlation id.
    ///
    /// [`ReplyRouter::build_reply`]: crate::router::ReplyRouter::build_reply
    pub fn expected_reply_correlation(request: &Message, assigned_id: MessageId) -> CorrelationId {
        let ro = request.report & ReportOptions::IDENTIFIER_OPTIONS;

        if ro.contains(ReportOptions::PASS_CORREL_ID) {
            request.correlation_id
        } else if ro.contains(ReportOptions::COPY_MSG_ID_TO_CORREL_ID)
            || ro.contains(ReportOptions::NEW_MSG_ID)
            || ro.is_empty()
        {
            CorrelationId::from(assigned_id)
        } else {
            CorrelationId::NONE
        }
    }

    /// Wait once, up to `timeout`, for a message on `handle` whose
    /// correlation id is `match_id`.
    ///
    /// The reply queue is expected to carry only this request's reply. If
    /// the wait expires while some other message is sitting on it, that is
    /// logged as a protocol violation; the outcome is still `Timeout`.
    pub async fn await_match(
        session: &mut Session,
        handle: &DestinationHandle,
        match_id: CorrelationId,
        timeout: Duration,
    ) -> Result<MatchOutcome, ExchangeError> {
        let options = GetOptions::new().with_wait(timeout).matching(match_id);

        if let Some(reply) = session.get(handle, &options).await? {
            debug!(
                reply_queue = %handle.name(),
                correlation_id = %match_id,
                message_id = %reply.message_id(),
                "Matched reply"
            );
            return Ok(MatchOutcome::Matched(reply));
        }

        let stray = session.get(handle, &GetOptions::new().no_wait().browse()).await?;
        if let Some(stray) = stray {
            warn!(
                reply_queue = %handle.name(),
                expected_correlation_id = %match_id,
                found_correlation_id = %stray.correlation_id(),
                "Protocol violation: unexpected message on reply queue"
            );
        } else {
            debug!(
                reply_queue = %handle.name(),
                correlation_id = %match_id,
                "No reply before timeout"
            );
        }

        Ok(MatchOutcome::Timeout)
    }
}
