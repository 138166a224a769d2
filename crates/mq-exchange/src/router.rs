//! Reply routing driven by the request's report options.
//!
//! A responder does not choose reply identifiers itself: the requester asks
//! for a correlation scheme through the report options it sets on the
//! request, and the responder honours it. The rules, applied in order:
//!
//! 1. Only the identifier options (`COPY_MSG_ID_TO_CORREL_ID`, `PASS_MSG_ID`,
//!    `PASS_CORREL_ID`, `NEW_MSG_ID`) are considered for identifiers.
//! 2. With `COPY_MSG_ID_TO_CORREL_ID`, `NEW_MSG_ID`, or none of them, the
//!    reply's correlation id is the request's message id and the broker
//!    assigns a fresh message id.
//! 3. `PASS_MSG_ID` reuses the request's message id.
//! 4. `PASS_CORREL_ID` reuses the request's correlation id, overriding rule 2.
//! 5. `PASS_DISCARD_AND_EXPIRY` carries the remaining expiry across and keeps
//!    `DISCARD_MSG` if it was set; otherwise the reply has no report options.

use crate::error::RoutingError;
use crate::message::{
    CorrelationId, Destination, Message, MessageId, MessageType, ReportOptions,
};
use bytes::Bytes;

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;

/// A reply ready to be put, with the destination it must go to
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedReply {
    pub destination: Destination,
    pub message: Message,
}

/// Builds replies for inbound requests
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyRouter;

impl ReplyRouter {
    /// Build the reply to `request` carrying `body`.
    ///
    /// Fails with [`RoutingError::MissingReplyTo`] when the request names no
    /// reply queue; no reply can be attempted in that case.
    pub fn build_reply(request: &Message, body: Bytes) -> Result<RoutedReply, RoutingError> {
        let reply_to = request
            .reply_to
            .as_ref()
            .filter(|r| !r.is_blank())
            .ok_or_else(|| RoutingError::MissingReplyTo {
                message_id: request.message_id.to_string(),
            })?;

        let ro = request.report & ReportOptions::IDENTIFIER_OPTIONS;

        let mut message_id = MessageId::NONE;
        let mut correlation_id = CorrelationId::NONE;

        if ro.contains(ReportOptions::COPY_MSG_ID_TO_CORREL_ID)
            || ro.contains(ReportOptions::NEW_MSG_ID)
            || ro.is_empty()
        {
            correlation_id = CorrelationId::from(request.message_id);
            message_id = MessageId::NONE;
        }

        if ro.contains(ReportOptions::PASS_MSG_ID) {
            message_id = request.message_id;
        }

        if ro.contains(ReportOptions::PASS_CORREL_ID) {
            correlation_id = request.correlation_id;
        }

        let (time_to_live, report) =
            if request.report.contains(ReportOptions::PASS_DISCARD_AND_EXPIRY) {
                let report = if request.report.contains(ReportOptions::DISCARD_MSG) {
                    ReportOptions::DISCARD_MSG
                } else {
                    ReportOptions::NONE
                };
                (request.time_to_live, report)
            } else {
                (None, ReportOptions::NONE)
            };

        let message = Message {
            message_id,
            correlation_id,
            reply_to: None,
            message_type: MessageType::Reply,
            format: request.format,
            persistence: request.persistence,
            report,
            time_to_live,
            body,
        };

        let destination =
            Destination::queue(reply_to.queue.trim()).with_owner(reply_to.queue_manager.clone());

        Ok(RoutedReply {
            destination,
            message,
        })
    }
}
