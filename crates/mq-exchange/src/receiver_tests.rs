//! Tests for the transactional receive loop.

use super::*;
use crate::connection::{ConnectParams, OpenMode};
use crate::message::{CorrelationId, ReplyTo};
use crate::providers::InMemoryBroker;
use serde::Deserialize;
use std::sync::atomic::{AtomicU32, Ordering};

const INPUT: &str = "DEV.QUEUE.1";
const REPLIES: &str = "DEV.QUEUE.2";
const BACKOUT: &str = "DEV.QUEUE.3";

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Numbers {
    value: u64,
}

#[derive(Default)]
struct DoublingHandler {
    calls: AtomicU32,
}

#[async_trait]
impl MessageHandler for DoublingHandler {
    type Request = Numbers;

    async fn handle(
        &self,
        request: Numbers,
        context: &mut ReplyContext<'_>,
    ) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        context
            .reply(&Numbers {
                value: request.value * 2,
            })
            .await?;
        Ok(())
    }
}

#[derive(Default)]
struct FailingHandler {
    calls: AtomicU32,
    reply_first: bool,
}

#[async_trait]
impl MessageHandler for FailingHandler {
    type Request = serde_json::Value;

    async fn handle(
        &self,
        _request: serde_json::Value,
        context: &mut ReplyContext<'_>,
    ) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reply_first {
            context.reply(&"partial").await?;
        }
        anyhow::bail!("cannot process request")
    }
}

/// Logs reply failures and reports success anyway
#[derive(Default)]
struct IgnoringHandler {
    saw_failure: AtomicU32,
}

#[async_trait]
impl MessageHandler for IgnoringHandler {
    type Request = Numbers;

    async fn handle(
        &self,
        request: Numbers,
        context: &mut ReplyContext<'_>,
    ) -> anyhow::Result<()> {
        if let Err(e) = context.reply(&request).await {
            tracing::warn!(error = %e, "Reply failed");
            assert!(context.has_failed());
            self.saw_failure.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct Fixture {
    broker: InMemoryBroker,
    session: Session,
    input: DestinationHandle,
}

impl Fixture {
    async fn new() -> Self {
        let broker = InMemoryBroker::default();
        let params = ConnectParams::new("QM1").with_connection_name("localhost(1414)");
        let mut session = Session::connect(&broker, &params).await.unwrap();
        let input = session
            .open(&Destination::queue(INPUT), OpenMode::Input)
            .await
            .unwrap();
        Self {
            broker,
            session,
            input,
        }
    }

    async fn seed(&mut self, message: Message) -> MessageId {
        self.session
            .put1(&Destination::queue(INPUT), &message, PutOptions::no_syncpoint())
            .await
            .unwrap()
    }

    async fn seed_request(&mut self, body: &'static str) -> MessageId {
        let request = Message::text(body).with_reply_to(ReplyTo::new(REPLIES));
        self.seed(request).await
    }
}

fn config() -> ReceiverConfig {
    ReceiverConfig::new()
        .with_wait_interval(Duration::from_millis(50))
        .with_backout_queue(QueueName::new(BACKOUT.to_string()).unwrap())
        .with_redirect_policy(RedirectPolicy::new(1, Duration::from_millis(10)))
}

#[test]
fn test_default_config() {
    let config = ReceiverConfig::default();
    assert_eq!(config.backout_threshold, 5);
    assert_eq!(config.wait_interval, Duration::from_secs(5));
    assert_eq!(config.redirect, RedirectPolicy::new(1, Duration::from_millis(100)));
    assert_eq!(config.redirect.attempts(), 2);
}

#[tokio::test]
async fn test_successful_request_commits_reply_and_dequeue() {
    let mut fx = Fixture::new().await;
    let request_id = fx.seed_request(r#"{"value":21}"#).await;

    let mut receiver = TransactionalReceiver::new(config(), DoublingHandler::default());
    let disposition = receiver
        .process_next(&mut fx.session, &fx.input)
        .await
        .unwrap();

    assert_eq!(disposition, Some(Disposition::Committed));
    assert_eq!(fx.broker.queue_depth(INPUT), Some(0));

    let replies = fx.broker.browse_queue(REPLIES);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].correlation_id(), CorrelationId::from(request_id));
    assert_eq!(
        JsonCodec::decode::<Numbers>(replies[0].body()).unwrap(),
        Numbers { value: 42 }
    );
    assert!(!fx.session.has_uncommitted_work());
}

#[tokio::test]
async fn test_handler_failure_backs_out() {
    let mut fx = Fixture::new().await;
    fx.seed_request("{}").await;

    let mut receiver = TransactionalReceiver::new(config(), FailingHandler::default());
    let disposition = receiver
        .process_next(&mut fx.session, &fx.input)
        .await
        .unwrap();

    assert_eq!(
        disposition,
        Some(Disposition::BackedOut { backout_count: 1 })
    );
    let remaining = fx.broker.browse_queue(INPUT);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].backout_count, 1);
}

#[tokio::test]
async fn test_invalid_utf8_body_is_a_processing_failure() {
    let mut fx = Fixture::new().await;
    fx.seed(
        Message::new(Bytes::from_static(&[0xff, 0xfe, 0x7b]))
            .with_reply_to(ReplyTo::new(REPLIES)),
    )
    .await;

    let mut receiver = TransactionalReceiver::new(config(), DoublingHandler::default());
    let disposition = receiver
        .process_next(&mut fx.session, &fx.input)
        .await
        .unwrap();

    assert_eq!(
        disposition,
        Some(Disposition::BackedOut { backout_count: 1 })
    );
    assert_eq!(receiver.handler().calls.load(Ordering::SeqCst), 0);
    assert_eq!(fx.broker.browse_queue(INPUT)[0].backout_count, 1);
}

#[tokio::test]
async fn test_reply_send_failure_rolls_back_dequeue() {
    let mut fx = Fixture::new().await;
    let request = Message::text(r#"{"value":1}"#).with_reply_to(ReplyTo {
        queue: REPLIES.to_string(),
        queue_manager: Some("QM9".to_string()),
    });
    fx.seed(request).await;

    let mut receiver = TransactionalReceiver::new(config(), DoublingHandler::default());
    let disposition = receiver
        .process_next(&mut fx.session, &fx.input)
        .await
        .unwrap();

    assert_eq!(
        disposition,
        Some(Disposition::BackedOut { backout_count: 1 })
    );
    assert_eq!(fx.broker.queue_depth(INPUT), Some(1));
    assert_eq!(fx.broker.queue_depth(REPLIES), Some(0));
}

#[tokio::test]
async fn test_ignored_reply_failure_still_backs_out() {
    let mut fx = Fixture::new().await;
    fx.seed_request(r#"{"value":3}"#).await;
    assert!(fx.broker.set_put_inhibited(REPLIES, true));

    let mut receiver = TransactionalReceiver::new(config(), IgnoringHandler::default());
    let disposition = receiver
        .process_next(&mut fx.session, &fx.input)
        .await
        .unwrap();

    assert_eq!(
        disposition,
        Some(Disposition::BackedOut { backout_count: 1 })
    );
    assert_eq!(receiver.handler().saw_failure.load(Ordering::SeqCst), 1);
    assert_eq!(fx.broker.queue_depth(INPUT), Some(1));
    assert_eq!(fx.broker.queue_depth(REPLIES), Some(0));
}

#[tokio::test]
async fn test_ignored_routing_failure_still_backs_out() {
    let mut fx = Fixture::new().await;
    fx.seed(Message::text(r#"{"value":3}"#)).await;

    let mut receiver = TransactionalReceiver::new(config(), IgnoringHandler::default());
    let disposition = receiver
        .process_next(&mut fx.session, &fx.input)
        .await
        .unwrap();

    assert!(matches!(disposition, Some(Disposition::BackedOut { .. })));
    assert_eq!(fx.broker.queue_depth(INPUT), Some(1));
}

#[tokio::test]
async fn test_missing_reply_to_backs_out() {
    let mut fx = Fixture::new().await;
    fx.seed(Message::text(r#"{"value":1}"#)).await;

    let mut receiver = TransactionalReceiver::new(config(), DoublingHandler::default());
    let disposition = receiver
        .process_next(&mut fx.session, &fx.input)
        .await
        .unwrap();

    assert!(matches!(disposition, Some(Disposition::BackedOut { .. })));
}

#[tokio::test]
async fn test_poison_message_redirected_exactly_once_at_threshold() {
    let mut fx = Fixture::new().await;
    let id = fx.seed_request(r#"{"value":7}"#).await;

    let mut receiver = TransactionalReceiver::new(config(), FailingHandler::default());
    let summary = receiver
        .run(&mut fx.session, &fx.input, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.backed_out, 5);
    assert_eq!(summary.redirected, 1);
    assert_eq!(summary.committed, 0);
    assert_eq!(summary.stop_reason, StopReason::NoMessageAvailable);
    assert_eq!(receiver.handler().calls.load(Ordering::SeqCst), 6);
    assert_eq!(receiver.state(), ReceiverState::Stopped);

    assert_eq!(fx.broker.queue_depth(INPUT), Some(0));
    let redirected = fx.broker.browse_queue(BACKOUT);
    assert_eq!(redirected.len(), 1);
    assert_eq!(redirected[0].message_id(), id);
    assert_eq!(redirected[0].body().as_ref(), br#"{"value":7}"#);
}

#[tokio::test]
async fn test_failed_attempt_puts_are_never_committed_with_redirect() {
    let mut fx = Fixture::new().await;
    fx.seed_request("{}").await;

    let handler = FailingHandler {
        reply_first: true,
        ..FailingHandler::default()
    };
    let mut receiver =
        TransactionalReceiver::new(config().with_backout_threshold(0), handler);
    let summary = receiver
        .run(&mut fx.session, &fx.input, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.backed_out, 1);
    assert_eq!(summary.redirected, 1);
    assert_eq!(receiver.handler().calls.load(Ordering::SeqCst), 1);
    assert_eq!(fx.broker.queue_depth(REPLIES), Some(0));
    assert_eq!(fx.broker.queue_depth(BACKOUT), Some(1));
}

#[tokio::test]
async fn test_redirect_failure_backs_out_and_stops() {
    let mut fx = Fixture::new().await;
    fx.seed_request("{}").await;
    assert!(fx.broker.set_put_inhibited(BACKOUT, true));

    let mut receiver = TransactionalReceiver::new(
        config().with_backout_threshold(0),
        FailingHandler::default(),
    );
    let result = receiver
        .run(&mut fx.session, &fx.input, &CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(ExchangeError::RedirectFailed { attempts: 2, .. })
    ));
    assert_eq!(receiver.state(), ReceiverState::Stopped);

    let remaining = fx.broker.browse_queue(INPUT);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].backout_count, 1);
    assert_eq!(fx.broker.queue_depth(BACKOUT), Some(0));
}

#[tokio::test]
async fn test_redirect_without_backout_queue_fails() {
    let mut fx = Fixture::new().await;
    fx.seed_request("{}").await;

    let config = ReceiverConfig::new()
        .with_wait_interval(Duration::from_millis(50))
        .with_backout_threshold(0);
    let mut receiver = TransactionalReceiver::new(config, FailingHandler::default());

    let result = receiver.process_next(&mut fx.session, &fx.input).await;

    assert!(matches!(
        result,
        Err(ExchangeError::RedirectFailed { attempts: 0, .. })
    ));
    assert_eq!(fx.broker.queue_depth(INPUT), Some(1));
}

#[tokio::test]
async fn test_cancellation_is_observed_between_messages() {
    let mut fx = Fixture::new().await;
    fx.seed_request(r#"{"value":1}"#).await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut receiver = TransactionalReceiver::new(config(), DoublingHandler::default());
    let summary = receiver
        .run(&mut fx.session, &fx.input, &cancel)
        .await
        .unwrap();

    assert_eq!(summary.stop_reason, StopReason::Cancelled);
    assert_eq!(summary.processed(), 0);
    assert_eq!(fx.broker.queue_depth(INPUT), Some(1));
}

#[tokio::test]
async fn test_empty_queue_stops_without_error() {
    let mut fx = Fixture::new().await;

    let mut receiver = TransactionalReceiver::new(config(), DoublingHandler::default());
    let summary = receiver
        .run(&mut fx.session, &fx.input, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.stop_reason, StopReason::NoMessageAvailable);
    assert_eq!(summary.processed(), 0);
}
