//! Tests for request preparation and reply matching.

use super::*;
use crate::connection::{ConnectParams, OpenMode};
use crate::message::{Destination, PutOptions};
use crate::providers::InMemoryBroker;
use crate::router::ReplyRouter;

async fn connected(broker: &InMemoryBroker) -> Session {
    let params = ConnectParams::new("QM1").with_connection_name("localhost(1414)");
    Session::connect(broker, &params).await.unwrap()
}

#[test]
fn test_prepare_request_descriptor() {
    let request = CorrelationEngine::prepare_request(
        ReplyTo::new("APP.REPLIES.1"),
        Bytes::from_static(br#"{"value":42}"#),
    );

    assert!(request.message_id.is_none());
    assert_eq!(request.message_type, MessageType::Request);
    assert_eq!(request.format, MessageFormat::String);
    assert_eq!(request.report, ReportOptions::COPY_MSG_ID_TO_CORREL_ID);
    assert_eq!(request.reply_to.unwrap().queue, "APP.REPLIES.1");
}

#[test]
fn test_expected_reply_correlation() {
    let assigned = MessageId::generate();
    let request = CorrelationEngine::prepare_request(ReplyTo::new("Q"), Bytes::new());
    assert_eq!(
        CorrelationEngine::expected_reply_correlation(&request, assigned),
        CorrelationId::from(assigned)
    );

    let own = CorrelationId::generate();
    let passing = request
        .with_correlation_id(own)
        .with_report(ReportOptions::PASS_CORREL_ID);
    assert_eq!(
        CorrelationEngine::expected_reply_correlation(&passing, assigned),
        own
    );
}

#[test]
fn test_expected_reply_correlation_agrees_with_router() {
    let assigned = MessageId::generate();
    let own = CorrelationId::generate();

    for report in [
        ReportOptions::NONE,
        ReportOptions::COPY_MSG_ID_TO_CORREL_ID,
        ReportOptions::NEW_MSG_ID,
        ReportOptions::PASS_MSG_ID,
        ReportOptions::PASS_CORREL_ID,
        ReportOptions::PASS_MSG_ID | ReportOptions::PASS_CORREL_ID,
        ReportOptions::NEW_MSG_ID | ReportOptions::PASS_MSG_ID,
    ] {
        let mut request = CorrelationEngine::prepare_request(ReplyTo::new("Q"), Bytes::new())
            .with_correlation_id(own)
            .with_report(report);
        let expected = CorrelationEngine::expected_reply_correlation(&request, assigned);

        request.message_id = assigned;
        let routed = ReplyRouter::build_reply(&request, Bytes::new()).unwrap();
        assert_eq!(routed.message.correlation_id, expected, "report {:?}", report);
    }
}

#[tokio::test]
async fn test_await_match_returns_matching_reply() {
    let broker = InMemoryBroker::default();
    let mut session = connected(&broker).await;
    let replies = session
        .open(&Destination::queue("DEV.QUEUE.2"), OpenMode::Input)
        .await
        .unwrap();

    let wanted = CorrelationId::generate();
    session
        .put1(
            &Destination::queue("DEV.QUEUE.2"),
            &Message::text("reply").with_correlation_id(wanted),
            PutOptions::no_syncpoint(),
        )
        .await
        .unwrap();

    let outcome =
        CorrelationEngine::await_match(&mut session, &replies, wanted, Duration::from_millis(200))
            .await
            .unwrap();

    match outcome {
        MatchOutcome::Matched(reply) => assert_eq!(reply.correlation_id(), wanted),
        MatchOutcome::Timeout => panic!("expected a matched reply"),
    }
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_await_match_times_out_and_leaves_stray_message() {
    let broker = InMemoryBroker::default();
    let mut session = connected(&broker).await;
    let replies = session
        .open(&Destination::queue("DEV.QUEUE.2"), OpenMode::Input)
        .await
        .unwrap();

    session
        .put1(
            &Destination::queue("DEV.QUEUE.2"),
            &Message::text("someone else's").with_correlation_id(CorrelationId::generate()),
            PutOptions::no_syncpoint(),
        )
        .await
        .unwrap();

    let outcome = CorrelationEngine::await_match(
        &mut session,
        &replies,
        CorrelationId::generate(),
        Duration::from_millis(50),
    )
    .await
    .unwrap();

    assert!(outcome.is_timeout());
    assert_eq!(broker.queue_depth("DEV.QUEUE.2"), Some(1));
    session.close().await.unwrap();
}
