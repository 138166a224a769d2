//! Tests for session lifecycle and handle ownership.

use super::*;
use crate::connection::{MockBrokerConnection, OpenedObject};
use mockall::{predicate::*, Sequence};

fn opened(handle: u64, name: &str) -> Result<OpenedObject, ExchangeError> {
    Ok(OpenedObject {
        handle,
        name: name.to_string(),
    })
}

fn session_with(mock: MockBrokerConnection) -> Session {
    Session::from_connection(Box::new(mock), "QM1@localhost(1414)".to_string())
}

#[tokio::test]
async fn test_close_closes_handles_before_disconnect() {
    let mut mock = MockBrokerConnection::new();
    let mut seq = Sequence::new();

    mock.expect_open()
        .times(1)
        .returning(|_, _| opened(1, "DEV.QUEUE.1"));
    mock.expect_open_dynamic()
        .times(1)
        .returning(|_, _| opened(2, "APP.REPLIES.0001"));

    // Reverse open order, then disconnect
    mock.expect_close()
        .with(eq(2))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));
    mock.expect_close()
        .with(eq(1))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));
    mock.expect_disconnect()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Ok(()));

    let mut session = session_with(mock);
    session
        .open(&Destination::queue("DEV.QUEUE.1"), OpenMode::Input)
        .await
        .unwrap();
    let dynamic = session
        .open_dynamic("DEV.APP.MODEL.QUEUE", "APP.REPLIES.*")
        .await
        .unwrap();
    assert_eq!(dynamic.name(), "APP.REPLIES.0001");
    assert_eq!(dynamic.mode(), OpenMode::InputExclusive);
    assert_eq!(session.open_handle_count(), 2);

    session.close().await.unwrap();

    assert!(!session.is_connected());
    assert_eq!(session.open_handle_count(), 0);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let mut mock = MockBrokerConnection::new();
    mock.expect_disconnect().times(1).returning(|| Ok(()));

    let mut session = session_with(mock);
    session.close().await.unwrap();
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_close_attempts_every_step_and_reports_first_error() {
    let mut mock = MockBrokerConnection::new();
    mock.expect_open().returning(|d, _| {
        let handle = if d.name == "DEV.QUEUE.1" { 1 } else { 2 };
        opened(handle, &d.name)
    });
    mock.expect_close().with(eq(2)).times(1).returning(|_| {
        Err(ExchangeError::InvalidHandle { handle: 2 })
    });
    mock.expect_close().with(eq(1)).times(1).returning(|_| Ok(()));
    mock.expect_disconnect().times(1).returning(|| {
        Err(ExchangeError::ConnectFailed {
            endpoint: "QM1".to_string(),
            message: "connection broken".to_string(),
        })
    });

    let mut session = session_with(mock);
    session
        .open(&Destination::queue("DEV.QUEUE.1"), OpenMode::Output)
        .await
        .unwrap();
    session
        .open(&Destination::queue("DEV.QUEUE.2"), OpenMode::Output)
        .await
        .unwrap();

    let result = session.close().await;

    assert!(matches!(
        result,
        Err(ExchangeError::InvalidHandle { handle: 2 })
    ));
    assert!(!session.is_connected());
}

#[tokio::test]
async fn test_operations_after_close_fail_with_session_closed() {
    let mut mock = MockBrokerConnection::new();
    mock.expect_open().returning(|_, _| opened(1, "DEV.QUEUE.1"));
    mock.expect_close().returning(|_| Ok(()));
    mock.expect_disconnect().returning(|| Ok(()));

    let mut session = session_with(mock);
    let handle = session
        .open(&Destination::queue("DEV.QUEUE.1"), OpenMode::Output)
        .await
        .unwrap();
    session.close().await.unwrap();

    let put = session
        .put(&handle, &Message::text("x"), PutOptions::default())
        .await;
    assert!(matches!(put, Err(ExchangeError::SessionClosed)));

    let open = session
        .open(&Destination::queue("DEV.QUEUE.1"), OpenMode::Output)
        .await;
    assert!(matches!(open, Err(ExchangeError::SessionClosed)));

    assert!(matches!(
        session.commit().await,
        Err(ExchangeError::SessionClosed)
    ));
}

#[tokio::test]
async fn test_handle_from_another_session_is_rejected() {
    let mut first_mock = MockBrokerConnection::new();
    first_mock
        .expect_open()
        .returning(|_, _| opened(1, "DEV.QUEUE.1"));
    first_mock.expect_close().returning(|_| Ok(()));
    first_mock.expect_disconnect().returning(|| Ok(()));

    let mut second_mock = MockBrokerConnection::new();
    second_mock
        .expect_open()
        .returning(|_, _| opened(1, "DEV.QUEUE.1"));
    second_mock.expect_put().never();
    second_mock.expect_close().returning(|_| Ok(()));
    second_mock.expect_disconnect().returning(|| Ok(()));

    let mut first = session_with(first_mock);
    let mut second = session_with(second_mock);

    let foreign = first
        .open(&Destination::queue("DEV.QUEUE.1"), OpenMode::Output)
        .await
        .unwrap();
    second
        .open(&Destination::queue("DEV.QUEUE.1"), OpenMode::Output)
        .await
        .unwrap();

    let result = second
        .put(&foreign, &Message::text("x"), PutOptions::default())
        .await;
    assert!(matches!(
        result,
        Err(ExchangeError::InvalidHandle { handle: 1 })
    ));

    first.close().await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test]
async fn test_get_requires_input_handle() {
    let mut mock = MockBrokerConnection::new();
    mock.expect_open().returning(|_, _| opened(1, "DEV.QUEUE.1"));
    mock.expect_get().never();
    mock.expect_close().returning(|_| Ok(()));
    mock.expect_disconnect().returning(|| Ok(()));

    let mut session = session_with(mock);
    let handle = session
        .open(&Destination::queue("DEV.QUEUE.1"), OpenMode::Output)
        .await
        .unwrap();

    let result = session.get(&handle, &GetOptions::new()).await;
    assert!(matches!(result, Err(ExchangeError::ReceiveFailed { .. })));

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_uncommitted_work_tracking() {
    let mut mock = MockBrokerConnection::new();
    mock.expect_open().returning(|_, _| opened(1, "DEV.QUEUE.1"));
    mock.expect_put()
        .returning(|_, _, _| Ok(MessageId::generate()));
    mock.expect_commit().times(1).returning(|| Ok(()));
    mock.expect_backout().times(1).returning(|| Ok(()));
    mock.expect_close().returning(|_| Ok(()));
    mock.expect_disconnect().returning(|| Ok(()));

    let mut session = session_with(mock);
    let handle = session
        .open(&Destination::queue("DEV.QUEUE.1"), OpenMode::Output)
        .await
        .unwrap();

    session
        .put(&handle, &Message::text("a"), PutOptions::no_syncpoint())
        .await
        .unwrap();
    assert!(!session.has_uncommitted_work());

    session
        .put(&handle, &Message::text("b"), PutOptions::syncpoint())
        .await
        .unwrap();
    assert!(session.has_uncommitted_work());

    session.commit().await.unwrap();
    assert!(!session.has_uncommitted_work());

    session
        .put(&handle, &Message::text("c"), PutOptions::syncpoint())
        .await
        .unwrap();
    session.backout().await.unwrap();
    assert!(!session.has_uncommitted_work());

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_backout_queue_handle_is_cached() {
    let mut mock = MockBrokerConnection::new();
    mock.expect_open()
        .with(
            function(|d: &Destination| d.name == "DEV.QUEUE.3"),
            eq(OpenMode::Output),
        )
        .times(1)
        .returning(|_, _| opened(7, "DEV.QUEUE.3"));
    mock.expect_close().with(eq(7)).times(1).returning(|_| Ok(()));
    mock.expect_disconnect().returning(|| Ok(()));

    let mut session = session_with(mock);
    let name = QueueName::new("DEV.QUEUE.3".to_string()).unwrap();

    let first = session.backout_queue(&name).await.unwrap();
    let second = session.backout_queue(&name).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(session.open_handle_count(), 1);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_open_keeps_owner_qualifier() {
    let mut mock = MockBrokerConnection::new();
    mock.expect_open().returning(|_, _| opened(3, "APP.REPLIES"));
    mock.expect_close().returning(|_| Ok(()));
    mock.expect_disconnect().returning(|| Ok(()));

    let mut session = session_with(mock);
    let destination = Destination::queue("APP.REPLIES").with_owner(Some("QM2".to_string()));
    let handle = session.open(&destination, OpenMode::Output).await.unwrap();

    assert_eq!(handle.destination().owner_qualifier.as_deref(), Some("QM2"));

    session.close().await.unwrap();
}
