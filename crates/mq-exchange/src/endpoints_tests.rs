//! Tests for endpoint failover.

use super::*;
use crate::config::EndpointConfig;
use crate::connection::OpenMode;
use crate::message::{Destination, Message, PutOptions};
use crate::providers::{InMemoryBroker, InMemoryConfig};

fn two_endpoints() -> ConnectionConfig {
    ConnectionConfig::new(vec![
        EndpointConfig::new("primary", 1414, "QM1"),
        EndpointConfig::new("standby", 1414, "QM1"),
    ])
    .unwrap()
}

fn broker_listening_on(listeners: &[&str]) -> InMemoryBroker {
    InMemoryBroker::new(InMemoryConfig {
        listeners: listeners.iter().map(|l| l.to_string()).collect(),
        ..InMemoryConfig::default()
    })
}

/// Puts one message to a queue and reports which endpoint it used
struct PutOne {
    queue: &'static str,
    opens: usize,
}

#[async_trait]
impl EndpointTask for PutOne {
    type Opened = crate::session::DestinationHandle;
    type Output = String;

    async fn open(&mut self, session: &mut Session) -> Result<Self::Opened, ExchangeError> {
        self.opens += 1;
        session
            .open(&Destination::queue(self.queue), OpenMode::Output)
            .await
    }

    async fn run(
        &mut self,
        session: &mut Session,
        opened: Self::Opened,
    ) -> Result<Self::Output, ExchangeError> {
        session
            .put(&opened, &Message::text("{}"), PutOptions::no_syncpoint())
            .await?;
        Ok(session.endpoint().to_string())
    }
}

#[tokio::test]
async fn test_first_reachable_endpoint_is_used() {
    let broker = broker_listening_on(&["primary(1414)", "standby(1414)"]);
    let mut task = PutOne {
        queue: "DEV.QUEUE.1",
        opens: 0,
    };

    let endpoint = Failover::run(&broker, &two_endpoints(), &mut task)
        .await
        .unwrap();

    assert_eq!(endpoint, "QM1@primary(1414)");
    assert_eq!(task.opens, 1);
    assert_eq!(broker.queue_depth("DEV.QUEUE.1"), Some(1));
}

#[tokio::test]
async fn test_unreachable_endpoint_falls_through_to_next() {
    let broker = broker_listening_on(&["standby(1414)"]);
    let mut task = PutOne {
        queue: "DEV.QUEUE.1",
        opens: 0,
    };

    let endpoint = Failover::run(&broker, &two_endpoints(), &mut task)
        .await
        .unwrap();

    assert_eq!(endpoint, "QM1@standby(1414)");
    assert_eq!(task.opens, 1);
}

#[tokio::test]
async fn test_open_failure_tries_next_endpoint() {
    let broker = broker_listening_on(&["primary(1414)", "standby(1414)"]);
    let mut task = PutOne {
        queue: "NO.SUCH.QUEUE",
        opens: 0,
    };

    let result = Failover::run(&broker, &two_endpoints(), &mut task).await;

    assert!(matches!(
        result,
        Err(ExchangeError::EndpointsExhausted { attempted: 2 })
    ));
    assert_eq!(task.opens, 2);
}

#[tokio::test]
async fn test_no_endpoint_reachable() {
    let broker = broker_listening_on(&[]);
    let mut task = PutOne {
        queue: "DEV.QUEUE.1",
        opens: 0,
    };

    let result = Failover::run(&broker, &two_endpoints(), &mut task).await;

    assert!(matches!(
        result,
        Err(ExchangeError::EndpointsExhausted { attempted: 2 })
    ));
    assert_eq!(task.opens, 0);
}

#[tokio::test]
async fn test_run_failure_is_returned_without_trying_next() {
    let broker = broker_listening_on(&["primary(1414)", "standby(1414)"]);
    broker.set_put_inhibited("DEV.QUEUE.1", true);
    let mut task = PutOne {
        queue: "DEV.QUEUE.1",
        opens: 0,
    };

    let result = Failover::run(&broker, &two_endpoints(), &mut task).await;

    assert!(matches!(result, Err(ExchangeError::SendFailed { .. })));
    assert_eq!(task.opens, 1);
}
