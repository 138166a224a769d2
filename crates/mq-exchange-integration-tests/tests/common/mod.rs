//! Common test utilities for mq-exchange integration tests
//!
//! This module provides:
//! - Broker and session fixtures
//! - Message handlers used by responder tasks
//! - Endpoint configuration builders

#![allow(dead_code)]

use async_trait::async_trait;
use mq_exchange::{
    ConnectParams, ConnectionConfig, Destination, InMemoryBroker, MessageHandler, OpenMode,
    ReceiveSummary, ReceiverConfig, ReplyContext, Session, TransactionalReceiver,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const REQUEST_QUEUE: &str = "DEV.QUEUE.1";
pub const REPLY_QUEUE: &str = "DEV.QUEUE.2";
pub const BACKOUT_QUEUE: &str = "DEV.DEAD.LETTER.QUEUE";

// ============================================================================
// Fixtures
// ============================================================================

pub fn params() -> ConnectParams {
    ConnectParams::new("QM1").with_connection_name("localhost(1414)")
}

pub async fn connect(broker: &InMemoryBroker) -> Session {
    Session::connect(broker, &params()).await.unwrap()
}

/// Configuration with one endpoint per `host(port)` pair, all on QM1
pub fn endpoints_config(endpoints: &[(&str, u16)]) -> ConnectionConfig {
    let entries: Vec<serde_json::Value> = endpoints
        .iter()
        .map(|(host, port)| {
            serde_json::json!({
                "HOST": host,
                "PORT": port,
                "QMGR": "QM1",
                "QUEUE_NAME": REQUEST_QUEUE,
                "BACKOUT_QUEUE": BACKOUT_QUEUE,
                "MODEL_QUEUE_NAME": "DEV.APP.MODEL.QUEUE",
                "DYNAMIC_QUEUE_PREFIX": "APP.REPLIES.*",
                "TOPIC_NAME": "dev/"
            })
        })
        .collect();
    let json = serde_json::json!({ "MQ_ENDPOINTS": entries }).to_string();
    ConnectionConfig::from_json(&json).unwrap()
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorRequest {
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorReply {
    pub value: u64,
    pub factors: Vec<u64>,
}

pub fn prime_factors(mut n: u64) -> Vec<u64> {
    let mut factors = Vec::new();
    let mut divisor = 2;
    while n > 1 && divisor * divisor <= n {
        while n % divisor == 0 {
            factors.push(divisor);
            n /= divisor;
        }
        divisor += 1;
    }
    if n > 1 {
        factors.push(n);
    }
    factors
}

/// Replies with the prime factors of the requested value
#[derive(Default)]
pub struct Factoriser;

#[async_trait]
impl MessageHandler for Factoriser {
    type Request = FactorRequest;

    async fn handle(
        &self,
        request: FactorRequest,
        context: &mut ReplyContext<'_>,
    ) -> anyhow::Result<()> {
        context
            .reply(&FactorReply {
                value: request.value,
                factors: prime_factors(request.value),
            })
            .await?;
        Ok(())
    }
}

/// Fails every request whose value is in `reject`, optionally after replying
#[derive(Clone, Default)]
pub struct SelectiveFailure {
    pub reject: Vec<u64>,
    pub reply_before_failing: bool,
    pub calls: Arc<AtomicU32>,
}

impl SelectiveFailure {
    pub fn rejecting(values: &[u64]) -> Self {
        Self {
            reject: values.to_vec(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for SelectiveFailure {
    type Request = FactorRequest;

    async fn handle(
        &self,
        request: FactorRequest,
        context: &mut ReplyContext<'_>,
    ) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject.contains(&request.value) {
            if self.reply_before_failing {
                context.reply(&"partial").await?;
            }
            anyhow::bail!("value {} rejected", request.value);
        }
        context
            .reply(&FactorReply {
                value: request.value,
                factors: prime_factors(request.value),
            })
            .await?;
        Ok(())
    }
}

// ============================================================================
// Responder
// ============================================================================

/// Serve the request queue until `stop` fires; yields the commit count
pub fn spawn_responder(
    broker: InMemoryBroker,
    stop: CancellationToken,
) -> tokio::task::JoinHandle<u64> {
    tokio::spawn(async move {
        let mut session = connect(&broker).await;
        let input = session
            .open(&Destination::queue(REQUEST_QUEUE), OpenMode::Input)
            .await
            .unwrap();
        let config = ReceiverConfig::new().with_wait_interval(Duration::from_millis(50));
        let mut receiver = TransactionalReceiver::new(config, Factoriser);

        let mut committed = 0;
        while !stop.is_cancelled() {
            let summary: ReceiveSummary = receiver.run(&mut session, &input, &stop).await.unwrap();
            committed += summary.committed;
        }
        session.close().await.unwrap();
        committed
    })
}
