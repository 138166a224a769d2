//! Non-transactional consumption for basic get and subscribe.
//!
//! Messages are taken outside syncpoint, so a body that fails to decode is
//! already gone from the queue; it is logged and counted, never retried.

use crate::codec::JsonCodec;
use crate::error::ExchangeError;
use crate::message::{GetOptions, ReceivedMessage};
use crate::session::{DestinationHandle, Session};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Messages decoded and passed to the callback
    pub received: u64,
    /// Messages whose body was not valid JSON for the target type
    pub skipped: u64,
}

#[derive(Debug, Clone)]
pub struct SimpleConsumer {
    wait_interval: Duration,
}

impl Default for SimpleConsumer {
    fn default() -> Self {
        Self {
            wait_interval: Duration::from_secs(5),
        }
    }
}

impl SimpleConsumer {
    pub fn new(wait_interval: Duration) -> Self {
        Self { wait_interval }
    }

    pub fn wait_interval(&self) -> Duration {
        self.wait_interval
    }

    /// Get messages until none arrives within the wait interval or `cancel`
    /// fires, calling `on_message` with each decoded payload
    pub async fn drain<T, F>(
        &self,
        session: &mut Session,
        handle: &DestinationHandle,
        cancel: &CancellationToken,
        mut on_message: F,
    ) -> Result<DrainSummary, ExchangeError>
    where
        T: DeserializeOwned,
        F: FnMut(T, &ReceivedMessage),
    {
        let options = GetOptions::new().with_wait(self.wait_interval);
        let mut summary = DrainSummary::default();

        while !cancel.is_cancelled() {
            let Some(received) = session.get(handle, &options).await? else {
                debug!(source = %handle.name(), "No more messages");
                break;
            };

            match JsonCodec::decode::<T>(received.body()) {
                Ok(payload) => {
                    summary.received += 1;
                    on_message(payload, &received);
                }
                Err(e) => {
                    summary.skipped += 1;
                    warn!(
                        source = %handle.name(),
                        message_id = %received.message_id(),
                        error = %e,
                        "Message is not valid JSON"
                    );
                }
            }
        }

        info!(
            source = %handle.name(),
            received = summary.received,
            skipped = summary.skipped,
            "Drain finished"
        );
        Ok(summary)
    }
}
