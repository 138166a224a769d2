//! Trying configured endpoints in order until one can be used.
//!
//! An endpoint is "usable" once a session is connected and the task has
//! opened what it needs. From then on the endpoint is committed to: the
//! task's own result is returned and no further endpoints are tried.

use crate::config::ConnectionConfig;
use crate::connection::BrokerProvider;
use crate::error::ExchangeError;
use crate::session::Session;
use async_trait::async_trait;
use tracing::{info, warn};

#[cfg(test)]
#[path = "endpoints_tests.rs"]
mod tests;

/// Work performed against the first usable endpoint
#[async_trait]
pub trait EndpointTask: Send {
    /// Destinations and other state the task opens before running
    type Opened: Send;
    type Output: Send;

    /// Open everything the task needs. A failure moves on to the next endpoint.
    async fn open(&mut self, session: &mut Session) -> Result<Self::Opened, ExchangeError>;

    async fn run(
        &mut self,
        session: &mut Session,
        opened: Self::Opened,
    ) -> Result<Self::Output, ExchangeError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Failover;

impl Failover {
    /// Run `task` against the first endpoint that connects and opens.
    ///
    /// The session is always closed before returning. When every endpoint
    /// fails, the result is [`ExchangeError::EndpointsExhausted`].
    pub async fn run<T: EndpointTask>(
        provider: &dyn BrokerProvider,
        config: &ConnectionConfig,
        task: &mut T,
    ) -> Result<T::Output, ExchangeError> {
        let mut attempted = 0;

        for endpoint in config.endpoints() {
            attempted += 1;
            let params = endpoint.connect_params();
            info!(index = endpoint.index, endpoint = %params.endpoint_label(), "Trying endpoint");

            let mut session = match Session::connect(provider, &params).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(index = endpoint.index, error = %e, "Endpoint unavailable; trying next");
                    continue;
                }
            };

            let opened = match task.open(&mut session).await {
                Ok(opened) => opened,
                Err(e) => {
                    warn!(index = endpoint.index, error = %e, "Open failed; trying next endpoint");
                    if let Err(close_error) = session.close().await {
                        warn!(error = %close_error, "Closing session failed");
                    }
                    continue;
                }
            };

            let result = task.run(&mut session, opened).await;
            if let Err(close_error) = session.close().await {
                warn!(error = %close_error, "Closing session failed");
            }
            return result;
        }

        warn!(attempted, "All endpoints failed");
        Err(ExchangeError::EndpointsExhausted { attempted })
    }
}
