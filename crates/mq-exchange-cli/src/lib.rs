//! # MQ Exchange CLI
//!
//! Command-line drivers for the messaging patterns in `mq-exchange`.
//!
//! Every command runs against an in-process broker built from the endpoint
//! configuration, listening on each configured `host(port)`. Endpoints named
//! with `--unreachable` refuse connections, which exercises failover.
//!
//! Commands:
//! - `put` / `get` - point-to-point
//! - `publish` / `subscribe` - publish/subscribe on the configured topic
//! - `request-reply` - requester with a prime-factor responder
//! - `respond` - transactional responder with poison-message handling
//! - `config` - validate and display the endpoint configuration

use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use mq_exchange::{
    ConfigurationError, ConnectionConfig, CorrelationEngine, Destination, DestinationHandle,
    EndpointTask, ExchangeError, Failover, InMemoryBroker, InMemoryConfig, JsonCodec, Message,
    MessageHandler, MessageId, OpenMode, PutOptions, QueueName, ReceiveSummary, ReceiverConfig,
    ReplyContext, ReplyOutcome, ReplyTo, ReportOptions, RequestOptions, RequestResponseClient,
    Session, SimpleConsumer, TransactionalReceiver,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// MQ Exchange CLI - messaging pattern drivers
#[derive(Debug, Parser)]
#[command(name = "mq-exchange")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Put/get, publish/subscribe and request/reply over a message broker")]
pub struct Cli {
    /// Endpoint configuration file
    #[arg(short, long, env = "JSON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Endpoint (`host(port)`) the broker refuses connections on; repeatable
    #[arg(long, global = true, value_name = "HOST(PORT)")]
    pub unreachable: Vec<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Put messages to the configured queue
    Put {
        /// Number of messages to put
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,

        /// Greeting text carried in each message
        #[arg(short, long, default_value = "Hello from Rust!")]
        message: String,
    },

    /// Get messages from the configured queue until none arrives
    Get {
        /// Messages to put before draining
        #[arg(long, default_value = "3")]
        seed: u32,

        /// Seconds to wait for each message
        #[arg(short, long, default_value = "5")]
        wait: u64,
    },

    /// Publish messages to the configured topic
    Publish {
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,

        #[arg(short, long, default_value = "Hello from Rust!")]
        message: String,
    },

    /// Subscribe to the configured topic and print publications
    Subscribe {
        /// Publications to make after subscribing
        #[arg(short = 'n', long, default_value = "3")]
        count: u32,

        #[arg(short, long, default_value = "5")]
        wait: u64,
    },

    /// Send a request and wait for its reply
    RequestReply {
        /// Number to factorise
        #[arg(long, default_value = "60")]
        value: u64,

        /// Seconds to wait for the reply
        #[arg(short, long, default_value = "5")]
        timeout: u64,

        /// Correlation scheme requested from the responder
        #[arg(long, value_enum, default_value = "copy-msg-id")]
        report: ReplyReport,

        /// Do not start a responder; the request times out
        #[arg(long)]
        no_responder: bool,
    },

    /// Serve requests transactionally until the queue is empty
    Respond {
        /// Requests to put before serving
        #[arg(long, default_value = "3")]
        requests: u32,

        /// Malformed messages to put before serving
        #[arg(long, default_value = "0")]
        poison: u32,

        #[arg(short, long, default_value = "5")]
        wait: u64,

        /// Backouts after which a message goes to the backout queue
        #[arg(long, default_value = "5")]
        backout_threshold: u32,
    },

    /// Validate configuration
    Config {
        /// Show resolved configuration
        #[arg(short, long)]
        show: bool,
    },
}

/// Correlation schemes a requester can ask for
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReplyReport {
    /// Reply correlation id is the request message id
    CopyMsgId,
    /// Same correlation as `copy-msg-id`, fresh reply message id
    NewMsgId,
    /// Reply carries the request's own correlation id
    PassCorrelId,
}

impl ReplyReport {
    pub fn report_options(self) -> ReportOptions {
        match self {
            Self::CopyMsgId => ReportOptions::COPY_MSG_ID_TO_CORREL_ID,
            Self::NewMsgId => ReportOptions::NEW_MSG_ID,
            Self::PassCorrelId => {
                ReportOptions::COPY_MSG_ID_TO_CORREL_ID | ReportOptions::PASS_CORREL_ID
            }
        }
    }
}

// ============================================================================
// CLI Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Messaging error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error class
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Exchange(_) => 2,
            Self::CommandFailed { .. } => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Io(_) => 5,
        }
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Body of put, publish and request messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    pub greeting: String,
    pub value: u64,
}

/// Body of a responder's reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorReply {
    pub value: u64,
    pub factors: Vec<u64>,
}

/// Prime factors in ascending order; empty for 0 and 1
pub fn prime_factors(mut n: u64) -> Vec<u64> {
    let mut factors = Vec::new();
    if n < 2 {
        return factors;
    }

    let mut divisor = 2;
    while divisor_in_range(divisor, n) {
        while n % divisor == 0 {
            factors.push(divisor);
            n /= divisor;
        }
        divisor += if divisor == 2 { 1 } else { 2 };
    }
    if n > 1 {
        factors.push(n);
    }
    factors
}

/// `divisor * divisor <= n` without overflowing for large `n`
fn divisor_in_range(divisor: u64, n: u64) -> bool {
    divisor <= n / divisor
}

// ============================================================================
// Main Entry Point
// ============================================================================

pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    execute(cli).await
}

/// Run a parsed command line
pub async fn execute(cli: Cli) -> Result<(), CliError> {
    let config = load_configuration(cli.config.as_ref())?;

    if let Commands::Config { show } = cli.command {
        return execute_config_command(&config, show);
    }

    let broker = build_broker(&config, &cli.unreachable);
    let cancel = CancellationToken::new();
    let _ctrl_c = spawn_interrupt_handler(cancel.clone());

    match cli.command {
        Commands::Put { count, message } => {
            execute_put_command(&broker, &config, count, message).await
        }
        Commands::Get { seed, wait } => {
            execute_get_command(&broker, &config, seed, wait, &cancel).await
        }
        Commands::Publish { count, message } => {
            execute_publish_command(&broker, &config, count, message).await
        }
        Commands::Subscribe { count, wait } => {
            execute_subscribe_command(&broker, &config, count, wait, &cancel).await
        }
        Commands::RequestReply {
            value,
            timeout,
            report,
            no_responder,
        } => {
            execute_request_reply_command(&broker, &config, value, timeout, report, no_responder)
                .await
        }
        Commands::Respond {
            requests,
            poison,
            wait,
            backout_threshold,
        } => {
            execute_respond_command(
                &broker,
                &config,
                RespondArgs {
                    requests,
                    poison,
                    wait,
                    backout_threshold,
                },
                &cancel,
            )
            .await
        }
        Commands::Config { .. } => Ok(()),
    }
}

fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .map_err(|e| CliError::InvalidArgument {
            arg: "--log-level".to_string(),
            message: e.to_string(),
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::CommandFailed {
        message: format!("logging initialisation failed: {}", e),
    })
}

fn load_configuration(path: Option<&PathBuf>) -> Result<ConnectionConfig, ConfigurationError> {
    match path {
        Some(path) => ConnectionConfig::load_from(path),
        None => ConnectionConfig::load(),
    }
}

fn spawn_interrupt_handler(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received; stopping after the current message");
            cancel.cancel();
        }
    })
}

/// In-process broker matching the configuration
pub fn build_broker(config: &ConnectionConfig, unreachable: &[String]) -> InMemoryBroker {
    let primary = config.primary();
    let mut broker_config = InMemoryConfig {
        queue_manager: primary.queue_manager.trim().to_string(),
        listeners: config
            .endpoints()
            .map(|e| e.conn_name())
            .filter(|name| !unreachable.iter().any(|u| u.trim() == name))
            .collect(),
        credentials: primary.credentials(),
        ..InMemoryConfig::default()
    };

    for queue in [&primary.queue_name, &primary.backout_queue] {
        if let Some(name) = queue.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            if !broker_config.queues.iter().any(|q| q == name) {
                broker_config.queues.push(name.to_string());
            }
        }
    }
    if let Ok(model) = primary.model_queue() {
        if !broker_config.model_queues.iter().any(|m| m == model) {
            broker_config.model_queues.push(model.to_string());
        }
    }

    InMemoryBroker::new(broker_config)
}

fn greeting(text: &str, value: u64) -> Greeting {
    Greeting {
        greeting: format!("{} {}", text, chrono::Utc::now().to_rfc3339()),
        value,
    }
}

// ============================================================================
// Endpoint Tasks
// ============================================================================

/// Puts greetings to one destination
struct PutTask {
    destination: Destination,
    count: u32,
    text: String,
}

#[async_trait]
impl EndpointTask for PutTask {
    type Opened = DestinationHandle;
    type Output = Vec<MessageId>;

    async fn open(&mut self, session: &mut Session) -> Result<DestinationHandle, ExchangeError> {
        session.open(&self.destination, OpenMode::Output).await
    }

    async fn run(
        &mut self,
        session: &mut Session,
        handle: DestinationHandle,
    ) -> Result<Vec<MessageId>, ExchangeError> {
        let mut ids = Vec::with_capacity(self.count as usize);
        for value in 1..=u64::from(self.count) {
            let message = JsonCodec::encode_message(&greeting(&self.text, value))?;
            ids.push(session.put(&handle, &message, PutOptions::no_syncpoint()).await?);
        }
        Ok(ids)
    }
}

/// Seeds a queue, then drains it
struct GetTask {
    queue: QueueName,
    seed: u32,
    consumer: SimpleConsumer,
    cancel: CancellationToken,
}

#[async_trait]
impl EndpointTask for GetTask {
    type Opened = (DestinationHandle, DestinationHandle);
    type Output = (Vec<Greeting>, u64);

    async fn open(
        &mut self,
        session: &mut Session,
    ) -> Result<(DestinationHandle, DestinationHandle), ExchangeError> {
        let destination = Destination::from(&self.queue);
        let output = session.open(&destination, OpenMode::Output).await?;
        let input = session.open(&destination, OpenMode::Input).await?;
        Ok((output, input))
    }

    async fn run(
        &mut self,
        session: &mut Session,
        (output, input): (DestinationHandle, DestinationHandle),
    ) -> Result<(Vec<Greeting>, u64), ExchangeError> {
        for value in 1..=u64::from(self.seed) {
            let message = JsonCodec::encode_message(&greeting("Hello from Rust!", value))?;
            session.put(&output, &message, PutOptions::no_syncpoint()).await?;
        }

        let mut received = Vec::new();
        let summary = self
            .consumer
            .drain(session, &input, &self.cancel, |g: Greeting, _| received.push(g))
            .await?;
        Ok((received, summary.skipped))
    }
}

/// Subscribes, publishes, then drains the subscription
struct SubscribeTask {
    topic: String,
    count: u32,
    consumer: SimpleConsumer,
    cancel: CancellationToken,
}

#[async_trait]
impl EndpointTask for SubscribeTask {
    type Opened = (DestinationHandle, DestinationHandle);
    type Output = Vec<Greeting>;

    async fn open(
        &mut self,
        session: &mut Session,
    ) -> Result<(DestinationHandle, DestinationHandle), ExchangeError> {
        let subscription = session.subscribe(&self.topic).await?;
        let publisher = session
            .open(&Destination::topic(self.topic.clone()), OpenMode::Output)
            .await?;
        Ok((subscription, publisher))
    }

    async fn run(
        &mut self,
        session: &mut Session,
        (subscription, publisher): (DestinationHandle, DestinationHandle),
    ) -> Result<Vec<Greeting>, ExchangeError> {
        for value in 1..=u64::from(self.count) {
            let message = JsonCodec::encode_message(&greeting("Publication", value))?;
            session.put(&publisher, &message, PutOptions::no_syncpoint()).await?;
        }

        let mut received = Vec::new();
        self.consumer
            .drain(session, &subscription, &self.cancel, |g: Greeting, _| {
                received.push(g)
            })
            .await?;
        Ok(received)
    }
}

/// Sends one request and waits for the reply
struct RequestTask {
    queue: QueueName,
    client: RequestResponseClient,
    value: u64,
}

#[async_trait]
impl EndpointTask for RequestTask {
    type Opened = DestinationHandle;
    type Output = ReplyOutcome;

    async fn open(&mut self, session: &mut Session) -> Result<DestinationHandle, ExchangeError> {
        session
            .open(&Destination::from(&self.queue), OpenMode::Output)
            .await
    }

    async fn run(
        &mut self,
        session: &mut Session,
        handle: DestinationHandle,
    ) -> Result<ReplyOutcome, ExchangeError> {
        let request = greeting("Factorise", self.value);
        self.client.request(session, &handle, &request).await
    }
}

/// Replies with the prime factors of the request's value
#[derive(Debug, Default)]
pub struct FactorResponder;

#[async_trait]
impl MessageHandler for FactorResponder {
    type Request = Greeting;

    async fn handle(
        &self,
        request: Greeting,
        context: &mut ReplyContext<'_>,
    ) -> anyhow::Result<()> {
        let reply = FactorReply {
            value: request.value,
            factors: prime_factors(request.value),
        };
        info!(value = reply.value, factors = ?reply.factors, "Responding");
        context.reply(&reply).await?;
        Ok(())
    }
}

/// Runs the transactional responder on the input queue
struct RespondTask {
    queue: QueueName,
    receiver: TransactionalReceiver<FactorResponder>,
    cancel: CancellationToken,
}

#[async_trait]
impl EndpointTask for RespondTask {
    type Opened = DestinationHandle;
    type Output = ReceiveSummary;

    async fn open(&mut self, session: &mut Session) -> Result<DestinationHandle, ExchangeError> {
        session
            .open(&Destination::from(&self.queue), OpenMode::Input)
            .await
    }

    async fn run(
        &mut self,
        session: &mut Session,
        input: DestinationHandle,
    ) -> Result<ReceiveSummary, ExchangeError> {
        self.receiver.run(session, &input, &self.cancel).await
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn execute_put_command(
    broker: &InMemoryBroker,
    config: &ConnectionConfig,
    count: u32,
    message: String,
) -> Result<(), CliError> {
    let queue = config.primary().queue()?;
    info!(queue = %queue, count, "Putting messages");

    let mut task = PutTask {
        destination: Destination::from(&queue),
        count,
        text: message,
    };
    let ids = Failover::run(broker, config, &mut task).await?;

    for id in &ids {
        println!("Put message {} to {}", id, queue);
    }
    Ok(())
}

async fn execute_get_command(
    broker: &InMemoryBroker,
    config: &ConnectionConfig,
    seed: u32,
    wait: u64,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let queue = config.primary().queue()?;
    let mut task = GetTask {
        queue: queue.clone(),
        seed,
        consumer: SimpleConsumer::new(Duration::from_secs(wait)),
        cancel: cancel.clone(),
    };

    let (received, skipped) = Failover::run(broker, config, &mut task).await?;

    for message in &received {
        let body = serde_json::to_string(message).unwrap_or_default();
        println!("Got message from {}: {}", queue, body);
    }
    println!("Received {} message(s), skipped {}", received.len(), skipped);
    Ok(())
}

async fn execute_publish_command(
    broker: &InMemoryBroker,
    config: &ConnectionConfig,
    count: u32,
    message: String,
) -> Result<(), CliError> {
    let topic = config.primary().topic()?.to_string();
    info!(topic = %topic, count, "Publishing messages");

    let mut task = PutTask {
        destination: Destination::topic(topic.clone()),
        count,
        text: message,
    };
    let ids = Failover::run(broker, config, &mut task).await?;

    for id in &ids {
        println!("Published message {} on {}", id, topic);
    }
    Ok(())
}

async fn execute_subscribe_command(
    broker: &InMemoryBroker,
    config: &ConnectionConfig,
    count: u32,
    wait: u64,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let topic = config.primary().topic()?.to_string();
    let mut task = SubscribeTask {
        topic: topic.clone(),
        count,
        consumer: SimpleConsumer::new(Duration::from_secs(wait)),
        cancel: cancel.clone(),
    };

    let received = Failover::run(broker, config, &mut task).await?;

    for message in &received {
        let body = serde_json::to_string(message).unwrap_or_default();
        println!("Publication on {}: {}", topic, body);
    }
    println!("Received {} publication(s)", received.len());
    Ok(())
}

async fn execute_request_reply_command(
    broker: &InMemoryBroker,
    config: &ConnectionConfig,
    value: u64,
    timeout: u64,
    report: ReplyReport,
    no_responder: bool,
) -> Result<(), CliError> {
    let primary = config.primary();
    let queue = primary.queue()?;
    let options = RequestOptions::new()
        .with_model_queue(primary.model_queue()?, primary.dynamic_queue_prefix()?)
        .with_reply_timeout(Duration::from_secs(timeout))
        .with_report(report.report_options());

    let responder_stop = CancellationToken::new();
    let responder = if no_responder {
        None
    } else {
        Some(spawn_responder(
            broker.clone(),
            config.clone(),
            queue.clone(),
            responder_stop.clone(),
        ))
    };

    let mut task = RequestTask {
        queue,
        client: RequestResponseClient::new(options),
        value,
    };
    let outcome = Failover::run(broker, config, &mut task).await;

    responder_stop.cancel();
    if let Some(responder) = responder {
        match responder.await {
            Ok(Err(e)) => warn!(error = %e, "Responder failed"),
            Err(e) => warn!(error = %e, "Responder task failed"),
            Ok(Ok(_)) => {}
        }
    }

    match outcome? {
        ReplyOutcome::Reply(reply) => {
            let decoded: FactorReply = RequestResponseClient::decode_reply(&reply)
                .map_err(ExchangeError::from)?;
            println!(
                "Reply {} correlated to {}: factors of {} are {:?}",
                reply.message_id(),
                reply.correlation_id(),
                decoded.value,
                decoded.factors
            );
            Ok(())
        }
        ReplyOutcome::Timeout => {
            println!("No reply within {}s", timeout);
            Err(CliError::CommandFailed {
                message: "request timed out".to_string(),
            })
        }
    }
}

/// Responder serving one request on its own connection
fn spawn_responder(
    broker: InMemoryBroker,
    config: ConnectionConfig,
    queue: QueueName,
    stop: CancellationToken,
) -> tokio::task::JoinHandle<Result<ReceiveSummary, ExchangeError>> {
    tokio::spawn(async move {
        let receiver_config = ReceiverConfig::new().with_wait_interval(Duration::from_millis(250));
        let mut task = RespondTask {
            queue,
            receiver: TransactionalReceiver::new(receiver_config, FactorResponder),
            cancel: stop.clone(),
        };

        // Keep serving until the requester is done
        let mut summary = Failover::run(&broker, &config, &mut task).await?;
        while !stop.is_cancelled() {
            summary = Failover::run(&broker, &config, &mut task).await?;
        }
        Ok(summary)
    })
}

struct RespondArgs {
    requests: u32,
    poison: u32,
    wait: u64,
    backout_threshold: u32,
}

async fn execute_respond_command(
    broker: &InMemoryBroker,
    config: &ConnectionConfig,
    args: RespondArgs,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let primary = config.primary();
    let queue = primary.queue()?;
    let backout_queue = primary.backout_queue()?;

    seed_requests(broker, config, &queue, args.requests, args.poison).await?;

    let mut receiver_config = ReceiverConfig::new()
        .with_wait_interval(Duration::from_secs(args.wait))
        .with_backout_threshold(args.backout_threshold);
    if let Some(backout_queue) = backout_queue.clone() {
        receiver_config = receiver_config.with_backout_queue(backout_queue);
    }

    let mut task = RespondTask {
        queue: queue.clone(),
        receiver: TransactionalReceiver::new(receiver_config, FactorResponder),
        cancel: cancel.clone(),
    };
    let summary = Failover::run(broker, config, &mut task).await?;

    println!(
        "Committed {}, backed out {}, redirected {} ({:?})",
        summary.committed, summary.backed_out, summary.redirected, summary.stop_reason
    );
    println!(
        "Reply queue {} depth {}",
        SEED_REPLY_QUEUE,
        broker.queue_depth(SEED_REPLY_QUEUE).unwrap_or(0)
    );
    if let Some(backout_queue) = backout_queue {
        println!(
            "Backout queue {} depth {}",
            backout_queue,
            broker.queue_depth(backout_queue.as_str()).unwrap_or(0)
        );
    }
    Ok(())
}

/// Queue the seeded requests name as their reply-to
pub const SEED_REPLY_QUEUE: &str = "DEV.QUEUE.2";

/// Put requests and malformed messages for the responder to serve
async fn seed_requests(
    broker: &InMemoryBroker,
    config: &ConnectionConfig,
    queue: &QueueName,
    requests: u32,
    poison: u32,
) -> Result<(), ExchangeError> {
    let mut session = Session::connect(broker, &config.connect_params()).await?;
    let destination = Destination::from(queue);
    let result = async {
        for value in 1..=u64::from(requests) {
            let body = JsonCodec::encode(&greeting("Factorise", value * 12))?;
            let request = CorrelationEngine::prepare_request(
                ReplyTo::new(SEED_REPLY_QUEUE),
                body,
            );
            session.put1(&destination, &request, PutOptions::no_syncpoint()).await?;
        }
        for _ in 0..poison {
            let message = Message::text("this is not json")
                .with_reply_to(ReplyTo::new(SEED_REPLY_QUEUE));
            session.put1(&destination, &message, PutOptions::no_syncpoint()).await?;
        }
        Ok::<(), ExchangeError>(())
    }
    .await;

    session.close().await?;
    result
}

fn execute_config_command(config: &ConnectionConfig, show: bool) -> Result<(), CliError> {
    info!(endpoints = config.endpoint_count(), "Configuration is valid");
    println!("Configuration is valid");
    println!("Connection string: {}", config.connection_string());
    if config.is_ccdt_available() {
        println!("CCDT: {}", config.ccdt_url().unwrap_or_default());
    }

    if show {
        for endpoint in config.endpoints() {
            let mut shown = endpoint.config.clone();
            if shown.app_password.is_some() {
                shown.app_password = Some("********".to_string());
            }
            let json = serde_json::to_string_pretty(&shown).map_err(|e| CliError::CommandFailed {
                message: e.to_string(),
            })?;
            println!("Endpoint {}:\n{}", endpoint.index, json);
        }
    }
    Ok(())
}
