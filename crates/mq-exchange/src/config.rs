//! Connection configuration loaded from a JSON endpoint file.
//!
//! The file lists one or more broker endpoints under `MQ_ENDPOINTS`; the
//! first entry also carries the application settings (queue names, topic,
//! credentials). Its path comes from the `JSON_CONFIG` environment variable
//! and defaults to `env.json`. A client channel definition table can be
//! supplied through `MQCCDTURL`, optionally prefixed with `file://`.
//!
//! ```json
//! { "MQ_ENDPOINTS": [ { "HOST": "localhost", "PORT": "1414",
//!     "CHANNEL": "DEV.APP.SVRCONN", "QMGR": "QM1",
//!     "QUEUE_NAME": "DEV.QUEUE.1" } ] }
//! ```

use crate::connection::{ConnectParams, Credentials, TlsSettings};
use crate::error::ConfigurationError;
use crate::message::QueueName;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

pub const CONFIG_PATH_ENV: &str = "JSON_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "env.json";
pub const CCDT_URL_ENV: &str = "MQCCDTURL";
const FILE_PREFIX: &str = "file://";

// ============================================================================
// Endpoint Configuration
// ============================================================================

/// One broker endpoint and the application settings that go with it
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(rename = "HOST", alias = "host")]
    pub host: String,

    #[serde(rename = "PORT", alias = "port", deserialize_with = "deserialize_port")]
    pub port: u16,

    #[serde(rename = "CHANNEL", alias = "channel", default)]
    pub channel: Option<String>,

    #[serde(rename = "QMGR", alias = "qmgr")]
    pub queue_manager: String,

    #[serde(rename = "APP_USER", alias = "app_user", default)]
    pub app_user: Option<String>,

    #[serde(rename = "APP_PASSWORD", alias = "app_password", default)]
    pub app_password: Option<String>,

    #[serde(rename = "QUEUE_NAME", alias = "queue_name", default)]
    pub queue_name: Option<String>,

    #[serde(rename = "BACKOUT_QUEUE", alias = "backout_queue", default)]
    pub backout_queue: Option<String>,

    #[serde(rename = "MODEL_QUEUE_NAME", alias = "model_queue_name", default)]
    pub model_queue_name: Option<String>,

    #[serde(rename = "DYNAMIC_QUEUE_PREFIX", alias = "dynamic_queue_prefix", default)]
    pub dynamic_queue_prefix: Option<String>,

    #[serde(rename = "TOPIC_NAME", alias = "topic_name", default)]
    pub topic_name: Option<String>,

    #[serde(rename = "CIPHER", alias = "cipher", default)]
    pub cipher: Option<String>,

    #[serde(rename = "KEY_REPOSITORY", alias = "key_repository", default)]
    pub key_repository: Option<String>,
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("channel", &self.channel)
            .field("queue_manager", &self.queue_manager)
            .field("app_user", &self.app_user)
            .field(
                "app_password",
                &self.app_password.as_ref().map(|_| "<redacted>"),
            )
            .field("queue_name", &self.queue_name)
            .field("backout_queue", &self.backout_queue)
            .field("model_queue_name", &self.model_queue_name)
            .field("dynamic_queue_prefix", &self.dynamic_queue_prefix)
            .field("topic_name", &self.topic_name)
            .field("cipher", &self.cipher)
            .field("key_repository", &self.key_repository)
            .finish()
    }
}

fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u64),
        Text(String),
    }

    let port = match Port::deserialize(deserializer)? {
        Port::Number(n) => u16::try_from(n)
            .map_err(|_| de::Error::custom(format!("port {} out of range", n)))?,
        Port::Text(s) => s
            .trim()
            .parse::<u16>()
            .map_err(|_| de::Error::custom(format!("invalid port '{}'", s)))?,
    };

    if port == 0 {
        return Err(de::Error::custom("port must not be 0"));
    }
    Ok(port)
}

/// Treat empty strings as unset
fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl EndpointConfig {
    pub fn new(host: impl Into<String>, port: u16, queue_manager: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            channel: None,
            queue_manager: queue_manager.into(),
            app_user: None,
            app_password: None,
            queue_name: None,
            backout_queue: None,
            model_queue_name: None,
            dynamic_queue_prefix: None,
            topic_name: None,
            cipher: None,
            key_repository: None,
        }
    }

    /// `host(port)` form used as a connection name
    pub fn conn_name(&self) -> String {
        format!("{}({})", self.host.trim(), self.port)
    }

    pub fn channel(&self) -> Option<&str> {
        non_blank(&self.channel)
    }

    pub fn credentials(&self) -> Option<Credentials> {
        non_blank(&self.app_user).map(|user| Credentials {
            user: user.to_string(),
            password: self.app_password.clone().unwrap_or_default(),
        })
    }

    pub fn tls(&self) -> Option<TlsSettings> {
        let cipher_spec = non_blank(&self.cipher).map(str::to_string);
        let key_repository = non_blank(&self.key_repository).map(str::to_string);
        if cipher_spec.is_none() && key_repository.is_none() {
            return None;
        }
        Some(TlsSettings {
            cipher_spec,
            key_repository,
        })
    }

    pub fn queue(&self) -> Result<QueueName, ConfigurationError> {
        required_queue(&self.queue_name, "QUEUE_NAME")
    }

    pub fn backout_queue(&self) -> Result<Option<QueueName>, ConfigurationError> {
        match non_blank(&self.backout_queue) {
            Some(_) => required_queue(&self.backout_queue, "BACKOUT_QUEUE").map(Some),
            None => Ok(None),
        }
    }

    pub fn model_queue(&self) -> Result<&str, ConfigurationError> {
        required(&self.model_queue_name, "MODEL_QUEUE_NAME")
    }

    pub fn dynamic_queue_prefix(&self) -> Result<&str, ConfigurationError> {
        required(&self.dynamic_queue_prefix, "DYNAMIC_QUEUE_PREFIX")
    }

    pub fn topic(&self) -> Result<&str, ConfigurationError> {
        required(&self.topic_name, "TOPIC_NAME")
    }

    /// Connection parameters for this endpoint. With a CCDT the channel
    /// table resolves the connection, so no connection name is set.
    pub fn connect_params(&self, ccdt_url: Option<&str>) -> ConnectParams {
        let mut params = ConnectParams::new(self.queue_manager.trim());

        match ccdt_url {
            Some(ccdt) => params.ccdt_url = Some(ccdt.to_string()),
            None => {
                params = params.with_connection_name(self.conn_name());
                if let Some(channel) = self.channel() {
                    params = params.with_channel(channel);
                }
            }
        }

        params.credentials = self.credentials();
        params.tls = self.tls();
        params
    }

    fn validate(&self, index: usize) -> Result<(), ConfigurationError> {
        if self.host.trim().is_empty() {
            return Err(ConfigurationError::Invalid {
                message: format!("endpoint {}: HOST must not be empty", index),
            });
        }
        if self.queue_manager.trim().is_empty() {
            return Err(ConfigurationError::Invalid {
                message: format!("endpoint {}: QMGR must not be empty", index),
            });
        }
        if self.port == 0 {
            return Err(ConfigurationError::Invalid {
                message: format!("endpoint {}: PORT must not be 0", index),
            });
        }
        Ok(())
    }
}

fn required<'a>(value: &'a Option<String>, key: &str) -> Result<&'a str, ConfigurationError> {
    non_blank(value).ok_or_else(|| ConfigurationError::Missing {
        key: key.to_string(),
    })
}

fn required_queue(value: &Option<String>, key: &str) -> Result<QueueName, ConfigurationError> {
    let name = required(value, key)?;
    QueueName::new(name.to_string()).map_err(|e| ConfigurationError::Invalid {
        message: format!("{}: {}", key, e),
    })
}

// ============================================================================
// Connection Configuration
// ============================================================================

#[derive(Deserialize)]
struct RawConfig {
    #[serde(rename = "MQ_ENDPOINTS", alias = "mq_endpoints", default)]
    endpoints: Vec<EndpointConfig>,
}

/// An endpoint in iteration order
#[derive(Debug, Clone, Copy)]
pub struct Endpoint<'a> {
    pub index: usize,
    pub config: &'a EndpointConfig,
    ccdt_url: Option<&'a str>,
}

impl Endpoint<'_> {
    pub fn conn_name(&self) -> String {
        self.config.conn_name()
    }

    pub fn connect_params(&self) -> ConnectParams {
        self.config.connect_params(self.ccdt_url)
    }
}

/// Immutable, validated connection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    endpoints: Vec<EndpointConfig>,
    ccdt_url: Option<String>,
}

impl ConnectionConfig {
    /// Build from endpoints; fails if the list is empty or an endpoint is
    /// incomplete
    pub fn new(endpoints: Vec<EndpointConfig>) -> Result<Self, ConfigurationError> {
        let config = Self {
            endpoints,
            ccdt_url: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from the file named by `JSON_CONFIG` (default `env.json`),
    /// honouring `MQCCDTURL`
    pub fn load() -> Result<Self, ConfigurationError> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(path)
    }

    /// Load from a JSON file, honouring `MQCCDTURL`
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let source = ::config::File::from(path.to_path_buf())
            .format(::config::FileFormat::Json)
            .required(true);
        let config = Self::build(source)?;
        Ok(config.with_ccdt_url(std::env::var(CCDT_URL_ENV).ok()))
    }

    /// Parse configuration from JSON text; `MQCCDTURL` is not consulted
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        Self::build(::config::File::from_str(json, ::config::FileFormat::Json))
    }

    fn build<S>(source: S) -> Result<Self, ConfigurationError>
    where
        S: ::config::Source + Send + Sync + 'static,
    {
        let raw: RawConfig = ::config::Config::builder()
            .add_source(source)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        if raw.endpoints.is_empty() {
            return Err(ConfigurationError::Missing {
                key: "MQ_ENDPOINTS".to_string(),
            });
        }

        let config = Self::new(raw.endpoints)?;
        debug!(endpoints = config.endpoints.len(), "Configuration parsed");
        Ok(config)
    }

    /// Use a client channel definition table. The `file://` prefix is
    /// accepted; blank values are ignored.
    pub fn with_ccdt_url(mut self, ccdt_url: Option<String>) -> Self {
        self.ccdt_url = ccdt_url.filter(|u| !u.trim().is_empty());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.endpoints.is_empty() {
            return Err(ConfigurationError::Missing {
                key: "MQ_ENDPOINTS".to_string(),
            });
        }
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            endpoint.validate(index)?;
        }
        Ok(())
    }

    /// First endpoint; it carries the application settings
    pub fn primary(&self) -> &EndpointConfig {
        &self.endpoints[0]
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// All endpoints as `host(port),host(port)`
    pub fn connection_string(&self) -> String {
        self.endpoints
            .iter()
            .map(EndpointConfig::conn_name)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn endpoints(&self) -> impl Iterator<Item = Endpoint<'_>> {
        let ccdt_url = self.active_ccdt_url();
        self.endpoints
            .iter()
            .enumerate()
            .map(move |(index, config)| Endpoint {
                index,
                config,
                ccdt_url,
            })
    }

    pub fn ccdt_url(&self) -> Option<&str> {
        self.ccdt_url.as_deref()
    }

    /// Local path of the CCDT with any `file://` prefix removed
    pub fn ccdt_path(&self) -> Option<PathBuf> {
        self.ccdt_url.as_deref().map(|url| {
            PathBuf::from(url.strip_prefix(FILE_PREFIX).unwrap_or(url))
        })
    }

    /// A CCDT is used only when the file it names exists
    pub fn is_ccdt_available(&self) -> bool {
        self.ccdt_path().is_some_and(|p| p.is_file())
    }

    fn active_ccdt_url(&self) -> Option<&str> {
        if self.is_ccdt_available() {
            self.ccdt_url.as_deref()
        } else {
            None
        }
    }

    /// Parameters for a single connection listing every endpoint, letting
    /// the broker client pick the first reachable one
    pub fn connect_params(&self) -> ConnectParams {
        let mut params = self.primary().connect_params(self.active_ccdt_url());
        if params.ccdt_url.is_none() {
            params.connection_name = Some(self.connection_string());
        }
        params
    }
}
