/*
[INPUT]:  Endpoint URL, timing parameters, queue sizing (code or YAML)
[OUTPUT]: Validated StreamConfig and the ConnectionConfig derived from it
[POS]:    Configuration layer - per-connection settings only
[UPDATE]: When adding connection options or changing defaults
*/

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::channel::Channel;
use crate::error::{Result, StreamError};

/// Called by the connection task every time an established session is lost.
#[derive(Clone)]
pub struct DisconnectHook(Arc<dyn Fn(&str) + Send + Sync>);

impl DisconnectHook {
    pub fn new(hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self(Arc::new(hook))
    }

    pub(crate) fn notify(&self, reason: &str) {
        (self.0)(reason)
    }
}

impl fmt::Debug for DisconnectHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DisconnectHook")
    }
}

/// Settings for one streaming client.
///
/// `keepalive_interval_ms` has no default: the services disagree on how often
/// they expect a ping, so every caller states it.
///
/// ```yaml
/// endpoint: wss://ws-subscriptions-clob.polymarket.com/ws/market
/// keepalive_interval_ms: 10000
/// max_backoff_ms: 60000
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// `ws://` or `wss://` URL including the resource path
    pub endpoint: String,
    /// Interval between client pings while connected
    #[serde(rename = "keepalive_interval_ms", with = "duration_ms")]
    pub keepalive_interval: Duration,
    /// First reconnect delay, also the delay after a dropped session
    #[serde(
        rename = "initial_backoff_ms",
        with = "duration_ms",
        default = "default_initial_backoff"
    )]
    pub initial_backoff: Duration,
    /// Upper bound for the doubling reconnect delay
    #[serde(
        rename = "max_backoff_ms",
        with = "duration_ms",
        default = "default_max_backoff"
    )]
    pub max_backoff: Duration,
    /// Budget for TCP/TLS connect plus the upgrade handshake
    #[serde(
        rename = "connect_timeout_ms",
        with = "duration_ms",
        default = "default_connect_timeout"
    )]
    pub connect_timeout: Duration,
    /// Capacity of the raw and typed message queues
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(skip)]
    pub on_disconnect: Option<DisconnectHook>,
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_queue_capacity() -> usize {
    1000
}

impl StreamConfig {
    pub fn new(endpoint: impl Into<String>, keepalive_interval: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            keepalive_interval,
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            connect_timeout: default_connect_timeout(),
            queue_capacity: default_queue_capacity(),
            on_disconnect: None,
        }
    }

    /// Config pointing at the channel's public endpoint.
    pub fn for_channel<Ch: Channel>(keepalive_interval: Duration) -> Self {
        Self::new(Ch::ENDPOINT, keepalive_interval)
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn on_disconnect(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(DisconnectHook::new(hook));
        self
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.keepalive_interval.is_zero() {
            return Err(StreamError::Config(
                "keepalive_interval must be positive".to_string(),
            ));
        }
        if self.initial_backoff.is_zero() {
            return Err(StreamError::Config(
                "initial_backoff must be positive".to_string(),
            ));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(StreamError::Config(
                "max_backoff must not be below initial_backoff".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(StreamError::Config(
                "connect_timeout must be positive".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(StreamError::Config(
                "queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate and split the endpoint into what the connection task needs.
    pub fn connection_config(&self) -> Result<ConnectionConfig> {
        self.validate()?;

        let url = Url::parse(&self.endpoint)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(StreamError::Config(format!(
                "unsupported scheme {:?}, expected ws or wss",
                url.scheme()
            )));
        }
        // bare address for IPv6 literals; the handshake adds brackets back
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => {
                return Err(StreamError::Config(format!(
                    "endpoint {} has no host",
                    self.endpoint
                )));
            }
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| StreamError::Config(format!("endpoint {} has no port", self.endpoint)))?;
        let resource = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        Ok(ConnectionConfig {
            host,
            port,
            resource,
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
            keepalive_interval: self.keepalive_interval,
            connect_timeout: self.connect_timeout,
            queue_capacity: self.queue_capacity,
            on_disconnect: self.on_disconnect.clone(),
        })
    }
}

/// Resolved per-connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub resource: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub keepalive_interval: Duration,
    pub connect_timeout: Duration,
    pub queue_capacity: usize,
    pub on_disconnect: Option<DisconnectHook>,
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
