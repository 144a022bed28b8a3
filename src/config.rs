use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default per-call timeout for non-streaming requests
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client configuration for DriftQ brokers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Broker base URL (e.g. "http://localhost:8080")
    pub base_url: String,

    /// Default timeout applied to calls whose context has no deadline.
    /// Zero disables it.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,

    /// TCP connect timeout
    #[serde(with = "option_duration_ms")]
    pub connect_timeout: Option<Duration>,

    /// Retry configuration
    pub retry: RetryConfig,

    /// Trace propagation settings
    pub tracing: TracingConfig,

    /// User-Agent header, defaults to `driftq-rust/<version>`
    pub user_agent: Option<String>,

    /// Bearer token sent with every request
    pub auth_token: Option<String>,

    /// TLS configuration
    pub tls: Option<TlsConfig>,
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one; 1 disables retries
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,

    /// Upper bound for any single delay
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
}

/// Trace propagation configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Skip the trace layer entirely
    pub disable: bool,

    /// Open one `driftq.http` span per call
    pub start_spans: bool,
}

/// TLS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Additional trusted root in PEM form
    pub ca_cert_pem: Option<String>,

    /// Skip certificate verification (insecure, dev only)
    pub insecure_skip_verify: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: None,
            retry: RetryConfig::default(),
            tracing: TracingConfig::default(),
            user_agent: None,
            auth_token: None,
            tls: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    /// Disable retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Fill unusable values: zero attempts means a single attempt,
    /// zero delays fall back to the defaults.
    pub fn normalized(&self) -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: self.max_attempts.max(1),
            base_delay: if self.base_delay.is_zero() {
                defaults.base_delay
            } else {
                self.base_delay
            },
            max_delay: if self.max_delay.is_zero() {
                defaults.max_delay
            } else {
                self.max_delay
            },
        }
    }
}

impl ClientConfig {
    /// Create a configuration for the given broker URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ClientError::InvalidConfig(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: ClientConfig =
            toml::from_str(&content).map_err(|e| ClientError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the default timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set retry configuration
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set trace configuration
    pub fn with_tracing(mut self, tracing: TracingConfig) -> Self {
        self.tracing = tracing;
        self
    }

    /// Set the User-Agent header
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set authentication token
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set TLS configuration
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// User-Agent to send
    pub fn effective_user_agent(&self) -> String {
        match self.user_agent.as_deref().map(str::trim) {
            Some(ua) if !ua.is_empty() => ua.to_string(),
            _ => format!("driftq-rust/{}", crate::VERSION),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(ClientError::InvalidConfig(
                "base_url is required".to_string(),
            ));
        }

        url::Url::parse(self.base_url.trim())
            .map_err(|e| ClientError::InvalidConfig(format!("invalid base_url: {}", e)))?;

        if let Some(tls) = &self.tls {
            if tls.insecure_skip_verify && tls.ca_cert_pem.is_some() {
                return Err(ClientError::InvalidConfig(
                    "tls.ca_cert_pem has no effect with insecure_skip_verify".to_string(),
                ));
            }
        }

        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
