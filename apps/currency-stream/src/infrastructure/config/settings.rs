//! Service Configuration Settings
//!
//! Configuration types for the rate service, loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::application::services::{CachePolicy, FanoutConfig};

/// Bearer credential for the upstream source.
#[derive(Clone)]
pub struct UpstreamCredential {
    token: String,
}

impl UpstreamCredential {
    /// Wrap a token.
    #[must_use]
    pub const fn new(token: String) -> Self {
        Self { token }
    }

    /// Get the token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for UpstreamCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamCredential")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Default upstream fetch timeout. Stays below the default poll interval.
const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 4_000;

/// Upstream source settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Snapshot endpoint.
    pub url: String,
    /// Bearer credential.
    pub credential: UpstreamCredential,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Poll loop settings.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    /// Time between cycles.
    pub interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Copy)]
pub struct ServerSettings {
    /// Port for HTTP endpoints and the live channel.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// Cache backend settings.
#[derive(Clone)]
pub struct CacheSettings {
    /// Redis URL; `None` selects the in-memory backend.
    pub redis_url: Option<String>,
    /// TTL for snapshot-derived keys.
    pub snapshot_ttl: Duration,
    /// TTL for memoized bulk answers.
    pub bulk_memo_ttl: Duration,
    /// Maximum keys per multi-key fetch.
    pub chunk_size: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            snapshot_ttl: Duration::from_secs(300),
            bulk_memo_ttl: Duration::from_secs(120),
            chunk_size: 100,
        }
    }
}

impl CacheSettings {
    /// Cache store policy derived from these settings.
    #[must_use]
    pub const fn policy(&self) -> CachePolicy {
        CachePolicy {
            snapshot_ttl: self.snapshot_ttl,
            bulk_memo_ttl: self.bulk_memo_ttl,
            chunk_size: self.chunk_size,
        }
    }
}

impl std::fmt::Debug for CacheSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSettings")
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("snapshot_ttl", &self.snapshot_ttl)
            .field("bulk_memo_ttl", &self.bulk_memo_ttl)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

/// Live channel settings.
#[derive(Debug, Clone, Copy)]
pub struct LiveChannelSettings {
    /// Maximum codes in one subscribe call.
    pub max_codes_per_subscription: usize,
    /// Records per fan-out batch.
    pub fanout_batch_size: usize,
    /// Pause between fan-out batches.
    pub fanout_pause: Duration,
    /// Outbound frame queue per connection.
    pub connection_queue_capacity: usize,
    /// Capacity of the global frame channel.
    pub global_channel_capacity: usize,
}

impl Default for LiveChannelSettings {
    fn default() -> Self {
        Self {
            max_codes_per_subscription: 100,
            fanout_batch_size: 10,
            fanout_pause: Duration::from_millis(1),
            connection_queue_capacity: 256,
            global_channel_capacity: 64,
        }
    }
}

impl LiveChannelSettings {
    /// Fan-out pacing derived from these settings.
    #[must_use]
    pub const fn fanout(&self) -> FanoutConfig {
        FanoutConfig {
            batch_size: self.fanout_batch_size,
            pause: self.fanout_pause,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Upstream source.
    pub upstream: UpstreamSettings,
    /// Poll loop.
    pub poll: PollSettings,
    /// HTTP listener.
    pub server: ServerSettings,
    /// Cache backend.
    pub cache: CacheSettings,
    /// Live channel.
    pub live: LiveChannelSettings,
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or empty, or if
    /// the loaded values are inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("UPSTREAM_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("UPSTREAM_URL".to_string()))?;
        if url.trim().is_empty() {
            return Err(ConfigError::EmptyValue("UPSTREAM_URL".to_string()));
        }

        let token = lookup("UPSTREAM_TOKEN")
            .or_else(|| lookup("TOKEN"))
            .ok_or_else(|| ConfigError::MissingEnvVar("UPSTREAM_TOKEN".to_string()))?;
        if token.trim().is_empty() {
            return Err(ConfigError::EmptyValue("UPSTREAM_TOKEN".to_string()));
        }

        let upstream = UpstreamSettings {
            url,
            credential: UpstreamCredential::new(token),
            timeout: Duration::from_millis(parse_or(
                &lookup,
                "UPSTREAM_TIMEOUT_MS",
                DEFAULT_UPSTREAM_TIMEOUT_MS,
            )),
        };

        let poll = PollSettings {
            interval: Duration::from_secs(parse_or(
                &lookup,
                "POLL_INTERVAL_SECS",
                PollSettings::default().interval.as_secs(),
            )),
        };

        let server = ServerSettings {
            port: parse_or(&lookup, "PORT", ServerSettings::default().port),
        };

        let cache_defaults = CacheSettings::default();
        let cache = CacheSettings {
            redis_url: lookup("REDIS_URL").filter(|v| !v.trim().is_empty()),
            snapshot_ttl: Duration::from_secs(parse_or(
                &lookup,
                "CACHE_TTL_SECS",
                cache_defaults.snapshot_ttl.as_secs(),
            )),
            bulk_memo_ttl: Duration::from_secs(parse_or(
                &lookup,
                "BULK_MEMO_TTL_SECS",
                cache_defaults.bulk_memo_ttl.as_secs(),
            )),
            chunk_size: parse_or(&lookup, "CACHE_CHUNK_SIZE", cache_defaults.chunk_size),
        };

        let live_defaults = LiveChannelSettings::default();
        let live = LiveChannelSettings {
            max_codes_per_subscription: parse_or(
                &lookup,
                "MAX_CODES_PER_SUBSCRIPTION",
                live_defaults.max_codes_per_subscription,
            ),
            fanout_batch_size: parse_or(
                &lookup,
                "FANOUT_BATCH_SIZE",
                live_defaults.fanout_batch_size,
            ),
            fanout_pause: Duration::from_millis(parse_or(&lookup, "FANOUT_PAUSE_MS", 1)),
            connection_queue_capacity: parse_or(
                &lookup,
                "CONNECTION_QUEUE_CAPACITY",
                live_defaults.connection_queue_capacity,
            ),
            global_channel_capacity: parse_or(
                &lookup,
                "GLOBAL_CHANNEL_CAPACITY",
                live_defaults.global_channel_capacity,
            ),
        };

        let config = Self {
            upstream,
            poll,
            server,
            cache,
            live,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("POLL_INTERVAL_SECS", self.poll.interval.as_secs()),
            ("UPSTREAM_TIMEOUT_MS", duration_ms(self.upstream.timeout)),
            ("CACHE_TTL_SECS", self.cache.snapshot_ttl.as_secs()),
            ("BULK_MEMO_TTL_SECS", self.cache.bulk_memo_ttl.as_secs()),
            ("CACHE_CHUNK_SIZE", self.cache.chunk_size as u64),
            (
                "MAX_CODES_PER_SUBSCRIPTION",
                self.live.max_codes_per_subscription as u64,
            ),
            ("FANOUT_BATCH_SIZE", self.live.fanout_batch_size as u64),
            (
                "CONNECTION_QUEUE_CAPACITY",
                self.live.connection_queue_capacity as u64,
            ),
            (
                "GLOBAL_CHANNEL_CAPACITY",
                self.live.global_channel_capacity as u64,
            ),
        ];
        if let Some((key, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::InvalidValue {
                key: (*key).to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.upstream.timeout >= self.poll.interval {
            return Err(ConfigError::TimeoutNotBelowInterval {
                timeout_ms: duration_ms(self.upstream.timeout),
                interval_ms: duration_ms(self.poll.interval),
            });
        }

        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// The upstream timeout would let a fetch outlive its poll interval.
    #[error("upstream timeout ({timeout_ms}ms) must be shorter than the poll interval ({interval_ms}ms)")]
    TimeoutNotBelowInterval {
        /// Configured timeout.
        timeout_ms: u64,
        /// Configured interval.
        interval_ms: u64,
    },
    /// A value is out of range.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
