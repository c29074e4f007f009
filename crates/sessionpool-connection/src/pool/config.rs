//! Pool configuration types

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sessionpool_core::{PoolError, Result};

/// What `acquire` does when every session is busy and the pool is at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GetMode {
    /// Block until a session is released
    #[default]
    Wait,
    /// Fail immediately
    NoWait,
    /// Block for at most `wait_timeout`, then fail
    TimedWait,
}

/// Keys a pool configuration file may set, besides deprecated aliases
pub const CONFIG_KEYS: &[&str] = &[
    "min",
    "max",
    "increment",
    "homogeneous",
    "getmode",
    "wait_timeout_ms",
    "timeout_ms",
    "max_lifetime_session_ms",
    "stmtcachesize",
    "ping_interval_ms",
    "max_sessions_per_shard",
];

/// Deprecated configuration keys and the keys that replaced them
pub const DEPRECATED_ALIASES: &[(&str, &str)] = &[
    ("stmtcachesize", "stmt_cache_size"),
    ("max_lifetime_session_ms", "max_lifetime_connection_ms"),
    ("wait_timeout_ms", "wait_timeout"),
];

/// Configuration for a session pool
///
/// Controls pool sizing, how callers wait for capacity, and how long idle
/// sessions are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Sessions opened when the pool is created
    min: usize,
    /// Upper bound on open sessions
    max: usize,
    /// Sessions opened at once when the pool has to grow
    increment: usize,
    /// Whether every session uses the pool's credentials
    homogeneous: bool,
    getmode: GetMode,
    /// Milliseconds to wait under `GetMode::TimedWait`
    #[serde(alias = "wait_timeout")]
    wait_timeout_ms: u64,
    /// Milliseconds an idle session is kept beyond `min` (0 = forever)
    timeout_ms: u64,
    /// Milliseconds a session may live before it is closed (0 = forever)
    #[serde(alias = "max_lifetime_connection_ms")]
    max_lifetime_session_ms: u64,
    /// Statement cache size applied to each session
    #[serde(alias = "stmt_cache_size")]
    stmtcachesize: usize,
    /// Milliseconds a session may sit idle before it is pinged on reuse
    /// (`None` = never ping, written as a negative number in files)
    #[serde(with = "ping_interval_serde")]
    ping_interval_ms: Option<u64>,
    /// Forwarded to the session collaborator
    max_sessions_per_shard: u32,
}

impl PoolConfig {
    /// Create a new pool configuration with the given min and max sizes.
    ///
    /// Bounds are checked by [`PoolConfig::validate`], which the pool runs
    /// on creation and on every reconfigure.
    pub fn new(min: usize, max: usize) -> Self {
        Self {
            min,
            max,
            increment: 1,
            homogeneous: true,
            getmode: GetMode::Wait,
            wait_timeout_ms: 0,
            timeout_ms: 0,
            max_lifetime_session_ms: 0,
            stmtcachesize: 20,
            ping_interval_ms: Some(60_000),
            max_sessions_per_shard: 0,
        }
    }

    pub fn with_increment(mut self, increment: usize) -> Self {
        self.increment = increment;
        self
    }

    pub fn with_homogeneous(mut self, homogeneous: bool) -> Self {
        self.homogeneous = homogeneous;
        self
    }

    pub fn with_getmode(mut self, getmode: GetMode) -> Self {
        self.getmode = getmode;
        self
    }

    pub fn with_wait_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.wait_timeout_ms = timeout_ms;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_lifetime_session_ms(mut self, lifetime_ms: u64) -> Self {
        self.max_lifetime_session_ms = lifetime_ms;
        self
    }

    pub fn with_stmtcachesize(mut self, size: usize) -> Self {
        self.stmtcachesize = size;
        self
    }

    pub fn with_ping_interval_ms(mut self, interval_ms: Option<u64>) -> Self {
        self.ping_interval_ms = interval_ms;
        self
    }

    pub fn with_max_sessions_per_shard(mut self, max: u32) -> Self {
        self.max_sessions_per_shard = max;
        self
    }

    /// Check the size bounds and get mode settings
    pub fn validate(&self) -> Result<()> {
        if self.max == 0 {
            return Err(PoolError::Configuration(format!(
                "max must be greater than 0, got {}",
                self.max
            )));
        }
        if self.min > self.max {
            return Err(PoolError::Configuration(format!(
                "min ({}) cannot exceed max ({})",
                self.min, self.max
            )));
        }
        if self.increment == 0 {
            return Err(PoolError::Configuration(
                "increment must be at least 1, got 0".into(),
            ));
        }
        if self.getmode == GetMode::TimedWait && self.wait_timeout_ms == 0 {
            return Err(PoolError::Configuration(
                "wait_timeout must be greater than 0 when getmode is timed_wait".into(),
            ));
        }
        Ok(())
    }

    /// Parse a TOML document.
    ///
    /// A document that sets both a key and its deprecated alias is
    /// rejected, as is one that fails [`PoolConfig::validate`].
    ///
    /// ```
    /// use sessionpool_connection::pool::{GetMode, PoolConfig};
    ///
    /// let config = PoolConfig::from_toml_str("min = 2\nmax = 8\ngetmode = \"no_wait\"").unwrap();
    /// assert_eq!(config.max(), 8);
    /// assert_eq!(config.getmode(), GetMode::NoWait);
    /// ```
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let table: toml::Table = input.parse()?;
        for key in table.keys() {
            let known = CONFIG_KEYS.contains(&key.as_str())
                || DEPRECATED_ALIASES.iter().any(|(_, alias)| *alias == key.as_str());
            if !known {
                return Err(PoolError::Configuration(format!(
                    "unknown pool configuration key '{}'",
                    key
                )));
            }
        }
        for (current, deprecated) in DEPRECATED_ALIASES {
            if table.contains_key(*current) && table.contains_key(*deprecated) {
                return Err(PoolError::Configuration(format!(
                    "'{}' and its deprecated alias '{}' cannot both be set",
                    current, deprecated
                )));
            }
        }

        let config: PoolConfig = toml::Value::Table(table).try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML pool configuration file
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "loading pool configuration");
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn increment(&self) -> usize {
        self.increment
    }

    pub fn homogeneous(&self) -> bool {
        self.homogeneous
    }

    pub fn getmode(&self) -> GetMode {
        self.getmode
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Idle timeout as a Duration, `None` when idle sessions are kept
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Maximum session lifetime, `None` when sessions live forever
    pub fn max_lifetime_session(&self) -> Option<Duration> {
        (self.max_lifetime_session_ms > 0)
            .then(|| Duration::from_millis(self.max_lifetime_session_ms))
    }

    pub fn stmtcachesize(&self) -> usize {
        self.stmtcachesize
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        self.ping_interval_ms.map(Duration::from_millis)
    }

    pub fn max_sessions_per_shard(&self) -> u32 {
        self.max_sessions_per_shard
    }
}

/// `ping_interval_ms` on disk: a negative number (or null) disables pinging
mod ping_interval_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(ms) => serializer.serialize_u64(*ms),
            None => serializer.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        let raw = Option::<i64>::deserialize(deserializer)?;
        Ok(raw.and_then(|ms| u64::try_from(ms).ok()))
    }
}

impl Default for PoolConfig {
    /// Defaults:
    /// - min: 1, max: 2, increment: 1
    /// - homogeneous, getmode wait
    /// - no idle timeout, no lifetime limit
    /// - stmtcachesize: 20
    /// - ping_interval: 60 seconds
    fn default() -> Self {
        Self::new(1, 2)
    }
}

/// A partial update to a live pool's configuration.
///
/// Only fields that were set are changed; everything else keeps its
/// current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolReconfigure {
    min: Option<usize>,
    max: Option<usize>,
    increment: Option<usize>,
    getmode: Option<GetMode>,
    wait_timeout_ms: Option<u64>,
    timeout_ms: Option<u64>,
    max_lifetime_session_ms: Option<u64>,
    stmtcachesize: Option<usize>,
    ping_interval_ms: Option<Option<u64>>,
    max_sessions_per_shard: Option<u32>,
}

impl PoolReconfigure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min(mut self, min: usize) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: usize) -> Self {
        self.max = Some(max);
        self
    }

    pub fn increment(mut self, increment: usize) -> Self {
        self.increment = Some(increment);
        self
    }

    pub fn getmode(mut self, getmode: GetMode) -> Self {
        self.getmode = Some(getmode);
        self
    }

    pub fn wait_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.wait_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn max_lifetime_session_ms(mut self, lifetime_ms: u64) -> Self {
        self.max_lifetime_session_ms = Some(lifetime_ms);
        self
    }

    pub fn stmtcachesize(mut self, size: usize) -> Self {
        self.stmtcachesize = Some(size);
        self
    }

    pub fn ping_interval_ms(mut self, interval_ms: Option<u64>) -> Self {
        self.ping_interval_ms = Some(interval_ms);
        self
    }

    pub fn max_sessions_per_shard(mut self, max: u32) -> Self {
        self.max_sessions_per_shard = Some(max);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge these changes over `base`
    pub fn apply(&self, base: &PoolConfig) -> PoolConfig {
        let mut merged = base.clone();
        if let Some(min) = self.min {
            merged.min = min;
        }
        if let Some(max) = self.max {
            merged.max = max;
        }
        if let Some(increment) = self.increment {
            merged.increment = increment;
        }
        if let Some(getmode) = self.getmode {
            merged.getmode = getmode;
        }
        if let Some(wait_timeout_ms) = self.wait_timeout_ms {
            merged.wait_timeout_ms = wait_timeout_ms;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            merged.timeout_ms = timeout_ms;
        }
        if let Some(lifetime_ms) = self.max_lifetime_session_ms {
            merged.max_lifetime_session_ms = lifetime_ms;
        }
        if let Some(size) = self.stmtcachesize {
            merged.stmtcachesize = size;
        }
        if let Some(interval) = self.ping_interval_ms {
            merged.ping_interval_ms = interval;
        }
        if let Some(max) = self.max_sessions_per_shard {
            merged.max_sessions_per_shard = max;
        }
        merged
    }
}
