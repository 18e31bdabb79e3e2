// src/config.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runtime configuration
//!
//! Settings come from an optional TOML file with `[kafka]`, `[rate]`,
//! `[logging]` and `[live]` sections. Each key resolves to the file value
//! first, then its environment variable, then the built-in default.
//!
//! ```toml
//! [kafka]
//! bootstrap_servers = "broker-1:9093"
//! topic = "stocks"
//!
//! [rate]
//! min_interval_s = 0.5
//! max_interval_s = 2.0
//!
//! [live]
//! attempts = 5
//! ```

use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::Deserialize;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::constants::*;
use crate::emitter::RateConfig;
use crate::error::ConfigError;
use crate::fetch::{FallbackFetcher, HttpJsonSource, RetryPolicy};

const DEFAULT_REPLICATION_FACTOR: u32 = 1;
const DEFAULT_RETENTION_MS: u64 = 15_552_000_000;
const DEFAULT_FLUSH_TIMEOUT_S: f64 = 60.0;
const DEFAULT_LOG_RETENTION_DAYS: u32 = 7;

const DEFAULT_PRIMARY_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart/{symbol}";
const DEFAULT_SECONDARY_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart/{symbol}";
const DEFAULT_PRICE_POINTER: &str = "/chart/result/0/meta/regularMarketPrice";

// =============================================================================
// File layout
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    kafka: KafkaSection,
    rate: RateSection,
    logging: LoggingSection,
    live: LiveSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct KafkaSection {
    bootstrap_servers: Option<String>,
    user: Option<String>,
    password: Option<String>,
    cafile: Option<PathBuf>,
    ssl_check_hostname: Option<bool>,
    topic: Option<String>,
    topic_replication_factor: Option<u32>,
    topic_retention_ms: Option<u64>,
    flush_timeout_s: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RateSection {
    min_interval_s: Option<f64>,
    max_interval_s: Option<f64>,
    recovery_delay_s: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LoggingSection {
    file: Option<PathBuf>,
    retention_days: Option<u32>,
    debug: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LiveSection {
    attempts: Option<u32>,
    delay_s: Option<f64>,
    budget_s: Option<f64>,
    sentinel: Option<f64>,
    primary_url: Option<String>,
    primary_pointer: Option<String>,
    secondary_url: Option<String>,
    secondary_pointer: Option<String>,
}

// =============================================================================
// Resolved settings
// =============================================================================

/// Broker login
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Where and as whom messages are published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub bootstrap_servers: String,
    pub topic: String,
    pub credentials: Option<Credentials>,
}

#[derive(Clone, PartialEq)]
pub struct KafkaSettings {
    pub bootstrap_servers: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub cafile: Option<PathBuf>,
    pub ssl_check_hostname: bool,
    pub topic: String,
    pub topic_replication_factor: u32,
    pub topic_retention_ms: u64,
    pub flush_timeout: Duration,
}

impl fmt::Debug for KafkaSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaSettings")
            .field("bootstrap_servers", &self.bootstrap_servers)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("cafile", &self.cafile)
            .field("ssl_check_hostname", &self.ssl_check_hostname)
            .field("topic", &self.topic)
            .field("topic_replication_factor", &self.topic_replication_factor)
            .field("topic_retention_ms", &self.topic_retention_ms)
            .field("flush_timeout", &self.flush_timeout)
            .finish()
    }
}

impl KafkaSettings {
    /// Bootstrap, topic and credentials; credentials need both user and password
    pub fn endpoint(&self) -> BrokerEndpoint {
        let credentials = match (&self.user, &self.password) {
            (Some(user), Some(password)) => Some(Credentials {
                user: user.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        BrokerEndpoint {
            bootstrap_servers: self.bootstrap_servers.clone(),
            topic: self.topic.clone(),
            credentials,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub file: Option<PathBuf>,
    pub retention_days: u32,
    pub debug: bool,
}

impl LoggingSettings {
    /// Open today's log file for appending and prune files past retention
    ///
    /// Log files are named `<file>.<YYYY-MM-DD>`. Returns `None` when no file
    /// is configured.
    pub fn open_log_file(&self, today: NaiveDate) -> std::io::Result<Option<File>> {
        let Some(base) = &self.file else {
            return Ok(None);
        };
        if let Some(parent) = base.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let removed = prune_logs(base, today, self.retention_days)?;
        if removed > 0 {
            tracing::debug!("Removed {} expired log file(s)", removed);
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dated_log_path(base, today))?;
        Ok(Some(file))
    }
}

fn dated_log_path(base: &Path, day: NaiveDate) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{}", day.format("%Y-%m-%d")));
    PathBuf::from(name)
}

/// Delete `<base>.<date>` files older than `retention_days`
fn prune_logs(base: &Path, today: NaiveDate, retention_days: u32) -> std::io::Result<usize> {
    let Some(file_name) = base.file_name().and_then(|n| n.to_str()) else {
        return Ok(0);
    };
    let dir = match base.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent.to_path_buf(),
        None => PathBuf::from("."),
    };
    let cutoff = today - ChronoDuration::days(i64::from(retention_days));
    let prefix = format!("{file_name}.");

    let mut removed = 0;
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(date) = name
            .to_str()
            .and_then(|n| n.strip_prefix(&prefix))
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            continue;
        };
        if date < cutoff {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// One HTTP price endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceEndpoint {
    pub url_template: String,
    pub pointer: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveSettings {
    pub retry: RetryPolicy,
    pub sentinel: f64,
    pub primary: PriceEndpoint,
    pub secondary: PriceEndpoint,
}

impl LiveSettings {
    /// Build the fallback fetcher over the two configured endpoints
    pub fn fetcher(&self) -> anyhow::Result<FallbackFetcher> {
        let primary = HttpJsonSource::new(
            "primary",
            &self.primary.url_template,
            &self.primary.pointer,
        )?;
        let secondary = HttpJsonSource::new(
            "secondary",
            &self.secondary.url_template,
            &self.secondary.pointer,
        )?;
        Ok(
            FallbackFetcher::new(Box::new(primary), Box::new(secondary), self.retry)
                .with_sentinel(self.sentinel),
        )
    }
}

/// Fully resolved configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub kafka: KafkaSettings,
    pub rate: RateConfig,
    pub logging: LoggingSettings,
    pub live: LiveSettings,
}

impl AppConfig {
    /// Load from `path` (if any) against the process environment
    ///
    /// A path that does not exist yields defaults; one that cannot be read
    /// or parsed is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) if path.exists() => {
                let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            Some(path) => {
                tracing::warn!("Config file {} not found, using defaults", path.display());
                FileConfig::default()
            }
            None => FileConfig::default(),
        };
        Self::resolve(file, &|name: &str| std::env::var(name).ok())
    }

    /// Parse TOML text against an explicit environment lookup
    pub fn from_toml_str(
        text: &str,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let file = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::resolve(file, env)
    }

    fn resolve(file: FileConfig, env: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let FileConfig {
            kafka,
            rate,
            logging,
            live,
        } = file;

        let kafka = KafkaSettings {
            bootstrap_servers: pick(
                kafka.bootstrap_servers,
                env,
                "KAFKA_BOOTSTRAP_SERVERS",
                DEFAULT_BOOTSTRAP_SERVERS.to_string(),
            )?,
            user: pick_opt(kafka.user, env, "KAFKA_USER")?,
            password: pick_opt(kafka.password, env, "KAFKA_PASSWORD")?,
            cafile: pick_opt(kafka.cafile, env, "KAFKA_CA_CRT")?,
            ssl_check_hostname: pick(
                kafka.ssl_check_hostname,
                env,
                "KAFKA_SSL_CHECK_HOSTNAME",
                true,
            )?,
            topic: pick(kafka.topic, env, "KAFKA_TOPIC", DEFAULT_TOPIC.to_string())?,
            topic_replication_factor: pick(
                kafka.topic_replication_factor,
                env,
                "KAFKA_TOPIC_REPLICATION_FACTOR",
                DEFAULT_REPLICATION_FACTOR,
            )?,
            topic_retention_ms: pick(
                kafka.topic_retention_ms,
                env,
                "KAFKA_TOPIC_RETENTION_MS",
                DEFAULT_RETENTION_MS,
            )?,
            flush_timeout: seconds(
                "kafka.flush_timeout_s",
                pick(
                    kafka.flush_timeout_s,
                    env,
                    "KAFKA_FLUSH_TIMEOUT_S",
                    DEFAULT_FLUSH_TIMEOUT_S,
                )?,
            )?,
        };

        let rate = RateConfig {
            min_interval: seconds(
                "rate.min_interval_s",
                pick(
                    rate.min_interval_s,
                    env,
                    "EVENTGEN_MIN_INTERVAL_S",
                    DEFAULT_MIN_INTERVAL.as_secs_f64(),
                )?,
            )?,
            max_interval: seconds(
                "rate.max_interval_s",
                pick(
                    rate.max_interval_s,
                    env,
                    "EVENTGEN_MAX_INTERVAL_S",
                    DEFAULT_MAX_INTERVAL.as_secs_f64(),
                )?,
            )?,
            recovery_delay: seconds(
                "rate.recovery_delay_s",
                pick(
                    rate.recovery_delay_s,
                    env,
                    "EVENTGEN_RECOVERY_DELAY_S",
                    DEFAULT_RECOVERY_DELAY.as_secs_f64(),
                )?,
            )?,
        };
        rate.validate().map_err(|e| ConfigError::InvalidValue {
            key: "rate".to_string(),
            message: format!("min_interval_s must not exceed max_interval_s ({e})"),
        })?;

        let logging = LoggingSettings {
            file: pick_opt(logging.file, env, "EVENTGEN_LOG_FILE")?,
            retention_days: pick(
                logging.retention_days,
                env,
                "EVENTGEN_LOG_RETENTION_DAYS",
                DEFAULT_LOG_RETENTION_DAYS,
            )?,
            debug: pick(logging.debug, env, "EVENTGEN_DEBUG", false)?,
        };

        let sentinel = live.sentinel.unwrap_or(LIVE_VALUE_SENTINEL);
        if !sentinel.is_finite() {
            return Err(ConfigError::InvalidValue {
                key: "live.sentinel".to_string(),
                message: format!("{sentinel} is not finite"),
            });
        }
        let live = LiveSettings {
            retry: RetryPolicy {
                max_attempts: live.attempts.unwrap_or(DEFAULT_FETCH_ATTEMPTS),
                delay: match live.delay_s {
                    Some(s) => seconds("live.delay_s", s)?,
                    None => DEFAULT_FETCH_DELAY,
                },
                budget: match live.budget_s {
                    Some(s) => seconds("live.budget_s", s)?,
                    None => DEFAULT_FETCH_BUDGET,
                },
            },
            sentinel,
            primary: PriceEndpoint {
                url_template: live
                    .primary_url
                    .unwrap_or_else(|| DEFAULT_PRIMARY_URL.to_string()),
                pointer: live
                    .primary_pointer
                    .unwrap_or_else(|| DEFAULT_PRICE_POINTER.to_string()),
            },
            secondary: PriceEndpoint {
                url_template: live
                    .secondary_url
                    .unwrap_or_else(|| DEFAULT_SECONDARY_URL.to_string()),
                pointer: live
                    .secondary_pointer
                    .unwrap_or_else(|| DEFAULT_PRICE_POINTER.to_string()),
            },
        };

        Ok(Self {
            kafka,
            rate,
            logging,
            live,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let kafka = KafkaSettings {
            bootstrap_servers: DEFAULT_BOOTSTRAP_SERVERS.to_string(),
            user: None,
            password: None,
            cafile: None,
            ssl_check_hostname: true,
            topic: DEFAULT_TOPIC.to_string(),
            topic_replication_factor: DEFAULT_REPLICATION_FACTOR,
            topic_retention_ms: DEFAULT_RETENTION_MS,
            flush_timeout: Duration::from_secs_f64(DEFAULT_FLUSH_TIMEOUT_S),
        };
        let live = LiveSettings {
            retry: RetryPolicy::default(),
            sentinel: LIVE_VALUE_SENTINEL,
            primary: PriceEndpoint {
                url_template: DEFAULT_PRIMARY_URL.to_string(),
                pointer: DEFAULT_PRICE_POINTER.to_string(),
            },
            secondary: PriceEndpoint {
                url_template: DEFAULT_SECONDARY_URL.to_string(),
                pointer: DEFAULT_PRICE_POINTER.to_string(),
            },
        };
        Self {
            kafka,
            rate: RateConfig::default(),
            logging: LoggingSettings {
                file: None,
                retention_days: DEFAULT_LOG_RETENTION_DAYS,
                debug: false,
            },
            live,
        }
    }
}

/// File value, else parsed environment variable, else default
fn pick<T>(
    file: Option<T>,
    env: &dyn Fn(&str) -> Option<String>,
    var: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    Ok(pick_opt(file, env, var)?.unwrap_or(default))
}

fn pick_opt<T>(
    file: Option<T>,
    env: &dyn Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    if file.is_some() {
        return Ok(file);
    }
    match env(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: var.to_string(),
                message: e.to_string(),
            }),
        None => Ok(None),
    }
}

fn seconds(key: &str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{secs}: {e}"),
    })
}
