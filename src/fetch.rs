// src/fetch.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Live value lookups with bounded retries and a secondary-source fallback
//!
//! # Policy
//! 1. Query the primary source up to `max_attempts` times, pausing `delay`
//!    between attempts, for as long as the wall-clock `budget` allows
//! 2. Query the secondary source once
//! 3. Return the sentinel
//!
//! Empty, non-finite and negative values count as failures. No error
//! escapes `fetch_live_value`; every failure is logged and absorbed.

use serde_json::Value;
use std::time::{Duration, Instant};

use crate::constants::*;
use crate::error::FetchError;

/// A provider of live prices
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    fn fetch(&self, symbol: &str) -> Result<f64, FetchError>;
}

/// Anything that can answer a live lookup without failing the caller
pub trait LiveValueSource: Send + Sync {
    fn fetch_live_value(&self, symbol: &str) -> f64;
}

/// Retry schedule for the primary source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    /// Ceiling on time spent retrying the primary source
    pub budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_FETCH_ATTEMPTS,
            delay: DEFAULT_FETCH_DELAY,
            budget: DEFAULT_FETCH_BUDGET,
        }
    }
}

/// Primary source with retries, then a secondary source, then the sentinel
pub struct FallbackFetcher {
    primary: Box<dyn PriceSource>,
    secondary: Box<dyn PriceSource>,
    policy: RetryPolicy,
    sentinel: f64,
}

impl FallbackFetcher {
    pub fn new(
        primary: Box<dyn PriceSource>,
        secondary: Box<dyn PriceSource>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            primary,
            secondary,
            policy,
            sentinel: LIVE_VALUE_SENTINEL,
        }
    }

    pub fn with_sentinel(mut self, sentinel: f64) -> Self {
        self.sentinel = sentinel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn sentinel(&self) -> f64 {
        self.sentinel
    }

    fn query(source: &dyn PriceSource, symbol: &str) -> Result<f64, FetchError> {
        let value = source.fetch(symbol)?;
        if !value.is_finite() || value < 0.0 {
            return Err(FetchError::Invalid {
                source_name: source.name().to_string(),
                symbol: symbol.to_string(),
                value,
            });
        }
        Ok(round_cents(value))
    }
}

impl LiveValueSource for FallbackFetcher {
    fn fetch_live_value(&self, symbol: &str) -> f64 {
        let started = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match Self::query(self.primary.as_ref(), symbol) {
                Ok(value) => {
                    tracing::debug!(
                        "{} answered {} with {} on attempt {}",
                        self.primary.name(),
                        symbol,
                        value,
                        attempt
                    );
                    return value;
                }
                Err(e) => {
                    tracing::warn!(
                        "Attempt {}/{} for {} failed: {}",
                        attempt,
                        max_attempts,
                        symbol,
                        e
                    );
                }
            }

            if attempt == max_attempts {
                break;
            }
            if started.elapsed() + self.policy.delay > self.policy.budget {
                tracing::warn!(
                    "Retry budget of {:?} exhausted for {} after {} attempts",
                    self.policy.budget,
                    symbol,
                    attempt
                );
                break;
            }
            std::thread::sleep(self.policy.delay);
        }

        tracing::warn!(
            "{} failed for {}, switching to {}",
            self.primary.name(),
            symbol,
            self.secondary.name()
        );
        match Self::query(self.secondary.as_ref(), symbol) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("{} failed for {}: {}", self.secondary.name(), symbol, e);
                self.sentinel
            }
        }
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// =============================================================================
// HTTP JSON source
// =============================================================================

/// Price source backed by an HTTP endpoint returning JSON
///
/// `url_template` contains a `{symbol}` placeholder; `pointer` is an RFC 6901
/// JSON pointer to the price inside the response body. Numbers and numeric
/// strings are both accepted.
pub struct HttpJsonSource {
    name: String,
    url_template: String,
    pointer: String,
    client: reqwest::blocking::Client,
}

impl HttpJsonSource {
    pub fn new(
        name: impl Into<String>,
        url_template: impl Into<String>,
        pointer: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            name: name.into(),
            url_template: url_template.into(),
            pointer: pointer.into(),
            client,
        })
    }

    fn url_for(&self, symbol: &str) -> String {
        self.url_template.replace("{symbol}", symbol)
    }

    fn transport(&self, message: impl ToString) -> FetchError {
        FetchError::Transport {
            source_name: self.name.clone(),
            message: message.to_string(),
        }
    }
}

impl PriceSource for HttpJsonSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, symbol: &str) -> Result<f64, FetchError> {
        let url = self.url_for(symbol);
        tracing::trace!("Fetching {} from {}", symbol, url);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| self.transport(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.transport(format!("status {status} from {url}")));
        }

        let body: Value = response.json().map_err(|e| self.transport(e))?;
        extract_price(&body, &self.pointer).ok_or_else(|| FetchError::Empty {
            source_name: self.name.clone(),
            symbol: symbol.to_string(),
        })
    }
}

/// Read a price at `pointer`, accepting numbers or numeric strings
pub fn extract_price(body: &Value, pointer: &str) -> Option<f64> {
    match body.pointer(pointer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
