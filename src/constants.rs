// src/constants.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

/// Lower bound of the inter-arrival interval between emitted messages
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound of the inter-arrival interval between emitted messages
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(5);

/// Fixed pause after a failed iteration before rendering again
pub const DEFAULT_RECOVERY_DELAY: Duration = Duration::from_secs(5);

/// Largest absolute price move per random-walk step
pub const DEFAULT_MAX_STEP: f64 = 0.8;

/// Up-probability given to entities that were never registered
pub const DEFAULT_UP_PROBABILITY: f64 = 0.5;

/// Chance that a render pass re-draws an entity's up-probability
pub const DEFAULT_RESHUFFLE_PROBABILITY: f64 = 0.2;

/// Out-of-domain price reported when no live source answers
pub const LIVE_VALUE_SENTINEL: f64 = -0.1;

/// Primary live source attempts before falling back
pub const DEFAULT_FETCH_ATTEMPTS: u32 = 15;

/// Pause between primary live source attempts
pub const DEFAULT_FETCH_DELAY: Duration = Duration::from_secs(2);

/// Wall-clock ceiling for one live lookup across all attempts
pub const DEFAULT_FETCH_BUDGET: Duration = Duration::from_secs(30);

/// Per-request HTTP timeout for live sources
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest jitter accepted for local-time fields (one day)
pub const MAX_TIME_JITTER_SECS: f64 = 86_400.0;

/// Capacity of the queued sink's hand-off channel
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Topic used when neither the config file nor the environment names one
pub const DEFAULT_TOPIC: &str = "debug-tool-01";

/// Broker used when neither the config file nor the environment names one
pub const DEFAULT_BOOTSTRAP_SERVERS: &str = "localhost:9092";
