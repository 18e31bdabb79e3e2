// src/lib.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synthetic event generation with pluggable distributions and a bounded-rate emission loop
//!
//! This library provides:
//! - Uniform, weighted and numeric samplers plus per-entity random walks
//! - Declarative event templates rendering `(Message, Key)` pairs
//! - Built-in families: stock, live stock, metric, bet, pizza, user behaviour
//! - Live price lookups with retries, a secondary source and a sentinel
//! - Emission loops that survive any per-iteration failure, run in parallel

// Core modules
pub mod constants;
pub mod distribution;
pub mod error;
pub mod message;
pub mod template;

// Families and live data
pub mod families;
pub mod fetch;

// Emission
pub mod emitter;
pub mod runner;
pub mod sink;

pub mod config;

// Re-export main API
pub use config::{AppConfig, BrokerEndpoint};
pub use distribution::{DistributionEngine, EntitySeed, ValuePool};
pub use emitter::{EmissionLoop, LoopStats, RateConfig};
pub use error::{
    ConfigError, FetchError, IterationError, PublishError, RenderError, SamplingError,
    TemplateError,
};
pub use families::{Family, FamilyOptions, RiskProfile};
pub use fetch::{FallbackFetcher, LiveValueSource, PriceSource, RetryPolicy};
pub use message::{Key, Message};
pub use runner::{RunSummary, Runner};
pub use sink::{Ack, JsonLinesSink, LogSink, QueuedSink, Sink};
pub use template::{EventSource, EventTemplate, FieldSpec, TemplateBuilder};
