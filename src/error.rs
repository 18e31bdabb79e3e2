// src/error.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy
//!
//! Construction-time errors (`ConfigError`, `SamplingError`, `TemplateError`)
//! are fatal at startup. Per-iteration errors (`RenderError`, `PublishError`)
//! are contained by the emission loop. `FetchError` never leaves the
//! fallback-fetch adapter.

use std::path::PathBuf;

/// Invalid pool, weight or range definition
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SamplingError {
    #[error("value pool has no candidates")]
    EmptyPool,

    #[error("pool has {values} values but {weights} weights")]
    WeightMismatch { values: usize, weights: usize },

    #[error("invalid weight at index {index}: {weight}")]
    InvalidWeight { index: usize, weight: f64 },

    #[error("weights sum to zero")]
    ZeroWeights,

    #[error("weights overflow when summed")]
    WeightOverflow,

    #[error("invalid range: low {low} > high {high}")]
    InvalidRange { low: f64, high: f64 },

    #[error("probability {0} outside [0, 1]")]
    InvalidProbability(f64),
}

/// Structural problem in a template definition
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateError {
    #[error("duplicate field '{0}'")]
    DuplicateField(String),

    #[error("field '{field}' references '{reference}', which is not rendered before it")]
    UnknownReference { field: String, reference: String },

    #[error("key '{key}' points at '{path}', which the message does not contain")]
    InvalidKeyPath { key: String, path: String },

    #[error("field '{field}': {source}")]
    Sampling {
        field: String,
        #[source]
        source: SamplingError,
    },

    #[error("field '{field}': invalid time format '{format}'")]
    InvalidFormat { field: String, format: String },

    #[error("field '{0}' needs a live value source but none is configured")]
    MissingLiveSource(String),
}

/// Failure while rendering one message
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("field '{field}': {source}")]
    Sampling {
        field: String,
        #[source]
        source: SamplingError,
    },

    #[error("field '{field}' expected a string entity id, found {found}")]
    EntityId { field: String, found: String },

    #[error("key '{key}' missing from rendered message at '{path}'")]
    MissingKeyField { key: String, path: String },

    #[error("field '{field}' references '{path}', which is absent")]
    MissingReference { field: String, path: String },

    #[error("field '{field}': shifted time is out of range")]
    TimeOutOfRange { field: String },
}

/// Transient failure of a live-data source
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{source_name} returned no value for {symbol}")]
    Empty { source_name: String, symbol: String },

    #[error("{source_name} returned invalid value {value} for {symbol}")]
    Invalid {
        source_name: String,
        symbol: String,
        value: f64,
    },

    #[error("{source_name} request failed: {message}")]
    Transport {
        source_name: String,
        message: String,
    },
}

/// Sink failure
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write message: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },

    #[error("sink is closed")]
    Closed,

    #[error("{0}")]
    Rejected(String),
}

/// Malformed or unreadable configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Failure of one emission loop iteration
#[derive(Debug, thiserror::Error)]
pub enum IterationError {
    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("iteration panicked: {0}")]
    Panicked(String),
}
