// src/bin/eventgen.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! eventgen - periodically emit synthetic domain events
//!
//! ```text
//! eventgen --family stock --family metric --count 100 --sink stdout
//! eventgen --family live-stock --config-file eventgen.toml --debug
//! ```

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use eventgen::config::AppConfig;
use eventgen::constants::{DEFAULT_QUEUE_CAPACITY, DEFAULT_RESHUFFLE_PROBABILITY};
use eventgen::distribution::DistributionEngine;
use eventgen::emitter::EmissionLoop;
use eventgen::families::{self, Family, FamilyOptions, RiskProfile};
use eventgen::fetch::LiveValueSource;
use eventgen::runner::Runner;
use eventgen::sink::{JsonLinesSink, LogSink, QueuedSink, Sink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SinkKind {
    /// Log each message at info level
    Log,
    /// Write `{"topic", "key", "message"}` JSON lines to stdout
    Stdout,
}

#[derive(Parser, Debug)]
#[command(name = "eventgen", version, about = "Synthetic event generator")]
struct Args {
    /// Message family to generate; repeat for several parallel loops
    #[arg(short, long = "family", value_enum, default_value = "stock")]
    families: Vec<Family>,

    /// TOML configuration file
    #[arg(long, env = "EVENTGEN_CONFIG_FILE")]
    config_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Append logs to this file (dated, pruned after the retention period)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Messages per family before exiting; runs forever when omitted
    #[arg(long)]
    count: Option<u64>,

    /// Seed for reproducible output; loop `i` uses `seed + i`
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_enum, default_value = "log")]
    sink: SinkKind,

    /// Hand messages to the sink through a bounded queue of this size
    #[arg(long, num_args = 0..=1, default_missing_value = "1024")]
    queue: Option<usize>,

    /// Topic override; defaults to the configured topic
    #[arg(long)]
    topic: Option<String>,

    /// Highest host id for metric-advanced
    #[arg(long, default_value_t = 100_000)]
    hosts: i64,

    /// Highest cpu id for metric-advanced
    #[arg(long, default_value_t = 30)]
    cpus: i64,

    /// Bet sizing profile
    #[arg(long, value_enum, default_value = "casual")]
    risk_profile: RiskProfile,

    /// Chance per stock render that the drawn ticker's up-probability is re-drawn
    #[arg(long, default_value_t = DEFAULT_RESHUFFLE_PROBABILITY, value_parser = parse_probability)]
    reshuffle_probability: f64,
}

fn parse_probability(raw: &str) -> Result<f64, String> {
    let p: f64 = raw.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(format!("{p} is outside [0, 1]"))
    }
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut config = AppConfig::load(args.config_file.as_deref())
        .context("Failed to load configuration")?;
    if let Some(path) = args.log_file.clone() {
        config.logging.file = Some(path);
    }
    config.logging.debug |= args.debug;

    let log_file = config
        .logging
        .open_log_file(chrono::Local::now().date_naive())
        .context("Failed to open log file")?;
    init_tracing(config.logging.debug, log_file);
    if let Some(path) = args.config_file.as_deref().filter(|p| !p.exists()) {
        tracing::warn!("Config file {} not found, using defaults", path.display());
    }

    let endpoint = config.kafka.endpoint();
    let topic = args.topic.clone().unwrap_or(endpoint.topic.clone());
    tracing::info!(
        "eventgen {} targeting {} (topic '{}', authenticated: {})",
        env!("CARGO_PKG_VERSION"),
        endpoint.bootstrap_servers,
        topic,
        endpoint.credentials.is_some()
    );
    tracing::debug!("Resolved configuration: {:?}", config);

    let engine = Arc::new(DistributionEngine::new());
    let live_source: Option<Arc<dyn LiveValueSource>> =
        if args.families.iter().any(Family::needs_live_source) {
            let fetcher = config
                .live
                .fetcher()
                .context("Failed to build live price fetcher")?;
            Some(Arc::new(fetcher) as Arc<dyn LiveValueSource>)
        } else {
            None
        };

    let base: Arc<dyn Sink> = match args.sink {
        SinkKind::Log => Arc::new(LogSink),
        SinkKind::Stdout => Arc::new(JsonLinesSink::stdout()),
    };
    let sink: Arc<dyn Sink> = match args.queue {
        Some(capacity) => {
            let capacity = if capacity == 0 {
                DEFAULT_QUEUE_CAPACITY
            } else {
                capacity
            };
            Arc::new(QueuedSink::new(base, capacity).context("Failed to start sink queue")?)
        }
        None => base,
    };

    let options = FamilyOptions {
        hosts: args.hosts,
        cpus: args.cpus,
        risk_profile: args.risk_profile,
        reshuffle_probability: args.reshuffle_probability,
    };

    let mut runner = Runner::new();
    for (i, family) in args.families.iter().copied().enumerate() {
        let template = families::build(family, Arc::clone(&engine), live_source.clone(), &options)
            .with_context(|| format!("Invalid '{family}' template"))?;
        let mut emission = EmissionLoop::new(
            Arc::new(template),
            Arc::clone(&sink),
            topic.clone(),
            config.rate,
        )
        .context("Invalid rate configuration")?;
        if let Some(seed) = args.seed {
            emission = emission.with_seed(seed.wrapping_add(i as u64));
        }
        runner.add(emission);
    }

    let summaries = runner
        .run(args.count)
        .context("Failed to start emission workers")?;
    for summary in summaries {
        tracing::info!(
            "{}: {} emitted, {} failures",
            summary.name,
            summary.stats.emitted,
            summary.stats.failures
        );
    }
    Ok(())
}

fn init_tracing(debug: bool, log_file: Option<File>) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(file) => subscriber
            .with_ansi(false)
            .with_writer(std::io::stderr.and(Arc::new(file)))
            .init(),
        None => subscriber.with_writer(std::io::stderr).init(),
    }
}
