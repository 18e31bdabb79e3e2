// src/emitter.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded-rate emission loop
//!
//! ```text
//!        ┌──────────────────────────────────────────┐
//!        ▼                                          │
//!    RENDER ──ok──▶ EMIT ──ok──▶ SLEEP(uniform[min, max])
//!        │            │
//!        └──err───────┴──▶ RECOVER ──▶ SLEEP(recovery_delay) ──▶ RENDER
//! ```
//!
//! A failed iteration, including one that panics, is logged, counted and
//! followed by the recovery delay; it never ends the loop.

use rand::{Rng, RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::constants::*;
use crate::error::{IterationError, SamplingError};
use crate::sink::{Ack, Sink};
use crate::template::EventSource;

/// Inter-arrival and recovery timing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub recovery_delay: Duration,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            recovery_delay: DEFAULT_RECOVERY_DELAY,
        }
    }
}

impl RateConfig {
    /// No pauses at all; for bounded runs and tests
    pub fn immediate() -> Self {
        Self {
            min_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            recovery_delay: Duration::ZERO,
        }
    }

    pub fn validate(&self) -> Result<(), SamplingError> {
        if self.min_interval > self.max_interval {
            return Err(SamplingError::InvalidRange {
                low: self.min_interval.as_secs_f64(),
                high: self.max_interval.as_secs_f64(),
            });
        }
        Ok(())
    }

    /// Draw the pause before the next render
    pub fn next_interval<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min_interval == self.max_interval {
            return self.min_interval;
        }
        let secs =
            rng.random_range(self.min_interval.as_secs_f64()..=self.max_interval.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Counters for one loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub iterations: u64,
    pub emitted: u64,
    pub failures: u64,
}

/// Result of one RENDER → EMIT pass
#[derive(Debug)]
pub enum Outcome {
    Emitted(Ack),
    Recovered(IterationError),
}

/// Drives one template into one sink
pub struct EmissionLoop {
    source: Arc<dyn EventSource>,
    sink: Arc<dyn Sink>,
    topic: String,
    rate: RateConfig,
    rng: Xoshiro256PlusPlus,
    stats: LoopStats,
}

impl EmissionLoop {
    pub fn new(
        source: Arc<dyn EventSource>,
        sink: Arc<dyn Sink>,
        topic: impl Into<String>,
        rate: RateConfig,
    ) -> Result<Self, SamplingError> {
        rate.validate()?;
        let seed = generate_call_entropy();
        tracing::info!(
            "Creating emission loop for '{}': interval=[{:?}, {:?}], recovery={:?}",
            source.name(),
            rate.min_interval,
            rate.max_interval,
            rate.recovery_delay
        );
        Ok(Self {
            source,
            sink,
            topic: topic.into(),
            rate,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            stats: LoopStats::default(),
        })
    }

    /// Reseed the loop's RNG for reproducible output
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        self
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// One RENDER → EMIT pass; returns the outcome and the pause to take next
    ///
    /// A panic raised by the template or the sink is caught and treated as a
    /// failed iteration.
    pub fn step(&mut self) -> (Outcome, Duration) {
        self.stats.iterations += 1;
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.render_and_emit()))
            .unwrap_or_else(|payload| Err(IterationError::Panicked(panic_message(&*payload))));
        match result {
            Ok(ack) => {
                self.stats.emitted += 1;
                tracing::debug!(
                    "'{}' emitted {} bytes to {}",
                    self.source.name(),
                    ack.bytes,
                    ack.topic
                );
                let pause = self.rate.next_interval(&mut self.rng);
                (Outcome::Emitted(ack), pause)
            }
            Err(e) => {
                self.stats.failures += 1;
                tracing::error!(
                    critical = true,
                    template = %self.source.name(),
                    "Critical failure in message generation loop: {}",
                    e
                );
                (Outcome::Recovered(e), self.rate.recovery_delay)
            }
        }
    }

    fn render_and_emit(&mut self) -> Result<Ack, IterationError> {
        let rng: &mut dyn RngCore = &mut self.rng;
        let (message, key) = self.source.render(rng)?;
        let ack = self.sink.publish(&self.topic, &key, &message)?;
        Ok(ack)
    }

    fn iterate(&mut self) {
        let (_, pause) = self.step();
        if !pause.is_zero() {
            std::thread::sleep(pause);
        }
    }

    /// Run a fixed number of iterations, sleeping as configured
    pub fn run_for(&mut self, iterations: u64) -> LoopStats {
        for _ in 0..iterations {
            self.iterate();
        }
        tracing::info!(
            "'{}' finished: {} emitted, {} failures",
            self.source.name(),
            self.stats.emitted,
            self.stats.failures
        );
        self.stats
    }

    /// Run until the process is terminated
    pub fn run(&mut self) -> ! {
        tracing::info!("Starting emission loop for '{}'", self.source.name());
        loop {
            self.iterate();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Per-loop entropy from time + urandom
fn generate_call_entropy() -> u64 {
    let time_entropy = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    let urandom_entropy: u64 = {
        let mut rng = rand::rng();
        rng.next_u64()
    };

    time_entropy.wrapping_add(urandom_entropy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PublishError, RenderError};
    use crate::message::{Key, Message};
    use crate::sink::JsonLinesSink;
    use crate::template::{EventTemplate, FieldSpec};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn metric_template() -> Arc<dyn EventSource> {
        Arc::new(
            EventTemplate::builder("metric")
                .field("hostname", FieldSpec::uniform(["doc", "grumpy"]))
                .field("usage", FieldSpec::rounded(70.0, 100.0, 2))
                .key("hostname", "hostname")
                .build()
                .unwrap(),
        )
    }

    struct RejectingSink;

    impl Sink for RejectingSink {
        fn publish(&self, _: &str, _: &Key, _: &Message) -> Result<Ack, PublishError> {
            Err(PublishError::Rejected("broker unavailable".into()))
        }
    }

    struct PanickingSink;

    impl Sink for PanickingSink {
        fn publish(&self, _: &str, _: &Key, _: &Message) -> Result<Ack, PublishError> {
            panic!("client bug")
        }
    }

    /// Fails every other render
    struct FlakySource {
        inner: Arc<dyn EventSource>,
        calls: AtomicU64,
    }

    impl EventSource for FlakySource {
        fn name(&self) -> &str {
            "flaky"
        }

        fn render(&self, rng: &mut dyn RngCore) -> Result<(Message, Key), RenderError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                return Err(RenderError::MissingReference {
                    field: "usage".into(),
                    path: "hostname".into(),
                });
            }
            self.inner.render(rng)
        }
    }

    #[test]
    fn test_rate_config_validation_and_draws() {
        let bad = RateConfig {
            min_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(1),
            ..RateConfig::default()
        };
        assert!(bad.validate().is_err());
        assert!(EmissionLoop::new(metric_template(), Arc::new(RejectingSink), "t", bad).is_err());

        let rate = RateConfig::default();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        for _ in 0..1000 {
            let pause = rate.next_interval(&mut rng);
            assert!(pause >= DEFAULT_MIN_INTERVAL && pause <= DEFAULT_MAX_INTERVAL);
        }
        assert_eq!(RateConfig::immediate().next_interval(&mut rng), Duration::ZERO);
    }

    #[test]
    fn test_loop_survives_failing_sink() {
        let mut emission =
            EmissionLoop::new(metric_template(), Arc::new(RejectingSink), "t", RateConfig::immediate())
                .unwrap();

        let stats = emission.run_for(150);
        assert_eq!(stats.iterations, 150);
        assert_eq!(stats.failures, 150);
        assert_eq!(stats.emitted, 0);
    }

    #[test]
    fn test_loop_survives_panicking_sink() {
        let mut emission = EmissionLoop::new(
            metric_template(),
            Arc::new(PanickingSink),
            "t",
            RateConfig::immediate(),
        )
        .unwrap();

        let (outcome, _) = emission.step();
        match outcome {
            Outcome::Recovered(IterationError::Panicked(message)) => {
                assert_eq!(message, "client bug")
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let stats = emission.run_for(120);
        assert_eq!(stats.iterations, 121);
        assert_eq!(stats.failures, 121);
        assert_eq!(stats.emitted, 0);
    }

    #[test]
    fn test_failed_iteration_uses_recovery_delay() {
        let rate = RateConfig {
            recovery_delay: Duration::from_secs(5),
            ..RateConfig::default()
        };
        let mut emission =
            EmissionLoop::new(metric_template(), Arc::new(RejectingSink), "t", rate).unwrap();

        let (outcome, pause) = emission.step();
        assert!(matches!(
            outcome,
            Outcome::Recovered(IterationError::Publish(_))
        ));
        assert_eq!(pause, Duration::from_secs(5));
    }

    #[test]
    fn test_render_failures_are_contained() {
        let source = Arc::new(FlakySource {
            inner: metric_template(),
            calls: AtomicU64::new(0),
        });
        let sink = Arc::new(JsonLinesSink::new(Vec::new()));
        let mut emission =
            EmissionLoop::new(source, sink, "metrics", RateConfig::immediate())
                .unwrap()
                .with_seed(4);

        let (first, _) = emission.step();
        assert!(matches!(first, Outcome::Recovered(IterationError::Render(_))));
        let (second, pause) = emission.step();
        assert!(matches!(second, Outcome::Emitted(_)));
        assert_eq!(pause, Duration::ZERO);

        let stats = emission.run_for(10);
        assert_eq!(stats.iterations, 12);
        assert_eq!(stats.emitted, 6);
        assert_eq!(stats.failures, 6);
    }

    #[test]
    fn test_seeded_loops_are_reproducible() {
        let run = |seed| {
            let sink = Arc::new(JsonLinesSink::new(Vec::new()));
            let mut emission = EmissionLoop::new(
                metric_template(),
                Arc::clone(&sink) as Arc<dyn Sink>,
                "metrics",
                RateConfig::immediate(),
            )
            .unwrap()
            .with_seed(seed);
            emission.run_for(5);
            drop(emission);
            Arc::try_unwrap(sink).ok().unwrap().into_inner()
        };

        let strip = |bytes: Vec<u8>| -> Vec<serde_json::Value> {
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["message"].clone())
                .collect()
        };
        assert_eq!(strip(run(77)), strip(run(77)));
    }
}
