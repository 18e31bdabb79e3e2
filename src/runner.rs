// src/runner.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parallel emission loops
//!
//! Each loop gets its own worker in a dedicated rayon pool. Loops share
//! nothing but the distribution engine their templates were built with.

use parking_lot::Mutex;

use crate::emitter::{EmissionLoop, LoopStats};

/// Final counters of one loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub name: String,
    pub stats: LoopStats,
}

/// A set of loops run side by side
#[derive(Default)]
pub struct Runner {
    loops: Vec<EmissionLoop>,
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, emission: EmissionLoop) {
        self.loops.push(emission);
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Run every loop, `limit` iterations each, or forever when `None`
    ///
    /// Returns one summary per loop in the order they were added. With no
    /// limit this only returns if the pool cannot be built.
    pub fn run(self, limit: Option<u64>) -> Result<Vec<RunSummary>, rayon::ThreadPoolBuildError> {
        let num_threads = self.loops.len().max(1);
        tracing::info!(
            "Starting {} emission loop(s), limit={:?}",
            self.loops.len(),
            limit
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("eventgen-loop-{i}"))
            .build()?;

        let finished = Mutex::new(Vec::with_capacity(self.loops.len()));
        pool.scope(|s| {
            for (index, mut emission) in self.loops.into_iter().enumerate() {
                let finished = &finished;
                s.spawn(move |_| {
                    let stats = match limit {
                        Some(iterations) => emission.run_for(iterations),
                        None => emission.run(),
                    };
                    finished.lock().push((
                        index,
                        RunSummary {
                            name: emission.name().to_string(),
                            stats,
                        },
                    ));
                });
            }
        });

        let mut finished = finished.into_inner();
        finished.sort_by_key(|(index, _)| *index);
        Ok(finished.into_iter().map(|(_, summary)| summary).collect())
    }
}
