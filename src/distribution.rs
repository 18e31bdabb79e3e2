// src/distribution.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Distribution engine: samplers over value pools and per-entity state
//!
//! Pools are immutable after construction. The only mutable state is the
//! entity store, where every entity sits behind its own lock so that walks on
//! distinct entities never contend and concurrent walks on the same entity
//! serialize.

use parking_lot::{Mutex, RwLock};
use rand::distr::weighted::{Error as WeightError, WeightedIndex};
use rand::distr::{Distribution, Uniform};
use rand::seq::IndexedRandom;
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::constants::*;
use crate::error::SamplingError;

// =============================================================================
// Free samplers
// =============================================================================

/// Uniform choice from `values`
pub fn sample_uniform<'a, T, R: Rng + ?Sized>(
    values: &'a [T],
    rng: &mut R,
) -> Result<&'a T, SamplingError> {
    values.choose(rng).ok_or(SamplingError::EmptyPool)
}

/// Weighted choice from `values`
///
/// Weights need not sum to 1; they are normalized by the sampler. Equal
/// weights resolve in pool order because the cumulative table is built in
/// that order.
pub fn sample_weighted<'a, T, R: Rng + ?Sized>(
    values: &'a [T],
    weights: &[f64],
    rng: &mut R,
) -> Result<&'a T, SamplingError> {
    let index = build_weighted_index(values.len(), weights)?;
    Ok(&values[index.sample(rng)])
}

/// Uniform continuous value in `[low, high]`
pub fn sample_numeric<R: Rng + ?Sized>(
    low: f64,
    high: f64,
    rng: &mut R,
) -> Result<f64, SamplingError> {
    Ok(uniform_between(low, high)?.sample(rng))
}

/// Uniform integer in `[low, high]`
pub fn sample_int<R: Rng + ?Sized>(low: i64, high: i64, rng: &mut R) -> Result<i64, SamplingError> {
    if low > high {
        return Err(SamplingError::InvalidRange {
            low: low as f64,
            high: high as f64,
        });
    }
    Ok(rng.random_range(low..=high))
}

/// Finite bounds, `low <= high`, and a span the sampler can scale
pub(crate) fn validate_range(low: f64, high: f64) -> Result<(), SamplingError> {
    uniform_between(low, high).map(|_| ())
}

fn uniform_between(low: f64, high: f64) -> Result<Uniform<f64>, SamplingError> {
    if !low.is_finite() || !high.is_finite() || low > high {
        return Err(SamplingError::InvalidRange { low, high });
    }
    Uniform::new_inclusive(low, high).map_err(|_| SamplingError::InvalidRange { low, high })
}

pub(crate) fn validate_probability(p: f64) -> Result<(), SamplingError> {
    if !(0.0..=1.0).contains(&p) {
        return Err(SamplingError::InvalidProbability(p));
    }
    Ok(())
}

fn build_weighted_index(len: usize, weights: &[f64]) -> Result<WeightedIndex<f64>, SamplingError> {
    if len == 0 {
        return Err(SamplingError::EmptyPool);
    }
    if weights.len() != len {
        return Err(SamplingError::WeightMismatch {
            values: len,
            weights: weights.len(),
        });
    }
    if let Some((index, &weight)) = weights
        .iter()
        .enumerate()
        .find(|(_, w)| !w.is_finite() || **w < 0.0)
    {
        return Err(SamplingError::InvalidWeight { index, weight });
    }
    let total: f64 = weights.iter().sum();
    if !total.is_finite() {
        return Err(SamplingError::WeightOverflow);
    }
    if total <= 0.0 {
        return Err(SamplingError::ZeroWeights);
    }
    WeightedIndex::new(weights.iter().copied()).map_err(|e| match e {
        WeightError::Overflow => SamplingError::WeightOverflow,
        WeightError::InsufficientNonZero => SamplingError::ZeroWeights,
        _ => SamplingError::InvalidWeight {
            index: 0,
            weight: weights.first().copied().unwrap_or_default(),
        },
    })
}

// =============================================================================
// Value pools
// =============================================================================

/// Candidate values for a field, optionally weighted
#[derive(Debug, Clone)]
pub struct ValuePool {
    values: Vec<Value>,
    weights: Option<(Vec<f64>, WeightedIndex<f64>)>,
}

impl ValuePool {
    /// Pool sampled uniformly
    pub fn uniform<I, V>(values: I) -> Result<Self, SamplingError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Err(SamplingError::EmptyPool);
        }
        Ok(Self {
            values,
            weights: None,
        })
    }

    /// Pool sampled with the given parallel weights
    pub fn weighted<I, V>(values: I, weights: Vec<f64>) -> Result<Self, SamplingError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        let index = build_weighted_index(values.len(), &weights)?;
        Ok(Self {
            values,
            weights: Some((weights, index)),
        })
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn weights(&self) -> Option<&[f64]> {
        self.weights.as_ref().map(|(w, _)| w.as_slice())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Draw one value, honouring weights when present
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> &Value {
        match &self.weights {
            Some((_, index)) => &self.values[index.sample(rng)],
            // Non-empty by construction
            None => &self.values[rng.random_range(0..self.values.len())],
        }
    }
}

// =============================================================================
// Entity state
// =============================================================================

/// Initial state for a stateful entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntitySeed {
    pub initial_value: f64,
    pub up_probability: f64,
}

impl Default for EntitySeed {
    fn default() -> Self {
        Self {
            initial_value: 0.0,
            up_probability: DEFAULT_UP_PROBABILITY,
        }
    }
}

/// Mutable record for one entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityState {
    /// Current value of the random walk
    pub value: f64,
    /// Probability that the next step moves up
    pub up_probability: f64,
    /// Last value handed out by `next_sequence`
    pub sequence: u64,
}

impl From<EntitySeed> for EntityState {
    fn from(seed: EntitySeed) -> Self {
        Self {
            value: seed.initial_value,
            up_probability: seed.up_probability,
            sequence: 0,
        }
    }
}

/// Engine-wide tunables
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Largest absolute move per `step_entity`
    pub max_step: f64,
    /// State for entities referenced without registration
    pub default_seed: EntitySeed,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_step: DEFAULT_MAX_STEP,
            default_seed: EntitySeed::default(),
        }
    }
}

/// Owner of all per-entity state
///
/// Shared between templates (and threads) through `Arc`. Entities are created
/// lazily on first reference, from a registered seed when one exists.
#[derive(Debug)]
pub struct DistributionEngine {
    config: EngineConfig,
    seeds: RwLock<HashMap<String, EntitySeed>>,
    entities: RwLock<HashMap<String, Arc<Mutex<EntityState>>>>,
}

impl Default for DistributionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DistributionEngine {
    /// Engine with default tunables
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            seeds: RwLock::new(HashMap::new()),
            entities: RwLock::new(HashMap::new()),
        }
    }

    /// Engine with validated tunables
    pub fn with_config(config: EngineConfig) -> Result<Self, SamplingError> {
        validate_range(0.0, config.max_step)?;
        validate_probability(config.default_seed.up_probability)?;
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Declare the initial state for an entity
    ///
    /// Takes effect when the entity is first referenced; an entity that
    /// already has live state keeps it.
    pub fn register_entity(&self, entity_id: &str, seed: EntitySeed) -> Result<(), SamplingError> {
        validate_probability(seed.up_probability)?;
        if !seed.initial_value.is_finite() {
            return Err(SamplingError::InvalidRange {
                low: seed.initial_value,
                high: seed.initial_value,
            });
        }
        self.seeds.write().insert(entity_id.to_string(), seed);
        Ok(())
    }

    /// Copy of an entity's state, if it has been referenced
    pub fn entity_snapshot(&self, entity_id: &str) -> Option<EntityState> {
        self.entities
            .read()
            .get(entity_id)
            .map(|entity| *entity.lock())
    }

    /// Number of entities with live state
    pub fn entity_count(&self) -> usize {
        self.entities.read().len()
    }

    /// Advance the entity's random walk by one signed step
    ///
    /// The sign is a Bernoulli draw with the entity's up-probability and the
    /// magnitude is uniform in `[0, max_step]`. No clamping is applied.
    pub fn step_entity<R: Rng + ?Sized>(&self, entity_id: &str, rng: &mut R) -> f64 {
        let entity = self.entity(entity_id);
        let mut state = entity.lock();

        let direction = if rng.random_bool(state.up_probability) {
            1.0
        } else {
            -1.0
        };
        let magnitude = rng.random_range(0.0..=self.config.max_step);
        state.value += direction * magnitude;

        tracing::trace!(
            "step_entity: id={}, direction={}, magnitude={:.4}, value={:.4}",
            entity_id,
            direction,
            magnitude,
            state.value
        );
        state.value
    }

    /// Replace the entity's up-probability with a fresh uniform draw
    pub fn reshuffle_bias<R: Rng + ?Sized>(&self, entity_id: &str, rng: &mut R) -> f64 {
        let entity = self.entity(entity_id);
        let mut state = entity.lock();
        state.up_probability = rng.random::<f64>();
        tracing::trace!(
            "reshuffle_bias: id={}, up_probability={:.4}",
            entity_id,
            state.up_probability
        );
        state.up_probability
    }

    /// Next value of the entity's counter, starting at 1
    pub fn next_sequence(&self, entity_id: &str) -> u64 {
        let entity = self.entity(entity_id);
        let mut state = entity.lock();
        state.sequence += 1;
        state.sequence
    }

    fn entity(&self, entity_id: &str) -> Arc<Mutex<EntityState>> {
        if let Some(entity) = self.entities.read().get(entity_id) {
            return Arc::clone(entity);
        }

        let seed = self
            .seeds
            .read()
            .get(entity_id)
            .copied()
            .unwrap_or(self.config.default_seed);

        let mut entities = self.entities.write();
        let entity = entities.entry(entity_id.to_string()).or_insert_with(|| {
            tracing::debug!(
                "Creating entity state: id={}, value={}, up_probability={}",
                entity_id,
                seed.initial_value,
                seed.up_probability
            );
            Arc::new(Mutex::new(EntityState::from(seed)))
        });
        Arc::clone(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    const DRAWS: usize = 10_000;

    fn rng() -> Xoshiro256PlusPlus {
        Xoshiro256PlusPlus::seed_from_u64(42)
    }

    #[test]
    fn test_uniform_returns_members_with_even_frequency() {
        let mut rng = rng();
        let pool = ["a", "b", "c", "d"];
        let mut counts = HashMap::new();

        for _ in 0..DRAWS {
            let v = sample_uniform(&pool, &mut rng).unwrap();
            *counts.entry(*v).or_insert(0usize) += 1;
        }

        assert_eq!(counts.len(), pool.len());
        for (value, count) in counts {
            let freq = count as f64 / DRAWS as f64;
            assert!(
                (freq - 0.25).abs() < 0.03,
                "{} drawn with frequency {}",
                value,
                freq
            );
        }
    }

    #[test]
    fn test_uniform_empty_pool() {
        let mut rng = rng();
        let pool: [u32; 0] = [];
        assert_eq!(
            sample_uniform(&pool, &mut rng),
            Err(SamplingError::EmptyPool)
        );
    }

    #[test]
    fn test_weighted_frequency_converges() {
        let mut rng = rng();
        let pool = ["view", "cart", "buy"];
        let weights = [5.0, 3.0, 2.0];
        let mut counts = [0usize; 3];

        for _ in 0..DRAWS {
            let v = sample_weighted(&pool, &weights, &mut rng).unwrap();
            let idx = pool.iter().position(|p| p == v).unwrap();
            counts[idx] += 1;
        }

        for (i, count) in counts.iter().enumerate() {
            let expected = weights[i] / 10.0;
            let freq = *count as f64 / DRAWS as f64;
            assert!((freq - expected).abs() < 0.03, "index {} freq {}", i, freq);
        }
    }

    #[test]
    fn test_weighted_zero_weight_never_drawn() {
        let mut rng = rng();
        let pool = ["never", "always"];
        for _ in 0..1000 {
            let v = sample_weighted(&pool, &[0.0, 1.0], &mut rng).unwrap();
            assert_eq!(*v, "always");
        }
    }

    #[test]
    fn test_weighted_validation() {
        let mut rng = rng();
        let pool = [1, 2, 3];

        assert_eq!(
            sample_weighted(&pool, &[1.0, 1.0], &mut rng),
            Err(SamplingError::WeightMismatch {
                values: 3,
                weights: 2
            })
        );
        assert!(matches!(
            sample_weighted(&pool, &[1.0, -1.0, 1.0], &mut rng),
            Err(SamplingError::InvalidWeight { index: 1, .. })
        ));
        assert_eq!(
            sample_weighted(&pool, &[0.0, 0.0, 0.0], &mut rng),
            Err(SamplingError::ZeroWeights)
        );
    }

    #[test]
    fn test_numeric_range() {
        let mut rng = rng();
        for _ in 0..1000 {
            let v = sample_numeric(70.0, 100.0, &mut rng).unwrap();
            assert!((70.0..=100.0).contains(&v));
        }
        assert_eq!(sample_numeric(5.0, 5.0, &mut rng), Ok(5.0));
        assert_eq!(
            sample_numeric(2.0, 1.0, &mut rng),
            Err(SamplingError::InvalidRange {
                low: 2.0,
                high: 1.0
            })
        );
        assert!(sample_int(3, 1, &mut rng).is_err());
    }

    #[test]
    fn test_numeric_range_with_overflowing_span() {
        let mut rng = rng();
        assert_eq!(
            sample_numeric(-f64::MAX, f64::MAX, &mut rng),
            Err(SamplingError::InvalidRange {
                low: -f64::MAX,
                high: f64::MAX
            })
        );
        // Wide spans the sampler can scale still work
        let v = sample_numeric(-f64::MAX / 4.0, f64::MAX / 4.0, &mut rng).unwrap();
        assert!(v.is_finite());
    }

    #[test]
    fn test_weight_sum_overflow() {
        let mut rng = rng();
        assert_eq!(
            sample_weighted(&["a", "b"], &[f64::MAX, f64::MAX], &mut rng),
            Err(SamplingError::WeightOverflow)
        );
        assert!(matches!(
            ValuePool::weighted(["a", "b"], vec![f64::MAX, f64::MAX]),
            Err(SamplingError::WeightOverflow)
        ));
    }

    #[test]
    fn test_pool_construction() {
        assert!(matches!(
            ValuePool::uniform(Vec::<String>::new()),
            Err(SamplingError::EmptyPool)
        ));
        assert!(matches!(
            ValuePool::weighted(["a", "b"], vec![1.0]),
            Err(SamplingError::WeightMismatch { .. })
        ));

        let pool = ValuePool::weighted(["a", "b"], vec![0.0, 2.0]).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.weights(), Some(&[0.0, 2.0][..]));

        let mut rng = rng();
        for _ in 0..100 {
            assert_eq!(pool.sample(&mut rng), &Value::from("b"));
        }
    }

    #[test]
    fn test_step_entity_always_up_is_monotonic() {
        let engine = DistributionEngine::new();
        engine
            .register_entity(
                "Deja Brew",
                EntitySeed {
                    initial_value: 10.0,
                    up_probability: 1.0,
                },
            )
            .unwrap();

        let mut rng = rng();
        let mut previous = 10.0;
        for _ in 0..500 {
            let value = engine.step_entity("Deja Brew", &mut rng);
            assert!(value >= previous);
            assert!(value - previous <= DEFAULT_MAX_STEP);
            previous = value;
        }
    }

    #[test]
    fn test_step_entity_may_go_negative() {
        let engine = DistributionEngine::new();
        engine
            .register_entity(
                "falling",
                EntitySeed {
                    initial_value: 0.1,
                    up_probability: 0.0,
                },
            )
            .unwrap();

        let mut rng = rng();
        let mut value = 0.0;
        for _ in 0..50 {
            value = engine.step_entity("falling", &mut rng);
        }
        assert!(value < 0.0);
    }

    #[test]
    fn test_unregistered_entity_uses_defaults() {
        let engine = DistributionEngine::new();
        assert!(engine.entity_snapshot("ghost").is_none());

        engine.next_sequence("ghost");
        let state = engine.entity_snapshot("ghost").unwrap();
        assert_eq!(state.value, 0.0);
        assert_eq!(state.up_probability, DEFAULT_UP_PROBABILITY);
        assert_eq!(state.sequence, 1);
    }

    #[test]
    fn test_reshuffle_bias() {
        let engine = DistributionEngine::new();
        let mut rng = rng();

        let draws: Vec<f64> = (0..10)
            .map(|_| engine.reshuffle_bias("Pita Pan", &mut rng))
            .collect();

        for p in &draws {
            assert!((0.0..=1.0).contains(p));
        }
        assert!(draws.windows(2).any(|w| w[0] != w[1]));
        assert_eq!(
            engine.entity_snapshot("Pita Pan").unwrap().up_probability,
            draws[9]
        );
    }

    #[test]
    fn test_register_rejects_bad_probability() {
        let engine = DistributionEngine::new();
        let seed = EntitySeed {
            initial_value: 1.0,
            up_probability: 1.5,
        };
        assert_eq!(
            engine.register_entity("x", seed),
            Err(SamplingError::InvalidProbability(1.5))
        );
        assert!(DistributionEngine::with_config(EngineConfig {
            max_step: -1.0,
            ..EngineConfig::default()
        })
        .is_err());
    }

    #[test]
    fn test_distinct_entities_do_not_interfere() {
        let engine = Arc::new(DistributionEngine::new());
        engine
            .register_entity(
                "up",
                EntitySeed {
                    initial_value: 100.0,
                    up_probability: 1.0,
                },
            )
            .unwrap();
        engine
            .register_entity(
                "down",
                EntitySeed {
                    initial_value: 100.0,
                    up_probability: 0.0,
                },
            )
            .unwrap();

        let handles: Vec<_> = [("up", 1u64), ("down", 2u64)]
            .into_iter()
            .map(|(id, seed)| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
                    for _ in 0..1000 {
                        engine.step_entity(id, &mut rng);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(engine.entity_snapshot("up").unwrap().value >= 100.0);
        assert!(engine.entity_snapshot("down").unwrap().value <= 100.0);
        assert_eq!(engine.entity_count(), 2);
    }

    #[test]
    fn test_same_entity_updates_are_serialized() {
        let engine = Arc::new(DistributionEngine::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        engine.next_sequence("orders");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(engine.entity_snapshot("orders").unwrap().sequence, 8000);
    }
}
