// src/template.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Declarative event templates
//!
//! A template is an ordered list of field bindings plus a list of key
//! bindings. Rendering walks the bindings left to right; a binding may read
//! siblings rendered before it, never after. Key bindings copy values out of
//! the finished message, so a key can only ever contain message fields.
//!
//! ```text
//! TemplateBuilder ──build()──▶ EventTemplate ──render(rng)──▶ (Message, Key)
//!                                   │
//!                                   ├─ Arc<DistributionEngine>   (entity walks, counters)
//!                                   └─ Arc<dyn LiveValueSource>  (live lookups)
//! ```

use chrono::format::{Item, StrftimeItems};
use chrono::{Local, TimeDelta, Utc};
use rand::{Rng, RngCore};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

use crate::constants::MAX_TIME_JITTER_SECS;
use crate::distribution::{
    sample_int, sample_numeric, validate_probability, validate_range, DistributionEngine,
    ValuePool,
};
use crate::error::{RenderError, SamplingError, TemplateError};
use crate::fetch::LiveValueSource;
use crate::message::{lookup_path, Key, Message};

/// Anything that renders one message family
pub trait EventSource: Send + Sync {
    fn name(&self) -> &str;

    fn render(&self, rng: &mut dyn RngCore) -> Result<(Message, Key), RenderError>;
}

// =============================================================================
// Field specifications
// =============================================================================

/// How one field is produced
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSpec {
    /// Uniform choice from a pool
    Uniform(Vec<Value>),
    /// Weighted choice from a pool
    Weighted { values: Vec<Value>, weights: Vec<f64> },
    /// Uniform float in `[low, high]`, optionally rounded
    Numeric {
        low: f64,
        high: f64,
        decimals: Option<u32>,
    },
    /// Uniform integer in `[low, high]`
    Integer { low: i64, high: i64 },
    /// `prefix` followed by a uniform integer in `[low, high]`
    Labelled { prefix: String, low: i64, high: i64 },
    /// Wall-clock time in epoch milliseconds
    TimestampMillis { offset_ms: i64 },
    /// Local wall-clock time rendered with a strftime format, shifted by a
    /// uniform jitter in `[-jitter_secs, jitter_secs]`
    LocalTime { format: String, jitter_secs: f64 },
    /// Next random-walk value of the entity named by a sibling field
    EntityStep {
        entity_field: String,
        reshuffle_probability: f64,
    },
    /// Live value for the symbol named by a sibling field
    LiveValue { symbol_field: String },
    /// Next counter value of a fixed entity
    Sequence { entity: String },
    /// Copy of a sibling value (dot path)
    Copy { path: String },
    /// `then` when the sibling equals `equals`, otherwise null
    When {
        field: String,
        equals: Value,
        then: Box<FieldSpec>,
    },
    /// Nested object with its own bindings
    Record(Vec<(String, FieldSpec)>),
    /// Array of `element`, length uniform in `[min, max]`
    Repeat {
        min: usize,
        max: usize,
        element: Box<FieldSpec>,
    },
    Constant(Value),
}

impl FieldSpec {
    pub fn uniform<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Uniform(values.into_iter().map(Into::into).collect())
    }

    pub fn weighted<I, V>(values: I, weights: Vec<f64>) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Weighted {
            values: values.into_iter().map(Into::into).collect(),
            weights,
        }
    }

    pub fn numeric(low: f64, high: f64) -> Self {
        Self::Numeric {
            low,
            high,
            decimals: None,
        }
    }

    pub fn rounded(low: f64, high: f64, decimals: u32) -> Self {
        Self::Numeric {
            low,
            high,
            decimals: Some(decimals),
        }
    }

    pub fn timestamp_millis() -> Self {
        Self::TimestampMillis { offset_ms: 0 }
    }

    pub fn local_time(format: impl Into<String>) -> Self {
        Self::LocalTime {
            format: format.into(),
            jitter_secs: 0.0,
        }
    }

    pub fn entity_step(entity_field: impl Into<String>, reshuffle_probability: f64) -> Self {
        Self::EntityStep {
            entity_field: entity_field.into(),
            reshuffle_probability,
        }
    }

    pub fn live_value(symbol_field: impl Into<String>) -> Self {
        Self::LiveValue {
            symbol_field: symbol_field.into(),
        }
    }

    pub fn copy(path: impl Into<String>) -> Self {
        Self::Copy { path: path.into() }
    }

    pub fn when(field: impl Into<String>, equals: impl Into<Value>, then: FieldSpec) -> Self {
        Self::When {
            field: field.into(),
            equals: equals.into(),
            then: Box::new(then),
        }
    }

    pub fn record<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldSpec)>,
        S: Into<String>,
    {
        Self::Record(fields.into_iter().map(|(n, s)| (n.into(), s)).collect())
    }

    pub fn repeat(min: usize, max: usize, element: FieldSpec) -> Self {
        Self::Repeat {
            min,
            max,
            element: Box::new(element),
        }
    }
}

// =============================================================================
// Compiled generators
// =============================================================================

#[derive(Debug)]
enum Generator {
    Pool(ValuePool),
    Numeric {
        low: f64,
        high: f64,
        decimals: Option<u32>,
    },
    Integer {
        low: i64,
        high: i64,
    },
    Labelled {
        prefix: String,
        low: i64,
        high: i64,
    },
    TimestampMillis {
        offset_ms: i64,
    },
    LocalTime {
        format: String,
        jitter_secs: f64,
    },
    EntityStep {
        entity_field: String,
        reshuffle_probability: f64,
    },
    LiveValue {
        symbol_field: String,
    },
    Sequence {
        entity: String,
    },
    Copy {
        path: String,
    },
    When {
        field: String,
        equals: Value,
        then: Box<Generator>,
    },
    Record(Vec<Binding>),
    Repeat {
        min: usize,
        max: usize,
        element: Box<Generator>,
    },
    Constant(Value),
}

#[derive(Debug)]
struct Binding {
    name: String,
    generator: Generator,
}

#[derive(Debug, Clone)]
struct KeyBinding {
    name: String,
    path: String,
}

/// Names already rendered in the scope being compiled
struct Scope<'a> {
    rendered: &'a HashSet<String>,
    has_live_source: bool,
}

impl Scope<'_> {
    fn require(&self, field: &str, path: &str) -> Result<(), TemplateError> {
        let head = path.split('.').next().unwrap_or_default();
        if self.rendered.contains(head) {
            Ok(())
        } else {
            Err(TemplateError::UnknownReference {
                field: field.to_string(),
                reference: path.to_string(),
            })
        }
    }
}

fn compile_bindings(
    fields: Vec<(String, FieldSpec)>,
    has_live_source: bool,
) -> Result<Vec<Binding>, TemplateError> {
    let mut rendered = HashSet::new();
    let mut bindings = Vec::with_capacity(fields.len());

    for (name, spec) in fields {
        if rendered.contains(&name) {
            return Err(TemplateError::DuplicateField(name));
        }
        let scope = Scope {
            rendered: &rendered,
            has_live_source,
        };
        let generator = compile(&name, spec, &scope)?;
        rendered.insert(name.clone());
        bindings.push(Binding { name, generator });
    }

    Ok(bindings)
}

fn compile(field: &str, spec: FieldSpec, scope: &Scope<'_>) -> Result<Generator, TemplateError> {
    let sampling = |source: SamplingError| TemplateError::Sampling {
        field: field.to_string(),
        source,
    };

    let generator = match spec {
        FieldSpec::Uniform(values) => Generator::Pool(ValuePool::uniform(values).map_err(sampling)?),
        FieldSpec::Weighted { values, weights } => {
            Generator::Pool(ValuePool::weighted(values, weights).map_err(sampling)?)
        }
        FieldSpec::Numeric {
            low,
            high,
            decimals,
        } => {
            validate_range(low, high).map_err(sampling)?;
            Generator::Numeric {
                low,
                high,
                decimals,
            }
        }
        FieldSpec::Integer { low, high } => {
            validate_int_range(low, high).map_err(sampling)?;
            Generator::Integer { low, high }
        }
        FieldSpec::Labelled { prefix, low, high } => {
            validate_int_range(low, high).map_err(sampling)?;
            Generator::Labelled { prefix, low, high }
        }
        FieldSpec::TimestampMillis { offset_ms } => Generator::TimestampMillis { offset_ms },
        FieldSpec::LocalTime {
            format,
            jitter_secs,
        } => {
            if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
                return Err(TemplateError::InvalidFormat {
                    field: field.to_string(),
                    format,
                });
            }
            validate_range(-jitter_secs, jitter_secs).map_err(sampling)?;
            if jitter_secs > MAX_TIME_JITTER_SECS {
                return Err(sampling(SamplingError::InvalidRange {
                    low: -jitter_secs,
                    high: jitter_secs,
                }));
            }
            Generator::LocalTime {
                format,
                jitter_secs,
            }
        }
        FieldSpec::EntityStep {
            entity_field,
            reshuffle_probability,
        } => {
            scope.require(field, &entity_field)?;
            validate_probability(reshuffle_probability).map_err(sampling)?;
            Generator::EntityStep {
                entity_field,
                reshuffle_probability,
            }
        }
        FieldSpec::LiveValue { symbol_field } => {
            scope.require(field, &symbol_field)?;
            if !scope.has_live_source {
                return Err(TemplateError::MissingLiveSource(field.to_string()));
            }
            Generator::LiveValue { symbol_field }
        }
        FieldSpec::Sequence { entity } => Generator::Sequence { entity },
        FieldSpec::Copy { path } => {
            scope.require(field, &path)?;
            Generator::Copy { path }
        }
        FieldSpec::When {
            field: other,
            equals,
            then,
        } => {
            scope.require(field, &other)?;
            Generator::When {
                field: other,
                equals,
                then: Box::new(compile(field, *then, scope)?),
            }
        }
        FieldSpec::Record(fields) => {
            Generator::Record(compile_bindings(fields, scope.has_live_source)?)
        }
        FieldSpec::Repeat { min, max, element } => {
            if min > max {
                return Err(sampling(SamplingError::InvalidRange {
                    low: min as f64,
                    high: max as f64,
                }));
            }
            Generator::Repeat {
                min,
                max,
                element: Box::new(compile(field, *element, scope)?),
            }
        }
        FieldSpec::Constant(value) => Generator::Constant(value),
    };

    Ok(generator)
}

fn validate_int_range(low: i64, high: i64) -> Result<(), SamplingError> {
    if low > high {
        return Err(SamplingError::InvalidRange {
            low: low as f64,
            high: high as f64,
        });
    }
    Ok(())
}

// =============================================================================
// Templates
// =============================================================================

/// Collects bindings for an [`EventTemplate`]
pub struct TemplateBuilder {
    name: String,
    fields: Vec<(String, FieldSpec)>,
    keys: Vec<KeyBinding>,
    engine: Option<Arc<DistributionEngine>>,
    live_source: Option<Arc<dyn LiveValueSource>>,
}

impl TemplateBuilder {
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.push((name.into(), spec));
        self
    }

    /// Copy the message value at `path` into the key under `name`
    pub fn key(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.keys.push(KeyBinding {
            name: name.into(),
            path: path.into(),
        });
        self
    }

    pub fn engine(mut self, engine: Arc<DistributionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn live_source(mut self, source: Arc<dyn LiveValueSource>) -> Self {
        self.live_source = Some(source);
        self
    }

    /// Validate every binding and freeze the template
    pub fn build(self) -> Result<EventTemplate, TemplateError> {
        let bindings = compile_bindings(self.fields, self.live_source.is_some())?;

        let top_level: HashSet<&str> = bindings.iter().map(|b| b.name.as_str()).collect();
        let mut key_names = HashSet::new();
        for key in &self.keys {
            let head = key.path.split('.').next().unwrap_or_default();
            if !top_level.contains(head) {
                return Err(TemplateError::InvalidKeyPath {
                    key: key.name.clone(),
                    path: key.path.clone(),
                });
            }
            if !key_names.insert(key.name.as_str()) {
                return Err(TemplateError::DuplicateField(key.name.clone()));
            }
        }

        tracing::debug!(
            "Built template '{}': {} fields, {} key fields",
            self.name,
            bindings.len(),
            self.keys.len()
        );

        Ok(EventTemplate {
            name: self.name,
            bindings,
            keys: self.keys,
            engine: self.engine.unwrap_or_default(),
            live_source: self.live_source,
        })
    }
}

/// An immutable message shape bound to a distribution engine
pub struct EventTemplate {
    name: String,
    bindings: Vec<Binding>,
    keys: Vec<KeyBinding>,
    engine: Arc<DistributionEngine>,
    live_source: Option<Arc<dyn LiveValueSource>>,
}

impl std::fmt::Debug for EventTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTemplate")
            .field("name", &self.name)
            .field("fields", &self.field_names().collect::<Vec<_>>())
            .field("keys", &self.keys)
            .finish()
    }
}

impl EventTemplate {
    pub fn builder(name: impl Into<String>) -> TemplateBuilder {
        TemplateBuilder {
            name: name.into(),
            fields: Vec::new(),
            keys: Vec::new(),
            engine: None,
            live_source: None,
        }
    }

    /// Top-level field names in render order
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|b| b.name.as_str())
    }

    pub fn key_names(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.name.as_str())
    }

    pub fn engine(&self) -> &Arc<DistributionEngine> {
        &self.engine
    }

    fn render_bindings<R: Rng + ?Sized>(
        &self,
        bindings: &[Binding],
        rng: &mut R,
    ) -> Result<Map<String, Value>, RenderError> {
        let mut scope = Map::with_capacity(bindings.len());
        for binding in bindings {
            let value = self.render_value(&binding.name, &binding.generator, &scope, rng)?;
            scope.insert(binding.name.clone(), value);
        }
        Ok(scope)
    }

    fn render_value<R: Rng + ?Sized>(
        &self,
        field: &str,
        generator: &Generator,
        scope: &Map<String, Value>,
        rng: &mut R,
    ) -> Result<Value, RenderError> {
        let value = match generator {
            Generator::Pool(pool) => pool.sample(rng).clone(),

            Generator::Numeric {
                low,
                high,
                decimals,
            } => {
                let v = sample_numeric(*low, *high, rng).map_err(|source| {
                    RenderError::Sampling {
                        field: field.to_string(),
                        source,
                    }
                })?;
                Value::from(match decimals {
                    Some(d) => round_to(v, *d),
                    None => v,
                })
            }

            Generator::Integer { low, high } => Value::from(self.int(field, *low, *high, rng)?),

            Generator::Labelled { prefix, low, high } => {
                Value::from(format!("{}{}", prefix, self.int(field, *low, *high, rng)?))
            }

            Generator::TimestampMillis { offset_ms } => {
                Value::from(Utc::now().timestamp_millis() + offset_ms)
            }

            Generator::LocalTime {
                format,
                jitter_secs,
            } => {
                let jitter = if *jitter_secs > 0.0 {
                    rng.random_range(-jitter_secs..=*jitter_secs)
                } else {
                    0.0
                };
                let shifted = TimeDelta::try_milliseconds((jitter * 1000.0) as i64)
                    .and_then(|delta| Local::now().checked_add_signed(delta))
                    .ok_or_else(|| RenderError::TimeOutOfRange {
                        field: field.to_string(),
                    })?;
                Value::from(shifted.format(format).to_string())
            }

            Generator::EntityStep {
                entity_field,
                reshuffle_probability,
            } => {
                let entity = entity_id(field, entity_field, scope)?;
                if *reshuffle_probability > 0.0 && rng.random_bool(*reshuffle_probability) {
                    self.engine.reshuffle_bias(entity, rng);
                }
                Value::from(self.engine.step_entity(entity, rng))
            }

            Generator::LiveValue { symbol_field } => {
                let symbol = entity_id(field, symbol_field, scope)?;
                match &self.live_source {
                    Some(source) => Value::from(source.fetch_live_value(symbol)),
                    // Rejected at build time
                    None => Value::Null,
                }
            }

            Generator::Sequence { entity } => Value::from(self.engine.next_sequence(entity)),

            Generator::Copy { path } => lookup_path(scope, path)
                .cloned()
                .ok_or_else(|| RenderError::MissingReference {
                    field: field.to_string(),
                    path: path.clone(),
                })?,

            Generator::When {
                field: other,
                equals,
                then,
            } => {
                if lookup_path(scope, other) == Some(equals) {
                    self.render_value(field, then, scope, rng)?
                } else {
                    Value::Null
                }
            }

            Generator::Record(bindings) => Value::Object(self.render_bindings(bindings, rng)?),

            Generator::Repeat { min, max, element } => {
                let len = rng.random_range(*min..=*max);
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.render_value(field, element, scope, rng)?);
                }
                Value::Array(items)
            }

            Generator::Constant(value) => value.clone(),
        };

        Ok(value)
    }

    fn int<R: Rng + ?Sized>(
        &self,
        field: &str,
        low: i64,
        high: i64,
        rng: &mut R,
    ) -> Result<i64, RenderError> {
        sample_int(low, high, rng).map_err(|source| RenderError::Sampling {
            field: field.to_string(),
            source,
        })
    }

    fn derive_key(&self, message: &Map<String, Value>) -> Result<Key, RenderError> {
        let mut key = Map::with_capacity(self.keys.len());
        for binding in &self.keys {
            let value =
                lookup_path(message, &binding.path).ok_or_else(|| RenderError::MissingKeyField {
                    key: binding.name.clone(),
                    path: binding.path.clone(),
                })?;
            key.insert(binding.name.clone(), value.clone());
        }
        Ok(Key::new(key))
    }
}

impl EventSource for EventTemplate {
    fn name(&self) -> &str {
        &self.name
    }

    fn render(&self, rng: &mut dyn RngCore) -> Result<(Message, Key), RenderError> {
        let fields = self.render_bindings(&self.bindings, rng)?;
        let key = self.derive_key(&fields)?;
        let message = Message::new(fields);
        tracing::trace!("Rendered '{}': {}", self.name, message);
        Ok((message, key))
    }
}

fn entity_id<'a>(
    field: &str,
    reference: &str,
    scope: &'a Map<String, Value>,
) -> Result<&'a str, RenderError> {
    match lookup_path(scope, reference) {
        Some(Value::String(id)) => Ok(id),
        Some(other) => Err(RenderError::EntityId {
            field: field.to_string(),
            found: other.to_string(),
        }),
        None => Err(RenderError::MissingReference {
            field: field.to_string(),
            path: reference.to_string(),
        }),
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::EntitySeed;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;
    use serde_json::json;

    fn rng() -> Xoshiro256PlusPlus {
        Xoshiro256PlusPlus::seed_from_u64(7)
    }

    fn stock_template(engine: Arc<DistributionEngine>) -> EventTemplate {
        EventTemplate::builder("stock")
            .field("stock_name", FieldSpec::uniform(["A", "B"]))
            .field("stock_value", FieldSpec::entity_step("stock_name", 0.0))
            .field("timestamp", FieldSpec::timestamp_millis())
            .key("stock_name", "stock_name")
            .engine(engine)
            .build()
            .unwrap()
    }

    #[test]
    fn test_render_stock_end_to_end() {
        let engine = Arc::new(DistributionEngine::new());
        engine
            .register_entity(
                "A",
                EntitySeed {
                    initial_value: 10.0,
                    up_probability: 0.5,
                },
            )
            .unwrap();
        let template = stock_template(Arc::clone(&engine));

        let (message, key) = template.render(&mut rng()).unwrap();

        let names: Vec<_> = message.field_names().collect();
        assert_eq!(names, vec!["stock_name", "stock_value", "timestamp"]);
        let name = message.get("stock_name").and_then(Value::as_str).unwrap();
        assert!(name == "A" || name == "B");
        assert!(message.get("stock_value").unwrap().is_f64());
        assert!(message.get("timestamp").unwrap().as_i64().unwrap() > 0);
        assert_eq!(key.get("stock_name"), message.get("stock_name"));

        let state = engine.entity_snapshot(name).unwrap();
        assert_eq!(Some(state.value), message.get("stock_value").and_then(Value::as_f64));
    }

    #[test]
    fn test_key_only_contains_message_fields() {
        let template = EventTemplate::builder("bet")
            .field(
                "event",
                FieldSpec::uniform([
                    json!({"category": "Sport", "subcategory": "Football", "name": "ManUTD vs Chelsea"}),
                    json!({"category": "Lottery", "subcategory": "Bingo", "name": "UK Bingo"}),
                ]),
            )
            .field("amount", FieldSpec::rounded(2.0, 500.0, 2))
            .key("event", "event.name")
            .key("category", "event.category")
            .build()
            .unwrap();

        let mut rng = rng();
        for _ in 0..50 {
            let (message, key) = template.render(&mut rng).unwrap();
            for name in key.names() {
                let path = if name == "event" {
                    "event.name".to_string()
                } else {
                    format!("event.{name}")
                };
                assert_eq!(key.get(name), message.lookup(&path));
            }
        }
    }

    #[test]
    fn test_missing_nested_key_is_a_render_error() {
        let template = EventTemplate::builder("partial")
            .field("event", FieldSpec::uniform([json!({"name": "x"})]))
            .key("category", "event.category")
            .build()
            .unwrap();

        assert_eq!(
            template.render(&mut rng()).unwrap_err(),
            RenderError::MissingKeyField {
                key: "category".into(),
                path: "event.category".into()
            }
        );
    }

    #[test]
    fn test_build_validation() {
        let duplicate = EventTemplate::builder("t")
            .field("a", FieldSpec::Constant(json!(1)))
            .field("a", FieldSpec::Constant(json!(2)))
            .build();
        assert_eq!(
            duplicate.unwrap_err(),
            TemplateError::DuplicateField("a".into())
        );

        let forward = EventTemplate::builder("t")
            .field("value", FieldSpec::entity_step("name", 0.1))
            .field("name", FieldSpec::uniform(["x"]))
            .build();
        assert!(matches!(
            forward.unwrap_err(),
            TemplateError::UnknownReference { .. }
        ));

        let bad_key = EventTemplate::builder("t")
            .field("a", FieldSpec::Constant(json!(1)))
            .key("b", "b")
            .build();
        assert!(matches!(
            bad_key.unwrap_err(),
            TemplateError::InvalidKeyPath { .. }
        ));

        let empty = EventTemplate::builder("t")
            .field("a", FieldSpec::Uniform(vec![]))
            .build();
        assert_eq!(
            empty.unwrap_err(),
            TemplateError::Sampling {
                field: "a".into(),
                source: SamplingError::EmptyPool
            }
        );

        let range = EventTemplate::builder("t")
            .field("usage", FieldSpec::numeric(100.0, 70.0))
            .build();
        assert!(matches!(
            range.unwrap_err(),
            TemplateError::Sampling {
                source: SamplingError::InvalidRange { .. },
                ..
            }
        ));

        let live = EventTemplate::builder("t")
            .field("symbol", FieldSpec::uniform(["BTC-USD"]))
            .field("price", FieldSpec::live_value("symbol"))
            .build();
        assert_eq!(
            live.unwrap_err(),
            TemplateError::MissingLiveSource("price".into())
        );

        let unbounded = EventTemplate::builder("t")
            .field("usage", FieldSpec::numeric(-f64::MAX, f64::MAX))
            .build();
        assert!(matches!(
            unbounded.unwrap_err(),
            TemplateError::Sampling {
                source: SamplingError::InvalidRange { .. },
                ..
            }
        ));

        let jitter = EventTemplate::builder("t")
            .field(
                "at",
                FieldSpec::LocalTime {
                    format: "%Y".into(),
                    jitter_secs: 1e13,
                },
            )
            .build();
        assert!(matches!(
            jitter.unwrap_err(),
            TemplateError::Sampling { .. }
        ));

        let format = EventTemplate::builder("t")
            .field("at", FieldSpec::local_time("%Y-%Q"))
            .build();
        assert!(matches!(
            format.unwrap_err(),
            TemplateError::InvalidFormat { .. }
        ));
    }

    #[test]
    fn test_nested_records_repeat_and_conditionals() {
        let template = EventTemplate::builder("order")
            .field("behavior", FieldSpec::weighted(["view", "buy"], vec![1.0, 1.0]))
            .field("view_id", FieldSpec::when("behavior", "view", FieldSpec::uniform([111, 222])))
            .field(
                "items",
                FieldSpec::repeat(
                    1,
                    4,
                    FieldSpec::record([
                        ("name", FieldSpec::uniform(["Margherita", "Diavola"])),
                        ("extras", FieldSpec::repeat(0, 2, FieldSpec::uniform(["olives"]))),
                        ("label", FieldSpec::copy("name")),
                    ]),
                ),
            )
            .field("occurred_at", FieldSpec::local_time("%Y-%m-%d %H:%M:%S"))
            .build()
            .unwrap();

        let mut rng = rng();
        for _ in 0..100 {
            let (message, key) = template.render(&mut rng).unwrap();
            assert!(key.is_empty());

            let view_id = message.get("view_id").unwrap();
            if message.get("behavior") == Some(&json!("view")) {
                assert!(view_id == &json!(111) || view_id == &json!(222));
            } else {
                assert!(view_id.is_null());
            }

            let items = message.get("items").unwrap().as_array().unwrap();
            assert!((1..=4).contains(&items.len()));
            for item in items {
                assert_eq!(item["label"], item["name"]);
                assert!(item["extras"].as_array().unwrap().len() <= 2);
            }

            let at = message.get("occurred_at").unwrap().as_str().unwrap();
            assert_eq!(at.len(), "2024-01-01 00:00:00".len());
        }
    }

    #[test]
    fn test_sequence_and_labelled_fields() {
        let engine = Arc::new(DistributionEngine::new());
        let template = EventTemplate::builder("metric")
            .field("id", FieldSpec::Sequence { entity: "orders".into() })
            .field(
                "hostname",
                FieldSpec::Labelled {
                    prefix: "hostname".into(),
                    low: 0,
                    high: 9,
                },
            )
            .field("usage", FieldSpec::rounded(70.0, 100.0, 2))
            .key("hostname", "hostname")
            .engine(engine)
            .build()
            .unwrap();

        let mut rng = rng();
        for expected in 1..=5u64 {
            let (message, key) = template.render(&mut rng).unwrap();
            assert_eq!(message.get("id"), Some(&json!(expected)));
            let host = message.get("hostname").unwrap().as_str().unwrap();
            assert!(host.starts_with("hostname"));
            assert_eq!(key.get("hostname").unwrap(), host);
            let usage = message.get("usage").unwrap().as_f64().unwrap();
            assert_eq!(usage, (usage * 100.0).round() / 100.0);
        }
    }

    #[test]
    fn test_entity_step_rejects_non_string_ids() {
        let template = EventTemplate::builder("t")
            .field("id", FieldSpec::uniform([1, 2]))
            .field("value", FieldSpec::entity_step("id", 0.0))
            .build()
            .unwrap();

        assert!(matches!(
            template.render(&mut rng()).unwrap_err(),
            RenderError::EntityId { .. }
        ));
    }

    #[test]
    fn test_concurrent_renders_share_only_entities() {
        let engine = Arc::new(DistributionEngine::new());
        let template = Arc::new(stock_template(Arc::clone(&engine)));

        let handles: Vec<_> = (0..4)
            .map(|seed| {
                let template = Arc::clone(&template);
                std::thread::spawn(move || {
                    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
                    for _ in 0..250 {
                        template.render(&mut rng).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(engine.entity_count(), 2);
    }
}
