// src/families.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Built-in message families
//!
//! Each family is an [`EventTemplate`] over fixed pools:
//! - `stock`: random-walk prices for a handful of fictional tickers
//! - `live-stock`: live crypto prices through the fallback fetcher
//! - `metric`: CPU usage for a fixed set of hosts
//! - `metric-advanced`: CPU usage over generated host and cpu ids
//! - `bet`: user bets on sport, lottery and novelty events
//! - `pizza`: pizza orders with nested pizzas and toppings
//! - `user-behaviour`: weighted view/cart/buy events

use serde_json::json;
use std::fmt;
use std::sync::Arc;

use crate::constants::*;
use crate::distribution::{DistributionEngine, EntitySeed};
use crate::error::TemplateError;
use crate::fetch::LiveValueSource;
use crate::template::{EventTemplate, FieldSpec};

pub const STOCK_NAMES: [&str; 7] = [
    "Deja Brew",
    "Jurassic Pork",
    "Lawn & Order",
    "Pita Pan",
    "Bread Pitt",
    "Indiana Jeans",
    "Thai Tanic",
];
const STOCK_INITIAL_VALUES: [f64; 7] = [10.0, 20.1, 20.2, 12.1, 25.1, 25.1, 27.5];
const STOCK_UP_PROBABILITIES: [f64; 7] = [0.5, 0.6, 0.7, 0.8, 0.9, 0.4, 0.3];

pub const CRYPTO_SYMBOLS: [&str; 9] = [
    "BTC-USD", "ETH-USD", "BNB-USD", "ADA-USD", "DOGE-USD", "SOL-USD", "XRP-USD", "LTC-USD",
    "DOT-USD",
];

const HOSTNAMES: [&str; 7] = ["doc", "grumpy", "sleepy", "bashful", "happy", "sneezy", "dopey"];
const CPUS: [&str; 5] = ["cpu1", "cpu2", "cpu3", "cpu4", "cpu5"];

const BET_USERNAMES: [&str; 10] = [
    "nopineappleonpizza",
    "catanzaro99",
    "thedoctor",
    "bettingexpert01",
    "losingmoney66",
    "manutd007",
    "manutd009",
    "citylife1",
    "lysa_X",
    "aiventest",
];
const MIN_BET: f64 = 2.0;
const MAX_BET: f64 = 1000.0;

const PIZZA_NAMES: [&str; 6] = [
    "Margherita",
    "Marinara",
    "Diavola",
    "Mari & Monti",
    "Salami",
    "Peperoni",
];
const TOPPINGS: [&str; 13] = [
    "🍅 tomato",
    "🧀 blue cheese",
    "🥚 egg",
    "🫑 green peppers",
    "🌶️ hot pepper",
    "🥓 bacon",
    "🫒 olives",
    "🧄 garlic",
    "🐟 tuna",
    "🧅 onion",
    "🍍 pineapple",
    "🍓 strawberry",
    "🍌 banana",
];
const PIZZA_SHOPS: [&str; 6] = [
    "Mario's Pizza",
    "Luigi's Pizza",
    "Circular Pi Pizzeria",
    "I'll Make You a Pizza You Can't Refuse",
    "Mammamia Pizza",
    "It's-a me! Mario Pizza!",
];
const CUSTOMERS: [&str; 8] = [
    "Ada Lovelace",
    "Grace Hopper",
    "Alan Turing",
    "Edsger Dijkstra",
    "Barbara Liskov",
    "Donald Knuth",
    "Margaret Hamilton",
    "Ken Thompson",
];
const STREETS: [&str; 6] = [
    "12 Via Roma, Napoli",
    "7 Baker Street, London",
    "221 Elm Street, Springfield",
    "3 Rue de Rivoli, Paris",
    "98 Market Street, San Francisco",
    "45 Kurfürstendamm, Berlin",
];
const MAX_PIZZAS_IN_ORDER: usize = 5;
const MAX_TOPPINGS_IN_PIZZA: usize = 3;

const BEHAVIOURS: [&str; 3] = ["view", "cart", "buy"];
const BEHAVIOUR_WEIGHTS: [f64; 3] = [0.5, 0.3, 0.2];
const VIEW_IDS: [i64; 3] = [111, 222, 555];
const GROUPS: [&str; 2] = ["A", "B"];
const LOCAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const BEHAVIOUR_TIME_JITTER_SECS: f64 = 5.0;

/// Message family selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Family {
    Stock,
    LiveStock,
    Metric,
    MetricAdvanced,
    Bet,
    Pizza,
    UserBehaviour,
}

impl Family {
    pub fn name(&self) -> &'static str {
        match self {
            Family::Stock => "stock",
            Family::LiveStock => "live-stock",
            Family::Metric => "metric",
            Family::MetricAdvanced => "metric-advanced",
            Family::Bet => "bet",
            Family::Pizza => "pizza",
            Family::UserBehaviour => "user-behaviour",
        }
    }

    pub fn needs_live_source(&self) -> bool {
        matches!(self, Family::LiveStock)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bet sizing profile; scales the upper bet bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum RiskProfile {
    HighRisk,
    #[default]
    Casual,
    LowRisk,
}

impl RiskProfile {
    pub fn factor(&self) -> f64 {
        match self {
            RiskProfile::HighRisk => 0.8,
            RiskProfile::Casual => 0.5,
            RiskProfile::LowRisk => 0.3,
        }
    }
}

/// Per-family tunables
#[derive(Debug, Clone, Copy)]
pub struct FamilyOptions {
    /// Highest generated host id for `metric-advanced`
    pub hosts: i64,
    /// Highest generated cpu id for `metric-advanced`
    pub cpus: i64,
    pub risk_profile: RiskProfile,
    /// Chance per `stock` render that the drawn ticker's bias is re-drawn
    pub reshuffle_probability: f64,
}

impl Default for FamilyOptions {
    fn default() -> Self {
        Self {
            hosts: 100_000,
            cpus: 30,
            risk_profile: RiskProfile::Casual,
            reshuffle_probability: DEFAULT_RESHUFFLE_PROBABILITY,
        }
    }
}

/// Build the template for `family`
pub fn build(
    family: Family,
    engine: Arc<DistributionEngine>,
    live_source: Option<Arc<dyn LiveValueSource>>,
    options: &FamilyOptions,
) -> Result<EventTemplate, TemplateError> {
    tracing::info!("Building '{}' template", family);
    match family {
        Family::Stock => stock(engine, options.reshuffle_probability),
        Family::LiveStock => {
            let builder = EventTemplate::builder(family.name()).engine(engine);
            let builder = match live_source {
                Some(source) => builder.live_source(source),
                None => builder,
            };
            builder
                .field("stock_name", FieldSpec::uniform(CRYPTO_SYMBOLS))
                .field("stock_value", FieldSpec::live_value("stock_name"))
                .field("timestamp", FieldSpec::timestamp_millis())
                .key("stock_name", "stock_name")
                .build()
        }
        Family::Metric => EventTemplate::builder(family.name())
            .engine(engine)
            .field("hostname", FieldSpec::uniform(HOSTNAMES))
            .field("cpu", FieldSpec::uniform(CPUS))
            .field("usage", FieldSpec::rounded(70.0, 100.0, 2))
            .field("occurred_at", FieldSpec::timestamp_millis())
            .key("hostname", "hostname")
            .build(),
        Family::MetricAdvanced => EventTemplate::builder(family.name())
            .engine(engine)
            .field(
                "hostname",
                FieldSpec::Labelled {
                    prefix: "hostname".into(),
                    low: 0,
                    high: options.hosts,
                },
            )
            .field(
                "cpu",
                FieldSpec::Labelled {
                    prefix: "cpu".into(),
                    low: 0,
                    high: options.cpus,
                },
            )
            .field("usage", FieldSpec::rounded(70.0, 100.0, 2))
            .field("occurred_at", FieldSpec::timestamp_millis())
            .key("hostname", "hostname")
            .build(),
        Family::Bet => bet(engine, options.risk_profile),
        Family::Pizza => pizza(engine),
        Family::UserBehaviour => EventTemplate::builder(family.name())
            .engine(engine)
            .field("user_id", FieldSpec::uniform(1..10))
            .field("item_id", FieldSpec::uniform(21..30))
            .field(
                "behavior",
                FieldSpec::weighted(BEHAVIOURS, BEHAVIOUR_WEIGHTS.to_vec()),
            )
            .field(
                "view_id",
                FieldSpec::when("behavior", "view", FieldSpec::uniform(VIEW_IDS)),
            )
            .field("group_name", FieldSpec::uniform(GROUPS))
            .field(
                "occurred_at",
                FieldSpec::LocalTime {
                    format: LOCAL_TIME_FORMAT.into(),
                    jitter_secs: BEHAVIOUR_TIME_JITTER_SECS,
                },
            )
            .key("user_id", "user_id")
            .build(),
    }
}

fn stock(
    engine: Arc<DistributionEngine>,
    reshuffle_probability: f64,
) -> Result<EventTemplate, TemplateError> {
    for ((name, value), up) in STOCK_NAMES
        .iter()
        .zip(STOCK_INITIAL_VALUES)
        .zip(STOCK_UP_PROBABILITIES)
    {
        engine
            .register_entity(
                name,
                EntitySeed {
                    initial_value: value,
                    up_probability: up,
                },
            )
            .map_err(|source| TemplateError::Sampling {
                field: "stock_value".into(),
                source,
            })?;
    }

    EventTemplate::builder(Family::Stock.name())
        .engine(engine)
        .field("stock_name", FieldSpec::uniform(STOCK_NAMES))
        .field(
            "stock_value",
            FieldSpec::entity_step("stock_name", reshuffle_probability),
        )
        .field("timestamp", FieldSpec::timestamp_millis())
        .key("stock_name", "stock_name")
        .build()
}

fn bet(
    engine: Arc<DistributionEngine>,
    risk_profile: RiskProfile,
) -> Result<EventTemplate, TemplateError> {
    let events = [
        ("Sport", "Football", "ManUTD vs Chelsea"),
        ("Sport", "Box", "Chicken Legs vs Power Kick"),
        ("Sport", "Curling", "Italy vs England"),
        ("Sport", "Netball", "Sydney vs Canberra"),
        ("Lottery", "Bingo", "UK Bingo"),
        ("Lottery", "WinForLife", "Win For Life America"),
        ("Event", "Music", "Rick Astley #1 in World Charts"),
        ("Event", "Politics", "Mickey Mouse new Italian President"),
        ("Event", "Celebrities", "Donald Duck and Marge Simpson Wedding"),
    ]
    .map(|(category, subcategory, name)| {
        json!({"category": category, "subcategory": subcategory, "name": name})
    });

    let max_bet = (MAX_BET * risk_profile.factor()).max(MIN_BET);

    EventTemplate::builder(Family::Bet.name())
        .engine(engine)
        .field("username", FieldSpec::uniform(BET_USERNAMES))
        .field("event", FieldSpec::uniform(events))
        .field("amount", FieldSpec::rounded(MIN_BET, max_bet, 2))
        .field("timestamp", FieldSpec::timestamp_millis())
        .key("event", "event.name")
        .key("category", "event.category")
        .key("subcategory", "event.subcategory")
        .build()
}

fn pizza(engine: Arc<DistributionEngine>) -> Result<EventTemplate, TemplateError> {
    let pizza = FieldSpec::record([
        ("pizza_name", FieldSpec::uniform(PIZZA_NAMES)),
        (
            "additional_toppings",
            FieldSpec::repeat(0, MAX_TOPPINGS_IN_PIZZA, FieldSpec::uniform(TOPPINGS)),
        ),
    ]);

    EventTemplate::builder(Family::Pizza.name())
        .engine(engine)
        .field(
            "id",
            FieldSpec::Sequence {
                entity: "pizza-orders".into(),
            },
        )
        .field("shop", FieldSpec::uniform(PIZZA_SHOPS))
        .field("name", FieldSpec::uniform(CUSTOMERS))
        .field(
            "phone_number",
            FieldSpec::Labelled {
                prefix: "+1-555-".into(),
                low: 1000,
                high: 9999,
            },
        )
        .field("address", FieldSpec::uniform(STREETS))
        .field("pizzas", FieldSpec::repeat(1, MAX_PIZZAS_IN_ORDER, pizza))
        .field("timestamp", FieldSpec::timestamp_millis())
        .key("shop", "shop")
        .build()
}
