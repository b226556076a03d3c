//! Price records and the bounded random-walk mutation engine.
//!
//! Every tick multiplies the current price by a factor drawn uniformly
//! from `[1 - f, 1 + f)` and rounds to the nearest integer. Prices never
//! drop below 1.

use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Ticker symbol as stored in the price table.
pub type Symbol = String;

/// Lowest price a symbol may ever carry.
pub const MIN_PRICE: u64 = 1;

/// One row of the price table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRecord {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Current price in minor currency units (always >= 1).
    pub price: u64,
}

impl PriceRecord {
    /// Build a record, lifting non-positive prices to the floor.
    pub fn new(symbol: impl Into<Symbol>, price: u64) -> Self {
        Self {
            symbol: symbol.into(),
            price: price.max(MIN_PRICE),
        }
    }
}

/// Source of uniform draws in `[0, 1)`.
///
/// Injected into the mutation engine so tests can pin the walk.
pub trait RandomSource: Send + Sync {
    /// Next uniform value in `[0, 1)`.
    fn next_unit(&self) -> f64;
}

/// Thread-local RNG backed source used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_unit(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// Reproducible source seeded once at construction.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    /// Create a source from a fixed seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_unit(&self) -> f64 {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random::<f64>()
    }
}

/// Source that always returns the same draw.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(f64);

impl FixedRandom {
    /// Pin every draw to `value`, clamped into `[0, 1)`.
    pub fn new(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0 - f64::EPSILON))
    }
}

impl RandomSource for FixedRandom {
    fn next_unit(&self) -> f64 {
        self.0
    }
}

/// Multiplier for a uniform draw `u` and variation fraction `f`.
///
/// `u = 0` maps to `1 - f`, `u -> 1` approaches `1 + f`.
pub fn multiplier(u: f64, variation_fraction: f64) -> f64 {
    (1.0 - variation_fraction) + u * (2.0 * variation_fraction)
}

/// Compute the next price for `current` under `variation_fraction`.
///
/// Pure apart from the single draw taken from `rng`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn mutate(current: u64, variation_fraction: f64, rng: &dyn RandomSource) -> u64 {
    let u = rng.next_unit().clamp(0.0, 1.0);
    let next = (current as f64 * multiplier(u, variation_fraction)).round();
    if next < MIN_PRICE as f64 {
        MIN_PRICE
    } else {
        next as u64
    }
}

/// Percentage change from `old` to `new`.
#[allow(clippy::cast_precision_loss)]
pub fn change_pct(old: u64, new: u64) -> f64 {
    if old == 0 {
        return 0.0;
    }
    (new as f64 - old as f64) / old as f64 * 100.0
}
