use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{RunCount, ValueConsumer, ValueProducer};
use crate::types::RowValues;

/// Single-value holder shared by the statement that writes it and the ones that read it.
///
/// Reads before the first write yield `Null`. A query that returns no rows never
/// writes, so the previous value is kept.
#[derive(Debug, Default)]
pub struct Column {
    value: Mutex<RowValues>,
}

impl Column {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self) -> RowValues {
        match self.value.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ValueConsumer for Column {
    fn scan(&self, value: RowValues) {
        let mut guard = match self.value.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = value;
    }
}

impl ValueProducer for Column {
    fn values(&self, _rc: &RunCount) -> Vec<RowValues> {
        vec![self.get()]
    }
}

/// Always the same value.
#[derive(Debug, Clone)]
pub struct Constant(pub RowValues);

impl ValueProducer for Constant {
    fn values(&self, _rc: &RunCount) -> Vec<RowValues> {
        vec![self.0.clone()]
    }
}

/// Monotonic sequence; safe to share across clients.
#[derive(Debug)]
pub struct AutoInc {
    next: AtomicI64,
    step: i64,
}

impl AutoInc {
    #[must_use]
    pub fn new(start: i64, step: i64) -> Self {
        Self {
            next: AtomicI64::new(start),
            step,
        }
    }
}

impl ValueProducer for AutoInc {
    fn values(&self, _rc: &RunCount) -> Vec<RowValues> {
        vec![RowValues::Int(self.next.fetch_add(self.step, Ordering::Relaxed))]
    }
}

/// Uniform random integer in `[min, max]`.
#[derive(Debug)]
pub struct RandomInt {
    min: i64,
    max: i64,
    rng: Mutex<ChaCha8Rng>,
}

impl RandomInt {
    #[must_use]
    pub fn new(min: i64, max: i64) -> Self {
        Self::seeded(min, max, rand::rng().random())
    }

    /// Deterministic sequence for a given seed.
    #[must_use]
    pub fn seeded(min: i64, max: i64, seed: u64) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }
}

impl ValueProducer for RandomInt {
    fn values(&self, _rc: &RunCount) -> Vec<RowValues> {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        vec![RowValues::Int(rng.random_range(self.min..=self.max))]
    }
}

/// Emits the client's own number, e.g. to partition keys by client.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientIdValue;

impl ValueProducer for ClientIdValue {
    fn values(&self, rc: &RunCount) -> Vec<RowValues> {
        vec![RowValues::Int(i64::from(rc.client))]
    }
}
