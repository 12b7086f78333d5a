//! Abstraction over values that are "generated" from the environment, such as
//! the current time, so that verification can be made deterministic in tests.

use chrono::{DateTime, Utc};

pub trait Generator<T> {
    fn generate(&self) -> T;
}

/// Generates the current wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeGenerator;

impl Generator<DateTime<Utc>> for TimeGenerator {
    fn generate(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl Generator<DateTime<Utc>> for DateTime<Utc> {
    fn generate(&self) -> DateTime<Utc> {
        *self
    }
}
