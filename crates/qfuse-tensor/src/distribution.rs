use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Distribution for random value of a tensor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Distribution {
    /// Uniform distribution from 0 (inclusive) to 1 (exclusive).
    #[default]
    Default,

    /// Uniform distribution from `low` (inclusive) to `high` (exclusive).
    Uniform(f64, f64),
}

impl Distribution {
    /// Check that the distribution can be sampled.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match *self {
            Distribution::Uniform(low, high) if !(low < high && (high - low).is_finite()) => {
                Err(ValidationError::InvalidDistribution { low, high })
            }
            _ => Ok(()),
        }
    }

    /// Draw one sample.
    ///
    /// # Panics
    ///
    /// If the distribution isn't [valid](Self::validate).
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f32 {
        match self {
            Distribution::Default => rng.random_range(0.0f32..1.0),
            Distribution::Uniform(low, high) => rng.random_range(*low..*high) as f32,
        }
    }
}
