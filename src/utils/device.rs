use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Where tensors for a forward pass live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
}

/// Execution context handed to model construction and loading.
///
/// Owns RNG creation: with a seed, weight initialisation and sampling are
/// reproducible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    pub device: Device,
    pub seed: Option<u64>,
}

impl ExecutionContext {
    pub fn cpu() -> Self {
        Self::default()
    }

    pub fn seeded(seed: u64) -> Self {
        Self { device: Device::Cpu, seed: Some(seed) }
    }

    /// A fresh RNG; seeded contexts return the same stream every call.
    pub fn rng(&self) -> SmallRng {
        match self.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        }
    }
}
