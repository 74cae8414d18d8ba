//! Injectable yes/no decisions for the simulated stock check and gateway.

use std::collections::VecDeque;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub trait Decision: Send + Sync {
    fn decide(&self) -> bool;
}

/// Always returns the same answer.
#[derive(Debug, Clone, Copy)]
pub struct Always(pub bool);

impl Decision for Always {
    fn decide(&self) -> bool {
        self.0
    }
}

/// Independent Bernoulli trials with the given success rate.
///
/// Seeded instances produce the same sequence on every run.
pub struct Probability {
    success_rate: f64,
    rng: Mutex<StdRng>,
}

impl Probability {
    /// Rates outside `[0, 1]` are clamped; NaN counts as never succeeding.
    pub fn new(success_rate: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            success_rate: if success_rate.is_nan() {
                0.0
            } else {
                success_rate.clamp(0.0, 1.0)
            },
            rng: Mutex::new(rng),
        }
    }
}

impl Decision for Probability {
    fn decide(&self) -> bool {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_bool(self.success_rate),
            Err(poisoned) => poisoned.into_inner().gen_bool(self.success_rate),
        }
    }
}

/// Replays a fixed script, then falls back to a default answer.
pub struct Scripted {
    script: Mutex<VecDeque<bool>>,
    fallback: bool,
}

impl Scripted {
    pub fn new(script: impl IntoIterator<Item = bool>, fallback: bool) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
        }
    }
}

impl Decision for Scripted {
    fn decide(&self) -> bool {
        let next = match self.script.lock() {
            Ok(mut script) => script.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.unwrap_or(self.fallback)
    }
}
