//! Deterministic scripted oracle for tests. Guesses are keyed by sample
//! index, so repeating an identical request reproduces the identical draw
//! set (the fixed-seed discipline without a RNG dependency).
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{GridSightError, GridSightResult};
use crate::grounding::oracle::{ModelOracle, OracleGuess, SampleHint};
use crate::grounding::types::ScreenImage;

pub struct ScriptedOracle {
    default: OracleGuess,
    by_index: HashMap<usize, OracleGuess>,
    fail_indices: HashSet<usize>,
    delay: Option<Duration>,
    delay_by_index: HashMap<usize, Duration>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    /// Every draw returns the same guess.
    pub fn always(guess: OracleGuess) -> Self {
        Self {
            default: guess,
            by_index: HashMap::new(),
            fail_indices: HashSet::new(),
            delay: None,
            delay_by_index: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Draws at the given sample indices fail with `ModelUnavailable`.
    pub fn failing_indices(guess: OracleGuess, indices: &[usize]) -> Self {
        let mut oracle = Self::always(guess);
        oracle.fail_indices = indices.iter().copied().collect();
        oracle
    }

    /// Override the guess for one sample index.
    pub fn with_guess_at(mut self, sample_index: usize, guess: OracleGuess) -> Self {
        self.by_index.insert(sample_index, guess);
        self
    }

    /// Sleep before answering each draw.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sleep before answering one specific draw; other draws keep the
    /// global delay (or none).
    pub fn with_delay_at(mut self, sample_index: usize, delay: Duration) -> Self {
        self.delay_by_index.insert(sample_index, delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ModelOracle for ScriptedOracle {
    async fn predict(
        &self,
        _image: &ScreenImage,
        _instruction: &str,
        hint: SampleHint,
    ) -> GridSightResult<OracleGuess> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let delay = self
            .delay_by_index
            .get(&hint.sample_index)
            .copied()
            .or(self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_indices.contains(&hint.sample_index) {
            return Err(GridSightError::ModelUnavailable("scripted failure".into()));
        }
        Ok(self
            .by_index
            .get(&hint.sample_index)
            .cloned()
            .unwrap_or_else(|| self.default.clone()))
    }
}
