use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{GridSightError, GridSightResult};

/// Per-request grounding parameters, caller-supplied and validated at
/// request creation. Out-of-range values fail fast before any oracle call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundingConfig {
    /// Number of independent oracle draws per request. Range 3..=10.
    #[serde(default = "default_sampling_count")]
    pub sampling_count: usize,
    /// Normalized vote density a cell needs to count as "hot". Range 0.5..=0.9.
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: f32,
    /// Minimum peak density a region needs to survive. Range 0.1..=0.7.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// Apply the online policy update after a successful request.
    #[serde(default)]
    pub enable_test_time_refinement: bool,
}

fn default_sampling_count() -> usize {
    5
}

fn default_consensus_threshold() -> f32 {
    0.6
}

fn default_min_confidence() -> f32 {
    0.3
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            sampling_count: default_sampling_count(),
            consensus_threshold: default_consensus_threshold(),
            min_confidence: default_min_confidence(),
            enable_test_time_refinement: false,
        }
    }
}

impl GroundingConfig {
    pub fn validate(&self) -> GridSightResult<()> {
        if !(3..=10).contains(&self.sampling_count) {
            return Err(GridSightError::InvalidInput(format!(
                "sampling_count {} outside [3, 10]",
                self.sampling_count
            )));
        }
        if !(0.5..=0.9).contains(&self.consensus_threshold) {
            return Err(GridSightError::InvalidInput(format!(
                "consensus_threshold {} outside [0.5, 0.9]",
                self.consensus_threshold
            )));
        }
        if !(0.1..=0.7).contains(&self.min_confidence) {
            return Err(GridSightError::InvalidInput(format!(
                "min_confidence {} outside [0.1, 0.7]",
                self.min_confidence
            )));
        }
        Ok(())
    }

    /// Minimum number of successful draws required to proceed.
    pub fn quorum(&self) -> usize {
        self.sampling_count.div_ceil(2)
    }
}

/// Engine-level tunables, fixed for the lifetime of a `GroundingEngine`.
///
/// All defaults are documented here rather than scattered as magic numbers;
/// a partial TOML file overrides only the keys it names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineTuning {
    /// Side length of the square voting grid (cells per axis).
    #[serde(default = "default_grid_resolution")]
    pub grid_resolution: usize,
    /// Sampling temperature handed to the oracle when the bucket bias is zero.
    #[serde(default = "default_base_temperature")]
    pub base_temperature: f32,
    /// Lower clamp on the effective temperature.
    #[serde(default = "default_min_temperature")]
    pub min_temperature: f32,
    /// Upper clamp on the effective temperature.
    #[serde(default = "default_max_temperature")]
    pub max_temperature: f32,
    /// EMA step size for the policy update.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    /// Bucket biases never leave [-max_bias, max_bias].
    #[serde(default = "default_max_bias")]
    pub max_bias: f32,
    /// A prediction counts toward the reward when its IoU against any
    /// surviving region exceeds this.
    #[serde(default = "default_reward_iou")]
    pub reward_iou: f32,
    /// Per-draw oracle deadline in milliseconds.
    #[serde(default = "default_draw_timeout_ms")]
    pub draw_timeout_ms: u64,
    /// Wall-clock budget for a whole request in milliseconds.
    #[serde(default = "default_request_budget_ms")]
    pub request_budget_ms: u64,
}

fn default_grid_resolution() -> usize {
    64
}

fn default_base_temperature() -> f32 {
    0.7
}

fn default_min_temperature() -> f32 {
    0.2
}

fn default_max_temperature() -> f32 {
    1.2
}

fn default_learning_rate() -> f32 {
    0.2
}

fn default_max_bias() -> f32 {
    0.35
}

fn default_reward_iou() -> f32 {
    0.5
}

fn default_draw_timeout_ms() -> u64 {
    10_000
}

fn default_request_budget_ms() -> u64 {
    30_000
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            grid_resolution: default_grid_resolution(),
            base_temperature: default_base_temperature(),
            min_temperature: default_min_temperature(),
            max_temperature: default_max_temperature(),
            learning_rate: default_learning_rate(),
            max_bias: default_max_bias(),
            reward_iou: default_reward_iou(),
            draw_timeout_ms: default_draw_timeout_ms(),
            request_budget_ms: default_request_budget_ms(),
        }
    }
}

impl EngineTuning {
    pub fn load(path: impl AsRef<Path>) -> GridSightResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let tuning: EngineTuning = toml::from_str(&content)?;
        tuning.validate()?;
        tracing::info!(path = %path.display(), grid = tuning.grid_resolution, "tuning loaded");
        Ok(tuning)
    }

    pub fn validate(&self) -> GridSightResult<()> {
        if self.grid_resolution == 0 {
            return Err(GridSightError::Config("grid_resolution must be > 0".into()));
        }
        if self.min_temperature > self.max_temperature {
            return Err(GridSightError::Config(format!(
                "min_temperature {} > max_temperature {}",
                self.min_temperature, self.max_temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.learning_rate) {
            return Err(GridSightError::Config(format!(
                "learning_rate {} outside [0, 1]",
                self.learning_rate
            )));
        }
        if self.max_bias < 0.0 {
            return Err(GridSightError::Config("max_bias must be >= 0".into()));
        }
        Ok(())
    }
}
