use async_trait::async_trait;

use crate::errors::GridSightResult;
use crate::grounding::types::{Rect, ScreenImage};

/// Per-draw sampling parameters derived from the policy state.
#[derive(Debug, Clone, Copy)]
pub struct SampleHint {
    /// Effective sampling temperature for this draw.
    pub temperature: f32,
    /// Which of the N draws this is (0-based).
    pub sample_index: usize,
}

/// One candidate localization from a single stochastic draw.
#[derive(Debug, Clone)]
pub struct OracleGuess {
    /// Pixel coordinates in the source image.
    pub bounding_box: Rect,
    /// Self-reported score in [0, 1].
    pub score: f32,
}

/// Contract for the localization model.
///
/// The model is an opaque external collaborator: stateless, stochastic, and
/// free to fail any individual draw with `ModelUnavailable`. The engine
/// invokes it `sampling_count` times per request and never inspects its
/// internals.
#[async_trait]
pub trait ModelOracle: Send + Sync {
    async fn predict(
        &self,
        image: &ScreenImage,
        instruction: &str,
        hint: SampleHint,
    ) -> GridSightResult<OracleGuess>;
}
