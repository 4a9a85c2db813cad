pub mod config;
pub mod errors;
pub mod export;
pub mod grounding;

pub use config::{EngineTuning, GroundingConfig};
pub use errors::{GridSightError, GridSightResult};
pub use grounding::engine::GroundingEngine;
pub use grounding::oracle::{ModelOracle, OracleGuess, SampleHint};
pub use grounding::refinement::{PolicyState, ScaleBucket};
pub use grounding::types::{
    DetectedElement, GroundingOutcome, GroundingRequest, GroundingResponse, Rect, ScreenImage,
};
pub use grounding::voting_grid::ConfidenceHeatmap;

/// Initialize structured logging with the usual env-filter override.
/// Host applications that bring their own subscriber skip this.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
