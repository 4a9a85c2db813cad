/// Grounding engine — drives one request through the pipeline state machine:
///
/// `Idle → Sampling → Voting → Consensus → Formatting → (RefinementUpdate | skip) → Idle`
///
/// with `Failed` reachable from Sampling (quorum not met) or Idle (invalid
/// input). The whole machine runs under a wall-clock budget; expiry behaves
/// as cancellation and skips the refinement update, so the policy is never
/// fed from an incomplete outcome.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::EngineTuning;
use crate::errors::{GridSightError, GridSightResult};
use crate::grounding::consensus::extract_regions;
use crate::grounding::formatter::format_elements;
use crate::grounding::oracle::ModelOracle;
use crate::grounding::refinement::{consensus_reward, PolicyState, ScaleBucket};
use crate::grounding::sampler::run_draws;
use crate::grounding::types::{
    DetectedElement, GroundingOutcome, GroundingRequest, GroundingResponse,
};
use crate::grounding::voting_grid::{build_heatmap, ConfidenceHeatmap};

/// Engine instance owning the shared policy state.
///
/// The policy lives behind a single mutex on the instance, never a global:
/// each request takes one read snapshot at the start and the refinement step
/// performs the single write at the end, so concurrent requests sample
/// without blocking each other and competing updates serialize on the guard.
pub struct GroundingEngine {
    oracle: Arc<dyn ModelOracle>,
    tuning: EngineTuning,
    policy: Mutex<PolicyState>,
}

struct PipelineOutput {
    elements: Vec<DetectedElement>,
    heatmap: ConfidenceHeatmap,
    reward: Option<(ScaleBucket, f32)>,
    draw_failures: usize,
}

impl GroundingEngine {
    pub fn new(oracle: Arc<dyn ModelOracle>, tuning: EngineTuning) -> GridSightResult<Self> {
        tuning.validate()?;
        Ok(Self {
            oracle,
            tuning,
            policy: Mutex::new(PolicyState::new()),
        })
    }

    pub fn with_defaults(oracle: Arc<dyn ModelOracle>) -> Self {
        Self {
            oracle,
            tuning: EngineTuning::default(),
            policy: Mutex::new(PolicyState::new()),
        }
    }

    /// Read-only copy of the current policy state.
    pub async fn policy_snapshot(&self) -> PolicyState {
        self.policy.lock().await.clone()
    }

    /// Explicit caller-requested reset; the only sanctioned mid-session one.
    pub async fn clear_policy(&self) {
        let mut policy = self.policy.lock().await;
        *policy = PolicyState::new();
        tracing::info!("policy state cleared");
    }

    /// Ground one request. `stop` cancels cooperatively: in-flight draws are
    /// abandoned and the response carries `Cancelled` with no partial output.
    ///
    /// Invalid input is the only `Err` path; every other terminal state is a
    /// typed outcome on the response.
    pub async fn ground(
        &self,
        request: GroundingRequest,
        stop: Arc<AtomicBool>,
    ) -> GridSightResult<GroundingResponse> {
        let started = Instant::now();

        // Idle-state validation: a hand-rolled request must not bypass the
        // fail-fast checks, and nothing here may touch the policy.
        request.config.validate()?;
        if request.instruction.trim().is_empty() {
            return Err(GridSightError::InvalidInput("empty instruction".into()));
        }

        let snapshot = self.policy.lock().await.clone();

        let budget = Duration::from_millis(self.tuning.request_budget_ms);
        let outcome = tokio::time::timeout(
            budget,
            self.run_pipeline(&request, &snapshot, stop.clone()),
        )
        .await
        .unwrap_or(Err(GridSightError::Timeout));

        let output = match outcome {
            Err(GridSightError::Timeout) => {
                tracing::warn!(budget_ms = self.tuning.request_budget_ms, "request budget expired");
                return Ok(Self::terminal(GroundingOutcome::Timeout, started));
            }
            Err(GridSightError::Cancelled) => {
                tracing::info!("request cancelled");
                return Ok(Self::terminal(GroundingOutcome::Cancelled, started));
            }
            Err(GridSightError::ModelUnavailable(reason)) => {
                tracing::warn!(%reason, "request failed: model unavailable");
                return Ok(Self::terminal(GroundingOutcome::ModelUnavailable, started));
            }
            Err(e) => return Err(e),
            Ok(output) => output,
        };

        // RefinementUpdate: the single mutator of shared state. Reached only
        // on Success with refinement enabled.
        if let Some((bucket, reward)) = output.reward {
            let mut policy = self.policy.lock().await;
            policy.apply_update(bucket, reward, &self.tuning);
        }

        let elapsed = started.elapsed().as_secs_f64();
        tracing::info!(
            elements = output.elements.len(),
            draw_failures = output.draw_failures,
            seconds = elapsed,
            "grounding complete"
        );

        Ok(GroundingResponse {
            elements: output.elements,
            heatmap: Some(output.heatmap),
            processing_time_seconds: elapsed,
            outcome: GroundingOutcome::Success,
            draw_failures: output.draw_failures,
        })
    }

    async fn run_pipeline(
        &self,
        request: &GroundingRequest,
        snapshot: &PolicyState,
        stop: Arc<AtomicBool>,
    ) -> GridSightResult<PipelineOutput> {
        // Sampling
        let batch = run_draws(
            self.oracle.clone(),
            request,
            snapshot,
            &self.tuning,
            stop.clone(),
        )
        .await?;

        if stop.load(Ordering::Relaxed) {
            return Err(GridSightError::Cancelled);
        }

        // Voting / Consensus / Formatting — pure, synchronous transforms.
        let heatmap = build_heatmap(
            &batch.predictions,
            self.tuning.grid_resolution,
            request.image.width(),
            request.image.height(),
        );
        let regions = extract_regions(
            &heatmap,
            request.config.consensus_threshold,
            request.config.min_confidence,
        );
        let elements = format_elements(regions);

        if stop.load(Ordering::Relaxed) {
            return Err(GridSightError::Cancelled);
        }

        let reward = if request.config.enable_test_time_refinement {
            let bucket = ScaleBucket::for_image(&request.image);
            Some((
                bucket,
                consensus_reward(&batch.predictions, &elements, &self.tuning),
            ))
        } else {
            None
        };

        Ok(PipelineOutput {
            elements,
            heatmap,
            reward,
            draw_failures: batch.failures,
        })
    }

    fn terminal(outcome: GroundingOutcome, started: Instant) -> GroundingResponse {
        GroundingResponse {
            elements: Vec::new(),
            heatmap: None,
            processing_time_seconds: started.elapsed().as_secs_f64(),
            outcome,
            draw_failures: 0,
        }
    }
}
