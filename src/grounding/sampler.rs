/// Sampler — runs N independent oracle draws and enforces the quorum.
///
/// Draws are spawned as parallel tasks; no ordering is required among them
/// because the voting grid reduction is order-independent. Individual draw
/// failures and per-draw timeouts are dropped and counted; the request only
/// fails when fewer than `ceil(N/2)` draws survive.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::config::EngineTuning;
use crate::errors::{GridSightError, GridSightResult};
use crate::grounding::oracle::{ModelOracle, SampleHint};
use crate::grounding::refinement::{PolicyState, ScaleBucket};
use crate::grounding::types::{GroundingRequest, Prediction};

/// Outcome of one sampling pass.
#[derive(Debug)]
pub struct SampleBatch {
    /// Successful draws, ordered by sample index.
    pub predictions: Vec<Prediction>,
    /// Draws dropped for errors or per-draw timeout.
    pub failures: usize,
}

/// Run the sampling pass. Reads `policy` as a snapshot taken by the caller;
/// never writes it.
pub async fn run_draws(
    oracle: Arc<dyn ModelOracle>,
    request: &GroundingRequest,
    policy: &PolicyState,
    tuning: &EngineTuning,
    stop: Arc<AtomicBool>,
) -> GridSightResult<SampleBatch> {
    if stop.load(Ordering::Relaxed) {
        return Err(GridSightError::Cancelled);
    }

    let bucket = ScaleBucket::for_image(&request.image);
    let bias = policy.bias_for(bucket);
    // Positive bias (the ensemble has been agreeing with itself) cools the
    // sampler toward exploitation; negative bias heats it up.
    let temperature =
        (tuning.base_temperature - bias).clamp(tuning.min_temperature, tuning.max_temperature);

    tracing::debug!(
        ?bucket,
        bias,
        temperature,
        draws = request.config.sampling_count,
        "sampling pass started"
    );

    let image = Arc::new(request.image.clone());
    let instruction = Arc::new(request.instruction.clone());
    let draw_timeout = Duration::from_millis(tuning.draw_timeout_ms);

    let mut set = JoinSet::new();
    for sample_index in 0..request.config.sampling_count {
        let oracle = oracle.clone();
        let image = image.clone();
        let instruction = instruction.clone();
        set.spawn(async move {
            let hint = SampleHint {
                temperature,
                sample_index,
            };
            let guess =
                tokio::time::timeout(draw_timeout, oracle.predict(&image, &instruction, hint))
                    .await
                    .map_err(|_| GridSightError::ModelUnavailable("draw timed out".into()))?;
            guess.map(|g| Prediction {
                bounding_box: g.bounding_box,
                score: g.score.clamp(0.0, 1.0),
                sample_index,
            })
        });
    }

    let mut predictions = Vec::with_capacity(request.config.sampling_count);
    let mut failures = 0usize;

    while let Some(joined) = set.join_next().await {
        if stop.load(Ordering::Relaxed) {
            // Abandon in-flight draws; their results are discarded, never
            // merged into a heatmap.
            set.abort_all();
            return Err(GridSightError::Cancelled);
        }
        match joined {
            Ok(Ok(prediction)) => predictions.push(prediction),
            Ok(Err(e)) => {
                failures += 1;
                tracing::warn!(error = %e, "oracle draw dropped");
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(error = %e, "oracle draw task failed");
            }
        }
    }

    if stop.load(Ordering::Relaxed) {
        return Err(GridSightError::Cancelled);
    }

    let quorum = request.config.quorum();
    if predictions.len() < quorum {
        tracing::warn!(
            successes = predictions.len(),
            failures,
            quorum,
            "quorum not met"
        );
        return Err(GridSightError::ModelUnavailable(format!(
            "{} of {} draws succeeded, quorum is {}",
            predictions.len(),
            request.config.sampling_count,
            quorum
        )));
    }

    predictions.sort_by_key(|p| p.sample_index);
    tracing::debug!(successes = predictions.len(), failures, "sampling pass complete");

    Ok(SampleBatch {
        predictions,
        failures,
    })
}
