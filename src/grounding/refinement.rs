/// Test-time refinement — label-free online policy update.
///
/// After a successful request, the fraction of draws that agreed with the
/// final consensus becomes a reward signal; an exponential moving average
/// nudges the sampling bias for the image's scale bucket. No labels, no
/// gradients — just self-consistency measured between the ensemble and its
/// own reduction.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::EngineTuning;
use crate::grounding::types::{DetectedElement, Prediction, ScreenImage};

// ── Scale buckets ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectClass {
    /// width / height > 1.5
    Wide,
    /// 0.67 ..= 1.5
    Square,
    /// width / height < 0.67
    Tall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    /// longest side < 720 px
    Small,
    /// 720 ..= 1599 px
    Medium,
    /// >= 1600 px
    Large,
}

/// Coarse classification of image shape and size used to key the bias table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScaleBucket {
    pub aspect: AspectClass,
    pub size: SizeClass,
}

impl ScaleBucket {
    pub fn for_image(image: &ScreenImage) -> Self {
        Self::from_dimensions(image.width(), image.height())
    }

    pub fn from_dimensions(width: u32, height: u32) -> Self {
        let ratio = width as f32 / height.max(1) as f32;
        let aspect = if ratio > 1.5 {
            AspectClass::Wide
        } else if ratio < 0.67 {
            AspectClass::Tall
        } else {
            AspectClass::Square
        };

        let longest = width.max(height);
        let size = if longest < 720 {
            SizeClass::Small
        } else if longest < 1600 {
            SizeClass::Medium
        } else {
            SizeClass::Large
        };

        Self { aspect, size }
    }

    pub fn all() -> impl Iterator<Item = ScaleBucket> {
        const ASPECTS: [AspectClass; 3] =
            [AspectClass::Wide, AspectClass::Square, AspectClass::Tall];
        const SIZES: [SizeClass; 3] = [SizeClass::Small, SizeClass::Medium, SizeClass::Large];
        ASPECTS.iter().flat_map(|&aspect| {
            SIZES.iter().map(move |&size| ScaleBucket { aspect, size })
        })
    }
}

// ── Policy state ─────────────────────────────────────────────────────────────

/// Process-wide sampling bias, shared across requests.
///
/// Created once at engine start with bias 0 for every bucket; mutated only
/// by `apply_update`, read by the sampler as a snapshot taken at request
/// start. Biases stay within `[-max_bias, max_bias]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyState {
    pub bias_by_bucket: HashMap<ScaleBucket, f32>,
    pub update_count: u64,
}

impl PolicyState {
    pub fn new() -> Self {
        Self {
            bias_by_bucket: ScaleBucket::all().map(|b| (b, 0.0)).collect(),
            update_count: 0,
        }
    }

    pub fn bias_for(&self, bucket: ScaleBucket) -> f32 {
        self.bias_by_bucket.get(&bucket).copied().unwrap_or(0.0)
    }

    /// EMA update for one bucket: `bias += lr * (reward - bias)`, clamped.
    pub fn apply_update(&mut self, bucket: ScaleBucket, reward: f32, tuning: &EngineTuning) {
        let bias = self.bias_by_bucket.entry(bucket).or_insert(0.0);
        let updated = *bias + tuning.learning_rate * (reward - *bias);
        *bias = updated.clamp(-tuning.max_bias, tuning.max_bias);
        self.update_count += 1;
        tracing::debug!(
            ?bucket,
            reward,
            bias = *bias,
            updates = self.update_count,
            "policy bias updated"
        );
    }
}

impl Default for PolicyState {
    fn default() -> Self {
        Self::new()
    }
}

// ── Reward computation ───────────────────────────────────────────────────────

/// Fraction of this request's predictions whose box substantially overlaps
/// (IoU above `tuning.reward_iou`) any surviving consensus element.
pub fn consensus_reward(
    predictions: &[Prediction],
    elements: &[DetectedElement],
    tuning: &EngineTuning,
) -> f32 {
    if predictions.is_empty() || elements.is_empty() {
        return 0.0;
    }
    let agreeing = predictions
        .iter()
        .filter(|p| {
            elements
                .iter()
                .any(|e| p.bounding_box.iou(&e.bounding_box) > tuning.reward_iou)
        })
        .count();
    agreeing as f32 / predictions.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grounding::types::Rect;
    use uuid::Uuid;

    fn element(rect: Rect) -> DetectedElement {
        DetectedElement {
            id: Uuid::new_v4(),
            bounding_box: rect,
            confidence: 0.8,
        }
    }

    fn prediction(rect: Rect, idx: usize) -> Prediction {
        Prediction {
            bounding_box: rect,
            score: 0.9,
            sample_index: idx,
        }
    }

    #[test]
    fn every_bucket_starts_at_zero() {
        let state = PolicyState::new();
        assert_eq!(state.bias_by_bucket.len(), 9);
        assert!(state.bias_by_bucket.values().all(|&b| b == 0.0));
        assert_eq!(state.update_count, 0);
    }

    #[test]
    fn bucket_classification() {
        let b = ScaleBucket::from_dimensions(1920, 1080);
        assert_eq!(b.aspect, AspectClass::Wide);
        assert_eq!(b.size, SizeClass::Large);

        let b = ScaleBucket::from_dimensions(400, 300);
        assert_eq!(b.aspect, AspectClass::Square);
        assert_eq!(b.size, SizeClass::Small);

        let b = ScaleBucket::from_dimensions(600, 1000);
        assert_eq!(b.aspect, AspectClass::Tall);
        assert_eq!(b.size, SizeClass::Medium);
    }

    #[test]
    fn bias_stays_clamped_after_many_updates() {
        let tuning = EngineTuning::default();
        let mut state = PolicyState::new();
        let bucket = ScaleBucket::from_dimensions(1920, 1080);
        for _ in 0..100 {
            state.apply_update(bucket, 1.0, &tuning);
        }
        let bias = state.bias_for(bucket);
        assert!(bias <= tuning.max_bias);
        assert!(bias > 0.0);
        assert_eq!(state.update_count, 100);
    }

    #[test]
    fn ema_moves_toward_reward() {
        let tuning = EngineTuning::default();
        let mut state = PolicyState::new();
        let bucket = ScaleBucket::from_dimensions(800, 600);
        state.apply_update(bucket, 1.0, &tuning);
        let expected = tuning.learning_rate * 1.0;
        assert!((state.bias_for(bucket) - expected).abs() < 1e-6);
    }

    #[test]
    fn reward_counts_overlapping_fraction() {
        let tuning = EngineTuning::default();
        let target = Rect::new(100.0, 100.0, 50.0, 50.0);
        let elements = vec![element(target)];
        let predictions = vec![
            prediction(Rect::new(100.0, 100.0, 50.0, 50.0), 0),
            prediction(Rect::new(102.0, 101.0, 50.0, 50.0), 1),
            prediction(Rect::new(900.0, 900.0, 40.0, 40.0), 2),
            prediction(Rect::new(101.0, 99.0, 50.0, 50.0), 3),
        ];
        let reward = consensus_reward(&predictions, &elements, &tuning);
        assert!((reward - 0.75).abs() < 1e-6);
    }

    #[test]
    fn reward_is_zero_without_elements() {
        let tuning = EngineTuning::default();
        let predictions = vec![prediction(Rect::new(0.0, 0.0, 10.0, 10.0), 0)];
        assert_eq!(consensus_reward(&predictions, &[], &tuning), 0.0);
    }
}
