use base64::Engine as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::GroundingConfig;
use crate::errors::{GridSightError, GridSightResult};

/// Axis-aligned rectangle in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    /// Intersection-over-union with another rect. Degenerate rects yield 0.
    pub fn iou(&self, other: &Rect) -> f32 {
        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = (self.x + self.w).min(other.x + other.w);
        let iy2 = (self.y + self.h).min(other.y + other.h);

        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;

        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Decoded screenshot handed to the engine. The encoded bytes are kept for
/// the oracle; only the pixel dimensions matter to the voting pipeline.
#[derive(Debug, Clone)]
pub struct ScreenImage {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
}

impl ScreenImage {
    /// Decode any format the `image` crate understands. Undecodable input
    /// is rejected before a single oracle call is made.
    pub fn from_bytes(bytes: Vec<u8>) -> GridSightResult<Self> {
        let img = image::load_from_memory(&bytes)
            .map_err(|e| GridSightError::InvalidInput(format!("image decode: {e}")))?;
        let (width, height) = (img.width(), img.height());
        if width == 0 || height == 0 {
            return Err(GridSightError::InvalidInput("zero-size image".into()));
        }
        Ok(Self {
            bytes,
            width,
            height,
        })
    }

    pub fn from_base64(encoded: &str) -> GridSightResult<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| GridSightError::InvalidInput(format!("base64 decode: {e}")))?;
        Self::from_bytes(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Immutable grounding request, created per call.
#[derive(Debug, Clone)]
pub struct GroundingRequest {
    pub image: ScreenImage,
    pub instruction: String,
    pub config: GroundingConfig,
}

impl GroundingRequest {
    /// Validates instruction and config up front (fail fast, see error
    /// taxonomy): an invalid request never reaches the sampler.
    pub fn new(
        image: ScreenImage,
        instruction: impl Into<String>,
        config: GroundingConfig,
    ) -> GridSightResult<Self> {
        let instruction = instruction.into();
        if instruction.trim().is_empty() {
            return Err(GridSightError::InvalidInput("empty instruction".into()));
        }
        config.validate()?;
        Ok(Self {
            image,
            instruction,
            config,
        })
    }
}

/// One stochastic oracle draw. Lives only for the duration of a request;
/// the sampler owns these until they are handed to the voting grid.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub bounding_box: Rect,
    /// Oracle self-reported score in [0, 1].
    pub score: f32,
    pub sample_index: usize,
}

/// Final, caller-owned detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedElement {
    pub id: Uuid,
    /// Pixel coordinates in the original image.
    pub bounding_box: Rect,
    /// Peak consensus density, in [min_confidence, 1].
    pub confidence: f32,
}

/// Terminal state of a grounding request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundingOutcome {
    Success,
    Cancelled,
    Timeout,
    /// Quorum of oracle draws failed.
    ModelUnavailable,
}

/// Engine response. Non-success outcomes carry no elements and no heatmap —
/// partial results are never surfaced.
#[derive(Debug, Clone, Serialize)]
pub struct GroundingResponse {
    pub elements: Vec<DetectedElement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heatmap: Option<crate::grounding::voting_grid::ConfidenceHeatmap>,
    pub processing_time_seconds: f64,
    pub outcome: GroundingOutcome,
    /// Oracle draws dropped below the quorum threshold (observability only).
    pub draw_failures: usize,
}
