/// Voting grid — reduces an ensemble of predictions into a confidence heatmap.
///
/// Image space is partitioned into a fixed R×R cell grid in normalized
/// coordinates, so the reduction is resolution-independent. Each prediction
/// deposits its score into every cell its bounding box overlaps, weighted by
/// the fractional area of overlap. Accumulation is additive, hence
/// associative and commutative: per-prediction contributions may be computed
/// in any order (or in parallel) and merged.
use serde::Serialize;

use crate::grounding::types::{Prediction, Rect};

/// Normalized vote densities over the R×R grid, plus the cell→pixel mapping
/// established when the grid was built. Cells are row-major, values in [0, 1].
#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceHeatmap {
    pub resolution: usize,
    pub image_width: u32,
    pub image_height: u32,
    /// Row-major, `resolution * resolution` entries.
    pub cells: Vec<f32>,
}

impl ConfidenceHeatmap {
    pub fn cell(&self, col: usize, row: usize) -> f32 {
        self.cells[row * self.resolution + col]
    }

    /// Pixel-space rectangle covered by one grid cell.
    pub fn cell_rect(&self, col: usize, row: usize) -> Rect {
        let cell_w = self.image_width as f32 / self.resolution as f32;
        let cell_h = self.image_height as f32 / self.resolution as f32;
        Rect::new(col as f32 * cell_w, row as f32 * cell_h, cell_w, cell_h)
    }

    /// Tight pixel bounding box over an inclusive cell range.
    pub fn cells_to_pixel_rect(
        &self,
        col_min: usize,
        row_min: usize,
        col_max: usize,
        row_max: usize,
    ) -> Rect {
        let cell_w = self.image_width as f32 / self.resolution as f32;
        let cell_h = self.image_height as f32 / self.resolution as f32;
        let x = col_min as f32 * cell_w;
        let y = row_min as f32 * cell_h;
        let w = (col_max - col_min + 1) as f32 * cell_w;
        let h = (row_max - row_min + 1) as f32 * cell_h;
        Rect::new(x, y, w, h)
    }
}

/// Accumulates prediction votes before normalization.
pub struct VotingGrid {
    resolution: usize,
    image_width: u32,
    image_height: u32,
    accum: Vec<f32>,
}

impl VotingGrid {
    pub fn new(resolution: usize, image_width: u32, image_height: u32) -> Self {
        Self {
            resolution,
            image_width,
            image_height,
            accum: vec![0.0; resolution * resolution],
        }
    }

    /// Deposit one prediction's score across the cells its box overlaps.
    ///
    /// A cell fully inside the box receives the full score; a partially
    /// overlapped cell receives `score × overlap_fraction`.
    pub fn add_prediction(&mut self, prediction: &Prediction) {
        let r = self.resolution as f32;
        let (iw, ih) = (self.image_width as f32, self.image_height as f32);

        // Box in normalized [0,1] coordinates, clamped to the image.
        let bx1 = (prediction.bounding_box.x / iw).clamp(0.0, 1.0);
        let by1 = (prediction.bounding_box.y / ih).clamp(0.0, 1.0);
        let bx2 = ((prediction.bounding_box.x + prediction.bounding_box.w) / iw).clamp(0.0, 1.0);
        let by2 = ((prediction.bounding_box.y + prediction.bounding_box.h) / ih).clamp(0.0, 1.0);
        if bx2 <= bx1 || by2 <= by1 {
            return;
        }

        let col_min = (bx1 * r).floor() as usize;
        let col_max = ((bx2 * r).ceil() as usize).min(self.resolution) - 1;
        let row_min = (by1 * r).floor() as usize;
        let row_max = ((by2 * r).ceil() as usize).min(self.resolution) - 1;
        let col_min = col_min.min(self.resolution - 1);
        let row_min = row_min.min(self.resolution - 1);

        let cell_size = 1.0 / r;
        let cell_area = cell_size * cell_size;

        for row in row_min..=row_max {
            let cy1 = row as f32 * cell_size;
            let cy2 = cy1 + cell_size;
            let oy = (by2.min(cy2) - by1.max(cy1)).max(0.0);
            for col in col_min..=col_max {
                let cx1 = col as f32 * cell_size;
                let cx2 = cx1 + cell_size;
                let ox = (bx2.min(cx2) - bx1.max(cx1)).max(0.0);
                let overlap_fraction = (ox * oy) / cell_area;
                if overlap_fraction > 0.0 {
                    self.accum[row * self.resolution + col] +=
                        prediction.score * overlap_fraction;
                }
            }
        }
    }

    /// Normalize by the number of *successful* draws (not the configured
    /// sampling count, so partial-quorum outcomes are not penalized) and
    /// clamp to [0, 1].
    pub fn finalize(self, successful_draws: usize) -> ConfidenceHeatmap {
        let divisor = successful_draws.max(1) as f32;
        let cells = self
            .accum
            .into_iter()
            .map(|v| (v / divisor).clamp(0.0, 1.0))
            .collect();
        ConfidenceHeatmap {
            resolution: self.resolution,
            image_width: self.image_width,
            image_height: self.image_height,
            cells,
        }
    }
}

/// Build the normalized heatmap from all successful predictions.
pub fn build_heatmap(
    predictions: &[Prediction],
    resolution: usize,
    image_width: u32,
    image_height: u32,
) -> ConfidenceHeatmap {
    let mut grid = VotingGrid::new(resolution, image_width, image_height);
    for p in predictions {
        grid.add_prediction(p);
    }
    grid.finalize(predictions.len())
}
