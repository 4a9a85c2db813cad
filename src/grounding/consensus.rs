/// Consensus extraction — turns the heatmap into candidate regions.
///
/// Cells at or above `consensus_threshold` are "hot"; hot cells are grouped
/// into connected components with a 4-connected flood fill. Diagonal
/// adjacency never merges components, which keeps the grouping deterministic
/// and reproducible. Region confidence is the *peak* cell density of the
/// component, not the average, so a strong peak is not diluted by its
/// boundary cells.
use crate::grounding::types::Rect;
use crate::grounding::voting_grid::ConfidenceHeatmap;

/// A connected cluster of hot cells. Internal to the extractor; consumed by
/// the formatter within the same request.
#[derive(Debug, Clone)]
pub struct Region {
    /// (col, row) coordinates of member cells.
    pub cells: Vec<(usize, usize)>,
    /// Maximum cell density within the component.
    pub peak_density: f32,
    /// Tight pixel-space bounding box over the member cells.
    pub bounding_box: Rect,
}

/// Extract consensus regions from the heatmap.
///
/// `min_confidence` filters on peak density and is applied after the
/// threshold grouping step, independent of `consensus_threshold`. A single
/// isolated hot cell still forms a valid region of size one.
pub fn extract_regions(
    heatmap: &ConfidenceHeatmap,
    consensus_threshold: f32,
    min_confidence: f32,
) -> Vec<Region> {
    let r = heatmap.resolution;
    let hot = |col: usize, row: usize| heatmap.cell(col, row) >= consensus_threshold;
    let mut visited = vec![false; r * r];
    let mut regions = Vec::new();

    for row in 0..r {
        for col in 0..r {
            if visited[row * r + col] || !hot(col, row) {
                continue;
            }

            // Iterative 4-connected flood fill from this seed.
            let mut cells = Vec::new();
            let mut peak = 0.0f32;
            let mut stack = vec![(col, row)];
            visited[row * r + col] = true;

            while let Some((c, rw)) = stack.pop() {
                peak = peak.max(heatmap.cell(c, rw));
                cells.push((c, rw));

                let mut try_push = |nc: usize, nr: usize, visited: &mut Vec<bool>| {
                    if !visited[nr * r + nc] && hot(nc, nr) {
                        visited[nr * r + nc] = true;
                        stack.push((nc, nr));
                    }
                };
                if c > 0 {
                    try_push(c - 1, rw, &mut visited);
                }
                if c + 1 < r {
                    try_push(c + 1, rw, &mut visited);
                }
                if rw > 0 {
                    try_push(c, rw - 1, &mut visited);
                }
                if rw + 1 < r {
                    try_push(c, rw + 1, &mut visited);
                }
            }

            if peak < min_confidence {
                tracing::trace!(size = cells.len(), peak, "region below min confidence — dropped");
                continue;
            }

            let (mut col_min, mut row_min, mut col_max, mut row_max) =
                (usize::MAX, usize::MAX, 0usize, 0usize);
            for &(c, rw) in &cells {
                col_min = col_min.min(c);
                row_min = row_min.min(rw);
                col_max = col_max.max(c);
                row_max = row_max.max(rw);
            }

            regions.push(Region {
                bounding_box: heatmap.cells_to_pixel_rect(col_min, row_min, col_max, row_max),
                peak_density: peak,
                cells,
            });
        }
    }

    tracing::debug!(count = regions.len(), "consensus regions extracted");
    regions
}
