/// Element formatting — stable, ordered output construction.
use uuid::Uuid;

use crate::grounding::consensus::Region;
use crate::grounding::types::DetectedElement;

/// Convert surviving regions into final elements with fresh IDs, sorted by
/// descending confidence; ties broken by ascending top-left y, then x, so an
/// identical request always produces an identically ordered list.
pub fn format_elements(regions: Vec<Region>) -> Vec<DetectedElement> {
    let mut elements: Vec<DetectedElement> = regions
        .into_iter()
        .map(|region| DetectedElement {
            id: Uuid::new_v4(),
            bounding_box: region.bounding_box,
            confidence: region.peak_density.clamp(0.0, 1.0),
        })
        .collect();

    elements.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                a.bounding_box
                    .y
                    .partial_cmp(&b.bounding_box.y)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(
                a.bounding_box
                    .x
                    .partial_cmp(&b.bounding_box.x)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    elements
}
