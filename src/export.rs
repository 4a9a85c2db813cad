/// Caller-side JSON export of detected elements.
///
/// The engine only guarantees that its response types serialize; persisting
/// them is this utility's job. Failures here are `ExportIo`, never an
/// engine-internal error.
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::GridSightResult;
use crate::grounding::types::DetectedElement;

#[derive(Debug, Serialize)]
struct ExportEnvelope<'a> {
    exported_at: DateTime<Utc>,
    instruction: &'a str,
    elements: &'a [DetectedElement],
}

/// Pretty-printed JSON for the final element list.
pub fn elements_to_json(instruction: &str, elements: &[DetectedElement]) -> GridSightResult<String> {
    let envelope = ExportEnvelope {
        exported_at: Utc::now(),
        instruction,
        elements,
    };
    Ok(serde_json::to_string_pretty(&envelope)?)
}

/// Write the element list to `path` as pretty-printed JSON.
pub fn export_elements(
    path: impl AsRef<Path>,
    instruction: &str,
    elements: &[DetectedElement],
) -> GridSightResult<()> {
    let path = path.as_ref();
    let json = elements_to_json(instruction, elements)?;
    std::fs::write(path, json)?;
    tracing::info!(path = %path.display(), count = elements.len(), "elements exported");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grounding::types::Rect;
    use uuid::Uuid;

    fn element(conf: f32) -> DetectedElement {
        DetectedElement {
            id: Uuid::new_v4(),
            bounding_box: Rect::new(10.0, 20.0, 100.0, 40.0),
            confidence: conf,
        }
    }

    #[test]
    fn json_contains_elements_and_instruction() {
        let json = elements_to_json("find button", &[element(0.8), element(0.6)]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["instruction"], "find button");
        assert_eq!(parsed["elements"].as_array().unwrap().len(), 2);
        assert_eq!(parsed["elements"][0]["bounding_box"]["x"], 10.0);
    }

    #[test]
    fn export_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elements.json");
        export_elements(&path, "find button", &[element(0.9)]).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"confidence\""));
    }

    #[test]
    fn unwritable_path_is_export_io() {
        let err = export_elements("/nonexistent-dir/out.json", "x", &[]).unwrap_err();
        assert!(matches!(err, crate::errors::GridSightError::ExportIo(_)));
    }
}
