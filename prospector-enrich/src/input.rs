//! JSON input adapter
//!
//! Reads a JSON array of record field objects. Unknown keys are kept in
//! `RecordFields::extra`.

use crate::error::{PipelineError, PipelineResult};
use crate::types::RecordFields;
use std::path::Path;
use tracing::info;

/// Parse records from JSON text
pub fn parse_records(json: &str) -> PipelineResult<Vec<RecordFields>> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let serde_json::Value::Array(items) = value else {
        return Err(PipelineError::Input(
            "expected a JSON array of records".to_string(),
        ));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            if !item.is_object() {
                return Err(PipelineError::Input(format!(
                    "record {} is not a JSON object",
                    index
                )));
            }
            serde_json::from_value(item)
                .map_err(|e| PipelineError::Input(format!("record {}: {}", index, e)))
        })
        .collect()
}

/// Load records from a JSON file
pub fn load_records(path: &Path) -> PipelineResult<Vec<RecordFields>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::Input(format!("failed to read {}: {}", path.display(), e))
    })?;
    let records = parse_records(&content)?;
    info!(path = %path.display(), records = records.len(), "Loaded input records");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_records_keeps_extra_fields() {
        let records = parse_records(
            r#"[
                {"company_name": "Acme Plumbing", "domain": "acme.com", "employee_count": 12, "source_list": "trade-show"},
                {"company_name": "Bolt Electric"}
            ]"#,
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].domain.as_deref(), Some("acme.com"));
        assert_eq!(records[0].employee_count, Some(12));
        assert_eq!(
            records[0].extra.get("source_list").and_then(|v| v.as_str()),
            Some("trade-show")
        );
        assert!(records[1].domain.is_none());
    }

    #[test]
    fn test_parse_rejects_non_array() {
        let err = parse_records(r#"{"company_name": "Acme"}"#).unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
    }

    #[test]
    fn test_parse_rejects_non_object_item() {
        let err = parse_records(r#"[{"company_name": "Acme"}, 42]"#).unwrap_err();
        assert!(err.to_string().contains("record 1"));
    }

    #[test]
    fn test_empty_array_is_valid() {
        assert!(parse_records("[]").unwrap().is_empty());
    }

    #[test]
    fn test_load_records_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"domain": "https://www.example.org/"}}]"#).unwrap();
        let records = load_records(file.path()).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_missing_file_is_input_error() {
        let err = load_records(Path::new("/nonexistent/records.json")).unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
    }
}
