//! Parsing of caller-supplied payload documents.

use crate::error::{StoreError, StoreResult};
use crate::types::Payload;

/// Parse JSON text into a payload.
///
/// Blank text is an absent payload. Anything else must be a well-formed JSON
/// document; `{}` is kept as an explicit empty document.
pub fn parse_document(raw: &str) -> StoreResult<Payload> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(raw)
        .map(Some)
        .map_err(|e| StoreError::InvalidInput(format!("malformed payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_is_absent() {
        assert_eq!(parse_document("").unwrap(), None);
        assert_eq!(parse_document("  \n").unwrap(), None);
    }

    #[test]
    fn empty_object_is_explicit() {
        assert_eq!(parse_document("{}").unwrap(), Some(json!({})));
    }

    #[test]
    fn document_is_kept_verbatim() {
        let parsed = parse_document(r#"{"cpu": 4, "tags": ["a", "b"]}"#).unwrap();
        assert_eq!(parsed, Some(json!({"cpu": 4, "tags": ["a", "b"]})));
    }

    #[test]
    fn malformed_is_invalid_input() {
        let err = parse_document("{\"cpu\":").unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }
}
