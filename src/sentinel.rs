//! Out-of-band lines the transcription worker prints for its parent.
//!
//! `DURATION: <seconds>` once near startup, `RESULT: <json>` exactly once at
//! the end. The result payload is a single-line JSON object decoded against
//! the fixed `JobResult` schema.

use crate::error::ToolError;
use crate::job::JobResult;

pub const DURATION_PREFIX: &str = "DURATION:";
pub const RESULT_PREFIX: &str = "RESULT:";

pub fn encode_duration(seconds: f64) -> String {
    format!("{DURATION_PREFIX} {seconds}")
}

pub fn encode_result(result: &JobResult) -> Result<String, ToolError> {
    let json = serde_json::to_string(result)
        .map_err(|e| ToolError::parse(&result.message, e.to_string()))?;
    Ok(format!("{RESULT_PREFIX} {json}"))
}

pub fn decode_duration(payload: &str) -> Result<f64, ToolError> {
    let text = payload.trim();
    match text.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Ok(seconds),
        _ => Err(ToolError::parse(text, "invalid duration")),
    }
}

pub fn decode_result(payload: &str) -> Result<JobResult, ToolError> {
    let text = payload.trim();
    serde_json::from_str(text).map_err(|e| ToolError::parse(text, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn result_line_is_single_line_json() {
        let result = JobResult::succeeded("done", Some(PathBuf::from("/m/a\nb.txt")));
        let line = encode_result(&result).unwrap();
        assert!(line.starts_with("RESULT: {"));
        assert!(!line.contains('\n'));
        let payload = line.strip_prefix(RESULT_PREFIX).unwrap();
        assert_eq!(decode_result(payload).unwrap(), result);
    }

    #[test]
    fn python_dict_syntax_is_rejected() {
        assert!(decode_result("{'success': True, 'message': 'x'}").is_err());
        assert!(decode_result("__import__('os').system('x')").is_err());
    }

    #[test]
    fn missing_required_field_is_rejected() {
        assert!(decode_result(r#"{"success": true}"#).is_err());
    }

    #[test]
    fn duration_round_trip() {
        let line = encode_duration(120.5);
        assert_eq!(line, "DURATION: 120.5");
        let payload = line.strip_prefix(DURATION_PREFIX).unwrap();
        assert_eq!(decode_duration(payload).unwrap(), 120.5);
        assert!(decode_duration("abc").is_err());
    }
}
