//! Fast structural integrity check.
//!
//! Reads container and stream headers only (no frame decode), so some
//! frame-level damage goes unnoticed. It is cheap enough to run at every
//! checkpoint of a conversion: on the input, on the temporary artifact and
//! on the promoted output.

use std::path::Path;
use log::{debug, error, info};
use serde_json::Value;
use crate::ffprobe::run_ffprobe;

const VERIFY_ENTRIES: &[&str] = &["format=duration,size", "stream=codec_name,codec_type"];

/// Outcome of one integrity check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub valid: bool,
    pub diagnostic: Option<String>,
}

impl IntegrityReport {
    pub fn valid() -> Self {
        Self { valid: true, diagnostic: None }
    }

    pub fn invalid(diagnostic: impl Into<String>) -> Self {
        Self { valid: false, diagnostic: Some(diagnostic.into()) }
    }

    /// Diagnostic text, or a placeholder when the check passed
    pub fn describe(&self) -> &str {
        self.diagnostic.as_deref().unwrap_or("ok")
    }
}

/// Classify ffprobe's structural JSON. Valid iff it parses, carries both
/// `format` and `streams`, and lists at least one stream.
pub fn assess_structure(json: &str) -> IntegrityReport {
    let data: Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(_) => return IntegrityReport::invalid("Could not parse file metadata"),
    };

    let has_format = data.get("format").is_some();
    let stream_count = data
        .get("streams")
        .and_then(Value::as_array)
        .map(|s| s.len())
        .unwrap_or(0);

    if has_format && stream_count > 0 {
        IntegrityReport::valid()
    } else {
        IntegrityReport::invalid("File structure is invalid")
    }
}

/// Structural check of a media file through ffprobe, bounded by `timeout_secs`.
/// `label` prefixes every log line.
pub async fn verify_file(ffprobe_bin: &Path, path: &Path, timeout_secs: u64, label: &str) -> IntegrityReport {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("?");
    info!("{}Verifying file integrity: {}", label, name);

    let report = match run_ffprobe(ffprobe_bin, path, VERIFY_ENTRIES, timeout_secs).await {
        Ok(json) => assess_structure(&json),
        Err(e) => IntegrityReport::invalid(e.to_string()),
    };

    if report.valid {
        info!("{}✓ File integrity verified (fast check)", label);
    } else {
        error!("{}✗ File integrity check failed: {}", label, report.describe());
    }
    debug!("{}integrity report for {}: {:?}", label, path.display(), report);
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_metadata_with_streams_is_valid() {
        let json = r#"{"streams":[{"codec_type":"video","codec_name":"hevc"}],"format":{"duration":"10.0"}}"#;
        assert_eq!(assess_structure(json), IntegrityReport::valid());
    }

    #[test]
    fn zero_streams_is_invalid() {
        let report = assess_structure(r#"{"streams":[],"format":{}}"#);
        assert!(!report.valid);
        assert_eq!(report.describe(), "File structure is invalid");
    }

    #[test]
    fn missing_format_is_invalid() {
        let report = assess_structure(r#"{"streams":[{"codec_type":"audio"}]}"#);
        assert!(!report.valid);
    }

    #[test]
    fn garbage_output_is_invalid() {
        let report = assess_structure("moov atom not found");
        assert!(!report.valid);
        assert_eq!(report.describe(), "Could not parse file metadata");
    }

    #[tokio::test]
    async fn missing_binary_yields_invalid_with_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("movie.mkv");
        std::fs::write(&file, b"not really a movie").unwrap();

        let report = verify_file(Path::new("/nonexistent/ffprobe"), &file, 5, "[test] ").await;
        assert!(!report.valid);
        assert!(report.diagnostic.unwrap().contains("Failed to execute ffprobe"));
    }
}
