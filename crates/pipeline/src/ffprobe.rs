use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tokio::process::Command;

/// Complete ffprobe output structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FFProbeData {
    #[serde(default)]
    pub streams: Vec<FFProbeStream>,
    pub format: Option<FFProbeFormat>,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FFProbeFormat {
    #[serde(default)]
    pub format_name: String,
    pub duration: Option<String>,
    pub size: Option<String>,
    pub bit_rate: Option<String>,
    pub tags: Option<HashMap<String, String>>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FFProbeStream {
    #[serde(default)]
    pub index: i32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub codec_tag_string: Option<String>,
    pub profile: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub tags: Option<HashMap<String, String>>,
    pub bit_rate: Option<String>,
    pub pix_fmt: Option<String>,
    pub bits_per_raw_sample: Option<String>,
    pub color_transfer: Option<String>,
    pub color_primaries: Option<String>,
    pub color_space: Option<String>,
    #[serde(default)]
    pub side_data_list: Vec<SideData>,
}

/// One entry of a stream's `side_data_list`. Only the type is typed;
/// the remaining keys vary per side-data kind.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SideData {
    #[serde(default)]
    pub side_data_type: String,
    #[serde(flatten)]
    pub fields: HashMap<String, serde_json::Value>,
}

impl FFProbeData {
    /// Parse ffprobe's JSON stdout
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse ffprobe JSON")
    }

    /// First video stream in container order
    pub fn primary_video(&self) -> Option<&FFProbeStream> {
        self.streams.iter().find(|s| s.is_kind("video"))
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.streams.iter().filter(|s| s.is_kind(kind)).count()
    }
}

/// Run ffprobe against a file with a hard timeout and return raw stdout.
///
/// `entries` selects `-show_entries` sections; an empty slice requests the
/// full `-show_format -show_streams` dump. A non-zero exit, empty stdout or
/// timeout is an error carrying ffprobe's stderr.
pub async fn run_ffprobe(
    ffprobe_bin: &Path,
    file_path: &Path,
    entries: &[&str],
    timeout_secs: u64,
) -> Result<String> {
    use log::debug;

    if !file_path.exists() {
        return Err(anyhow!("File does not exist: {}", file_path.display()));
    }

    let mut cmd = Command::new(ffprobe_bin);
    cmd.arg("-v").arg("error");
    if entries.is_empty() {
        cmd.arg("-show_format").arg("-show_streams");
    } else {
        for entry in entries {
            cmd.arg("-show_entries").arg(entry);
        }
    }
    cmd.arg("-of")
        .arg("json")
        .arg(file_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("ffprobe: {} (entries: {:?})", file_path.display(), entries);

    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| anyhow!("ffprobe timed out after {}s", timeout_secs))?
        .with_context(|| format!(
            "Failed to execute ffprobe at {} for {}",
            ffprobe_bin.display(),
            file_path.display()
        ))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);
        let detail = stderr.trim();
        return Err(anyhow!(
            "ffprobe failed (exit code {}): {}",
            exit_code,
            if detail.is_empty() { "Unknown error" } else { detail }
        ));
    }

    let json_str = String::from_utf8(output.stdout)
        .context("ffprobe output is not valid UTF-8")?;
    if json_str.trim().is_empty() {
        return Err(anyhow!("ffprobe produced no output"));
    }

    Ok(json_str)
}

/// Bit depth of video content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitDepth {
    Bit8,
    Bit10,
    Bit12,
}

impl BitDepth {
    pub fn bits(&self) -> u8 {
        match self {
            BitDepth::Bit8 => 8,
            BitDepth::Bit10 => 10,
            BitDepth::Bit12 => 12,
        }
    }
}

impl FFProbeStream {
    pub fn is_kind(&self, kind: &str) -> bool {
        self.codec_type.as_deref() == Some(kind)
    }

    /// Detect bit depth from stream metadata
    /// Checks bits_per_raw_sample first, then the pixel format, then PQ/HLG transfer
    pub fn detect_bit_depth(&self) -> BitDepth {
        if let Some(ref bits) = self.bits_per_raw_sample {
            match bits.as_str() {
                "12" => return BitDepth::Bit12,
                "10" => return BitDepth::Bit10,
                "8" => return BitDepth::Bit8,
                _ => {}
            }
        }

        if let Some(ref pix_fmt) = self.pix_fmt {
            let fmt_lower = pix_fmt.to_lowercase();
            if fmt_lower.contains("12") {
                return BitDepth::Bit12;
            }
            if fmt_lower.contains("10") || fmt_lower.contains("p010") {
                return BitDepth::Bit10;
            }
        }

        // PQ and HLG masters are never 8-bit
        if let Some(ref transfer) = self.color_transfer {
            let t = transfer.to_lowercase();
            if t.contains("smpte2084") || t.contains("arib-std-b67") {
                return BitDepth::Bit10;
            }
        }

        BitDepth::Bit8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "hevc", "profile": "Main 10",
             "width": 3840, "height": 2160, "pix_fmt": "yuv420p10le",
             "color_transfer": "smpte2084", "color_primaries": "bt2020",
             "side_data_list": [
                {"side_data_type": "Mastering display metadata", "max_luminance": "10000000/10000"},
                {"side_data_type": "Content light level metadata", "max_content": 1000}
             ]},
            {"index": 1, "codec_type": "audio", "codec_name": "truehd"},
            {"index": 2, "codec_type": "audio", "codec_name": "ac3"},
            {"index": 3, "codec_type": "subtitle", "codec_name": "subrip"}
        ],
        "format": {"format_name": "matroska,webm", "duration": "7200.5", "size": "1000", "bit_rate": "40000000"}
    }"#;

    #[test]
    fn parses_streams_side_data_and_format() {
        let data = FFProbeData::from_json(SAMPLE).unwrap();
        assert_eq!(data.streams.len(), 4);
        assert_eq!(data.count_kind("audio"), 2);
        assert_eq!(data.count_kind("subtitle"), 1);

        let video = data.primary_video().unwrap();
        assert_eq!(video.codec_name.as_deref(), Some("hevc"));
        assert_eq!(video.side_data_list.len(), 2);
        assert_eq!(video.side_data_list[0].side_data_type, "Mastering display metadata");
        assert_eq!(
            video.side_data_list[0].fields.get("max_luminance").and_then(|v| v.as_str()),
            Some("10000000/10000")
        );
        assert_eq!(data.format.unwrap().duration.as_deref(), Some("7200.5"));
    }

    #[test]
    fn missing_sections_are_tolerated() {
        let data = FFProbeData::from_json("{}").unwrap();
        assert!(data.streams.is_empty());
        assert!(data.format.is_none());
        assert!(data.primary_video().is_none());
    }

    #[test]
    fn bit_depth_prefers_raw_sample_then_pix_fmt() {
        let mut stream = FFProbeStream {
            bits_per_raw_sample: Some("8".to_string()),
            pix_fmt: Some("yuv420p10le".to_string()),
            ..Default::default()
        };
        assert_eq!(stream.detect_bit_depth(), BitDepth::Bit8);

        stream.bits_per_raw_sample = None;
        assert_eq!(stream.detect_bit_depth(), BitDepth::Bit10);

        stream.pix_fmt = Some("yuv420p".to_string());
        stream.color_transfer = Some("arib-std-b67".to_string());
        assert_eq!(stream.detect_bit_depth(), BitDepth::Bit10);

        stream.color_transfer = None;
        assert_eq!(stream.detect_bit_depth(), BitDepth::Bit8);
    }

    #[tokio::test]
    async fn probing_a_missing_file_fails_fast() {
        let err = run_ffprobe(Path::new("ffprobe"), Path::new("/nonexistent/file.mkv"), &[], 5)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
