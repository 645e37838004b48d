use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use crate::config::PipelineConfig;
use crate::ffprobe::{run_ffprobe, FFProbeData, FFProbeStream};
use crate::release::ReleaseInfo;

/// High-dynamic-range signaling, ordered by rank. Classification only ever
/// moves up this order within one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HdrFormat {
    Sdr,
    Hdr10,
    Hlg,
    DolbyVision,
}

impl HdrFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            HdrFormat::Sdr => "SDR",
            HdrFormat::Hdr10 => "HDR10",
            HdrFormat::Hlg => "HLG",
            HdrFormat::DolbyVision => "Dolby Vision",
        }
    }
}

impl fmt::Display for HdrFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HdrInfo {
    pub format: HdrFormat,
    pub is_hdr: bool,
    pub master_display: Option<String>,
    /// Peak mastering luminance in nits
    pub max_luminance: Option<u32>,
}

impl Default for HdrInfo {
    fn default() -> Self {
        Self {
            format: HdrFormat::Sdr,
            is_hdr: false,
            master_display: None,
            max_luminance: None,
        }
    }
}

impl HdrInfo {
    pub fn is_dolby_vision(&self) -> bool {
        self.format == HdrFormat::DolbyVision
    }

    /// Raise the classification to `format`; lower-ranked signals are ignored
    fn upgrade(&mut self, format: HdrFormat) {
        if format > self.format {
            self.format = format;
        }
        if format != HdrFormat::Sdr {
            self.is_hdr = true;
        }
    }

    fn mark_hdr(&mut self) {
        self.is_hdr = true;
    }
}

/// One piece of HDR evidence found in probe metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdrSignal {
    DolbyVision,
    PqTransfer,
    HlgTransfer,
    WideGamut,
    MasteringDisplay,
    ContentLightLevel,
    HdrTag,
}

impl HdrInfo {
    /// Fold one signal into the classification
    pub fn apply(&mut self, signal: HdrSignal) {
        match signal {
            HdrSignal::DolbyVision => self.upgrade(HdrFormat::DolbyVision),
            HdrSignal::PqTransfer => self.upgrade(HdrFormat::Hdr10),
            HdrSignal::HlgTransfer => self.upgrade(HdrFormat::Hlg),
            HdrSignal::WideGamut | HdrSignal::HdrTag => self.upgrade(HdrFormat::Hdr10),
            HdrSignal::MasteringDisplay => self.upgrade(HdrFormat::Hdr10),
            HdrSignal::ContentLightLevel => self.mark_hdr(),
        }
    }
}

fn mentions_dolby(value: &str) -> bool {
    let v = value.to_lowercase();
    v.contains("dolby") || v.contains("dovi")
}

/// Collect HDR evidence from the primary video stream and container tags,
/// in detection order.
///
/// HDR transfers are `smpte2084` and `arib-std-b67` only; `bt2020-10` is left
/// out on purpose and stays SDR unless other evidence says otherwise.
pub fn hdr_signals(
    video: &FFProbeStream,
    format_tags: Option<&HashMap<String, String>>,
) -> Vec<HdrSignal> {
    let mut signals = Vec::new();

    let codec_says_dovi = [&video.codec_name, &video.codec_tag_string]
        .iter()
        .filter_map(|v| v.as_deref())
        .any(|v| {
            let v = v.to_lowercase();
            v.contains("dovi") || v.starts_with("dvh") || v.starts_with("dva")
        });
    let profile_says_dolby = video.profile.as_deref().map(mentions_dolby).unwrap_or(false);
    let side_data_says_dolby = video
        .side_data_list
        .iter()
        .any(|sd| mentions_dolby(&sd.side_data_type));
    let tags_say_dolby = format_tags
        .map(|tags| tags.iter().any(|(k, v)| mentions_dolby(k) || mentions_dolby(v)))
        .unwrap_or(false);
    if codec_says_dovi || profile_says_dolby || side_data_says_dolby || tags_say_dolby {
        signals.push(HdrSignal::DolbyVision);
    }

    if let Some(transfer) = video.color_transfer.as_deref() {
        let t = transfer.to_lowercase();
        if t.contains("arib-std-b67") {
            signals.push(HdrSignal::HlgTransfer);
        } else if t.contains("smpte2084") {
            signals.push(HdrSignal::PqTransfer);
        }
    }

    if video
        .color_primaries
        .as_deref()
        .map(|p| p.to_lowercase().contains("bt2020"))
        .unwrap_or(false)
    {
        signals.push(HdrSignal::WideGamut);
    }

    let side_data_types: Vec<String> =
        video.side_data_list.iter().map(|sd| sd.side_data_type.to_lowercase()).collect();
    if side_data_types.iter().any(|t| t.contains("mastering display")) {
        signals.push(HdrSignal::MasteringDisplay);
    }
    if side_data_types.iter().any(|t| t.contains("content light level")) {
        signals.push(HdrSignal::ContentLightLevel);
    }

    if format_tags
        .map(|tags| tags.iter().any(|(k, v)| k.to_lowercase().contains("hdr") || v.to_lowercase().contains("hdr")))
        .unwrap_or(false)
    {
        signals.push(HdrSignal::HdrTag);
    }

    signals
}

/// Parse ffprobe rationals such as `"10000000/10000"` or plain numbers
fn parse_rational(value: &serde_json::Value) -> Option<f64> {
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    match text.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => text.trim().parse().ok(),
    }
}

pub fn classify_hdr(
    video: &FFProbeStream,
    format_tags: Option<&HashMap<String, String>>,
) -> HdrInfo {
    let mut info = HdrInfo::default();
    for signal in hdr_signals(video, format_tags) {
        info.apply(signal);
    }

    if let Some(mastering) = video
        .side_data_list
        .iter()
        .find(|sd| sd.side_data_type.to_lowercase().contains("mastering display"))
    {
        info.master_display = serde_json::to_string(&mastering.fields).ok();
        info.max_luminance = mastering
            .fields
            .get("max_luminance")
            .and_then(parse_rational)
            .map(|nits| nits.round() as u32);
    }

    info
}

/// Immutable snapshot of a media file taken at probe time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    pub path: PathBuf,
    pub container: String,
    pub video_codec: String,
    pub profile: Option<String>,
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
    pub size_bytes: u64,
    pub bit_rate: Option<u64>,
    pub bit_depth: u8,
    pub color_space: Option<String>,
    pub color_transfer: Option<String>,
    pub color_primaries: Option<String>,
    pub audio_codecs: Vec<String>,
    pub audio_count: usize,
    pub subtitle_count: usize,
    pub hdr: HdrInfo,
    pub release: ReleaseInfo,
}

impl MediaFile {
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    pub fn duration_hours(&self) -> f64 {
        self.duration_secs / 3600.0
    }

    /// Build a snapshot from parsed ffprobe output. Returns None without a video stream.
    pub fn from_probe(path: &Path, data: &FFProbeData, fs_size: Option<u64>) -> Option<Self> {
        let video = data.primary_video()?;
        let format = data.format.clone().unwrap_or_default();

        let audio_codecs = data
            .streams
            .iter()
            .filter(|s| s.is_kind("audio"))
            .filter_map(|s| s.codec_name.clone())
            .collect();

        let size_bytes = format
            .size
            .as_deref()
            .and_then(|s| s.parse().ok())
            .or(fs_size)
            .unwrap_or(0);

        Some(MediaFile {
            path: path.to_path_buf(),
            container: format.format_name.clone(),
            video_codec: video.codec_name.clone().unwrap_or_else(|| "unknown".to_string()),
            profile: video.profile.clone(),
            width: video.width.unwrap_or(0).max(0) as u32,
            height: video.height.unwrap_or(0).max(0) as u32,
            duration_secs: format.duration.as_deref().and_then(|d| d.parse().ok()).unwrap_or(0.0),
            size_bytes,
            bit_rate: format.bit_rate.as_deref().and_then(|b| b.parse().ok()),
            bit_depth: video.detect_bit_depth().bits(),
            color_space: video.color_space.clone(),
            color_transfer: video.color_transfer.clone(),
            color_primaries: video.color_primaries.clone(),
            audio_codecs,
            audio_count: data.count_kind("audio"),
            subtitle_count: data.count_kind("subtitle"),
            hdr: classify_hdr(video, format.tags.as_ref()),
            release: ReleaseInfo::from_path(path),
        })
    }
}

/// Probe a file with ffprobe. None when the tool fails, times out, or the
/// file has no video stream.
pub async fn probe_file(cfg: &PipelineConfig, path: &Path) -> Option<MediaFile> {
    let json = match run_ffprobe(&cfg.ffprobe_bin, path, &[], cfg.probe_timeout_secs).await {
        Ok(json) => json,
        Err(e) => {
            warn!("Probe failed for {}: {:#}", path.display(), e);
            return None;
        }
    };

    let data = match FFProbeData::from_json(&json) {
        Ok(data) => data,
        Err(e) => {
            warn!("Probe output unreadable for {}: {:#}", path.display(), e);
            return None;
        }
    };

    let fs_size = std::fs::metadata(path).ok().map(|m| m.len());
    let media = MediaFile::from_probe(path, &data, fs_size);
    match &media {
        Some(m) => debug!(
            "Probed {}: {} {} {} ({:.1} min, {} audio, {} subs)",
            path.display(),
            m.video_codec,
            m.resolution(),
            m.hdr.format,
            m.duration_secs / 60.0,
            m.audio_count,
            m.subtitle_count
        ),
        None => warn!("No video stream found in {}", path.display()),
    }
    media
}
