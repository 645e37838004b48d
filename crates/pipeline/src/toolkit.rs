use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::Result;
use async_trait::async_trait;
use crate::config::PipelineConfig;
use crate::ffmpeg::{build_remux_args, execute_ffmpeg, TranscodeResult};
use crate::probe::{probe_file, MediaFile};
use crate::verify::{verify_file, IntegrityReport};

/// External media tools used by the executor
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Structural integrity check; `label` prefixes log lines
    async fn verify(&self, path: &Path, label: &str) -> IntegrityReport;

    /// Full metadata probe; None when unreadable or without video
    async fn probe(&self, path: &Path) -> Option<MediaFile>;

    /// Write the converted artifact to `output`
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        media: &MediaFile,
        label: &str,
    ) -> Result<TranscodeResult>;
}

/// Toolkit backed by the ffprobe and ffmpeg binaries
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    ffmpeg_bin: PathBuf,
    config: PipelineConfig,
}

impl FfmpegToolkit {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            config: config.clone(),
        }
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn verify(&self, path: &Path, label: &str) -> IntegrityReport {
        verify_file(&self.config.ffprobe_bin, path, self.config.verify_timeout_secs, label).await
    }

    async fn probe(&self, path: &Path) -> Option<MediaFile> {
        probe_file(&self.config, path).await
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        media: &MediaFile,
        label: &str,
    ) -> Result<TranscodeResult> {
        let args = build_remux_args(input, output, &media.video_codec);
        execute_ffmpeg(
            &self.ffmpeg_bin,
            &args,
            self.config.transcode_timeout_secs,
            Duration::from_secs(self.config.progress_log_interval_secs.max(1)),
            label,
        )
        .await
    }
}
