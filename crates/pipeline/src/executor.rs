//! Single-file conversion state machine.
//!
//! ```text
//! Start -> InputVerified -> Probed -> Planned -> Converting -> SizeChecked
//!       -> OutputVerified -> Promoted -> OriginalRemoved -> Done
//! ```
//!
//! Every state can fail. An infeasible plan skips. A problem after promotion
//! leaves both files on disk and asks for manual review. The original is only
//! deleted after the promoted file was re-probed and re-verified at its final
//! path.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{bail, Result};
use log::{debug, error, info, warn};
use thiserror::Error;
use crate::context::RunContext;
use crate::ledger::{CorruptionEvent, OutcomeKind};
use crate::planner::{ConversionDecision, ConversionPlanner};
use crate::probe::MediaFile;
use crate::recovery::{RemediationStatus, Remediator};
use crate::scan::is_mkv;
use crate::sidecar;
use crate::toolkit::MediaToolkit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Start,
    InputVerified,
    Probed,
    Planned,
    Converting,
    SizeChecked,
    OutputVerified,
    Promoted,
    OriginalRemoved,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::InputVerified => "input_verification",
            Stage::Probed => "probe",
            Stage::Planned => "planning",
            Stage::Converting => "conversion",
            Stage::SizeChecked => "size_check",
            Stage::OutputVerified => "output_verification",
            Stage::Promoted => "promotion",
            Stage::OriginalRemoved => "final_verification",
            Stage::Done => "completed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hard failures. The original file is always left in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("input file is corrupted or unreadable")]
    InputCorrupt,
    #[error("cannot read video streams")]
    UnreadableStreams,
    #[error("conversion process failed")]
    ConversionProcessFailed,
    #[error("output file too small")]
    OutputTooSmall,
    #[error("output file failed integrity check")]
    OutputCorrupt,
    #[error("promoted output could not be confirmed")]
    PromotionFailed,
}

impl FailureReason {
    pub fn outcome_kind(&self) -> OutcomeKind {
        match self {
            FailureReason::InputCorrupt => OutcomeKind::InputCorrupt,
            FailureReason::UnreadableStreams => OutcomeKind::UnreadableStreams,
            FailureReason::ConversionProcessFailed => OutcomeKind::ConversionProcessFailed,
            FailureReason::OutputTooSmall => OutcomeKind::OutputTooSmall,
            FailureReason::OutputCorrupt => OutcomeKind::OutputCorrupt,
            FailureReason::PromotionFailed => OutcomeKind::PromotionFailed,
        }
    }

    /// State whose transition detected the failure
    pub fn stage(&self) -> Stage {
        match self {
            FailureReason::InputCorrupt => Stage::InputVerified,
            FailureReason::UnreadableStreams => Stage::Probed,
            FailureReason::ConversionProcessFailed => Stage::Converting,
            FailureReason::OutputTooSmall => Stage::SizeChecked,
            FailureReason::OutputCorrupt => Stage::OutputVerified,
            FailureReason::PromotionFailed => Stage::Promoted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Planner refused; the release is fine, just too costly
    Infeasible,
    /// Conversion succeeded but the promoted file could not be re-confirmed
    ManualReviewRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnchangedReason {
    NotMkv,
    AlreadyConverted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done,
    Failed { reason: FailureReason, diagnostic: String },
    Skipped { reason: SkipReason, diagnostic: String },
    Unchanged(UnchangedReason),
}

impl Outcome {
    fn failed(reason: FailureReason, diagnostic: impl Into<String>) -> Self {
        Outcome::Failed { reason, diagnostic: diagnostic.into() }
    }

    fn manual_review(diagnostic: impl Into<String>) -> Self {
        Outcome::Skipped {
            reason: SkipReason::ManualReviewRequired,
            diagnostic: diagnostic.into(),
        }
    }

    /// 0 for done or nothing-to-do, 1 for any failure or skip
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Done | Outcome::Unchanged(_) => 0,
            Outcome::Failed { .. } | Outcome::Skipped { .. } => 1,
        }
    }

    /// Ledger outcome, None for outcomes that are never recorded
    pub fn ledger_kind(&self) -> Option<OutcomeKind> {
        match self {
            Outcome::Done => Some(OutcomeKind::Success),
            Outcome::Failed { reason, .. } => Some(reason.outcome_kind()),
            Outcome::Skipped { reason: SkipReason::ManualReviewRequired, .. } => {
                Some(OutcomeKind::ManualReviewRequired)
            }
            Outcome::Skipped { reason: SkipReason::Infeasible, .. } | Outcome::Unchanged(_) => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Outcome::Done => "conversion complete".to_string(),
            Outcome::Failed { reason, diagnostic } => format!("{}: {}", reason, diagnostic),
            Outcome::Skipped { reason, diagnostic } => format!("{:?}: {}", reason, diagnostic),
            Outcome::Unchanged(UnchangedReason::NotMkv) => "not an MKV file".to_string(),
            Outcome::Unchanged(UnchangedReason::AlreadyConverted) => "MP4 already exists".to_string(),
        }
    }
}

/// Everything known about one run once it reached a terminal state
#[derive(Debug, Clone)]
pub struct RunReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub outcome: Outcome,
    /// Last state successfully reached
    pub stage: Stage,
    pub media: Option<MediaFile>,
    pub decision: Option<ConversionDecision>,
    pub event_id: Option<i64>,
    pub remediation: Option<RemediationStatus>,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }

    pub fn output_exists(&self) -> bool {
        self.output.exists()
    }
}

pub fn output_path_for(input: &Path) -> PathBuf {
    input.with_extension("mp4")
}

/// Sibling temp artifact for a final output path (`X.mp4` -> `X.mp4.tmp.mp4`)
pub fn temp_path_for(output: &Path) -> PathBuf {
    let mut name = OsString::from(output.as_os_str());
    name.push(".tmp.mp4");
    PathBuf::from(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeVerdict {
    Ok,
    TooSmall,
    /// Larger than expected for a remux; accepted with a warning
    Oversized,
}

/// Output/input size ratio and its verdict. Both bounds are inclusive.
pub fn check_size_ratio(input_bytes: u64, output_bytes: u64, min_ratio: f64, max_ratio: f64) -> (f64, SizeVerdict) {
    if input_bytes == 0 {
        return (0.0, SizeVerdict::TooSmall);
    }
    let ratio = output_bytes as f64 / input_bytes as f64;
    let verdict = if ratio < min_ratio {
        SizeVerdict::TooSmall
    } else if ratio > max_ratio {
        SizeVerdict::Oversized
    } else {
        SizeVerdict::Ok
    };
    (ratio, verdict)
}

fn gib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

fn remove_if_exists(path: &Path, prefix: &str) {
    if path.exists() {
        match fs::remove_file(path) {
            Ok(()) => debug!("{}Removed temp file: {}", prefix, path.display()),
            Err(e) => warn!("{}Could not remove {}: {}", prefix, path.display(), e),
        }
    }
}

/// Mutable facts accumulated while walking the states
#[derive(Debug, Default)]
struct Progress {
    stage: Option<Stage>,
    media: Option<MediaFile>,
    final_media: Option<MediaFile>,
    decision: Option<ConversionDecision>,
    tool_output: Option<String>,
}

impl Progress {
    fn stage(&self) -> Stage {
        self.stage.unwrap_or(Stage::Start)
    }
}

pub struct ConversionExecutor<'a> {
    ctx: &'a RunContext,
    toolkit: &'a dyn MediaToolkit,
    remediator: Option<&'a dyn Remediator>,
    planner: ConversionPlanner,
}

impl<'a> ConversionExecutor<'a> {
    pub fn new(ctx: &'a RunContext, toolkit: &'a dyn MediaToolkit) -> Self {
        Self {
            ctx,
            toolkit,
            remediator: None,
            planner: ConversionPlanner::new(ctx.config.codec_policies.clone()),
        }
    }

    pub fn with_remediator(mut self, remediator: &'a dyn Remediator) -> Self {
        self.remediator = Some(remediator);
        self
    }

    fn advance(&self, progress: &mut Progress, stage: Stage) {
        debug!("{}{} -> {:?}", self.ctx.log_prefix(), progress.stage(), stage);
        progress.stage = Some(stage);
    }

    /// Convert one file. `Err` is reserved for operational problems (missing
    /// input); every pipeline outcome is reported through `RunReport`.
    pub async fn run(&self, input: &Path) -> Result<RunReport> {
        let prefix = self.ctx.log_prefix();
        if !input.exists() {
            bail!("File not found: {}", input.display());
        }
        let output = output_path_for(input);

        let unchanged = |reason| RunReport {
            input: input.to_path_buf(),
            output: output.clone(),
            outcome: Outcome::Unchanged(reason),
            stage: Stage::Start,
            media: None,
            decision: None,
            event_id: None,
            remediation: None,
        };

        if !is_mkv(input) {
            info!("{}Not an MKV file, skipping: {}", prefix, input.display());
            return Ok(unchanged(UnchangedReason::NotMkv));
        }
        if output.exists() {
            info!("{}MP4 already exists, skipping: {}", prefix, output.display());
            return Ok(unchanged(UnchangedReason::AlreadyConverted));
        }

        let mut progress = Progress::default();
        let outcome = self.execute(input, &output, &mut progress).await;

        match &outcome {
            Outcome::Done => info!("{}✅ Conversion complete: {}", prefix, output.display()),
            Outcome::Failed { reason, diagnostic } => {
                error!("{}❌ {} at {}: {}", prefix, reason, reason.stage(), diagnostic)
            }
            Outcome::Skipped { reason, diagnostic } => {
                warn!("{}⚠️ Skipped ({:?}): {}", prefix, reason, diagnostic)
            }
            Outcome::Unchanged(_) => {}
        }

        let event_id = self.record(input, &output, &outcome, &progress);
        let remediation = match &outcome {
            Outcome::Failed { .. } => self.remediate(input, &outcome, event_id).await,
            _ => None,
        };

        Ok(RunReport {
            input: input.to_path_buf(),
            output,
            outcome,
            stage: progress.stage(),
            media: progress.media,
            decision: progress.decision,
            event_id,
            remediation,
        })
    }

    async fn execute(&self, input: &Path, output: &Path, progress: &mut Progress) -> Outcome {
        let prefix = self.ctx.log_prefix();
        let cfg = &self.ctx.config;
        progress.stage = Some(Stage::Start);

        // Start -> InputVerified
        info!("{}Step 1: Verifying input file", prefix);
        let report = self.toolkit.verify(input, &prefix).await;
        if !report.valid {
            return Outcome::failed(FailureReason::InputCorrupt, report.describe());
        }
        self.advance(progress, Stage::InputVerified);

        // -> Probed
        info!("{}Step 2: Analyzing file properties", prefix);
        let Some(media) = self.toolkit.probe(input).await else {
            return Outcome::failed(FailureReason::UnreadableStreams, "Cannot read video streams");
        };
        info!(
            "{}Codec: {} | Resolution: {} | HDR: {} | Size: {:.2} GB | Duration: {:.1} min | Audio: {} | Subtitles: {}",
            prefix,
            media.video_codec,
            media.resolution(),
            media.hdr.format,
            gib(media.size_bytes),
            media.duration_secs / 60.0,
            media.audio_count,
            media.subtitle_count
        );
        progress.media = Some(media.clone());
        self.advance(progress, Stage::Probed);

        // -> Planned
        info!("{}Step 3: Evaluating conversion feasibility", prefix);
        let decision = self.planner.plan(&media);
        info!(
            "{}Estimated time: {:.1} minutes | Decision: {}",
            prefix, decision.estimated_minutes, decision.reason
        );
        progress.decision = Some(decision.clone());
        if !decision.feasible {
            if let Err(e) = sidecar::write_skip(input, &decision.reason) {
                warn!("{}{:#}", prefix, e);
            }
            return Outcome::Skipped {
                reason: SkipReason::Infeasible,
                diagnostic: decision.reason,
            };
        }
        self.advance(progress, Stage::Planned);

        // -> Converting
        info!("{}Step 4: Converting to MP4", prefix);
        let temp = temp_path_for(output);
        if temp.exists() {
            warn!("{}Removing existing temp file: {}", prefix, temp.display());
            remove_if_exists(&temp, &prefix);
        }
        self.advance(progress, Stage::Converting);
        match self.toolkit.transcode(input, &temp, &media, &prefix).await {
            Ok(result) if result.success => {
                progress.tool_output = Some(result.output_tail);
            }
            Ok(result) => {
                remove_if_exists(&temp, &prefix);
                progress.tool_output = Some(result.output_tail);
                return Outcome::failed(
                    FailureReason::ConversionProcessFailed,
                    format!("ffmpeg failed with return code {}", result.exit_code.unwrap_or(-1)),
                );
            }
            Err(e) => {
                remove_if_exists(&temp, &prefix);
                return Outcome::failed(FailureReason::ConversionProcessFailed, format!("{:#}", e));
            }
        }
        let output_bytes = match fs::metadata(&temp) {
            Ok(m) => m.len(),
            Err(_) => {
                return Outcome::failed(FailureReason::ConversionProcessFailed, "Output file not created");
            }
        };

        // -> SizeChecked
        let input_bytes = fs::metadata(input).map(|m| m.len()).unwrap_or(media.size_bytes);
        let (ratio, verdict) =
            check_size_ratio(input_bytes, output_bytes, cfg.min_output_ratio, cfg.max_output_ratio);
        info!(
            "{}Input size: {:.2} GB | Output size: {:.2} GB | Size ratio: {:.2}%",
            prefix,
            gib(input_bytes),
            gib(output_bytes),
            ratio * 100.0
        );
        match verdict {
            SizeVerdict::TooSmall => {
                remove_if_exists(&temp, &prefix);
                return Outcome::failed(
                    FailureReason::OutputTooSmall,
                    format!("Output file too small ({:.1}% of input)", ratio * 100.0),
                );
            }
            SizeVerdict::Oversized => warn!(
                "{}⚠️ Output file larger than expected ({:.1}%), unusual for remux but continuing",
                prefix,
                ratio * 100.0
            ),
            SizeVerdict::Ok => {}
        }
        self.advance(progress, Stage::SizeChecked);

        // -> OutputVerified
        let report = self.toolkit.verify(&temp, &prefix).await;
        if !report.valid {
            remove_if_exists(&temp, &prefix);
            return Outcome::failed(FailureReason::OutputCorrupt, report.describe());
        }
        self.advance(progress, Stage::OutputVerified);

        // -> Promoted
        info!("{}All validation checks passed, moving temp file to: {}", prefix, output.display());
        if let Err(e) = fs::rename(&temp, output) {
            remove_if_exists(&temp, &prefix);
            return Outcome::failed(FailureReason::PromotionFailed, format!("rename failed: {}", e));
        }
        if !output.exists() {
            return Outcome::failed(FailureReason::PromotionFailed, "Final output missing after rename");
        }
        self.advance(progress, Stage::Promoted);

        // -> OriginalRemoved
        info!("{}Step 5: Removing original file", prefix);
        let Some(final_media) = self.toolkit.probe(output).await else {
            return Outcome::manual_review("Cannot probe promoted output, original kept");
        };
        progress.final_media = Some(final_media);
        let report = self.toolkit.verify(output, &prefix).await;
        if !report.valid {
            return Outcome::manual_review(format!(
                "Final integrity check failed, original kept: {}",
                report.describe()
            ));
        }
        if let Err(e) = fs::remove_file(input) {
            return Outcome::manual_review(format!("Could not delete original: {}", e));
        }
        info!("{}🗑️ Original file deleted: {}", prefix, input.display());
        self.advance(progress, Stage::OriginalRemoved);

        self.advance(progress, Stage::Done);
        Outcome::Done
    }

    /// Append the terminal outcome to the ledger, if one is wired in
    fn record(&self, input: &Path, output: &Path, outcome: &Outcome, progress: &Progress) -> Option<i64> {
        let ledger = self.ctx.ledger.as_ref()?;
        let kind = outcome.ledger_kind()?;

        let event = match outcome {
            Outcome::Done => CorruptionEvent::new(output, kind, Stage::Done.as_str())
                .with_media(progress.final_media.as_ref().or(progress.media.as_ref())),
            Outcome::Failed { reason, diagnostic } => {
                CorruptionEvent::new(input, kind, reason.stage().as_str())
                    .with_media(progress.media.as_ref())
                    .with_error(diagnostic.clone())
                    .with_tool_output(progress.tool_output.clone())
            }
            Outcome::Skipped { diagnostic, .. } => {
                CorruptionEvent::new(input, kind, Stage::OriginalRemoved.as_str())
                    .with_media(progress.media.as_ref())
                    .with_error(diagnostic.clone())
            }
            Outcome::Unchanged(_) => return None,
        };

        match ledger.record(&event) {
            Ok(id) => {
                debug!("{}Logged {} to corruption ledger (event {})", self.ctx.log_prefix(), kind, id);
                Some(id)
            }
            Err(e) => {
                warn!("{}Could not log to corruption ledger: {}", self.ctx.log_prefix(), e);
                None
            }
        }
    }

    async fn remediate(&self, input: &Path, outcome: &Outcome, event_id: Option<i64>) -> Option<RemediationStatus> {
        let prefix = self.ctx.log_prefix();
        let remediator = self.remediator?;

        info!("{}Initiating download manager recovery", prefix);
        match remediator.recover(input, &outcome.describe(), &prefix).await {
            Ok(status) => {
                info!(
                    "{}✅ Recovery completed (blocklisted: {}, search: {}, record removed: {})",
                    prefix, status.blocklisted, status.search_triggered, status.file_record_deleted
                );
                if let (Some(ledger), Some(id)) = (self.ctx.ledger.as_ref(), event_id) {
                    if let Err(e) = ledger.mark_remediation(id, status.blocklisted, status.search_triggered) {
                        warn!("{}Could not update remediation flags: {}", prefix, e);
                    }
                }
                Some(status)
            }
            Err(e) => {
                warn!("{}⚠️ Automatic recovery not available: {}", prefix, e);
                None
            }
        }
    }
}
