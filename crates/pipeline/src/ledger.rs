//! Corruption ledger: an append-only fact table of conversion outcomes plus
//! per-publisher and per-format rollups maintained in the same transaction.
//!
//! The ledger is single-writer. Every call opens its own connection, so a
//! `SqliteLedger` can be shared freely, but concurrent writers rely on
//! SQLite's busy timeout rather than any locking of ours.

use std::fmt;
use std::path::{Path, PathBuf};
use chrono::Utc;
use log::debug;
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::probe::MediaFile;
use crate::release::ReleaseInfo;

const LEDGER_SCHEMA: &str = include_str!("../sql/ledger.sql");

/// SQLite timestamp layout, comparable with `datetime('now', ...)`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to open ledger at {path}: {source}")]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },
    #[error("ledger event {id} not found")]
    NotFound { id: i64 },
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Terminal outcome recorded for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeKind {
    Success,
    InputCorrupt,
    UnreadableStreams,
    ConversionProcessFailed,
    OutputTooSmall,
    OutputCorrupt,
    PromotionFailed,
    ManualReviewRequired,
}

/// Coarse status stored next to the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    Success,
    Corrupted,
    Failed,
    ManualReview,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Success => "success",
            EventStatus::Corrupted => "corrupted",
            EventStatus::Failed => "failed",
            EventStatus::ManualReview => "manual_review",
        }
    }
}

impl OutcomeKind {
    /// Value of the `corruption_type` column
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "none",
            OutcomeKind::InputCorrupt => "input_corrupt",
            OutcomeKind::UnreadableStreams => "unreadable_streams",
            OutcomeKind::ConversionProcessFailed => "conversion_failed",
            OutcomeKind::OutputTooSmall => "output_too_small",
            OutcomeKind::OutputCorrupt => "output_corrupt",
            OutcomeKind::PromotionFailed => "promotion_failed",
            OutcomeKind::ManualReviewRequired => "manual_review_required",
        }
    }

    pub fn status(&self) -> EventStatus {
        match self {
            OutcomeKind::Success => EventStatus::Success,
            OutcomeKind::InputCorrupt | OutcomeKind::OutputCorrupt | OutcomeKind::OutputTooSmall => {
                EventStatus::Corrupted
            }
            OutcomeKind::UnreadableStreams
            | OutcomeKind::ConversionProcessFailed
            | OutcomeKind::PromotionFailed => EventStatus::Failed,
            OutcomeKind::ManualReviewRequired => EventStatus::ManualReview,
        }
    }

    /// Whether this outcome counts against the publisher/format in rollups
    pub fn counts_as_corrupted(&self) -> bool {
        matches!(self.status(), EventStatus::Corrupted | EventStatus::Failed)
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger record. Built by the executor, owned by the ledger once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorruptionEvent {
    pub file_path: PathBuf,
    pub release: ReleaseInfo,
    /// Probe snapshot, when one was obtained before the outcome
    pub media: Option<MediaFile>,
    pub size_bytes: u64,
    pub outcome: OutcomeKind,
    pub stage: String,
    pub error_message: Option<String>,
    pub tool_output: Option<String>,
}

impl CorruptionEvent {
    pub fn new(path: &Path, outcome: OutcomeKind, stage: impl Into<String>) -> Self {
        Self {
            file_path: path.to_path_buf(),
            release: ReleaseInfo::from_path(path),
            media: None,
            size_bytes: std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
            outcome,
            stage: stage.into(),
            error_message: None,
            tool_output: None,
        }
    }

    pub fn with_media(mut self, media: Option<&MediaFile>) -> Self {
        if let Some(media) = media {
            if self.size_bytes == 0 {
                self.size_bytes = media.size_bytes;
            }
            self.media = Some(media.clone());
        }
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_tool_output(mut self, output: Option<String>) -> Self {
        self.tool_output = output.filter(|o| !o.trim().is_empty());
        self
    }

    fn rollup_codec(&self) -> &str {
        self.media.as_ref().map(|m| m.video_codec.as_str()).unwrap_or("unknown")
    }

    fn rollup_hdr(&self) -> &'static str {
        self.media.as_ref().map(|m| m.hdr.format.as_str()).unwrap_or("SDR")
    }
}

/// Destination for terminal outcomes. The pipeline behaves identically
/// whether or not one is wired in.
pub trait CorruptionSink: Send + Sync {
    /// Append one event and update rollups; returns the event id
    fn record(&self, event: &CorruptionEvent) -> LedgerResult<i64>;

    /// Set the remediation flags of an existing event
    fn mark_remediation(&self, event_id: i64, blocklisted: bool, research_triggered: bool) -> LedgerResult<()>;
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA busy_timeout = 5000;\n",
    )
}

#[derive(Debug, Clone)]
pub struct SqliteLedger {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteLedger {
    /// Open (creating if needed) a writable ledger and apply the schema
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let ledger = Self {
            path,
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        };
        ledger.initialize()?;
        Ok(ledger)
    }

    /// Open an existing ledger for queries only
    pub fn open_read_only(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let ledger = Self {
            path: path.as_ref().to_path_buf(),
            flags: OpenFlags::SQLITE_OPEN_READ_ONLY,
        };
        ledger.connect()?;
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn connect(&self) -> LedgerResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            LedgerError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        if !self.flags.contains(OpenFlags::SQLITE_OPEN_READ_ONLY) {
            configure_connection(&conn).map_err(|source| LedgerError::OpenDatabase {
                path: self.path.clone(),
                source,
            })?;
        }
        Ok(conn)
    }

    fn initialize(&self) -> LedgerResult<()> {
        let conn = self.connect()?;
        conn.execute_batch(LEDGER_SCHEMA)?;
        Ok(())
    }

    pub fn append(&self, event: &CorruptionEvent) -> LedgerResult<i64> {
        let now = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        let media = event.media.as_ref();
        let status = event.outcome.status();

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO corruption_events (
                timestamp, file_path, movie_title, movie_year, file_size_bytes, duration_seconds,
                video_codec, video_profile, resolution, width, height, bit_depth,
                color_space, color_transfer, color_primaries,
                is_hdr, is_dolby_vision, hdr_format, master_display, max_luminance,
                audio_codecs, audio_count, subtitle_count,
                release_group, source_type, release_name,
                corruption_type, corruption_stage, error_message, tool_output,
                status, blocklisted, redownload_triggered
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                      ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, 0, 0)",
            params![
                now,
                event.file_path.to_string_lossy().into_owned(),
                event.release.title,
                event.release.year,
                event.size_bytes as i64,
                media.map(|m| m.duration_secs),
                event.rollup_codec(),
                media.and_then(|m| m.profile.clone()),
                media.map(|m| m.resolution()),
                media.map(|m| m.width),
                media.map(|m| m.height),
                media.map(|m| m.bit_depth),
                media.and_then(|m| m.color_space.clone()),
                media.and_then(|m| m.color_transfer.clone()),
                media.and_then(|m| m.color_primaries.clone()),
                media.map(|m| m.hdr.is_hdr).unwrap_or(false),
                media.map(|m| m.hdr.is_dolby_vision()).unwrap_or(false),
                event.rollup_hdr(),
                media.and_then(|m| m.hdr.master_display.clone()),
                media.and_then(|m| m.hdr.max_luminance),
                media.map(|m| m.audio_codecs.join(",")),
                media.map(|m| m.audio_count as i64),
                media.map(|m| m.subtitle_count as i64),
                event.release.publisher,
                event.release.source.as_str(),
                event.release.release_name,
                event.outcome.as_str(),
                event.stage,
                event.error_message,
                event.tool_output,
                status.as_str(),
            ],
        )?;
        let event_id = tx.last_insert_rowid();

        let corrupted = i64::from(event.outcome.counts_as_corrupted());
        let success = i64::from(status == EventStatus::Success);

        // Rates are computed from the incremented counts; column references
        // in the UPDATE branch still see the pre-update row.
        tx.execute(
            "INSERT INTO publisher_stats
                (release_group, total_files, corrupted_files, success_files, corruption_rate, first_seen, last_seen)
             VALUES (?1, 1, ?2, ?3, ?2 * 100.0, ?4, ?4)
             ON CONFLICT(release_group) DO UPDATE SET
                total_files = total_files + 1,
                corrupted_files = corrupted_files + ?2,
                success_files = success_files + ?3,
                corruption_rate = CAST(corrupted_files + ?2 AS REAL) * 100.0 / (total_files + 1),
                last_seen = ?4",
            params![event.release.publisher, corrupted, success, now],
        )?;

        tx.execute(
            "INSERT INTO format_stats
                (video_codec, hdr_format, source_type, total_files, corrupted_files, corruption_rate, last_seen)
             VALUES (?1, ?2, ?3, 1, ?4, ?4 * 100.0, ?5)
             ON CONFLICT(video_codec, hdr_format, source_type) DO UPDATE SET
                total_files = total_files + 1,
                corrupted_files = corrupted_files + ?4,
                corruption_rate = CAST(corrupted_files + ?4 AS REAL) * 100.0 / (total_files + 1),
                last_seen = ?5",
            params![
                event.rollup_codec(),
                event.rollup_hdr(),
                event.release.source.as_str(),
                corrupted,
                now
            ],
        )?;

        tx.commit()?;
        debug!(
            "Ledger event {} recorded: {} ({}) for {}",
            event_id,
            event.outcome,
            status.as_str(),
            event.file_path.display()
        );
        Ok(event_id)
    }
}

impl CorruptionSink for SqliteLedger {
    fn record(&self, event: &CorruptionEvent) -> LedgerResult<i64> {
        self.append(event)
    }

    fn mark_remediation(&self, event_id: i64, blocklisted: bool, research_triggered: bool) -> LedgerResult<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE corruption_events SET blocklisted = ?1, redownload_triggered = ?2 WHERE id = ?3",
            params![blocklisted, research_triggered, event_id],
        )?;
        if changed == 0 {
            return Err(LedgerError::NotFound { id: event_id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{HdrFormat, HdrInfo};

    fn media_at(path: &Path, codec: &str, hdr: HdrFormat) -> MediaFile {
        MediaFile {
            path: path.to_path_buf(),
            container: "matroska,webm".to_string(),
            video_codec: codec.to_string(),
            profile: Some("Main 10".to_string()),
            width: 3840,
            height: 2160,
            duration_secs: 7200.0,
            size_bytes: 1_000_000,
            bit_rate: None,
            bit_depth: 10,
            color_space: None,
            color_transfer: None,
            color_primaries: None,
            audio_codecs: vec!["truehd".to_string(), "ac3".to_string()],
            audio_count: 2,
            subtitle_count: 3,
            hdr: HdrInfo {
                format: hdr,
                is_hdr: hdr != HdrFormat::Sdr,
                master_display: None,
                max_luminance: Some(1000),
            },
            release: ReleaseInfo::from_path(path),
        }
    }

    fn event(name: &str, outcome: OutcomeKind) -> CorruptionEvent {
        let path = PathBuf::from(format!("/media/Movie (2020)/{}", name));
        let media = media_at(&path, "hevc", HdrFormat::Hdr10);
        CorruptionEvent::new(&path, outcome, "test").with_media(Some(&media))
    }

    fn publisher_row(ledger: &SqliteLedger, group: &str) -> (i64, i64, i64, f64) {
        ledger
            .connect()
            .unwrap()
            .query_row(
                "SELECT total_files, corrupted_files, success_files, corruption_rate
                 FROM publisher_stats WHERE release_group = ?1",
                params![group],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap()
    }

    #[test]
    fn status_mapping() {
        assert_eq!(OutcomeKind::OutputTooSmall.status(), EventStatus::Corrupted);
        assert_eq!(OutcomeKind::InputCorrupt.status(), EventStatus::Corrupted);
        assert_eq!(OutcomeKind::PromotionFailed.status(), EventStatus::Failed);
        assert_eq!(OutcomeKind::ManualReviewRequired.status(), EventStatus::ManualReview);
        assert!(!OutcomeKind::ManualReviewRequired.counts_as_corrupted());
        assert!(OutcomeKind::UnreadableStreams.counts_as_corrupted());
    }

    #[test]
    fn append_writes_fact_row_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SqliteLedger::open(dir.path().join("nested/ledger.db")).unwrap();

        let id = ledger
            .record(
                &event("Movie.2020.2160p.REMUX-FGT.mkv", OutcomeKind::OutputCorrupt)
                    .with_error("File structure is invalid")
                    .with_tool_output(Some("  ".to_string())),
            )
            .unwrap();

        let (group, source, codec, hdr, status, audio, tool): (String, String, String, String, String, String, Option<String>) = ledger
            .connect()
            .unwrap()
            .query_row(
                "SELECT release_group, source_type, video_codec, hdr_format, status, audio_codecs, tool_output
                 FROM corruption_events WHERE id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?)),
            )
            .unwrap();
        assert_eq!(group, "FGT");
        assert_eq!(source, "REMUX");
        assert_eq!(codec, "hevc");
        assert_eq!(hdr, "HDR10");
        assert_eq!(status, "corrupted");
        assert_eq!(audio, "truehd,ac3");
        assert_eq!(tool, None);
    }

    #[test]
    fn rollup_rate_uses_incremented_counts() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SqliteLedger::open(dir.path().join("ledger.db")).unwrap();

        ledger.record(&event("A.2020-GRP.mkv", OutcomeKind::Success)).unwrap();
        assert_eq!(publisher_row(&ledger, "GRP"), (1, 0, 1, 0.0));

        ledger.record(&event("B.2020-GRP.mkv", OutcomeKind::OutputTooSmall)).unwrap();
        assert_eq!(publisher_row(&ledger, "GRP"), (2, 1, 1, 50.0));

        ledger.record(&event("C.2020-GRP.mkv", OutcomeKind::ManualReviewRequired)).unwrap();
        let (total, corrupted, success, rate) = publisher_row(&ledger, "GRP");
        assert_eq!((total, corrupted, success), (3, 1, 1));
        assert!((rate - 100.0 / 3.0).abs() < 1e-9);

        let (fmt_total, fmt_corrupted): (i64, i64) = ledger
            .connect()
            .unwrap()
            .query_row(
                "SELECT total_files, corrupted_files FROM format_stats
                 WHERE video_codec = 'hevc' AND hdr_format = 'HDR10' AND source_type = 'Unknown'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!((fmt_total, fmt_corrupted), (3, 1));
    }

    #[test]
    fn first_failure_has_full_rate() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SqliteLedger::open(dir.path().join("ledger.db")).unwrap();
        ledger.record(&event("A.2020-BAD.mkv", OutcomeKind::InputCorrupt)).unwrap();
        assert_eq!(publisher_row(&ledger, "BAD"), (1, 1, 0, 100.0));
    }

    #[test]
    fn event_without_media_uses_unknowns() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SqliteLedger::open(dir.path().join("ledger.db")).unwrap();
        let path = Path::new("/nowhere/file.mkv");
        let id = ledger
            .record(&CorruptionEvent::new(path, OutcomeKind::InputCorrupt, "input_verification"))
            .unwrap();
        let codec: String = ledger
            .connect()
            .unwrap()
            .query_row("SELECT video_codec FROM corruption_events WHERE id = ?1", params![id], |r| r.get(0))
            .unwrap();
        assert_eq!(codec, "unknown");
    }

    #[test]
    fn remediation_flags_are_the_only_update() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SqliteLedger::open(dir.path().join("ledger.db")).unwrap();
        let id = ledger.record(&event("A.2020-GRP.mkv", OutcomeKind::OutputCorrupt)).unwrap();

        ledger.mark_remediation(id, false, true).unwrap();
        let flags: (bool, bool) = ledger
            .connect()
            .unwrap()
            .query_row(
                "SELECT blocklisted, redownload_triggered FROM corruption_events WHERE id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(flags, (false, true));

        assert!(matches!(
            ledger.mark_remediation(id + 100, true, true),
            Err(LedgerError::NotFound { .. })
        ));
    }

    #[test]
    fn read_only_open_of_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SqliteLedger::open_read_only(dir.path().join("absent.db")).is_err());
    }
}
