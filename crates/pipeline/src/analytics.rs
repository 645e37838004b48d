//! Read-only reporting over the corruption ledger.

use std::fs;
use std::path::Path;
use anyhow::{Context, Result};
use chrono::Local;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use serde_json::{json, Map, Value};
use crate::ledger::{LedgerResult, SqliteLedger};

const FAILED: &str = "SUM(CASE WHEN status IN ('corrupted', 'failed') THEN 1 ELSE 0 END)";
const SUCCEEDED: &str = "SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END)";
const KNOWN_GROUP: &str = "release_group IS NOT NULL AND release_group != 'Unknown'";

/// Publishers need this many files before they show up in the worst list
pub const WORST_MIN_FILES: i64 = 2;
pub const BEST_MIN_FILES: i64 = 5;
pub const RECOMMENDED_MIN_FILES: i64 = 5;
pub const RECOMMENDED_MAX_RATE: f64 = 5.0;
pub const QUALITY_MIN_FILES: i64 = 3;
pub const HDR_RELIABLE_MIN_FILES: i64 = 3;
/// Bonus applied per unit of HDR share in the quality score
pub const HDR_BONUS: f64 = 0.2;

fn failure_rate_sql() -> String {
    format!("ROUND(CAST({} AS REAL) / COUNT(*) * 100, 2)", FAILED)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub total: i64,
    pub corrupted: i64,
    pub success: i64,
    pub manual_review: i64,
    pub corruption_rate: f64,
}

/// Totals for one value of a grouping column (HDR format, source type)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breakdown {
    pub label: String,
    pub total: i64,
    pub corrupted: i64,
    pub success: i64,
    pub corruption_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyActivity {
    pub date: String,
    pub total: i64,
    pub success: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublisherStats {
    pub release_group: String,
    pub total: i64,
    pub corrupted: i64,
    pub success: i64,
    pub corruption_rate: f64,
    pub avg_size_gb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatStats {
    pub video_codec: String,
    pub hdr_format: String,
    pub source_type: String,
    pub total: i64,
    pub corrupted: i64,
    pub corruption_rate: f64,
    pub avg_size_gb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorruptionTypeCount {
    pub corruption_type: String,
    pub stage: String,
    pub count: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventSummary {
    pub id: i64,
    pub timestamp: String,
    pub movie_title: String,
    pub release_group: String,
    pub video_codec: String,
    pub hdr_format: String,
    pub source_type: String,
    pub resolution: String,
    pub status: String,
    pub corruption_type: String,
    pub size_gb: f64,
    pub blocklisted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublisherHistory {
    pub pattern: String,
    pub total: i64,
    pub corrupted: i64,
    pub success: i64,
    pub corruption_rate: f64,
    pub events: Vec<EventSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityScore {
    pub release_group: String,
    pub total: i64,
    pub success: i64,
    pub success_rate: f64,
    pub hdr_count: i64,
    pub dv_count: i64,
    pub quality_score: f64,
}

/// One publisher's track record for a single HDR format
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HdrPublisherStats {
    pub release_group: String,
    pub hdr_format: String,
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SuccessSummary {
    pub total_success: i64,
    pub unique_publishers: i64,
    pub hdr_success: i64,
    pub dv_success: i64,
    pub avg_size_gb: f64,
    pub avg_duration_min: f64,
}

fn publisher_from_row(row: &Row<'_>) -> rusqlite::Result<PublisherStats> {
    Ok(PublisherStats {
        release_group: row.get(0)?,
        total: row.get(1)?,
        corrupted: row.get(2)?,
        success: row.get(3)?,
        corruption_rate: row.get(4)?,
        avg_size_gb: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
    })
}

fn breakdown_from_row(row: &Row<'_>) -> rusqlite::Result<Breakdown> {
    Ok(Breakdown {
        label: row.get(0)?,
        total: row.get(1)?,
        corrupted: row.get(2)?,
        success: row.get(3)?,
        corruption_rate: row.get(4)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventSummary> {
    Ok(EventSummary {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        movie_title: row.get::<_, Option<String>>(2)?.unwrap_or_else(|| "Unknown".to_string()),
        release_group: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        video_codec: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        hdr_format: row.get::<_, Option<String>>(5)?.unwrap_or_else(|| "SDR".to_string()),
        source_type: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        resolution: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        status: row.get(8)?,
        corruption_type: row.get(9)?,
        size_gb: row.get::<_, Option<f64>>(10)?.unwrap_or(0.0),
        blocklisted: row.get(11)?,
    })
}

const EVENT_COLUMNS: &str = "id, datetime(timestamp, 'localtime'), movie_title, release_group, video_codec,
    hdr_format, source_type, resolution, status, corruption_type,
    ROUND(file_size_bytes / 1024.0 / 1024.0 / 1024.0, 2), blocklisted";

fn sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => json!(b.len()),
    }
}

pub struct Analytics {
    ledger: SqliteLedger,
}

impl Analytics {
    /// Open an existing ledger read-only
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        Ok(Self { ledger: SqliteLedger::open_read_only(path)? })
    }

    pub fn from_ledger(ledger: SqliteLedger) -> Self {
        Self { ledger }
    }

    pub fn path(&self) -> &Path {
        self.ledger.path()
    }

    fn conn(&self) -> LedgerResult<Connection> {
        self.ledger.connect()
    }

    fn publishers(&self, having: &str, order: &str, args: &[&dyn rusqlite::ToSql]) -> LedgerResult<Vec<PublisherStats>> {
        let sql = format!(
            "SELECT release_group, COUNT(*) AS total_files, {failed}, {success} AS success_files,
                    {rate} AS corruption_rate,
                    ROUND(AVG(file_size_bytes) / 1024.0 / 1024.0 / 1024.0, 2)
             FROM corruption_events
             WHERE {known}
             GROUP BY release_group
             HAVING {having}
             ORDER BY {order}",
            failed = FAILED,
            success = SUCCEEDED,
            rate = failure_rate_sql(),
            known = KNOWN_GROUP,
            having = having,
            order = order,
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args, publisher_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn breakdown(&self, column: &str, filter: &str) -> LedgerResult<Vec<Breakdown>> {
        let sql = format!(
            "SELECT {column} AS label, COUNT(*), {failed}, {success}, {rate} AS corruption_rate
             FROM corruption_events
             WHERE {filter}
             GROUP BY label
             ORDER BY corruption_rate DESC, COUNT(*) DESC",
            column = column,
            failed = FAILED,
            success = SUCCEEDED,
            rate = failure_rate_sql(),
            filter = filter,
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], breakdown_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn summary(&self) -> LedgerResult<Summary> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT COUNT(*), {failed}, {success},
                    SUM(CASE WHEN status = 'manual_review' THEN 1 ELSE 0 END)
             FROM corruption_events",
            failed = FAILED,
            success = SUCCEEDED,
        );
        let (total, corrupted, success, manual_review): (i64, Option<i64>, Option<i64>, Option<i64>) =
            conn.query_row(&sql, [], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?;
        let corrupted = corrupted.unwrap_or(0);
        let corruption_rate = if total > 0 {
            (corrupted as f64 / total as f64 * 10000.0).round() / 100.0
        } else {
            0.0
        };
        Ok(Summary {
            total,
            corrupted,
            success: success.unwrap_or(0),
            manual_review: manual_review.unwrap_or(0),
            corruption_rate,
        })
    }

    pub fn hdr_breakdown(&self) -> LedgerResult<Vec<Breakdown>> {
        self.breakdown("COALESCE(NULLIF(hdr_format, ''), 'SDR')", "1 = 1")
    }

    pub fn source_breakdown(&self) -> LedgerResult<Vec<Breakdown>> {
        self.breakdown("source_type", "source_type IS NOT NULL AND source_type != 'Unknown'")
    }

    /// Per-day totals for the last `days` days, newest first
    pub fn recent_activity(&self, days: u32) -> LedgerResult<Vec<DailyActivity>> {
        let sql = format!(
            "SELECT DATE(timestamp) AS day, COUNT(*), {success}, {failed}
             FROM corruption_events
             WHERE timestamp >= datetime('now', ?1)
             GROUP BY day
             ORDER BY day DESC",
            success = SUCCEEDED,
            failed = FAILED,
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![format!("-{} days", days)], |r| {
            Ok(DailyActivity {
                date: r.get(0)?,
                total: r.get(1)?,
                success: r.get(2)?,
                failed: r.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn worst_publishers(&self, limit: usize) -> LedgerResult<Vec<PublisherStats>> {
        self.publishers(
            "COUNT(*) >= ?1",
            "corruption_rate DESC, total_files DESC LIMIT ?2",
            params![WORST_MIN_FILES, limit as i64],
        )
    }

    pub fn best_publishers(&self, limit: usize) -> LedgerResult<Vec<PublisherStats>> {
        self.publishers(
            "COUNT(*) >= ?1",
            "corruption_rate ASC, total_files DESC LIMIT ?2",
            params![BEST_MIN_FILES, limit as i64],
        )
    }

    /// Publishers reliable enough to prefer in the download manager
    pub fn recommended_publishers(&self, min_files: i64, max_rate: f64) -> LedgerResult<Vec<PublisherStats>> {
        self.publishers(
            "COUNT(*) >= ?1 AND corruption_rate <= ?2",
            "success_files DESC, corruption_rate ASC",
            params![min_files, max_rate],
        )
    }

    /// Codec x HDR x source combinations, worst first
    pub fn format_breakdown(&self) -> LedgerResult<Vec<FormatStats>> {
        let sql = format!(
            "SELECT video_codec, COALESCE(NULLIF(hdr_format, ''), 'SDR') AS hdr, COALESCE(source_type, 'Unknown'),
                    COUNT(*) AS total, {failed}, {rate} AS corruption_rate,
                    ROUND(AVG(file_size_bytes) / 1024.0 / 1024.0 / 1024.0, 2)
             FROM corruption_events
             WHERE video_codec IS NOT NULL AND video_codec != 'unknown'
             GROUP BY video_codec, hdr, source_type
             ORDER BY corruption_rate DESC, total DESC",
            failed = FAILED,
            rate = failure_rate_sql(),
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |r| {
            Ok(FormatStats {
                video_codec: r.get(0)?,
                hdr_format: r.get(1)?,
                source_type: r.get(2)?,
                total: r.get(3)?,
                corrupted: r.get(4)?,
                corruption_rate: r.get(5)?,
                avg_size_gb: r.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Distribution of non-success outcomes by type and stage
    pub fn corruption_types(&self) -> LedgerResult<Vec<CorruptionTypeCount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT corruption_type, COALESCE(corruption_stage, ''), COUNT(*) AS n,
                    ROUND(COUNT(*) * 100.0 / (SELECT COUNT(*) FROM corruption_events WHERE status != 'success'), 2)
             FROM corruption_events
             WHERE status != 'success'
             GROUP BY corruption_type, corruption_stage
             ORDER BY n DESC",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(CorruptionTypeCount {
                corruption_type: r.get(0)?,
                stage: r.get(1)?,
                count: r.get(2)?,
                percentage: r.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn recent_failures(&self, limit: usize) -> LedgerResult<Vec<EventSummary>> {
        let sql = format!(
            "SELECT {} FROM corruption_events WHERE status != 'success' ORDER BY timestamp DESC, id DESC LIMIT ?1",
            EVENT_COLUMNS
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], event_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Every event of publishers matching `pattern` (substring), newest first
    pub fn search_publisher(&self, pattern: &str) -> LedgerResult<PublisherHistory> {
        let sql = format!(
            "SELECT {} FROM corruption_events WHERE release_group LIKE ?1 ORDER BY timestamp DESC, id DESC",
            EVENT_COLUMNS
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map(params![format!("%{}%", pattern)], event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let total = events.len() as i64;
        let corrupted = events
            .iter()
            .filter(|e| e.status == "corrupted" || e.status == "failed")
            .count() as i64;
        let success = events.iter().filter(|e| e.status == "success").count() as i64;
        let corruption_rate = if total > 0 { corrupted as f64 * 100.0 / total as f64 } else { 0.0 };

        Ok(PublisherHistory {
            pattern: pattern.to_string(),
            total,
            corrupted,
            success,
            corruption_rate,
            events,
        })
    }

    /// Success rate weighted by the share of successful HDR files
    pub fn quality_scores(&self, limit: usize) -> LedgerResult<Vec<QualityScore>> {
        let sql = format!(
            "SELECT release_group, COUNT(*) AS total_files, {success},
                    SUM(CASE WHEN status = 'success' AND is_hdr = 1 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'success' AND is_dolby_vision = 1 THEN 1 ELSE 0 END)
             FROM corruption_events
             WHERE {known}
             GROUP BY release_group
             HAVING COUNT(*) >= ?1",
            success = SUCCEEDED,
            known = KNOWN_GROUP,
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut scores = stmt
            .query_map(params![QUALITY_MIN_FILES], |r| {
                let release_group: String = r.get(0)?;
                let total: i64 = r.get(1)?;
                let success: i64 = r.get(2)?;
                let hdr_count: i64 = r.get(3)?;
                let dv_count: i64 = r.get(4)?;
                Ok(quality_score(release_group, total, success, hdr_count, dv_count))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        scores.sort_by(|a, b| {
            b.quality_score
                .total_cmp(&a.quality_score)
                .then_with(|| b.total.cmp(&a.total))
        });
        scores.truncate(limit);
        Ok(scores)
    }

    /// HDR and Dolby Vision files per publisher and format, most reliable first
    pub fn hdr_reliable_publishers(&self, min_files: i64) -> LedgerResult<Vec<HdrPublisherStats>> {
        let sql = format!(
            "SELECT release_group, COALESCE(NULLIF(hdr_format, ''), 'SDR') AS hdr, COUNT(*) AS total_files,
                    {success}, {failed},
                    ROUND(CAST({success} AS REAL) / COUNT(*) * 100, 2) AS success_rate
             FROM corruption_events
             WHERE (is_hdr = 1 OR is_dolby_vision = 1) AND {known}
             GROUP BY release_group, hdr
             HAVING COUNT(*) >= ?1
             ORDER BY success_rate DESC, total_files DESC",
            success = SUCCEEDED,
            failed = FAILED,
            known = KNOWN_GROUP,
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![min_files], |r| {
            Ok(HdrPublisherStats {
                release_group: r.get(0)?,
                hdr_format: r.get(1)?,
                total: r.get(2)?,
                success: r.get(3)?,
                failed: r.get(4)?,
                success_rate: r.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn success_summary(&self) -> LedgerResult<SuccessSummary> {
        let conn = self.conn()?;
        let summary = conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT release_group),
                    SUM(CASE WHEN is_hdr = 1 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN is_dolby_vision = 1 THEN 1 ELSE 0 END),
                    ROUND(AVG(file_size_bytes) / 1024.0 / 1024.0 / 1024.0, 2),
                    ROUND(AVG(duration_seconds) / 60.0, 2)
             FROM corruption_events
             WHERE status = 'success'",
            [],
            |r| {
                Ok(SuccessSummary {
                    total_success: r.get(0)?,
                    unique_publishers: r.get(1)?,
                    hdr_success: r.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    dv_success: r.get::<_, Option<i64>>(3)?.unwrap_or(0),
                    avg_size_gb: r.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                    avg_duration_min: r.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
                })
            },
        )?;
        Ok(summary)
    }

    /// Every event row with all columns, keyed by column name
    pub fn all_events(&self) -> LedgerResult<Vec<Map<String, Value>>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM corruption_events ORDER BY id")?;
        let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
        let rows = stmt.query_map([], |r| {
            let mut map = Map::new();
            for (i, name) in names.iter().enumerate() {
                map.insert(name.clone(), sql_value(r.get_ref(i)?));
            }
            Ok(map)
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Write every event as a pretty-printed JSON array
    pub fn export_events_json(&self, output: &Path) -> Result<usize> {
        let events = self.all_events()?;
        let body = serde_json::to_string_pretty(&events)?;
        fs::write(output, body).with_context(|| format!("Failed to write {}", output.display()))?;
        Ok(events.len())
    }

    /// Export recommended publishers for the download manager's preferred
    /// words. `.json` targets get a structured document, anything else a
    /// commented text list that also names publishers to avoid.
    pub fn export_preferred_groups(&self, output: &Path, min_files: i64, max_rate: f64) -> Result<usize> {
        let preferred = self.recommended_publishers(min_files, max_rate)?;
        let is_json = output
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let body = if is_json {
            let doc = json!({
                "preferred_publishers": preferred.iter().map(|p| json!({
                    "name": p.release_group,
                    "score": 10,
                    "total_files": p.total,
                    "success_files": p.success,
                    "corruption_rate": p.corruption_rate,
                })).collect::<Vec<_>>(),
                "generated": Local::now().to_rfc3339(),
                "criteria": {"min_files": min_files, "max_corruption_rate": max_rate},
            });
            serde_json::to_string_pretty(&doc)?
        } else {
            let avoid = self.publishers(
                "COUNT(*) >= ?1 AND corruption_rate >= ?2",
                "corruption_rate DESC",
                params![WORST_MIN_FILES, 20.0],
            )?;
            let mut text = String::new();
            text.push_str("# Recommended publishers\n");
            text.push_str(&format!("# Generated: {}\n", Local::now().format("%Y-%m-%d %H:%M:%S")));
            text.push_str(&format!("# Criteria: min {} files, max {}% corruption\n", min_files, max_rate));
            text.push_str(&format!("# Total publishers: {}\n\n", preferred.len()));
            for p in &preferred {
                text.push_str(&format!(
                    "{:30} +10  # {}/{} success, {}% fail\n",
                    p.release_group, p.success, p.total, p.corruption_rate
                ));
            }
            text.push_str("\n# Avoid these (high corruption rate):\n");
            for p in &avoid {
                text.push_str(&format!(
                    "{:30} -10  # {}/{} failed, {}% fail\n",
                    p.release_group, p.corrupted, p.total, p.corruption_rate
                ));
            }
            text
        };

        fs::write(output, body).with_context(|| format!("Failed to write {}", output.display()))?;
        Ok(preferred.len())
    }
}

pub fn quality_score(release_group: String, total: i64, success: i64, hdr_count: i64, dv_count: i64) -> QualityScore {
    let success_rate = if total > 0 { success as f64 * 100.0 / total as f64 } else { 0.0 };
    let hdr_share = if success > 0 { hdr_count as f64 / success as f64 } else { 0.0 };
    let score = success_rate * (1.0 + hdr_share * HDR_BONUS);
    QualityScore {
        release_group,
        total,
        success,
        success_rate: (success_rate * 100.0).round() / 100.0,
        hdr_count,
        dv_count,
        quality_score: (score * 100.0).round() / 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use crate::ledger::{CorruptionEvent, CorruptionSink, OutcomeKind};
    use crate::probe::{HdrFormat, HdrInfo, MediaFile};
    use crate::release::ReleaseInfo;

    fn record(ledger: &SqliteLedger, name: &str, codec: &str, hdr: HdrFormat, outcome: OutcomeKind) {
        let path = PathBuf::from(format!("/media/Some Movie (2020)/{}", name));
        let media = MediaFile {
            path: path.clone(),
            container: "matroska,webm".to_string(),
            video_codec: codec.to_string(),
            profile: None,
            width: 1920,
            height: 1080,
            duration_secs: 6000.0,
            size_bytes: 2 * 1024 * 1024 * 1024,
            bit_rate: None,
            bit_depth: 10,
            color_space: None,
            color_transfer: None,
            color_primaries: None,
            audio_codecs: vec!["eac3".to_string()],
            audio_count: 1,
            subtitle_count: 1,
            hdr: HdrInfo { format: hdr, is_hdr: hdr != HdrFormat::Sdr, ..Default::default() },
            release: ReleaseInfo::from_path(&path),
        };
        let event = CorruptionEvent::new(&path, outcome, "test").with_media(Some(&media));
        ledger.record(&event).unwrap();
    }

    /// GOOD: 5 successes (3 HDR10); BAD: 2 failures + 1 success; LONE: 1 success
    fn populated() -> (tempfile::TempDir, Analytics) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let ledger = SqliteLedger::open(&path).unwrap();

        for i in 0..5 {
            let hdr = if i < 3 { HdrFormat::Hdr10 } else { HdrFormat::Sdr };
            record(&ledger, &format!("Movie{}.2020.1080p.BluRay-GOOD.mkv", i), "hevc", hdr, OutcomeKind::Success);
        }
        record(&ledger, "Bad1.2020.1080p.WEB-DL-BAD.mkv", "h264", HdrFormat::Sdr, OutcomeKind::OutputTooSmall);
        record(&ledger, "Bad2.2020.1080p.WEB-DL-BAD.mkv", "h264", HdrFormat::Sdr, OutcomeKind::ConversionProcessFailed);
        record(&ledger, "Bad3.2020.1080p.WEB-DL-BAD.mkv", "h264", HdrFormat::Sdr, OutcomeKind::Success);
        record(&ledger, "Solo.2020.2160p.BluRay-LONE.mkv", "hevc", HdrFormat::DolbyVision, OutcomeKind::ManualReviewRequired);

        (dir, Analytics::open(&path).unwrap())
    }

    #[test]
    fn summary_counts_failures_and_reviews() {
        let (_dir, analytics) = populated();
        let summary = analytics.summary().unwrap();
        assert_eq!(summary.total, 9);
        assert_eq!(summary.corrupted, 2);
        assert_eq!(summary.success, 6);
        assert_eq!(summary.manual_review, 1);
        assert_eq!(summary.corruption_rate, 22.22);
    }

    #[test]
    fn empty_ledger_summary_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        SqliteLedger::open(&path).unwrap();
        let summary = Analytics::open(&path).unwrap().summary().unwrap();
        assert_eq!(summary, Summary::default());
    }

    #[test]
    fn publisher_rankings_respect_minimum_files() {
        let (_dir, analytics) = populated();

        let worst = analytics.worst_publishers(10).unwrap();
        assert_eq!(worst[0].release_group, "BAD");
        assert_eq!(worst[0].corruption_rate, 66.67);
        assert!(worst.iter().all(|p| p.release_group != "LONE"));

        let best = analytics.best_publishers(10).unwrap();
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].release_group, "GOOD");
        assert_eq!(best[0].avg_size_gb, 2.0);

        let recommended = analytics
            .recommended_publishers(RECOMMENDED_MIN_FILES, RECOMMENDED_MAX_RATE)
            .unwrap();
        assert_eq!(recommended.iter().map(|p| p.release_group.as_str()).collect::<Vec<_>>(), vec!["GOOD"]);
    }

    #[test]
    fn breakdowns_group_by_format_and_source() {
        let (_dir, analytics) = populated();

        let hdr = analytics.hdr_breakdown().unwrap();
        let sdr = hdr.iter().find(|b| b.label == "SDR").unwrap();
        assert_eq!((sdr.total, sdr.corrupted), (5, 2));

        let formats = analytics.format_breakdown().unwrap();
        assert_eq!(formats[0].video_codec, "h264");
        assert_eq!(formats[0].source_type, "WEB-DL");

        let sources = analytics.source_breakdown().unwrap();
        assert!(sources.iter().any(|b| b.label == "BluRay" && b.total == 6));
    }

    #[test]
    fn corruption_types_cover_non_success_events() {
        let (_dir, analytics) = populated();
        let types = analytics.corruption_types().unwrap();
        assert_eq!(types.iter().map(|t| t.count).sum::<i64>(), 3);
        let total_pct: f64 = types.iter().map(|t| t.percentage).sum();
        assert!((total_pct - 100.0).abs() < 0.1);
    }

    #[test]
    fn recent_failures_and_activity() {
        let (_dir, analytics) = populated();
        let failures = analytics.recent_failures(2).unwrap();
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|e| e.status != "success"));

        let activity = analytics.recent_activity(7).unwrap();
        assert_eq!(activity.iter().map(|d| d.total).sum::<i64>(), 9);
    }

    #[test]
    fn publisher_search_matches_substring() {
        let (_dir, analytics) = populated();
        let history = analytics.search_publisher("BA").unwrap();
        assert_eq!((history.total, history.corrupted, history.success), (3, 2, 1));
        assert_eq!(history.events[0].movie_title, "Some Movie");
        assert!(analytics.search_publisher("NOPE").unwrap().events.is_empty());
    }

    #[test]
    fn quality_score_rewards_hdr_share() {
        let score = quality_score("GOOD".to_string(), 5, 5, 3, 0);
        assert_eq!(score.success_rate, 100.0);
        assert_eq!(score.quality_score, 112.0);

        let (_dir, analytics) = populated();
        let scores = analytics.quality_scores(10).unwrap();
        assert_eq!(scores[0].release_group, "GOOD");
        assert_eq!(scores[1].release_group, "BAD");
        assert_eq!(scores.len(), 2);
    }

    #[test]
    fn hdr_reliable_publishers_group_by_format() {
        let (_dir, analytics) = populated();

        let reliable = analytics.hdr_reliable_publishers(HDR_RELIABLE_MIN_FILES).unwrap();
        assert_eq!(
            reliable,
            vec![HdrPublisherStats {
                release_group: "GOOD".to_string(),
                hdr_format: "HDR10".to_string(),
                total: 3,
                success: 3,
                failed: 0,
                success_rate: 100.0,
            }]
        );

        let all = analytics.hdr_reliable_publishers(1).unwrap();
        assert_eq!(all.len(), 2);
        let lone = all.iter().find(|p| p.release_group == "LONE").unwrap();
        assert_eq!(lone.hdr_format, "Dolby Vision");
        assert_eq!((lone.total, lone.success, lone.failed, lone.success_rate), (1, 0, 0, 0.0));
        assert_eq!(all.last().unwrap().release_group, "LONE");
    }

    #[test]
    fn success_summary_counts_only_successes() {
        let (_dir, analytics) = populated();
        let summary = analytics.success_summary().unwrap();
        assert_eq!(
            summary,
            SuccessSummary {
                total_success: 6,
                unique_publishers: 2,
                hdr_success: 3,
                dv_success: 0,
                avg_size_gb: 2.0,
                avg_duration_min: 100.0,
            }
        );
    }

    #[test]
    fn empty_ledger_success_summary_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        SqliteLedger::open(&path).unwrap();
        let analytics = Analytics::open(&path).unwrap();
        assert_eq!(analytics.success_summary().unwrap(), SuccessSummary::default());
        assert!(analytics.hdr_reliable_publishers(1).unwrap().is_empty());
    }

    #[test]
    fn exports_write_files() {
        let (dir, analytics) = populated();

        let json_path = dir.path().join("events.json");
        assert_eq!(analytics.export_events_json(&json_path).unwrap(), 9);
        let events: Vec<Value> = serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(events[0]["release_group"], "GOOD");
        assert!(events[0].get("tool_output").is_some());

        let groups_json = dir.path().join("groups.json");
        assert_eq!(analytics.export_preferred_groups(&groups_json, 5, 5.0).unwrap(), 1);
        let doc: Value = serde_json::from_str(&fs::read_to_string(&groups_json).unwrap()).unwrap();
        assert_eq!(doc["preferred_publishers"][0]["name"], "GOOD");

        let groups_txt = dir.path().join("groups.txt");
        analytics.export_preferred_groups(&groups_txt, 5, 5.0).unwrap();
        let text = fs::read_to_string(&groups_txt).unwrap();
        assert!(text.contains("GOOD"));
        assert!(text.contains("# Avoid these"));
        assert!(text.lines().any(|l| l.starts_with("BAD") && l.contains("-10")));
    }
}
