use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use humansize::{format_size, BINARY};
use pipeline::analytics::{
    Analytics, Breakdown, EventSummary, FormatStats, HdrPublisherStats, PublisherStats, SuccessSummary, Summary,
    HDR_RELIABLE_MIN_FILES, RECOMMENDED_MAX_RATE, RECOMMENDED_MIN_FILES,
};
use pipeline::config::PipelineConfig;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, Paragraph, Row, Table},
    Frame, Terminal,
};
use serde_json::Value;
use std::io::stdout;
use std::path::{Path, PathBuf};
use std::time::Duration;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Corruption ledger analytics
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ledger database; defaults to the configured one
    #[arg(long)]
    db: Option<PathBuf>,

    /// Print reports as JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Report to print; without one the dashboard opens
    #[command(subcommand)]
    report: Option<Report>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Report {
    /// Overall totals
    Summary,
    /// Publishers with the highest failure rate
    Worst {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Publishers with the lowest failure rate
    Best {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Codec x HDR x source combinations
    Formats,
    /// Failure rate per source type
    Sources,
    /// Failure rate per HDR format
    Hdr,
    /// Publishers most reliable for HDR and Dolby Vision content
    HdrReliable {
        #[arg(long, default_value_t = HDR_RELIABLE_MIN_FILES)]
        min_files: i64,
    },
    /// Totals over successful conversions only
    SuccessSummary,
    /// Failure kinds and the stage they happened in
    Types,
    /// Latest failures, or daily activity with --days
    Recent {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
        /// Show per-day totals for this many days instead
        #[arg(long)]
        days: Option<u32>,
    },
    /// History for release groups matching a pattern
    Search { pattern: String },
    /// Publishers reliable enough to prefer
    Recommended {
        #[arg(long, default_value_t = RECOMMENDED_MIN_FILES)]
        min_files: i64,
        #[arg(long, default_value_t = RECOMMENDED_MAX_RATE)]
        max_rate: f64,
    },
    /// Publisher quality scores
    Scores {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Dump every ledger event as JSON
    ExportJson { output: PathBuf },
    /// Write the preferred release groups list (JSON when the path ends in .json)
    ExportGroups {
        output: PathBuf,
        #[arg(long, default_value_t = RECOMMENDED_MIN_FILES)]
        min_files: i64,
        #[arg(long, default_value_t = RECOMMENDED_MAX_RATE)]
        max_rate: f64,
    },
}

fn resolve_db(args: &Args) -> Result<PathBuf> {
    if let Some(db) = &args.db {
        return Ok(db.clone());
    }
    let config_path = PipelineConfig::resolve_path(args.config.as_deref());
    let cfg = PipelineConfig::load_config(config_path.as_deref()).context("Failed to load configuration")?;
    Ok(cfg.ledger_db_path())
}

fn open_analytics(db: &Path) -> Result<Analytics> {
    if !db.exists() {
        bail!("Ledger not found at {} (no conversions recorded yet?)", db.display());
    }
    Analytics::open(db).with_context(|| format!("Failed to open ledger {}", db.display()))
}

fn gib(size_gb: f64) -> String {
    format_size((size_gb.max(0.0) * GIB) as u64, BINARY)
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn summary_lines(summary: &Summary) -> Vec<String> {
    vec![
        format!("Total conversions: {}", summary.total),
        format!("Succeeded:         {}", summary.success),
        format!("Failed:            {} ({:.2}%)", summary.corrupted, summary.corruption_rate),
        format!("Manual review:     {}", summary.manual_review),
    ]
}

fn success_summary_lines(summary: &SuccessSummary) -> Vec<String> {
    vec![
        format!("Successful conversions: {}", summary.total_success),
        format!("Unique publishers:      {}", summary.unique_publishers),
        format!("HDR successes:          {}", summary.hdr_success),
        format!("Dolby Vision successes: {}", summary.dv_success),
        format!("Average size:           {}", gib(summary.avg_size_gb)),
        format!("Average duration:       {:.2} min", summary.avg_duration_min),
    ]
}

fn hdr_publisher_lines(rows: &[HdrPublisherStats]) -> Vec<String> {
    let mut lines = vec![format!(
        "{:<24} {:<14} {:>6} {:>6} {:>6} {:>8}",
        "GROUP", "HDR", "FILES", "OK", "FAIL", "SUCCESS"
    )];
    lines.extend(rows.iter().map(|p| {
        format!(
            "{:<24} {:<14} {:>6} {:>6} {:>6} {:>7.2}%",
            truncate_string(&p.release_group, 24),
            p.hdr_format,
            p.total,
            p.success,
            p.failed,
            p.success_rate
        )
    }));
    lines
}

fn publisher_lines(publishers: &[PublisherStats]) -> Vec<String> {
    let mut lines = vec![format!("{:<24} {:>6} {:>6} {:>8} {:>10}", "GROUP", "FILES", "FAIL", "RATE", "AVG SIZE")];
    lines.extend(publishers.iter().map(|p| {
        format!(
            "{:<24} {:>6} {:>6} {:>7.2}% {:>10}",
            truncate_string(&p.release_group, 24),
            p.total,
            p.corrupted,
            p.corruption_rate,
            gib(p.avg_size_gb)
        )
    }));
    lines
}

fn breakdown_lines(rows: &[Breakdown]) -> Vec<String> {
    let mut lines = vec![format!("{:<16} {:>6} {:>6} {:>6} {:>8}", "", "FILES", "FAIL", "OK", "RATE")];
    lines.extend(rows.iter().map(|b| {
        format!("{:<16} {:>6} {:>6} {:>6} {:>7.2}%", b.label, b.total, b.corrupted, b.success, b.corruption_rate)
    }));
    lines
}

fn format_lines(rows: &[FormatStats]) -> Vec<String> {
    let mut lines = vec![format!(
        "{:<8} {:<14} {:<10} {:>6} {:>6} {:>8} {:>10}",
        "CODEC", "HDR", "SOURCE", "FILES", "FAIL", "RATE", "AVG SIZE"
    )];
    lines.extend(rows.iter().map(|f| {
        format!(
            "{:<8} {:<14} {:<10} {:>6} {:>6} {:>7.2}% {:>10}",
            f.video_codec,
            f.hdr_format,
            f.source_type,
            f.total,
            f.corrupted,
            f.corruption_rate,
            gib(f.avg_size_gb)
        )
    }));
    lines
}

fn event_lines(events: &[EventSummary]) -> Vec<String> {
    events
        .iter()
        .map(|e| {
            format!(
                "{}  {:<14} {:<30} {:<10} {}{}",
                e.timestamp,
                e.status,
                truncate_string(&e.movie_title, 30),
                e.release_group,
                e.corruption_type,
                if e.blocklisted { " [blocklisted]" } else { "" }
            )
        })
        .collect()
}

/// Render one report as text lines, or as a single JSON document
fn run_report(analytics: &Analytics, report: Report, json: bool) -> Result<Vec<String>> {
    let (value, lines): (Value, Vec<String>) = match report {
        Report::Summary => {
            let s = analytics.summary()?;
            (serde_json::to_value(&s)?, summary_lines(&s))
        }
        Report::Worst { limit } => {
            let p = analytics.worst_publishers(limit)?;
            (serde_json::to_value(&p)?, publisher_lines(&p))
        }
        Report::Best { limit } => {
            let p = analytics.best_publishers(limit)?;
            (serde_json::to_value(&p)?, publisher_lines(&p))
        }
        Report::Recommended { min_files, max_rate } => {
            let p = analytics.recommended_publishers(min_files, max_rate)?;
            (serde_json::to_value(&p)?, publisher_lines(&p))
        }
        Report::Formats => {
            let f = analytics.format_breakdown()?;
            (serde_json::to_value(&f)?, format_lines(&f))
        }
        Report::Sources => {
            let b = analytics.source_breakdown()?;
            (serde_json::to_value(&b)?, breakdown_lines(&b))
        }
        Report::Hdr => {
            let b = analytics.hdr_breakdown()?;
            (serde_json::to_value(&b)?, breakdown_lines(&b))
        }
        Report::HdrReliable { min_files } => {
            let p = analytics.hdr_reliable_publishers(min_files)?;
            (serde_json::to_value(&p)?, hdr_publisher_lines(&p))
        }
        Report::SuccessSummary => {
            let s = analytics.success_summary()?;
            (serde_json::to_value(&s)?, success_summary_lines(&s))
        }
        Report::Types => {
            let t = analytics.corruption_types()?;
            let lines = t
                .iter()
                .map(|c| format!("{:<28} {:<20} {:>5} {:>6.2}%", c.corruption_type, c.stage, c.count, c.percentage))
                .collect();
            (serde_json::to_value(&t)?, lines)
        }
        Report::Recent { days: Some(days), .. } => {
            let activity = analytics.recent_activity(days)?;
            let lines = activity
                .iter()
                .map(|d| format!("{}  total {:>4}  ok {:>4}  failed {:>4}", d.date, d.total, d.success, d.failed))
                .collect();
            (serde_json::to_value(&activity)?, lines)
        }
        Report::Recent { limit, days: None } => {
            let e = analytics.recent_failures(limit)?;
            (serde_json::to_value(&e)?, event_lines(&e))
        }
        Report::Search { pattern } => {
            let h = analytics.search_publisher(&pattern)?;
            let mut lines = vec![format!(
                "'{}': {} files, {} failed, {} ok ({:.2}% failure)",
                h.pattern, h.total, h.corrupted, h.success, h.corruption_rate
            )];
            lines.extend(event_lines(&h.events));
            (serde_json::to_value(&h)?, lines)
        }
        Report::Scores { limit } => {
            let s = analytics.quality_scores(limit)?;
            let lines = s
                .iter()
                .map(|q| {
                    format!(
                        "{:<24} score {:>6.2}  ok {:>3}/{:<3} hdr {:>3} dv {:>3}",
                        truncate_string(&q.release_group, 24),
                        q.quality_score,
                        q.success,
                        q.total,
                        q.hdr_count,
                        q.dv_count
                    )
                })
                .collect();
            (serde_json::to_value(&s)?, lines)
        }
        Report::ExportJson { output } => {
            let count = analytics.export_events_json(&output)?;
            let msg = format!("Exported {} events to {}", count, output.display());
            (serde_json::json!({"exported": count, "path": output}), vec![msg])
        }
        Report::ExportGroups { output, min_files, max_rate } => {
            let count = analytics.export_preferred_groups(&output, min_files, max_rate)?;
            let msg = format!("Wrote {} preferred groups to {}", count, output.display());
            (serde_json::json!({"exported": count, "path": output}), vec![msg])
        }
    };

    if json {
        Ok(vec![serde_json::to_string_pretty(&value)?])
    } else {
        Ok(lines)
    }
}

struct App {
    analytics: Analytics,
    summary: Summary,
    worst: Vec<PublisherStats>,
    formats: Vec<FormatStats>,
    error: Option<String>,
    should_quit: bool,
}

impl App {
    fn new(analytics: Analytics) -> Self {
        Self {
            analytics,
            summary: Summary::default(),
            worst: Vec::new(),
            formats: Vec::new(),
            error: None,
            should_quit: false,
        }
    }

    fn load(&mut self) -> Result<()> {
        self.summary = self.analytics.summary()?;
        self.worst = self.analytics.worst_publishers(20)?;
        self.formats = self.analytics.format_breakdown()?;
        Ok(())
    }

    fn refresh(&mut self) {
        // The converter may hold the write lock; keep the last good data
        self.error = self.load().err().map(|e| format!("{:#}", e));
    }
}

fn run_dashboard(analytics: Analytics) -> Result<()> {
    let mut app = App::new(analytics);
    app.refresh();

    crossterm::terminal::enable_raw_mode()?;
    let mut stdout = stdout();
    crossterm::execute!(stdout, crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, &mut app);

    crossterm::terminal::disable_raw_mode()?;
    crossterm::execute!(terminal.backend_mut(), crossterm::terminal::LeaveAlternateScreen)?;
    result
}

fn event_loop(terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>, app: &mut App) -> Result<()> {
    let mut ticks = 0u32;
    loop {
        terminal.draw(|f| ui(f, app))?;

        if crossterm::event::poll(Duration::from_millis(250))? {
            if let crossterm::event::Event::Key(key) = crossterm::event::read()? {
                match key.code {
                    crossterm::event::KeyCode::Char('q') | crossterm::event::KeyCode::Esc => app.should_quit = true,
                    crossterm::event::KeyCode::Char('r') => app.refresh(),
                    _ => {}
                }
            }
        }

        // Auto refresh roughly every 5 seconds
        ticks += 1;
        if ticks >= 20 {
            ticks = 0;
            app.refresh();
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn ui(f: &mut Frame, app: &App) {
    let size = f.size();
    if size.height < 12 || size.width < 80 {
        let error_msg = Paragraph::new("Terminal too small! Please resize to at least 80x12.")
            .block(Block::default().borders(Borders::ALL).title("Error"))
            .style(Style::default().fg(Color::Red));
        f.render_widget(error_msg, size);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(5), Constraint::Length(3)])
        .split(size);

    render_gauge(f, app, chunks[0]);

    let tables = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(chunks[1]);
    render_worst_table(f, app, tables[0]);
    render_format_table(f, app, tables[1]);

    render_status_bar(f, app, chunks[2]);
}

fn success_percent(summary: &Summary) -> f64 {
    if summary.total == 0 {
        0.0
    } else {
        (summary.success as f64 / summary.total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

fn render_gauge(f: &mut Frame, app: &App, area: Rect) {
    let pct = success_percent(&app.summary);
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Success rate"))
        .gauge_style(Style::default().fg(if app.summary.corruption_rate > 10.0 { Color::Yellow } else { Color::Green }))
        .percent(pct as u16)
        .label(format!("{:.1}% of {} conversions", pct, app.summary.total));
    f.render_widget(gauge, area);
}

fn worst_rows(publishers: &[PublisherStats], max_rows: usize) -> Vec<Row<'static>> {
    publishers
        .iter()
        .take(max_rows)
        .map(|p| {
            let style = if p.corruption_rate >= 20.0 {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };
            Row::new(vec![
                truncate_string(&p.release_group, 20),
                p.total.to_string(),
                p.corrupted.to_string(),
                format!("{:.1}%", p.corruption_rate),
            ])
            .style(style)
        })
        .collect()
}

fn render_worst_table(f: &mut Frame, app: &App, area: Rect) {
    let max_rows = (area.height as usize).saturating_sub(3);
    let header = Row::new(vec!["GROUP", "FILES", "FAIL", "RATE"]).style(Style::default().add_modifier(Modifier::BOLD));
    let widths = [
        Constraint::Percentage(50),
        Constraint::Length(6),
        Constraint::Length(5),
        Constraint::Length(7),
    ];
    let table = Table::new(worst_rows(&app.worst, max_rows), widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(format!("Worst publishers ({})", app.worst.len())))
        .column_spacing(1);
    f.render_widget(table, area);
}

fn render_format_table(f: &mut Frame, app: &App, area: Rect) {
    let max_rows = (area.height as usize).saturating_sub(3);
    let header = Row::new(vec!["CODEC", "HDR", "SOURCE", "FILES", "RATE", "AVG"])
        .style(Style::default().add_modifier(Modifier::BOLD));
    let rows: Vec<Row> = app
        .formats
        .iter()
        .take(max_rows)
        .map(|fmt| {
            Row::new(vec![
                fmt.video_codec.clone(),
                truncate_string(&fmt.hdr_format, 14),
                fmt.source_type.clone(),
                fmt.total.to_string(),
                format!("{:.1}%", fmt.corruption_rate),
                gib(fmt.avg_size_gb),
            ])
        })
        .collect();
    let widths = [
        Constraint::Length(6),
        Constraint::Length(14),
        Constraint::Length(8),
        Constraint::Length(6),
        Constraint::Length(7),
        Constraint::Min(9),
    ];
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title("Formats"))
        .column_spacing(1);
    f.render_widget(table, area);
}

fn status_text(app: &App) -> String {
    let db = app.analytics.path().display().to_string();
    match &app.error {
        Some(e) => format!("Error: {} | q=quit r=refresh", truncate_string(e, 60)),
        None => format!(
            "Total: {} | Success: {} | Failed: {} | Review: {} | DB: {} | q=quit r=refresh",
            app.summary.total,
            app.summary.success,
            app.summary.corrupted,
            app.summary.manual_review,
            truncate_string(&db, 35)
        ),
    }
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let style = if app.error.is_some() { Style::default().fg(Color::Red) } else { Style::default() };
    let paragraph = Paragraph::new(status_text(app))
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .style(style)
        .wrap(ratatui::widgets::Wrap { trim: true });
    f.render_widget(paragraph, area);
}

fn main() -> Result<()> {
    let args = Args::parse();
    let db = resolve_db(&args)?;
    let analytics = open_analytics(&db)?;

    match args.report {
        Some(report) => {
            for line in run_report(&analytics, report, args.json)? {
                println!("{}", line);
            }
            Ok(())
        }
        None => run_dashboard(analytics),
    }
}
