use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pipeline::{
    config::PipelineConfig,
    context::RunContext,
    executor::{output_path_for, temp_path_for, ConversionExecutor, Outcome, RunReport, SkipReason},
    jellyfin, scan, webhook,
    recovery::RecoveryOrchestrator,
    toolkit::FfmpegToolkit,
};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use chrono::Local;
use log::{error, info, warn};

/// Exit code when the run was interrupted (128 + SIGINT)
const EXIT_INTERRUPTED: i32 = 130;

/// MKV to MP4 conversion with corruption tracking
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a single MKV file to MP4
    Convert {
        /// Input .mkv file
        input: PathBuf,
    },
    /// List MKV files that still need converting
    Scan {
        /// Library root (repeatable); defaults to the configured roots
        #[arg(long = "root")]
        roots: Vec<PathBuf>,
        /// Convert every candidate, one after another
        #[arg(long)]
        convert: bool,
    },
    /// Serve the playback webhook for smart downloads
    Webhook {
        /// Override the configured listen address
        #[arg(long)]
        listen: Option<String>,
    },
}

/// Writes every log line to stderr and to the daily log file
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn daily_log_path(log_dir: &Path) -> PathBuf {
    log_dir.join(format!("conversion_{}.log", Local::now().format("%Y%m%d")))
}

fn open_daily_log(log_dir: &Path) -> io::Result<File> {
    fs::create_dir_all(log_dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(daily_log_path(log_dir))
}

fn init_logging(log_dir: &Path, verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    builder.format_timestamp_secs();

    let file_error = match open_daily_log(log_dir) {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
            None
        }
        Err(e) => Some(e),
    };
    builder.init();

    if let Some(e) = file_error {
        warn!("Cannot write log file in {} ({}), logging to stderr only", log_dir.display(), e);
    }
}

fn print_config(cfg: &PipelineConfig) {
    info!("Configuration loaded:");
    info!("  ffmpeg: {}", cfg.ffmpeg_bin.display());
    info!("  ffprobe: {}", cfg.ffprobe_bin.display());
    info!("  Size ratio window: {:.2} - {:.2}", cfg.min_output_ratio, cfg.max_output_ratio);
    info!("  Log dir: {}", cfg.log_dir.display());
    info!(
        "  Ledger: {}",
        if cfg.ledger_enabled { cfg.ledger_db_path().display().to_string() } else { "disabled".to_string() }
    );
    info!(
        "  Download manager: {}",
        if cfg.download_manager.enabled() { cfg.download_manager.base_url() } else { "not configured" }
    );
}

/// Run one conversion end to end, including the media-server refresh
async fn convert_one(ctx: &RunContext, toolkit: &FfmpegToolkit, recovery: &RecoveryOrchestrator, input: &Path) -> Result<RunReport> {
    info!("{}{}", ctx.log_prefix(), "=".repeat(60));
    info!("{}Processing: {}", ctx.log_prefix(), input.display());

    let report = ConversionExecutor::new(ctx, toolkit)
        .with_remediator(recovery)
        .run(input)
        .await?;

    let promoted = matches!(
        report.outcome,
        Outcome::Done | Outcome::Skipped { reason: SkipReason::ManualReviewRequired, .. }
    );
    if promoted && report.output_exists() {
        jellyfin::refresh_if_configured(&ctx.config.media_server, ctx.config.http_timeout_secs).await;
    }
    Ok(report)
}

/// Remove the temp artifact left by an interrupted run. The original is never touched.
fn cleanup_interrupted(ctx: &RunContext, input: &Path) {
    warn!("{}Interrupted, cleaning up", ctx.log_prefix());
    let temp = temp_path_for(&output_path_for(input));
    if temp.exists() {
        match fs::remove_file(&temp) {
            Ok(()) => info!("{}Removed temp file: {}", ctx.log_prefix(), temp.display()),
            Err(e) => error!("{}Could not remove temp file {}: {}", ctx.log_prefix(), temp.display(), e),
        }
    }
}

/// Race a conversion against Ctrl-C. `None` means interrupted; the run
/// future (and with it ffmpeg) is dropped before this returns.
async fn convert_or_interrupt(
    ctx: &RunContext,
    toolkit: &FfmpegToolkit,
    recovery: &RecoveryOrchestrator,
    input: &Path,
) -> Option<Result<RunReport>> {
    tokio::select! {
        report = convert_one(ctx, toolkit, recovery, input) => Some(report),
        Ok(()) = tokio::signal::ctrl_c() => None,
    }
}

async fn run_convert(cfg: PipelineConfig, input: PathBuf) -> Result<i32> {
    let ctx = RunContext::from_config(cfg);
    let toolkit = FfmpegToolkit::new(&ctx.config);
    let recovery = RecoveryOrchestrator::from_config(&ctx.config);
    info!("{}Run started at {}", ctx.log_prefix(), ctx.started_at.format("%Y-%m-%d %H:%M:%S"));

    match convert_or_interrupt(&ctx, &toolkit, &recovery, &input).await {
        Some(report) => {
            let report = report?;
            info!("{}Outcome: {} (exit {})", ctx.log_prefix(), report.outcome.describe(), report.exit_code());
            Ok(report.exit_code())
        }
        None => {
            cleanup_interrupted(&ctx, &input);
            Ok(EXIT_INTERRUPTED)
        }
    }
}

async fn run_scan(cfg: PipelineConfig, roots: Vec<PathBuf>, convert: bool) -> Result<i32> {
    let roots = if roots.is_empty() { cfg.library_roots.clone() } else { roots };
    let results = tokio::task::spawn_blocking(move || scan::scan_library(&roots))
        .await
        .context("Library scan task failed")?;

    let mut candidates = Vec::new();
    for result in results {
        match result {
            scan::ScanResult::Candidate(path, size) => {
                println!("{}\t{}", size, path.display());
                candidates.push(path);
            }
            scan::ScanResult::Skipped(path, reason) => {
                info!("Skipped {}: {}", path.display(), reason);
            }
        }
    }

    if !convert || candidates.is_empty() {
        return Ok(0);
    }

    info!("Converting {} candidate(s)", candidates.len());
    let toolkit = FfmpegToolkit::new(&cfg);
    let recovery = RecoveryOrchestrator::from_config(&cfg);
    let mut failures = 0usize;
    for path in candidates {
        // Fresh context per file so every run gets its own id
        let ctx = RunContext::from_config(cfg.clone());
        let Some(outcome) = convert_or_interrupt(&ctx, &toolkit, &recovery, &path).await else {
            cleanup_interrupted(&ctx, &path);
            return Ok(EXIT_INTERRUPTED);
        };
        match outcome {
            Ok(report) if report.exit_code() == 0 => {}
            Ok(_) => failures += 1,
            Err(e) => {
                error!("{}{:#}", ctx.log_prefix(), e);
                failures += 1;
            }
        }
    }

    info!("Batch complete: {} file(s) not converted", failures);
    Ok(if failures == 0 { 0 } else { 1 })
}

async fn dispatch(cli: Cli, cfg: PipelineConfig) -> Result<i32> {
    match cli.command {
        Command::Convert { input } => run_convert(cfg, input).await,
        Command::Scan { roots, convert } => run_scan(cfg, roots, convert).await,
        Command::Webhook { listen } => {
            let mut cfg = cfg;
            if let Some(addr) = listen {
                cfg.webhook.listen_addr = addr;
            }
            webhook::serve(&cfg).await?;
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config_path = PipelineConfig::resolve_path(cli.config.as_deref());
    let cfg = match PipelineConfig::load_config(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&cfg.log_dir, cli.verbose);
    if let Some(path) = &config_path {
        info!("Config file: {}", path.display());
    }
    print_config(&cfg);

    let code = match dispatch(cli, cfg).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_convert_with_global_config() {
        let cli = Cli::try_parse_from(["mkv2mp4", "convert", "/m/a.mkv", "--config", "/etc/x.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/x.toml")));
        assert!(matches!(cli.command, Command::Convert { input } if input == PathBuf::from("/m/a.mkv")));
    }

    #[test]
    fn parses_scan_roots() {
        let cli = Cli::try_parse_from(["mkv2mp4", "scan", "--root", "/a", "--root", "/b", "--convert"]).unwrap();
        match cli.command {
            Command::Scan { roots, convert } => {
                assert_eq!(roots, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
                assert!(convert);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn convert_requires_an_input() {
        assert!(Cli::try_parse_from(["mkv2mp4", "convert"]).is_err());
    }

    #[test]
    fn daily_log_is_created_in_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let mut tee = Tee { file: open_daily_log(&log_dir).unwrap() };
        tee.write_all(b"hello\n").unwrap();
        tee.flush().unwrap();

        let path = daily_log_path(&log_dir);
        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("conversion_") && name.ends_with(".log"));
        assert_eq!(fs::read_to_string(path).unwrap(), "hello\n");
    }

    #[tokio::test]
    async fn missing_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = PipelineConfig::default_config();
        cfg.log_dir = dir.path().to_path_buf();
        cfg.ledger_enabled = false;
        assert!(run_convert(cfg, dir.path().join("absent.mkv")).await.is_err());
    }
}
