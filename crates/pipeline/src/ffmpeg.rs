use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Lines of combined output kept for diagnostics
const OUTPUT_TAIL_LINES: usize = 20;

/// Player compatibility tag for the copied video stream
pub fn compat_video_tag(video_codec: &str) -> Option<&'static str> {
    match video_codec.to_lowercase().as_str() {
        "hevc" | "h265" => Some("hvc1"),
        "h264" => Some("avc1"),
        _ => None,
    }
}

/// Arguments for the MKV to MP4 remux: first video stream, all audio,
/// optional subtitles converted to mov_text, fast-start layout.
pub fn build_remux_args(input: &Path, output: &Path, video_codec: &str) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-map".into(),
        "0:v:0".into(),
        "-map".into(),
        "0:a".into(),
        "-map".into(),
        "0:s?".into(),
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        "copy".into(),
        "-c:s".into(),
        "mov_text".into(),
    ];

    if let Some(tag) = compat_video_tag(video_codec) {
        args.push("-tag:v".into());
        args.push(tag.into());
    }

    args.extend(
        [
            "-movflags", "+faststart",
            "-max_muxing_queue_size", "1024",
            "-f", "mp4",
            "-loglevel", "warning",
            "-stats",
            "-y",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Result from one transcode process
#[derive(Debug, Clone)]
pub struct TranscodeResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Last lines of combined stdout/stderr
    pub output_tail: String,
}

/// Forward every line of a child pipe. ffmpeg's `-stats` output rewrites its
/// line with `\r`, so both separators end a line.
async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(reader).split(b'\r');
    while let Ok(Some(segment)) = segments.next_segment().await {
        for line in String::from_utf8_lossy(&segment).lines() {
            let line = line.trim();
            if !line.is_empty() && tx.send(line.to_string()).is_err() {
                return;
            }
        }
    }
}

/// Consume output lines: throttled progress logging plus a bounded tail
async fn collect_output(
    mut rx: mpsc::UnboundedReceiver<String>,
    label: String,
    progress_interval: Duration,
) -> String {
    let mut tail: VecDeque<String> = VecDeque::with_capacity(OUTPUT_TAIL_LINES);
    let mut last_progress: Option<Instant> = None;

    while let Some(line) = rx.recv().await {
        if line.contains("time=") {
            let due = last_progress
                .map(|t| t.elapsed() >= progress_interval)
                .unwrap_or(true);
            if due {
                info!("{}Progress: {}", label, line);
                last_progress = Some(Instant::now());
            }
        } else {
            debug!("{}ffmpeg: {}", label, line);
        }

        if tail.len() == OUTPUT_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    tail.into_iter().collect::<Vec<_>>().join("\n")
}

/// Run ffmpeg while draining stdout and stderr concurrently.
///
/// The child is killed when the returned future is dropped or when the
/// optional timeout elapses. A non-zero exit is reported through
/// `TranscodeResult::success`; spawn failures and timeouts are errors.
pub async fn execute_ffmpeg(
    ffmpeg_bin: &Path,
    args: &[String],
    timeout_secs: Option<u64>,
    progress_interval: Duration,
    label: &str,
) -> Result<TranscodeResult> {
    debug!("{}Executing: {} {}", label, ffmpeg_bin.display(), args.join(" "));

    let mut child = Command::new(ffmpeg_bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn ffmpeg process at: {}", ffmpeg_bin.display()))?;

    let stdout = child.stdout.take()
        .ok_or_else(|| anyhow!("Failed to capture ffmpeg stdout"))?;
    let stderr = child.stderr.take()
        .ok_or_else(|| anyhow!("Failed to capture ffmpeg stderr"))?;

    let (tx, rx) = mpsc::unbounded_channel();
    let stdout_handle = tokio::spawn(forward_lines(stdout, tx.clone()));
    let stderr_handle = tokio::spawn(forward_lines(stderr, tx));
    let collector = tokio::spawn(collect_output(rx, label.to_string(), progress_interval));

    let status = match timeout_secs {
        Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), child.wait()).await {
            Ok(result) => result.context("Failed to wait for ffmpeg process")?,
            Err(_) => {
                child.kill().await.context("Failed to kill stuck ffmpeg process")?;
                return Err(anyhow!("ffmpeg timed out after {} seconds and was killed", secs));
            }
        },
        None => child.wait().await.context("Failed to wait for ffmpeg process")?,
    };

    stdout_handle.await.context("Failed to drain ffmpeg stdout")?;
    stderr_handle.await.context("Failed to drain ffmpeg stderr")?;
    let output_tail = collector.await.context("Failed to collect ffmpeg output")?;

    Ok(TranscodeResult {
        success: status.success(),
        exit_code: status.code(),
        output_tail,
    })
}
