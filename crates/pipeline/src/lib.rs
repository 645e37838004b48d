pub mod config;
pub mod context;
pub mod scan;
pub mod sidecar;
pub mod ffprobe;
pub mod verify;
pub mod release;
pub mod probe;
pub mod planner;
pub mod ffmpeg;
pub mod toolkit;
pub mod executor;
pub mod ledger;
pub mod radarr;
pub mod recovery;
pub mod jellyfin;
pub mod smart_download;
pub mod webhook;
pub mod analytics;

pub use config::PipelineConfig;
pub use context::RunContext;
pub use executor::{ConversionExecutor, Outcome, RunReport};
pub use ffprobe::{FFProbeData, FFProbeFormat, FFProbeStream};
pub use ledger::{CorruptionEvent, CorruptionSink, SqliteLedger};
pub use probe::MediaFile;
pub use recovery::{RecoveryOrchestrator, Remediator};
pub use toolkit::{FfmpegToolkit, MediaToolkit};
