use std::sync::Arc;
use chrono::{DateTime, Local};
use log::{info, warn};
use uuid::Uuid;
use crate::config::PipelineConfig;
use crate::ledger::{CorruptionSink, SqliteLedger};

/// Per-invocation state handed to the executor and the recovery step
#[derive(Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Local>,
    pub config: PipelineConfig,
    pub ledger: Option<Arc<dyn CorruptionSink>>,
}

impl RunContext {
    /// Context without a ledger
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Local::now(),
            config,
            ledger: None,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn CorruptionSink>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Build a context and open the configured ledger. An unusable ledger
    /// is logged and the run continues without one.
    pub fn from_config(config: PipelineConfig) -> Self {
        let ledger_path = config.ledger_db_path();
        let enabled = config.ledger_enabled;
        let ctx = Self::new(config);
        if !enabled {
            return ctx;
        }

        match SqliteLedger::open(&ledger_path) {
            Ok(ledger) => {
                info!("Corruption ledger: {}", ledger_path.display());
                ctx.with_ledger(Arc::new(ledger))
            }
            Err(e) => {
                warn!("Corruption ledger unavailable ({}), continuing without it", e);
                ctx
            }
        }
    }

    pub fn short_id(&self) -> String {
        self.run_id.simple().to_string()[..8].to_string()
    }

    /// Prefix for log lines of this run
    pub fn log_prefix(&self) -> String {
        format!("[{}] ", self.short_id())
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("started_at", &self.started_at)
            .field("ledger", &self.ledger.is_some())
            .finish()
    }
}
