//! Best-effort remediation of a bad release through the download manager.
//!
//! Each step runs in isolation: a failed blocklist does not stop the search,
//! a failed search does not stop the file-record deletion.

use std::path::Path;
use std::sync::Arc;
use async_trait::async_trait;
use log::{info, warn};
use serde::Serialize;
use thiserror::Error;
use crate::config::PipelineConfig;
use crate::radarr::{
    find_movie, latest_grab, BlocklistRequest, DownloadManager, MovieFileRecord, RadarrClient,
    RadarrError,
};
use crate::release::parse_title_year;

/// What the orchestrator managed to do for one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemediationStatus {
    pub movie_id: Option<i64>,
    pub blocklisted: bool,
    pub search_triggered: bool,
    pub file_record_deleted: bool,
    /// Per-step errors that were logged and skipped
    pub step_errors: Vec<String>,
}

impl RemediationStatus {
    /// A remediation attempt counts once blocklist or search went through
    pub fn succeeded(&self) -> bool {
        self.blocklisted || self.search_triggered
    }
}

#[derive(Debug, Error)]
pub enum RemediationFailed {
    #[error("download manager integration not configured")]
    NotConfigured,
    #[error("download manager catalog unavailable: {0}")]
    CatalogUnavailable(#[source] RadarrError),
    #[error("movie not found in download manager: {title} ({year:?})")]
    MovieNotFound { title: String, year: Option<i32> },
    #[error("neither blocklist nor search succeeded for movie {}", .0.movie_id.unwrap_or_default())]
    NothingCompleted(RemediationStatus),
}

#[async_trait]
pub trait Remediator: Send + Sync {
    /// Remediate the release behind `path`; `label` prefixes log lines
    async fn recover(&self, path: &Path, reason: &str, label: &str) -> Result<RemediationStatus, RemediationFailed>;
}

pub struct RecoveryOrchestrator {
    manager: Option<Arc<dyn DownloadManager>>,
}

impl RecoveryOrchestrator {
    pub fn new(manager: Arc<dyn DownloadManager>) -> Self {
        Self { manager: Some(manager) }
    }

    /// An orchestrator whose every attempt reports `NotConfigured`
    pub fn disabled() -> Self {
        Self { manager: None }
    }

    /// Radarr-backed orchestrator when an API key is configured
    pub fn from_config(config: &PipelineConfig) -> Self {
        match RadarrClient::new(&config.download_manager, config.http_timeout_secs) {
            Ok(client) => Self::new(Arc::new(client)),
            Err(RadarrError::NotConfigured) => Self::disabled(),
            Err(e) => {
                warn!("Download manager client unavailable: {}", e);
                Self::disabled()
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.manager.is_some()
    }

    async fn blocklist_latest_grab(
        manager: &dyn DownloadManager,
        movie_id: i64,
        reason: &str,
        label: &str,
        status: &mut RemediationStatus,
    ) {
        let history = match manager.history(movie_id).await {
            Ok(history) => history,
            Err(e) => {
                warn!("{}Could not read download history: {}", label, e);
                status.step_errors.push(format!("history: {}", e));
                return;
            }
        };

        let Some(grab) = latest_grab(&history) else {
            warn!("{}No grabbed release in history, skipping blocklist", label);
            return;
        };

        let request = BlocklistRequest::from_grab(movie_id, grab, reason);
        match manager.blocklist(&request).await {
            Ok(()) => {
                info!("{}✅ Release added to blocklist: {}", label, request.source_title);
                status.blocklisted = true;
            }
            Err(e) => {
                warn!("{}Could not blocklist release: {}", label, e);
                status.step_errors.push(format!("blocklist: {}", e));
            }
        }
    }

    async fn find_file_record(
        manager: &dyn DownloadManager,
        movie_id: i64,
        file_name: &str,
        label: &str,
        status: &mut RemediationStatus,
    ) -> Option<MovieFileRecord> {
        match manager.movie_files(movie_id).await {
            Ok(files) => {
                let found = files.into_iter().find(|f| f.file_name() == file_name);
                if found.is_none() {
                    warn!("{}Could not find specific movie file record for {}", label, file_name);
                }
                found
            }
            Err(e) => {
                warn!("{}Could not list movie files: {}", label, e);
                status.step_errors.push(format!("movie files: {}", e));
                None
            }
        }
    }
}

#[async_trait]
impl Remediator for RecoveryOrchestrator {
    async fn recover(&self, path: &Path, reason: &str, label: &str) -> Result<RemediationStatus, RemediationFailed> {
        let Some(manager) = self.manager.as_deref() else {
            warn!("{}Download manager integration not configured, skipping recovery", label);
            return Err(RemediationFailed::NotConfigured);
        };

        let title_year = parse_title_year(path);
        info!("{}Recovery for: {} ({:?})", label, title_year.title, title_year.year);

        let movies = manager
            .list_movies()
            .await
            .map_err(RemediationFailed::CatalogUnavailable)?;
        let movie = find_movie(&movies, &title_year.title, title_year.year).ok_or_else(|| {
            warn!("{}Movie not found in download manager: {}", label, title_year.title);
            RemediationFailed::MovieNotFound {
                title: title_year.title.clone(),
                year: title_year.year,
            }
        })?;
        let movie_id = movie.id;
        info!("{}Found movie in download manager (ID: {})", label, movie_id);

        let mut status = RemediationStatus {
            movie_id: Some(movie_id),
            ..Default::default()
        };

        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let file_record = Self::find_file_record(manager, movie_id, file_name, label, &mut status).await;

        Self::blocklist_latest_grab(manager, movie_id, reason, label, &mut status).await;

        match manager.search_movie(movie_id).await {
            Ok(()) => {
                info!("{}✅ Automatic search triggered", label);
                status.search_triggered = true;
            }
            Err(e) => {
                warn!("{}Could not trigger search: {}", label, e);
                status.step_errors.push(format!("search: {}", e));
            }
        }

        if let Some(record) = file_record {
            match manager.delete_movie_file(record.id).await {
                Ok(()) => {
                    info!("{}✅ Bad file record removed from download manager", label);
                    status.file_record_deleted = true;
                }
                Err(e) => {
                    warn!("{}Could not remove file record {}: {}", label, record.id, e);
                    status.step_errors.push(format!("delete file record: {}", e));
                }
            }
        }

        if status.succeeded() {
            Ok(status)
        } else {
            Err(RemediationFailed::NothingCompleted(status))
        }
    }
}
