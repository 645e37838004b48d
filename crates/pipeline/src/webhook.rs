//! HTTP receiver for media-server playback webhooks.

use std::sync::Arc;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde_json::{json, Value};
use crate::config::PipelineConfig;
use crate::jellyfin::JellyfinClient;
use crate::radarr::{DownloadManager, RadarrClient, RadarrError};
use crate::smart_download::{PlaybackEvent, SmartDownloader, WatchHistory};

/// Event types that mean the item was watched to the end
pub const COMPLETE_PLAYBACK_EVENTS: [&str; 2] = ["PlaybackStop", "item.markplayed"];

#[derive(Clone)]
pub struct WebhookState {
    pub downloader: Arc<SmartDownloader>,
    pub completion_threshold_pct: f64,
}

impl WebhookState {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let history: Option<Arc<dyn WatchHistory>> =
            JellyfinClient::new(&config.media_server, config.http_timeout_secs)?
                .map(|c| Arc::new(c) as Arc<dyn WatchHistory>);
        let manager: Option<Arc<dyn DownloadManager>> =
            match RadarrClient::new(&config.download_manager, config.http_timeout_secs) {
                Ok(client) => Some(Arc::new(client)),
                Err(RadarrError::NotConfigured) => None,
                Err(e) => {
                    return Err(anyhow::Error::new(e).context("Failed to build download manager client"))
                }
            };

        Ok(Self {
            downloader: Arc::new(SmartDownloader::new(config.webhook.clone(), history, manager)),
            completion_threshold_pct: config.webhook.completion_threshold_pct,
        })
    }
}

type JsonResponse = (StatusCode, Json<Value>);

fn ignored(reason: &str) -> JsonResponse {
    (StatusCode::OK, Json(json!({"status": "ignored", "reason": reason})))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

async fn playback(State(state): State<WebhookState>, Json(event): Json<PlaybackEvent>) -> JsonResponse {
    let name = if event.item.name.is_empty() { "Unknown" } else { event.item.name.as_str() };
    info!("Received playback event: {}", name);

    if !COMPLETE_PLAYBACK_EVENTS.contains(&event.event.as_str()) {
        info!("Ignoring event type: {}", event.event);
        return ignored("not a complete playback");
    }

    if let Some(pct) = event.watch_percentage() {
        if pct < state.completion_threshold_pct {
            info!("Incomplete watch ({:.1}%), skipping", pct);
            return ignored("incomplete watch");
        }
    }

    match state.downloader.handle(&event).await {
        Ok(outcome) => (StatusCode::OK, Json(json!({"status": "success", "result": outcome}))),
        Err(e) => {
            error!("Smart download failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "error": e.to_string()})),
            )
        }
    }
}

async fn generic(Json(payload): Json<Value>) -> Json<Value> {
    let text = payload.to_string();
    let preview: String = text.chars().take(200).collect();
    info!("Received generic Jellyfin event: {}", preview);
    Json(json!({"status": "received"}))
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jellyfin/playback", post(playback))
        .route("/jellyfin/generic", post(generic))
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn serve(config: &PipelineConfig) -> Result<()> {
    let state = WebhookState::from_config(config)?;
    let addr = &config.webhook.listen_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind webhook listener on {}", addr))?;
    info!("Webhook server listening on {}", addr);
    axum::serve(listener, router(state))
        .await
        .context("Webhook server stopped unexpectedly")
}
