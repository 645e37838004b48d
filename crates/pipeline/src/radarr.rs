//! Download-manager collaborator (Radarr v3 API).

use std::time::Duration;
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::config::ServiceConfig;

pub const HEADER_API_KEY: &str = "x-api-key";

#[derive(Debug, Error)]
pub enum RadarrError {
    #[error("download manager is not configured (no API key)")]
    NotConfigured,
    #[error("request to download manager failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{method} {path} returned status {status}")]
    Status {
        method: Method,
        path: String,
        status: u16,
    },
}

pub type RadarrResult<T> = std::result::Result<T, RadarrError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub has_file: bool,
    #[serde(default)]
    pub tmdb_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieFileRecord {
    pub id: i64,
    #[serde(default)]
    pub path: String,
}

impl MovieFileRecord {
    pub fn file_name(&self) -> &str {
        self.path.rsplit(['/', '\\']).next().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    #[serde(default)]
    pub event_type: String,
    pub source_title: Option<String>,
    #[serde(default)]
    pub quality: serde_json::Value,
    pub date: Option<String>,
    pub download_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlocklistRequest {
    pub movie_id: i64,
    pub source_title: String,
    pub quality: serde_json::Value,
    pub date: Option<String>,
    pub reason: String,
}

impl BlocklistRequest {
    pub fn from_grab(movie_id: i64, grab: &HistoryRecord, reason: &str) -> Self {
        Self {
            movie_id,
            source_title: grab.source_title.clone().unwrap_or_else(|| "Unknown".to_string()),
            quality: grab.quality.clone(),
            date: grab.date.clone(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchCommand {
    name: &'static str,
    movie_ids: Vec<i64>,
}

/// Case-insensitive title match, constrained by year when one is known
pub fn find_movie<'a>(movies: &'a [Movie], title: &str, year: Option<i32>) -> Option<&'a Movie> {
    movies.iter().find(|m| {
        m.title.to_lowercase() == title.to_lowercase() && (year.is_none() || m.year == year)
    })
}

/// Most recent `grabbed` history entry. Ties keep list order, which the
/// API returns newest first.
pub fn latest_grab(history: &[HistoryRecord]) -> Option<&HistoryRecord> {
    history
        .iter()
        .filter(|h| h.event_type.eq_ignore_ascii_case("grabbed"))
        .fold(None, |best: Option<&HistoryRecord>, entry| match best {
            Some(b) if entry.date <= b.date => Some(b),
            _ => Some(entry),
        })
}

/// Operations the pipeline needs from the download manager
#[async_trait]
pub trait DownloadManager: Send + Sync {
    async fn list_movies(&self) -> RadarrResult<Vec<Movie>>;
    async fn get_movie(&self, movie_id: i64) -> RadarrResult<Movie>;
    async fn movie_files(&self, movie_id: i64) -> RadarrResult<Vec<MovieFileRecord>>;
    async fn history(&self, movie_id: i64) -> RadarrResult<Vec<HistoryRecord>>;
    async fn blocklist(&self, request: &BlocklistRequest) -> RadarrResult<()>;
    async fn search_movie(&self, movie_id: i64) -> RadarrResult<()>;
    async fn delete_movie_file(&self, movie_file_id: i64) -> RadarrResult<()>;
}

#[derive(Debug, Clone)]
pub struct RadarrClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RadarrClient {
    pub fn new(service: &ServiceConfig, timeout_secs: u64) -> RadarrResult<Self> {
        if !service.enabled() {
            return Err(RadarrError::NotConfigured);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: service.base_url().to_string(),
            api_key: service.api_key.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/api/v3{}", self.base_url, path);
        debug!("radarr: {} {}", method, url);
        self.client
            .request(method, url)
            .header(HEADER_API_KEY, &self.api_key)
    }

    async fn send(&self, method: Method, path: &str, builder: RequestBuilder) -> RadarrResult<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RadarrError::Status {
                method,
                path: path.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> RadarrResult<T> {
        let builder = self.request(Method::GET, path);
        let response = self.send(Method::GET, path, builder).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl DownloadManager for RadarrClient {
    async fn list_movies(&self) -> RadarrResult<Vec<Movie>> {
        self.get_json("/movie").await
    }

    async fn get_movie(&self, movie_id: i64) -> RadarrResult<Movie> {
        self.get_json(&format!("/movie/{}", movie_id)).await
    }

    async fn movie_files(&self, movie_id: i64) -> RadarrResult<Vec<MovieFileRecord>> {
        self.get_json(&format!("/moviefile?movieId={}", movie_id)).await
    }

    async fn history(&self, movie_id: i64) -> RadarrResult<Vec<HistoryRecord>> {
        self.get_json(&format!("/history/movie?movieId={}", movie_id)).await
    }

    async fn blocklist(&self, request: &BlocklistRequest) -> RadarrResult<()> {
        let builder = self.request(Method::POST, "/blocklist").json(request);
        self.send(Method::POST, "/blocklist", builder).await?;
        Ok(())
    }

    async fn search_movie(&self, movie_id: i64) -> RadarrResult<()> {
        let command = SearchCommand {
            name: "MoviesSearch",
            movie_ids: vec![movie_id],
        };
        let builder = self.request(Method::POST, "/command").json(&command);
        self.send(Method::POST, "/command", builder).await?;
        Ok(())
    }

    async fn delete_movie_file(&self, movie_file_id: i64) -> RadarrResult<()> {
        let path = format!("/moviefile/{}", movie_file_id);
        let builder = self.request(Method::DELETE, &path);
        self.send(Method::DELETE, &path, builder).await?;
        Ok(())
    }
}
