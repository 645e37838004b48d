//! Media-server collaborator (Jellyfin API).

use std::time::Duration;
use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use crate::config::ServiceConfig;

pub const HEADER_TOKEN: &str = "x-mediabrowser-token";

#[derive(Debug, Default, Deserialize)]
struct UserItem {
    #[serde(rename = "UserData", default)]
    user_data: UserData,
}

#[derive(Debug, Default, Deserialize)]
struct UserData {
    #[serde(rename = "PlayCount", default)]
    play_count: u32,
}

#[derive(Debug, Clone)]
pub struct JellyfinClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl JellyfinClient {
    /// Client for the configured server, `None` when no API key is set
    pub fn new(service: &ServiceConfig, timeout_secs: u64) -> Result<Option<Self>> {
        if !service.enabled() {
            return Ok(None);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build media server HTTP client")?;
        Ok(Some(Self {
            client,
            base_url: service.base_url().to_string(),
            api_key: service.api_key.clone(),
        }))
    }

    async fn try_refresh(&self) -> Result<()> {
        let url = format!("{}/Library/Refresh", self.base_url);
        debug!("jellyfin: POST {}", url);
        let response = self
            .client
            .post(&url)
            .header(HEADER_TOKEN, &self.api_key)
            .send()
            .await
            .context("Library refresh request failed")?;
        if response.status() != StatusCode::NO_CONTENT {
            bail!("Library refresh returned status {}", response.status().as_u16());
        }
        Ok(())
    }

    /// Ask the server to rescan its libraries. Failures are only logged.
    pub async fn refresh_library(&self) -> bool {
        match self.try_refresh().await {
            Ok(()) => {
                info!("Jellyfin library refresh triggered");
                true
            }
            Err(e) => {
                warn!("Failed to trigger Jellyfin refresh: {:#}", e);
                false
            }
        }
    }

    async fn try_play_count(&self, user_id: &str, item_id: &str) -> Result<u32> {
        let url = format!("{}/Users/{}/Items/{}", self.base_url, user_id, item_id);
        debug!("jellyfin: GET {}", url);
        let response = self
            .client
            .get(&url)
            .header(HEADER_TOKEN, &self.api_key)
            .send()
            .await
            .context("Item request failed")?
            .error_for_status()?;
        let item: UserItem = response.json().await.context("Invalid item payload")?;
        Ok(item.user_data.play_count)
    }

    /// How often the user played the item, 0 when it cannot be determined
    pub async fn play_count(&self, user_id: &str, item_id: &str) -> u32 {
        match self.try_play_count(user_id, item_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to get watch count: {:#}", e);
                0
            }
        }
    }
}

/// Refresh the library when a media server is configured, warn otherwise
pub async fn refresh_if_configured(service: &ServiceConfig, timeout_secs: u64) {
    match JellyfinClient::new(service, timeout_secs) {
        Ok(Some(client)) => {
            client.refresh_library().await;
        }
        Ok(None) => warn!("Jellyfin API key not set, skipping library refresh"),
        Err(e) => warn!("{:#}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client_for(server: &MockServer) -> JellyfinClient {
        let service = ServiceConfig { url: server.base_url(), api_key: "token".to_string() };
        JellyfinClient::new(&service, 5).unwrap().unwrap()
    }

    #[test]
    fn no_api_key_means_no_client() {
        let service = ServiceConfig { url: "http://localhost:8096".to_string(), api_key: String::new() };
        assert!(JellyfinClient::new(&service, 5).unwrap().is_none());
    }

    #[tokio::test]
    async fn refresh_posts_with_token() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/Library/Refresh").header(HEADER_TOKEN, "token");
                then.status(204);
            })
            .await;

        assert!(client_for(&server).refresh_library().await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn refresh_with_unexpected_status_is_reported_not_raised() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/Library/Refresh");
                then.status(401);
            })
            .await;

        assert!(!client_for(&server).refresh_library().await);
    }

    #[tokio::test]
    async fn play_count_reads_user_data() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/Users/u1/Items/i1");
                then.status(200).json_body(json!({"Name": "Old Movie", "UserData": {"PlayCount": 3}}));
            })
            .await;

        assert_eq!(client_for(&server).play_count("u1", "i1").await, 3);
    }

    #[tokio::test]
    async fn play_count_defaults_to_zero_on_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/Users/u1/Items/missing");
                then.status(404);
            })
            .await;

        let client = client_for(&server);
        assert_eq!(client.play_count("u1", "missing").await, 0);
    }
}
