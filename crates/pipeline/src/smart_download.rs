//! Watch-pattern driven download heuristic fed by playback events.

use std::fmt;
use std::sync::Arc;
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use crate::config::WebhookConfig;
use crate::jellyfin::JellyfinClient;
use crate::radarr::{find_movie, DownloadManager, RadarrError};

/// Title fragments marking editions that tend to disappear from indexers
pub const RARE_KEYWORDS: [&str; 9] = [
    "criterion",
    "director's cut",
    "special edition",
    "restored",
    "remastered",
    "limited edition",
    "collectors edition",
    "uncut",
    "extended",
];

/// Films released before this year count as rare
pub const RARE_BEFORE_YEAR: i32 = 1990;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PlaybackUser {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PlaybackItem {
    pub name: String,
    #[serde(rename = "Type")]
    pub kind: String,
    pub production_year: Option<i32>,
    pub run_time_ticks: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PlaybackSession {
    pub remote_end_point: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PlaybackInfo {
    pub position_ticks: i64,
}

/// Jellyfin webhook payload, only the fields the heuristic reads
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PlaybackEvent {
    pub event: String,
    pub user: PlaybackUser,
    pub user_id: String,
    pub item_id: String,
    pub item: PlaybackItem,
    pub session: PlaybackSession,
    pub playback_info: PlaybackInfo,
}

impl PlaybackEvent {
    /// Watched share of the runtime in percent, None when the runtime is unknown
    pub fn watch_percentage(&self) -> Option<f64> {
        (self.item.run_time_ticks > 0)
            .then(|| self.playback_info.position_ticks as f64 / self.item.run_time_ticks as f64 * 100.0)
    }
}

/// Source of per-user watch counts
#[async_trait]
pub trait WatchHistory: Send + Sync {
    async fn watch_count(&self, user_id: &str, item_id: &str) -> u32;
}

#[async_trait]
impl WatchHistory for JellyfinClient {
    async fn watch_count(&self, user_id: &str, item_id: &str) -> u32 {
        self.play_count(user_id, item_id).await
    }
}

pub fn is_local_client(ip: &str, settings: &WebhookConfig) -> bool {
    ip.starts_with(&settings.local_network_prefix) || ip.starts_with(&settings.tailscale_network_prefix)
}

pub fn is_rare(title: &str, year: Option<i32>) -> bool {
    let title = title.to_lowercase();
    if RARE_KEYWORDS.iter().any(|k| title.contains(k)) {
        return true;
    }
    year.is_some_and(|y| y < RARE_BEFORE_YEAR)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadTrigger {
    WatchCount(u32),
    Rare,
    LocalRewatch,
}

impl fmt::Display for DownloadTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadTrigger::WatchCount(n) => write!(f, "watched {} times", n),
            DownloadTrigger::Rare => f.write_str("rare/special content"),
            DownloadTrigger::LocalRewatch => f.write_str("local user rewatch"),
        }
    }
}

/// First matching rule wins: watch count, then rarity, then local rewatch
pub fn decide(watch_count: u32, threshold: u32, rare: bool, local: bool) -> Option<DownloadTrigger> {
    if watch_count >= threshold {
        Some(DownloadTrigger::WatchCount(watch_count))
    } else if rare {
        Some(DownloadTrigger::Rare)
    } else if local && watch_count >= 1 {
        Some(DownloadTrigger::LocalRewatch)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DownloadOutcome {
    NotTracked { reason: String },
    NoDownloadNeeded,
    ManagerNotConfigured,
    MovieNotFound { title: String },
    AlreadyPresent { movie_id: i64 },
    SearchTriggered { movie_id: i64, trigger: DownloadTrigger },
}

pub struct SmartDownloader {
    settings: WebhookConfig,
    history: Option<Arc<dyn WatchHistory>>,
    manager: Option<Arc<dyn DownloadManager>>,
}

impl SmartDownloader {
    pub fn new(
        settings: WebhookConfig,
        history: Option<Arc<dyn WatchHistory>>,
        manager: Option<Arc<dyn DownloadManager>>,
    ) -> Self {
        Self { settings, history, manager }
    }

    /// Decide and act on one completed playback. Errors are download-manager
    /// transport or API failures.
    pub async fn handle(&self, event: &PlaybackEvent) -> Result<DownloadOutcome, RadarrError> {
        let item = &event.item;
        let client_ip = &event.session.remote_end_point;
        info!("Playback event: {} watched {} from {}", event.user.name, item.name, client_ip);

        if item.kind != "Movie" {
            info!("Skipping non-movie content: {}", item.kind);
            return Ok(DownloadOutcome::NotTracked { reason: format!("not a movie: {}", item.kind) });
        }
        if event.user.name != self.settings.tracked_user {
            info!("Skipping non-tracked user: {}", event.user.name);
            return Ok(DownloadOutcome::NotTracked { reason: format!("untracked user: {}", event.user.name) });
        }

        let local = is_local_client(client_ip, &self.settings);
        info!("User location: {} ({})", if local { "Local" } else { "Remote" }, client_ip);

        let watch_count = match &self.history {
            Some(history) => history.watch_count(&event.user_id, &event.item_id).await,
            None => 0,
        };
        info!("Watch count for {}: {}", item.name, watch_count);

        let rare = is_rare(&item.name, item.production_year);
        if rare {
            info!("Rare content detected: {}", item.name);
        }

        let Some(trigger) = decide(watch_count, self.settings.watch_count_threshold, rare, local) else {
            info!("No download needed for {}", item.name);
            return Ok(DownloadOutcome::NoDownloadNeeded);
        };
        info!("DOWNLOAD TRIGGERED: {} - Reason: {}", item.name, trigger);

        let Some(manager) = self.manager.as_deref() else {
            warn!("Download manager integration not configured, cannot download {}", item.name);
            return Ok(DownloadOutcome::ManagerNotConfigured);
        };

        let movies = manager.list_movies().await?;
        let Some(movie) = find_movie(&movies, &item.name, None) else {
            warn!("Movie not found in download manager: {}", item.name);
            return Ok(DownloadOutcome::MovieNotFound { title: item.name.clone() });
        };

        let movie = manager.get_movie(movie.id).await?;
        if movie.has_file {
            info!("Movie already downloaded: {}", movie.title);
            return Ok(DownloadOutcome::AlreadyPresent { movie_id: movie.id });
        }

        manager.search_movie(movie.id).await?;
        info!("Download triggered for: {}", movie.title);
        Ok(DownloadOutcome::SearchTriggered { movie_id: movie.id, trigger })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use crate::recovery::tests::FakeManager;

    struct FixedHistory(u32);

    #[async_trait]
    impl WatchHistory for FixedHistory {
        async fn watch_count(&self, _user_id: &str, _item_id: &str) -> u32 {
            self.0
        }
    }

    fn event(title: &str, year: i32, ip: &str) -> PlaybackEvent {
        serde_json::from_value(json!({
            "Event": "PlaybackStop",
            "User": {"Name": "admin"},
            "UserId": "u1",
            "ItemId": "i1",
            "Item": {"Name": title, "Type": "Movie", "ProductionYear": year, "RunTimeTicks": 1000},
            "Session": {"RemoteEndPoint": ip},
            "PlaybackInfo": {"PositionTicks": 950}
        }))
        .unwrap()
    }

    fn downloader(watches: u32, manager: Arc<FakeManager>) -> SmartDownloader {
        SmartDownloader::new(WebhookConfig::default(), Some(Arc::new(FixedHistory(watches))), Some(manager))
    }

    #[test]
    fn payload_parses_pascal_case() {
        let e = event("The Long Walk", 2025, "192.168.1.100");
        assert_eq!(e.user.name, "admin");
        assert_eq!(e.item.kind, "Movie");
        assert_eq!(e.item.production_year, Some(2025));
        assert_eq!(e.watch_percentage(), Some(95.0));
        assert_eq!(PlaybackEvent::default().watch_percentage(), None);
    }

    #[test]
    fn local_and_tailscale_prefixes() {
        let settings = WebhookConfig::default();
        assert!(is_local_client("192.168.1.100", &settings));
        assert!(is_local_client("100.64.0.7", &settings));
        assert!(!is_local_client("8.8.8.8", &settings));
    }

    #[test]
    fn rarity_from_keywords_or_age() {
        assert!(is_rare("Blade Runner Director's Cut", Some(2007)));
        assert!(is_rare("Aliens EXTENDED", None));
        assert!(is_rare("Old Movie", Some(1985)));
        assert!(!is_rare("Old Movie", Some(1990)));
        assert!(!is_rare("New Movie", None));
    }

    #[test]
    fn decision_priority() {
        assert_eq!(decide(2, 2, true, true), Some(DownloadTrigger::WatchCount(2)));
        assert_eq!(decide(0, 2, true, false), Some(DownloadTrigger::Rare));
        assert_eq!(decide(1, 2, false, true), Some(DownloadTrigger::LocalRewatch));
        assert_eq!(decide(1, 2, false, false), None);
        assert_eq!(decide(0, 2, false, true), None);
    }

    proptest! {
        #[test]
        fn reaching_threshold_always_downloads(
            count in 0u32..50,
            threshold in 1u32..10,
            rare in any::<bool>(),
            local in any::<bool>(),
        ) {
            let decision = decide(count, threshold, rare, local);
            if count >= threshold {
                prop_assert_eq!(decision, Some(DownloadTrigger::WatchCount(count)));
            }
            if decision.is_none() {
                prop_assert!(count < threshold && !rare);
            }
        }
    }

    #[tokio::test]
    async fn rewatch_triggers_search_for_missing_movie() {
        let manager = Arc::new(FakeManager::with_movie("The Long Walk", 2025, false));
        let outcome = downloader(2, manager.clone())
            .handle(&event("The Long Walk", 2025, "8.8.8.8"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            DownloadOutcome::SearchTriggered { movie_id: 7, trigger: DownloadTrigger::WatchCount(2) }
        );
        assert_eq!(manager.calls(), vec!["list", "get 7", "search 7"]);
    }

    #[tokio::test]
    async fn existing_file_is_not_searched_again() {
        let manager = Arc::new(FakeManager::with_movie("Old Movie", 1985, true));
        let outcome = downloader(0, manager.clone())
            .handle(&event("Old Movie", 1985, "8.8.8.8"))
            .await
            .unwrap();

        assert_eq!(outcome, DownloadOutcome::AlreadyPresent { movie_id: 7 });
        assert!(!manager.calls().iter().any(|c| c.starts_with("search")));
    }

    #[tokio::test]
    async fn single_remote_watch_of_recent_film_does_nothing() {
        let manager = Arc::new(FakeManager::with_movie("New Movie", 2024, false));
        let outcome = downloader(1, manager.clone())
            .handle(&event("New Movie", 2024, "8.8.8.8"))
            .await
            .unwrap();

        assert_eq!(outcome, DownloadOutcome::NoDownloadNeeded);
        assert!(manager.calls().is_empty());
    }

    #[tokio::test]
    async fn untracked_user_and_episodes_are_ignored() {
        let manager = Arc::new(FakeManager::with_movie("Old Movie", 1985, false));
        let sd = downloader(5, manager.clone());

        let mut other_user = event("Old Movie", 1985, "192.168.1.2");
        other_user.user.name = "guest".to_string();
        assert!(matches!(sd.handle(&other_user).await.unwrap(), DownloadOutcome::NotTracked { .. }));

        let mut episode = event("Old Movie", 1985, "192.168.1.2");
        episode.item.kind = "Episode".to_string();
        assert!(matches!(sd.handle(&episode).await.unwrap(), DownloadOutcome::NotTracked { .. }));
        assert!(manager.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_title_is_reported() {
        let manager = Arc::new(FakeManager::default());
        let outcome = downloader(3, manager).handle(&event("Nowhere", 2020, "8.8.8.8")).await.unwrap();
        assert_eq!(outcome, DownloadOutcome::MovieNotFound { title: "Nowhere".to_string() });
    }

    #[tokio::test]
    async fn search_failure_is_an_error() {
        let mut fake = FakeManager::with_movie("The Long Walk", 2025, false);
        fake.fail_search = true;
        let result = downloader(2, Arc::new(fake)).handle(&event("The Long Walk", 2025, "8.8.8.8")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_manager_is_not_an_error() {
        let sd = SmartDownloader::new(WebhookConfig::default(), Some(Arc::new(FixedHistory(2))), None);
        let outcome = sd.handle(&event("Old Movie", 1985, "8.8.8.8")).await.unwrap();
        assert_eq!(outcome, DownloadOutcome::ManagerNotConfigured);
    }
}
