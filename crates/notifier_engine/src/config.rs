use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::page::LoadSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid selector {selector:?}: {message}")]
    Selector { selector: String, message: String },
}

/// CSS selectors and class names describing the pipeline listing markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    /// Links of pipelines that are currently running.
    pub running: String,
    /// Any link pointing at a pipeline.
    pub pipeline_link: String,
    /// Path segment preceding the numeric pipeline id in an href.
    pub id_prefix: String,
    /// A row of the listing; its parent is the watched container.
    pub listing_row: String,
    /// Container used when no row is present.
    pub listing_fallback: String,
    /// Element whose arrival in the listing asks for a re-sample.
    pub graph: String,
    pub icon_success: String,
    pub icon_failed: String,
    pub badge: String,
    pub badge_success: String,
    pub badge_failed: String,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            running: r#"a.ci-status.ci-running[href*="/-/pipelines/"]"#.to_string(),
            pipeline_link: r#"a[href*="/-/pipelines/"]"#.to_string(),
            id_prefix: "pipelines/".to_string(),
            listing_row: r#"[data-testid="pipeline-table-row"]"#.to_string(),
            listing_fallback: "tbody".to_string(),
            graph: r#"[data-testid="widget-mini-pipeline-graph"]"#.to_string(),
            icon_success: "ci-status-icon-success".to_string(),
            icon_failed: "ci-status-icon-failed".to_string(),
            badge: "ci-status".to_string(),
            badge_success: "ci-success".to_string(),
            badge_failed: "ci-failed".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchTimings {
    pub settle_delay: Duration,
    pub tick_period: Duration,
    pub debounce: Duration,
}

impl Default for WatchTimings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(1),
            tick_period: Duration::from_secs(5),
            debounce: Duration::from_millis(500),
        }
    }
}

/// Runtime configuration, read from a RON file. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub domains: Vec<String>,
    pub settle_delay_ms: u64,
    pub tick_period_ms: u64,
    pub debounce_ms: u64,
    pub dedup_ttl_ms: u64,
    pub change_poll_period_ms: u64,
    pub request_timeout_ms: u64,
    pub max_page_bytes: u64,
    pub markers: MarkerConfig,
    pub settings_path: PathBuf,
    pub webhook_url: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            domains: vec!["gitlab.com".to_string()],
            settle_delay_ms: 1_000,
            tick_period_ms: 5_000,
            debounce_ms: 500,
            dedup_ttl_ms: 30 * 60 * 1_000,
            change_poll_period_ms: 2_000,
            request_timeout_ms: 30_000,
            max_page_bytes: 8 * 1024 * 1024,
            markers: MarkerConfig::default(),
            settings_path: PathBuf::from("./notifier_settings.ron"),
            webhook_url: None,
            headers: Vec::new(),
        }
    }
}

impl NotifierConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron(&content).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_ron(content: &str) -> Result<Self, String> {
        ron::from_str(content).map_err(|err| err.to_string())
    }

    pub fn timings(&self) -> WatchTimings {
        WatchTimings {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            tick_period: Duration::from_millis(self.tick_period_ms),
            debounce: Duration::from_millis(self.debounce_ms),
        }
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_millis(self.dedup_ttl_ms)
    }

    pub fn change_poll_period(&self) -> Duration {
        Duration::from_millis(self.change_poll_period_ms)
    }

    pub fn load_settings(&self) -> LoadSettings {
        LoadSettings {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            max_bytes: self.max_page_bytes,
            headers: self.headers.clone(),
            ..LoadSettings::default()
        }
    }

    /// True for pipeline listing pages on one of the configured domains or
    /// their sub-domains.
    pub fn is_monitored_url(&self, raw: &str) -> bool {
        let Ok(url) = Url::parse(raw) else {
            return false;
        };
        let Some(host) = url.host_str() else {
            return false;
        };
        let on_domain = self.domains.iter().any(|domain| {
            let domain = domain.trim().trim_start_matches('.');
            !domain.is_empty()
                && (host.eq_ignore_ascii_case(domain)
                    || host
                        .to_ascii_lowercase()
                        .ends_with(&format!(".{}", domain.to_ascii_lowercase())))
        });
        on_domain && url.path().contains("/-/pipelines")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitored_urls_follow_domain_and_path() {
        let config = NotifierConfig::default();
        assert!(config.is_monitored_url("https://gitlab.com/group/app/-/pipelines"));
        assert!(config.is_monitored_url("https://ci.gitlab.com/group/app/-/pipelines?page=2"));
        assert!(!config.is_monitored_url("https://gitlab.com/group/app/-/merge_requests"));
        assert!(!config.is_monitored_url("https://notgitlab.com/group/app/-/pipelines"));
        assert!(!config.is_monitored_url("not a url"));
    }

    #[test]
    fn partial_ron_keeps_defaults() {
        let config = NotifierConfig::from_ron(
            r#"(domains: ["gitlab.example.org"], tick_period_ms: 2000)"#,
        )
        .unwrap();
        assert_eq!(config.domains, vec!["gitlab.example.org".to_string()]);
        assert_eq!(config.timings().tick_period, Duration::from_secs(2));
        assert_eq!(config.timings().debounce, Duration::from_millis(500));
        assert_eq!(config.dedup_ttl(), Duration::from_secs(1800));
        assert_eq!(config.markers, MarkerConfig::default());
    }
}
