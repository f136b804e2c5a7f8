use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{ApiError, ApiResult};

const CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub enum VersionSource {
    /// Release tags from a GitHub repository, newest first, semver-ish only.
    GithubReleases { repo: &'static str },
    Static(Vec<String>),
}

#[derive(Default)]
struct Entry {
    fetched_at: Option<Instant>,
    versions: Vec<String>,
}

/// Upstream version lists, cached for five minutes. Each application has its
/// own entry lock, so concurrent readers of a stale entry produce a single
/// upstream fetch.
pub struct VersionCache {
    http: reqwest::Client,
    entries: Mutex<BTreeMap<String, Arc<Mutex<Entry>>>>,
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
}

impl VersionCache {
    pub fn new() -> Self {
        VersionCache {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("reqwest client"),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub async fn get(&self, app_id: &str, source: &VersionSource) -> ApiResult<Vec<String>> {
        let versions = match source {
            VersionSource::Static(list) => return Ok(list.clone()),
            VersionSource::GithubReleases { repo } => {
                let entry = {
                    let mut entries = self.entries.lock().await;
                    entries.entry(app_id.to_string()).or_default().clone()
                };

                let mut entry = entry.lock().await;
                let fresh = entry
                    .fetched_at
                    .map(|at| at.elapsed() < CACHE_TTL)
                    .unwrap_or(false);
                if !fresh {
                    match self.fetch_github(repo).await {
                        Ok(versions) => {
                            entry.versions = versions;
                            entry.fetched_at = Some(Instant::now());
                        }
                        // A stale list beats an error when we have one.
                        Err(e) if !entry.versions.is_empty() => {
                            warn!(app_id, error = %e, "version refresh failed, serving stale list");
                        }
                        Err(e) => return Err(e),
                    }
                }
                entry.versions.clone()
            }
        };
        Ok(versions)
    }

    async fn fetch_github(&self, repo: &str) -> ApiResult<Vec<String>> {
        let url = format!("https://api.github.com/repos/{}/releases", repo);
        let releases: Vec<GithubRelease> = self
            .http
            .get(&url)
            .header("User-Agent", "datainfrapilot")
            .send()
            .await
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("version feed: {}", e)))?
            .error_for_status()
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("version feed: {}", e)))?
            .json()
            .await
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("version feed: {}", e)))?;

        Ok(releases
            .into_iter()
            .map(|r| r.tag_name)
            .filter(|tag| looks_like_release(tag))
            .take(5)
            .collect())
    }
}

impl Default for VersionCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain `X.Y.Z` release tags only; filters out RCs, betas and non-release
/// tags from the feed.
fn looks_like_release(tag: &str) -> bool {
    let parts: Vec<&str> = tag.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_tag_filter() {
        assert!(looks_like_release("2.10.3"));
        assert!(looks_like_release("3.0.1"));
        assert!(!looks_like_release("v2.10.3"));
        assert!(!looks_like_release("2.10.3rc1"));
        assert!(!looks_like_release("2.10"));
        assert!(!looks_like_release("helm-chart-1.15.0"));
    }

    #[tokio::test]
    async fn static_sources_bypass_the_cache() {
        let cache = VersionCache::new();
        let source = VersionSource::Static(vec!["3.5.1".to_string()]);
        let versions = cache.get("spark", &source).await.unwrap();
        assert_eq!(versions, vec!["3.5.1"]);
    }
}
