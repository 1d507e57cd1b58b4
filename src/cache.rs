use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    fetched_at: DateTime<Utc>,
    content: String,
}

/// Flat-file cache of fetched sources, one JSON file per location.
#[derive(Debug, Clone)]
pub struct SourceCache {
    dir: PathBuf,
    ttl: Duration,
}

impl SourceCache {
    pub fn new(dir: impl Into<PathBuf>, ttl_hours: u64) -> Self {
        Self {
            dir: dir.into(),
            ttl: Duration::hours(ttl_hours.min(i64::MAX as u64 / 3600) as i64),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, location: &str) -> PathBuf {
        self.dir.join(format!("{:x}.json", md5::compute(location.as_bytes())))
    }

    /// Returns the cached content when it is younger than the TTL.
    pub async fn get(&self, location: &str) -> Option<String> {
        let path = self.entry_path(location);
        let raw = tokio::fs::read(&path).await.ok()?;
        let entry: CacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}: {}", path.display(), e);
                return None;
            }
        };
        let age = Utc::now() - entry.fetched_at;
        if age >= self.ttl {
            debug!("Cache entry for {} expired ({}m old)", location, age.num_minutes());
            return None;
        }
        debug!("Cache hit for {}", location);
        Some(entry.content)
    }

    pub async fn put(&self, location: &str, content: &str) {
        let entry = CacheEntry {
            fetched_at: Utc::now(),
            content: content.to_string(),
        };
        let path = self.entry_path(location);
        let result = async {
            tokio::fs::create_dir_all(&self.dir).await?;
            let json = serde_json::to_vec(&entry).map_err(std::io::Error::other)?;
            tokio::fs::write(&path, json).await
        }
        .await;
        if let Err(e) = result {
            warn!("Failed to cache {} at {}: {}", location, path.display(), e);
        }
    }
}
