use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use flate2::read::GzDecoder;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::cache::SourceCache;
use crate::error::LoadError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub verify_ssl: bool,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_user_agent() -> String {
    format!("iptv-curator/{}", env!("CARGO_PKG_VERSION"))
}

fn default_cache_ttl_hours() -> u64 {
    12
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            user_agent: default_user_agent(),
            verify_ssl: false,
            cache_dir: None,
            cache_ttl_hours: default_cache_ttl_hours(),
        }
    }
}

/// Where a playlist or guide comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Local(PathBuf),
    Remote(String),
}

impl Source {
    pub fn parse(location: &str) -> Self {
        let location = location.trim();
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Source::Remote(location.to_string())
        } else {
            Source::Local(PathBuf::from(location))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Source::Remote(_))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Local(path) => write!(f, "{}", path.display()),
            Source::Remote(url) => f.write_str(url),
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Decompresses gzip payloads and decodes text as UTF-8, falling back to
/// Latin-1 for legacy playlists.
pub fn decode_body(bytes: &[u8]) -> std::io::Result<String> {
    let raw = if bytes.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut out)?;
        out
    } else {
        bytes.to_vec()
    };

    Ok(match String::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    })
}

/// Reads sources from disk or over HTTP with retries and an optional
/// on-disk cache.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    config: FetchConfig,
    cache: Option<SourceCache>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.verify_ssl)
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        let cache = config
            .cache_dir
            .as_ref()
            .map(|dir| SourceCache::new(dir, config.cache_ttl_hours));
        Ok(Self {
            client,
            config,
            cache,
        })
    }

    pub async fn read(&self, source: &Source) -> Result<String, LoadError> {
        match source {
            Source::Local(path) => {
                let location = path.display().to_string();
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|e| LoadError::network(&location, e))?;
                decode_body(&bytes).map_err(|e| LoadError::format(location, e))
            }
            Source::Remote(url) => self.fetch(url).await,
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, LoadError> {
        if let Some(cache) = &self.cache {
            if let Some(content) = cache.get(url).await {
                info!("Using cached copy of {}", url);
                return Ok(content);
            }
        }

        let bytes = self.fetch_bytes(url).await?;
        let text = decode_body(&bytes).map_err(|e| LoadError::format(url, e))?;
        debug!("Fetched {} ({} bytes)", url, bytes.len());

        if let Some(cache) = &self.cache {
            cache.put(url, &text).await;
        }
        Ok(text)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.config.backoff_ms.saturating_mul(1u64 << attempt.min(16)))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        let mut attempt = 0;
        loop {
            let reason = match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                    Ok(body) => return Ok(body.to_vec()),
                    Err(e) => e.to_string(),
                },
                Ok(resp) if is_retryable(resp.status()) => format!("HTTP {}", resp.status()),
                Ok(resp) => {
                    return Err(LoadError::network(url, format!("HTTP {}", resp.status())));
                }
                Err(e) => e.to_string(),
            };

            if attempt >= self.config.max_retries {
                return Err(LoadError::network(
                    url,
                    format!("{} (gave up after {} attempts)", reason, attempt + 1),
                ));
            }
            let delay = self.backoff(attempt);
            warn!("Fetching {} failed: {}, retrying in {:?}", url, reason, delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_source_parse() {
        assert_eq!(
            Source::parse("https://iptv-org.github.io/iptv/index.m3u"),
            Source::Remote("https://iptv-org.github.io/iptv/index.m3u".to_string())
        );
        assert_eq!(
            Source::parse("local m3u/list.m3u"),
            Source::Local(PathBuf::from("local m3u/list.m3u"))
        );
    }

    #[test]
    fn test_decode_gzip_and_latin1() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"<tv></tv>").unwrap();
        let gz = encoder.finish().unwrap();
        assert_eq!(decode_body(&gz).unwrap(), "<tv></tv>");

        let latin1 = [b'C', b'a', b'f', 0xe9];
        assert_eq!(decode_body(&latin1).unwrap(), "Café");
    }

    #[tokio::test]
    async fn test_read_gzipped_local_guide() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guide.xml.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"<tv><channel id=\"a.uk\"/></tv>").unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let fetcher = Fetcher::new(FetchConfig::default()).unwrap();
        let text = fetcher.read(&Source::Local(path)).await.unwrap();
        assert_eq!(text, "<tv><channel id=\"a.uk\"/></tv>");
    }

    #[tokio::test]
    async fn test_missing_local_file_is_network_error() {
        let fetcher = Fetcher::new(FetchConfig::default()).unwrap();
        let err = fetcher
            .read(&Source::parse("/nonexistent/playlist.m3u"))
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Network { .. }));
    }
}
