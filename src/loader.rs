use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::channels::{parse_m3u, ChannelSet};
use crate::error::LoadError;
use crate::fetch::{Fetcher, Source};

/// A playlist location plus whether its entries are trusted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawPlaylistSource")]
pub struct PlaylistSource {
    pub source: Source,
    pub official: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPlaylistSource {
    Location(String),
    Detailed {
        location: String,
        #[serde(default)]
        official: Option<bool>,
    },
}

impl From<RawPlaylistSource> for PlaylistSource {
    fn from(raw: RawPlaylistSource) -> Self {
        match raw {
            RawPlaylistSource::Location(location) => PlaylistSource::new(&location),
            RawPlaylistSource::Detailed { location, official } => {
                let source = PlaylistSource::new(&location);
                match official {
                    Some(official) => source.with_official(official),
                    None => source,
                }
            }
        }
    }
}

impl PlaylistSource {
    /// iptv-org hosted lists are trusted unless configured otherwise.
    pub fn new(location: &str) -> Self {
        Self {
            official: location.to_ascii_lowercase().contains("iptv-org"),
            source: Source::parse(location),
        }
    }

    pub fn with_official(mut self, official: bool) -> Self {
        self.official = official;
        self
    }
}

fn is_playlist_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("m3u") || e.eq_ignore_ascii_case("m3u8"))
        .unwrap_or(false)
}

/// Finds `.m3u`/`.m3u8` files below `dir`, sorted by path. Files listed in
/// `skip` (usually our own output) are left out.
pub fn discover(dir: &Path, skip: &[PathBuf]) -> Result<Vec<PlaylistSource>, LoadError> {
    let location = dir.display().to_string();
    if !dir.is_dir() {
        return Err(LoadError::network(location, "not a directory"));
    }
    let skip: Vec<PathBuf> = skip
        .iter()
        .map(|p| std::fs::canonicalize(p).unwrap_or_else(|_| p.clone()))
        .collect();

    let mut found = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", location, e);
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || !is_playlist_file(path) {
            continue;
        }
        let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if skip.contains(&resolved) {
            debug!("Skipping output playlist {}", path.display());
            continue;
        }
        info!("Found local playlist: {}", path.display());
        found.push(PlaylistSource {
            source: Source::Local(path.to_path_buf()),
            official: false,
        });
    }
    Ok(found)
}

pub async fn load(fetcher: &Fetcher, playlist: &PlaylistSource) -> Result<ChannelSet, LoadError> {
    let location = playlist.source.to_string();
    info!("Loading playlist from {}...", location);

    let content = fetcher.read(&playlist.source).await?;
    let mut channels = parse_m3u(&content);
    if channels.is_empty() {
        if content.trim().is_empty() {
            warn!("Playlist {} is empty", location);
        } else {
            return Err(LoadError::format(location, "no valid EXTINF/URL pairs"));
        }
    }

    if playlist.official {
        channels.iter_mut().for_each(|c| c.official = true);
    }

    let set: ChannelSet = channels.into_iter().collect();
    info!("Loaded {} channels from {}", set.len(), location);
    Ok(set)
}

/// Loads every source concurrently and merges the results in input order.
/// Failing sources are skipped; the call only fails when nothing loaded,
/// reporting the last failure seen.
pub async fn load_all(fetcher: &Fetcher, playlists: &[PlaylistSource]) -> Result<ChannelSet, LoadError> {
    let results = futures::future::join_all(playlists.iter().map(|p| load(fetcher, p))).await;

    let mut sets = Vec::with_capacity(results.len());
    let mut last_error = None;
    for (playlist, result) in playlists.iter().zip(results) {
        match result {
            Ok(set) => sets.push(set),
            Err(e) => {
                error!("Failed to load playlist {}: {}", playlist.source, e);
                last_error = Some(e);
            }
        }
    }

    let merged = ChannelSet::merge(sets);
    if merged.is_empty() {
        return Err(last_error.unwrap_or_else(|| {
            let locations: Vec<String> = playlists.iter().map(|p| p.source.to_string()).collect();
            LoadError::format(locations.join(", "), "no channels loaded from any playlist")
        }));
    }

    info!("Total loaded channels: {}", merged.len());
    Ok(merged)
}
