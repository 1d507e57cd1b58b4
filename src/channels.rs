use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const UNCATEGORIZED: &str = "Uncategorized";

lazy_static! {
    static ref RE_ATTR: Regex =
        Regex::new(r#"([A-Za-z0-9_-]+)=(?:"([^"]*)"|([^\s",]+))"#).unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    #[default]
    Unchecked,
    Working,
    Failed,
}

/// One playlist entry. `url` is the identity of a channel; a
/// [`ChannelSet`] never holds two channels with the same URL, so callers
/// holding mutable references must leave it alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub url: String,
    pub group: String,
    pub country: Option<String>,
    pub logo: Option<String>,
    pub tvg_id: Option<String>,
    #[serde(default)]
    pub status: ChannelStatus,
    #[serde(default)]
    pub official: bool,
    #[serde(default)]
    pub epg_available: bool,
}

impl Channel {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            group: UNCATEGORIZED.to_string(),
            country: None,
            logo: None,
            tvg_id: None,
            status: ChannelStatus::Unchecked,
            official: false,
            epg_available: false,
        }
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.group = normalize_group(Some(group));
        self
    }

    pub fn with_tvg_id(mut self, tvg_id: &str) -> Self {
        self.tvg_id = non_empty(Some(tvg_id));
        self.country = derive_country(None, self.tvg_id.as_deref());
        self.official = is_official_id(self.tvg_id.as_deref());
        self
    }

    pub fn with_logo(mut self, logo: &str) -> Self {
        self.logo = non_empty(Some(logo));
        self
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Canonical group names in preferred output order.
pub const PREFERRED_GROUPS: [&str; 9] = [
    "News",
    "Sports",
    "Entertainment",
    "Movies",
    "Series",
    "Documentary",
    "Kids",
    "Music",
    "Lifestyle",
];

/// Folds common spellings of a group title onto one name so that category
/// filters and grouping see a single "Sports" instead of sport/SPORTS/Sport.
/// Unknown titles are kept as written.
pub fn standard_group(group: &str) -> String {
    let canonical = match group.trim().to_lowercase().as_str() {
        "" | "undefined" | "uncategorized" | "uncategorised" => UNCATEGORIZED,
        "news" => "News",
        "sport" | "sports" => "Sports",
        "movie" | "movies" | "film" | "films" => "Movies",
        "entertainment" => "Entertainment",
        "series" | "tvshows" | "tv shows" | "shows" => "Series",
        "documentary" | "documentaries" => "Documentary",
        "kids" | "children" => "Kids",
        "music" => "Music",
        "lifestyle" => "Lifestyle",
        "general" => "General",
        _ => return group.trim().to_string(),
    };
    canonical.to_string()
}

fn normalize_group(group: Option<&str>) -> String {
    group
        .map(standard_group)
        .unwrap_or_else(|| UNCATEGORIZED.to_string())
}

fn is_official_id(tvg_id: Option<&str>) -> bool {
    tvg_id
        .map(|id| id.to_ascii_lowercase().starts_with("iptv-org"))
        .unwrap_or(false)
}

/// `tvg-country` wins; otherwise the two-letter suffix of an iptv-org
/// style id such as `CNN.us` or `BBCOne.uk@HD`.
fn derive_country(tvg_country: Option<&str>, tvg_id: Option<&str>) -> Option<String> {
    if let Some(country) = non_empty(tvg_country) {
        return Some(country.to_uppercase());
    }
    let id = tvg_id?;
    let id = id.split('@').next().unwrap_or(id);
    let (_, suffix) = id.rsplit_once('.')?;
    if suffix.len() == 2 && suffix.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(suffix.to_ascii_uppercase())
    } else {
        None
    }
}

/// Ordered, URL-unique collection of channels in load order.
#[derive(Debug, Clone, Default)]
pub struct ChannelSet {
    channels: Vec<Channel>,
    urls: HashSet<String>,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `channel` unless its URL is already present. Returns
    /// whether the channel was added.
    pub fn insert(&mut self, channel: Channel) -> bool {
        if self.urls.contains(&channel.url) {
            return false;
        }
        self.urls.insert(channel.url.clone());
        self.channels.push(channel);
        true
    }

    /// Concatenates `sets` in order, keeping the first channel seen for
    /// each URL.
    pub fn merge<I>(sets: I) -> ChannelSet
    where
        I: IntoIterator<Item = ChannelSet>,
    {
        let mut merged = ChannelSet::new();
        let mut dropped = 0usize;
        for set in sets {
            for channel in set.channels {
                if !merged.insert(channel) {
                    dropped += 1;
                }
            }
        }
        if dropped > 0 {
            debug!("Merge dropped {} duplicate stream URLs", dropped);
        }
        merged
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Channel> {
        self.channels.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Channel> {
        self.channels.iter_mut()
    }

    pub fn get(&self, url: &str) -> Option<&Channel> {
        if !self.urls.contains(url) {
            return None;
        }
        self.channels.iter().find(|c| c.url == url)
    }

    pub fn as_slice(&self) -> &[Channel] {
        &self.channels
    }
}

impl FromIterator<Channel> for ChannelSet {
    fn from_iter<T: IntoIterator<Item = Channel>>(iter: T) -> Self {
        let mut set = ChannelSet::new();
        for channel in iter {
            set.insert(channel);
        }
        set
    }
}

impl<'a> IntoIterator for &'a ChannelSet {
    type Item = &'a Channel;
    type IntoIter = std::slice::Iter<'a, Channel>;

    fn into_iter(self) -> Self::IntoIter {
        self.channels.iter()
    }
}

impl IntoIterator for ChannelSet {
    type Item = Channel;
    type IntoIter = std::vec::IntoIter<Channel>;

    fn into_iter(self) -> Self::IntoIter {
        self.channels.into_iter()
    }
}

struct PendingEntry {
    line: usize,
    name: String,
    attrs: HashMap<String, String>,
    extgrp: Option<String>,
}

impl PendingEntry {
    fn into_channel(self, url: &str) -> Channel {
        let attr = |key: &str| self.attrs.get(key).map(String::as_str);
        let tvg_id = non_empty(attr("tvg-id"));
        let group = non_empty(attr("group-title")).or_else(|| non_empty(self.extgrp.as_deref()));
        let name = non_empty(Some(self.name.as_str()))
            .or_else(|| non_empty(attr("tvg-name")))
            .unwrap_or_else(|| url.to_string());

        Channel {
            name,
            url: url.to_string(),
            group: normalize_group(group.as_deref()),
            country: derive_country(attr("tvg-country"), tvg_id.as_deref()),
            logo: non_empty(attr("tvg-logo")),
            official: is_official_id(tvg_id.as_deref()),
            tvg_id,
            status: ChannelStatus::Unchecked,
            epg_available: false,
        }
    }
}

/// Splits the EXTINF body at the first comma outside a quoted value.
fn split_extinf(body: &str) -> (&str, &str) {
    let mut in_quotes = false;
    for (idx, c) in body.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => return (&body[..idx], &body[idx + 1..]),
            _ => {}
        }
    }
    (body, "")
}

fn parse_attrs(info: &str) -> HashMap<String, String> {
    RE_ATTR
        .captures_iter(info)
        .map(|caps| {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            (caps[1].to_ascii_lowercase(), value.to_string())
        })
        .collect()
}

/// Parses extended M3U text. Malformed pairs are logged and skipped; the
/// result may be empty.
pub fn parse_m3u(content: &str) -> Vec<Channel> {
    let mut channels = Vec::new();
    let mut pending: Option<PendingEntry> = None;
    let mut skipped = 0usize;

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.trim().trim_start_matches('\u{feff}');
        if line.is_empty() {
            continue;
        }

        if let Some(body) = line.strip_prefix("#EXTINF:") {
            if let Some(prev) = pending.take() {
                warn!("Skipping EXTINF on line {} without a stream URL", prev.line);
                skipped += 1;
            }
            let (info, name) = split_extinf(body);
            pending = Some(PendingEntry {
                line: line_no,
                name: name.trim().to_string(),
                attrs: parse_attrs(info),
                extgrp: None,
            });
        } else if let Some(group) = line.strip_prefix("#EXTGRP:") {
            if let Some(entry) = pending.as_mut() {
                entry.extgrp = Some(group.trim().to_string());
            }
        } else if line.starts_with('#') {
            continue;
        } else if let Some(entry) = pending.take() {
            channels.push(entry.into_channel(line));
        } else {
            warn!("Skipping stream URL on line {} without EXTINF: {}", line_no, line);
            skipped += 1;
        }
    }

    if let Some(prev) = pending {
        warn!("Skipping EXTINF on line {} without a stream URL", prev.line);
        skipped += 1;
    }
    if skipped > 0 {
        debug!("Parsed {} channels, skipped {} malformed entries", channels.len(), skipped);
    }

    channels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_m3u() {
        let data = r#"#EXTM3U
#EXTINF:0,3sat SD
#EXTVLCOPT:network-caching=1000
rtsp://192.168.178.1:554/?avm=1&freq=450&bw=8&msys=dvbc&mtype=256qam&sr=6900&specinv=1&pids=0,16,17,18,20,200,210,220,221,222,231,250
#EXTINF:0,KiKA SD
#EXTVLCOPT:network-caching=1000
rtsp://192.168.178.1:554/?avm=1&freq=450&bw=8&msys=dvbc&mtype=256qam&sr=6900&specinv=1&pids=0,16,17,18,20,300,310,320,321,322,331"#;

        let channels = parse_m3u(data);
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].name, "3sat SD");
        assert!(channels[0].url.starts_with("rtsp://"));
        assert_eq!(channels[0].group, UNCATEGORIZED);
        assert_eq!(channels[1].name, "KiKA SD");
    }

    #[test]
    fn test_parse_attributes() {
        let data = r#"#EXTM3U x-tvg-url="http://example.com/guide.xml"
#EXTINF:-1 tvg-id="CNN.us" tvg-logo="http://logo/cnn.png" group-title="News, World",CNN International
http://example.com/cnn.m3u8
#EXTINF:-1 tvg-id=bbc1 group-title="",BBC One
http://example.com/bbc1.m3u8"#;

        let channels = parse_m3u(data);
        assert_eq!(channels.len(), 2);

        let cnn = &channels[0];
        assert_eq!(cnn.name, "CNN International");
        assert_eq!(cnn.group, "News, World");
        assert_eq!(cnn.tvg_id.as_deref(), Some("CNN.us"));
        assert_eq!(cnn.logo.as_deref(), Some("http://logo/cnn.png"));
        assert_eq!(cnn.country.as_deref(), Some("US"));

        let bbc = &channels[1];
        assert_eq!(bbc.tvg_id.as_deref(), Some("bbc1"));
        assert_eq!(bbc.group, UNCATEGORIZED);
        assert_eq!(bbc.logo, None);
        assert_eq!(bbc.country, None);
    }

    #[test]
    fn test_malformed_pairs_are_skipped() {
        let data = "#EXTM3U
http://orphan.example/stream
#EXTINF:-1,Lost Entry
#EXTINF:-1,Kept Entry
http://kept.example/stream
#EXTINF:-1,Dangling";

        let channels = parse_m3u(data);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].name, "Kept Entry");
        assert_eq!(channels[0].url, "http://kept.example/stream");
    }

    #[test]
    fn test_extgrp_and_name_fallback() {
        let data = r#"#EXTINF:-1 tvg-name="Fallback Name",
#EXTGRP:Sports
http://example.com/sports"#;

        let channels = parse_m3u(data);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].name, "Fallback Name");
        assert_eq!(channels[0].group, "Sports");
    }

    #[test]
    fn test_country_and_official_heuristics() {
        let data = r#"#EXTINF:-1 tvg-id="BBCOne.uk@HD",BBC One
http://a/1
#EXTINF:-1 tvg-country="de" tvg-id="das-erste",Das Erste
http://a/2
#EXTINF:-1 tvg-id="iptv-org.news",Org News
http://a/3"#;

        let channels = parse_m3u(data);
        assert_eq!(channels[0].country.as_deref(), Some("UK"));
        assert_eq!(channels[1].country.as_deref(), Some("DE"));
        assert!(!channels[0].official);
        assert!(channels[2].official);
    }

    #[test]
    fn test_group_spellings_are_standardized() {
        let data = r#"#EXTINF:-1 group-title="sport",A
http://a/1
#EXTINF:-1 group-title=" FILM ",B
http://a/2
#EXTINF:-1 group-title="undefined",C
http://a/3
#EXTINF:-1 group-title="Regional TV",D
http://a/4
#EXTINF:-1,E
#EXTGRP:children
http://a/5"#;

        let groups: Vec<String> = parse_m3u(data).into_iter().map(|c| c.group).collect();
        assert_eq!(groups, ["Sports", "Movies", UNCATEGORIZED, "Regional TV", "Kids"]);
        assert_eq!(Channel::new("X", "u").with_group("SPORTS").group, "Sports");
    }

    #[test]
    fn test_merge_keeps_first_seen() {
        let a: ChannelSet = vec![Channel::new("X", "u1"), Channel::new("A", "u2")]
            .into_iter()
            .collect();
        let b: ChannelSet = vec![Channel::new("Y", "u1").with_group("Other"), Channel::new("B", "u3")]
            .into_iter()
            .collect();

        let merged = ChannelSet::merge([a, b]);
        assert_eq!(merged.len(), 3);
        let urls: Vec<&str> = merged.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, ["u1", "u2", "u3"]);
        assert_eq!(merged.get("u1").unwrap().name, "X");
        assert_eq!(merged.get("u1").unwrap().group, UNCATEGORIZED);
    }

    #[test]
    fn test_insert_rejects_duplicate_url() {
        let mut set = ChannelSet::new();
        assert!(set.insert(Channel::new("One", "http://dup")));
        assert!(!set.insert(Channel::new("Two", "http://dup")));
        assert_eq!(set.len(), 1);
    }
}
