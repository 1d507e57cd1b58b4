//! Program-guide availability: which TVG ids have guide data, and which
//! channels match them.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{error, info};

use crate::channels::ChannelSet;
use crate::error::LoadError;
use crate::fetch::{Fetcher, Source};

/// Lookup key for TVG ids: whitespace dropped, lowercased.
pub fn normalize_id(id: &str) -> String {
    id.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Maps normalized TVG ids to whether the guide has programme data for them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpgIndex {
    ids: HashMap<String, bool>,
}

impl EpgIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `id`; an existing `true` is never downgraded.
    pub fn insert(&mut self, id: &str, has_programmes: bool) {
        let key = normalize_id(id);
        if key.is_empty() {
            return;
        }
        let entry = self.ids.entry(key).or_insert(false);
        *entry |= has_programmes;
    }

    pub fn has_guide(&self, id: &str) -> bool {
        self.ids.get(&normalize_id(id)).copied().unwrap_or(false)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(&normalize_id(id))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn merge(&mut self, other: EpgIndex) {
        for (key, has_programmes) in other.ids {
            let entry = self.ids.entry(key).or_insert(false);
            *entry |= has_programmes;
        }
    }

    /// Extracts channel identifiers from XMLTV text. If the document carries
    /// any `<programme>` entries only ids with programmes count as having a
    /// guide; a bare identifier listing marks every declared channel.
    pub fn parse_xmltv(content: &str) -> Result<Self, quick_xml::Error> {
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(true);

        let mut declared: Vec<String> = Vec::new();
        let mut programmes: Vec<String> = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(e) | Event::Empty(e) => match e.name().as_ref() {
                    b"channel" => {
                        if let Some(id) = attribute(&e, b"id")? {
                            declared.push(id);
                        }
                    }
                    b"programme" => {
                        if let Some(id) = attribute(&e, b"channel")? {
                            programmes.push(id);
                        }
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        let listing_only = programmes.is_empty();
        let mut index = EpgIndex::new();
        for id in &declared {
            index.insert(id, listing_only);
        }
        for id in &programmes {
            index.insert(id, true);
        }
        Ok(index)
    }
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, quick_xml::Error> {
    match e.try_get_attribute(name)? {
        Some(attr) => Ok(Some(attr.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

pub async fn build_index(fetcher: &Fetcher, source: &Source) -> Result<EpgIndex, LoadError> {
    let location = source.to_string();
    info!("Loading EPG from {}...", location);

    let content = fetcher.read(source).await?;
    let index = EpgIndex::parse_xmltv(&content).map_err(|e| LoadError::format(&location, e))?;
    if index.is_empty() {
        return Err(LoadError::format(location, "no channel identifiers found"));
    }

    info!("Loaded {} EPG identifiers from {}", index.len(), location);
    Ok(index)
}

/// Builds one index from several guides; sources that fail are skipped
/// unless all of them do.
pub async fn build_index_all(fetcher: &Fetcher, sources: &[Source]) -> Result<EpgIndex, LoadError> {
    let results = futures::future::join_all(sources.iter().map(|s| build_index(fetcher, s))).await;

    let mut merged = EpgIndex::new();
    let mut last_error = None;
    for (source, result) in sources.iter().zip(results) {
        match result {
            Ok(index) => merged.merge(index),
            Err(e) => {
                error!("Failed to load EPG {}: {}", source, e);
                last_error = Some(e);
            }
        }
    }

    if merged.is_empty() {
        return Err(last_error.unwrap_or_else(|| LoadError::format("epg", "no EPG sources configured")));
    }
    Ok(merged)
}

/// Sets `epg_available` on every channel from `index`. Channels without a
/// TVG id are left unavailable.
pub fn annotate(channels: &mut ChannelSet, index: &EpgIndex) {
    let mut matched = 0usize;
    for channel in channels.iter_mut() {
        channel.epg_available = match channel.tvg_id.as_deref() {
            Some(id) if !id.trim().is_empty() => index.has_guide(id),
            _ => false,
        };
        if channel.epg_available {
            matched += 1;
        }
    }

    if !channels.is_empty() {
        info!(
            "EPG data available for {} of {} channels ({:.1}%)",
            matched,
            channels.len(),
            matched as f64 * 100.0 / channels.len() as f64
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::Channel;

    const GUIDE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tv generator-info-name="test">
  <channel id="BBC1"><display-name>BBC One</display-name></channel>
  <channel id="CNN.us"><display-name>CNN</display-name></channel>
  <programme start="20240101060000 +0000" stop="20240101070000 +0000" channel="BBC1">
    <title>Breakfast</title>
  </programme>
  <programme start="20240101060000 +0000" stop="20240101070000 +0000" channel="Sky News">
    <title>News</title>
  </programme>
</tv>"#;

    #[test]
    fn test_parse_xmltv_with_programmes() {
        let index = EpgIndex::parse_xmltv(GUIDE).unwrap();
        assert_eq!(index.len(), 3);
        assert!(index.has_guide("bbc1"));
        assert!(index.has_guide("SKYNEWS"));
        assert!(index.contains("cnn.us"));
        assert!(!index.has_guide("cnn.us"));
    }

    #[test]
    fn test_parse_identifier_listing() {
        let index = EpgIndex::parse_xmltv(r#"<tv><channel id="a.uk"/><channel id="b.de"/></tv>"#).unwrap();
        assert!(index.has_guide("A.UK"));
        assert!(index.has_guide("b.de"));
    }

    #[test]
    fn test_parse_rejects_broken_xml() {
        assert!(EpgIndex::parse_xmltv("<tv><channel id=\"x\"></tv>").is_err());
    }

    #[test]
    fn test_annotate_is_case_insensitive() {
        let mut index = EpgIndex::new();
        index.insert("bbc1", true);

        let mut set: ChannelSet = vec![
            Channel::new("BBC One", "http://a/1").with_tvg_id("BBC1"),
            Channel::new("No Id", "http://a/2").with_tvg_id(""),
            Channel::new("Other", "http://a/3").with_tvg_id("other.fr"),
        ]
        .into_iter()
        .collect();

        annotate(&mut set, &index);
        let flags: Vec<bool> = set.iter().map(|c| c.epg_available).collect();
        assert_eq!(flags, [true, false, false]);
    }

    #[test]
    fn test_merge_keeps_guide_flag() {
        let mut a = EpgIndex::new();
        a.insert("x", true);
        let mut b = EpgIndex::new();
        b.insert("X", false);
        b.insert("y", false);

        a.merge(b);
        assert!(a.has_guide("x"));
        assert!(a.contains("y"));
        assert!(!a.has_guide("y"));
    }
}
