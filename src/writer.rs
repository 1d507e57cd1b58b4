use std::collections::HashSet;
use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};

use quick_xml::escape::escape;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::channels::{Channel, PREFERRED_GROUPS, UNCATEGORIZED};
use crate::epg::normalize_id;
use crate::error::WriteError;

#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Also write an XMLTV file listing the selection's TVG ids.
    pub include_epg: bool,
    /// File stem for `<name>.m3u` and `<name>.xml`.
    pub output_name: String,
    /// Emit channels grouped by category, preferred groups first.
    pub group_order: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            include_epg: false,
            output_name: "playlist".to_string(),
            group_order: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFiles {
    pub playlist: PathBuf,
    pub epg: Option<PathBuf>,
}

// M3U attribute values cannot carry double quotes or line breaks.
fn attr_value(value: &str) -> String {
    let cleaned = value.replace('"', "'").replace(['\r', '\n'], " ");
    if cleaned != value {
        warn!("Rewrote attribute value {:?} as {:?} for M3U output", value, cleaned);
    }
    cleaned
}

fn group_rank(group: &str) -> usize {
    if group == UNCATEGORIZED {
        return PREFERRED_GROUPS.len() + 1;
    }
    PREFERRED_GROUPS
        .iter()
        .position(|g| *g == group)
        .unwrap_or(PREFERRED_GROUPS.len())
}

/// Stable reorder: preferred groups in their fixed order, then the other
/// groups alphabetically, uncategorized channels last.
pub fn sort_by_group(selection: &mut [&Channel]) {
    selection.sort_by(|a, b| {
        group_rank(&a.group)
            .cmp(&group_rank(&b.group))
            .then_with(|| a.group.cmp(&b.group))
    });
}

pub fn render_m3u(selection: &[&Channel], epg_url: Option<&str>) -> String {
    let mut out = String::from("#EXTM3U");
    if let Some(url) = epg_url {
        let _ = write!(out, " x-tvg-url=\"{}\"", attr_value(url));
    }
    out.push('\n');

    for channel in selection {
        out.push_str("#EXTINF:-1");
        if let Some(id) = &channel.tvg_id {
            let _ = write!(out, " tvg-id=\"{}\"", attr_value(id));
        }
        if let Some(logo) = &channel.logo {
            let _ = write!(out, " tvg-logo=\"{}\"", attr_value(logo));
        }
        if let Some(country) = &channel.country {
            let _ = write!(out, " tvg-country=\"{}\"", attr_value(country));
        }
        let _ = writeln!(
            out,
            " group-title=\"{}\",{}",
            attr_value(&channel.group),
            channel.name.replace(['\r', '\n'], " ")
        );
        out.push_str(channel.url.trim());
        out.push('\n');
    }
    out
}

/// XMLTV channel listing for the selection; one entry per distinct TVG id.
pub fn render_epg(selection: &[&Channel]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<tv generator-info-name=\"iptv-curator\">\n");

    let mut seen = HashSet::new();
    for channel in selection {
        let Some(id) = channel.tvg_id.as_deref() else {
            continue;
        };
        if !seen.insert(normalize_id(id)) {
            continue;
        }
        let _ = writeln!(out, "  <channel id=\"{}\">", escape(id));
        let _ = writeln!(out, "    <display-name>{}</display-name>", escape(channel.name.as_str()));
        if let Some(logo) = &channel.logo {
            let _ = writeln!(out, "    <icon src=\"{}\"/>", escape(logo.as_str()));
        }
        out.push_str("  </channel>\n");
    }

    out.push_str("</tv>\n");
    out
}

fn stage(dir: &Path, target: &Path, content: &str) -> Result<NamedTempFile, WriteError> {
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| WriteError::io(target, e))?;
    temp.write_all(content.as_bytes())
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| WriteError::io(target, e))?;
    Ok(temp)
}

/// Where [`write`] puts the playlist for these options.
pub fn playlist_path(destination: &Path, options: &WriteOptions) -> PathBuf {
    let stem = options
        .output_name
        .trim()
        .trim_end_matches(".m3u8")
        .trim_end_matches(".m3u");
    let stem = if stem.is_empty() { "playlist" } else { stem };
    destination.join(format!("{}.m3u", stem))
}

/// Writes the selection into `destination`. Every file is staged next to
/// its target and renamed into place only after all of them were written;
/// on failure nothing new is left behind.
pub fn write(selection: &[&Channel], destination: &Path, options: &WriteOptions) -> Result<WrittenFiles, WriteError> {
    std::fs::create_dir_all(destination).map_err(|e| WriteError::io(destination, e))?;

    let playlist_path = playlist_path(destination, options);
    let epg_path = options
        .include_epg
        .then(|| playlist_path.with_extension("xml"));

    let epg_name = epg_path
        .as_ref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned());
    let mut ordered = selection.to_vec();
    if options.group_order {
        sort_by_group(&mut ordered);
    }
    let mut outputs = vec![(playlist_path.clone(), render_m3u(&ordered, epg_name.as_deref()))];
    if let Some(path) = &epg_path {
        outputs.push((path.clone(), render_epg(selection)));
    }

    let staged = outputs
        .iter()
        .map(|(path, content)| stage(destination, path, content))
        .collect::<Result<Vec<_>, _>>()?;

    let mut committed: Vec<&Path> = Vec::new();
    for (temp, (path, _)) in staged.into_iter().zip(&outputs) {
        if let Err(e) = temp.persist(path) {
            for done in committed {
                if let Err(rollback) = std::fs::remove_file(done) {
                    warn!("Failed to remove partial output {}: {}", done.display(), rollback);
                }
            }
            return Err(WriteError::io(path, e.error));
        }
        committed.push(path);
    }

    info!("Wrote {} channels to {}", selection.len(), playlist_path.display());
    if let Some(path) = &epg_path {
        info!("Wrote EPG identifiers to {}", path.display());
    }
    Ok(WrittenFiles {
        playlist: playlist_path,
        epg: epg_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::parse_m3u;
    use crate::epg::EpgIndex;

    fn sample() -> Vec<Channel> {
        vec![
            Channel::new("BBC One", "http://a/1")
                .with_group("News")
                .with_tvg_id("BBCOne.uk")
                .with_logo("http://logo/bbc.png"),
            Channel::new("Plain", "http://a/2"),
            Channel::new("BBC One HD", "http://a/3").with_tvg_id("bbcone.uk"),
        ]
    }

    #[test]
    fn test_render_round_trips_through_parser() {
        let channels = sample();
        let selection: Vec<&Channel> = channels.iter().collect();
        let parsed = parse_m3u(&render_m3u(&selection, None));
        assert_eq!(parsed, channels);
    }

    #[test]
    fn test_render_epg_dedups_ids() {
        let channels = sample();
        let selection: Vec<&Channel> = channels.iter().collect();
        let xml = render_epg(&selection);
        let index = EpgIndex::parse_xmltv(&xml).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.has_guide("bbcone.uk"));
        assert!(xml.contains("<icon src=\"http://logo/bbc.png\"/>"));
    }

    #[test]
    fn test_group_order() {
        let dir = tempfile::tempdir().unwrap();
        let channels = vec![
            Channel::new("Loose", "http://g/1"),
            Channel::new("Local", "http://g/2").with_group("Regional"),
            Channel::new("Match", "http://g/3").with_group("sport"),
            Channel::new("Cartoons", "http://g/4").with_group("Kids"),
            Channel::new("Headlines", "http://g/5").with_group("News"),
            Channel::new("Arts", "http://g/6").with_group("Culture"),
        ];
        let selection: Vec<&Channel> = channels.iter().collect();
        let options = WriteOptions {
            group_order: true,
            ..Default::default()
        };

        let written = write(&selection, dir.path(), &options).unwrap();
        let parsed = parse_m3u(&std::fs::read_to_string(written.playlist).unwrap());
        let names: Vec<&str> = parsed.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Headlines", "Match", "Cartoons", "Arts", "Local", "Loose"]);
    }

    #[test]
    fn test_quotes_in_attributes_are_replaced() {
        let channel = Channel::new("Quoted", "http://q/1")
            .with_group("A \"B\"")
            .with_tvg_id("id\"x");
        let parsed = parse_m3u(&render_m3u(&[&channel], None));
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].group, "A 'B'");
        assert_eq!(parsed[0].tvg_id.as_deref(), Some("id'x"));
        assert_eq!(parsed[0].name, "Quoted");
    }

    #[test]
    fn test_write_with_epg() {
        let dir = tempfile::tempdir().unwrap();
        let channels = sample();
        let selection: Vec<&Channel> = channels.iter().collect();
        let options = WriteOptions {
            include_epg: true,
            output_name: "jellyfin.m3u".to_string(),
            ..Default::default()
        };

        let written = write(&selection, dir.path(), &options).unwrap();
        assert_eq!(written.playlist, dir.path().join("jellyfin.m3u"));
        assert_eq!(written.epg, Some(dir.path().join("jellyfin.xml")));

        let playlist = std::fs::read_to_string(&written.playlist).unwrap();
        assert!(playlist.starts_with("#EXTM3U x-tvg-url=\"jellyfin.xml\"\n"));
        assert_eq!(parse_m3u(&playlist).len(), 3);

        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 2);
    }

    #[test]
    fn test_failed_write_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file in the way").unwrap();

        let channels = sample();
        let selection: Vec<&Channel> = channels.iter().collect();
        let err = write(&selection, &blocker, &WriteOptions::default()).unwrap_err();
        assert!(matches!(err, WriteError::Io { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_failed_epg_commit_removes_playlist() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("out.xml")).unwrap();
        std::fs::write(dir.path().join("out.xml").join("keep"), "x").unwrap();

        let channels = sample();
        let selection: Vec<&Channel> = channels.iter().collect();
        let options = WriteOptions {
            include_epg: true,
            output_name: "out".to_string(),
            ..Default::default()
        };
        assert!(write(&selection, dir.path(), &options).is_err());
        assert!(!dir.path().join("out.m3u").exists());

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["out.xml"]);
    }
}
