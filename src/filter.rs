use serde::Deserialize;

use crate::channels::{Channel, ChannelSet, ChannelStatus};

/// Raw filter options as they arrive from the command line, config or a
/// query string. Empty values impose no constraint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub name_contains: Option<String>,
    pub category: Option<String>,
    pub country: Option<String>,
    pub official_only: bool,
    pub working_only: bool,
}

/// Validated, immutable predicate built once from a [`FilterConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelFilter {
    name: Option<String>,
    category: Option<String>,
    country: Option<String>,
    official_only: bool,
    working_only: bool,
}

fn normalized(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl From<&FilterConfig> for ChannelFilter {
    fn from(config: &FilterConfig) -> Self {
        Self {
            name: normalized(&config.name_contains).map(|v| v.to_lowercase()),
            category: normalized(&config.category),
            country: normalized(&config.country).map(|v| v.to_lowercase()),
            official_only: config.official_only,
            working_only: config.working_only,
        }
    }
}

impl ChannelFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// The same predicate without the status constraint. Selections fed
    /// to the checker use this: before a check every channel is
    /// `Unchecked`, so `working_only` would select nothing.
    pub fn without_status(&self) -> Self {
        Self {
            working_only: false,
            ..self.clone()
        }
    }

    pub fn matches(&self, channel: &Channel) -> bool {
        if self.official_only && !channel.official {
            return false;
        }
        if self.working_only && channel.status != ChannelStatus::Working {
            return false;
        }
        if let Some(name) = &self.name {
            if !channel.name.to_lowercase().contains(name) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if &channel.group != category {
                return false;
            }
        }
        if let Some(country) = &self.country {
            let tags = [
                channel.country.as_deref().unwrap_or_default(),
                channel.group.as_str(),
                channel.name.as_str(),
            ];
            if !tags.iter().any(|tag| tag.to_lowercase().contains(country)) {
                return false;
            }
        }
        true
    }
}

/// Read-only view of the channels matching `filter`, in set order.
pub fn filter<'a>(channels: &'a ChannelSet, filter: &ChannelFilter) -> Vec<&'a Channel> {
    channels.iter().filter(|c| filter.matches(c)).collect()
}

/// Mutable selection for the same predicate, used to feed the checker.
pub fn select_mut<'a>(channels: &'a mut ChannelSet, filter: &ChannelFilter) -> Vec<&'a mut Channel> {
    channels.iter_mut().filter(|c| filter.matches(c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ChannelSet {
        let mut official = Channel::new("BBC News", "http://a/1").with_group("News").with_tvg_id("BBCNews.uk");
        official.official = true;
        let mut working = Channel::new("Deutsche Welle", "http://a/2").with_group("News").with_tvg_id("DW.de");
        working.status = ChannelStatus::Working;
        vec![
            official,
            working,
            Channel::new("Sport Germany", "http://a/3").with_group("Sports"),
            Channel::new("Cartoon", "http://a/4"),
        ]
        .into_iter()
        .collect()
    }

    fn names(view: &[&Channel]) -> Vec<String> {
        view.iter().map(|c| c.name.clone()).collect()
    }

    #[test]
    fn test_empty_config_matches_everything() {
        let set = sample();
        let view = filter(&set, &ChannelFilter::from(&FilterConfig::default()));
        assert_eq!(view.len(), set.len());
    }

    #[test]
    fn test_predicates_are_anded() {
        let set = sample();
        let config = FilterConfig {
            name_contains: Some("  welle ".to_string()),
            category: Some("News".to_string()),
            ..Default::default()
        };
        assert_eq!(names(&filter(&set, &(&config).into())), ["Deutsche Welle"]);

        let config = FilterConfig {
            category: Some("news".to_string()),
            ..Default::default()
        };
        assert!(filter(&set, &(&config).into()).is_empty());
    }

    #[test]
    fn test_country_matches_code_group_or_name() {
        let set = sample();
        let config = FilterConfig {
            country: Some("de".to_string()),
            ..Default::default()
        };
        assert_eq!(names(&filter(&set, &(&config).into())), ["Deutsche Welle"]);

        let config = FilterConfig {
            country: Some("germany".to_string()),
            ..Default::default()
        };
        assert_eq!(names(&filter(&set, &(&config).into())), ["Sport Germany"]);
    }

    #[test]
    fn test_official_and_working_flags() {
        let set = sample();
        let official = FilterConfig {
            official_only: true,
            ..Default::default()
        };
        assert_eq!(names(&filter(&set, &(&official).into())), ["BBC News"]);

        let working = FilterConfig {
            working_only: true,
            ..Default::default()
        };
        assert_eq!(names(&filter(&set, &(&working).into())), ["Deutsche Welle"]);
    }

    #[test]
    fn test_filter_is_idempotent() {
        let set = sample();
        let f = ChannelFilter::from(&FilterConfig {
            category: Some("News".to_string()),
            ..Default::default()
        });
        let once = filter(&set, &f);
        let again: ChannelSet = once.iter().map(|c| (*c).clone()).collect();
        let twice = filter(&again, &f);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_working_only_selection_before_check() {
        let mut set: ChannelSet = vec![
            Channel::new("Fresh One", "http://b/1").with_group("News"),
            Channel::new("Fresh Two", "http://b/2").with_group("News"),
        ]
        .into_iter()
        .collect();
        let configured = ChannelFilter::from(&FilterConfig {
            category: Some("News".to_string()),
            working_only: true,
            ..Default::default()
        });

        assert!(select_mut(&mut set, &configured).is_empty());
        for channel in select_mut(&mut set, &configured.without_status()) {
            channel.status = ChannelStatus::Working;
        }
        assert_eq!(names(&filter(&set, &configured)), ["Fresh One", "Fresh Two"]);
    }

    #[test]
    fn test_select_mut_follows_filter() {
        let mut set = sample();
        let f = ChannelFilter::from(&FilterConfig {
            category: Some("Sports".to_string()),
            ..Default::default()
        });
        for channel in select_mut(&mut set, &f) {
            channel.status = ChannelStatus::Failed;
        }
        let failed: Vec<&str> = set
            .iter()
            .filter(|c| c.status == ChannelStatus::Failed)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(failed, ["Sport Germany"]);
    }
}
