//! Shared data model: what to collect and what comes back.

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Kind of content source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SourceKind {
    /// Posts of one account
    Profile,
    /// Posts under a hashtag
    Hashtag,
    /// Reels tab of an account (collected like a profile)
    Reels,
    /// Explicit post URLs
    UrlList,
    /// Words searched as hashtags
    Keyword,
}

impl SourceKind {
    /// Kind used to talk to the platform: reels are profiles, keywords are hashtags.
    pub fn platform_kind(self) -> SourceKind {
        match self {
            SourceKind::Reels => SourceKind::Profile,
            SourceKind::Keyword => SourceKind::Hashtag,
            other => other,
        }
    }
}

/// Extraction technology that produced a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StrategyKind {
    OfficialGraphApi,
    DirectHttp,
    BulkExtractorTool,
    BrowserAutomation,
}

/// What to collect. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct SourceSpec {
    pub kind: SourceKind,
    /// Handle, tag, keyword list, or URL list depending on `kind`
    #[builder(into)]
    pub identifier: String,
    #[builder(default = crate::core::config::collection::DEFAULT_CAP)]
    pub cap: usize,
    pub min_views: Option<u64>,
    pub min_likes: Option<u64>,
    /// Account whose session should be used for authenticated strategies
    #[builder(into)]
    pub account: Option<String>,
}

impl SourceSpec {
    /// Same thresholds and account, different target.
    pub fn retarget(&self, kind: SourceKind, identifier: impl Into<String>, cap: usize) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            cap,
            min_views: self.min_views,
            min_likes: self.min_likes,
            account: self.account.clone(),
        }
    }

    pub fn has_thresholds(&self) -> bool {
        self.min_views.is_some() || self.min_likes.is_some()
    }
}

/// Engagement counters. `None` means the strategy could not see the metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    pub views: Option<u64>,
    pub likes: Option<u64>,
    pub comments: Option<u64>,
}

impl EngagementMetrics {
    pub fn new(views: u64, likes: u64) -> Self {
        Self {
            views: Some(views),
            likes: Some(likes),
            comments: None,
        }
    }
}

/// One candidate video. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoDescriptor {
    /// Canonical post URL (`https://www.instagram.com/reel/<code>/`)
    pub source_url: String,
    /// Shortcode; the dedup key
    pub post_id: String,
    pub author: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub duration_secs: Option<f64>,
    pub thumbnail_url: Option<String>,
    pub metrics: EngagementMetrics,
    pub strategy: StrategyKind,
}

impl VideoDescriptor {
    /// Descriptor that only knows where the post lives.
    pub fn from_link(source_url: impl Into<String>, post_id: impl Into<String>, strategy: StrategyKind) -> Self {
        Self {
            source_url: source_url.into(),
            post_id: post_id.into(),
            author: None,
            title: None,
            description: None,
            duration_secs: None,
            thumbnail_url: None,
            metrics: EngagementMetrics::default(),
            strategy,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: EngagementMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_author(mut self, author: Option<String>) -> Self {
        self.author = author.filter(|a| !a.is_empty());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_source_kind_parsing() {
        assert_eq!(SourceKind::from_str("profile").unwrap(), SourceKind::Profile);
        assert_eq!(SourceKind::from_str("url_list").unwrap(), SourceKind::UrlList);
        assert_eq!(SourceKind::from_str("Hashtag").unwrap(), SourceKind::Hashtag);
        assert!(SourceKind::from_str("playlist").is_err());
        assert_eq!(SourceKind::Keyword.to_string(), "keyword");
    }

    #[test]
    fn test_platform_kind() {
        assert_eq!(SourceKind::Reels.platform_kind(), SourceKind::Profile);
        assert_eq!(SourceKind::Keyword.platform_kind(), SourceKind::Hashtag);
        assert_eq!(SourceKind::UrlList.platform_kind(), SourceKind::UrlList);
    }

    #[test]
    fn test_source_spec_builder_defaults() {
        let spec = SourceSpec::builder()
            .kind(SourceKind::Profile)
            .identifier("examplepage")
            .build();
        assert_eq!(spec.cap, crate::core::config::collection::DEFAULT_CAP);
        assert!(!spec.has_thresholds());

        let tagged = spec.retarget(SourceKind::Hashtag, "cats", 3);
        assert_eq!(tagged.identifier, "cats");
        assert_eq!(tagged.cap, 3);
    }

    #[test]
    fn test_descriptor_serializes_strategy_snake_case() {
        let desc = VideoDescriptor::from_link("https://www.instagram.com/reel/abc123/", "abc123", StrategyKind::DirectHttp);
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["strategy"], "direct_http");
        assert_eq!(json["post_id"], "abc123");
    }
}
