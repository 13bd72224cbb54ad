//! Facts accumulated while a build runs

use crate::FromTag;
use serde::Serialize;
use std::collections::HashSet;

/// Mutable accumulators for one build.
///
/// Only the progress parser appends to a session; the orchestrator reads it
/// back once the pipeline has settled.
#[derive(Debug, Default)]
pub struct BuildSession {
    layers: Vec<String>,
    from_tags: Vec<FromTag>,
    from_aliases: HashSet<String>,
}

impl BuildSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a completed layer. Repeats are kept.
    pub fn record_layer(&mut self, layer: String) {
        self.layers.push(layer);
    }

    /// Record a base image reference.
    ///
    /// A reference whose repo is a stage alias seen earlier is not a new base
    /// image and is skipped. Returns whether the tag was appended.
    pub fn record_from_tag(&mut self, tag: FromTag) -> bool {
        let known_alias = self.from_aliases.contains(&tag.repo);
        if let Some(alias) = &tag.alias {
            self.from_aliases.insert(alias.clone());
        }
        if known_alias {
            return false;
        }
        self.from_tags.push(tag);
        true
    }

    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    pub fn from_tags(&self) -> &[FromTag] {
        &self.from_tags
    }

    pub fn last_layer(&self) -> Option<&str> {
        self.layers.last().map(|s| s.as_str())
    }

    /// Snapshot of what has been collected so far
    pub fn summary(&self) -> BuildSummary {
        BuildSummary {
            last_layer: self.last_layer().map(str::to_string),
            layers: self.layers.clone(),
            from_tags: self.from_tags.clone(),
        }
    }
}

/// Structured result of a build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    pub last_layer: Option<String>,
    pub layers: Vec<String>,
    pub from_tags: Vec<FromTag>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(repo: &str, alias: Option<&str>) -> FromTag {
        FromTag {
            repo: repo.to_string(),
            alias: alias.map(str::to_string),
        }
    }

    #[test]
    fn test_layers_keep_arrival_order() {
        let mut session = BuildSession::new();
        for layer in ["h1", "h2", "h3"] {
            session.record_layer(layer.to_string());
        }
        assert_eq!(session.layers(), ["h1", "h2", "h3"]);
        assert_eq!(session.last_layer(), Some("h3"));
    }

    #[test]
    fn test_duplicate_layers_not_filtered() {
        let mut session = BuildSession::new();
        session.record_layer("h1".to_string());
        session.record_layer("h1".to_string());
        assert_eq!(session.layers().len(), 2);
    }

    #[test]
    fn test_alias_reference_not_duplicated() {
        let mut session = BuildSession::new();
        assert!(session.record_from_tag(tag("x", Some("a"))));
        assert!(!session.record_from_tag(tag("a", None)));
        assert!(!session.record_from_tag(tag("a", Some("b"))));

        assert_eq!(session.from_tags(), [tag("x", Some("a"))]);
    }

    #[test]
    fn test_alias_from_skipped_reference_is_remembered() {
        // FROM x AS a, FROM a AS b, FROM b: only x is a real base image
        let mut session = BuildSession::new();
        session.record_from_tag(tag("x", Some("a")));
        session.record_from_tag(tag("a", Some("b")));
        assert!(!session.record_from_tag(tag("b", None)));
        assert_eq!(session.from_tags().len(), 1);
    }

    #[test]
    fn test_distinct_images_all_recorded() {
        let mut session = BuildSession::new();
        session.record_from_tag(tag("golang:1.22", Some("build")));
        session.record_from_tag(tag("alpine:3.19", None));
        assert_eq!(session.from_tags().len(), 2);
    }

    #[test]
    fn test_summary_of_empty_session() {
        let summary = BuildSession::new().summary();
        assert_eq!(summary, BuildSummary::default());
        assert!(summary.last_layer.is_none());
    }
}
