//! Pattern extraction from single lines of build output

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// A base image referenced by a `FROM` instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FromTag {
    /// Image reference as written (`node:20`, `registry/app@sha256:...`)
    pub repo: String,
    /// Stage name given with `AS`, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

static LAYER_RE: OnceLock<Regex> = OnceLock::new();
static FROM_RE: OnceLock<Regex> = OnceLock::new();

fn layer_re() -> &'static Regex {
    LAYER_RE.get_or_init(|| Regex::new(r"^\s*--->\s+([0-9a-f]+)\s*$").expect("layer pattern"))
}

fn from_re() -> &'static Regex {
    FROM_RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*step\s+\d+(?:/\d+)?\s*:\s*from\s+(?:--platform=\S+\s+)?(\S+)(?:\s+as\s+(\S+))?\s*$",
        )
        .expect("from pattern")
    })
}

/// Extract the layer id from a ` ---> <hash>` line
pub fn extract_layer(text: &str) -> Option<String> {
    layer_re()
        .captures(text)
        .map(|caps| caps[1].to_string())
}

/// Extract the base image from a `Step N/M : FROM <image> [AS <alias>]` line
pub fn extract_from_tag(text: &str) -> Option<FromTag> {
    let caps = from_re().captures(text)?;
    Some(FromTag {
        repo: caps[1].to_string(),
        alias: caps.get(2).map(|m| m.as_str().to_string()),
    })
}
