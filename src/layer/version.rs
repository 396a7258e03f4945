use std::sync::LazyLock;

use regex::Regex;

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)version["\s]*:\s*["']([^"']+)["']"#).expect("valid version regex")
});

/// First `version: "<literal>"` found in a payload, if any.
pub fn extract_version(payload: &str) -> Option<String> {
    VERSION_RE
        .captures(payload)
        .and_then(|captures| captures.get(1))
        .map(|literal| literal.as_str().to_string())
}
