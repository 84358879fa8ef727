//! Shard key extraction
//!
//! Picks the part of a request path that decides its shard. With no pattern
//! the whole path is the key. With a pattern, a non-empty first capture group
//! is the key; any other outcome falls back to the whole path, so every
//! request stays routable.

use regex::Regex;

#[derive(Debug, Clone, Default)]
pub struct ShardKeyExtractor {
    pattern: Option<Regex>,
}

impl ShardKeyExtractor {
    /// Compile `pattern`. An empty pattern means "use the whole path".
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        if pattern.is_empty() {
            return Ok(Self::default());
        }
        Ok(Self {
            pattern: Some(Regex::new(pattern)?),
        })
    }

    pub fn extract<'a>(&self, path: &'a str) -> &'a str {
        let Some(pattern) = &self.pattern else {
            return path;
        };

        pattern
            .captures(path)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .filter(|key| !key.is_empty())
            .unwrap_or(path)
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_ref().map(Regex::as_str)
    }
}
