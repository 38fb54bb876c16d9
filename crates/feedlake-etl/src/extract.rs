//! Feed line extraction
//!
//! Turns raw feed text into candidate field tuples. The format is chosen once
//! per source from the URL suffix:
//!
//! - [`FeedFormat::Filter`] (`.txt`): adblock-style rules such as
//!   `||ads.example.com^`; the domain between `||` and `^` is captured and
//!   every non-matching line (headers, comments, cosmetic rules) is skipped.
//! - [`FeedFormat::Hosts`] (anything else): hosts-file or plain lists; blank
//!   lines and `#` comments are skipped and the first two whitespace-separated
//!   tokens are taken.
//!
//! A tuple one field short of the schema is left-padded with `""` (filter
//! lists carry no sinkhole address). Any other width mismatch rejects the line.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Capture pattern for adblock-style domain rules
pub const FILTER_PATTERN: &str = r"\|\|([^|^]+)\^";

static FILTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(FILTER_PATTERN).expect("FILTER_PATTERN is a valid regex")
});

/// Maximum number of tokens taken from a hosts-format line
const HOSTS_TOKENS: usize = 2;

/// Line format of a feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Filter,
    Hosts,
}

impl FeedFormat {
    pub fn for_source(source_url: &str) -> Self {
        if source_url.ends_with(".txt") {
            FeedFormat::Filter
        } else {
            FeedFormat::Hosts
        }
    }

    /// Candidate tokens of one line, `None` when the line carries no record
    fn tokens(self, line: &str) -> Option<Vec<String>> {
        match self {
            FeedFormat::Filter => FILTER_RE.captures(line).map(|caps| {
                caps.iter()
                    .skip(1)
                    .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect()
            }),
            FeedFormat::Hosts => {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    return None;
                }
                Some(
                    trimmed
                        .split_whitespace()
                        .take(HOSTS_TOKENS)
                        .map(str::to_string)
                        .collect(),
                )
            },
        }
    }
}

/// Pattern used for a source URL, `None` for plain hosts lists
pub fn matcher(source_url: &str) -> Option<&'static str> {
    match FeedFormat::for_source(source_url) {
        FeedFormat::Filter => Some(FILTER_PATTERN),
        FeedFormat::Hosts => None,
    }
}

/// A line that produced tokens but cannot be aligned with the schema
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    #[error("captured {actual} fields, schema expects {expected}")]
    WidthMismatch { expected: usize, actual: usize },
}

/// Per-source extractor
#[derive(Debug, Clone)]
pub struct LineExtractor {
    format: FeedFormat,
    field_count: usize,
}

impl LineExtractor {
    pub fn new(source_url: &str, field_count: usize) -> Self {
        Self {
            format: FeedFormat::for_source(source_url),
            field_count,
        }
    }

    pub fn format(&self) -> FeedFormat {
        self.format
    }

    /// Extract one line. `None` means the line is not a record.
    pub fn extract_line(&self, line: &str) -> Option<Result<Vec<String>, LineError>> {
        let mut parts = self.format.tokens(line)?;

        if parts.len() + 1 == self.field_count {
            parts.insert(0, String::new());
        }

        if parts.len() != self.field_count {
            return Some(Err(LineError::WidthMismatch {
                expected: self.field_count,
                actual: parts.len(),
            }));
        }

        Some(Ok(parts))
    }

    /// Lazily extract every record line of `text`, paired with its 1-based
    /// line number. Each call starts over from the first line.
    pub fn extract<'a>(
        &'a self,
        text: &'a str,
    ) -> impl Iterator<Item = (usize, Result<Vec<String>, LineError>)> + 'a {
        text.lines()
            .enumerate()
            .filter_map(move |(i, line)| self.extract_line(line).map(|r| (i + 1, r)))
    }
}

/// Extract one line of a source without keeping an extractor around
pub fn extract(
    source_url: &str,
    field_count: usize,
    line: &str,
) -> Option<Result<Vec<String>, LineError>> {
    LineExtractor::new(source_url, field_count).extract_line(line)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_matcher_with_txt_extension() {
        assert_eq!(matcher("http://example.com/file.txt"), Some(r"\|\|([^|^]+)\^"));
    }

    #[test]
    fn test_matcher_with_other_extension() {
        assert_eq!(matcher("http://example.com/file.pdf"), None);
    }

    #[test]
    fn test_filter_line_is_left_padded() {
        let parts = extract("http://x/list.txt", 2, "||ads.example.com^").unwrap().unwrap();
        assert_eq!(parts, vec!["".to_string(), "ads.example.com".to_string()]);
    }

    #[test]
    fn test_filter_line_with_modifiers() {
        let parts = extract("http://x/list.txt", 2, "||track.example.net^$third-party")
            .unwrap()
            .unwrap();
        assert_eq!(parts[1], "track.example.net");
    }

    #[test]
    fn test_filter_non_matching_lines_yield_nothing() {
        for line in ["! Title: AdGuard DNS filter", "some comment", "", "@@||allowed.example.com"] {
            assert!(extract("http://x/list.txt", 2, line).is_none(), "line: {line:?}");
        }
    }

    #[test]
    fn test_hosts_line_unpadded() {
        let parts = extract("http://x/hosts", 2, "0.0.0.0 malicious.test").unwrap().unwrap();
        assert_eq!(parts, vec!["0.0.0.0".to_string(), "malicious.test".to_string()]);
    }

    #[test]
    fn test_hosts_line_keeps_first_two_tokens() {
        let parts = extract("http://x/hosts", 2, "0.0.0.0 36c4.net # redirect to go.trafficrouter.io")
            .unwrap()
            .unwrap();
        assert_eq!(parts, vec!["0.0.0.0".to_string(), "36c4.net".to_string()]);
    }

    #[test]
    fn test_hosts_skips_comments_and_blank_lines() {
        assert!(extract("http://x/hosts", 2, "# comment").is_none());
        assert!(extract("http://x/hosts", 2, "   # indented comment").is_none());
        assert!(extract("http://x/hosts", 2, "   ").is_none());
    }

    #[test]
    fn test_width_mismatch_rejected() {
        let err = extract("http://x/urls", 1, "0.0.0.0 malicious.test").unwrap().unwrap_err();
        assert_eq!(err, LineError::WidthMismatch { expected: 1, actual: 2 });

        let err = extract("http://x/list.txt", 3, "||a.test^").unwrap().unwrap_err();
        assert_eq!(err, LineError::WidthMismatch { expected: 3, actual: 1 });
    }

    #[test]
    fn test_extract_is_lazy_and_restartable() {
        let extractor = LineExtractor::new("http://x/list.txt", 2);
        let text = "||ads.example.com^\nsome comment\n||b.test^\n";

        let first: Vec<_> = extractor.extract(text).collect();
        let second: Vec<_> = extractor.extract(text).collect();

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_eq!(first[1].0, 3);
    }
}
