//! Compiled line patterns.
//!
//! Rule files write patterns as `/source/flags` (flags from `imsx`) or as a
//! bare regular expression. The full text as written is kept so identical
//! patterns intern to the same instance.

use crate::error::{RuleError, RuleResult};
use regex::{Regex, RegexBuilder};

#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compile a pattern literal.
    pub fn compile(source: &str) -> RuleResult<Self> {
        let source = source.trim();
        let (body, flags) = split_literal(source);
        let body = body.replace("\\/", "/");

        let mut builder = RegexBuilder::new(&body);
        for flag in flags.chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                other => {
                    return Err(RuleError::InvalidPattern {
                        source_text: source.to_string(),
                        reason: format!("unsupported flag `{other}`"),
                    });
                }
            };
        }

        let regex = builder.build().map_err(|e| RuleError::InvalidPattern {
            source_text: source.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    /// Match `line` and return every group as text, `$0` first.
    /// Groups that did not participate come back as `""`.
    pub fn captures(&self, line: &str) -> Option<Vec<String>> {
        let caps = self.regex.captures(line)?;
        Some(
            caps.iter()
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect(),
        )
    }
}

/// Split `/body/flags` into its parts; anything else is all body.
pub(crate) fn split_literal(source: &str) -> (&str, &str) {
    if let Some(rest) = source.strip_prefix('/') {
        if let Some(end) = rest.rfind('/') {
            let flags = &rest[end + 1..];
            if flags.chars().all(|c| c.is_ascii_alphabetic()) {
                return (&rest[..end], flags);
            }
        }
    }
    (source, "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slash_literal() {
        let p = Pattern::compile("/Player connected: (.+), xuid: (.+)$/").unwrap();
        let groups = p.captures("Player connected: Steve, xuid: 12345").unwrap();
        assert_eq!(groups, vec!["Player connected: Steve, xuid: 12345", "Steve", "12345"]);
        assert_eq!(p.source(), "/Player connected: (.+), xuid: (.+)$/");
    }

    #[test]
    fn test_bare_source() {
        let p = Pattern::compile("^Server started\\.$").unwrap();
        assert!(p.is_match("Server started."));
        assert!(!p.is_match("Server started!"));
    }

    #[test]
    fn test_flags() {
        let p = Pattern::compile("/^hello$/i").unwrap();
        assert!(p.is_match("HeLLo"));
        assert!(Pattern::compile("/x/q").is_err());
    }

    #[test]
    fn test_escaped_slash() {
        let p = Pattern::compile(r"/^a\/b$/").unwrap();
        assert!(p.is_match("a/b"));
    }

    #[test]
    fn test_optional_group_reads_empty() {
        let p = Pattern::compile("/^(a)?(b)$/").unwrap();
        assert_eq!(p.captures("b").unwrap(), vec!["b", "", "b"]);
    }

    #[test]
    fn test_invalid_regex() {
        let err = Pattern::compile("/(unclosed/").unwrap_err();
        assert!(matches!(err, RuleError::InvalidPattern { .. }));
    }
}
