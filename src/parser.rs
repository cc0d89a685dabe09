//! Rule file parser.
//!
//! The top-level entry point is [`parse_str`]; [`crate::Engine::load_str`]
//! and [`crate::Engine::load_file`] wrap it with a registry swap.
//!
//! ```text
//! // kick banned players as soon as they join
//! capture: /Player connected: (.+), xuid: (.+)$/
//! compare: x == $2
//! command: kick "$1"
//! delay: 500
//! fail-detection: /^Could not find player $1$/
//! repeat-count: 10
//! 2535400000000001
//! 2535400000000002
//!
//! <Ban>
//! post-delay+: 1s
//! 2535400000000003
//! ```
//!
//! `label: value` sets a field and `label+: value` composes onto it. `<Name>`
//! starts over from a named preset. Any other line is an identity literal:
//! it binds a copy of the current rule to its capture, and the following
//! lines keep editing an independent copy.

use crate::capture::Capture;
use crate::error::{RuleError, RuleResult};
use crate::registry::Registry;
use crate::rules::{Field, Presets, RuleSet};
use anyhow::{Context as _, Result, anyhow};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// One rejected line of a rule file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
    /// 1-based line number.
    pub line: usize,
    pub error: RuleError,
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.line, self.error)
    }
}

/// Summary of one load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Rules bound to captures.
    pub rules: usize,
    /// Distinct capture patterns.
    pub captures: usize,
    pub errors: Vec<LineError>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Captures built from one rule file, in first-appearance order.
#[derive(Debug, Default)]
pub struct RuleBook {
    pub captures: Vec<Capture>,
    pub report: LoadReport,
}

/// Parse a rule file, interning fragments through `registry`.
///
/// A bad line is logged as `<line>: <message>`, recorded in the report, and
/// skipped; it never stops the rest of the file from loading.
///
/// # Example
///
/// ```
/// use triggertty::parser::parse_str;
/// use triggertty::registry::Registry;
/// use triggertty::rules::Presets;
///
/// let mut registry = Registry::default();
/// let book = parse_str(
///     "capture: /^(\\w+) joined$/\ncommand: say hi $1\nanyone\n",
///     &mut registry,
///     &Presets::builtin(),
/// );
/// assert_eq!(book.report.rules, 1);
/// assert!(book.report.is_clean());
/// ```
pub fn parse_str(content: &str, registry: &mut Registry, presets: &Presets) -> RuleBook {
    let mut loader = Loader {
        registry,
        presets,
        current: RuleSet::default(),
        captures: Vec::new(),
        by_pattern: HashMap::new(),
        rules: 0,
    };
    let mut errors = Vec::new();

    for (line_num, raw) in content.lines().enumerate() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        if let Err(e) = loader.parse_line(line) {
            let e = LineError {
                line: line_num + 1,
                error: e,
            };
            error!("{e}");
            errors.push(e);
        }
    }

    RuleBook {
        report: LoadReport {
            rules: loader.rules,
            captures: loader.captures.len(),
            errors,
        },
        captures: loader.captures,
    }
}

/// Read a rule file from disk.
pub fn read_rules(path: impl AsRef<std::path::Path>) -> Result<String> {
    let path = path.as_ref();
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rule file: {}", path.display()))
}

struct Loader<'a> {
    registry: &'a mut Registry,
    presets: &'a Presets,
    current: RuleSet,
    captures: Vec<Capture>,
    by_pattern: HashMap<String, usize>,
    rules: usize,
}

impl Loader<'_> {
    fn parse_line(&mut self, line: &str) -> RuleResult<()> {
        if let Some(name) = line.strip_prefix('<').and_then(|l| l.strip_suffix('>')) {
            return match self.presets.instantiate(name.trim(), self.registry) {
                Ok(rule) => {
                    self.current = rule;
                    Ok(())
                }
                Err(e) => {
                    // Don't let the following literals inherit the previous rule.
                    self.current = RuleSet::default();
                    Err(e)
                }
            };
        }

        if let Some((label, additive, value)) = split_field(line) {
            let field =
                Field::from_label(label).ok_or_else(|| RuleError::UnknownField(label.to_string()))?;
            return self.current.apply(field, value, additive, self.registry);
        }

        self.bind_identity(line)
    }

    fn bind_identity(&mut self, identity: &str) -> RuleResult<()> {
        let mut rule = self.current.clone();
        rule.identity = identity.to_string();
        let (pattern, _) = rule.bindable()?;

        let index = *self
            .by_pattern
            .entry(pattern.source().to_string())
            .or_insert_with(|| {
                self.captures.push(Capture::new(Arc::clone(&pattern)));
                self.captures.len() - 1
            });
        self.captures[index].bind(Arc::new(rule));
        self.rules += 1;
        Ok(())
    }
}

/// Split `label: value` / `label+: value`. Returns `None` when the text before
/// the first `:` is not label-shaped, which makes the line an identity literal.
fn split_field(line: &str) -> Option<(&str, bool, &str)> {
    let (head, value) = line.split_once(':')?;
    let head = head.trim_end();
    let (label, additive) = match head.strip_suffix('+') {
        Some(label) => (label.trim_end(), true),
        None => (head, false),
    };
    let mut chars = label.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() || !chars.all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return None;
    }
    Some((label, additive, value.trim()))
}

/// Strip a `//` comment, preserving `//` inside double-quoted strings and
/// after a backslash.
fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    let mut escaped = false;
    let mut prev_slash = false;
    for (i, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            prev_slash = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '"' => in_quotes = !in_quotes,
            '/' if !in_quotes && prev_slash => return &line[..i - 1],
            _ => {}
        }
        prev_slash = ch == '/' && !in_quotes;
    }
    line
}

/// Parse a timing value: a bare integer is milliseconds, otherwise a
/// duration literal as accepted by [`parse_duration`].
pub(crate) fn parse_millis(s: &str) -> Result<u64> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(ms);
    }
    let duration = parse_duration(s)?;
    u64::try_from(duration.as_millis()).context("Duration out of range")
}

/// Parse a duration string: `1s`, `500ms`, `1.5s`.
pub(crate) fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Some(ms_str) = s.strip_suffix("ms") {
        let ms: u64 = ms_str
            .trim()
            .parse()
            .context("Invalid milliseconds value")?;
        Ok(Duration::from_millis(ms))
    } else if let Some(s_str) = s.strip_suffix('s') {
        let secs: f64 = s_str.trim().parse().context("Invalid seconds value")?;
        Duration::try_from_secs_f64(secs).context("Invalid seconds value")
    } else {
        Err(anyhow!("Duration must end with 's' or 'ms', got: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> RuleBook {
        parse_str(content, &mut Registry::default(), &Presets::builtin())
    }

    const BAN_RULES: &str = r#"
// ban list
capture: /Player connected: (.+), xuid: (.+)$/
compare: x == $2
command: kick "$1"
delay: 500
fail-detection: /^Could not find player $1$/
repeat-count: 10
12345
67890
"#;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(
            parse_duration("1.5s").unwrap(),
            Duration::from_secs_f64(1.5)
        );
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn test_parse_millis() {
        assert_eq!(parse_millis("250").unwrap(), 250);
        assert_eq!(parse_millis("2s").unwrap(), 2000);
        assert!(parse_millis("soon").is_err());
    }

    #[test]
    fn test_identity_lines_bind_clones() {
        let book = parse(BAN_RULES);
        assert!(book.report.is_clean(), "{:?}", book.report.errors);
        assert_eq!(book.report.rules, 2);
        assert_eq!(book.captures.len(), 1);

        let rules = book.captures[0].rules();
        assert_eq!(rules[0].identity, "12345");
        assert_eq!(rules[1].identity, "67890");
        assert_eq!(rules[1].delay, 500);
        assert_eq!(rules[1].repeat_count, 10);
        assert!(!Arc::ptr_eq(&rules[0], &rules[1]));
        assert!(Arc::ptr_eq(
            rules[0].command.as_ref().unwrap(),
            rules[1].command.as_ref().unwrap()
        ));
    }

    #[test]
    fn test_later_fields_only_affect_later_literals() {
        let book = parse("capture: /a(.)/\ncommand: one\nfirst\ncommand: two\nsecond\n");
        let rules = book.captures[0].rules();
        assert_eq!(rules[0].command.as_ref().unwrap().template.source(), "one");
        assert_eq!(rules[1].command.as_ref().unwrap().template.source(), "two");
    }

    #[test]
    fn test_same_pattern_shares_capture() {
        let book = parse("capture: /x/\ncommand: a\none\n<Default>\ncapture: /x/\ncommand: b\ntwo\n");
        assert_eq!(book.captures.len(), 1);
        assert_eq!(book.captures[0].rules().len(), 2);
    }

    #[test]
    fn test_captures_keep_first_appearance_order() {
        let book = parse("capture: /b/\ncommand: b\nx\ncapture: /a/\ncommand: a\ny\n");
        let sources: Vec<_> = book.captures.iter().map(|c| c.pattern().source()).collect();
        assert_eq!(sources, vec!["/b/", "/a/"]);
    }

    #[test]
    fn test_preset_then_override() {
        let book = parse("<Ban>\ndelay: 1s\npost-delay+: 250\n42\n");
        assert!(book.report.is_clean());
        let rule = &book.captures[0].rules()[0];
        assert_eq!(rule.delay, 1000);
        assert_eq!(rule.post_delay, 250);
        assert_eq!(rule.identity, "42");
        assert!(rule.stop);
    }

    #[test]
    fn test_errors_are_reported_per_line_and_loading_continues() {
        let book = parse(
            "capture: /x (.+)/\ncolour: red\ncompare: x ++ $1\nstop+: true\n<Nope>\ncommand: go\nid\n",
        );
        let lines: Vec<_> = book.report.errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![2, 3, 4, 5, 7]);
        assert!(matches!(book.report.errors[0].error, RuleError::UnknownField(_)));
        assert!(matches!(book.report.errors[1].error, RuleError::GuardSyntax(_)));
        assert!(matches!(book.report.errors[2].error, RuleError::NonAdditiveField(_)));
        assert!(matches!(book.report.errors[3].error, RuleError::UnknownPreset(_)));
        // `<Nope>` reset the rule, so the literal has no capture to bind to.
        assert_eq!(book.report.rules, 0);
        assert!(matches!(book.report.errors[4].error, RuleError::NoActiveCapture(_)));
    }

    #[test]
    fn test_line_error_display() {
        let book = parse("bogus: 1\n");
        assert_eq!(book.report.errors[0].to_string(), "1: unknown field `bogus`");
    }

    #[test]
    fn test_split_field() {
        assert_eq!(split_field("delay: 5"), Some(("delay", false, "5")));
        assert_eq!(split_field("delay+: 5"), Some(("delay", true, "5")));
        assert_eq!(split_field("post-delay : 5"), Some(("post-delay", false, "5")));
        assert_eq!(
            split_field("capture: /a: (.+)/"),
            Some(("capture", false, "/a: (.+)/"))
        );
        assert_eq!(split_field("12345"), None);
        assert_eq!(split_field("[12:30] Steve"), None);
    }

    #[test]
    fn test_strip_comment() {
        assert_eq!(strip_comment("delay: 5 // wait"), "delay: 5 ");
        assert_eq!(strip_comment("// whole line"), "");
        assert_eq!(strip_comment("command: say \"a//b\""), "command: say \"a//b\"");
        assert_eq!(strip_comment(r"capture: /http:\/\/x/"), r"capture: /http:\/\/x/");
        assert_eq!(strip_comment("capture: /a/ // note"), "capture: /a/ ");
    }
}
