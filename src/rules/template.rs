//! Positional-placeholder templates.
//!
//! `$0`..`$9` expand to the matching captured group and `$$` to a literal
//! `$`. A `$` followed by anything else is kept as written, which lets
//! failure patterns use `$` as an end anchor (`/^Could not find $1$/`).

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Group(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(ch) = chars.next() {
            if ch != '$' {
                literal.push(ch);
                continue;
            }
            match chars.peek().copied() {
                Some('$') => {
                    chars.next();
                    literal.push('$');
                }
                Some(d) if d.is_ascii_digit() => {
                    chars.next();
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Group(d as usize - '0' as usize));
                }
                _ => literal.push('$'),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self {
            source: source.to_string(),
            segments,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Expand placeholders; a group with no captured value expands to `""`.
    pub fn resolve(&self, groups: &[String]) -> String {
        self.expand(groups, |s| s.to_string())
    }

    /// Expand placeholders with each substituted group regex-escaped, for
    /// templates whose result is compiled as a pattern.
    pub fn resolve_escaped(&self, groups: &[String]) -> String {
        self.expand(groups, regex::escape)
    }

    fn expand(&self, groups: &[String], quote: impl Fn(&str) -> String) -> String {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Group(n) => {
                    if let Some(value) = groups.get(*n) {
                        out.push_str(&quote(value));
                    }
                }
            }
        }
        out
    }
}
