//! The Rule Set model and field-level composition.

use super::{Guard, Pattern, Template, pattern};
use crate::error::{RuleError, RuleResult};
use crate::parser::parse_millis;
use crate::queue::QueueId;
use crate::registry::Registry;
use std::sync::Arc;

/// A command template together with the queue that serializes it.
///
/// Interned by command text, so every rule emitting the same text shares
/// one queue.
#[derive(Debug)]
pub struct Command {
    pub template: Template,
    pub queue: QueueId,
}

/// A rule-file label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Capture,
    Compare,
    Command,
    Delay,
    PostDelay,
    FailDetection,
    RepeatCount,
    Stop,
}

impl Field {
    /// Look up a label. Both `kebab-case` and `camelCase` spellings are accepted.
    pub fn from_label(label: &str) -> Option<Self> {
        let field = match label {
            "capture" => Field::Capture,
            "compare" => Field::Compare,
            "command" => Field::Command,
            "delay" => Field::Delay,
            "post-delay" | "postDelay" => Field::PostDelay,
            "fail-detection" | "failDetection" => Field::FailDetection,
            "repeat-count" | "repeatCount" => Field::RepeatCount,
            "stop" => Field::Stop,
            _ => return None,
        };
        Some(field)
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::Capture => "capture",
            Field::Compare => "compare",
            Field::Command => "command",
            Field::Delay => "delay",
            Field::PostDelay => "post-delay",
            Field::FailDetection => "fail-detection",
            Field::RepeatCount => "repeat-count",
            Field::Stop => "stop",
        }
    }
}

/// Repeat budget meaning "retry forever".
pub const UNLIMITED: i64 = -1;

/// Full configuration of one trigger.
///
/// Mutated only while a rule file is being parsed; once bound to a capture it
/// is shared read-only through an `Arc`.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub capture: Option<Arc<Pattern>>,
    pub compare: Arc<Guard>,
    pub command: Option<Arc<Command>>,
    /// Identity literal bound to `x` in the guard.
    pub identity: String,
    /// Milliseconds between submission and the earliest send.
    pub delay: u64,
    /// Minimum milliseconds after a send before the queue sends again.
    pub post_delay: u64,
    /// Failure pattern, resolved against the match that triggered the send.
    pub fail_detection: Option<Template>,
    /// Remaining sends allowed; [`UNLIMITED`] never runs out.
    pub repeat_count: i64,
    pub stop: bool,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            capture: None,
            compare: Arc::new(Guard::always()),
            command: None,
            identity: String::new(),
            delay: 0,
            post_delay: 0,
            fail_detection: None,
            repeat_count: 1,
            stop: false,
        }
    }
}

impl RuleSet {
    /// Set (`label: value`) or compose (`label+: value`) one field.
    pub fn apply(
        &mut self,
        field: Field,
        value: &str,
        additive: bool,
        registry: &mut Registry,
    ) -> RuleResult<()> {
        let value = value.trim();
        match field {
            Field::Capture => {
                let source = match (&self.capture, additive) {
                    (Some(old), true) => concat_patterns(old.source(), value),
                    _ => value.to_string(),
                };
                self.capture = Some(registry.pattern(&source)?);
            }
            Field::Compare => {
                let source = if additive {
                    format!("({})&&({})", self.compare.source(), value)
                } else {
                    value.to_string()
                };
                self.compare = registry.guard(&source)?;
            }
            Field::Command => {
                let text = match (&self.command, additive) {
                    (Some(old), true) => format!("{}\n{}", old.template.source(), value),
                    _ => value.to_string(),
                };
                self.command = Some(registry.command(&text));
            }
            Field::Delay => {
                let ms = parse_millis(value).map_err(|_| invalid(field, value))?;
                self.delay = if additive {
                    self.delay.checked_add(ms).ok_or_else(|| invalid(field, value))?
                } else {
                    ms
                };
            }
            Field::PostDelay => {
                let ms = parse_millis(value).map_err(|_| invalid(field, value))?;
                self.post_delay = if additive {
                    self.post_delay.checked_add(ms).ok_or_else(|| invalid(field, value))?
                } else {
                    ms
                };
            }
            Field::RepeatCount => {
                let count: i64 = value.parse().map_err(|_| invalid(field, value))?;
                if count < UNLIMITED {
                    return Err(invalid(field, value));
                }
                self.repeat_count = if !additive {
                    count
                } else if self.repeat_count == UNLIMITED || count == UNLIMITED {
                    UNLIMITED
                } else {
                    self.repeat_count
                        .checked_add(count)
                        .ok_or_else(|| invalid(field, value))?
                };
            }
            Field::FailDetection => {
                if additive {
                    return Err(RuleError::NonAdditiveField(field.name()));
                }
                let template = Template::parse(value);
                // Placeholders are filled per match; check the shape now.
                Pattern::compile(&template.resolve_escaped(&[]))?;
                self.fail_detection = Some(template);
            }
            Field::Stop => {
                if additive {
                    return Err(RuleError::NonAdditiveField(field.name()));
                }
                self.stop = match value {
                    "true" | "1" => true,
                    "false" | "0" => false,
                    _ => return Err(invalid(field, value)),
                };
            }
        }
        Ok(())
    }

    /// Pattern and command of a rule that is about to be bound, or which one
    /// is missing.
    pub fn bindable(&self) -> RuleResult<(Arc<Pattern>, Arc<Command>)> {
        let capture = self
            .capture
            .clone()
            .ok_or_else(|| RuleError::NoActiveCapture(self.identity.clone()))?;
        let command = self.command.clone().ok_or_else(|| RuleError::IncompleteRule {
            identity: self.identity.clone(),
            missing: "command",
        })?;
        Ok((capture, command))
    }
}

fn invalid(field: Field, value: &str) -> RuleError {
    RuleError::InvalidValue {
        field: field.name(),
        value: value.to_string(),
    }
}

/// Join two pattern literals into one, merging flags.
fn concat_patterns(old: &str, new: &str) -> String {
    let (old_body, old_flags) = pattern::split_literal(old);
    let (new_body, new_flags) = pattern::split_literal(new);
    let slashed = old.starts_with('/') || new.starts_with('/');
    if !slashed {
        return format!("{old_body}{new_body}");
    }
    let mut flags = old_flags.to_string();
    for flag in new_flags.chars() {
        if !flags.contains(flag) {
            flags.push(flag);
        }
    }
    format!("/{old_body}{new_body}/{flags}")
}
