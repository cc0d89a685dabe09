//! Error types raised while compiling rule fragments and loading rule files.

use thiserror::Error;

/// A guard expression fell outside the accepted grammar.
///
/// `position` is the byte offset into the expression source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("guard syntax error at column {}: {message}", position + 1)]
pub struct GuardSyntaxError {
    pub position: usize,
    pub message: String,
}

impl GuardSyntaxError {
    pub(crate) fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// Errors produced by one line of a rule file.
///
/// Every variant is recoverable: the loader reports it and moves on to the
/// next line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error(transparent)]
    GuardSyntax(#[from] GuardSyntaxError),

    #[error("unknown field `{0}`")]
    UnknownField(String),

    #[error("unknown preset `<{0}>`")]
    UnknownPreset(String),

    #[error("field `{0}` does not support `+:`")]
    NonAdditiveField(&'static str),

    #[error("invalid pattern `{source_text}`: {reason}")]
    InvalidPattern { source_text: String, reason: String },

    #[error("invalid value for `{field}`: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("identity `{0}` appears before any `capture:`")]
    NoActiveCapture(String),

    #[error("rule bound to `{identity}` has no {missing}")]
    IncompleteRule {
        identity: String,
        missing: &'static str,
    },
}

pub type RuleResult<T> = std::result::Result<T, RuleError>;
