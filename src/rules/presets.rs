//! Named presets that a rule file instantiates with `<Name>`.
//!
//! A preset is stored as field assignments rather than compiled fragments so
//! that each load interns its own instances.

use super::{Field, RuleSet};
use crate::error::{RuleError, RuleResult};
use crate::registry::Registry;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct Preset {
    fields: Vec<(Field, String)>,
}

impl Preset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field assignment, applied in insertion order.
    pub fn with(mut self, field: Field, value: impl Into<String>) -> Self {
        self.fields.push((field, value.into()));
        self
    }

    /// Build a fresh rule set from this preset.
    pub fn instantiate(&self, registry: &mut Registry) -> RuleResult<RuleSet> {
        let mut rule = RuleSet::default();
        for (field, value) in &self.fields {
            rule.apply(*field, value, false, registry)?;
        }
        Ok(rule)
    }
}

/// The preset table.
#[derive(Debug, Clone)]
pub struct Presets {
    table: HashMap<String, Preset>,
}

impl Presets {
    pub const DEFAULT: &'static str = "Default";
    pub const BAN: &'static str = "Ban";

    /// A table holding the built-in presets:
    ///
    /// - `Default`: an empty rule (guard `true`, no delays, one attempt).
    /// - `Ban`: kick a player by xuid as soon as they connect, retrying while
    ///   the server reports the player as not found yet.
    pub fn builtin() -> Self {
        let mut table = HashMap::new();
        table.insert(Self::DEFAULT.to_string(), Preset::new());
        table.insert(
            Self::BAN.to_string(),
            Preset::new()
                .with(Field::Capture, "/Player connected: (.+), xuid: (.+)$/")
                .with(Field::Compare, "x == $2")
                .with(Field::Command, "kick \"$1\"")
                .with(Field::Delay, "500")
                .with(Field::FailDetection, "/^Could not find player $1$/")
                .with(Field::RepeatCount, "10")
                .with(Field::Stop, "true"),
        );
        Self { table }
    }

    pub fn define(&mut self, name: impl Into<String>, preset: Preset) {
        self.table.insert(name.into(), preset);
    }

    pub fn instantiate(&self, name: &str, registry: &mut Registry) -> RuleResult<RuleSet> {
        self.table
            .get(name)
            .ok_or_else(|| RuleError::UnknownPreset(name.to_string()))?
            .instantiate(registry)
    }
}

impl Default for Presets {
    fn default() -> Self {
        Self::builtin()
    }
}
