//! Interning of rule fragments by source text.
//!
//! Identical source text always resolves to the same shared instance. For
//! commands this is what makes two rules emitting the same text contend on
//! one queue.

use crate::error::RuleResult;
use crate::queue::QueueId;
use crate::rules::{Command, Guard, Pattern, Template};
use std::collections::HashMap;
use std::sync::Arc;

/// The kinds of fragment the registry caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Pattern,
    Guard,
    Command,
}

#[derive(Debug, Default)]
pub struct Registry {
    patterns: HashMap<String, Arc<Pattern>>,
    guards: HashMap<String, Arc<Guard>>,
    commands: HashMap<String, Arc<Command>>,
    /// Never reset, so queues created after a clear get fresh ids.
    next_queue: u64,
}

impl Registry {
    pub fn pattern(&mut self, source: &str) -> RuleResult<Arc<Pattern>> {
        intern(&mut self.patterns, source.trim(), || Pattern::compile(source))
    }

    pub fn guard(&mut self, source: &str) -> RuleResult<Arc<Guard>> {
        intern(&mut self.guards, source.trim(), || {
            Guard::compile(source).map_err(Into::into)
        })
    }

    pub fn command(&mut self, text: &str) -> Arc<Command> {
        if let Some(existing) = self.commands.get(text) {
            return Arc::clone(existing);
        }
        self.next_queue += 1;
        let command = Arc::new(Command {
            template: Template::parse(text),
            queue: QueueId(self.next_queue),
        });
        self.commands.insert(text.to_string(), Arc::clone(&command));
        command
    }

    /// Drop every cached instance of `kind`.
    pub fn clear(&mut self, kind: EntryKind) {
        match kind {
            EntryKind::Pattern => self.patterns.clear(),
            EntryKind::Guard => self.guards.clear(),
            EntryKind::Command => self.commands.clear(),
        }
    }

    pub fn clear_all(&mut self) {
        self.clear(EntryKind::Pattern);
        self.clear(EntryKind::Guard);
        self.clear(EntryKind::Command);
    }

    pub fn len(&self, kind: EntryKind) -> usize {
        match kind {
            EntryKind::Pattern => self.patterns.len(),
            EntryKind::Guard => self.guards.len(),
            EntryKind::Command => self.commands.len(),
        }
    }
}

fn intern<T>(
    map: &mut HashMap<String, Arc<T>>,
    key: &str,
    make: impl FnOnce() -> RuleResult<T>,
) -> RuleResult<Arc<T>> {
    if let Some(existing) = map.get(key) {
        return Ok(Arc::clone(existing));
    }
    let value = Arc::new(make()?);
    map.insert(key.to_string(), Arc::clone(&value));
    Ok(value)
}
