//! Capture dispatchers: one compiled pattern and the rules bound to it.

use crate::queue::PendingInvocation;
use crate::rules::{Pattern, RuleSet};
use std::sync::Arc;
use tracing::{trace, warn};

/// Result of testing one line against a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    NoMatch,
    /// The pattern matched. `fired` rules passed their guard; `stop` is set
    /// when one of them asked to skip the remaining captures.
    Matched { fired: usize, stop: bool },
}

impl CaptureOutcome {
    pub fn stops(self) -> bool {
        matches!(self, CaptureOutcome::Matched { stop: true, .. })
    }
}

#[derive(Debug)]
pub struct Capture {
    pattern: Arc<Pattern>,
    rules: Vec<Arc<RuleSet>>,
}

impl Capture {
    pub fn new(pattern: Arc<Pattern>) -> Self {
        Self {
            pattern,
            rules: Vec::new(),
        }
    }

    /// Bind a rule; rules are evaluated in bind order.
    pub fn bind(&mut self, rule: Arc<RuleSet>) {
        self.rules.push(rule);
    }

    pub fn pattern(&self) -> &Arc<Pattern> {
        &self.pattern
    }

    pub fn rules(&self) -> &[Arc<RuleSet>] {
        &self.rules
    }

    /// Match `line` and hand every rule whose guard passes to `submit`.
    ///
    /// A failing guard only skips that rule. A rule's `stop` flag never cuts
    /// short the rules that follow it here; it only tells the caller not to
    /// test later captures.
    pub fn test_and_run(
        &self,
        line: &str,
        mut submit: impl FnMut(PendingInvocation),
    ) -> CaptureOutcome {
        let Some(groups) = self.pattern.captures(line) else {
            return CaptureOutcome::NoMatch;
        };

        let mut fired = 0;
        let mut stop = false;
        for rule in &self.rules {
            if !rule.compare.evaluate(&rule.identity, &groups) {
                trace!(identity = %rule.identity, guard = rule.compare.source(), "guard rejected");
                continue;
            }
            let Some(command) = &rule.command else {
                continue;
            };

            let fail_pattern = rule.fail_detection.as_ref().and_then(|template| {
                match Pattern::compile(&template.resolve_escaped(&groups)) {
                    Ok(pattern) => Some(Arc::new(pattern)),
                    Err(e) => {
                        warn!(error = %e, "failure pattern did not compile for this match");
                        None
                    }
                }
            });

            submit(PendingInvocation::new(
                Arc::clone(rule),
                command.queue,
                command.template.resolve(&groups),
                fail_pattern,
            ));
            fired += 1;
            stop |= rule.stop;
        }

        CaptureOutcome::Matched { fired, stop }
    }
}
