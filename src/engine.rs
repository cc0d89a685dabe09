use crate::capture::Capture;
use crate::parser::{self, LoadReport};
use crate::queue::{CommandQueue, QueueContext, QueueId};
use crate::registry::{EntryKind, Registry};
use crate::retry::WatchList;
use crate::rules::{Preset, Presets};
use crate::scheduler::{Millis, Scheduler};
use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// The trigger engine.
///
/// Owns every piece of mutable state: the fragment registry, the captures of
/// the active rule file, the command queues, the retry watch-list, and the
/// timers. It does no I/O. Callers feed it output lines and the current time,
/// and collect the command lines it wants written with [`Engine::take_output`].
///
/// All methods take `&mut self`, so line handling and timer firing can never
/// interleave.
#[derive(Debug, Default)]
pub struct Engine {
    registry: Registry,
    presets: Presets,
    captures: Vec<Capture>,
    queues: HashMap<QueueId, CommandQueue>,
    watch: WatchList,
    scheduler: Scheduler,
    outbox: Vec<String>,
}

impl Engine {
    /// An engine with the built-in presets and no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a preset usable as `<name>` in rule files.
    pub fn define_preset(&mut self, name: impl Into<String>, preset: Preset) {
        self.presets.define(name, preset);
    }

    /// Replace the active rules with those parsed from `content`.
    ///
    /// The registry is cleared first, so nothing is shared with the previous
    /// rule set. Queues already holding work keep draining; they carry their
    /// own rule data.
    pub fn load_str(&mut self, content: &str) -> LoadReport {
        self.registry.clear_all();
        let book = parser::parse_str(content, &mut self.registry, &self.presets);
        self.captures = book.captures;
        info!(
            rules = book.report.rules,
            captures = book.report.captures,
            errors = book.report.errors.len(),
            commands = self.registry.len(EntryKind::Command),
            "rules loaded"
        );
        book.report
    }

    /// Read and load a rule file. Only I/O failures are returned as errors;
    /// bad lines are listed in the report.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<LoadReport> {
        let content = parser::read_rules(path)?;
        Ok(self.load_str(&content))
    }

    /// React to one line of subprocess output received at `now`.
    ///
    /// The watch-list is consulted first; captures are then tested in order
    /// until one reports a stopping rule.
    pub fn handle_line(&mut self, line: &str, now: Millis) {
        let mut ctx = QueueContext {
            now,
            scheduler: &mut self.scheduler,
            watch: &mut self.watch,
            outbox: &mut self.outbox,
        };

        if let Some(failed) = ctx.watch.take_failed(line) {
            info!(command = %failed.command, remaining = failed.remaining, "failure detected, retrying");
            self.queues
                .entry(failed.queue)
                .or_insert_with(|| CommandQueue::new(failed.queue))
                .retry(failed, &mut ctx);
        }

        for capture in &self.captures {
            let queues = &mut self.queues;
            let outcome = capture.test_and_run(line, |invocation| {
                queues
                    .entry(invocation.queue)
                    .or_insert_with(|| CommandQueue::new(invocation.queue))
                    .submit(invocation, &mut ctx);
            });
            if outcome.stops() {
                debug!(pattern = capture.pattern().source(), "stopping rule matched");
                break;
            }
        }

        self.collect_idle();
    }

    /// Fire every timer due at or before `now`.
    pub fn advance(&mut self, now: Millis) {
        while let Some((timer, queue)) = self.scheduler.pop_due(now) {
            let mut ctx = QueueContext {
                now,
                scheduler: &mut self.scheduler,
                watch: &mut self.watch,
                outbox: &mut self.outbox,
            };
            if let Some(queue) = self.queues.get_mut(&queue) {
                queue.on_timer(timer, &mut ctx);
            }
        }
        self.collect_idle();
    }

    /// When the next timer is due, if any.
    pub fn next_deadline(&mut self) -> Option<Millis> {
        self.scheduler.next_deadline()
    }

    /// Command lines produced since the last call, in send order.
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outbox)
    }

    pub fn captures(&self) -> &[Capture] {
        &self.captures
    }

    pub fn watch_list(&self) -> &WatchList {
        &self.watch
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of queues with pending work or an armed timer.
    pub fn active_queues(&self) -> usize {
        self.queues.len()
    }

    /// Drop queues with nothing left to do. An idle queue's spacing window
    /// has already elapsed, so recreating it later loses nothing.
    fn collect_idle(&mut self) {
        self.queues.retain(|_, queue| !queue.is_idle());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fire timers one deadline at a time up to `until`, recording sends.
    fn run_until(engine: &mut Engine, until: Millis, sent: &mut Vec<(Millis, String)>) {
        while let Some(at) = engine.next_deadline() {
            if at > until {
                break;
            }
            engine.advance(at);
            sent.extend(engine.take_output().into_iter().map(|line| (at, line)));
        }
    }

    #[test]
    fn test_shared_command_serializes_across_rules() {
        let mut engine = Engine::new();
        let report = engine.load_str(
            "capture: /^join (.+)$/\ncommand: kick \"$2\"\npost-delay: 2000\na\n\
             capture: /^(.+) joined$/\ncommand: kick \"$2\"\npost-delay: 2000\nb\n",
        );
        assert!(report.is_clean());
        let queues: Vec<_> = engine
            .captures()
            .iter()
            .map(|c| c.rules()[0].command.as_ref().unwrap().queue)
            .collect();
        assert_eq!(queues[0], queues[1]);

        engine.handle_line("join Steve", 0);
        engine.handle_line("Alex joined", 0);
        let mut sent: Vec<_> = engine.take_output().into_iter().map(|l| (0, l)).collect();
        run_until(&mut engine, 10_000, &mut sent);
        let times: Vec<_> = sent.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![0, 2000]);
    }

    #[test]
    fn test_stop_skips_later_captures() {
        let mut engine = Engine::new();
        engine.load_str(
            "capture: /^Player (.+)$/\ncommand: first\nstop: true\nx\n\
             capture: /^Player/\ncommand: second\ny\n",
        );
        engine.handle_line("Player Steve", 0);
        assert_eq!(engine.take_output(), vec!["first"]);
    }

    #[test]
    fn test_without_stop_all_captures_fire() {
        let mut engine = Engine::new();
        engine.load_str(
            "capture: /^Player (.+)$/\ncommand: first\nx\n\
             capture: /^Player/\ncommand: second\ny\n",
        );
        engine.handle_line("Player Steve", 0);
        assert_eq!(engine.take_output(), vec!["first", "second"]);
    }

    #[test]
    fn test_idle_queues_are_collected() {
        let mut engine = Engine::new();
        engine.load_str("capture: /go/\ncommand: run\npost-delay: 100\nx\n");
        engine.handle_line("go", 0);
        assert_eq!(engine.active_queues(), 1);
        let mut sent = Vec::new();
        run_until(&mut engine, 1000, &mut sent);
        assert_eq!(engine.active_queues(), 0);
        assert_eq!(engine.next_deadline(), None);
    }

    #[test]
    fn test_reload_swaps_captures() {
        let mut engine = Engine::new();
        engine.load_str("capture: /old/\ncommand: old\nx\n");
        engine.load_str("capture: /new/\ncommand: new\nx\n");
        engine.handle_line("old", 0);
        assert!(engine.take_output().is_empty());
        engine.handle_line("new", 0);
        assert_eq!(engine.take_output(), vec!["new"]);
        assert_eq!(engine.registry().len(EntryKind::Pattern), 1);
        assert_eq!(engine.registry().len(EntryKind::Command), 1);
    }

    #[test]
    fn test_inflight_work_survives_reload() {
        let mut engine = Engine::new();
        engine.load_str("capture: /go/\ncommand: later\ndelay: 500\nx\n");
        engine.handle_line("go", 0);
        engine.load_str("");
        let mut sent = Vec::new();
        run_until(&mut engine, 1000, &mut sent);
        assert_eq!(sent, vec![(500, "later".to_string())]);
    }

    #[test]
    fn test_custom_preset() {
        use crate::rules::Field;

        let mut engine = Engine::new();
        engine.define_preset(
            "Greet",
            Preset::new()
                .with(Field::Capture, "/^(\\w+) joined$/")
                .with(Field::Command, "say welcome $1"),
        );
        let report = engine.load_str("<Greet>\nanyone\n");
        assert!(report.is_clean());
        engine.handle_line("Alex joined", 0);
        assert_eq!(engine.take_output(), vec!["say welcome Alex"]);
    }
}
