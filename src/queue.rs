//! Per-command serialized execution queues.
//!
//! Each distinct command template owns one [`CommandQueue`]. Invocations run
//! in submission order; a send happens no earlier than the invocation's own
//! delay and no earlier than the previous send's post-delay.

use crate::retry::WatchList;
use crate::rules::{Pattern, RuleSet, UNLIMITED};
use crate::scheduler::{Millis, Scheduler, TimerId};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

/// Identity of a command queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId(pub(crate) u64);

/// One resolved instance of a rule's command.
#[derive(Debug, Clone)]
pub struct PendingInvocation {
    pub rule: Arc<RuleSet>,
    pub queue: QueueId,
    /// Command text with placeholders already filled in.
    pub command: String,
    /// Sends left; [`UNLIMITED`] never runs out.
    pub remaining: i64,
    pub run_at: Millis,
    /// Failure pattern resolved against the triggering match.
    pub fail_pattern: Option<Arc<Pattern>>,
}

impl PendingInvocation {
    pub fn new(
        rule: Arc<RuleSet>,
        queue: QueueId,
        command: String,
        fail_pattern: Option<Arc<Pattern>>,
    ) -> Self {
        let remaining = rule.repeat_count;
        Self {
            rule,
            queue,
            command,
            remaining,
            run_at: 0,
            fail_pattern,
        }
    }
}

/// Everything a queue touches outside itself while draining.
pub struct QueueContext<'a> {
    pub now: Millis,
    pub scheduler: &'a mut Scheduler,
    pub watch: &'a mut WatchList,
    /// Lines to write to the subprocess, in order.
    pub outbox: &'a mut Vec<String>,
}

#[derive(Debug)]
pub struct CommandQueue {
    id: QueueId,
    pending: VecDeque<PendingInvocation>,
    timer: Option<TimerId>,
    /// Earliest time the queue may send again.
    wait_until: Millis,
}

impl CommandQueue {
    pub fn new(id: QueueId) -> Self {
        Self {
            id,
            pending: VecDeque::new(),
            timer: None,
            wait_until: 0,
        }
    }

    /// No pending work and no timer armed.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.timer.is_none()
    }

    pub fn submit(&mut self, mut invocation: PendingInvocation, ctx: &mut QueueContext<'_>) {
        invocation.run_at = ctx.now.saturating_add(invocation.rule.delay);
        trace!(queue = self.id.0, run_at = invocation.run_at, "invocation queued");
        self.pending.push_back(invocation);
        if self.timer.is_none() {
            self.drain(ctx);
        }
    }

    /// Re-submit after a detected failure. Any armed timer is dropped so the
    /// queue re-evaluates against the current time straight away.
    pub fn retry(&mut self, mut invocation: PendingInvocation, ctx: &mut QueueContext<'_>) {
        if let Some(timer) = self.timer.take() {
            ctx.scheduler.cancel(timer);
        }
        invocation.run_at = ctx.now.saturating_add(invocation.rule.delay);
        self.pending.push_back(invocation);
        self.drain(ctx);
    }

    /// Handle a timer firing. Stale timers are ignored.
    pub fn on_timer(&mut self, timer: TimerId, ctx: &mut QueueContext<'_>) {
        if self.timer != Some(timer) {
            return;
        }
        self.timer = None;
        self.drain(ctx);
    }

    fn drain(&mut self, ctx: &mut QueueContext<'_>) {
        while let Some(next) = self.pending.front() {
            let ready_at = next.run_at.max(self.wait_until);
            if ready_at > ctx.now {
                self.timer = Some(ctx.scheduler.arm(ready_at, self.id));
                return;
            }

            let Some(invocation) = self.pending.pop_front() else {
                return;
            };
            let post_delay = invocation.rule.post_delay;
            if run(invocation, ctx) {
                // Re-arm even when nothing is pending so the next submission
                // is still spaced against this send.
                self.wait_until = ctx.now.saturating_add(post_delay);
                self.timer = Some(ctx.scheduler.arm(self.wait_until, self.id));
                return;
            }
        }
    }
}

/// Send one invocation. Returns false when its budget was already spent.
fn run(mut invocation: PendingInvocation, ctx: &mut QueueContext<'_>) -> bool {
    if invocation.remaining == 0 {
        debug!(command = %invocation.command, "repeat budget exhausted");
        return false;
    }

    ctx.outbox.extend(invocation.command.lines().map(str::to_string));
    if invocation.remaining != UNLIMITED {
        invocation.remaining -= 1;
    }
    debug!(
        command = %invocation.command,
        remaining = invocation.remaining,
        at = ctx.now,
        "command dispatched"
    );

    if invocation.fail_pattern.is_some() && invocation.remaining != 0 {
        ctx.watch.register(invocation);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        queue: CommandQueue,
        scheduler: Scheduler,
        watch: WatchList,
        sent: Vec<(Millis, String)>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                queue: CommandQueue::new(QueueId(1)),
                scheduler: Scheduler::default(),
                watch: WatchList::default(),
                sent: Vec::new(),
            }
        }

        fn with_ctx(&mut self, now: Millis, f: impl FnOnce(&mut CommandQueue, &mut QueueContext<'_>)) {
            let mut outbox = Vec::new();
            let mut ctx = QueueContext {
                now,
                scheduler: &mut self.scheduler,
                watch: &mut self.watch,
                outbox: &mut outbox,
            };
            f(&mut self.queue, &mut ctx);
            self.sent.extend(outbox.into_iter().map(|line| (now, line)));
        }

        fn submit(&mut self, now: Millis, invocation: PendingInvocation) {
            self.with_ctx(now, |q, ctx| q.submit(invocation, ctx));
        }

        /// Fire every timer up to and including `until`, each at its deadline.
        fn run_until(&mut self, until: Millis) {
            while let Some(at) = self.scheduler.next_deadline() {
                if at > until {
                    break;
                }
                let Some((timer, _)) = self.scheduler.pop_due(at) else {
                    break;
                };
                self.with_ctx(at, |q, ctx| q.on_timer(timer, ctx));
            }
        }
    }

    fn rule(delay: u64, post_delay: u64, repeat_count: i64) -> Arc<RuleSet> {
        Arc::new(RuleSet {
            delay,
            post_delay,
            repeat_count,
            ..RuleSet::default()
        })
    }

    fn invocation(rule: &Arc<RuleSet>, command: &str) -> PendingInvocation {
        PendingInvocation::new(Arc::clone(rule), QueueId(1), command.to_string(), None)
    }

    #[test]
    fn test_delay_and_post_delay_spacing() {
        let mut h = Harness::new();
        let r = rule(500, 2000, 1);
        h.submit(0, invocation(&r, "first"));
        h.submit(0, invocation(&r, "second"));
        assert!(h.sent.is_empty());

        h.run_until(10_000);
        assert_eq!(
            h.sent,
            vec![(500, "first".to_string()), (2500, "second".to_string())]
        );
        assert!(h.queue.is_idle());
    }

    #[test]
    fn test_zero_delay_sends_immediately() {
        let mut h = Harness::new();
        let r = rule(0, 0, 1);
        h.submit(42, invocation(&r, "now"));
        assert_eq!(h.sent, vec![(42, "now".to_string())]);
    }

    #[test]
    fn test_post_delay_spaces_later_submission() {
        let mut h = Harness::new();
        let r = rule(0, 1000, 1);
        h.submit(0, invocation(&r, "a"));
        h.run_until(100);
        h.submit(100, invocation(&r, "b"));
        h.run_until(5000);
        assert_eq!(h.sent, vec![(0, "a".to_string()), (1000, "b".to_string())]);
    }

    #[test]
    fn test_fifo_even_with_shorter_later_delay() {
        let mut h = Harness::new();
        let slow = rule(800, 0, 1);
        let fast = rule(100, 0, 1);
        h.submit(0, invocation(&slow, "slow"));
        h.submit(0, invocation(&fast, "fast"));
        h.run_until(5000);
        assert_eq!(h.sent, vec![(800, "slow".to_string()), (800, "fast".to_string())]);
    }

    #[test]
    fn test_exhausted_budget_does_not_send() {
        let mut h = Harness::new();
        let r = rule(0, 0, 0);
        h.submit(0, invocation(&r, "never"));
        h.run_until(1000);
        assert!(h.sent.is_empty());
        assert!(h.queue.is_idle());
    }

    #[test]
    fn test_multiline_command_sends_each_line() {
        let mut h = Harness::new();
        let r = rule(0, 0, 1);
        h.submit(0, invocation(&r, "say bye\nkick \"Steve\""));
        assert_eq!(
            h.sent,
            vec![(0, "say bye".to_string()), (0, "kick \"Steve\"".to_string())]
        );
    }

    #[test]
    fn test_failure_pattern_registers_while_budget_remains() {
        let mut h = Harness::new();
        let r = rule(0, 0, 2);
        let fail = Arc::new(Pattern::compile("/^nope$/").unwrap());
        let mut inv = invocation(&r, "try");
        inv.fail_pattern = Some(Arc::clone(&fail));
        h.submit(0, inv);
        assert_eq!(h.watch.len(), 1);

        let mut last = invocation(&r, "try");
        last.fail_pattern = Some(fail);
        last.remaining = 1;
        h.run_until(10);
        h.submit(10, last);
        // Budget reaches zero on this send, so nothing more to watch for.
        assert_eq!(h.watch.len(), 1);
    }

    #[test]
    fn test_retry_reschedules_from_now() {
        let mut h = Harness::new();
        let r = rule(500, 0, 3);
        h.submit(0, invocation(&r, "kick"));
        h.run_until(600);
        let mut again = invocation(&r, "kick");
        again.remaining = 2;
        h.with_ctx(600, |q, ctx| q.retry(again, ctx));
        h.run_until(5000);
        assert_eq!(h.sent, vec![(500, "kick".to_string()), (1100, "kick".to_string())]);
    }

    #[test]
    fn test_huge_delays_saturate() {
        let mut h = Harness::new();
        let never = rule(u64::MAX, 0, 1);
        h.submit(1, invocation(&never, "never"));
        h.run_until(1_000_000);
        assert!(h.sent.is_empty());

        let mut h = Harness::new();
        let spaced = rule(0, u64::MAX, 1);
        h.submit(5, invocation(&spaced, "once"));
        h.submit(6, invocation(&spaced, "blocked"));
        h.run_until(1_000_000);
        assert_eq!(h.sent, vec![(5, "once".to_string())]);
    }

    #[test]
    fn test_unlimited_budget_keeps_retrying() {
        let mut h = Harness::new();
        let r = rule(0, 0, UNLIMITED);
        let mut inv = invocation(&r, "kick");
        inv.fail_pattern = Some(Arc::new(Pattern::compile("/^not found$/").unwrap()));
        h.submit(0, inv);

        for now in 1..=50 {
            h.run_until(now);
            let failed = h.watch.take_failed("not found").unwrap();
            assert_eq!(failed.remaining, UNLIMITED);
            h.with_ctx(now, |q, ctx| q.retry(failed, ctx));
            assert_eq!(h.watch.len(), 1);
        }
        assert_eq!(h.sent.len(), 51);
    }
}
