//! The reactive loop around the engine.
//!
//! One task owns the [`Engine`] and waits on four things: a server output
//! line, an operator console line, a reload request, and the engine's next
//! timer. Whichever is ready is handled to completion before the next wait,
//! and any command lines it produced are written before waiting again.

use crate::command::CommandSink;
use crate::engine::Engine;
use crate::scheduler::Millis;
use anyhow::Result;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Console line that reloads the rule file instead of being forwarded.
pub const RELOAD_COMMAND: &str = ".reload";

/// Most sent lines remembered while waiting for the terminal to echo them.
const ECHO_MEMORY: usize = 32;

/// Event sources feeding the loop.
pub struct Inputs {
    /// Complete lines of server output. The loop ends when this closes.
    pub lines: UnboundedReceiver<String>,
    pub console: UnboundedReceiver<String>,
    pub reloads: UnboundedReceiver<()>,
}

pub struct Supervisor<S> {
    engine: Engine,
    sink: S,
    rules: Option<PathBuf>,
    started: Instant,
    echoes: VecDeque<String>,
}

impl<S: CommandSink> Supervisor<S> {
    pub fn new(engine: Engine, sink: S, rules: Option<PathBuf>) -> Self {
        Self {
            engine,
            sink,
            rules,
            started: Instant::now(),
            echoes: VecDeque::new(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run until the server's output closes.
    pub async fn run(&mut self, mut inputs: Inputs) -> Result<()> {
        loop {
            // A deadline too far out to represent never fires.
            let wake = self
                .engine
                .next_deadline()
                .and_then(|at| self.started.checked_add(Duration::from_millis(at)));

            tokio::select! {
                // Due timers first, then operator input, then server output,
                // so a closed output stream never drops queued console lines.
                biased;

                () = sleep_until(wake), if wake.is_some() => {
                    let now = self.now();
                    self.engine.advance(now);
                }
                Some(()) = inputs.reloads.recv() => {
                    // Editors often fire several events per save.
                    while inputs.reloads.try_recv().is_ok() {}
                    self.reload();
                }
                Some(input) = inputs.console.recv() => self.on_console(input).await?,
                line = inputs.lines.recv() => match line {
                    Some(line) => self.on_output(&line),
                    None => {
                        info!("server output closed");
                        break;
                    }
                },
            }

            self.flush().await?;
        }
        Ok(())
    }

    fn now(&self) -> Millis {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(Millis::MAX)
    }

    fn on_output(&mut self, line: &str) {
        if self.is_echo(line) {
            debug!(line, "skipping echoed input");
            return;
        }
        let now = self.now();
        self.engine.handle_line(line, now);
    }

    async fn on_console(&mut self, input: String) -> Result<()> {
        if input.trim() == RELOAD_COMMAND {
            self.reload();
            return Ok(());
        }
        self.send(&input).await
    }

    fn reload(&mut self) {
        let Some(path) = &self.rules else {
            warn!("reload requested but no rule file is configured");
            return;
        };
        match self.engine.load_file(path) {
            Ok(report) if report.is_clean() => {}
            Ok(report) => warn!(errors = report.errors.len(), "rule file loaded with errors"),
            Err(e) => error!(error = %e, "reload failed, keeping current rules"),
        }
    }

    async fn flush(&mut self) -> Result<()> {
        for line in self.engine.take_output() {
            info!(command = %line, "sending command");
            self.send(&line).await?;
        }
        Ok(())
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        self.sink.send_line(line).await?;
        let line = line.trim();
        if !line.is_empty() {
            self.echoes.push_back(line.to_string());
            if self.echoes.len() > ECHO_MEMORY {
                self.echoes.pop_front();
            }
        }
        Ok(())
    }

    /// The PTY echoes what we write; those lines are not server output.
    fn is_echo(&mut self, line: &str) -> bool {
        let line = line.trim_end();
        match self.echoes.iter().position(|sent| line.ends_with(sent.as_str())) {
            Some(index) => {
                self.echoes.remove(index);
                true
            }
            None => false,
        }
    }
}

async fn sleep_until(wake: Option<Instant>) {
    match wake {
        Some(wake) => tokio::time::sleep_until(wake).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MemorySink;
    use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

    struct Feeds {
        lines: UnboundedSender<String>,
        console: UnboundedSender<String>,
        reloads: UnboundedSender<()>,
    }

    fn inputs() -> (Feeds, Inputs) {
        let (lines_tx, lines) = unbounded_channel();
        let (console_tx, console) = unbounded_channel();
        let (reloads_tx, reloads) = unbounded_channel();
        (
            Feeds {
                lines: lines_tx,
                console: console_tx,
                reloads: reloads_tx,
            },
            Inputs {
                lines,
                console,
                reloads,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_console_lines_are_forwarded() {
        let (feeds, inputs) = inputs();
        let mut supervisor = Supervisor::new(Engine::new(), MemorySink::default(), None);
        feeds.console.send("list".to_string()).unwrap();
        drop(feeds);
        supervisor.run(inputs).await.unwrap();
        assert_eq!(supervisor.sink().lines, vec!["list"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_of_sent_line_is_not_dispatched() {
        let mut engine = Engine::new();
        engine.load_str("capture: /^list$/\ncommand: say listed\nx\n");
        let (feeds, inputs) = inputs();
        let mut supervisor = Supervisor::new(engine, MemorySink::default(), None);

        feeds.console.send("list".to_string()).unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            feeds.lines.send("list".to_string()).unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            feeds.lines.send("list".to_string()).unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(feeds);
        });
        supervisor.run(inputs).await.unwrap();
        // The first `list` is the echo; only the second one triggers.
        assert_eq!(supervisor.sink().lines, vec!["list", "say listed"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_deadline_does_not_panic() {
        let mut engine = Engine::new();
        engine.load_str(&format!("capture: /^go$/\ncommand: later\ndelay: {}\nx\n", u64::MAX));
        let (feeds, inputs) = inputs();
        let mut supervisor = Supervisor::new(engine, MemorySink::default(), None);

        tokio::spawn(async move {
            feeds.lines.send("go".to_string()).unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(feeds);
        });
        supervisor.run(inputs).await.unwrap();
        assert!(supervisor.sink().lines.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_without_rule_file_keeps_running() {
        let (feeds, inputs) = inputs();
        let mut supervisor = Supervisor::new(Engine::new(), MemorySink::default(), None);
        feeds.reloads.send(()).unwrap();
        feeds.console.send(RELOAD_COMMAND.to_string()).unwrap();
        drop(feeds);
        supervisor.run(inputs).await.unwrap();
        assert!(supervisor.sink().lines.is_empty());
    }
}
