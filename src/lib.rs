//! # Triggertty
//!
//! Supervise a long-running server process and react to what it prints.
//!
//! Triggertty runs a server inside a PTY, mirrors its output, and tests every
//! output line against a rule file. When a line matches a rule's capture
//! pattern and its guard passes, the rule's command is queued and written back
//! to the server with the configured delay, pacing, and retry policy.
//!
//! ## Quick start
//!
//! ```
//! use triggertty::Engine;
//!
//! let mut engine = Engine::new();
//! let report = engine.load_str(r#"
//! capture: /Player connected: (.+), xuid: (.+)$/
//! compare: x == $2
//! command: kick "$1"
//! delay: 500
//! fail-detection: /^Could not find player $1$/
//! repeat-count: 10
//! 12345
//! "#);
//! assert!(report.is_clean());
//!
//! engine.handle_line("Player connected: Steve, xuid: 12345", 0);
//! assert_eq!(engine.next_deadline(), Some(500));
//! engine.advance(500);
//! assert_eq!(engine.take_output(), vec![r#"kick "Steve""#]);
//! ```
//!
//! The [`Engine`] does no I/O and takes time as a millisecond count, so the
//! same rules run unchanged under a real clock ([`supervisor::Supervisor`])
//! or a test's virtual one.
//!
//! ## Rule syntax
//!
//! | Line | Meaning |
//! |------|---------|
//! | `capture: /regex/flags` | Pattern the line must match (`$0`..`$9` are its groups) |
//! | `compare: x == $2` | Guard; `x` is the identity literal |
//! | `command: kick "$1"` | Command template sent to the server |
//! | `delay: 500` | Milliseconds (or `500ms`, `1.5s`) before the first send |
//! | `post-delay: 2s` | Minimum spacing after a send of the same command |
//! | `fail-detection: /^Could not find player $1$/` | Output that means "try again" |
//! | `repeat-count: 10` | Attempts allowed; `-1` is unlimited |
//! | `stop: true` | Skip later captures once this rule fires |
//! | `label+: value` | Compose onto the current value instead of replacing it |
//! | `<Ban>` | Start from a named preset |
//! | `// comment` | Ignored to end of line |
//! | anything else | Identity literal: binds a copy of the current rule |
//!
//! ## Guards
//!
//! Guards use a closed grammar: `x`, `true`, `false`, integers, `$0`..`$9`,
//! the operators `+ - * ** / % == <= >= &&`, and parentheses.
//! Anything else is rejected when the rule file loads. See [`rules::guard`].

pub mod capture;
pub mod command;
pub mod engine;
pub mod error;
pub mod parser;
pub mod pty;
pub mod pty_reader;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod rules;
pub mod scheduler;
pub mod supervisor;
pub mod watcher;

pub use command::CommandSink;
pub use engine::Engine;
pub use error::{GuardSyntaxError, RuleError};
pub use parser::{LineError, LoadReport};
pub use pty::PtySession;
pub use rules::{Guard, Pattern, Preset, RuleSet};
