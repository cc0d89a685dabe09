//! The [`CommandSink`] trait: where triggered commands are written.

use anyhow::Result;
use async_trait::async_trait;

/// Destination for command lines, normally the supervised server's stdin.
///
/// Implementations must write each line newline-terminated, in call order.
///
/// ```no_run
/// use triggertty::command::CommandSink;
/// use async_trait::async_trait;
/// use anyhow::Result;
///
/// /// Print commands instead of sending them anywhere.
/// pub struct DryRun;
///
/// #[async_trait(?Send)]
/// impl CommandSink for DryRun {
///     async fn send_line(&mut self, line: &str) -> Result<()> {
///         println!("would send: {line}");
///         Ok(())
///     }
/// }
/// ```
#[async_trait(?Send)]
pub trait CommandSink {
    async fn send_line(&mut self, line: &str) -> Result<()>;
}

/// Collects lines in memory. Handy for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub lines: Vec<String>,
}

#[async_trait(?Send)]
impl CommandSink for MemorySink {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.lines.push(line.to_string());
        Ok(())
    }
}
