use crate::command::CommandSink;
use anyhow::{Context, Result};
use async_trait::async_trait;
use portable_pty::{Child, CommandBuilder, ExitStatus, MasterPty, PtySize};
use std::io::{Read, Write};

/// A server process running inside a PTY, so stdout and stderr arrive as one
/// stream.
pub struct PtySession {
    #[allow(dead_code)]
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
}

/// The write half of the PTY: the server's stdin.
pub struct PtyInput {
    writer: Box<dyn Write + Send>,
}

impl PtySession {
    /// Spawn `command` in a PTY, returning the session, its input, and a reader
    /// over its combined output.
    pub fn spawn(
        command: &str,
        args: &[String],
    ) -> Result<(Self, PtyInput, Box<dyn Read + Send>)> {
        let pty_system = portable_pty::native_pty_system();

        // Wide enough that server log lines are not wrapped by the terminal.
        let pty_size = PtySize {
            rows: 24,
            cols: 240,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system
            .openpty(pty_size)
            .context("Failed to open PTY")?;

        let mut cmd = CommandBuilder::new(command);
        for arg in args {
            cmd.arg(arg);
        }
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .context("Failed to spawn command")?;

        let writer = pair
            .master
            .take_writer()
            .context("Failed to get PTY writer")?;

        let reader = pair
            .master
            .try_clone_reader()
            .context("Failed to get PTY reader")?;

        let session = PtySession {
            master: pair.master,
            child,
        };

        Ok((session, PtyInput { writer }, reader))
    }

    /// Wait for the server to exit
    pub fn wait(&mut self) -> Result<ExitStatus> {
        self.child.wait().context("Failed to wait for server")
    }
}

impl PtyInput {
    /// Write data to the server's stdin
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl CommandSink for PtyInput {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.write(&data)
    }
}
