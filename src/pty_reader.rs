use std::io::{BufRead, Read};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

/// Receives raw output chunks before they are split into lines.
pub type OutputHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Splits a byte stream into lines on `\n`, dropping a `\r` right before it.
///
/// Lines are decoded as UTF-8, replacing invalid sequences. Bytes are
/// buffered until the line is complete, so multi-byte characters
/// split across reads decode correctly.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buffer: Vec<u8>,
}

impl LineSplitter {
    /// Feed a chunk and return the lines it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(end) = rest.iter().position(|b| *b == b'\n') {
            self.buffer.extend_from_slice(&rest[..end]);
            lines.push(self.take_line());
            rest = &rest[end + 1..];
        }
        self.buffer.extend_from_slice(rest);
        lines
    }

    /// Flush a trailing line that never got its newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.take_line())
        }
    }

    fn take_line(&mut self) -> String {
        if self.buffer.last() == Some(&b'\r') {
            self.buffer.pop();
        }
        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        line
    }
}

/// Spawns a background thread that reads server output, passes every raw
/// chunk to `echo`, and sends complete lines down the returned channel.
///
/// The channel closes when the reader hits EOF.
pub fn spawn_reader<R: Read + Send + 'static>(
    mut reader: R,
    echo: OutputHandler,
) -> UnboundedReceiver<String> {
    let (tx, rx) = unbounded_channel();

    thread::spawn(move || {
        let mut splitter = LineSplitter::default();
        let mut buffer = [0u8; 4096];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break, // EOF
                Ok(n) => {
                    echo(&buffer[..n]);
                    for line in splitter.push(&buffer[..n]) {
                        if tx.send(line).is_err() {
                            return; // Receiver dropped
                        }
                    }
                }
                Err(_) => break,
            }
        }
        if let Some(line) = splitter.finish() {
            let _ = tx.send(line);
        }
    });

    rx
}

/// Spawns a background thread forwarding the operator's console lines.
pub fn spawn_console_reader<R: BufRead + Send + 'static>(reader: R) -> UnboundedReceiver<String> {
    let (tx, rx) = unbounded_channel();

    thread::spawn(move || {
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    rx
}
