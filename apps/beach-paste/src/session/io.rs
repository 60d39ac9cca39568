use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};
use tokio::sync::mpsc;

/// Line-oriented console the session reads pasted text from and writes to.
#[async_trait]
pub trait LineIo: Send {
    /// Next input line without its terminator; `None` at end of input.
    async fn read_line(&mut self) -> io::Result<Option<String>>;

    async fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Human-facing hint; kept off the data stream.
    async fn prompt(&mut self, _text: &str) -> io::Result<()> {
        Ok(())
    }
}

/// Stdin/stdout console. Prompts go to stderr so stdout carries only the
/// encoded description and received messages.
pub struct ConsoleIo {
    lines: Lines<BufReader<Stdin>>,
    stdout: Stdout,
}

impl ConsoleIo {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            stdout: tokio::io::stdout(),
        }
    }
}

impl Default for ConsoleIo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LineIo for ConsoleIo {
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        self.lines.next_line().await
    }

    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.stdout.write_all(line.as_bytes()).await?;
        self.stdout.write_all(b"\n").await?;
        self.stdout.flush().await
    }

    async fn prompt(&mut self, text: &str) -> io::Result<()> {
        let mut stderr = tokio::io::stderr();
        stderr.write_all(text.as_bytes()).await?;
        stderr.write_all(b"\n").await?;
        stderr.flush().await
    }
}

/// In-process console backed by channels, for driving a session from code.
pub struct ChannelIo {
    input: mpsc::UnboundedReceiver<String>,
    output: mpsc::UnboundedSender<String>,
}

/// The far side of a [`ChannelIo`]: feed lines in, collect lines out.
/// Dropping `input` signals end of input.
pub struct ChannelIoHandle {
    pub input: mpsc::UnboundedSender<String>,
    pub output: mpsc::UnboundedReceiver<String>,
}

impl ChannelIo {
    pub fn pair() -> (ChannelIo, ChannelIoHandle) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        (
            ChannelIo {
                input: input_rx,
                output: output_tx,
            },
            ChannelIoHandle {
                input: input_tx,
                output: output_rx,
            },
        )
    }
}

#[async_trait]
impl LineIo for ChannelIo {
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        Ok(self.input.recv().await)
    }

    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.output
            .send(line.to_string())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "console output closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::tokio_timeout_test(10)]
    async fn channel_io_round_trips_lines_and_reports_eof() {
        let (mut io, mut handle) = ChannelIo::pair();
        handle.input.send("first".to_string()).unwrap();
        drop(handle.input);

        assert_eq!(io.read_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(io.read_line().await.unwrap(), None);

        io.prompt("ignored").await.unwrap();
        io.write_line("out").await.unwrap();
        assert_eq!(handle.output.recv().await.as_deref(), Some("out"));

        drop(handle.output);
        let err = io.write_line("lost").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
