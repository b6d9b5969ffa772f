//! Line-oriented operator prompts on stdin/stdout.
//!
//! Input is read on a dedicated OS thread and handed over a channel, so an
//! unanswered prompt never holds the runtime open at exit.

use std::io::BufRead;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tracing::error;

use crate::error::{AppResult, SweepError};

const LINE_BUFFER: usize = 16;

/// Shared reader over stdin; keeps buffered input between prompts.
pub struct ConsolePrompt {
    lines: Mutex<mpsc::Receiver<std::io::Result<String>>>,
}

impl Default for ConsolePrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsolePrompt {
    /// Attach to the process stdin.
    pub fn new() -> Self {
        Self::from_reader(std::io::BufReader::new(std::io::stdin()))
    }

    /// Read answers from `reader` instead of stdin.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let spawned = std::thread::Builder::new()
            .name("magsweep-stdin".to_string())
            .spawn(move || {
                for line in reader.lines() {
                    let failed = line.is_err();
                    if tx.blocking_send(line).is_err() || failed {
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            // The sender is dropped with the closure, so prompts report a closed stdin
            error!(error = %e, "Failed to start console reader thread");
        }
        Self {
            lines: Mutex::new(rx),
        }
    }

    /// Print `prompt` and wait for one line, without its terminator.
    ///
    /// # Errors
    /// [`SweepError::OperatorAborted`] when stdin is closed.
    pub async fn ask(&self, prompt: &str) -> AppResult<String> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.write_all(b" ").await?;
        stdout.flush().await?;

        match self.lines.lock().await.recv().await {
            Some(line) => Ok(line?),
            None => Err(SweepError::OperatorAborted("stdin closed".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use std::time::Duration;

    #[tokio::test]
    async fn answers_arrive_in_order_then_abort() {
        let prompt = ConsolePrompt::from_reader(Cursor::new("yes\r\n12.5\n"));

        assert_eq!(prompt.ask("Ready?").await.unwrap(), "yes");
        assert_eq!(prompt.ask("Gauss:").await.unwrap(), "12.5");
        assert!(matches!(
            prompt.ask("Again?").await,
            Err(SweepError::OperatorAborted(_))
        ));
    }

    /// Reader that never returns, like an idle terminal.
    struct IdleTerminal;

    impl Read for IdleTerminal {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            loop {
                std::thread::park();
            }
        }
    }

    #[test]
    fn pending_prompt_does_not_block_runtime_shutdown() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let prompt = ConsolePrompt::from_reader(std::io::BufReader::new(IdleTerminal));

        let answered = runtime.block_on(async {
            tokio::time::timeout(Duration::from_millis(20), prompt.ask("Swap the leads")).await
        });
        assert!(answered.is_err());

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            drop(runtime);
            let _ = done_tx.send(());
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }
}
