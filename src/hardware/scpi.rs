//! Common SCPI communication abstractions.
//!
//! [`ScpiTransport`] abstracts the link (GPIB via VISA, RS-232) so instrument drivers
//! only deal with command strings. Transports:
//!
//! - `SerialScpiTransport` (feature `instrument_serial`) - tokio-serial line protocol
//! - `VisaScpiTransport` (feature `instrument_visa`) - VISA session on a blocking thread
//! - [`ScriptedTransport`] - canned responses and a command log for tests and dry runs

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Trait for SCPI communication transports.
#[async_trait]
pub trait ScpiTransport: Send + Sync {
    /// Send a query command and return the trimmed response.
    async fn query(&self, command: &str) -> Result<String>;

    /// Send a command without expecting a response.
    async fn command(&self, command: &str) -> Result<()>;
}

// =============================================================================
// Scripted transport
// =============================================================================

/// In-memory transport answering queries from a response table.
///
/// Every command and query is appended to a log in arrival order.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<HashMap<String, String>>,
    log: Mutex<Vec<String>>,
    fail_on: Option<String>,
}

impl ScriptedTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `query` with `response`.
    pub fn with_response(self, query: &str, response: &str) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(query.to_string(), response.to_string());
        }
        self
    }

    /// Fail whenever `command` is sent.
    pub fn failing_on(mut self, command: &str) -> Self {
        self.fail_on = Some(command.to_string());
        self
    }

    /// Everything sent so far.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    fn record(&self, command: &str) -> Result<()> {
        if self.fail_on.as_deref() == Some(command) {
            return Err(anyhow!("scripted failure on '{}'", command));
        }
        self.log
            .lock()
            .map_err(|_| anyhow!("transport log poisoned"))?
            .push(command.to_string());
        Ok(())
    }
}

#[async_trait]
impl ScpiTransport for ScriptedTransport {
    async fn query(&self, command: &str) -> Result<String> {
        self.record(command)?;
        self.responses
            .lock()
            .map_err(|_| anyhow!("transport responses poisoned"))?
            .get(command)
            .cloned()
            .ok_or_else(|| anyhow!("no scripted response for '{}'", command))
    }

    async fn command(&self, command: &str) -> Result<()> {
        self.record(command)
    }
}

// =============================================================================
// Serial transport
// =============================================================================

#[cfg(feature = "instrument_serial")]
pub use serial::SerialScpiTransport;

#[cfg(feature = "instrument_serial")]
mod serial {
    use super::ScpiTransport;
    use anyhow::{Context, Result};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::sync::Mutex;
    use tokio_serial::{SerialPortBuilderExt, SerialStream};

    /// RS-232 SCPI transport (8N2, LF-terminated).
    pub struct SerialScpiTransport {
        port: Mutex<BufReader<SerialStream>>,
        timeout: Duration,
    }

    impl SerialScpiTransport {
        /// Open `port_path` at `baud_rate`.
        ///
        /// # Errors
        /// Returns error if serial port cannot be opened
        pub fn open(port_path: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
            let port = tokio_serial::new(port_path, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::Two)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
                .with_context(|| format!("Failed to open serial port {}", port_path))?;

            Ok(Self {
                port: Mutex::new(BufReader::new(port)),
                timeout,
            })
        }
    }

    #[async_trait]
    impl ScpiTransport for SerialScpiTransport {
        async fn query(&self, command: &str) -> Result<String> {
            let mut port = self.port.lock().await;

            let cmd = format!("{}\n", command);
            port.get_mut()
                .write_all(cmd.as_bytes())
                .await
                .context("SCPI serial write failed")?;

            let mut response = String::new();
            tokio::time::timeout(self.timeout, port.read_line(&mut response))
                .await
                .with_context(|| format!("SCPI serial read timeout for '{}'", command))??;

            Ok(response.trim().to_string())
        }

        async fn command(&self, command: &str) -> Result<()> {
            let mut port = self.port.lock().await;

            let cmd = format!("{}\n", command);
            port.get_mut()
                .write_all(cmd.as_bytes())
                .await
                .context("SCPI serial write failed")?;
            Ok(())
        }
    }
}

// =============================================================================
// VISA transport
// =============================================================================

#[cfg(feature = "instrument_visa")]
pub use visa::VisaScpiTransport;

#[cfg(feature = "instrument_visa")]
mod visa {
    use super::ScpiTransport;
    use anyhow::{anyhow, Context, Result};
    use async_trait::async_trait;
    use std::ffi::CString;
    use std::io::{BufRead, BufReader, Write};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use visa_rs::prelude::*;

    /// VISA session (GPIB/USB/LXI) for SCPI instruments.
    ///
    /// VISA calls are synchronous; they run on tokio's blocking pool.
    pub struct VisaScpiTransport {
        // Keep the resource manager alive for as long as the session.
        _rm: DefaultRM,
        instrument: Arc<Mutex<Instrument>>,
    }

    impl VisaScpiTransport {
        /// Open a resource such as `GPIB0::5::INSTR`.
        pub fn open(resource: &str, timeout: Duration) -> Result<Self> {
            let rm = DefaultRM::new().map_err(|e| anyhow!("VISA resource manager: {:?}", e))?;
            let resource_string =
                CString::new(resource).context("VISA resource string contains NUL")?;
            let instrument = rm
                .open(&resource_string.into(), AccessMode::NO_LOCK, timeout)
                .map_err(|e| anyhow!("Failed to open VISA resource {}: {:?}", resource, e))?;
            Ok(Self {
                _rm: rm,
                instrument: Arc::new(Mutex::new(instrument)),
            })
        }

        async fn exchange(&self, command: &str, expect_reply: bool) -> Result<String> {
            let instrument = Arc::clone(&self.instrument);
            let line = format!("{}\n", command);
            tokio::task::spawn_blocking(move || -> Result<String> {
                let mut instr = instrument
                    .lock()
                    .map_err(|_| anyhow!("VISA session lock poisoned"))?;
                instr
                    .write_all(line.as_bytes())
                    .context("VISA write failed")?;
                if !expect_reply {
                    return Ok(String::new());
                }
                let mut response = String::new();
                BufReader::new(&*instr)
                    .read_line(&mut response)
                    .context("VISA read failed")?;
                Ok(response.trim().to_string())
            })
            .await
            .context("VISA worker task failed")?
        }
    }

    #[async_trait]
    impl ScpiTransport for VisaScpiTransport {
        async fn query(&self, command: &str) -> Result<String> {
            self.exchange(command, true).await
        }

        async fn command(&self, command: &str) -> Result<()> {
            self.exchange(command, false).await.map(|_| ())
        }
    }
}
