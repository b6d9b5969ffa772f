//! Keysight (Agilent) E3645A DC Power Supply Driver
//!
//! Reference: Keysight E3645A User's Guide
//!
//! Protocol Overview:
//! - Format: SCPI
//! - Link: GPIB (via VISA) or RS-232 (9600 baud, 8N2)
//! - Terminator: LF (\n)
//! - Range: 35 V / 0.8 A (low range 0..35 V used by the magnet rig, 0.7 A limit)
//!
//! # Commands used
//!
//! | Operation            | Command         |
//! |----------------------|-----------------|
//! | reset                | `*RST`          |
//! | current limit        | `CURR <amps>`   |
//! | voltage setpoint     | `VOLT <volts>`  |
//! | output on/off        | `OUTP ON|OFF`   |
//! | measured voltage     | `MEAS:VOLT?`    |
//! | measured current     | `MEAS:CURR?`    |
//! | identification       | `*IDN?`         |
//!
//! The supply is unidirectional; negative field is produced by swapping the magnet
//! leads by hand, so negative setpoints are rejected here.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

use crate::hardware::capabilities::VoltageSource;
use crate::hardware::scpi::ScpiTransport;

/// Maximum programmable voltage on the 35 V range.
pub const MAX_VOLTAGE: f64 = 35.0;

/// Driver for the E3645A implementing [`VoltageSource`].
pub struct E3645A<T> {
    transport: T,
}

impl<T: ScpiTransport> E3645A<T> {
    /// Wrap an open transport.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Access the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn query_f64(&self, command: &str) -> Result<f64> {
        let response = self.transport.query(command).await?;
        parse_measurement(&response).with_context(|| format!("E3645A {} failed", command))
    }
}

/// Parse a SCPI numeric response such as `+1.50000000E+01`.
fn parse_measurement(response: &str) -> Result<f64> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Empty response"));
    }
    trimmed
        .parse::<f64>()
        .with_context(|| format!("Failed to parse response: '{}'", trimmed))
}

#[async_trait]
impl<T: ScpiTransport> VoltageSource for E3645A<T> {
    async fn set_voltage(&self, volts: f64) -> Result<()> {
        if !(0.0..=MAX_VOLTAGE).contains(&volts) {
            return Err(anyhow!(
                "E3645A voltage must be within 0..={} V, got {}",
                MAX_VOLTAGE,
                volts
            ));
        }
        self.transport.command(&format!("VOLT {}", volts)).await
    }

    async fn read_voltage(&self) -> Result<f64> {
        self.query_f64("MEAS:VOLT?").await
    }

    async fn read_current(&self) -> Result<f64> {
        self.query_f64("MEAS:CURR?").await
    }

    async fn set_current_limit(&self, amps: f64) -> Result<()> {
        if amps < 0.0 {
            return Err(anyhow!("E3645A current limit must be positive, got {}", amps));
        }
        self.transport.command(&format!("CURR {}", amps)).await
    }

    async fn enable_output(&self, enabled: bool) -> Result<()> {
        let cmd = if enabled { "OUTP ON" } else { "OUTP OFF" };
        self.transport.command(cmd).await
    }

    async fn reset(&self) -> Result<()> {
        self.transport.command("*RST").await
    }

    async fn identify(&self) -> Result<String> {
        self.transport.query("*IDN?").await
    }
}
