//! Volts-to-gauss calibration of the electromagnet.
//!
//! Steps the supply through whole volts `0..=max_volts` and records the field
//! reported by a [`FieldProbe`] next to the measured voltage and current. The
//! gaussmeter is not connected to the PC, so the console probe asks the operator
//! to type each reading.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};

use crate::console::ConsolePrompt;
use crate::error::{AppResult, InstrumentContext, SweepError};
use crate::hardware::VoltageSource;
use crate::safety::{with_safe_shutdown, StopFlag};

/// File written under `<data_dir>/calibration/`.
pub const CALIBRATION_FILE_NAME: &str = "Volts_to_Gauss_Calibration.csv";

/// Source of magnetic flux density readings.
#[async_trait]
pub trait FieldProbe: Send + Sync {
    /// Field in gauss with the supply at the given measured operating point.
    async fn read_gauss(&self, voltage: f64, current: f64) -> AppResult<f64>;
}

/// Operator types the gaussmeter reading at the console.
#[derive(Default)]
pub struct ConsoleGaussmeter {
    console: ConsolePrompt,
}

impl ConsoleGaussmeter {
    /// Read from the process console.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FieldProbe for ConsoleGaussmeter {
    async fn read_gauss(&self, voltage: f64, current: f64) -> AppResult<f64> {
        println!("V = {} V, I = {} A", voltage, current);
        loop {
            let line = self
                .console
                .ask("Enter the magnetic field reading (Gauss):")
                .await?;
            match line.trim().parse::<f64>() {
                Ok(gauss) if gauss.is_finite() => return Ok(gauss),
                _ => warn!(input = %line.trim(), "Not a number, try again"),
            }
        }
    }
}

/// Field proportional to coil current, for dry runs.
#[derive(Debug, Clone, Copy)]
pub struct LinearProbe {
    gauss_per_amp: f64,
}

impl LinearProbe {
    /// Probe reporting `gauss_per_amp * current`.
    pub fn new(gauss_per_amp: f64) -> Self {
        Self { gauss_per_amp }
    }
}

#[async_trait]
impl FieldProbe for LinearProbe {
    async fn read_gauss(&self, _voltage: f64, current: f64) -> AppResult<f64> {
        Ok(self.gauss_per_amp * current)
    }
}

/// One row of the calibration table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationPoint {
    /// Field reading
    #[serde(rename = "Magnetic Flux Density (G)")]
    pub flux_gauss: f64,
    /// Measured output voltage
    #[serde(rename = "Voltage (V)")]
    pub voltage: f64,
    /// Measured output current
    #[serde(rename = "Current (A)")]
    pub current: f64,
}

/// Points gathered by a calibration run, possibly partial.
#[derive(Debug)]
pub struct CalibrationOutcome {
    /// Rows recorded before the run ended
    pub points: Vec<CalibrationPoint>,
    /// Why the run stopped early, if it did
    pub failure: Option<SweepError>,
}

/// Calibration run over borrowed instruments.
pub struct Calibration<'a> {
    supply: &'a dyn VoltageSource,
    probe: &'a dyn FieldProbe,
    stop: StopFlag,
    max_volts: u32,
    current_limit_amps: f64,
}

impl<'a> Calibration<'a> {
    /// Visit `0..=max_volts` with the given current compliance.
    pub fn new(
        supply: &'a dyn VoltageSource,
        probe: &'a dyn FieldProbe,
        max_volts: u32,
        current_limit_amps: f64,
    ) -> Self {
        Self {
            supply,
            probe,
            stop: StopFlag::new(),
            max_volts,
            current_limit_amps,
        }
    }

    /// Share an externally owned stop flag.
    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    /// Run the calibration; the supply ends at zero volts with output off.
    #[instrument(skip_all, fields(max_volts = self.max_volts))]
    pub async fn run(&self) -> CalibrationOutcome {
        let mut points = Vec::new();
        let result = with_safe_shutdown(self.supply, &self.stop, self.execute(&mut points)).await;

        match &result {
            Ok(()) => info!(points = points.len(), "Calibration finished"),
            Err(e) => error!(points = points.len(), error = %e, "Calibration ended early"),
        }
        CalibrationOutcome {
            points,
            failure: result.err(),
        }
    }

    async fn execute(&self, points: &mut Vec<CalibrationPoint>) -> AppResult<()> {
        self.supply.reset().await.during("reset")?;
        self.supply
            .set_current_limit(self.current_limit_amps)
            .await
            .during("set_current_limit")?;
        self.supply.enable_output(true).await.during("enable_output")?;

        for volts in 0..=self.max_volts {
            let setpoint = f64::from(volts);
            if self.stop.is_stop_requested() {
                return Err(SweepError::Cancelled { setpoint });
            }
            self.supply
                .set_voltage(setpoint)
                .await
                .during("set_voltage")?;
            let voltage = self.supply.read_voltage().await.during("read_voltage")?;
            let current = self.supply.read_current().await.during("read_current")?;
            info!(setpoint, voltage, current, "Supply settled");

            let flux_gauss = self.probe.read_gauss(voltage, current).await?;
            points.push(CalibrationPoint {
                flux_gauss,
                voltage,
                current,
            });
        }
        Ok(())
    }
}

/// `<data_dir>/calibration/Volts_to_Gauss_Calibration.csv`
pub fn calibration_path(data_dir: &Path) -> PathBuf {
    data_dir.join("calibration").join(CALIBRATION_FILE_NAME)
}

/// Write the calibration table, creating parent directories.
pub fn write_calibration(path: &Path, points: &[CalibrationPoint]) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    if points.is_empty() {
        writer.write_record(["Magnetic Flux Density (G)", "Voltage (V)", "Current (A)"])?;
    }
    for point in points {
        writer.serialize(point)?;
    }
    writer.flush()?;
    info!(path = %path.display(), rows = points.len(), "Calibration saved");
    Ok(())
}
