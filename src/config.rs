//! Configuration System using Figment
//!
//! Strongly-typed configuration for the magnet rig. Configuration is layered from:
//! 1. built-in defaults (the rig's standard constants)
//! 2. a TOML file (`config/magsweep.toml` by default)
//! 3. environment variables prefixed with `MAGSWEEP_`, nested keys separated by `__`
//!
//! # Example
//! ```no_run
//! use magsweep::config::MagsweepConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // MAGSWEEP_SWEEP__FRAMES_TO_AVERAGE=30 overrides [sweep] frames_to_average
//! let config = MagsweepConfig::load()?;
//! println!("Averaging {} frames", config.sweep.frames_to_average);
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::acquisition::ImagingPreset;
use crate::error::{AppResult, SweepError};
use crate::hardware::e3645a::MAX_VOLTAGE;
use crate::sweep::MAX_RAMP_SETPOINTS;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/magsweep.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MagsweepConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// DC power supply connection and limits
    pub power_supply: PowerSupplyConfig,
    /// Camera acquisition settings
    pub camera: CameraConfig,
    /// Hysteresis sweep parameters
    pub sweep: SweepConfig,
    /// Volts-to-gauss calibration parameters
    pub calibration: CalibrationConfig,
    /// Output directories
    pub storage: StorageConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored
    Pretty,
    /// Single-line
    Compact,
    /// Newline-delimited JSON
    Json,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "magsweep".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// How the power supply is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupplyTransport {
    /// In-memory simulated supply
    Simulated,
    /// RS-232 (feature `instrument_serial`)
    Serial,
    /// VISA resource such as GPIB (feature `instrument_visa`)
    Visa,
}

/// DC power supply configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerSupplyConfig {
    /// Link used to reach the supply
    pub transport: SupplyTransport,
    /// VISA resource string or serial port path
    pub resource: String,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Per-command response timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Current compliance applied before output is enabled
    pub current_limit_amps: f64,
    /// Coil resistance of the simulated supply
    pub simulated_load_ohms: f64,
}

impl Default for PowerSupplyConfig {
    fn default() -> Self {
        Self {
            transport: SupplyTransport::Simulated,
            resource: "GPIB0::5::INSTR".to_string(),
            baud_rate: 9600,
            timeout: Duration::from_secs(2),
            current_limit_amps: 0.7,
            simulated_load_ohms: 50.0,
        }
    }
}

/// Camera configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Exposure time in milliseconds
    pub exposure_ms: f64,
    /// Maximum wait for each frame
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,
    /// Framing preset (grid, single, data)
    pub preset: ImagingPreset,
    /// Baseline pixel value of the simulated camera
    pub simulated_level: u16,
    /// Uniform noise amplitude of the simulated camera
    pub simulated_noise: u16,
    /// Counts added per volt of simulated supply output
    pub simulated_counts_per_volt: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            exposure_ms: 2.0,
            poll_timeout: Duration::from_secs(1),
            preset: ImagingPreset::Data,
            simulated_level: 1000,
            simulated_noise: 0,
            simulated_counts_per_volt: 20.0,
        }
    }
}

/// Sweep configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Forward ramps stop strictly below this voltage
    pub max_voltage: f64,
    /// Voltage increment between setpoints
    pub step: f64,
    /// Frames averaged per setpoint
    pub frames_to_average: usize,
    /// Settling delay after each voltage step
    #[serde(with = "humantime_serde")]
    pub dwell: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            max_voltage: 15.0,
            step: 0.25,
            frames_to_average: 15,
            dwell: Duration::from_millis(300),
        }
    }
}

/// Calibration configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Highest integer voltage visited
    pub max_volts: u32,
    /// Field per amp reported by the simulated probe
    pub simulated_gauss_per_amp: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            max_volts: 35,
            simulated_gauss_per_amp: 450.0,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for dataset CSVs and plots
    pub data_dir: PathBuf,
    /// Root for raw averaged images
    pub image_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            image_dir: PathBuf::from("images"),
        }
    }
}

impl MagsweepConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(MagsweepConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("MAGSWEEP_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(SweepError::Configuration(msg));

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if !(self.power_supply.current_limit_amps >= 0.0) {
            return invalid(format!(
                "Invalid current_limit_amps {}. Must be >= 0",
                self.power_supply.current_limit_amps
            ));
        }
        if self.power_supply.timeout.is_zero() {
            return invalid("power_supply.timeout must be non-zero".to_string());
        }

        if !(self.camera.exposure_ms > 0.0) {
            return invalid(format!(
                "Invalid exposure_ms {}. Must be > 0",
                self.camera.exposure_ms
            ));
        }
        if self.camera.poll_timeout.is_zero() {
            return invalid("camera.poll_timeout must be non-zero".to_string());
        }

        if !(self.sweep.step > 0.0) {
            return invalid(format!("Invalid sweep step {}. Must be > 0", self.sweep.step));
        }
        if !(self.sweep.max_voltage > 0.0 && self.sweep.max_voltage <= MAX_VOLTAGE) {
            return invalid(format!(
                "Invalid max_voltage {}. Must be within (0, {}]",
                self.sweep.max_voltage, MAX_VOLTAGE
            ));
        }
        let ramp_setpoints = (self.sweep.max_voltage / self.sweep.step).ceil();
        if ramp_setpoints > MAX_RAMP_SETPOINTS as f64 {
            return invalid(format!(
                "Sweep step {} gives {} setpoints per ramp up to {} V. At most {} allowed",
                self.sweep.step, ramp_setpoints, self.sweep.max_voltage, MAX_RAMP_SETPOINTS
            ));
        }
        if self.sweep.frames_to_average == 0 {
            return invalid("sweep.frames_to_average must be at least 1".to_string());
        }

        if f64::from(self.calibration.max_volts) > MAX_VOLTAGE {
            return invalid(format!(
                "Invalid calibration max_volts {}. Must be <= {}",
                self.calibration.max_volts, MAX_VOLTAGE
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_rig_constants() {
        let config = MagsweepConfig::default();
        assert_eq!(config.sweep.frames_to_average, 15);
        assert_eq!(config.sweep.dwell, Duration::from_millis(300));
        assert_eq!(config.sweep.step, 0.25);
        assert_eq!(config.camera.poll_timeout, Duration::from_secs(1));
        assert_eq!(config.camera.preset, ImagingPreset::Data);
        assert_eq!(config.power_supply.current_limit_amps, 0.7);
        assert_eq!(config.power_supply.resource, "GPIB0::5::INSTR");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_and_env_layers() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "magsweep.toml",
                r#"
                [application]
                log_level = "debug"
                log_format = "json"

                [sweep]
                max_voltage = 35.0
                step = 0.5
                dwell = "1s"

                [camera]
                preset = "grid"
                "#,
            )?;
            jail.set_env("MAGSWEEP_SWEEP__FRAMES_TO_AVERAGE", "30");

            let config = MagsweepConfig::load_from("magsweep.toml").unwrap();
            assert_eq!(config.application.log_format, LogFormat::Json);
            assert_eq!(config.sweep.max_voltage, 35.0);
            assert_eq!(config.sweep.dwell, Duration::from_secs(1));
            assert_eq!(config.sweep.frames_to_average, 30);
            assert_eq!(config.camera.preset, ImagingPreset::Grid);
            // untouched sections keep their defaults
            assert_eq!(config.power_supply, PowerSupplyConfig::default());
            Ok(())
        });
    }

    #[test]
    fn missing_file_uses_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = MagsweepConfig::load_from("does-not-exist.toml").unwrap();
            assert_eq!(config, MagsweepConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values() {
        let mut config = MagsweepConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = MagsweepConfig::default();
        config.sweep.frames_to_average = 0;
        assert!(config.validate().is_err());

        let mut config = MagsweepConfig::default();
        config.sweep.step = 0.0;
        assert!(config.validate().is_err());

        let mut config = MagsweepConfig::default();
        config.sweep.max_voltage = 40.0;
        assert!(config.validate().is_err());

        // A mistyped step would otherwise plan billions of setpoints
        let mut config = MagsweepConfig::default();
        config.sweep.step = 1e-9;
        match config.validate() {
            Err(SweepError::Configuration(msg)) => assert!(msg.contains("setpoints per ramp")),
            other => panic!("unexpected result: {:?}", other),
        }

        let mut config = MagsweepConfig::default();
        config.sweep.max_voltage = 35.0;
        config.sweep.step = 0.005;
        assert!(config.validate().is_ok());

        let mut config = MagsweepConfig::default();
        config.power_supply.current_limit_amps = -0.1;
        assert!(config.validate().is_err());

        let mut config = MagsweepConfig::default();
        config.camera.poll_timeout = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(SweepError::Configuration(_))
        ));
    }
}
