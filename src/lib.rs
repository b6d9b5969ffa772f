//! # magsweep
//!
//! Field-sweep controller for a camera-observed electromagnet. A DC supply drives
//! the magnet through a sequence of voltages; at each setpoint the camera output is
//! averaged over a region of interest and reduced to intensity and SNR figures.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: Regions of interest, imaging presets and the `FrameAverager`.
//! - **`sweep`**: The `SweepSequencer` (one ramp of setpoints), the `SweepSession`
//!   (hysteresis loop with operator lead swaps) and the dataset they build.
//! - **`calibration`**: Volts-to-gauss calibration with a pluggable field probe.
//! - **`hardware`**: Capability traits, the E3645A driver, SCPI transports and
//!   simulated devices.
//! - **`safety`**: Stop flag, panic guard and guaranteed zero-volt shutdown.
//! - **`storage`**: Dataset CSV, raw `.npy` images and the optional plot.
//! - **`config`**: Figment-layered configuration (`config/magsweep.toml` + env).
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: The `SweepError` enum shared by every module.

pub mod acquisition;
pub mod calibration;
pub mod config;
pub mod console;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod safety;
pub mod storage;
pub mod sweep;

pub use error::{AppResult, SweepError};
