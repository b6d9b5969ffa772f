//! Atomic Hardware Capabilities
//!
//! Fine-grained capability traits the sweep controller is written against. Instead of
//! a monolithic `Instrument` trait, devices implement the capabilities they actually
//! support:
//!
//! - A DC power supply implements: `VoltageSource`
//! - A camera implements: `FrameSource + ExposureControl`
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! # Example
//!
//! ```rust,ignore
//! async fn step_and_read<S>(supply: &S, volts: f64) -> Result<(f64, f64)>
//! where
//!     S: VoltageSource,
//! {
//!     supply.set_voltage(volts).await?;
//!     Ok((supply.read_voltage().await?, supply.read_current().await?))
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::hardware::Frame;

/// Capability: Programmable DC Voltage Source
///
/// Unidirectional bench supplies driving the electromagnet.
///
/// # Contract
/// - Voltages are in volts, currents in amps
/// - `set_voltage` commands the setpoint; `read_voltage`/`read_current` return the
///   *measured* output, which may differ slightly because of regulation
/// - `set_current_limit` should be applied before enabling output
/// - All calls block until the instrument acknowledges or its timeout expires
///
/// # Thread Safety
/// - All methods take `&self`; drivers use interior mutability for their transport
#[async_trait]
pub trait VoltageSource: Send + Sync {
    /// Command the output voltage setpoint
    async fn set_voltage(&self, volts: f64) -> Result<()>;

    /// Measure the actual output voltage
    async fn read_voltage(&self) -> Result<f64>;

    /// Measure the actual output current
    async fn read_current(&self) -> Result<f64>;

    /// Set the current compliance limit
    async fn set_current_limit(&self, amps: f64) -> Result<()>;

    /// Enable or disable the output stage
    async fn enable_output(&self, enabled: bool) -> Result<()>;

    /// Return the instrument to its power-on state
    async fn reset(&self) -> Result<()>;

    /// Instrument identification string
    ///
    /// # Default Implementation
    /// Returns an error indicating identification is not supported.
    async fn identify(&self) -> Result<String> {
        anyhow::bail!("Identification not supported by this device")
    }
}

/// Capability: Frame/Image Source
///
/// Devices that deliver 2D frames on demand (cameras in continuous mode).
///
/// # Contract
/// - `next_frame` waits at most `timeout` for the next pending frame
/// - `Ok(None)` means no frame arrived in time; it is not an error by itself
/// - Frame numbers increase monotonically
/// - `sensor_size()` is the (width, height) of every frame the source delivers
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Wait for the next pending frame
    async fn next_frame(&self, timeout: Duration) -> Result<Option<Frame>>;

    /// Size of delivered frames in pixels as (width, height)
    fn sensor_size(&self) -> (u32, u32);
}

/// Capability: Exposure Time Control
///
/// # Contract
/// - Exposure is in milliseconds
/// - Setting exposure applies to the next frame
#[async_trait]
pub trait ExposureControl: Send + Sync {
    /// Set exposure/integration time
    async fn set_exposure_ms(&self, ms: f64) -> Result<()>;

    /// Get current exposure setting
    async fn exposure_ms(&self) -> Result<f64>;
}
