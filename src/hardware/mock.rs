//! Simulated Hardware Implementations
//!
//! Provides simulated devices for testing and dry runs without the magnet rig.
//! All simulated devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Simulations
//!
//! - `SimulatedSupply` - DC supply with a resistive load, command log and failure injection
//! - `SimulatedCamera` - frame source with constant or noisy patterns, optional coupling
//!   to a `SimulatedSupply`, and stall injection

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;

use crate::hardware::capabilities::{ExposureControl, FrameSource, VoltageSource};
use crate::hardware::Frame;

// =============================================================================
// SimulatedSupply - Simulated DC Power Supply
// =============================================================================

/// A command received by [`SimulatedSupply`], in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SupplyCommand {
    /// `*RST`
    Reset,
    /// `CURR <amps>`
    CurrentLimit(f64),
    /// `VOLT <volts>`
    Voltage(f64),
    /// `OUTP ON|OFF`
    Output(bool),
}

#[derive(Debug)]
struct SupplyState {
    setpoint: f64,
    current_limit: f64,
    output_enabled: bool,
    commands: Vec<SupplyCommand>,
}

/// Simulated DC supply driving a resistive magnet coil
///
/// Simulates a unidirectional supply with:
/// - Measured voltage equal to the setpoint while output is on, 0 V otherwise
/// - Current from Ohm's law, clamped to the current limit
/// - A full command log for assertions
/// - Optional failure when commanded to a given voltage
///
/// # Example
///
/// ```rust,ignore
/// let supply = SimulatedSupply::new(50.0);
/// supply.enable_output(true).await?;
/// supply.set_voltage(10.0).await?;
/// assert_eq!(supply.read_current().await?, 0.2);
/// ```
pub struct SimulatedSupply {
    state: Mutex<SupplyState>,
    load_ohms: f64,
    fail_at_voltage: Option<f64>,
}

impl SimulatedSupply {
    /// Create a supply driving a load of `load_ohms`.
    pub fn new(load_ohms: f64) -> Self {
        Self {
            state: Mutex::new(SupplyState {
                setpoint: 0.0,
                current_limit: f64::INFINITY,
                output_enabled: false,
                commands: Vec::new(),
            }),
            load_ohms,
            fail_at_voltage: None,
        }
    }

    /// Fail with a communication error whenever `volts` is commanded.
    pub fn with_failure_at(mut self, volts: f64) -> Self {
        self.fail_at_voltage = Some(volts);
        self
    }

    /// All commands received so far.
    pub async fn commands(&self) -> Vec<SupplyCommand> {
        self.state.lock().await.commands.clone()
    }

    /// Number of times output was disabled.
    pub async fn output_disable_count(&self) -> usize {
        self.state
            .lock()
            .await
            .commands
            .iter()
            .filter(|cmd| **cmd == SupplyCommand::Output(false))
            .count()
    }

    /// Whether the output stage is currently on.
    pub async fn is_output_enabled(&self) -> bool {
        self.state.lock().await.output_enabled
    }

    /// Present voltage setpoint.
    pub async fn setpoint(&self) -> f64 {
        self.state.lock().await.setpoint
    }

    async fn output_volts(&self) -> f64 {
        let state = self.state.lock().await;
        if state.output_enabled {
            state.setpoint
        } else {
            0.0
        }
    }
}

impl Default for SimulatedSupply {
    fn default() -> Self {
        // 35 V at 0.7 A on the real coil
        Self::new(50.0)
    }
}

#[async_trait]
impl VoltageSource for SimulatedSupply {
    async fn set_voltage(&self, volts: f64) -> Result<()> {
        if self.fail_at_voltage == Some(volts) {
            return Err(anyhow!("SimulatedSupply: no response to VOLT {}", volts));
        }
        if volts < 0.0 {
            return Err(anyhow!("SimulatedSupply: negative voltage {} rejected", volts));
        }
        let mut state = self.state.lock().await;
        state.setpoint = volts;
        state.commands.push(SupplyCommand::Voltage(volts));
        Ok(())
    }

    async fn read_voltage(&self) -> Result<f64> {
        Ok(self.output_volts().await)
    }

    async fn read_current(&self) -> Result<f64> {
        let volts = self.output_volts().await;
        let limit = self.state.lock().await.current_limit;
        Ok((volts / self.load_ohms).min(limit))
    }

    async fn set_current_limit(&self, amps: f64) -> Result<()> {
        if amps < 0.0 {
            return Err(anyhow!("SimulatedSupply: negative current limit {}", amps));
        }
        let mut state = self.state.lock().await;
        state.current_limit = amps;
        state.commands.push(SupplyCommand::CurrentLimit(amps));
        Ok(())
    }

    async fn enable_output(&self, enabled: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        state.output_enabled = enabled;
        state.commands.push(SupplyCommand::Output(enabled));
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.setpoint = 0.0;
        state.current_limit = f64::INFINITY;
        state.output_enabled = false;
        state.commands.push(SupplyCommand::Reset);
        Ok(())
    }

    async fn identify(&self) -> Result<String> {
        Ok("Simulated,E3645A,0,0.0".to_string())
    }
}

// =============================================================================
// SimulatedCamera - Simulated Frame Source
// =============================================================================

/// Pixel content generated by [`SimulatedCamera`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FramePattern {
    /// Every pixel has the same value
    Constant(u16),
    /// Uniform noise of +/- `noise` counts around `level`
    Noisy { level: u16, noise: u16 },
}

/// Mock camera producing synthetic frames on demand
///
/// Simulates a camera in continuous mode with:
/// - Configurable sensor size (the camera ROI)
/// - Constant or noisy patterns from a seeded RNG
/// - Optional intensity coupling to a `SimulatedSupply` voltage
/// - Optional stall after N frames (poll returns nothing until the timeout)
pub struct SimulatedCamera {
    width: u32,
    height: u32,
    pattern: FramePattern,
    frame_count: AtomicU64,
    exposure_ms: RwLock<f64>,
    rng: StdMutex<StdRng>,
    stall_after: Option<u64>,
    coupling: Option<(Arc<SimulatedSupply>, f64)>,
}

impl SimulatedCamera {
    /// Create a camera with the given sensor size and pattern.
    pub fn new(width: u32, height: u32, pattern: FramePattern) -> Self {
        Self {
            width,
            height,
            pattern,
            frame_count: AtomicU64::new(0),
            exposure_ms: RwLock::new(2.0),
            rng: StdMutex::new(StdRng::seed_from_u64(0x5eed)),
            stall_after: None,
            coupling: None,
        }
    }

    /// Constant-valued frames.
    pub fn constant(width: u32, height: u32, value: u16) -> Self {
        Self::new(width, height, FramePattern::Constant(value))
    }

    /// Stop delivering frames after `frames` have been produced.
    pub fn stall_after(mut self, frames: u64) -> Self {
        self.stall_after = Some(frames);
        self
    }

    /// Add `counts_per_volt * |measured voltage|` to every pixel.
    pub fn coupled_to(mut self, supply: Arc<SimulatedSupply>, counts_per_volt: f64) -> Self {
        self.coupling = Some((supply, counts_per_volt));
        self
    }

    /// Total number of frames delivered.
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::SeqCst)
    }

    fn render(&self, offset: f64) -> Result<Vec<u16>> {
        let len = self.width as usize * self.height as usize;
        let shift = |value: u16| (f64::from(value) + offset).clamp(0.0, f64::from(u16::MAX)) as u16;
        match self.pattern {
            FramePattern::Constant(value) => Ok(vec![shift(value); len]),
            FramePattern::Noisy { level, noise } => {
                let mut rng = self
                    .rng
                    .lock()
                    .map_err(|_| anyhow!("SimulatedCamera: noise generator poisoned"))?;
                let noise = i32::from(noise);
                Ok((0..len)
                    .map(|_| {
                        let sample = i32::from(level) + rng.gen_range(-noise..=noise);
                        shift(sample.clamp(0, i32::from(u16::MAX)) as u16)
                    })
                    .collect())
            }
        }
    }
}

#[async_trait]
impl FrameSource for SimulatedCamera {
    async fn next_frame(&self, timeout: Duration) -> Result<Option<Frame>> {
        let delivered = self.frame_count.load(Ordering::SeqCst);
        if let Some(limit) = self.stall_after {
            if delivered >= limit {
                tracing::debug!(delivered, "SimulatedCamera: stalled, no frame pending");
                sleep(timeout).await;
                return Ok(None);
            }
        }

        let offset = match &self.coupling {
            Some((supply, gain)) => supply.read_voltage().await?.abs() * gain,
            None => 0.0,
        };
        let pixels = self.render(offset)?;
        let frame_number = self.frame_count.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(Frame::from_u16(
            self.width,
            self.height,
            frame_number,
            pixels,
        )))
    }

    fn sensor_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[async_trait]
impl ExposureControl for SimulatedCamera {
    async fn set_exposure_ms(&self, ms: f64) -> Result<()> {
        if ms <= 0.0 {
            return Err(anyhow!("SimulatedCamera: Exposure must be positive"));
        }
        *self.exposure_ms.write().await = ms;
        Ok(())
    }

    async fn exposure_ms(&self) -> Result<f64> {
        Ok(*self.exposure_ms.read().await)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn supply_measures_zero_with_output_off() {
        let supply = SimulatedSupply::new(50.0);
        supply.set_voltage(10.0).await.unwrap();
        assert_eq!(supply.read_voltage().await.unwrap(), 0.0);

        supply.enable_output(true).await.unwrap();
        assert_eq!(supply.read_voltage().await.unwrap(), 10.0);
        assert!((supply.read_current().await.unwrap() - 0.2).abs() < 1e-12);
    }

    #[tokio::test]
    async fn supply_clamps_current_to_limit() {
        let supply = SimulatedSupply::new(10.0);
        supply.set_current_limit(0.7).await.unwrap();
        supply.enable_output(true).await.unwrap();
        supply.set_voltage(35.0).await.unwrap();
        assert_eq!(supply.read_current().await.unwrap(), 0.7);
    }

    #[tokio::test]
    async fn supply_logs_commands_and_injects_failure() {
        let supply = SimulatedSupply::new(50.0).with_failure_at(5.0);
        supply.reset().await.unwrap();
        supply.set_voltage(1.0).await.unwrap();
        assert!(supply.set_voltage(5.0).await.is_err());
        supply.enable_output(false).await.unwrap();

        assert_eq!(
            supply.commands().await,
            vec![
                SupplyCommand::Reset,
                SupplyCommand::Voltage(1.0),
                SupplyCommand::Output(false),
            ]
        );
        assert_eq!(supply.output_disable_count().await, 1);
    }

    #[tokio::test]
    async fn camera_frames_are_numbered() {
        let camera = SimulatedCamera::constant(8, 4, 42);
        let first = camera.next_frame(Duration::from_millis(10)).await.unwrap().unwrap();
        let second = camera.next_frame(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(first.frame_number, 1);
        assert_eq!(second.frame_number, 2);
        assert_eq!(first.pixels.len(), 32);
        assert!(first.pixels.iter().all(|&p| p == 42));
        assert_eq!(camera.frame_count(), 2);
    }

    #[tokio::test]
    async fn camera_noise_stays_in_band() {
        let camera = SimulatedCamera::new(16, 16, FramePattern::Noisy { level: 500, noise: 20 });
        let frame = camera.next_frame(Duration::from_millis(10)).await.unwrap().unwrap();
        assert!(frame.pixels.iter().all(|&p| (480..=520).contains(&p)));
        assert!(frame.pixels.iter().any(|&p| p != 500));
    }

    #[tokio::test]
    async fn camera_stall_returns_none() {
        let camera = SimulatedCamera::constant(2, 2, 1).stall_after(1);
        assert!(camera.next_frame(Duration::from_millis(5)).await.unwrap().is_some());
        assert!(camera.next_frame(Duration::from_millis(5)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn camera_follows_coupled_supply() {
        let supply = Arc::new(SimulatedSupply::new(50.0));
        let camera = SimulatedCamera::constant(2, 2, 100).coupled_to(Arc::clone(&supply), 10.0);

        supply.enable_output(true).await.unwrap();
        supply.set_voltage(3.0).await.unwrap();
        let frame = camera.next_frame(Duration::from_millis(5)).await.unwrap().unwrap();
        assert!(frame.pixels.iter().all(|&p| p == 130));
    }

    #[tokio::test]
    async fn camera_rejects_non_positive_exposure() {
        let camera = SimulatedCamera::constant(2, 2, 1);
        camera.set_exposure_ms(5.0).await.unwrap();
        assert_eq!(camera.exposure_ms().await.unwrap(), 5.0);
        assert!(camera.set_exposure_ms(0.0).await.is_err());
    }
}
