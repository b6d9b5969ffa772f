//! Hardware capabilities, drivers and simulated devices.
//!
//! The sweep core only talks to the traits in [`capabilities`]. Concrete devices:
//!
//! - [`e3645a::E3645A`] - Keysight E3645A DC supply over a [`scpi::ScpiTransport`]
//! - [`mock::SimulatedSupply`] - in-memory supply with failure injection
//! - [`mock::SimulatedCamera`] - synthetic frame source with failure injection

pub mod capabilities;
pub mod e3645a;
pub mod mock;
pub mod scpi;

pub use capabilities::{ExposureControl, FrameSource, VoltageSource};

/// A single raw sensor frame.
///
/// Pixels are stored row-major as 16-bit samples; 12-bit sensors use the low bits.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Monotonic sequence number assigned by the source
    pub frame_number: u64,

    /// Raw pixel data, `width * height` samples
    pub pixels: Vec<u16>,
}

impl Frame {
    /// Create a new frame from 16-bit pixel data.
    pub fn from_u16(width: u32, height: u32, frame_number: u64, pixels: Vec<u16>) -> Self {
        Self {
            width,
            height,
            frame_number,
            pixels,
        }
    }

    /// Frame filled with a single value.
    pub fn filled(width: u32, height: u32, frame_number: u64, value: u16) -> Self {
        Self::from_u16(
            width,
            height,
            frame_number,
            vec![value; width as usize * height as usize],
        )
    }
}
