//! Pixel rectangles and imaging presets.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppResult, SweepError};

/// Integer pixel rectangle `{x, y, width, height}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRoi")]
pub struct Roi {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

#[derive(Deserialize)]
struct RawRoi {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

impl TryFrom<RawRoi> for Roi {
    type Error = SweepError;

    fn try_from(raw: RawRoi) -> AppResult<Self> {
        Roi::new(raw.x, raw.y, raw.width, raw.height)
    }
}

impl Roi {
    /// Create a rectangle; width and height must be non-zero.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> AppResult<Self> {
        if width == 0 || height == 0 {
            return Err(SweepError::InvalidRoi(format!(
                "{}x{} has an empty side",
                width, height
            )));
        }
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }

    /// Rectangle covering a whole sensor.
    pub fn full(width: u32, height: u32) -> AppResult<Self> {
        Self::new(0, 0, width, height)
    }

    /// Left edge
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Top edge
    pub fn y(&self) -> u32 {
        self.y
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(height, width)`, the shape of an image cropped to this rectangle.
    pub fn shape(&self) -> (usize, usize) {
        (self.height as usize, self.width as usize)
    }

    /// Whether the rectangle lies inside a `sensor_width x sensor_height` sensor.
    pub fn fits_within(&self, sensor_width: u32, sensor_height: u32) -> bool {
        u64::from(self.x) + u64::from(self.width) <= u64::from(sensor_width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(sensor_height)
    }

    /// Fail with [`SweepError::InvalidRoi`] unless the rectangle fits the sensor.
    pub fn ensure_within(&self, sensor: (u32, u32)) -> AppResult<()> {
        if self.fits_within(sensor.0, sensor.1) {
            Ok(())
        } else {
            Err(SweepError::InvalidRoi(format!(
                "{} exceeds sensor {}x{}",
                self, sensor.0, sensor.1
            )))
        }
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.x, self.y, self.width, self.height
        )
    }
}

/// Named camera framings used on the magnet rig.
///
/// The horizontal spacing between patterns on the sample is about 200 pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImagingPreset {
    /// 3x3 grid of patterns, no cropping
    Grid = 0,
    /// One pattern (top left of the grid), no cropping
    Single = 1,
    /// One pattern, cropped to pure signal inside it
    Data = 2,
}

/// Camera readout window plus the crop applied to every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    /// Readout window on the full sensor
    pub camera_roi: Roi,
    /// Crop inside the readout window
    pub crop_roi: Roi,
}

// Indexed by `ImagingPreset as usize`; (x, y, width, height) of the camera window,
// then of the crop inside it.
const PRESET_TABLE: [([u32; 4], [u32; 4]); 3] = [
    ([800, 1400, 1800, 1100], [0, 0, 1800, 1100]),
    ([1600, 2100, 300, 300], [0, 0, 300, 300]),
    ([1600, 2100, 300, 300], [95, 75, 60, 85]),
];

impl ImagingPreset {
    /// Look up the framing for this preset.
    pub fn framing(self) -> Framing {
        let (cam, crop) = PRESET_TABLE[self as usize];
        Framing {
            camera_roi: Roi {
                x: cam[0],
                y: cam[1],
                width: cam[2],
                height: cam[3],
            },
            crop_roi: Roi {
                x: crop[0],
                y: crop[1],
                width: crop[2],
                height: crop[3],
            },
        }
    }
}

impl fmt::Display for ImagingPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImagingPreset::Grid => write!(f, "grid"),
            ImagingPreset::Single => write!(f, "single"),
            ImagingPreset::Data => write!(f, "data"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_sides() {
        assert!(Roi::new(0, 0, 0, 10).is_err());
        assert!(Roi::new(0, 0, 10, 0).is_err());
        assert!(Roi::new(5, 5, 1, 1).is_ok());
    }

    #[test]
    fn bounds_check_is_inclusive_of_edge() {
        let roi = Roi::new(95, 75, 60, 85).unwrap();
        assert!(roi.fits_within(300, 300));
        assert!(roi.fits_within(155, 160));
        assert!(!roi.fits_within(154, 160));
        assert!(roi.ensure_within((100, 100)).is_err());
    }

    #[test]
    fn bounds_check_does_not_overflow() {
        let roi = Roi::new(u32::MAX, 0, 10, 10).unwrap();
        assert!(!roi.fits_within(u32::MAX, 10));
    }

    #[test]
    fn every_crop_fits_its_camera_window() {
        for preset in [ImagingPreset::Grid, ImagingPreset::Single, ImagingPreset::Data] {
            let framing = preset.framing();
            assert!(
                framing
                    .crop_roi
                    .fits_within(framing.camera_roi.width(), framing.camera_roi.height()),
                "{preset} crop outside camera window"
            );
        }
    }

    #[test]
    fn data_preset_matches_rig_constants() {
        let framing = ImagingPreset::Data.framing();
        assert_eq!(framing.camera_roi, Roi::new(1600, 2100, 300, 300).unwrap());
        assert_eq!(framing.crop_roi, Roi::new(95, 75, 60, 85).unwrap());
        assert_eq!(framing.crop_roi.shape(), (85, 60));
    }

    #[test]
    fn deserialization_validates() {
        use figment::providers::{Format, Toml};

        #[derive(Deserialize)]
        struct Wrapper {
            roi: Roi,
        }

        let empty = figment::Figment::from(Toml::string("roi = { x = 1, y = 2, width = 3, height = 0 }"));
        assert!(empty.extract::<Wrapper>().is_err());

        let valid = figment::Figment::from(Toml::string("roi = { x = 1, y = 2, width = 3, height = 4 }"));
        assert_eq!(
            valid.extract::<Wrapper>().unwrap().roi,
            Roi::new(1, 2, 3, 4).unwrap()
        );
    }
}
