//! Averaged images and the metrics derived from them.

use ndarray::Array2;

use crate::error::{AppResult, SweepError};

/// Mean of several frames, narrowed to 16 bits, with its scalar metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct AveragedImage {
    pixels: Array2<u16>,
    mean: f64,
    total: u64,
    snr_db: f64,
}

impl AveragedImage {
    /// Compute metrics for an already averaged image.
    pub fn from_pixels(pixels: Array2<u16>) -> Self {
        let (mean, std_dev) = mean_and_std(&pixels);
        let total = pixels.iter().map(|&v| u64::from(v)).sum();
        let snr_db = snr_from_moments(mean, std_dev).unwrap_or(f64::NAN);
        Self {
            pixels,
            mean,
            total,
            snr_db,
        }
    }

    /// Pixel data, shape `(height, width)`.
    pub fn pixels(&self) -> &Array2<u16> {
        &self.pixels
    }

    /// `(height, width)`
    pub fn shape(&self) -> (usize, usize) {
        self.pixels.dim()
    }

    /// Population mean of pixel values.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sum of pixel values.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// SNR in decibels; `NaN` when undefined (see [`snr_db`]).
    pub fn snr_db(&self) -> f64 {
        self.snr_db
    }

    /// Brightest pixel.
    pub fn max(&self) -> u16 {
        self.pixels.iter().copied().max().unwrap_or(0)
    }
}

/// Signal-to-noise ratio `10 * log10(mean / stddev)` in decibels.
///
/// Uses the population mean and population standard deviation of the pixel values.
/// Returns `f64::NAN` when the ratio is undefined: zero standard deviation (flat
/// image) or a non-positive mean.
pub fn snr_db(image: &Array2<u16>) -> f64 {
    try_snr_db(image).unwrap_or(f64::NAN)
}

/// Checked form of [`snr_db`] failing with [`SweepError::DegenerateImage`].
pub fn try_snr_db(image: &Array2<u16>) -> AppResult<f64> {
    let (mean, std_dev) = mean_and_std(image);
    snr_from_moments(mean, std_dev)
}

fn snr_from_moments(mean: f64, std_dev: f64) -> AppResult<f64> {
    if std_dev == 0.0 || mean <= 0.0 || !mean.is_finite() || !std_dev.is_finite() {
        return Err(SweepError::DegenerateImage { mean, std_dev });
    }
    Ok(10.0 * (mean / std_dev).log10())
}

fn mean_and_std(image: &Array2<u16>) -> (f64, f64) {
    if image.is_empty() {
        return (0.0, 0.0);
    }
    let values = image.mapv(f64::from);
    let mean = values.mean().unwrap_or(0.0);
    (mean, values.std(0.0))
}
