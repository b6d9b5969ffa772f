//! Observations and the dataset they accumulate into.
//!
//! A [`DatasetRecorder`] is created empty when a session starts, receives one
//! [`Observation`] per setpoint, and is consumed by [`DatasetRecorder::finish`] into
//! an immutable [`SweepDataset`]. There is no rollback: observations recorded before
//! a failure stay in the dataset, which is then marked incomplete.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::acquisition::{AveragedImage, Roi};

/// Sign convention for the field direction.
///
/// The supply is unidirectional; negative field comes from swapping the magnet leads
/// by hand, and the recorded voltage is tagged with the sign afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// Leads in normal orientation
    Positive,
    /// Leads swapped
    Negative,
}

impl Polarity {
    /// `+1.0` or `-1.0`
    pub fn sign(self) -> f64 {
        match self {
            Polarity::Positive => 1.0,
            Polarity::Negative => -1.0,
        }
    }

    /// Tag a measured voltage with this polarity.
    pub fn apply(self, volts: f64) -> f64 {
        self.sign() * volts
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Polarity::Positive => write!(f, "+"),
            Polarity::Negative => write!(f, "-"),
        }
    }
}

/// One row of a sweep: measured supply output and image metrics at a setpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Observation {
    /// Measured voltage with polarity applied
    #[serde(rename = "Voltage (V)")]
    pub voltage: f64,
    /// Measured current (unsigned)
    #[serde(rename = "Current (A)")]
    pub current: f64,
    /// Mean pixel value of the averaged image
    #[serde(rename = "Average Intensity")]
    pub mean_intensity: f64,
    /// Pixel sum of the averaged image
    #[serde(rename = "Total Intensity")]
    pub total_intensity: u64,
    /// SNR in decibels, `NaN` for degenerate images
    #[serde(rename = "SNR (dB)")]
    pub snr_db: f64,
}

impl Observation {
    /// Combine supply readback and image metrics.
    pub fn from_measurement(
        measured_voltage: f64,
        current: f64,
        polarity: Polarity,
        image: &AveragedImage,
    ) -> Self {
        Self {
            voltage: polarity.apply(measured_voltage),
            current,
            mean_intensity: image.mean(),
            total_intensity: image.total(),
            snr_db: image.snr_db(),
        }
    }
}

/// Fixed acquisition parameters of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionSettings {
    /// Camera exposure
    pub exposure_time_ms: f64,
    /// Camera readout window on the sensor
    pub camera_roi: Roi,
    /// Crop applied to every frame
    pub crop_roi: Roi,
    /// Frames per averaged image
    pub frames_averaged: usize,
}

/// Header written above the observations.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetMetadata {
    /// Acquisition parameters
    pub settings: AcquisitionSettings,
    /// Wall time from session start to finish
    pub elapsed: Duration,
    /// Unique identifier of the run
    pub run_id: Uuid,
    /// Local time the session started
    pub started_at: DateTime<Local>,
    /// Machine that ran the sweep
    pub hostname: String,
    /// Version of this software
    pub software_version: String,
    /// False if the session stopped early
    pub completed: bool,
}

/// Append-only collector owned by a running session.
#[derive(Debug)]
pub struct DatasetRecorder {
    settings: AcquisitionSettings,
    run_id: Uuid,
    started_at: DateTime<Local>,
    started: Instant,
    observations: Vec<Observation>,
}

impl DatasetRecorder {
    /// Start an empty dataset now.
    pub fn new(settings: AcquisitionSettings) -> Self {
        Self {
            settings,
            run_id: Uuid::new_v4(),
            started_at: Local::now(),
            started: Instant::now(),
            observations: Vec::new(),
        }
    }

    /// Append an observation.
    pub fn push(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    /// Observations so far, in acquisition order.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Number of observations so far.
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Identifier the finished dataset will carry.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Freeze the dataset.
    pub fn finish(self, completed: bool) -> SweepDataset {
        SweepDataset {
            metadata: DatasetMetadata {
                settings: self.settings,
                elapsed: self.started.elapsed(),
                run_id: self.run_id,
                started_at: self.started_at,
                hostname: local_hostname(),
                software_version: env!("CARGO_PKG_VERSION").to_string(),
                completed,
            },
            observations: self.observations,
        }
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Finished, immutable sweep result.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepDataset {
    metadata: DatasetMetadata,
    observations: Vec<Observation>,
}

impl SweepDataset {
    /// Header information.
    pub fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    /// Rows in acquisition order.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Whether the session ran to the end.
    pub fn is_complete(&self) -> bool {
        self.metadata.completed
    }
}
