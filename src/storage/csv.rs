//! Dataset CSV writer.
//!
//! The file starts with `# key: value` metadata lines, followed by a conventional
//! CSV table:
//!
//! ```text
//! # Exposure time (ms): 2
//! # Camera ROI: (1600, 2100, 300, 300)
//! # Real ROI: (95, 75, 60, 85)
//! # Images averaged: 15
//! # Time elapsed: 212.4
//! # Run ID: 5d0f...
//! # Started: 2026-10-16T14:03:12+02:00
//! # Host: magnet-rig
//! # Software version: 0.1.0
//! # Completed: true
//! Voltage (V),Current (A),Average Intensity,Total Intensity,SNR (dB)
//! 0.0,0.0,812.4,4142240,18.1
//! ```
//!
//! Readers such as `pandas.read_csv(path, comment="#")` skip the header lines.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

use crate::error::AppResult;
use crate::sweep::SweepDataset;

/// Write `dataset` to `path`, replacing any existing file.
pub fn write_dataset(path: &Path, dataset: &SweepDataset) -> AppResult<()> {
    let mut file = BufWriter::new(File::create(path)?);
    write_metadata(&mut file, dataset)?;

    let mut writer = csv::Writer::from_writer(file);
    if dataset.observations().is_empty() {
        writer.write_record([
            "Voltage (V)",
            "Current (A)",
            "Average Intensity",
            "Total Intensity",
            "SNR (dB)",
        ])?;
    }
    for observation in dataset.observations() {
        writer.serialize(observation)?;
    }
    writer.flush()?;

    info!(
        path = %path.display(),
        rows = dataset.observations().len(),
        completed = dataset.is_complete(),
        "Dataset written"
    );
    Ok(())
}

fn write_metadata<W: Write>(out: &mut W, dataset: &SweepDataset) -> AppResult<()> {
    let meta = dataset.metadata();
    let lines = [
        ("Exposure time (ms)", meta.settings.exposure_time_ms.to_string()),
        ("Camera ROI", meta.settings.camera_roi.to_string()),
        ("Real ROI", meta.settings.crop_roi.to_string()),
        ("Images averaged", meta.settings.frames_averaged.to_string()),
        ("Time elapsed", meta.elapsed.as_secs_f64().to_string()),
        ("Run ID", meta.run_id.to_string()),
        ("Started", meta.started_at.to_rfc3339()),
        ("Host", meta.hostname.clone()),
        ("Software version", meta.software_version.clone()),
        ("Completed", meta.completed.to_string()),
    ];
    for (key, value) in lines {
        writeln!(out, "# {}: {}", key, value)?;
    }
    Ok(())
}
