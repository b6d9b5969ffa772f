//! Persistence of sweep results.
//!
//! Layout of one experiment, keyed by its start time:
//!
//! ```text
//! data/2026-10-16_14-03-12/data_2026-10-16_14-03-12.csv
//! data/2026-10-16_14-03-12/plot.png          (feature "plot")
//! images/2026-10-16_14-03-12/avg_image_0.25V_1.npy
//! ```

pub mod csv;
pub mod npy;
#[cfg(feature = "plot")]
pub mod plot;

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::AppResult;
use crate::sweep::SweepDataset;

pub use self::csv::write_dataset;
pub use npy::{image_file_name, write_npy, ImageCounter, ImageSink, NpyImageStore};

/// Directory-name form of an experiment start time, e.g. `2026-10-16_14-03-12`.
pub fn experiment_label(started: &DateTime<Local>) -> String {
    started.format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// Writes a dataset (and its plot) into `<data_dir>/<label>/`.
#[derive(Debug, Clone)]
pub struct DatasetWriter {
    dir: PathBuf,
    label: String,
}

impl DatasetWriter {
    /// Writer for experiment `label` under `data_dir`.
    pub fn new(data_dir: impl AsRef<Path>, label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            dir: data_dir.as_ref().join(&label),
            label,
        }
    }

    /// Experiment directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the CSV (and the scatter plot when enabled); returns the CSV path.
    pub fn write(&self, dataset: &SweepDataset) -> AppResult<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let csv_path = self.dir.join(format!("data_{}.csv", self.label));
        write_dataset(&csv_path, dataset)?;

        #[cfg(feature = "plot")]
        {
            let plot_path = self.dir.join("plot.png");
            match plot::write_scatter_plot(&plot_path, dataset) {
                Ok(()) => info!(path = %plot_path.display(), "Plot saved"),
                Err(e) => tracing::warn!(error = %e, "Plot not written"),
            }
        }

        info!(dir = %self.dir.display(), "Data saved");
        Ok(csv_path)
    }
}
