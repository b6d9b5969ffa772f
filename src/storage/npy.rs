//! Raw averaged-image persistence.
//!
//! Every averaged image is kept next to the dataset so measurements can be
//! reprocessed later. Files use the NumPy `.npy` format (`<u2`, C order,
//! shape `(height, width)`), which loads directly with `numpy.load`.
//!
//! Setpoints repeat across the passes of a hysteresis loop, so file names carry the
//! setpoint plus a running index from [`ImageCounter`]:
//! `avg_image_{setpoint}V_{index}.npy`.

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::acquisition::AveragedImage;
use crate::error::AppResult;

/// Monotonic count of images saved during one session.
///
/// Owned by the session and lent to each sweep; indices are never reused.
#[derive(Debug, Default)]
pub struct ImageCounter {
    saved: u64,
}

impl ImageCounter {
    /// Start counting from zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the next index.
    pub fn next_index(&mut self) -> u64 {
        let index = self.saved;
        self.saved += 1;
        index
    }

    /// Number of indices handed out so far.
    pub fn saved(&self) -> u64 {
        self.saved
    }
}

/// Destination for averaged images.
#[async_trait]
pub trait ImageSink: Send + Sync {
    /// Persist `image` taken at `setpoint` volts under save index `index`.
    async fn save(&self, image: &AveragedImage, setpoint: f64, index: u64) -> AppResult<()>;
}

/// File name for an averaged image.
pub fn image_file_name(setpoint: f64, index: u64) -> String {
    format!("avg_image_{}V_{}.npy", setpoint, index)
}

/// Writes `.npy` files into one directory.
#[derive(Debug, Clone)]
pub struct NpyImageStore {
    dir: PathBuf,
}

impl NpyImageStore {
    /// Use `dir`, creating it if needed.
    pub fn create(dir: impl Into<PathBuf>) -> AppResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Target directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ImageSink for NpyImageStore {
    async fn save(&self, image: &AveragedImage, setpoint: f64, index: u64) -> AppResult<()> {
        let path = self.dir.join(image_file_name(setpoint, index));
        write_npy(&path, image)?;
        debug!(path = %path.display(), "Saved averaged image");
        Ok(())
    }
}

/// Write an image as a `.npy` file.
pub fn write_npy(path: &Path, image: &AveragedImage) -> AppResult<()> {
    ndarray_npy::write_npy(path, image.pixels())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn counter_is_monotonic() {
        let mut counter = ImageCounter::new();
        assert_eq!(counter.next_index(), 0);
        assert_eq!(counter.next_index(), 1);
        assert_eq!(counter.next_index(), 2);
        assert_eq!(counter.saved(), 3);
    }

    #[test]
    fn file_names_disambiguate_repeated_setpoints() {
        assert_eq!(image_file_name(14.75, 59), "avg_image_14.75V_59.npy");
        assert_eq!(image_file_name(0.0, 0), "avg_image_0V_0.npy");
        assert_ne!(image_file_name(5.0, 20), image_file_name(5.0, 100));
    }

    #[tokio::test]
    async fn store_writes_loadable_npy() {
        let dir = tempfile::tempdir().unwrap();
        let store = NpyImageStore::create(dir.path().join("images")).unwrap();
        let image = AveragedImage::from_pixels(array![[1u16, 2, 3], [4, 5, 65535]]);

        store.save(&image, 2.5, 7).await.unwrap();

        let path = store.dir().join("avg_image_2.5V_7.npy");
        let loaded: Array2<u16> = ndarray_npy::read_npy(&path).unwrap();
        assert_eq!(&loaded, image.pixels());

        // Little-endian u16, as numpy.load expects for `<u2`
        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"\x93NUMPY"));
        assert!(String::from_utf8_lossy(&bytes).contains("'descr': '<u2'"));
    }
}
