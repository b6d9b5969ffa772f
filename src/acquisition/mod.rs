//! Camera-side measurement: regions of interest, frame averaging and image metrics.

pub mod averager;
pub mod image;
pub mod roi;

pub use averager::{FrameAverager, DEFAULT_POLL_TIMEOUT};
pub use image::{snr_db, try_snr_db, AveragedImage};
pub use roi::{Framing, ImagingPreset, Roi};
