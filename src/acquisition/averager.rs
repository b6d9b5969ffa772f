//! Frame averaging over a region of interest.
//!
//! Camera frames are noisy at the 2 ms exposures used on the rig, so every
//! measurement is the mean of several frames:
//!
//! 1. a zeroed `f64` accumulator is sized to the ROI (12/16-bit samples summed over
//!    many frames would lose precision or overflow in narrower types),
//! 2. each frame is cropped to the ROI and added,
//! 3. the sum is divided by the frame count and narrowed to `u16` by truncation
//!    toward zero.
//!
//! A source that yields no frame within the poll timeout fails the capture with
//! [`SweepError::FrameAcquisitionTimeout`]; there is no retry.

use ndarray::{s, Array2, ArrayView2};
use std::time::Duration;
use tracing::{debug, instrument, trace};

use crate::acquisition::image::AveragedImage;
use crate::acquisition::roi::Roi;
use crate::error::{AppResult, InstrumentContext, SweepError};
use crate::hardware::{Frame, FrameSource};

/// Default wait for a pending frame, matching the camera's 1 s poll timeout.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Averages frames from a borrowed [`FrameSource`].
pub struct FrameAverager<'a> {
    source: &'a dyn FrameSource,
    poll_timeout: Duration,
}

impl<'a> FrameAverager<'a> {
    /// Average frames from `source` with the default poll timeout.
    pub fn new(source: &'a dyn FrameSource) -> Self {
        Self {
            source,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    /// Override the per-frame poll timeout.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Capture `frame_count` frames, crop each to `roi` and average them.
    ///
    /// # Errors
    /// - [`SweepError::InvalidFrameCount`] if `frame_count` is zero
    /// - [`SweepError::InvalidRoi`] if `roi` does not fit the sensor
    /// - [`SweepError::FrameAcquisitionTimeout`] if a frame does not arrive in time
    /// - [`SweepError::FrameShapeMismatch`] if a frame disagrees with the sensor size
    /// - [`SweepError::InstrumentCommunication`] if the source itself fails
    #[instrument(skip(self), fields(roi = %roi))]
    pub async fn capture(&self, roi: &Roi, frame_count: usize) -> AppResult<AveragedImage> {
        if frame_count == 0 {
            return Err(SweepError::InvalidFrameCount);
        }
        let sensor = self.source.sensor_size();
        roi.ensure_within(sensor)?;

        let mut accumulator = Array2::<f64>::zeros(roi.shape());
        debug!(frame_count, "Averaging frames");

        for received in 0..frame_count {
            let frame = self.next_frame(received, frame_count).await?;
            trace!(frame_number = frame.frame_number, "frame received");
            accumulate(&mut accumulator, &frame, roi, sensor)?;
        }

        let divisor = frame_count as f64;
        let averaged = accumulator.mapv(|sum| (sum / divisor) as u16);
        let image = AveragedImage::from_pixels(averaged);

        debug!(
            shape = ?image.shape(),
            max = image.max(),
            total = image.total(),
            mean = image.mean(),
            snr_db = image.snr_db(),
            "Averaged image computed"
        );
        Ok(image)
    }

    async fn next_frame(&self, received: usize, requested: usize) -> AppResult<Frame> {
        let timed_out = || SweepError::FrameAcquisitionTimeout {
            received,
            requested,
            timeout: self.poll_timeout,
        };
        match tokio::time::timeout(self.poll_timeout, self.source.next_frame(self.poll_timeout))
            .await
        {
            Ok(result) => result.during("get_pending_frame")?.ok_or_else(timed_out),
            Err(_) => Err(timed_out()),
        }
    }
}

fn accumulate(
    accumulator: &mut Array2<f64>,
    frame: &Frame,
    roi: &Roi,
    sensor: (u32, u32),
) -> AppResult<()> {
    let mismatch = || SweepError::FrameShapeMismatch {
        expected: sensor,
        actual: (frame.width, frame.height),
    };
    if (frame.width, frame.height) != sensor {
        return Err(mismatch());
    }
    let full = ArrayView2::from_shape(
        (frame.height as usize, frame.width as usize),
        &frame.pixels,
    )
    .map_err(|_| mismatch())?;

    let (x, y) = (roi.x() as usize, roi.y() as usize);
    let (height, width) = roi.shape();
    let cropped = full.slice(s![y..y + height, x..x + width]);
    accumulator.zip_mut_with(&cropped, |sum, &pixel| *sum += f64::from(pixel));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{FramePattern, SimulatedCamera};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn constant_source_averages_to_constant() {
        let camera = SimulatedCamera::constant(64, 48, 4095);
        let averager = FrameAverager::new(&camera);
        let roi = Roi::new(10, 5, 20, 30).unwrap();

        for frames in [1, 2, 7, 15, 50] {
            let image = averager.capture(&roi, frames).await.unwrap();
            assert!(image.pixels().iter().all(|&p| p == 4095), "{frames} frames drifted");
        }
    }

    #[tokio::test]
    async fn image_shape_is_roi_height_by_width() {
        let camera = SimulatedCamera::new(300, 300, FramePattern::Noisy { level: 800, noise: 50 });
        let averager = FrameAverager::new(&camera);
        for roi in [
            Roi::new(95, 75, 60, 85).unwrap(),
            Roi::full(300, 300).unwrap(),
            Roi::new(299, 299, 1, 1).unwrap(),
        ] {
            let image = averager.capture(&roi, 3).await.unwrap();
            assert_eq!(image.shape(), (roi.height() as usize, roi.width() as usize));
        }
    }

    /// Frame `n` has pixel value `n * 10 + column`, so crop offsets are visible.
    struct Ramp {
        count: AtomicU64,
    }

    #[async_trait]
    impl FrameSource for Ramp {
        async fn next_frame(&self, _timeout: Duration) -> Result<Option<Frame>> {
            let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
            let pixels = (0..4u16)
                .flat_map(|_| (0..4u16).map(move |col| n as u16 * 10 + col))
                .collect();
            Ok(Some(Frame::from_u16(4, 4, n, pixels)))
        }

        fn sensor_size(&self) -> (u32, u32) {
            (4, 4)
        }
    }

    #[tokio::test]
    async fn average_truncates_toward_zero_and_crops() {
        let source = Ramp {
            count: AtomicU64::new(0),
        };
        let averager = FrameAverager::new(&source);
        let roi = Roi::new(2, 1, 2, 3).unwrap();

        // frames 1 and 2: column 2 -> (12 + 22) / 2 = 17, column 3 -> (13 + 23) / 2 = 18
        let image = averager.capture(&roi, 2).await.unwrap();
        assert_eq!(image.shape(), (3, 2));
        assert!(image.pixels().column(0).iter().all(|&p| p == 17));
        assert!(image.pixels().column(1).iter().all(|&p| p == 18));

        // frames 3..=5 at column 2: (32 + 42 + 52) / 3 = 42
        let image = averager.capture(&roi, 3).await.unwrap();
        assert!(image.pixels().column(0).iter().all(|&p| p == 42));
    }

    #[tokio::test]
    async fn fractional_average_is_truncated() {
        // two frames of 0 and 1 average to 0.5, truncated to 0
        struct Alternating(AtomicU64);

        #[async_trait]
        impl FrameSource for Alternating {
            async fn next_frame(&self, _timeout: Duration) -> Result<Option<Frame>> {
                let n = self.0.fetch_add(1, Ordering::SeqCst);
                Ok(Some(Frame::filled(2, 2, n + 1, (n % 2) as u16)))
            }

            fn sensor_size(&self) -> (u32, u32) {
                (2, 2)
            }
        }

        let source = Alternating(AtomicU64::new(0));
        let image = FrameAverager::new(&source)
            .capture(&Roi::full(2, 2).unwrap(), 2)
            .await
            .unwrap();
        assert!(image.pixels().iter().all(|&p| p == 0));
    }

    #[tokio::test]
    async fn flat_average_reports_nan_snr() {
        let camera = SimulatedCamera::constant(8, 8, 100);
        let image = FrameAverager::new(&camera)
            .capture(&Roi::full(8, 8).unwrap(), 4)
            .await
            .unwrap();
        assert_eq!(image.mean(), 100.0);
        assert_eq!(image.total(), 6400);
        assert!(image.snr_db().is_nan());
    }

    #[tokio::test]
    async fn rejects_zero_frames_and_oversized_roi() {
        let camera = SimulatedCamera::constant(8, 8, 1);
        let averager = FrameAverager::new(&camera);
        assert!(matches!(
            averager.capture(&Roi::full(8, 8).unwrap(), 0).await,
            Err(SweepError::InvalidFrameCount)
        ));
        assert!(matches!(
            averager.capture(&Roi::new(4, 4, 5, 1).unwrap(), 1).await,
            Err(SweepError::InvalidRoi(_))
        ));
        assert_eq!(camera.frame_count(), 0);
    }

    #[tokio::test]
    async fn stalled_source_times_out() {
        let camera = SimulatedCamera::constant(8, 8, 1).stall_after(2);
        let averager = FrameAverager::new(&camera).with_poll_timeout(Duration::from_millis(20));

        match averager.capture(&Roi::full(8, 8).unwrap(), 5).await {
            Err(SweepError::FrameAcquisitionTimeout {
                received,
                requested,
                timeout,
            }) => {
                assert_eq!(received, 2);
                assert_eq!(requested, 5);
                assert_eq!(timeout, Duration::from_millis(20));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn mismatched_frame_is_rejected() {
        struct Liar;

        #[async_trait]
        impl FrameSource for Liar {
            async fn next_frame(&self, _timeout: Duration) -> Result<Option<Frame>> {
                Ok(Some(Frame::filled(4, 4, 1, 0)))
            }

            fn sensor_size(&self) -> (u32, u32) {
                (8, 8)
            }
        }

        let result = FrameAverager::new(&Liar)
            .capture(&Roi::full(2, 2).unwrap(), 1)
            .await;
        assert!(matches!(result, Err(SweepError::FrameShapeMismatch { .. })));
    }

    #[tokio::test]
    async fn source_error_is_instrument_communication() {
        struct Broken;

        #[async_trait]
        impl FrameSource for Broken {
            async fn next_frame(&self, _timeout: Duration) -> Result<Option<Frame>> {
                anyhow::bail!("USB link lost")
            }

            fn sensor_size(&self) -> (u32, u32) {
                (2, 2)
            }
        }

        let result = FrameAverager::new(&Broken)
            .capture(&Roi::full(2, 2).unwrap(), 1)
            .await;
        assert!(matches!(
            result,
            Err(SweepError::InstrumentCommunication { .. })
        ));
    }
}
