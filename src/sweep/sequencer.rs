//! Single directional sweep over a list of setpoints.
//!
//! For each setpoint, in order:
//!
//! 1. check the stop flag
//! 2. command the supply to the setpoint
//! 3. sleep for the dwell time so the field settles
//! 4. read back measured voltage and current
//! 5. capture an averaged image
//! 6. persist the image under the next save index
//! 7. append the observation, voltage tagged with the polarity
//!
//! Order matters: the magnet is hysteretic, so setpoints are never reordered or
//! visited concurrently. Any instrument or capture error aborts the sweep at once;
//! observations appended before it stay in the recorder.

use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::acquisition::{FrameAverager, Roi};
use crate::error::{AppResult, InstrumentContext, SweepError};
use crate::hardware::VoltageSource;
use crate::safety::StopFlag;
use crate::storage::{ImageCounter, ImageSink};
use crate::sweep::dataset::{DatasetRecorder, Observation, Polarity};

/// Per-setpoint acquisition parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequencerSettings {
    /// Crop applied to every frame
    pub roi: Roi,
    /// Frames per averaged image
    pub frames_to_average: usize,
    /// Settling delay after each voltage step
    pub dwell: Duration,
}

/// Drives one ramp of a session.
pub struct SweepSequencer<'a> {
    supply: &'a dyn VoltageSource,
    averager: &'a FrameAverager<'a>,
    images: &'a dyn ImageSink,
    stop: &'a StopFlag,
    settings: SequencerSettings,
}

impl<'a> SweepSequencer<'a> {
    /// Borrow the collaborators for one or more ramps.
    pub fn new(
        supply: &'a dyn VoltageSource,
        averager: &'a FrameAverager<'a>,
        images: &'a dyn ImageSink,
        stop: &'a StopFlag,
        settings: SequencerSettings,
    ) -> Self {
        Self {
            supply,
            averager,
            images,
            stop,
            settings,
        }
    }

    /// Visit `setpoints` in order, appending one observation per setpoint.
    ///
    /// Returns the number of observations appended.
    ///
    /// # Errors
    /// - [`SweepError::Cancelled`] if the stop flag is set before a setpoint
    /// - [`SweepError::InstrumentCommunication`] on any supply failure
    /// - any [`FrameAverager::capture`] or image sink error
    #[instrument(skip_all, fields(polarity = %polarity, setpoints = setpoints.len()))]
    pub async fn run(
        &self,
        setpoints: &[f64],
        polarity: Polarity,
        recorder: &mut DatasetRecorder,
        counter: &mut ImageCounter,
    ) -> AppResult<usize> {
        for (appended, &setpoint) in setpoints.iter().enumerate() {
            if self.stop.is_stop_requested() {
                warn!(
                    setpoint,
                    reason = self.stop.reason().as_deref().unwrap_or("unspecified"),
                    "Stop requested, ending sweep"
                );
                return Err(SweepError::Cancelled { setpoint });
            }

            match self.measure(setpoint, polarity, counter).await {
                Ok(observation) => recorder.push(observation),
                Err(e) => {
                    warn!(setpoint, completed = appended, error = %e, "Sweep aborted");
                    return Err(e);
                }
            }
        }
        Ok(setpoints.len())
    }

    async fn measure(
        &self,
        setpoint: f64,
        polarity: Polarity,
        counter: &mut ImageCounter,
    ) -> AppResult<Observation> {
        self.supply
            .set_voltage(setpoint)
            .await
            .during("set_voltage")?;
        tokio::time::sleep(self.settings.dwell).await;

        let voltage = self.supply.read_voltage().await.during("read_voltage")?;
        let current = self.supply.read_current().await.during("read_current")?;
        info!(
            setpoint,
            voltage = polarity.apply(voltage),
            current,
            "Setpoint reached"
        );

        let image = self
            .averager
            .capture(&self.settings.roi, self.settings.frames_to_average)
            .await?;
        if image.snr_db().is_nan() {
            warn!(
                setpoint,
                mean = image.mean(),
                "SNR undefined for this image, recording NaN"
            );
        }

        self.images
            .save(&image, setpoint, counter.next_index())
            .await?;

        Ok(Observation::from_measurement(
            voltage, current, polarity, &image,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::AveragedImage;
    use crate::hardware::mock::{SimulatedCamera, SimulatedSupply, SupplyCommand};
    use crate::sweep::dataset::AcquisitionSettings;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Remembers `(setpoint, index)` of every saved image.
    #[derive(Default)]
    struct RecordingSink {
        saved: Mutex<Vec<(f64, u64)>>,
    }

    #[async_trait]
    impl ImageSink for RecordingSink {
        async fn save(&self, _image: &AveragedImage, setpoint: f64, index: u64) -> AppResult<()> {
            self.saved.lock().unwrap().push((setpoint, index));
            Ok(())
        }
    }

    fn recorder(roi: Roi) -> DatasetRecorder {
        DatasetRecorder::new(AcquisitionSettings {
            exposure_time_ms: 2.0,
            camera_roi: roi,
            crop_roi: roi,
            frames_averaged: 3,
        })
    }

    fn settings(roi: Roi) -> SequencerSettings {
        SequencerSettings {
            roi,
            frames_to_average: 3,
            dwell: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn visits_setpoints_in_order_with_polarity() {
        let supply = SimulatedSupply::default();
        supply.enable_output(true).await.unwrap();
        let camera = SimulatedCamera::constant(16, 16, 100);
        let averager = FrameAverager::new(&camera);
        let sink = RecordingSink::default();
        let stop = StopFlag::new();
        let roi = Roi::full(16, 16).unwrap();
        let sequencer = SweepSequencer::new(&supply, &averager, &sink, &stop, settings(roi));

        let mut recorder = recorder(roi);
        let mut counter = ImageCounter::new();
        let appended = sequencer
            .run(&[0.0, 1.0, 2.0], Polarity::Negative, &mut recorder, &mut counter)
            .await
            .unwrap();

        assert_eq!(appended, 3);
        let voltages: Vec<f64> = recorder.observations().iter().map(|o| o.voltage).collect();
        assert_eq!(voltages, vec![0.0, -1.0, -2.0]);
        assert!(recorder.observations().iter().all(|o| o.current >= 0.0));
        assert!(recorder
            .observations()
            .iter()
            .all(|o| o.mean_intensity == 100.0 && o.snr_db.is_nan()));
        assert_eq!(
            *sink.saved.lock().unwrap(),
            vec![(0.0, 0), (1.0, 1), (2.0, 2)]
        );
        assert_eq!(camera.frame_count(), 9);
    }

    #[tokio::test]
    async fn counter_continues_across_runs() {
        let supply = SimulatedSupply::default();
        let camera = SimulatedCamera::constant(4, 4, 1);
        let averager = FrameAverager::new(&camera);
        let sink = RecordingSink::default();
        let stop = StopFlag::new();
        let roi = Roi::full(4, 4).unwrap();
        let sequencer = SweepSequencer::new(&supply, &averager, &sink, &stop, settings(roi));

        let mut recorder = recorder(roi);
        let mut counter = ImageCounter::new();
        sequencer
            .run(&[0.0, 1.0], Polarity::Positive, &mut recorder, &mut counter)
            .await
            .unwrap();
        sequencer
            .run(&[1.0, 0.0], Polarity::Positive, &mut recorder, &mut counter)
            .await
            .unwrap();

        assert_eq!(
            *sink.saved.lock().unwrap(),
            vec![(0.0, 0), (1.0, 1), (1.0, 2), (0.0, 3)]
        );
        assert_eq!(recorder.len(), 4);
    }

    #[tokio::test]
    async fn supply_failure_keeps_earlier_observations() {
        let supply = SimulatedSupply::default().with_failure_at(1.0);
        let camera = SimulatedCamera::constant(4, 4, 1);
        let averager = FrameAverager::new(&camera);
        let sink = RecordingSink::default();
        let stop = StopFlag::new();
        let roi = Roi::full(4, 4).unwrap();
        let sequencer = SweepSequencer::new(&supply, &averager, &sink, &stop, settings(roi));

        let mut recorder = recorder(roi);
        let mut counter = ImageCounter::new();
        let result = sequencer
            .run(&[0.0, 1.0, 2.0], Polarity::Positive, &mut recorder, &mut counter)
            .await;

        match result {
            Err(SweepError::InstrumentCommunication { operation, .. }) => {
                assert_eq!(operation, "set_voltage")
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(recorder.len(), 1);
        assert_eq!(counter.saved(), 1);
        assert!(!supply
            .commands()
            .await
            .contains(&SupplyCommand::Voltage(2.0)));
    }

    #[tokio::test]
    async fn stop_flag_is_checked_between_setpoints() {
        let supply = SimulatedSupply::default();
        let camera = SimulatedCamera::constant(4, 4, 1);
        let averager = FrameAverager::new(&camera);
        let sink = RecordingSink::default();
        let stop = StopFlag::new();
        stop.request_stop("test");
        let roi = Roi::full(4, 4).unwrap();
        let sequencer = SweepSequencer::new(&supply, &averager, &sink, &stop, settings(roi));

        let mut recorder = recorder(roi);
        let mut counter = ImageCounter::new();
        let result = sequencer
            .run(&[3.0, 4.0], Polarity::Positive, &mut recorder, &mut counter)
            .await;

        assert!(matches!(result, Err(SweepError::Cancelled { setpoint }) if setpoint == 3.0));
        assert!(recorder.is_empty());
        assert!(supply.commands().await.is_empty());
    }

    #[tokio::test]
    async fn capture_timeout_aborts_sweep() {
        let supply = SimulatedSupply::default();
        // enough frames for exactly one setpoint
        let camera = SimulatedCamera::constant(4, 4, 1).stall_after(3);
        let averager = FrameAverager::new(&camera).with_poll_timeout(Duration::from_millis(10));
        let sink = RecordingSink::default();
        let stop = StopFlag::new();
        let roi = Roi::full(4, 4).unwrap();
        let sequencer = SweepSequencer::new(&supply, &averager, &sink, &stop, settings(roi));

        let mut recorder = recorder(roi);
        let mut counter = ImageCounter::new();
        let result = sequencer
            .run(&[0.0, 1.0, 2.0], Polarity::Positive, &mut recorder, &mut counter)
            .await;

        assert!(matches!(
            result,
            Err(SweepError::FrameAcquisitionTimeout { received: 0, .. })
        ));
        assert_eq!(recorder.len(), 1);
    }
}
