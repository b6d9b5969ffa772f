//! Sweep session orchestration.
//!
//! A session prepares the supply, runs every step of a [`SweepPlan`], and hands back
//! the resulting dataset. However the plan ends (success, instrument failure, frame
//! timeout, cancellation or operator abort), the supply is commanded to zero volts and
//! its output disabled exactly once before [`SweepSession::run`] returns.

use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::acquisition::FrameAverager;
use crate::error::{AppResult, InstrumentContext, SweepError};
use crate::hardware::VoltageSource;
use crate::safety::{with_safe_shutdown, StopFlag};
use crate::storage::{ImageCounter, ImageSink};
use crate::sweep::confirm::OperatorConfirmation;
use crate::sweep::dataset::{AcquisitionSettings, DatasetRecorder, SweepDataset};
use crate::sweep::plan::{SweepPlan, SweepStep};
use crate::sweep::sequencer::{SequencerSettings, SweepSequencer};

/// Fixed parameters of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    /// Recorded in the dataset header; the crop ROI and frame count also drive capture
    pub acquisition: AcquisitionSettings,
    /// Supply current compliance applied before output is enabled
    pub current_limit_amps: f64,
    /// Settling delay after each voltage step
    pub dwell: Duration,
}

/// Result of a session: the dataset is always present, possibly partial.
#[derive(Debug)]
pub struct SweepOutcome {
    /// Observations recorded before the session ended
    pub dataset: SweepDataset,
    /// Why the session stopped early, if it did
    pub failure: Option<SweepError>,
}

impl SweepOutcome {
    /// Whether every step ran and shutdown succeeded.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Orchestrates the ramps of a plan over borrowed instruments.
pub struct SweepSession<'a> {
    supply: &'a dyn VoltageSource,
    averager: &'a FrameAverager<'a>,
    images: &'a dyn ImageSink,
    confirmation: &'a dyn OperatorConfirmation,
    stop: StopFlag,
    settings: SessionSettings,
}

impl<'a> SweepSession<'a> {
    /// Assemble a session.
    pub fn new(
        supply: &'a dyn VoltageSource,
        averager: &'a FrameAverager<'a>,
        images: &'a dyn ImageSink,
        confirmation: &'a dyn OperatorConfirmation,
        settings: SessionSettings,
    ) -> Self {
        Self {
            supply,
            averager,
            images,
            confirmation,
            stop: StopFlag::new(),
            settings,
        }
    }

    /// Share an externally owned stop flag (e.g. set from a Ctrl-C handler).
    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    /// Handle for requesting a cooperative stop.
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Run `plan` to completion or first failure.
    ///
    /// The returned dataset is marked incomplete when `failure` is set.
    #[instrument(skip_all, fields(steps = plan.steps().len(), setpoints = plan.setpoint_count()))]
    pub async fn run(&self, plan: &SweepPlan) -> SweepOutcome {
        let mut recorder = DatasetRecorder::new(self.settings.acquisition);
        let mut counter = ImageCounter::new();
        info!(run_id = %recorder.run_id(), "Starting sweep session");

        let result = with_safe_shutdown(
            self.supply,
            &self.stop,
            self.execute(plan, &mut recorder, &mut counter),
        )
        .await;

        let dataset = recorder.finish(result.is_ok());
        let rows = dataset.observations().len();
        let elapsed = dataset.metadata().elapsed;
        match &result {
            Ok(()) => info!(rows, images = counter.saved(), ?elapsed, "Data collection finished"),
            Err(e) => error!(rows, images = counter.saved(), error = %e, "Sweep session ended early"),
        }

        SweepOutcome {
            dataset,
            failure: result.err(),
        }
    }

    async fn execute(
        &self,
        plan: &SweepPlan,
        recorder: &mut DatasetRecorder,
        counter: &mut ImageCounter,
    ) -> AppResult<()> {
        self.prepare_supply().await?;

        let sequencer = SweepSequencer::new(
            self.supply,
            self.averager,
            self.images,
            &self.stop,
            SequencerSettings {
                roi: self.settings.acquisition.crop_roi,
                frames_to_average: self.settings.acquisition.frames_averaged,
                dwell: self.settings.dwell,
            },
        );

        for (index, step) in plan.steps().iter().enumerate() {
            match step {
                SweepStep::Ramp {
                    label,
                    setpoints,
                    polarity,
                } => {
                    info!(step = index + 1, label, "Starting ramp");
                    sequencer
                        .run(setpoints, *polarity, recorder, counter)
                        .await?;
                }
                SweepStep::ConfirmReversal { prompt } => {
                    self.await_operator(prompt).await?;
                }
            }
        }
        Ok(())
    }

    /// `*RST`, current limit, zero volts, output on.
    async fn prepare_supply(&self) -> AppResult<()> {
        self.supply.reset().await.during("reset")?;
        self.supply
            .set_current_limit(self.settings.current_limit_amps)
            .await
            .during("set_current_limit")?;
        self.supply.set_voltage(0.0).await.during("set_voltage")?;
        self.supply.enable_output(true).await.during("enable_output")?;
        info!(
            current_limit_amps = self.settings.current_limit_amps,
            "Power supply prepared"
        );
        Ok(())
    }

    async fn await_operator(&self, prompt: &str) -> AppResult<()> {
        info!("Waiting for operator to reverse the magnet leads");
        tokio::select! {
            confirmed = self.confirmation.confirm(prompt) => confirmed,
            _ = self.stop.stopped() => {
                warn!("Stop requested while waiting for operator");
                Err(SweepError::OperatorAborted(
                    self.stop.reason().unwrap_or_else(|| "stop requested".to_string()),
                ))
            }
        }
    }
}
