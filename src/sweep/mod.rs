//! Sweep control: sequencing setpoints, orchestrating hysteresis loops, and the
//! dataset they produce.

pub mod confirm;
pub mod dataset;
pub mod plan;
pub mod sequencer;
pub mod session;

pub use confirm::{AutoConfirm, ConsoleConfirmation, OperatorConfirmation};
pub use dataset::{
    AcquisitionSettings, DatasetMetadata, DatasetRecorder, Observation, Polarity, SweepDataset,
};
pub use plan::{forward_setpoints, SweepPlan, SweepStep, MAX_RAMP_SETPOINTS};
pub use sequencer::{SequencerSettings, SweepSequencer};
pub use session::{SessionSettings, SweepOutcome, SweepSession};
