//! CLI Entry Point for magsweep
//!
//! Provides command-line actions for:
//! - Running a full hysteresis sweep (`sweep`)
//! - Capturing a single averaged picture (`picture`)
//! - Calibrating coil voltage against magnetic field (`calibrate`)
//!
//! # Usage
//!
//! Dry run against simulated instruments:
//! ```bash
//! magsweep --simulate sweep
//! ```
//!
//! Use a specific configuration:
//! ```bash
//! magsweep --config rig.toml calibrate
//! ```
//!
//! Ctrl-C stops after the current setpoint; the supply is always left at zero volts
//! with its output disabled. A second Ctrl-C exits immediately.

use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use magsweep::acquisition::FrameAverager;
use magsweep::calibration::{
    calibration_path, write_calibration, Calibration, ConsoleGaussmeter, FieldProbe, LinearProbe,
};
use magsweep::config::{
    CameraConfig, MagsweepConfig, PowerSupplyConfig, SupplyTransport, DEFAULT_CONFIG_PATH,
};
use magsweep::hardware::mock::{FramePattern, SimulatedCamera, SimulatedSupply};
use magsweep::hardware::{ExposureControl, VoltageSource};
use magsweep::logging;
use magsweep::safety::StopFlag;
use magsweep::storage::{experiment_label, write_npy, DatasetWriter, NpyImageStore};
use magsweep::sweep::{
    AcquisitionSettings, ConsoleConfirmation, SessionSettings, SweepPlan, SweepSession,
};

/// Conventional exit status for SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "magsweep")]
#[command(about = "Magnet field sweep controller", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use simulated instruments regardless of the configured transport
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hysteresis loop (0 -> +max -> 0, swap leads, 0 -> -max -> 0, swap, 0 -> +max)
    Sweep,

    /// Capture one averaged image with the configured preset
    Picture,

    /// Step through whole volts and record gaussmeter readings
    Calibrate,
}

/// Instruments used by one invocation.
struct Rig {
    supply: Arc<dyn VoltageSource>,
    camera: SimulatedCamera,
    simulated: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = MagsweepConfig::load_from(&cli.config)?;
    config.validate()?;
    logging::init_from_config(&config)?;
    info!(config = %cli.config.display(), "magsweep starting");

    let stop = StopFlag::new();
    spawn_ctrl_c_handler(stop.clone());

    let simulate = cli.simulate || config.power_supply.transport == SupplyTransport::Simulated;
    let rig = connect_rig(&config, simulate).await?;

    match cli.command {
        Commands::Sweep => run_sweep(&config, &rig, stop).await,
        Commands::Picture => take_picture(&config, &rig).await,
        Commands::Calibrate => run_calibration(&config, &rig, stop).await,
    }
}

/// First Ctrl-C requests a cooperative stop; a second one exits immediately.
fn spawn_ctrl_c_handler(stop: StopFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Ctrl-C received, stopping after the current step (press again to exit now)");
        stop.request_stop("Ctrl-C");

        if tokio::signal::ctrl_c().await.is_ok() {
            error!("Second Ctrl-C, exiting without waiting for shutdown");
            std::process::exit(EXIT_INTERRUPTED);
        }
    });
}

async fn connect_rig(config: &MagsweepConfig, simulate: bool) -> Result<Rig> {
    let rig = if simulate {
        info!("Using simulated power supply and camera");
        let supply = Arc::new(SimulatedSupply::new(config.power_supply.simulated_load_ohms));
        let camera = simulated_camera(&config.camera)
            .coupled_to(Arc::clone(&supply), config.camera.simulated_counts_per_volt);
        Rig {
            supply,
            camera,
            simulated: true,
        }
    } else {
        Rig {
            supply: open_supply(&config.power_supply)?,
            camera: simulated_camera(&config.camera),
            simulated: false,
        }
    };

    match rig.supply.identify().await {
        Ok(id) => info!(%id, "Power supply connected"),
        Err(e) => warn!(error = %e, "Power supply did not identify"),
    }
    rig.camera.set_exposure_ms(config.camera.exposure_ms).await?;
    Ok(rig)
}

/// Sensor-sized simulated camera for the configured preset.
fn simulated_camera(config: &CameraConfig) -> SimulatedCamera {
    let window = config.preset.framing().camera_roi;
    let pattern = if config.simulated_noise == 0 {
        FramePattern::Constant(config.simulated_level)
    } else {
        FramePattern::Noisy {
            level: config.simulated_level,
            noise: config.simulated_noise,
        }
    };
    SimulatedCamera::new(window.width(), window.height(), pattern)
}

fn open_supply(config: &PowerSupplyConfig) -> Result<Arc<dyn VoltageSource>> {
    match config.transport {
        SupplyTransport::Simulated => {
            Ok(Arc::new(SimulatedSupply::new(config.simulated_load_ohms)))
        }
        SupplyTransport::Serial => open_serial_supply(config),
        SupplyTransport::Visa => open_visa_supply(config),
    }
}

#[cfg(feature = "instrument_serial")]
fn open_serial_supply(config: &PowerSupplyConfig) -> Result<Arc<dyn VoltageSource>> {
    use magsweep::hardware::{e3645a::E3645A, scpi::SerialScpiTransport};

    info!(port = %config.resource, baud = config.baud_rate, "Opening E3645A over RS-232");
    let transport = SerialScpiTransport::open(&config.resource, config.baud_rate, config.timeout)?;
    Ok(Arc::new(E3645A::new(transport)))
}

#[cfg(not(feature = "instrument_serial"))]
fn open_serial_supply(_config: &PowerSupplyConfig) -> Result<Arc<dyn VoltageSource>> {
    Err(magsweep::SweepError::Configuration(
        "serial transport requires the `instrument_serial` feature".to_string(),
    )
    .into())
}

#[cfg(feature = "instrument_visa")]
fn open_visa_supply(config: &PowerSupplyConfig) -> Result<Arc<dyn VoltageSource>> {
    use magsweep::hardware::{e3645a::E3645A, scpi::VisaScpiTransport};

    info!(resource = %config.resource, "Opening E3645A over VISA");
    let transport = VisaScpiTransport::open(&config.resource, config.timeout)?;
    Ok(Arc::new(E3645A::new(transport)))
}

#[cfg(not(feature = "instrument_visa"))]
fn open_visa_supply(_config: &PowerSupplyConfig) -> Result<Arc<dyn VoltageSource>> {
    Err(magsweep::SweepError::Configuration(
        "VISA transport requires the `instrument_visa` feature".to_string(),
    )
    .into())
}

async fn run_sweep(config: &MagsweepConfig, rig: &Rig, stop: StopFlag) -> Result<()> {
    let label = experiment_label(&Local::now());
    let framing = config.camera.preset.framing();
    let images = NpyImageStore::create(config.storage.image_dir.join(&label))?;
    let averager = FrameAverager::new(&rig.camera).with_poll_timeout(config.camera.poll_timeout);
    let confirmation = ConsoleConfirmation::new();

    let settings = SessionSettings {
        acquisition: AcquisitionSettings {
            exposure_time_ms: config.camera.exposure_ms,
            camera_roi: framing.camera_roi,
            crop_roi: framing.crop_roi,
            frames_averaged: config.sweep.frames_to_average,
        },
        current_limit_amps: config.power_supply.current_limit_amps,
        dwell: config.sweep.dwell,
    };
    let plan = SweepPlan::hysteresis_loop(config.sweep.max_voltage, config.sweep.step);
    info!(
        %label,
        setpoints = plan.setpoint_count(),
        simulated = rig.simulated,
        "Sweep planned"
    );

    let session = SweepSession::new(
        rig.supply.as_ref(),
        &averager,
        &images,
        &confirmation,
        settings,
    )
    .with_stop_flag(stop);
    let outcome = session.run(&plan).await;

    let csv_path = DatasetWriter::new(&config.storage.data_dir, &label).write(&outcome.dataset)?;
    info!(path = %csv_path.display(), images = %images.dir().display(), "Sweep results written");

    match outcome.failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

async fn take_picture(config: &MagsweepConfig, rig: &Rig) -> Result<()> {
    let framing = config.camera.preset.framing();
    let averager = FrameAverager::new(&rig.camera).with_poll_timeout(config.camera.poll_timeout);
    let image = averager
        .capture(&framing.crop_roi, config.sweep.frames_to_average)
        .await?;

    info!(
        preset = ?config.camera.preset,
        max = image.max(),
        mean = image.mean(),
        total = image.total(),
        snr_db = image.snr_db(),
        "Picture captured"
    );

    let label = experiment_label(&Local::now());
    let dir = config.storage.image_dir.join(&label);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("picture_{}.npy", label));
    write_npy(&path, &image)?;
    info!(path = %path.display(), "Picture saved");
    Ok(())
}

async fn run_calibration(config: &MagsweepConfig, rig: &Rig, stop: StopFlag) -> Result<()> {
    let probe: Box<dyn FieldProbe> = if rig.simulated {
        Box::new(LinearProbe::new(config.calibration.simulated_gauss_per_amp))
    } else {
        Box::new(ConsoleGaussmeter::new())
    };

    let outcome = Calibration::new(
        rig.supply.as_ref(),
        probe.as_ref(),
        config.calibration.max_volts,
        config.power_supply.current_limit_amps,
    )
    .with_stop_flag(stop)
    .run()
    .await;

    let path = calibration_path(&config.storage.data_dir);
    write_calibration(&path, &outcome.points)?;

    match outcome.failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
