//! # SideKick RS
//!
//! A Rust library for controlling a SideKick-family quantum cascade
//! laser and a paired lock-in amplifier in mid-IR spectroscopy
//! experiments.
//!
//! The crate covers the full path from a powered-off controller to
//! captured data: USB discovery and handshake validation, the bring-up
//! state machine (arm, set parameters, thermal stabilization, emission
//! with bounded retries), lock-in demodulator setup and timed sample
//! acquisition, multi-step wavelength scans with overlapped acquisition,
//! and a builder-validated scheduler that applies time-varying parameter
//! changes against the running laser.
//!
//! ## Features
//!
//! - **Capability traits at the vendor boundaries**: controllers are
//!   written against [`QclSdk`] and [`LockinApi`]; the linked vendor
//!   implementations are gated behind the `vendor-sdk` and `zi-api`
//!   cargo features, so the crate builds and tests without hardware
//! - **Bounded waits everywhere**: every hardware poll is timeout-bounded
//!   and converts into a typed error on expiry
//! - **Unconditional cleanup**: any bring-up failure shuts the laser
//!   down before the original error propagates
//! - **DataFrame output**: captured traces convert to `polars` frames
//!   for downstream analysis
//!
//! ## Bring-up and a scheduled experiment
//!
//! ```rust,no_run
//! use sidekick_rs::{Action, Experiment, QclDriver, QclParameterSet, QclSdk};
//!
//! fn ramp_current(sdk: impl QclSdk) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut driver = QclDriver::new(sdk);
//!     driver.bring_up(QclParameterSet::default())?;
//!
//!     // Step the QCL current up every 30 seconds for five minutes.
//!     let experiment = Experiment::builder()
//!         .action(Action::current(|t| {
//!             (t % 30 == 0).then(|| 1300.0 + t as f64)
//!         }))
//!         .duration_secs(300)
//!         .build()?;
//!     experiment.run(&mut driver)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Step scan with acquisition
//!
//! ```rust,no_run
//! use sidekick_rs::{
//!     LockinApi, LockinChannel, LockinConfig, QclDriver, QclParameterSet, QclSdk,
//!     ScanConfig, StepScanner,
//! };
//!
//! fn scan<S, A>(sdk: S, api: A) -> Result<(), Box<dyn std::error::Error>>
//! where
//!     S: QclSdk,
//!     A: LockinApi + Sync,
//! {
//!     let mut driver = QclDriver::new(sdk);
//!     driver.bring_up(QclParameterSet::default())?;
//!
//!     let lockin = LockinChannel::connect(api, LockinConfig::default())?;
//!     lockin.initialize()?;
//!
//!     let outcome = StepScanner::new(&mut driver, &lockin, ScanConfig::default()).run(1)?;
//!     for batch in outcome.batches {
//!         println!("{}", batch.into_dataframe()?);
//!     }
//!     driver.turn_off();
//!     Ok(())
//! }
//! ```
//!
//! With the `hardware` feature enabled, `SidekickSdk::open()` and
//! `ZiApi::connect()` provide the linked vendor implementations of the
//! two traits.

pub mod action;
pub mod experiment;
pub mod lockin;
pub mod qcl_connector;
pub mod qcl_driver;
pub mod sidekick_sdk;
pub mod step_scan;

// Re-export the main types for convenience
pub use action::{Action, LaserDevice, LaserField};

pub use experiment::{
    Experiment, ExperimentBuilder, ParameterSchedule, ScheduleOverrides, ValidationError,
    MAX_DURATION_SECS,
};

#[cfg(feature = "zi-api")]
pub use lockin::ZiApi;
pub use lockin::{
    DemodSample, LockinApi, LockinChannel, LockinConfig, LockinError, PollPayload, SampleBatch,
};

pub use qcl_connector::{ConnectError, QclConnector};

pub use qcl_driver::{
    EmissionState, FieldLimits, QclDriver, QclError, QclParameterSet, QclTimeouts,
};

#[cfg(feature = "vendor-sdk")]
pub use sidekick_sdk::SidekickSdk;
pub use sidekick_sdk::{
    DeviceHandle, LightInfo, QclParams, QclSdk, ScanProgress, SdkError, StatusWords,
    StepMeasureParams, SystemTelemetry,
};

pub use step_scan::{
    ScanConfig, ScanError, ScanTelemetry, ScanTiming, StepScanOutcome, StepScanner,
    WavelengthUnit,
};

#[cfg(test)]
pub(crate) mod test_support;
