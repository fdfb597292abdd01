//! Multi-step wavelength scan with overlapped acquisition.
//!
//! Each step launches one acquisition task on a scoped thread while the
//! control thread issues the scan-step command and polls progress. The
//! acquisition task is joined before the next step starts, so hardware
//! commands and acquisition windows stay strictly serialized.

use crate::lockin::{LockinApi, LockinChannel, LockinError, SampleBatch};
use crate::qcl_driver::{QclDriver, QclError};
use crate::sidekick_sdk::{
    QclSdk, StepMeasureParams, SIDEKICK_SDK_SCAN_START_STEP_MEASURE, SIDEKICK_SDK_UNITS_CM1,
    SIDEKICK_SDK_UNITS_MICRON,
};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Laser error: {0}")]
    Qcl(#[from] QclError),

    #[error("Lock-in error: {0}")]
    Lockin(#[from] LockinError),

    #[error("Scan step {step} did not complete within {timeout:?}")]
    StepTimeout { step: usize, timeout: Duration },

    #[error("Acquisition task panicked")]
    AcquisitionPanicked,
}

/// Spectroscopic tuning unit for scan set-points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavelengthUnit {
    Microns,
    Wavenumber,
}

impl WavelengthUnit {
    pub fn as_sdk(self) -> u8 {
        match self {
            WavelengthUnit::Microns => SIDEKICK_SDK_UNITS_MICRON,
            WavelengthUnit::Wavenumber => SIDEKICK_SDK_UNITS_CM1,
        }
    }
}

/// Step-scan set-points; immutable once a step begins.
#[derive(Debug, Clone, Copy)]
pub struct ScanConfig {
    pub unit: WavelengthUnit,
    pub start: f32,
    pub stop: f32,
    pub step: f32,
    pub num_scans: u16,
    /// Maintain emission between steps.
    pub keep_on: bool,
    pub bidirectional: bool,
    pub dwell: Duration,
    pub transition: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            unit: WavelengthUnit::Wavenumber,
            start: 1020.0,
            stop: 1220.0,
            step: 3.0,
            num_scans: 1,
            keep_on: true,
            bidirectional: false,
            dwell: Duration::from_millis(250),
            transition: Duration::from_millis(25),
        }
    }
}

impl ScanConfig {
    pub fn into_wire(self) -> StepMeasureParams {
        StepMeasureParams {
            unit: self.unit.as_sdk(),
            start_ww: self.start,
            stop_ww: self.stop,
            step: self.step,
            num_scans: self.num_scans,
            keep_on: u8::from(self.keep_on),
            bidirectional: u8::from(self.bidirectional),
            dwell_time_ms: self.dwell.as_millis() as u32,
            transition_time_ms: self.transition.as_millis() as u32,
        }
    }
}

/// Pacing of the scan loop; defaults are the reference deployment.
#[derive(Debug, Clone, Copy)]
pub struct ScanTiming {
    /// Head start given to the acquisition task before the step command.
    pub start_delay: Duration,
    /// Cadence of the progress/status/light polling.
    pub progress_poll: Duration,
    /// Window for the device to report scan-complete.
    pub step_timeout: Duration,
}

impl Default for ScanTiming {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_secs(5),
            progress_poll: Duration::from_millis(250),
            step_timeout: Duration::from_secs(30),
        }
    }
}

/// Environment readings sampled once per step.
#[derive(Debug, Clone, Default)]
pub struct ScanTelemetry {
    pub controller_temp_c: Vec<f32>,
    pub head_case_temp_c: Vec<f32>,
    pub pcb_humidity_pct: Vec<f32>,
}

/// Captured batches plus telemetry, all on one absolute timeline.
#[derive(Debug, Clone)]
pub struct StepScanOutcome {
    /// One batch per step, timestamps in seconds since the Unix epoch.
    pub batches: Vec<SampleBatch>,
    pub telemetry: ScanTelemetry,
    /// Wall-clock scan start in seconds since the Unix epoch.
    pub started_at: f64,
}

/// Drives a step scan against an emitting laser and a configured
/// lock-in channel.
pub struct StepScanner<'a, S: QclSdk, A: LockinApi + Sync> {
    driver: &'a mut QclDriver<S>,
    lockin: &'a LockinChannel<A>,
    config: ScanConfig,
    timing: ScanTiming,
}

impl<'a, S: QclSdk, A: LockinApi + Sync> StepScanner<'a, S, A> {
    pub fn new(
        driver: &'a mut QclDriver<S>,
        lockin: &'a LockinChannel<A>,
        config: ScanConfig,
    ) -> Self {
        Self {
            driver,
            lockin,
            config,
            timing: ScanTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: ScanTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Run `num_steps` scan steps and return the captured data.
    ///
    /// A step that fails to report completion within the step timeout
    /// fails the whole scan; there is no partial-step retry.
    pub fn run(&mut self, num_steps: usize) -> Result<StepScanOutcome, ScanError> {
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        log::info!("Tuning to scan start at {}", self.config.start);
        self.driver.tune(self.config.start)?;

        let mut batches = Vec::with_capacity(num_steps);
        let mut telemetry = ScanTelemetry::default();
        for step in 0..num_steps {
            log::info!("Scan step {}/{}", step + 1, num_steps);
            batches.push(self.run_step(step, &mut telemetry)?);
        }

        normalize_timeline(&mut batches, started_at);
        Ok(StepScanOutcome {
            batches,
            telemetry,
            started_at,
        })
    }

    /// One step: overlap acquisition with the step command and progress
    /// polling, then join the acquisition task at the step boundary.
    fn run_step(
        &mut self,
        step: usize,
        telemetry: &mut ScanTelemetry,
    ) -> Result<SampleBatch, ScanError> {
        let lockin = self.lockin;
        let driver = &mut *self.driver;
        let config = self.config;
        let timing = self.timing;

        thread::scope(|scope| {
            let acquisition = scope.spawn(move || lockin.acquire());
            thread::sleep(timing.start_delay);

            let sample = driver.system_telemetry()?;
            telemetry.controller_temp_c.push(sample.controller_temp_c);
            telemetry.head_case_temp_c.push(sample.head_case_temp_c);
            telemetry.pcb_humidity_pct.push(sample.pcb_humidity_pct);

            driver.write_scan(&config.into_wire())?;
            driver.start_scan(SIDEKICK_SDK_SCAN_START_STEP_MEASURE)?;

            let start = Instant::now();
            while driver.is_scanning()? {
                if start.elapsed() > timing.step_timeout {
                    return Err(ScanError::StepTimeout {
                        step,
                        timeout: timing.step_timeout,
                    });
                }
                let progress = driver.scan_progress()?;
                let light = driver.light_info()?;
                log::debug!(
                    "Scan {} at {}% (mask {:#04x}), light status {}, wavelength {}",
                    progress.scan_num,
                    progress.scan_percent,
                    progress.progress_mask,
                    light.light_status,
                    light.current_ww
                );
                thread::sleep(timing.progress_poll);
            }

            match acquisition.join() {
                Ok(batch) => Ok(batch?),
                Err(_) => Err(ScanError::AcquisitionPanicked),
            }
        })
    }
}

/// Express every batch on the wall-clock timeline of the scan start.
fn normalize_timeline(batches: &mut [SampleBatch], started_at: f64) {
    let Some(first) = batches.iter().find_map(SampleBatch::first_timestamp) else {
        return;
    };
    let offset = started_at - first;
    for batch in batches {
        batch.shift_time(offset);
    }
}
