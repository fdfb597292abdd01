use crate::action::{LaserDevice, LaserField};
use crate::qcl_connector::{ConnectError, QclConnector};
use crate::sidekick_sdk::{
    DeviceHandle, LightInfo, QclSdk, ScanProgress, SdkError, StepMeasureParams, SystemTelemetry,
    SIDEKICK_SDK_UNITS_CM1,
};
use std::ops::RangeInclusive;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum QclError {
    #[error("Connection error: {0}")]
    Connect(#[from] ConnectError),

    #[error("SDK error: {0}")]
    Sdk(#[from] SdkError),

    #[error("Not connected to a laser controller")]
    NotConnected,

    #[error("QCL parameters not confirmed by read-back within {timeout:?}")]
    ParameterTimeout { timeout: Duration },

    #[error("TECs failed to stabilize within {timeout:?}")]
    ThermalTimeout { timeout: Duration },

    #[error("Laser failed to arm within {timeout:?}")]
    ArmTimeout { timeout: Duration },

    #[error("Laser failed to start emitting after {attempts} attempt(s)")]
    EmissionFailed { attempts: u32 },

    #[error("{field} value {value} outside safe range {min}..={max}")]
    FieldOutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Emission state of the head, tracked by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmissionState {
    Disarmed,
    Armed,
    Firing,
    Off,
}

/// Requested pulse train and chip temperature.
///
/// Mode fields and source voltage ride along on the wire block
/// ([`crate::sidekick_sdk::QclParams`]) and round-trip unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QclParameterSet {
    pub pulse_rate_hz: u32,
    pub pulse_width_ns: u32,
    pub current_ma: u16,
    pub temperature_c: f32,
}

impl Default for QclParameterSet {
    fn default() -> Self {
        Self {
            pulse_rate_hz: 100_000,
            pulse_width_ns: 500,
            current_ma: 1500,
            temperature_c: 17.0,
        }
    }
}

/// Timing knobs for every bounded wait in the bring-up sequence.
///
/// Defaults are the reference deployment values; tests shrink them.
#[derive(Debug, Clone, Copy)]
pub struct QclTimeouts {
    /// Interval between status polls.
    pub poll_interval: Duration,
    /// Window for the parameter read-back to converge.
    pub set_params: Duration,
    /// Window for the armed flag to come up.
    pub arm: Duration,
    /// Window for the TECs to reach temperature.
    pub cool_tecs: Duration,
    /// Extra settle after the temperature flag comes up, to mask a
    /// reported-but-not-yet-stable thermal lock.
    pub cool_tecs_settle: Duration,
    /// Per-attempt window for the firing flag to come up.
    pub turn_on: Duration,
    /// Full on/confirm cycles before giving up.
    pub turn_on_attempts: u32,
    /// Wait between firing-flag polls.
    pub firing_poll: Duration,
    /// Settle after a tune command.
    pub tune_settle: Duration,
}

impl Default for QclTimeouts {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            set_params: Duration::from_secs(5),
            arm: Duration::from_secs(20),
            cool_tecs: Duration::from_secs(60),
            cool_tecs_settle: Duration::from_secs(10),
            turn_on: Duration::from_secs(30),
            turn_on_attempts: 3,
            firing_poll: Duration::from_secs(5),
            tune_settle: Duration::from_secs(5),
        }
    }
}

/// Safe operating ranges for the single-field setter.
#[derive(Debug, Clone)]
pub struct FieldLimits {
    pub wavelength: RangeInclusive<f64>,
    pub current_ma: RangeInclusive<f64>,
    pub pulse_width_ns: RangeInclusive<f64>,
    pub pulse_rate_hz: RangeInclusive<f64>,
}

impl Default for FieldLimits {
    fn default() -> Self {
        Self {
            wavelength: 980.0..=1245.0,
            current_ma: 1200.0..=1600.0,
            pulse_width_ns: 100.0..=2500.0,
            pulse_rate_hz: 10_000.0..=150_000.0,
        }
    }
}

impl FieldLimits {
    fn range(&self, field: LaserField) -> &RangeInclusive<f64> {
        match field {
            LaserField::Wavelength => &self.wavelength,
            LaserField::Current => &self.current_ma,
            LaserField::PulseWidth => &self.pulse_width_ns,
            LaserField::PulseRate => &self.pulse_rate_hz,
        }
    }
}

/// Bring-up and control state machine for the laser head.
///
/// Owns the SDK session and the device handle. The sequence is
/// connect → arm → set parameters → cool TECs → turn on; any stage
/// failure runs [`turn_off`] once and returns the original error.
///
/// [`turn_off`]: QclDriver::turn_off
pub struct QclDriver<S: QclSdk> {
    sdk: S,
    handle: Option<DeviceHandle>,
    state: EmissionState,
    params: QclParameterSet,
    wavelength_unit: u8,
    timeouts: QclTimeouts,
    limits: FieldLimits,
}

impl<S: QclSdk> QclDriver<S> {
    pub fn new(sdk: S) -> Self {
        Self {
            sdk,
            handle: None,
            state: EmissionState::Disarmed,
            params: QclParameterSet::default(),
            wavelength_unit: SIDEKICK_SDK_UNITS_CM1,
            timeouts: QclTimeouts::default(),
            limits: FieldLimits::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: QclTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_limits(mut self, limits: FieldLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn state(&self) -> EmissionState {
        self.state
    }

    /// Last parameter set confirmed by read-back.
    pub fn params(&self) -> &QclParameterSet {
        &self.params
    }

    fn handle(&self) -> Result<DeviceHandle, QclError> {
        self.handle.ok_or(QclError::NotConnected)
    }

    #[cfg(test)]
    pub(crate) fn sdk_ref(&self) -> &S {
        &self.sdk
    }

    /// Run the full bring-up sequence to a ready emitting state.
    ///
    /// Any stage error shuts the laser down before propagating.
    pub fn bring_up(&mut self, params: QclParameterSet) -> Result<(), QclError> {
        let result = self.bring_up_stages(params);
        if let Err(ref e) = result {
            log::warn!("Bring-up failed ({e}); shutting the laser down");
            self.turn_off();
        }
        result
    }

    fn bring_up_stages(&mut self, params: QclParameterSet) -> Result<(), QclError> {
        self.connect()?;
        self.arm()?;
        self.set_params(params)?;
        self.cool_tecs()?;
        self.turn_on()
    }

    /// Connect to the controller over USB and validate the handshake.
    pub fn connect(&mut self) -> Result<(), QclError> {
        let handle = QclConnector::connect(&mut self.sdk)?;
        self.handle = Some(handle);
        self.state = EmissionState::Disarmed;
        Ok(())
    }

    /// Arm the head and wait for the armed flag.
    pub fn arm(&mut self) -> Result<(), QclError> {
        let handle = self.handle()?;
        self.sdk.set_arm(handle, true)?;
        self.sdk.read_info_status_mask(handle)?;
        let start = Instant::now();
        while !self.sdk.is_laser_armed(handle)? {
            if start.elapsed() > self.timeouts.arm {
                return Err(QclError::ArmTimeout {
                    timeout: self.timeouts.arm,
                });
            }
            thread::sleep(self.timeouts.poll_interval);
            self.sdk.read_info_status_mask(handle)?;
        }
        self.state = EmissionState::Armed;
        log::info!("Laser armed");
        Ok(())
    }

    /// Write the parameter block and wait for the read-back to confirm it.
    ///
    /// The write is issued once; only its confirmation is bounded. On
    /// timeout the write stays issued and [`QclError::ParameterTimeout`]
    /// is returned.
    pub fn set_params(&mut self, requested: QclParameterSet) -> Result<(), QclError> {
        let handle = self.handle()?;
        let mut wire = self.sdk.read_qcl_params(handle)?;
        wire.pulse_rate_hz = requested.pulse_rate_hz;
        wire.pulse_width_ns = requested.pulse_width_ns;
        wire.current_ma = requested.current_ma;
        wire.temp_c = requested.temperature_c;
        self.sdk.write_qcl_params(handle, &wire)?;

        let start = Instant::now();
        loop {
            let readback = self.sdk.read_qcl_params(handle)?;
            if Self::converged(&readback, &requested) {
                self.params = requested;
                log::info!(
                    "QCL parameters confirmed: {} Hz, {} ns, {} mA, {} C",
                    requested.pulse_rate_hz,
                    requested.pulse_width_ns,
                    requested.current_ma,
                    requested.temperature_c
                );
                return Ok(());
            }
            if start.elapsed() > self.timeouts.set_params {
                return Err(QclError::ParameterTimeout {
                    timeout: self.timeouts.set_params,
                });
            }
            thread::sleep(self.timeouts.poll_interval);
        }
    }

    // The device either accepts an exact value or reports a supported
    // one, so equality is exact.
    #[allow(clippy::float_cmp)]
    fn converged(readback: &crate::sidekick_sdk::QclParams, requested: &QclParameterSet) -> bool {
        readback.pulse_rate_hz == requested.pulse_rate_hz
            && readback.pulse_width_ns == requested.pulse_width_ns
            && readback.current_ma == requested.current_ma
            && readback.temp_c == requested.temperature_c
    }

    /// Wait for the TECs to reach temperature, then settle.
    pub fn cool_tecs(&mut self) -> Result<(), QclError> {
        let handle = self.handle()?;
        self.sdk.read_info_status_mask(handle)?;
        let start = Instant::now();
        while !self.sdk.is_temp_stable(handle)? {
            if start.elapsed() > self.timeouts.cool_tecs {
                return Err(QclError::ThermalTimeout {
                    timeout: self.timeouts.cool_tecs,
                });
            }
            thread::sleep(self.timeouts.poll_interval);
            self.sdk.read_info_status_mask(handle)?;
        }
        thread::sleep(self.timeouts.cool_tecs_settle);
        log::info!("TECs at temperature");
        Ok(())
    }

    /// Start emission, retrying the full on/confirm cycle up to the
    /// configured attempt budget.
    pub fn turn_on(&mut self) -> Result<(), QclError> {
        let handle = self.handle()?;
        let mut attempts = 0;
        while attempts < self.timeouts.turn_on_attempts {
            attempts += 1;
            self.sdk.set_emission(handle, true)?;
            self.sdk.read_info_status_mask(handle)?;
            log::info!("Turn on attempt {attempts}");

            let start = Instant::now();
            let mut firing = self.sdk.is_laser_firing(handle)?;
            while !firing {
                if start.elapsed() > self.timeouts.turn_on {
                    break;
                }
                thread::sleep(self.timeouts.firing_poll);
                firing = self.sdk.is_laser_firing(handle)?;
            }

            let words = self.sdk.status_words(handle)?;
            log::debug!(
                "Status word {:#010x}, error word {:#06x}, warning word {:#06x}",
                words.status,
                words.error,
                words.warning
            );

            if firing {
                self.state = EmissionState::Firing;
                log::info!("Laser is emitting");
                return Ok(());
            }
        }
        Err(QclError::EmissionFailed { attempts })
    }

    /// Unconditional shutdown: emission off, disarm, disconnect.
    ///
    /// The designated cleanup path; SDK errors here are logged, never
    /// raised, so a failing bring-up stage keeps its original error.
    pub fn turn_off(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.sdk.set_emission(handle, false) {
                log::warn!("Emission off during shutdown failed: {e}");
            }
            if let Err(e) = self.sdk.set_arm(handle, false) {
                log::warn!("Disarm during shutdown failed: {e}");
            }
            if let Err(e) = self.sdk.disconnect(handle) {
                log::warn!("Disconnect during shutdown failed: {e}");
            }
            log::info!("Laser off");
        }
        self.state = EmissionState::Off;
    }

    /// Tune to a wavelength in the driver's unit, then settle.
    pub fn tune(&mut self, wavelength: f32) -> Result<(), QclError> {
        let handle = self.handle()?;
        self.sdk
            .tune_to_wavelength(handle, self.wavelength_unit, wavelength)?;
        log::debug!("Tuning to {wavelength}");
        thread::sleep(self.timeouts.tune_settle);
        Ok(())
    }

    pub fn write_scan(&mut self, params: &StepMeasureParams) -> Result<(), QclError> {
        let handle = self.handle()?;
        self.sdk.write_scan_params(handle, params)?;
        Ok(())
    }

    pub fn start_scan(&mut self, operation: u8) -> Result<(), QclError> {
        let handle = self.handle()?;
        self.sdk.execute_scan_operation(handle, operation)?;
        Ok(())
    }

    pub fn is_scanning(&mut self) -> Result<bool, QclError> {
        let handle = self.handle()?;
        self.sdk.read_info_status_mask(handle)?;
        Ok(self.sdk.is_scan_in_progress(handle)?)
    }

    pub fn scan_progress(&mut self) -> Result<ScanProgress, QclError> {
        let handle = self.handle()?;
        Ok(self.sdk.scan_progress(handle)?)
    }

    pub fn light_info(&mut self) -> Result<LightInfo, QclError> {
        let handle = self.handle()?;
        Ok(self.sdk.light_info(handle)?)
    }

    pub fn system_telemetry(&mut self) -> Result<SystemTelemetry, QclError> {
        let handle = self.handle()?;
        Ok(self.sdk.system_telemetry(handle)?)
    }

    fn check_limit(&self, field: LaserField, value: f64) -> Result<(), QclError> {
        let range = self.limits.range(field);
        if range.contains(&value) {
            Ok(())
        } else {
            Err(QclError::FieldOutOfRange {
                field: field.name(),
                value,
                min: *range.start(),
                max: *range.end(),
            })
        }
    }
}

impl<S: QclSdk> LaserDevice for QclDriver<S> {
    /// Safety-limited single-field setter used by scheduled actions.
    fn apply_field(&mut self, field: LaserField, value: f64) -> Result<(), QclError> {
        self.check_limit(field, value)?;
        match field {
            LaserField::Wavelength => self.tune(value as f32),
            LaserField::PulseWidth => {
                let mut params = self.params;
                params.pulse_width_ns = value as u32;
                self.set_params(params)
            }
            LaserField::PulseRate => {
                let mut params = self.params;
                params.pulse_rate_hz = value as u32;
                self.set_params(params)
            }
            LaserField::Current => {
                let mut params = self.params;
                params.current_ma = value as u16;
                self.set_params(params)
            }
        }
    }

    fn shut_down(&mut self) -> Result<(), QclError> {
        self.turn_off();
        Ok(())
    }
}
