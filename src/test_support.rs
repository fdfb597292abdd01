//! Scripted fakes for the two vendor boundaries, shared across the
//! module tests. Both implement the same capability traits as the
//! linked vendor clients.

use crate::action::{LaserDevice, LaserField};
use crate::lockin::{DemodSample, LockinApi, LockinError, PollPayload};
use crate::qcl_driver::{QclError, QclTimeouts};
use crate::sidekick_sdk::{
    DeviceHandle, LightInfo, QclParams, QclSdk, ScanProgress, SdkError, StatusWords,
    StepMeasureParams, SystemTelemetry,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Millisecond-scale timeouts so polling paths run in test time.
pub(crate) fn fast_timeouts() -> QclTimeouts {
    QclTimeouts {
        poll_interval: Duration::from_millis(1),
        set_params: Duration::from_millis(20),
        arm: Duration::from_millis(20),
        cool_tecs: Duration::from_millis(20),
        cool_tecs_settle: Duration::from_millis(1),
        turn_on: Duration::from_millis(10),
        turn_on_attempts: 3,
        firing_poll: Duration::from_millis(1),
        tune_settle: Duration::from_millis(1),
    }
}

/// Scripted laser SDK. Defaults describe a healthy controller that
/// arms, converges and fires on the first attempt.
pub(crate) struct FakeSdk {
    pub num_devices: u16,
    pub connected_index: Option<u16>,
    pub disconnected: bool,

    pub qcl_available: bool,
    pub interlock_set: bool,
    pub key_switch_set: bool,

    pub never_arm: bool,
    pub arm_requested: bool,

    pub emission_on: bool,
    pub turn_on_calls: u32,
    /// Attempt number on which the firing flag comes up; `None` never fires.
    pub fire_on_attempt: Option<u32>,

    pub never_temp_stable: bool,

    pub wire_params: QclParams,
    /// When false, the read-back never reflects writes.
    pub converge_params: bool,
    pub written_params: Vec<QclParams>,

    pub tuned_to: Vec<f32>,
    pub scan_params: Option<StepMeasureParams>,
    pub scan_operations: Vec<u8>,
    /// How many progress polls a started scan stays in-progress.
    pub scan_poll_count: u32,
    pub scanning_polls_remaining: u32,
    pub never_finish_scan: bool,

    pub telemetry_reads: u32,
}

impl FakeSdk {
    pub const HANDLE: u32 = 7;

    pub fn ready() -> Self {
        Self {
            num_devices: 1,
            connected_index: None,
            disconnected: false,
            qcl_available: true,
            interlock_set: true,
            key_switch_set: true,
            never_arm: false,
            arm_requested: false,
            emission_on: false,
            turn_on_calls: 0,
            fire_on_attempt: Some(1),
            never_temp_stable: false,
            wire_params: QclParams::default(),
            converge_params: true,
            written_params: Vec::new(),
            tuned_to: Vec::new(),
            scan_params: None,
            scan_operations: Vec::new(),
            scan_poll_count: 2,
            scanning_polls_remaining: 0,
            never_finish_scan: false,
            telemetry_reads: 0,
        }
    }
}

impl QclSdk for FakeSdk {
    fn search_for_usb_devices(&mut self) -> Result<(), SdkError> {
        Ok(())
    }

    fn num_devices(&mut self) -> Result<u16, SdkError> {
        Ok(self.num_devices)
    }

    fn connect_to_device(&mut self, index: u16) -> Result<DeviceHandle, SdkError> {
        self.connected_index = Some(index);
        Ok(DeviceHandle(Self::HANDLE))
    }

    fn disconnect(&mut self, _handle: DeviceHandle) -> Result<(), SdkError> {
        self.disconnected = true;
        Ok(())
    }

    fn read_admin_qcl_params(&mut self, _handle: DeviceHandle) -> Result<(), SdkError> {
        Ok(())
    }

    fn is_qcl_available(&mut self, _handle: DeviceHandle) -> Result<bool, SdkError> {
        Ok(self.qcl_available)
    }

    fn is_interlock_set(&mut self, _handle: DeviceHandle) -> Result<bool, SdkError> {
        Ok(self.interlock_set)
    }

    fn is_key_switch_set(&mut self, _handle: DeviceHandle) -> Result<bool, SdkError> {
        Ok(self.key_switch_set)
    }

    fn read_info_status_mask(&mut self, _handle: DeviceHandle) -> Result<(), SdkError> {
        Ok(())
    }

    fn is_laser_armed(&mut self, _handle: DeviceHandle) -> Result<bool, SdkError> {
        Ok(self.arm_requested && !self.never_arm)
    }

    fn is_laser_firing(&mut self, _handle: DeviceHandle) -> Result<bool, SdkError> {
        Ok(self.emission_on
            && self
                .fire_on_attempt
                .is_some_and(|attempt| self.turn_on_calls >= attempt))
    }

    fn is_temp_stable(&mut self, _handle: DeviceHandle) -> Result<bool, SdkError> {
        Ok(!self.never_temp_stable)
    }

    fn is_scan_in_progress(&mut self, _handle: DeviceHandle) -> Result<bool, SdkError> {
        if self.never_finish_scan {
            return Ok(true);
        }
        if self.scanning_polls_remaining > 0 {
            self.scanning_polls_remaining -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn set_arm(&mut self, _handle: DeviceHandle, arm: bool) -> Result<(), SdkError> {
        self.arm_requested = arm;
        Ok(())
    }

    fn set_emission(&mut self, _handle: DeviceHandle, on: bool) -> Result<(), SdkError> {
        self.emission_on = on;
        if on {
            self.turn_on_calls += 1;
        }
        Ok(())
    }

    fn read_qcl_params(&mut self, _handle: DeviceHandle) -> Result<QclParams, SdkError> {
        Ok(self.wire_params)
    }

    fn write_qcl_params(
        &mut self,
        _handle: DeviceHandle,
        params: &QclParams,
    ) -> Result<(), SdkError> {
        self.written_params.push(*params);
        if self.converge_params {
            self.wire_params = *params;
        }
        Ok(())
    }

    fn status_words(&mut self, _handle: DeviceHandle) -> Result<StatusWords, SdkError> {
        Ok(StatusWords::default())
    }

    fn tune_to_wavelength(
        &mut self,
        _handle: DeviceHandle,
        _unit: u8,
        wavelength: f32,
    ) -> Result<(), SdkError> {
        self.tuned_to.push(wavelength);
        Ok(())
    }

    fn write_scan_params(
        &mut self,
        _handle: DeviceHandle,
        params: &StepMeasureParams,
    ) -> Result<(), SdkError> {
        self.scan_params = Some(*params);
        Ok(())
    }

    fn execute_scan_operation(
        &mut self,
        _handle: DeviceHandle,
        operation: u8,
    ) -> Result<(), SdkError> {
        self.scan_operations.push(operation);
        self.scanning_polls_remaining = self.scan_poll_count;
        Ok(())
    }

    fn scan_progress(&mut self, _handle: DeviceHandle) -> Result<ScanProgress, SdkError> {
        Ok(ScanProgress::default())
    }

    fn light_info(&mut self, _handle: DeviceHandle) -> Result<LightInfo, SdkError> {
        Ok(LightInfo::default())
    }

    fn system_telemetry(&mut self, _handle: DeviceHandle) -> Result<SystemTelemetry, SdkError> {
        self.telemetry_reads += 1;
        Ok(SystemTelemetry {
            controller_temp_c: 30.0,
            head_case_temp_c: 28.5,
            aux_temp_c: 0.0,
            pcb_humidity_pct: 12.0,
            head_humidity_pct: 0.0,
        })
    }
}

/// Scripted lock-in data server with one device and one canned demod
/// window. Interior mutability keeps the trait's `&self` contract.
pub(crate) struct FakeLockin {
    pub device: String,
    pub devtype_str: String,
    pub options_str: String,
    pub clockbase: i64,
    pub sample: Option<DemodSample>,
    pub int_props: Mutex<HashMap<String, i64>>,
    pub double_props: Mutex<HashMap<String, f64>>,
    pub subscriptions: Mutex<Vec<String>>,
    pub unsubscribed: Mutex<Vec<String>>,
    pub syncs: Mutex<u32>,
}

impl FakeLockin {
    /// No demod payload at all; polls come back empty.
    pub fn silent() -> Self {
        Self {
            device: "dev3097".to_string(),
            devtype_str: "MFLI".to_string(),
            options_str: "MF".to_string(),
            clockbase: 60,
            sample: None,
            int_props: Mutex::new(HashMap::new()),
            double_props: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
            unsubscribed: Mutex::new(Vec::new()),
            syncs: Mutex::new(0),
        }
    }

    /// A ramp of `n` samples: x = 1..=n, y = 0, one tick-second apart.
    pub fn with_ramp(n: usize) -> Self {
        let sample = DemodSample {
            x: (1..=n).map(|i| i as f64).collect(),
            y: vec![0.0; n],
            timestamp: (1..=n).map(|i| 60 * i as u64).collect(),
            dataloss: false,
        };
        Self {
            sample: Some(sample),
            ..Self::silent()
        }
    }

    pub fn devtype(mut self, devtype: &str) -> Self {
        self.devtype_str = devtype.to_string();
        self
    }

    pub fn options(mut self, options: &str) -> Self {
        self.options_str = options.to_string();
        self
    }
}

impl LockinApi for FakeLockin {
    fn detect_device(&self) -> Result<String, LockinError> {
        Ok(self.device.clone())
    }

    fn get_byte(&self, path: &str) -> Result<String, LockinError> {
        if path.ends_with("features/devtype") {
            Ok(self.devtype_str.clone())
        } else if path.ends_with("features/options") {
            Ok(self.options_str.clone())
        } else {
            Ok(String::new())
        }
    }

    fn get_int(&self, path: &str) -> Result<i64, LockinError> {
        if path.ends_with("clockbase") {
            return Ok(self.clockbase);
        }
        Ok(self
            .int_props
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0))
    }

    fn set_int(&self, path: &str, value: i64) -> Result<(), LockinError> {
        self.int_props.lock().unwrap().insert(path.to_string(), value);
        Ok(())
    }

    fn set_double(&self, path: &str, value: f64) -> Result<(), LockinError> {
        self.double_props
            .lock()
            .unwrap()
            .insert(path.to_string(), value);
        Ok(())
    }

    fn subscribe(&self, path: &str) -> Result<(), LockinError> {
        self.subscriptions.lock().unwrap().push(path.to_string());
        Ok(())
    }

    fn unsubscribe(&self, path: &str) -> Result<(), LockinError> {
        self.unsubscribed.lock().unwrap().push(path.to_string());
        Ok(())
    }

    fn sync(&self) -> Result<(), LockinError> {
        *self.syncs.lock().unwrap() += 1;
        Ok(())
    }

    fn poll(&self, _length: Duration, _timeout: Duration) -> Result<PollPayload, LockinError> {
        let mut payload = PollPayload::default();
        if let Some(sample) = &self.sample {
            for path in self.subscriptions.lock().unwrap().iter() {
                if path.ends_with("/sample") {
                    payload.insert_demod_sample(path.clone(), sample.clone());
                }
            }
        }
        Ok(payload)
    }
}

/// Recording device for scheduler tests.
#[derive(Default)]
pub(crate) struct FakeDevice {
    pub writes: Vec<(&'static str, f64)>,
    pub shutdowns: u32,
    pub fail_on: Option<LaserField>,
}

impl LaserDevice for FakeDevice {
    fn apply_field(&mut self, field: LaserField, value: f64) -> Result<(), QclError> {
        if self.fail_on == Some(field) {
            return Err(QclError::NotConnected);
        }
        self.writes.push((field.name(), value));
        Ok(())
    }

    fn shut_down(&mut self) -> Result<(), QclError> {
        self.shutdowns += 1;
        Ok(())
    }
}
