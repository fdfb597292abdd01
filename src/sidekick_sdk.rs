//! Capability boundary to the vendor's SideKick SDK.
//!
//! The SDK is a C library; every call returns a status code compared
//! against [`SIDEKICK_SDK_RET_SUCCESS`] or fills an out-parameter by
//! reference. The [`QclSdk`] trait captures the call set the rest of the
//! crate needs, so controllers are written against the trait and tests
//! substitute a scripted fake. The linked implementation
//! ([`SidekickSdk`]) is only compiled with the `vendor-sdk` feature.

/// The single success value returned by every SDK call.
pub const SIDEKICK_SDK_RET_SUCCESS: u32 = 0;

/// Wavelength unit code for inverse centimeters (wavenumber).
pub const SIDEKICK_SDK_UNITS_CM1: u8 = 2;

/// Wavelength unit code for microns.
pub const SIDEKICK_SDK_UNITS_MICRON: u8 = 1;

/// Scan operation code for a step-and-measure scan.
pub const SIDEKICK_SDK_SCAN_START_STEP_MEASURE: u8 = 7;

/// Opaque device handle issued by the SDK on connect.
///
/// Only valid between a successful connect and the matching disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHandle(pub(crate) u32);

impl DeviceHandle {
    pub fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    #[error("SDK call {function} failed with status {code}")]
    Call { function: &'static str, code: u32 },
}

/// QCL parameter block as read from / written to the controller.
///
/// `slot`, `laser_mode`, `pulse_mode` and `vsrc` are round-tripped
/// untouched on writes that only change the pulse train.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QclParams {
    pub slot: u8,
    pub pulse_rate_hz: u32,
    pub pulse_width_ns: u32,
    pub current_ma: u16,
    pub temp_c: f32,
    pub laser_mode: u8,
    pub pulse_mode: u8,
    pub vsrc: f32,
}

/// Status, error and warning words reported by the controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusWords {
    pub status: u32,
    pub error: u16,
    pub warning: u16,
}

/// Wire parameters of a step-and-measure scan.
#[derive(Debug, Clone, Copy)]
pub struct StepMeasureParams {
    pub unit: u8,
    pub start_ww: f32,
    pub stop_ww: f32,
    pub step: f32,
    pub num_scans: u16,
    pub keep_on: u8,
    pub bidirectional: u8,
    pub dwell_time_ms: u32,
    pub transition_time_ms: u32,
}

/// Progress of a running scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanProgress {
    pub progress_mask: u8,
    pub scan_num: u16,
    pub scan_percent: u16,
}

/// Emission and tuning state of the optical head.
#[derive(Debug, Clone, Copy, Default)]
pub struct LightInfo {
    pub light_status: u8,
    pub current_ww: f32,
    pub units: u8,
    pub current_qcl: u8,
}

/// One-shot sample of the controller's temperature and humidity sensors.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTelemetry {
    pub controller_temp_c: f32,
    pub head_case_temp_c: f32,
    pub aux_temp_c: f32,
    pub pcb_humidity_pct: f32,
    pub head_humidity_pct: f32,
}

/// Call set this crate needs from the SideKick SDK.
///
/// Set/exec and read/get pairs of the C API are folded into single
/// operations; implementations issue both underlying calls.
pub trait QclSdk {
    fn search_for_usb_devices(&mut self) -> Result<(), SdkError>;
    fn num_devices(&mut self) -> Result<u16, SdkError>;
    fn connect_to_device(&mut self, index: u16) -> Result<DeviceHandle, SdkError>;
    fn disconnect(&mut self, handle: DeviceHandle) -> Result<(), SdkError>;

    fn read_admin_qcl_params(&mut self, handle: DeviceHandle) -> Result<(), SdkError>;
    fn is_qcl_available(&mut self, handle: DeviceHandle) -> Result<bool, SdkError>;
    fn is_interlock_set(&mut self, handle: DeviceHandle) -> Result<bool, SdkError>;
    fn is_key_switch_set(&mut self, handle: DeviceHandle) -> Result<bool, SdkError>;

    /// Refresh the cached info/status mask the `is_*` flags read from.
    fn read_info_status_mask(&mut self, handle: DeviceHandle) -> Result<(), SdkError>;
    fn is_laser_armed(&mut self, handle: DeviceHandle) -> Result<bool, SdkError>;
    fn is_laser_firing(&mut self, handle: DeviceHandle) -> Result<bool, SdkError>;
    fn is_temp_stable(&mut self, handle: DeviceHandle) -> Result<bool, SdkError>;
    fn is_scan_in_progress(&mut self, handle: DeviceHandle) -> Result<bool, SdkError>;

    fn set_arm(&mut self, handle: DeviceHandle, arm: bool) -> Result<(), SdkError>;
    fn set_emission(&mut self, handle: DeviceHandle, on: bool) -> Result<(), SdkError>;

    fn read_qcl_params(&mut self, handle: DeviceHandle) -> Result<QclParams, SdkError>;
    fn write_qcl_params(&mut self, handle: DeviceHandle, params: &QclParams)
        -> Result<(), SdkError>;
    fn status_words(&mut self, handle: DeviceHandle) -> Result<StatusWords, SdkError>;

    fn tune_to_wavelength(
        &mut self,
        handle: DeviceHandle,
        unit: u8,
        wavelength: f32,
    ) -> Result<(), SdkError>;
    fn write_scan_params(
        &mut self,
        handle: DeviceHandle,
        params: &StepMeasureParams,
    ) -> Result<(), SdkError>;
    fn execute_scan_operation(&mut self, handle: DeviceHandle, operation: u8)
        -> Result<(), SdkError>;
    fn scan_progress(&mut self, handle: DeviceHandle) -> Result<ScanProgress, SdkError>;
    fn light_info(&mut self, handle: DeviceHandle) -> Result<LightInfo, SdkError>;
    fn system_telemetry(&mut self, handle: DeviceHandle) -> Result<SystemTelemetry, SdkError>;
}

#[cfg(feature = "vendor-sdk")]
pub use linked::SidekickSdk;

#[cfg(feature = "vendor-sdk")]
#[allow(unsafe_code, non_snake_case)]
mod linked {
    use super::{
        DeviceHandle, LightInfo, QclParams, QclSdk, ScanProgress, SdkError, StatusWords,
        StepMeasureParams, SIDEKICK_SDK_RET_SUCCESS,
    };

    #[link(name = "SidekickSDK")]
    extern "C" {
        fn SidekickSDK_Initialize() -> u32;
        fn SidekickSDK_SearchForUsbDevices() -> u32;
        fn SidekickSDK_GetNumOfDevices(num_devices: *mut u16) -> u32;
        fn SidekickSDK_ConnectToDeviceNumber(handle: *mut u32, device_num: u16) -> u32;
        fn SidekickSDK_Disconnect(handle: u32) -> u32;
        fn SidekickSDK_ReadAdminQclParams(handle: u32, slot: u8) -> u32;
        fn SidekickSDK_AdminQclIsAvailable(handle: u32, available: *mut bool) -> u32;
        fn SidekickSDK_isInterlockedStatusSet(handle: u32, set: *mut bool) -> u32;
        fn SidekickSDK_isKeySwitchStatusSet(handle: u32, set: *mut bool) -> u32;
        fn SidekickSDK_ReadInfoStatusMask(handle: u32) -> u32;
        fn SidekickSDK_isLaserArmed(handle: u32, armed: *mut bool) -> u32;
        fn SidekickSDK_isLaserFiring(handle: u32, firing: *mut bool) -> u32;
        fn SidekickSDK_isTempStatusSet(handle: u32, set: *mut bool) -> u32;
        fn SidekickSDK_isScanningSet(handle: u32, scanning: *mut bool) -> u32;
        fn SidekickSDK_SetLaserArmDisarm(handle: u32, arm: bool) -> u32;
        fn SidekickSDK_ExecLaserArmDisarm(handle: u32) -> u32;
        fn SidekickSDK_SetLaserOnOff(handle: u32, qcl: u8, on: bool) -> u32;
        fn SidekickSDK_ExecLaserOnOff(handle: u32) -> u32;
        fn SidekickSDK_ReadStatusMask(
            handle: u32,
            status_word: *mut u32,
            error_word: *mut u16,
            warning_word: *mut u16,
        ) -> u32;
        fn SidekickSDK_ReadWriteLaserQclParams(handle: u32, write: bool, slot: u8) -> u32;
        fn SidekickSDK_GetLaserQclParams(
            handle: u32,
            slot: *mut u8,
            pulse_rate_hz: *mut u32,
            pulse_width_ns: *mut u32,
            current_ma: *mut u16,
            temp_c: *mut f32,
            laser_mode: *mut u8,
            pulse_mode: *mut u8,
            vsrc: *mut f32,
        ) -> u32;
        fn SidekickSDK_SetLaserQclParams(
            handle: u32,
            slot: u8,
            pulse_rate_hz: u32,
            pulse_width_ns: u32,
            current_ma: u16,
            temp_c: f32,
            laser_mode: u8,
            pulse_mode: u8,
            vsrc: f32,
        ) -> u32;
        fn SidekickSDK_SetTuneToWW(handle: u32, units: u8, wavelength: f32, qcl: u8) -> u32;
        fn SidekickSDK_ExecTuneToWW(handle: u32) -> u32;
        fn SidekickSDK_SetStepMeasureParams(
            handle: u32,
            units: u8,
            start_ww: f32,
            stop_ww: f32,
            step: f32,
            num_scans: u16,
            keep_on: u8,
            bidirectional: u8,
            dwell_time_ms: u32,
            transition_time_ms: u32,
        ) -> u32;
        fn SidekickSDK_ReadWriteStepMeasureParams(handle: u32, write: bool) -> u32;
        fn SidekickSDK_SetScanOperation(handle: u32, operation: u8) -> u32;
        fn SidekickSDK_ExecuteScanOperation(handle: u32) -> u32;
        fn SidekickSDK_ReadScanProgress(handle: u32) -> u32;
        fn SidekickSDK_GetScanProgress(
            handle: u32,
            progress_mask: *mut u8,
            scan_num: *mut u16,
            scan_percent: *mut u16,
        ) -> u32;
        fn SidekickSDK_ReadInfoLight(handle: u32) -> u32;
        fn SidekickSDK_GetInfoLight(
            handle: u32,
            light_status: *mut u8,
            current_ww: *mut f32,
            units: *mut u8,
            current_qcl: *mut u8,
        ) -> u32;
        fn SidekickSDK_ReadInfoSysTemperatures(handle: u32) -> u32;
        fn SidekickSDK_GetInfoSysTemperatures(
            handle: u32,
            temp1_c: *mut f32,
            temp2_c: *mut f32,
            temp3_c: *mut f32,
            humidity1_pct: *mut f32,
            humidity2_pct: *mut f32,
            aux_temp1_c: *mut f32,
            aux_temp2_c: *mut f32,
        ) -> u32;
    }

    fn check(function: &'static str, code: u32) -> Result<(), SdkError> {
        if code == SIDEKICK_SDK_RET_SUCCESS {
            Ok(())
        } else {
            Err(SdkError::Call { function, code })
        }
    }

    /// Linked SDK session. Constructing it runs the SDK's global
    /// initialization; the library stays loaded for process lifetime.
    pub struct SidekickSdk {
        _private: (),
    }

    impl SidekickSdk {
        pub fn open() -> Result<Self, SdkError> {
            check("SidekickSDK_Initialize", unsafe { SidekickSDK_Initialize() })?;
            log::debug!("SideKick SDK initialized");
            Ok(Self { _private: () })
        }
    }

    impl QclSdk for SidekickSdk {
        fn search_for_usb_devices(&mut self) -> Result<(), SdkError> {
            check("SidekickSDK_SearchForUsbDevices", unsafe {
                SidekickSDK_SearchForUsbDevices()
            })
        }

        fn num_devices(&mut self) -> Result<u16, SdkError> {
            let mut num = 0u16;
            check("SidekickSDK_GetNumOfDevices", unsafe {
                SidekickSDK_GetNumOfDevices(&mut num)
            })?;
            Ok(num)
        }

        fn connect_to_device(&mut self, index: u16) -> Result<DeviceHandle, SdkError> {
            let mut handle = 0u32;
            check("SidekickSDK_ConnectToDeviceNumber", unsafe {
                SidekickSDK_ConnectToDeviceNumber(&mut handle, index)
            })?;
            Ok(DeviceHandle(handle))
        }

        fn disconnect(&mut self, handle: DeviceHandle) -> Result<(), SdkError> {
            check("SidekickSDK_Disconnect", unsafe {
                SidekickSDK_Disconnect(handle.0)
            })
        }

        fn read_admin_qcl_params(&mut self, handle: DeviceHandle) -> Result<(), SdkError> {
            check("SidekickSDK_ReadAdminQclParams", unsafe {
                SidekickSDK_ReadAdminQclParams(handle.0, 0)
            })
        }

        fn is_qcl_available(&mut self, handle: DeviceHandle) -> Result<bool, SdkError> {
            let mut flag = false;
            check("SidekickSDK_AdminQclIsAvailable", unsafe {
                SidekickSDK_AdminQclIsAvailable(handle.0, &mut flag)
            })?;
            Ok(flag)
        }

        fn is_interlock_set(&mut self, handle: DeviceHandle) -> Result<bool, SdkError> {
            let mut flag = false;
            check("SidekickSDK_isInterlockedStatusSet", unsafe {
                SidekickSDK_isInterlockedStatusSet(handle.0, &mut flag)
            })?;
            Ok(flag)
        }

        fn is_key_switch_set(&mut self, handle: DeviceHandle) -> Result<bool, SdkError> {
            let mut flag = false;
            check("SidekickSDK_isKeySwitchStatusSet", unsafe {
                SidekickSDK_isKeySwitchStatusSet(handle.0, &mut flag)
            })?;
            Ok(flag)
        }

        fn read_info_status_mask(&mut self, handle: DeviceHandle) -> Result<(), SdkError> {
            check("SidekickSDK_ReadInfoStatusMask", unsafe {
                SidekickSDK_ReadInfoStatusMask(handle.0)
            })
        }

        fn is_laser_armed(&mut self, handle: DeviceHandle) -> Result<bool, SdkError> {
            let mut flag = false;
            check("SidekickSDK_isLaserArmed", unsafe {
                SidekickSDK_isLaserArmed(handle.0, &mut flag)
            })?;
            Ok(flag)
        }

        fn is_laser_firing(&mut self, handle: DeviceHandle) -> Result<bool, SdkError> {
            let mut flag = false;
            check("SidekickSDK_isLaserFiring", unsafe {
                SidekickSDK_isLaserFiring(handle.0, &mut flag)
            })?;
            Ok(flag)
        }

        fn is_temp_stable(&mut self, handle: DeviceHandle) -> Result<bool, SdkError> {
            let mut flag = false;
            check("SidekickSDK_isTempStatusSet", unsafe {
                SidekickSDK_isTempStatusSet(handle.0, &mut flag)
            })?;
            Ok(flag)
        }

        fn is_scan_in_progress(&mut self, handle: DeviceHandle) -> Result<bool, SdkError> {
            let mut flag = false;
            check("SidekickSDK_isScanningSet", unsafe {
                SidekickSDK_isScanningSet(handle.0, &mut flag)
            })?;
            Ok(flag)
        }

        fn set_arm(&mut self, handle: DeviceHandle, arm: bool) -> Result<(), SdkError> {
            check("SidekickSDK_SetLaserArmDisarm", unsafe {
                SidekickSDK_SetLaserArmDisarm(handle.0, arm)
            })?;
            check("SidekickSDK_ExecLaserArmDisarm", unsafe {
                SidekickSDK_ExecLaserArmDisarm(handle.0)
            })
        }

        fn set_emission(&mut self, handle: DeviceHandle, on: bool) -> Result<(), SdkError> {
            check("SidekickSDK_SetLaserOnOff", unsafe {
                SidekickSDK_SetLaserOnOff(handle.0, 0, on)
            })?;
            check("SidekickSDK_ExecLaserOnOff", unsafe {
                SidekickSDK_ExecLaserOnOff(handle.0)
            })
        }

        fn read_qcl_params(&mut self, handle: DeviceHandle) -> Result<QclParams, SdkError> {
            check("SidekickSDK_ReadWriteLaserQclParams", unsafe {
                SidekickSDK_ReadWriteLaserQclParams(handle.0, false, 0)
            })?;
            let mut p = QclParams::default();
            check("SidekickSDK_GetLaserQclParams", unsafe {
                SidekickSDK_GetLaserQclParams(
                    handle.0,
                    &mut p.slot,
                    &mut p.pulse_rate_hz,
                    &mut p.pulse_width_ns,
                    &mut p.current_ma,
                    &mut p.temp_c,
                    &mut p.laser_mode,
                    &mut p.pulse_mode,
                    &mut p.vsrc,
                )
            })?;
            Ok(p)
        }

        fn write_qcl_params(
            &mut self,
            handle: DeviceHandle,
            params: &QclParams,
        ) -> Result<(), SdkError> {
            check("SidekickSDK_SetLaserQclParams", unsafe {
                SidekickSDK_SetLaserQclParams(
                    handle.0,
                    params.slot,
                    params.pulse_rate_hz,
                    params.pulse_width_ns,
                    params.current_ma,
                    params.temp_c,
                    params.laser_mode,
                    params.pulse_mode,
                    params.vsrc,
                )
            })?;
            check("SidekickSDK_ReadWriteLaserQclParams", unsafe {
                SidekickSDK_ReadWriteLaserQclParams(handle.0, true, 0)
            })
        }

        fn status_words(&mut self, handle: DeviceHandle) -> Result<StatusWords, SdkError> {
            let mut words = StatusWords::default();
            check("SidekickSDK_ReadStatusMask", unsafe {
                SidekickSDK_ReadStatusMask(
                    handle.0,
                    &mut words.status,
                    &mut words.error,
                    &mut words.warning,
                )
            })?;
            Ok(words)
        }

        fn tune_to_wavelength(
            &mut self,
            handle: DeviceHandle,
            unit: u8,
            wavelength: f32,
        ) -> Result<(), SdkError> {
            check("SidekickSDK_SetTuneToWW", unsafe {
                SidekickSDK_SetTuneToWW(handle.0, unit, wavelength, 0)
            })?;
            check("SidekickSDK_ExecTuneToWW", unsafe {
                SidekickSDK_ExecTuneToWW(handle.0)
            })
        }

        fn write_scan_params(
            &mut self,
            handle: DeviceHandle,
            params: &StepMeasureParams,
        ) -> Result<(), SdkError> {
            check("SidekickSDK_SetStepMeasureParams", unsafe {
                SidekickSDK_SetStepMeasureParams(
                    handle.0,
                    params.unit,
                    params.start_ww,
                    params.stop_ww,
                    params.step,
                    params.num_scans,
                    params.keep_on,
                    params.bidirectional,
                    params.dwell_time_ms,
                    params.transition_time_ms,
                )
            })?;
            check("SidekickSDK_ReadWriteStepMeasureParams", unsafe {
                SidekickSDK_ReadWriteStepMeasureParams(handle.0, true)
            })
        }

        fn execute_scan_operation(
            &mut self,
            handle: DeviceHandle,
            operation: u8,
        ) -> Result<(), SdkError> {
            check("SidekickSDK_SetScanOperation", unsafe {
                SidekickSDK_SetScanOperation(handle.0, operation)
            })?;
            check("SidekickSDK_ExecuteScanOperation", unsafe {
                SidekickSDK_ExecuteScanOperation(handle.0)
            })
        }

        fn scan_progress(&mut self, handle: DeviceHandle) -> Result<ScanProgress, SdkError> {
            check("SidekickSDK_ReadScanProgress", unsafe {
                SidekickSDK_ReadScanProgress(handle.0)
            })?;
            let mut progress = ScanProgress::default();
            check("SidekickSDK_GetScanProgress", unsafe {
                SidekickSDK_GetScanProgress(
                    handle.0,
                    &mut progress.progress_mask,
                    &mut progress.scan_num,
                    &mut progress.scan_percent,
                )
            })?;
            Ok(progress)
        }

        fn light_info(&mut self, handle: DeviceHandle) -> Result<LightInfo, SdkError> {
            check("SidekickSDK_ReadInfoLight", unsafe {
                SidekickSDK_ReadInfoLight(handle.0)
            })?;
            let mut info = LightInfo::default();
            check("SidekickSDK_GetInfoLight", unsafe {
                SidekickSDK_GetInfoLight(
                    handle.0,
                    &mut info.light_status,
                    &mut info.current_ww,
                    &mut info.units,
                    &mut info.current_qcl,
                )
            })?;
            Ok(info)
        }

        fn system_telemetry(
            &mut self,
            handle: DeviceHandle,
        ) -> Result<super::SystemTelemetry, SdkError> {
            check("SidekickSDK_ReadInfoSysTemperatures", unsafe {
                SidekickSDK_ReadInfoSysTemperatures(handle.0)
            })?;
            let mut telemetry = super::SystemTelemetry::default();
            let mut aux_temp1 = 0f32;
            let mut aux_temp2 = 0f32;
            check("SidekickSDK_GetInfoSysTemperatures", unsafe {
                SidekickSDK_GetInfoSysTemperatures(
                    handle.0,
                    &mut telemetry.controller_temp_c,
                    &mut telemetry.head_case_temp_c,
                    &mut telemetry.aux_temp_c,
                    &mut telemetry.pcb_humidity_pct,
                    &mut telemetry.head_humidity_pct,
                    &mut aux_temp1,
                    &mut aux_temp2,
                )
            })?;
            Ok(telemetry)
        }
    }
}
