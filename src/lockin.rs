//! Lock-in amplifier channel: connection, demodulator setup and timed
//! sample acquisition.
//!
//! The vendor's data-server API is path-addressed; the [`LockinApi`]
//! trait captures the call set this crate needs (property get/set,
//! subscribe, blocking poll) so the channel logic is testable against a
//! fake. The linked client ([`ZiApi`]) is only compiled with the
//! `zi-api` feature.

use polars::prelude::*;
use std::collections::HashMap;
use std::thread;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LockinError {
    #[error("Lock-in API call {function} failed with status {code}")]
    Call { function: &'static str, code: i32 },

    #[error("No lock-in device visible to the data server")]
    NoDevice,

    #[error("Lock-in response was not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("Embedded NUL in node path: {0}")]
    Path(#[from] std::ffi::NulError),
}

/// One demodulator's output over a poll window.
#[derive(Debug, Clone, Default)]
pub struct DemodSample {
    /// In-phase components.
    pub x: Vec<f64>,
    /// Quadrature components.
    pub y: Vec<f64>,
    /// Device clock ticks; convert to seconds via the clockbase.
    pub timestamp: Vec<u64>,
    /// The device reported dropped samples in this window.
    pub dataloss: bool,
}

/// Everything one blocking poll returned, keyed by subscription path.
#[derive(Debug, Clone, Default)]
pub struct PollPayload {
    samples: HashMap<String, DemodSample>,
}

impl PollPayload {
    pub fn insert_demod_sample(&mut self, path: impl Into<String>, sample: DemodSample) {
        self.samples.insert(path.into(), sample);
    }

    pub fn demod_sample(&self, path: &str) -> Option<&DemodSample> {
        self.samples.get(path)
    }
}

/// Call set this crate needs from the lock-in vendor API.
///
/// Methods take `&self`: the session is internally synchronized, so the
/// acquisition task can poll while the control thread keeps the laser SDK.
pub trait LockinApi {
    /// Resolve the id of the device attached to the data server.
    fn detect_device(&self) -> Result<String, LockinError>;

    fn get_byte(&self, path: &str) -> Result<String, LockinError>;
    fn get_int(&self, path: &str) -> Result<i64, LockinError>;
    fn set_int(&self, path: &str, value: i64) -> Result<(), LockinError>;
    fn set_double(&self, path: &str, value: f64) -> Result<(), LockinError>;

    fn subscribe(&self, path: &str) -> Result<(), LockinError>;
    fn unsubscribe(&self, path: &str) -> Result<(), LockinError>;
    fn sync(&self) -> Result<(), LockinError>;

    /// Block for `length`, returning whatever arrived on subscribed paths.
    fn poll(&self, length: Duration, timeout: Duration) -> Result<PollPayload, LockinError>;
}

/// Demodulation settings; defaults match the reference deployment.
#[derive(Debug, Clone)]
pub struct LockinConfig {
    pub host: String,
    pub port: u16,
    pub demod_channel: u8,
    pub input_channel: u8,
    pub oscillator: u8,
    /// Must match the laser pulse rate.
    pub oscillator_freq_hz: f64,
    /// Low-pass time constant; large values distort the trace.
    pub time_constant_s: f64,
    pub demod_rate_hz: f64,
    pub filter_order: i64,
    pub harmonic: i64,
    pub input_range_v: f64,
    pub poll_length: Duration,
    pub poll_timeout: Duration,
}

impl Default for LockinConfig {
    fn default() -> Self {
        Self {
            host: "192.168.48.102".to_string(),
            port: 8004,
            demod_channel: 0,
            input_channel: 0,
            oscillator: 0,
            oscillator_freq_hz: 100_000.0,
            time_constant_s: 1e-2,
            demod_rate_hz: 2e3,
            filter_order: 4,
            harmonic: 1,
            input_range_v: 2.0,
            poll_length: Duration::from_secs(30),
            poll_timeout: Duration::from_millis(500),
        }
    }
}

/// Ordered (magnitude, seconds) series captured in one poll window.
///
/// Owned by the acquisition task until it is joined; the scanner shifts
/// the time axis onto the experiment's absolute timeline afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBatch {
    magnitudes: Vec<f64>,
    timestamps: Vec<f64>,
}

impl SampleBatch {
    pub(crate) fn from_demod(sample: &DemodSample, clockbase: f64) -> Self {
        let magnitudes = sample
            .x
            .iter()
            .zip(&sample.y)
            .map(|(x, y)| x.hypot(*y))
            .collect();
        let timestamps = sample
            .timestamp
            .iter()
            .map(|ticks| *ticks as f64 / clockbase)
            .collect();
        Self {
            magnitudes,
            timestamps,
        }
    }

    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    pub fn magnitudes(&self) -> &[f64] {
        &self.magnitudes
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn first_timestamp(&self) -> Option<f64> {
        self.timestamps.first().copied()
    }

    pub(crate) fn shift_time(&mut self, offset: f64) {
        for t in &mut self.timestamps {
            *t += offset;
        }
    }

    /// Hand the batch to analysis tooling as a two-column DataFrame.
    pub fn into_dataframe(self) -> PolarsResult<DataFrame> {
        df!(
            "time" => self.timestamps,
            "magnitude" => self.magnitudes,
        )
    }
}

/// One configured demodulator channel on the lock-in amplifier.
pub struct LockinChannel<A: LockinApi> {
    api: A,
    device: String,
    config: LockinConfig,
}

impl<A: LockinApi> LockinChannel<A> {
    /// Resolve the device on the data server.
    pub fn connect(api: A, config: LockinConfig) -> Result<Self, LockinError> {
        let device = api.detect_device()?;
        log::info!("Connected to lock-in device {device}");
        Ok(Self {
            api,
            device,
            config,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn config(&self) -> &LockinConfig {
        &self.config
    }

    fn path(&self, suffix: &str) -> String {
        format!("/{}/{}", self.device, suffix)
    }

    fn demod_path(&self, suffix: &str) -> String {
        format!(
            "/{}/demods/{}/{}",
            self.device, self.config.demod_channel, suffix
        )
    }

    /// Configure demodulation and input routing, then sync and settle.
    ///
    /// Device families expose different capability sets, so some writes
    /// branch on the devtype/options strings the device reports.
    pub fn initialize(&self) -> Result<(), LockinError> {
        log::info!("Initializing lock-in amplifier");
        let devtype = self.api.get_byte(&self.path("features/devtype"))?;
        let options = self.api.get_byte(&self.path("features/options"))?;
        log::debug!("Lock-in devtype '{devtype}', options '{options}'");

        // Quiet everything before configuring.
        self.api.set_double(&self.path("demods/*/rate"), 0.0)?;
        self.api.set_int(&self.path("demods/*/trigger"), 0)?;
        self.api.set_int(&self.path("sigouts/*/enables/*"), 0)?;

        if devtype.contains("UHF") {
            self.api.set_int(&self.path("demods/*/enable"), 0)?;
            self.api.set_int(&self.path("scopes/*/enable"), 0)?;
        } else if devtype.contains("HF2") {
            self.api.set_int(&self.path("scopes/*/trigchannel"), -1)?;
        } else if devtype.contains("MF") {
            self.api.set_int(&self.path("scopes/*/enable"), 0)?;
        }

        let input = format!("sigins/{}", self.config.input_channel);
        self.api.set_int(&self.path(&format!("{input}/imp50")), 0)?;
        self.api.set_int(&self.path(&format!("{input}/ac")), 1)?;
        self.api.set_int(&self.path(&format!("{input}/diff")), 0)?;
        self.api.set_int(&self.path(&format!("{input}/float")), 0)?;
        self.api.set_double(
            &self.path(&format!("{input}/range")),
            self.config.input_range_v,
        )?;

        self.api.set_double(&self.path("demods/*/phaseshift"), 0.0)?;
        self.api
            .set_int(&self.path("demods/*/order"), self.config.filter_order)?;
        self.api
            .set_double(&self.demod_path("rate"), self.config.demod_rate_hz)?;
        self.api
            .set_int(&self.demod_path("harmonic"), self.config.harmonic)?;
        if devtype.contains("UHF") {
            self.api.set_int(&self.demod_path("enable"), 1)?;
        }
        if options.contains("MF") {
            self.api.set_int(
                &self.path("demods/*/oscselect"),
                i64::from(self.config.oscillator),
            )?;
            self.api.set_int(
                &self.path("demods/*/adcselect"),
                i64::from(self.config.input_channel),
            )?;
        }
        self.api.set_double(
            &self.path("demods/*/timeconstant"),
            self.config.time_constant_s,
        )?;
        self.api.set_double(
            &self.path(&format!("oscs/{}/freq", self.config.oscillator)),
            self.config.oscillator_freq_hz,
        )?;

        // Lock to the laser controller's reference on aux input 1; the
        // measurement demod stays on the signal input.
        self.api.set_int(&self.path("extrefs/0/enable"), 1)?;
        self.api
            .set_double(&self.path("triggers/in/0/level"), 0.500)?;
        self.api.set_int(
            &self.path("demods/0/adcselect"),
            i64::from(self.config.input_channel),
        )?;
        self.api.set_int(&self.path("demods/1/adcselect"), 8)?;

        self.api.unsubscribe("*")?;
        self.api.sync()?;
        thread::sleep(Duration::from_secs_f64(
            10.0 * self.config.time_constant_s,
        ));
        Ok(())
    }

    /// Acquire one poll window using the configured length and timeout.
    pub fn acquire(&self) -> Result<SampleBatch, LockinError> {
        self.acquire_for(self.config.poll_length, self.config.poll_timeout)
    }

    /// Subscribe, run one blocking poll and convert the demod output.
    ///
    /// A window with no demodulator payload yields an empty batch;
    /// reported sample loss is logged but does not fail the acquisition.
    pub fn acquire_for(
        &self,
        poll_length: Duration,
        poll_timeout: Duration,
    ) -> Result<SampleBatch, LockinError> {
        self.api.sync()?;
        let sample_path = self.demod_path("sample");
        self.api.subscribe(&sample_path)?;

        let result = self.poll_batch(&sample_path, poll_length, poll_timeout);
        if let Err(e) = self.api.unsubscribe("*") {
            log::warn!("Unsubscribe after poll failed: {e}");
        }
        result
    }

    fn poll_batch(
        &self,
        sample_path: &str,
        poll_length: Duration,
        poll_timeout: Duration,
    ) -> Result<SampleBatch, LockinError> {
        let payload = self.api.poll(poll_length, poll_timeout)?;
        match payload.demod_sample(sample_path) {
            Some(sample) => {
                if sample.dataloss {
                    log::warn!("Sample loss detected during poll window");
                }
                let clockbase = self.api.get_int(&self.path("clockbase"))? as f64;
                Ok(SampleBatch::from_demod(sample, clockbase))
            }
            None => {
                log::debug!("Poll window returned no demodulator payload");
                Ok(SampleBatch::default())
            }
        }
    }
}

#[cfg(feature = "zi-api")]
pub use linked::ZiApi;

#[cfg(feature = "zi-api")]
#[allow(unsafe_code, non_snake_case)]
mod linked {
    use super::{DemodSample, LockinApi, LockinError, PollPayload};
    use std::collections::HashMap;
    use std::ffi::{c_char, c_void, CString};
    use std::sync::{Mutex, PoisonError};
    use std::time::{Duration, Instant};

    const ZI_SUCCESS: i32 = 0;
    const ZI_VALUE_TYPE_DEMOD_SAMPLE: u32 = 1;
    const ZI_VALUE_TYPE_DATALOSS: u32 = 5;
    const MAX_PATH_LEN: usize = 256;
    const MAX_EVENT_SAMPLES: usize = 400;

    #[repr(C)]
    #[derive(Clone, Copy)]
    struct ZiDemodSampleRaw {
        timestamp: u64,
        x: f64,
        y: f64,
        frequency: f64,
        phase: f64,
        aux_in0: f64,
        aux_in1: f64,
        dio: u32,
        trigger: u32,
    }

    #[repr(C)]
    struct ZiEvent {
        value_type: u32,
        count: u32,
        path: [u8; MAX_PATH_LEN],
        samples: [ZiDemodSampleRaw; MAX_EVENT_SAMPLES],
    }

    #[link(name = "ziAPI")]
    extern "C" {
        fn ziAPIInit(conn: *mut *mut c_void) -> i32;
        fn ziAPIDestroy(conn: *mut c_void) -> i32;
        fn ziAPIConnect(conn: *mut c_void, hostname: *const c_char, port: u16) -> i32;
        fn ziAPIDisconnect(conn: *mut c_void) -> i32;
        fn ziAPIListNodes(
            conn: *mut c_void,
            path: *const c_char,
            nodes: *mut c_char,
            buffer_size: u32,
            flags: u32,
        ) -> i32;
        fn ziAPIGetValueB(
            conn: *mut c_void,
            path: *const c_char,
            buffer: *mut u8,
            buffer_size: u32,
            length: *mut u32,
        ) -> i32;
        fn ziAPIGetValueI(conn: *mut c_void, path: *const c_char, value: *mut i64) -> i32;
        fn ziAPISetValueI(conn: *mut c_void, path: *const c_char, value: i64) -> i32;
        fn ziAPISetValueD(conn: *mut c_void, path: *const c_char, value: f64) -> i32;
        fn ziAPISubscribe(conn: *mut c_void, path: *const c_char) -> i32;
        fn ziAPIUnSubscribe(conn: *mut c_void, path: *const c_char) -> i32;
        fn ziAPISync(conn: *mut c_void) -> i32;
        fn ziAPIPollDataEx(conn: *mut c_void, event: *mut ZiEvent, timeout_ms: u32) -> i32;
    }

    fn check(function: &'static str, code: i32) -> Result<(), LockinError> {
        if code == ZI_SUCCESS {
            Ok(())
        } else {
            Err(LockinError::Call { function, code })
        }
    }

    fn cpath(path: &str) -> Result<CString, LockinError> {
        Ok(CString::new(path)?)
    }

    // The connection pointer is only touched under the mutex.
    struct Conn(*mut c_void);
    unsafe impl Send for Conn {}

    /// Linked client for the lock-in data server.
    pub struct ZiApi {
        conn: Mutex<Conn>,
    }

    impl ZiApi {
        pub fn connect(host: &str, port: u16) -> Result<Self, LockinError> {
            let mut raw: *mut c_void = std::ptr::null_mut();
            check("ziAPIInit", unsafe { ziAPIInit(&mut raw) })?;
            let host_c = cpath(host)?;
            let connected = check("ziAPIConnect", unsafe {
                ziAPIConnect(raw, host_c.as_ptr(), port)
            });
            if let Err(e) = connected {
                unsafe {
                    ziAPIDestroy(raw);
                }
                return Err(e);
            }
            log::debug!("Connected to lock-in data server {host}:{port}");
            Ok(Self {
                conn: Mutex::new(Conn(raw)),
            })
        }

        fn with_conn<T>(
            &self,
            f: impl FnOnce(*mut c_void) -> Result<T, LockinError>,
        ) -> Result<T, LockinError> {
            let guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(guard.0)
        }
    }

    impl Drop for ZiApi {
        fn drop(&mut self) {
            let guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
            unsafe {
                ziAPIDisconnect(guard.0);
                ziAPIDestroy(guard.0);
            }
        }
    }

    impl LockinApi for ZiApi {
        fn detect_device(&self) -> Result<String, LockinError> {
            self.with_conn(|conn| {
                let root = cpath("/")?;
                let mut buffer = vec![0u8; 4096];
                check("ziAPIListNodes", unsafe {
                    ziAPIListNodes(
                        conn,
                        root.as_ptr(),
                        buffer.as_mut_ptr().cast::<c_char>(),
                        buffer.len() as u32,
                        0,
                    )
                })?;
                let nul = buffer.iter().position(|b| *b == 0).unwrap_or(buffer.len());
                let listing = String::from_utf8(buffer[..nul].to_vec())?;
                listing
                    .split([',', '\n'])
                    .map(str::trim)
                    .find(|node| node.to_ascii_lowercase().starts_with("dev"))
                    .map(str::to_ascii_lowercase)
                    .ok_or(LockinError::NoDevice)
            })
        }

        fn get_byte(&self, path: &str) -> Result<String, LockinError> {
            self.with_conn(|conn| {
                let path_c = cpath(path)?;
                let mut buffer = vec![0u8; 1024];
                let mut written = 0u32;
                check("ziAPIGetValueB", unsafe {
                    ziAPIGetValueB(
                        conn,
                        path_c.as_ptr(),
                        buffer.as_mut_ptr(),
                        buffer.len() as u32,
                        &mut written,
                    )
                })?;
                buffer.truncate(written as usize);
                Ok(String::from_utf8(buffer)?)
            })
        }

        fn get_int(&self, path: &str) -> Result<i64, LockinError> {
            self.with_conn(|conn| {
                let path_c = cpath(path)?;
                let mut value = 0i64;
                check("ziAPIGetValueI", unsafe {
                    ziAPIGetValueI(conn, path_c.as_ptr(), &mut value)
                })?;
                Ok(value)
            })
        }

        fn set_int(&self, path: &str, value: i64) -> Result<(), LockinError> {
            self.with_conn(|conn| {
                let path_c = cpath(path)?;
                check("ziAPISetValueI", unsafe {
                    ziAPISetValueI(conn, path_c.as_ptr(), value)
                })
            })
        }

        fn set_double(&self, path: &str, value: f64) -> Result<(), LockinError> {
            self.with_conn(|conn| {
                let path_c = cpath(path)?;
                check("ziAPISetValueD", unsafe {
                    ziAPISetValueD(conn, path_c.as_ptr(), value)
                })
            })
        }

        fn subscribe(&self, path: &str) -> Result<(), LockinError> {
            self.with_conn(|conn| {
                let path_c = cpath(path)?;
                check("ziAPISubscribe", unsafe {
                    ziAPISubscribe(conn, path_c.as_ptr())
                })
            })
        }

        fn unsubscribe(&self, path: &str) -> Result<(), LockinError> {
            self.with_conn(|conn| {
                let path_c = cpath(path)?;
                check("ziAPIUnSubscribe", unsafe {
                    ziAPIUnSubscribe(conn, path_c.as_ptr())
                })
            })
        }

        fn sync(&self) -> Result<(), LockinError> {
            self.with_conn(|conn| check("ziAPISync", unsafe { ziAPISync(conn) }))
        }

        fn poll(&self, length: Duration, timeout: Duration) -> Result<PollPayload, LockinError> {
            self.with_conn(|conn| {
                let mut windows: HashMap<String, DemodSample> = HashMap::new();
                let timeout_ms = timeout.as_millis() as u32;
                let deadline = Instant::now() + length;
                while Instant::now() < deadline {
                    // All-zero is a valid empty event for this POD layout.
                    let mut event: ZiEvent = unsafe { std::mem::zeroed() };
                    check("ziAPIPollDataEx", unsafe {
                        ziAPIPollDataEx(conn, &mut event, timeout_ms)
                    })?;
                    if event.count == 0 {
                        continue;
                    }
                    let nul = event
                        .path
                        .iter()
                        .position(|b| *b == 0)
                        .unwrap_or(event.path.len());
                    let path = String::from_utf8_lossy(&event.path[..nul]).into_owned();
                    match event.value_type {
                        ZI_VALUE_TYPE_DEMOD_SAMPLE => {
                            let sample = windows.entry(path).or_default();
                            let count = (event.count as usize).min(MAX_EVENT_SAMPLES);
                            for raw in &event.samples[..count] {
                                sample.x.push(raw.x);
                                sample.y.push(raw.y);
                                sample.timestamp.push(raw.timestamp);
                            }
                        }
                        ZI_VALUE_TYPE_DATALOSS => {
                            windows.entry(path).or_default().dataloss = true;
                        }
                        _ => {}
                    }
                }
                let mut payload = PollPayload::default();
                for (path, sample) in windows {
                    payload.insert_demod_sample(path, sample);
                }
                Ok(payload)
            })
        }
    }
}
