//! Builder-validated, time-stepped experiment scheduler.
//!
//! An experiment is a list of [`Action`]s driven once per discrete tick
//! for a fixed duration. Validation happens at `build()`; `run()` only
//! executes already-valid experiments.

use crate::action::{Action, LaserDevice, LaserField};
use crate::qcl_driver::QclError;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Upper bound on experiment duration: two hours of one-second ticks.
pub const MAX_DURATION_SECS: u64 = 60 * 60 * 2;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("experiment must declare at least one action")]
    NoActions,

    #[error("experiment duration was not set")]
    MissingDuration,

    #[error("experiment duration must be at least one second")]
    ZeroDuration,

    #[error("experiment duration {requested} must stay under {MAX_DURATION_SECS} seconds")]
    DurationTooLong { requested: u64 },

    #[error("schedule must declare time steps")]
    NoTimeSteps,

    #[error("schedule time steps must be strictly increasing, starting at one or later")]
    BadTimeSteps,

    #[error("{field} series has {series} value(s) for {steps} time step(s)")]
    SeriesLengthMismatch {
        field: &'static str,
        series: usize,
        steps: usize,
    },
}

/// A validated, runnable schedule. Created only by [`ExperimentBuilder`]
/// and consumed by [`run`].
///
/// ```
/// use sidekick_rs::{Action, Experiment};
///
/// # fn demo(device: &mut dyn sidekick_rs::LaserDevice) -> Result<(), Box<dyn std::error::Error>> {
/// let experiment = Experiment::builder()
///     .action(Action::wavelength(|t| (t == 3).then_some(1337.0)))
///     .duration_secs(5)
///     .build()?;
/// let completed = experiment.run(device)?;
/// assert!(completed);
/// # Ok(())
/// # }
/// ```
///
/// [`run`]: Experiment::run
#[derive(Debug)]
pub struct Experiment {
    actions: Vec<Action>,
    duration: u64,
    current_time: u64,
    tick: Duration,
}

#[derive(Debug, Default)]
pub struct ExperimentBuilder {
    actions: Vec<Action>,
    duration: Option<u64>,
    tick: Option<Duration>,
}

impl ExperimentBuilder {
    /// Append one action; declaration order is dispatch order.
    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Replace the action list wholesale.
    pub fn actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }

    /// Experiment length in ticks (whole seconds at the default tick).
    pub fn duration_secs(mut self, duration: u64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Length of one tick. Defaults to one second.
    pub fn tick_interval(mut self, tick: Duration) -> Self {
        self.tick = Some(tick);
        self
    }

    /// Validate and construct. Invariant violations fail here, never in
    /// `run()`.
    pub fn build(self) -> Result<Experiment, ValidationError> {
        if self.actions.is_empty() {
            return Err(ValidationError::NoActions);
        }
        let duration = self.duration.ok_or(ValidationError::MissingDuration)?;
        if duration == 0 {
            return Err(ValidationError::ZeroDuration);
        }
        if duration >= MAX_DURATION_SECS {
            return Err(ValidationError::DurationTooLong {
                requested: duration,
            });
        }
        Ok(Experiment {
            actions: self.actions,
            duration,
            current_time: 0,
            tick: self.tick.unwrap_or(Duration::from_secs(1)),
        })
    }
}

impl Experiment {
    pub fn builder() -> ExperimentBuilder {
        ExperimentBuilder::default()
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    /// Drive the schedule against the device, one tick at a time.
    ///
    /// Every tick advances the counter, blocks for one tick interval,
    /// then invokes each action in declared order with the current time.
    /// An action error aborts the remaining ticks; the shutdown cleanup
    /// still runs before the error propagates. After the final tick the
    /// device is shut down unconditionally.
    pub fn run(mut self, device: &mut dyn LaserDevice) -> Result<bool, QclError> {
        log::info!(
            "Running experiment: {} action(s) over {} tick(s)",
            self.actions.len(),
            self.duration
        );
        for _ in 0..self.duration {
            self.current_time += 1;
            thread::sleep(self.tick);
            for action in &mut self.actions {
                if let Err(e) = action.run_wrapper(device, self.current_time) {
                    log::warn!(
                        "Action on {} failed at tick {}: {e}",
                        action.field().name(),
                        self.current_time
                    );
                    if let Err(off) = device.shut_down() {
                        log::warn!("Shutdown after failed action also failed: {off}");
                    }
                    return Err(e);
                }
            }
        }

        device.shut_down()?;
        log::info!("Experiment complete");
        Ok(true)
    }
}

/// Per-field value series for a precomputed schedule. All fields are
/// optional; override sets merge field-by-field with [`merged`].
///
/// [`merged`]: ScheduleOverrides::merged
#[derive(Debug, Clone, Default)]
pub struct ScheduleOverrides {
    /// Whole seconds into the run; the tick counter starts at one.
    pub time_steps: Option<Vec<u64>>,
    pub pulse_width_ns: Option<Vec<f64>>,
    pub pulse_rate_hz: Option<Vec<f64>>,
    pub wavelength: Option<Vec<f64>>,
    pub current_ma: Option<Vec<f64>>,
}

impl ScheduleOverrides {
    /// Merge field-by-field; series present in `other` win.
    pub fn merged(self, other: Self) -> Self {
        Self {
            time_steps: other.time_steps.or(self.time_steps),
            pulse_width_ns: other.pulse_width_ns.or(self.pulse_width_ns),
            pulse_rate_hz: other.pulse_rate_hz.or(self.pulse_rate_hz),
            wavelength: other.wavelength.or(self.wavelength),
            current_ma: other.current_ma.or(self.current_ma),
        }
    }
}

/// A validated time-stepped value schedule for the tunable fields.
///
/// Alternative declaration surface to hand-written actions: each
/// populated series pairs one value with each time step. Validation
/// happens once, after all overrides are merged; the schedule then
/// converts into ordinary [`Action`]s.
///
/// ```
/// use sidekick_rs::{ParameterSchedule, ScheduleOverrides};
///
/// # fn demo(device: &mut dyn sidekick_rs::LaserDevice) -> Result<(), Box<dyn std::error::Error>> {
/// let ramp = ScheduleOverrides {
///     time_steps: Some(vec![1, 2, 3]),
///     wavelength: Some(vec![1020.0, 1120.0, 1220.0]),
///     ..ScheduleOverrides::default()
/// };
/// let completed = ParameterSchedule::new(ramp)?.into_experiment()?.run(device)?;
/// assert!(completed);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ParameterSchedule {
    time_steps: Vec<u64>,
    series: Vec<(LaserField, Vec<f64>)>,
}

impl ParameterSchedule {
    /// Validate merged overrides. Every populated series must match the
    /// time-step series in length, and steps must be strictly increasing
    /// whole seconds starting at one or later.
    pub fn new(overrides: ScheduleOverrides) -> Result<Self, ValidationError> {
        let time_steps = overrides.time_steps.ok_or(ValidationError::NoTimeSteps)?;
        if time_steps.is_empty() {
            return Err(ValidationError::NoTimeSteps);
        }
        if time_steps[0] == 0 || !time_steps.windows(2).all(|w| w[0] < w[1]) {
            return Err(ValidationError::BadTimeSteps);
        }

        let mut series = Vec::new();
        for (field, values) in [
            (LaserField::PulseWidth, overrides.pulse_width_ns),
            (LaserField::PulseRate, overrides.pulse_rate_hz),
            (LaserField::Wavelength, overrides.wavelength),
            (LaserField::Current, overrides.current_ma),
        ] {
            let Some(values) = values else { continue };
            if values.len() != time_steps.len() {
                return Err(ValidationError::SeriesLengthMismatch {
                    field: field.name(),
                    series: values.len(),
                    steps: time_steps.len(),
                });
            }
            series.push((field, values));
        }
        if series.is_empty() {
            return Err(ValidationError::NoActions);
        }
        Ok(Self { time_steps, series })
    }

    /// Last scheduled second.
    pub fn end(&self) -> u64 {
        self.time_steps.last().copied().unwrap_or(0)
    }

    /// One action per populated series, firing at the matching ticks.
    pub fn into_actions(self) -> Vec<Action> {
        let steps = Arc::new(self.time_steps);
        self.series
            .into_iter()
            .map(|(field, values)| {
                let steps = Arc::clone(&steps);
                Action::new(field, move |t| {
                    steps.iter().position(|step| *step == t).map(|i| values[i])
                })
            })
            .collect()
    }

    /// Build an experiment spanning the whole schedule.
    pub fn into_experiment(self) -> Result<Experiment, ValidationError> {
        let duration = self.end();
        Experiment::builder()
            .actions(self.into_actions())
            .duration_secs(duration)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeDevice;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn fast(builder: ExperimentBuilder) -> ExperimentBuilder {
        builder.tick_interval(Duration::from_millis(1))
    }

    #[test]
    fn build_rejects_an_empty_action_list() {
        let err = Experiment::builder().duration_secs(5).build().unwrap_err();
        assert_eq!(err, ValidationError::NoActions);
    }

    #[test]
    fn build_rejects_a_missing_duration() {
        let err = Experiment::builder()
            .action(Action::wavelength(|_| None))
            .build()
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingDuration);
    }

    #[test]
    fn build_rejects_a_zero_duration() {
        let err = Experiment::builder()
            .action(Action::wavelength(|_| None))
            .duration_secs(0)
            .build()
            .unwrap_err();
        assert_eq!(err, ValidationError::ZeroDuration);
    }

    #[test]
    fn build_rejects_a_two_hour_duration() {
        let err = Experiment::builder()
            .action(Action::wavelength(|_| None))
            .duration_secs(MAX_DURATION_SECS)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::DurationTooLong {
                requested: MAX_DURATION_SECS
            }
        );
    }

    #[test]
    fn builder_failure_precedes_any_device_interaction() {
        let device = FakeDevice::default();
        assert!(Experiment::builder().duration_secs(5).build().is_err());
        assert!(device.writes.is_empty());
        assert_eq!(device.shutdowns, 0);
    }

    #[test]
    fn every_tick_invokes_every_action_with_increasing_time() {
        let seen = Arc::new(AtomicU64::new(0));
        let ticks = {
            let seen = Arc::clone(&seen);
            Action::pulse_width(move |t| {
                // Ticks arrive strictly increasing from 1.
                assert_eq!(seen.load(Ordering::SeqCst) + 1, t);
                seen.store(t, Ordering::SeqCst);
                None
            })
        };
        let mut device = FakeDevice::default();
        let completed = fast(Experiment::builder().action(ticks))
            .duration_secs(7)
            .build()
            .unwrap()
            .run(&mut device)
            .unwrap();
        assert!(completed);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
        assert_eq!(device.shutdowns, 1);
    }

    #[test]
    fn actions_dispatch_in_declared_order_each_tick() {
        let mut device = FakeDevice::default();
        fast(Experiment::builder())
            .actions(vec![
                Action::current(|_| Some(1300.0)),
                Action::pulse_rate(|_| Some(100_000.0)),
            ])
            .duration_secs(2)
            .build()
            .unwrap()
            .run(&mut device)
            .unwrap();
        let fields: Vec<&str> = device.writes.iter().map(|(field, _)| *field).collect();
        assert_eq!(
            fields,
            vec!["current", "pulse_rate", "current", "pulse_rate"]
        );
    }

    #[test]
    fn wavelength_action_fires_only_at_its_tick() {
        let mut device = FakeDevice::default();
        let completed = fast(Experiment::builder())
            .action(Action::wavelength(|t| (t == 5).then_some(1337.0)))
            .duration_secs(5)
            .build()
            .unwrap()
            .run(&mut device)
            .unwrap();
        assert!(completed);
        assert_eq!(device.writes, vec![("wavelength", 1337.0)]);
        assert_eq!(device.shutdowns, 1);
    }

    #[test]
    fn failing_action_aborts_the_schedule_but_still_shuts_down() {
        let mut device = FakeDevice::default();
        device.fail_on = Some(LaserField::Current);
        let err = fast(Experiment::builder())
            .actions(vec![
                Action::current(|_| Some(1300.0)),
                Action::pulse_rate(|_| Some(100_000.0)),
            ])
            .duration_secs(5)
            .build()
            .unwrap()
            .run(&mut device)
            .unwrap_err();
        assert!(matches!(err, QclError::NotConnected));
        // The failing first action stops the tick; the second never runs.
        assert!(device.writes.is_empty());
        assert_eq!(device.shutdowns, 1);
    }

    fn ramp() -> ScheduleOverrides {
        ScheduleOverrides {
            time_steps: Some(vec![1, 2, 3]),
            wavelength: Some(vec![1020.0, 1120.0, 1220.0]),
            ..ScheduleOverrides::default()
        }
    }

    #[test]
    fn overrides_merge_field_by_field() {
        let merged = ramp().merged(ScheduleOverrides {
            wavelength: Some(vec![1000.0, 1100.0, 1200.0]),
            current_ma: Some(vec![1300.0, 1400.0, 1500.0]),
            ..ScheduleOverrides::default()
        });
        // Overridden and added series win; the rest carry over.
        assert_eq!(merged.time_steps, Some(vec![1, 2, 3]));
        assert_eq!(merged.wavelength, Some(vec![1000.0, 1100.0, 1200.0]));
        assert_eq!(merged.current_ma, Some(vec![1300.0, 1400.0, 1500.0]));
        assert_eq!(merged.pulse_width_ns, None);
    }

    #[test]
    fn schedule_requires_time_steps() {
        let overrides = ScheduleOverrides {
            time_steps: None,
            ..ramp()
        };
        assert_eq!(
            ParameterSchedule::new(overrides).unwrap_err(),
            ValidationError::NoTimeSteps
        );
    }

    #[test]
    fn schedule_rejects_unordered_or_zero_steps() {
        let unordered = ScheduleOverrides {
            time_steps: Some(vec![1, 3, 2]),
            ..ramp()
        };
        assert_eq!(
            ParameterSchedule::new(unordered).unwrap_err(),
            ValidationError::BadTimeSteps
        );
        // The tick counter starts at one; a zero step could never fire.
        let zero = ScheduleOverrides {
            time_steps: Some(vec![0, 1, 2]),
            ..ramp()
        };
        assert_eq!(
            ParameterSchedule::new(zero).unwrap_err(),
            ValidationError::BadTimeSteps
        );
    }

    #[test]
    fn schedule_rejects_a_series_length_mismatch() {
        let overrides = ScheduleOverrides {
            current_ma: Some(vec![1300.0]),
            ..ramp()
        };
        assert_eq!(
            ParameterSchedule::new(overrides).unwrap_err(),
            ValidationError::SeriesLengthMismatch {
                field: "current",
                series: 1,
                steps: 3,
            }
        );
    }

    #[test]
    fn schedule_with_no_series_has_no_actions() {
        let overrides = ScheduleOverrides {
            time_steps: Some(vec![1, 2]),
            ..ScheduleOverrides::default()
        };
        assert_eq!(
            ParameterSchedule::new(overrides).unwrap_err(),
            ValidationError::NoActions
        );
    }

    #[test]
    fn schedule_applies_each_value_at_its_step() {
        let mut device = FakeDevice::default();
        let schedule = ParameterSchedule::new(ramp()).unwrap();
        assert_eq!(schedule.end(), 3);
        let completed = fast(Experiment::builder())
            .actions(schedule.into_actions())
            .duration_secs(3)
            .build()
            .unwrap()
            .run(&mut device)
            .unwrap();
        assert!(completed);
        assert_eq!(
            device.writes,
            vec![
                ("wavelength", 1020.0),
                ("wavelength", 1120.0),
                ("wavelength", 1220.0),
            ]
        );
    }

    #[test]
    fn schedule_spans_its_own_experiment() {
        let experiment = ParameterSchedule::new(ramp())
            .unwrap()
            .into_experiment()
            .unwrap();
        assert_eq!(experiment.duration(), 3);
    }

    #[test]
    fn experiment_is_consumed_by_run() {
        let mut device = FakeDevice::default();
        let experiment = fast(Experiment::builder())
            .action(Action::wavelength(|_| None))
            .duration_secs(1)
            .build()
            .unwrap();
        assert_eq!(experiment.duration(), 1);
        let completed = experiment.run(&mut device).unwrap();
        assert!(completed);
    }
}
