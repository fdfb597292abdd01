use crate::qcl_driver::QclError;

/// Tunable fields an action can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaserField {
    PulseWidth,
    PulseRate,
    Wavelength,
    Current,
}

impl LaserField {
    pub fn name(&self) -> &'static str {
        match self {
            LaserField::PulseWidth => "pulse_width",
            LaserField::PulseRate => "pulse_rate",
            LaserField::Wavelength => "wavelength",
            LaserField::Current => "current",
        }
    }
}

/// Capability set a scheduled experiment needs from the laser.
///
/// [`crate::QclDriver`] implements this; tests substitute a fake. Keeping
/// the seam here means the scheduler never touches the SDK directly.
pub trait LaserDevice {
    /// Apply one value to one named field.
    fn apply_field(&mut self, field: LaserField, value: f64) -> Result<(), QclError>;

    /// Unconditional shutdown; the designated cleanup path.
    fn shut_down(&mut self) -> Result<(), QclError>;
}

/// One scheduled behavior: a field binding plus a decision function.
///
/// The decision function is called once per tick with the current
/// experiment time in seconds and returns the value to apply, or `None`
/// for a no-op tick. The side effect always goes through [`run_wrapper`],
/// which is identical for every binding.
///
/// ```
/// use sidekick_rs::Action;
///
/// // Jump the wavelength to 1337 at the five second mark.
/// let action = Action::wavelength(|t| (t == 5).then_some(1337.0));
/// ```
///
/// [`run_wrapper`]: Action::run_wrapper
pub struct Action {
    field: LaserField,
    decide: Box<dyn FnMut(u64) -> Option<f64> + Send>,
}

impl Action {
    pub fn new(field: LaserField, decide: impl FnMut(u64) -> Option<f64> + Send + 'static) -> Self {
        Self {
            field,
            decide: Box::new(decide),
        }
    }

    pub fn pulse_width(decide: impl FnMut(u64) -> Option<f64> + Send + 'static) -> Self {
        Self::new(LaserField::PulseWidth, decide)
    }

    pub fn pulse_rate(decide: impl FnMut(u64) -> Option<f64> + Send + 'static) -> Self {
        Self::new(LaserField::PulseRate, decide)
    }

    pub fn wavelength(decide: impl FnMut(u64) -> Option<f64> + Send + 'static) -> Self {
        Self::new(LaserField::Wavelength, decide)
    }

    pub fn current(decide: impl FnMut(u64) -> Option<f64> + Send + 'static) -> Self {
        Self::new(LaserField::Current, decide)
    }

    pub fn field(&self) -> LaserField {
        self.field
    }

    /// Evaluate the decision function and apply its value, if any.
    pub(crate) fn run_wrapper(
        &mut self,
        device: &mut dyn LaserDevice,
        current_time: u64,
    ) -> Result<(), QclError> {
        if let Some(value) = (self.decide)(current_time) {
            device.apply_field(self.field, value)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action").field("field", &self.field).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeDevice;

    #[test]
    fn field_names_match_the_bindings() {
        assert_eq!(LaserField::PulseWidth.name(), "pulse_width");
        assert_eq!(LaserField::PulseRate.name(), "pulse_rate");
        assert_eq!(LaserField::Wavelength.name(), "wavelength");
        assert_eq!(LaserField::Current.name(), "current");
    }

    #[test]
    fn run_wrapper_applies_the_decided_value() {
        let mut device = FakeDevice::default();
        let mut action = Action::current(|t| Some(t as f64 * 100.0));
        action.run_wrapper(&mut device, 3).unwrap();
        assert_eq!(device.writes, vec![("current", 300.0)]);
    }

    #[test]
    fn none_is_a_no_op_tick() {
        let mut device = FakeDevice::default();
        let mut action = Action::wavelength(|_| None);
        action.run_wrapper(&mut device, 1).unwrap();
        assert!(device.writes.is_empty());
    }
}
