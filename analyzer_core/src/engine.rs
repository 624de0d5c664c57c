//! Per-channel regulation engine.
//!
//! Pure control arithmetic: given the latest measurement, compute the next
//! duty target. No I/O happens here; applying the duty is the scheduler's
//! job. Increasing duty monotonically increases regulated output within the
//! actuator's operating range; that directionality is a hard contract of the
//! power stage, so the adaptive law always steps duty up when the measured
//! value is below target and down when above.

use analyzer_traits::Sample;

use crate::channel::{ChannelConfig, MAX_DUTY, MIN_DUTY};
use crate::status::ModeKind;

/// Caller-supplied strategy for `Mode::Custom`: maps a measurement to a
/// signed duty delta. The engine clamps the result to the duty range.
pub type StrategyFn = Box<dyn FnMut(&Sample) -> i32 + Send>;

/// Regulation mode for one channel.
pub enum Mode {
    /// Regulate bus voltage to the target.
    ConstantVoltage,
    /// Regulate current to the target.
    ConstantCurrent,
    /// Constant current until the bus voltage first reaches the target
    /// (within tolerance), then constant voltage for the rest of the run.
    ConstantCurrentConstantVoltage,
    /// Only ever steps duty down, when current exceeds target + tolerance.
    CurrentLimiting,
    /// Bounded extension point; carries the strategy function.
    Custom(StrategyFn),
}

impl Mode {
    pub fn kind(&self) -> ModeKind {
        match self {
            Mode::ConstantVoltage => ModeKind::ConstantVoltage,
            Mode::ConstantCurrent => ModeKind::ConstantCurrent,
            Mode::ConstantCurrentConstantVoltage => ModeKind::ConstantCurrentConstantVoltage,
            Mode::CurrentLimiting => ModeKind::CurrentLimiting,
            Mode::Custom(_) => ModeKind::Custom,
        }
    }
}

impl core::fmt::Debug for Mode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self.kind())
    }
}

/// Active sub-mode of a compound CC/CV run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubMode {
    ConstantCurrent,
    ConstantVoltage,
}

/// Adaptive step multiplier from the voltage error magnitude (mV).
/// Non-decreasing in |error|: bigger error, bigger steps.
#[inline]
pub fn voltage_multiplier(abs_error_mv: i32) -> u16 {
    if abs_error_mv > 1_000 {
        8
    } else if abs_error_mv > 500 {
        4
    } else if abs_error_mv > 200 {
        2
    } else {
        1
    }
}

/// Adaptive step multiplier from the current error magnitude (mA).
#[inline]
pub fn current_multiplier(abs_error_ma: i32) -> u16 {
    if abs_error_ma > 500 {
        8
    } else if abs_error_ma > 250 {
        4
    } else if abs_error_ma > 100 {
        2
    } else {
        1
    }
}

pub struct RegulationEngine {
    mode: Mode,
    sub_mode: SubMode,
    duty: u16,
    target_voltage_mv: i32,
    target_current_ma: i32,
    voltage_tolerance_mv: i32,
    current_tolerance_ma: i32,
    base_step: u16,
}

impl RegulationEngine {
    /// Build an engine for one channel. Duty starts at `FAILSAFE_DUTY`
    /// (output off) and ramps up under the control law.
    pub fn new(mode: Mode, cfg: &ChannelConfig) -> Self {
        Self {
            mode,
            sub_mode: SubMode::ConstantCurrent,
            duty: crate::channel::FAILSAFE_DUTY,
            target_voltage_mv: cfg.target_voltage_mv,
            target_current_ma: cfg.target_current_ma,
            voltage_tolerance_mv: cfg.voltage_tolerance_mv,
            current_tolerance_ma: cfg.current_tolerance_ma,
            base_step: cfg.base_step,
        }
    }

    pub fn duty(&self) -> u16 {
        self.duty
    }

    pub fn mode_kind(&self) -> ModeKind {
        self.mode.kind()
    }

    /// Active sub-mode; meaningful only for CC/CV runs.
    pub fn sub_mode(&self) -> Option<SubMode> {
        match self.mode {
            Mode::ConstantCurrentConstantVoltage => Some(self.sub_mode),
            _ => None,
        }
    }

    /// Replace the regulation targets mid-run. The CC/CV latch is not
    /// reset; a retarget inside an ongoing run keeps the current sub-mode.
    pub fn retarget(&mut self, voltage_mv: i32, current_ma: i32) {
        self.target_voltage_mv = voltage_mv;
        self.target_current_ma = current_ma;
    }

    /// Compute the next duty target from `sample` and return it. The caller
    /// applies it through the actuator facade.
    pub fn next_duty(&mut self, sample: &Sample) -> u16 {
        match &mut self.mode {
            Mode::ConstantVoltage => self.voltage_step(sample.bus_voltage_mv),
            Mode::ConstantCurrent => self.current_step(sample.current_ma),
            Mode::ConstantCurrentConstantVoltage => {
                // One-way CC -> CV switch, latched the first time the bus
                // voltage reaches the target within tolerance. Never
                // re-validated afterwards.
                if self.sub_mode == SubMode::ConstantCurrent
                    && sample.bus_voltage_mv >= self.target_voltage_mv - self.voltage_tolerance_mv
                {
                    self.sub_mode = SubMode::ConstantVoltage;
                    tracing::info!(
                        bus_voltage_mv = sample.bus_voltage_mv,
                        target_voltage_mv = self.target_voltage_mv,
                        "cc/cv: entering constant-voltage phase"
                    );
                }
                match self.sub_mode {
                    SubMode::ConstantCurrent => self.current_step(sample.current_ma),
                    SubMode::ConstantVoltage => self.voltage_step(sample.bus_voltage_mv),
                }
            }
            Mode::CurrentLimiting => self.limit_step(sample.current_ma),
            Mode::Custom(strategy) => {
                let delta = strategy(sample);
                self.duty = clamp_duty(i32::from(self.duty) + delta);
                self.duty
            }
        }
    }

    fn voltage_step(&mut self, measured_mv: i32) -> u16 {
        let error = self.target_voltage_mv - measured_mv;
        if error.abs() <= self.voltage_tolerance_mv {
            return self.duty;
        }
        self.apply_step(error, voltage_multiplier(error.abs()))
    }

    fn current_step(&mut self, measured_ma: i32) -> u16 {
        let error = self.target_current_ma - measured_ma;
        if error.abs() <= self.current_tolerance_ma {
            return self.duty;
        }
        self.apply_step(error, current_multiplier(error.abs()))
    }

    /// Current limiter: acts only when current exceeds target + tolerance,
    /// and never raises duty.
    fn limit_step(&mut self, measured_ma: i32) -> u16 {
        let error = self.target_current_ma - measured_ma;
        if error >= -self.current_tolerance_ma {
            return self.duty;
        }
        self.apply_step(error, current_multiplier(error.abs()))
    }

    fn apply_step(&mut self, error: i32, multiplier: u16) -> u16 {
        let step = i32::from(self.base_step) * i32::from(multiplier);
        let next = if error > 0 {
            // Below target: more duty, more output.
            i32::from(self.duty) + step
        } else {
            i32::from(self.duty) - step
        };
        self.duty = clamp_duty(next);
        self.duty
    }
}

impl core::fmt::Debug for RegulationEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegulationEngine")
            .field("mode", &self.mode.kind())
            .field("duty", &self.duty)
            .field("target_voltage_mv", &self.target_voltage_mv)
            .field("target_current_ma", &self.target_current_ma)
            .finish()
    }
}

#[inline]
fn clamp_duty(duty: i32) -> u16 {
    duty.clamp(i32::from(MIN_DUTY), i32::from(MAX_DUTY)) as u16
}
