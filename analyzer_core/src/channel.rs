//! Channel configuration and validation.
//!
//! A `ChannelConfig` is built once at channel start and is immutable for the
//! life of the run; only the regulation targets can change afterwards, via
//! explicit operator retarget commands. All limits and targets are integer
//! fixed-point (mV / mA / ms).

use crate::error::BuildError;

/// 12-bit PWM range of the duty-cycle expander.
pub const MIN_DUTY: u16 = 0;
pub const MAX_DUTY: u16 = 4095;

/// Duty applied on every stop or fault: output disabled. Increasing duty
/// increases regulated output, so "off" is the low end of the range.
pub const FAILSAFE_DUTY: u16 = MIN_DUTY;

/// Hard safety limits evaluated against every fresh sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyLimits {
    pub max_voltage_mv: i32,
    /// Below this the cell is likely absent or deeply discharged;
    /// informational only (there is no under-voltage fault kind).
    pub min_voltage_mv: i32,
    pub max_current_ma: i32,
    /// Hard cap on a single run; `None` disables the timeout check.
    pub max_run_ms: Option<u64>,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_voltage_mv: 30_000,
            min_voltage_mv: 100,
            max_current_ma: 5_000,
            max_run_ms: None,
        }
    }
}

/// Immutable per-channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Logical channel id, unique within the orchestrator.
    pub id: u8,
    /// Sensor module on the monitoring bus (device index, e.g. 0..=3).
    pub sensor_module: u8,
    /// Monitoring channel within the module (0..=2 on an INA3221).
    pub sensor_channel: u8,
    /// PWM output channel on the expander.
    pub actuator_channel: u8,
    pub target_voltage_mv: i32,
    pub target_current_ma: i32,
    /// Base duty step; the adaptive law scales this by 1/2/4/8.
    pub base_step: u16,
    pub voltage_tolerance_mv: i32,
    pub current_tolerance_ma: i32,
    pub limits: SafetyLimits,
    pub sensor_read_interval_ms: u64,
    pub actuator_update_interval_ms: u64,
}

impl ChannelConfig {
    /// Validate the configuration. Called before a channel task is spawned;
    /// an invalid target is rejected here, never discovered mid-loop.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.base_step == 0 {
            return Err(BuildError::InvalidConfig("base_step must be >= 1"));
        }
        if self.voltage_tolerance_mv < 0 || self.current_tolerance_ma < 0 {
            return Err(BuildError::InvalidConfig("tolerances must be >= 0"));
        }
        if self.limits.min_voltage_mv >= self.limits.max_voltage_mv {
            return Err(BuildError::InvalidConfig(
                "min_voltage must be below max_voltage",
            ));
        }
        if self.limits.max_current_ma <= 0 {
            return Err(BuildError::InvalidConfig("max_current must be > 0"));
        }
        validate_targets(
            self.target_voltage_mv,
            self.target_current_ma,
            &self.limits,
        )?;
        if self.actuator_update_interval_ms == 0 || self.sensor_read_interval_ms == 0 {
            return Err(BuildError::InvalidConfig("intervals must be >= 1 ms"));
        }
        if self.sensor_read_interval_ms < self.actuator_update_interval_ms {
            return Err(BuildError::InvalidConfig(
                "sensor_read_interval must be >= actuator_update_interval",
            ));
        }
        if self.limits.max_run_ms == Some(0) {
            return Err(BuildError::InvalidConfig("max_run_ms must be >= 1"));
        }
        Ok(())
    }
}

/// Shared target validation used at start and on every retarget request.
pub fn validate_targets(
    voltage_mv: i32,
    current_ma: i32,
    limits: &SafetyLimits,
) -> Result<(), BuildError> {
    if voltage_mv <= 0 || current_ma <= 0 {
        return Err(BuildError::InvalidConfig("targets must be > 0"));
    }
    if voltage_mv > limits.max_voltage_mv {
        return Err(BuildError::InvalidConfig(
            "target voltage above max_voltage limit",
        ));
    }
    if voltage_mv < limits.min_voltage_mv {
        return Err(BuildError::InvalidConfig(
            "target voltage below min_voltage limit",
        ));
    }
    if current_ma > limits.max_current_ma {
        return Err(BuildError::InvalidConfig(
            "target current above max_current limit",
        ));
    }
    Ok(())
}
