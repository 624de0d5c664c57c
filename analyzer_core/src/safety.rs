//! Stateless safety evaluation of fresh measurements.
//!
//! Checks run in priority order and the first match wins: over-voltage,
//! under-voltage (informational), over-current, run timeout. Only fresh
//! samples are ever evaluated; the scheduler never feeds cached data here.

use analyzer_traits::Sample;

use crate::channel::SafetyLimits;
use crate::error::FaultKind;

/// Outcome of checking one fresh sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyVerdict {
    Ok,
    /// Bus voltage below the configured floor. Not fatal (the fault
    /// taxonomy has no under-voltage kind); the caller decides how loudly
    /// to report it depending on whether regulation is active.
    UnderVoltage,
    /// Fatal; the channel must fail-safe and stop.
    Fault(FaultKind),
}

/// Evaluate one fresh sample against the channel's limits.
/// `elapsed_ms` is the time since the run started.
pub fn check_sample(sample: &Sample, limits: &SafetyLimits, elapsed_ms: u64) -> SafetyVerdict {
    if sample.bus_voltage_mv > limits.max_voltage_mv {
        return SafetyVerdict::Fault(FaultKind::OverVoltage);
    }
    if sample.bus_voltage_mv < limits.min_voltage_mv {
        return SafetyVerdict::UnderVoltage;
    }
    if sample.current_ma > limits.max_current_ma {
        return SafetyVerdict::Fault(FaultKind::OverCurrent);
    }
    if let Some(max_run_ms) = limits.max_run_ms
        && elapsed_ms > max_run_ms
    {
        return SafetyVerdict::Fault(FaultKind::Timeout);
    }
    SafetyVerdict::Ok
}
