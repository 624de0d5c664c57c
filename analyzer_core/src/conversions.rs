//! Mapping from the TOML-facing `analyzer_config` schema to runtime types.
//!
//! The config surface speaks physical units (volts, mA); everything here is
//! quantized once into the integer fixed-point the core runs on. A named
//! battery profile narrows the global safety window to the chemistry's
//! limits.

use analyzer_traits::{quantize_ma, quantize_mv};

use crate::channel::{ChannelConfig, SafetyLimits};
use crate::engine::Mode;
use crate::error::Result;

impl From<analyzer_config::ModeCfg> for Mode {
    fn from(m: analyzer_config::ModeCfg) -> Self {
        match m {
            analyzer_config::ModeCfg::ConstantVoltage => Mode::ConstantVoltage,
            analyzer_config::ModeCfg::ConstantCurrent => Mode::ConstantCurrent,
            analyzer_config::ModeCfg::ConstantCurrentConstantVoltage => {
                Mode::ConstantCurrentConstantVoltage
            }
            analyzer_config::ModeCfg::CurrentLimiting => Mode::CurrentLimiting,
        }
    }
}

/// Build a validated runtime `ChannelConfig` for one configured channel.
pub fn channel_config(
    cfg: &analyzer_config::Config,
    ch: &analyzer_config::ChannelCfg,
) -> Result<ChannelConfig> {
    let targets = ch.resolve_targets()?;

    // Chemistry limits from a profile narrow the global window; they never
    // widen it.
    let max_voltage = targets
        .max_voltage
        .map_or(cfg.safety.max_voltage, |v| v.min(cfg.safety.max_voltage));
    let min_voltage = targets
        .min_voltage
        .map_or(cfg.safety.min_voltage, |v| v.max(cfg.safety.min_voltage));
    let limits = SafetyLimits {
        max_voltage_mv: quantize_mv(max_voltage),
        min_voltage_mv: quantize_mv(min_voltage),
        max_current_ma: i32::try_from(cfg.safety.max_current_ma).unwrap_or(i32::MAX),
        max_run_ms: ch.max_run_ms.or(cfg.safety.max_run_ms),
    };

    let out = ChannelConfig {
        id: ch.id,
        sensor_module: ch.sensor_module,
        sensor_channel: ch.sensor_channel,
        actuator_channel: ch.actuator_channel,
        target_voltage_mv: quantize_mv(targets.voltage),
        target_current_ma: i32::try_from(targets.current_ma).unwrap_or(i32::MAX),
        base_step: ch.base_step.unwrap_or(cfg.defaults.base_step),
        voltage_tolerance_mv: quantize_mv(
            ch.voltage_tolerance.unwrap_or(cfg.defaults.voltage_tolerance),
        ),
        current_tolerance_ma: quantize_ma(
            ch.current_tolerance_ma
                .unwrap_or(cfg.defaults.current_tolerance_ma) as f32,
        ),
        limits,
        sensor_read_interval_ms: ch
            .sensor_read_interval_ms
            .unwrap_or(cfg.defaults.sensor_read_interval_ms),
        actuator_update_interval_ms: ch
            .actuator_update_interval_ms
            .unwrap_or(cfg.defaults.actuator_update_interval_ms),
    };
    out.validate().map_err(eyre::Report::new)?;
    Ok(out)
}
