#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and battery profiles for the analyzer.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Built-in battery profiles supply target presets plus per-chemistry
//!   voltage limits; explicit channel values always win over a profile.
//!
//! Units on this surface are physical (volts, mA, ms); the core quantizes
//! to integer fixed-point once when a channel starts.

use std::path::Path;

use eyre::WrapErr;
use serde::Deserialize;

/// The sensor array addresses four 3-channel monitor modules, so twelve
/// logical channels at most.
pub const MAX_CHANNELS: usize = 12;

/// Monitoring channels per sensor module (INA3221).
pub const SENSOR_CHANNELS_PER_MODULE: u8 = 3;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub defaults: Defaults,
    pub safety: Safety,
    pub hardware: Hardware,
    pub logging: Logging,
    pub channels: Vec<ChannelCfg>,
}

/// Workspace-wide channel defaults; any field can be overridden per channel.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Defaults {
    pub sensor_read_interval_ms: u64,
    pub actuator_update_interval_ms: u64,
    pub base_step: u16,
    /// Regulation deadband around the voltage target (volts).
    pub voltage_tolerance: f32,
    /// Regulation deadband around the current target (mA).
    pub current_tolerance_ma: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            sensor_read_interval_ms: 10,
            actuator_update_interval_ms: 1,
            base_step: 2,
            voltage_tolerance: 0.05,
            current_tolerance_ma: 50,
        }
    }
}

/// Hard safety limits; a profile's chemistry limits narrow these per
/// channel but never widen them past validation.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Safety {
    pub max_voltage: f32,
    pub min_voltage: f32,
    pub max_current_ma: u32,
    /// Optional hard cap on run duration (ms); absent disables the check.
    pub max_run_ms: Option<u64>,
}

impl Default for Safety {
    fn default() -> Self {
        Self {
            max_voltage: 30.0,
            min_voltage: 0.1,
            max_current_ma: 5_000,
            max_run_ms: None,
        }
    }
}

/// Bus wiring of the monitor array and PWM expander.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Hardware {
    /// I2C bus index carrying the sensor modules.
    pub sensor_bus: u8,
    /// I2C bus index carrying the PWM expander.
    pub actuator_bus: u8,
    /// Sensor module addresses in module-id order (0x40..0x43 stock).
    pub module_addresses: Vec<u16>,
    pub actuator_address: u16,
    pub pwm_freq_hz: u32,
    /// Shunt resistor value per monitoring channel, in milliohms.
    pub shunt_milliohms: u32,
}

impl Default for Hardware {
    fn default() -> Self {
        Self {
            sensor_bus: 0,
            actuator_bus: 1,
            module_addresses: vec![0x40, 0x41, 0x42, 0x43],
            actuator_address: 0x40,
            pwm_freq_hz: 1_526,
            shunt_milliohms: 100,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    /// Path to a log file (JSON lines); console-only when absent.
    pub file: Option<String>,
    /// "error" | "warn" | "info" | "debug" | "trace"
    pub level: Option<String>,
}

/// Regulation mode selector for one channel.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModeCfg {
    #[serde(rename = "cv")]
    ConstantVoltage,
    #[serde(rename = "cc")]
    ConstantCurrent,
    #[default]
    #[serde(rename = "cc_cv")]
    ConstantCurrentConstantVoltage,
    #[serde(rename = "current_limiting")]
    CurrentLimiting,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelCfg {
    pub id: u8,
    pub sensor_module: u8,
    pub sensor_channel: u8,
    pub actuator_channel: u8,
    #[serde(default)]
    pub mode: ModeCfg,
    /// Battery profile preset; explicit targets below override it.
    pub profile: Option<String>,
    pub target_voltage: Option<f32>,
    pub target_current_ma: Option<u32>,
    pub base_step: Option<u16>,
    pub voltage_tolerance: Option<f32>,
    pub current_tolerance_ma: Option<u32>,
    pub sensor_read_interval_ms: Option<u64>,
    pub actuator_update_interval_ms: Option<u64>,
    pub max_run_ms: Option<u64>,
}

/// Targets for one channel after profile resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedTargets {
    pub voltage: f32,
    pub current_ma: u32,
    /// Chemistry voltage floor from the profile, if one was named.
    pub min_voltage: Option<f32>,
    /// Chemistry voltage ceiling from the profile, if one was named.
    pub max_voltage: Option<f32>,
}

impl ChannelCfg {
    /// Resolve the channel's targets from its profile and explicit fields.
    /// Explicit values win; both targets must be determined one way or the
    /// other.
    pub fn resolve_targets(&self) -> eyre::Result<ResolvedTargets> {
        let profile = match &self.profile {
            Some(name) => Some(
                profile(name)
                    .ok_or_else(|| eyre::eyre!("channel {}: unknown profile {name:?}", self.id))?,
            ),
            None => None,
        };
        let voltage = self
            .target_voltage
            .or(profile.map(|p| p.voltage))
            .ok_or_else(|| {
                eyre::eyre!("channel {}: no target voltage (set it or name a profile)", self.id)
            })?;
        let current_ma = self
            .target_current_ma
            .or(profile.map(|p| p.current_ma))
            .ok_or_else(|| {
                eyre::eyre!("channel {}: no target current (set it or name a profile)", self.id)
            })?;
        if !voltage.is_finite() || voltage <= 0.0 {
            eyre::bail!("channel {}: target voltage must be finite and > 0", self.id);
        }
        if current_ma == 0 {
            eyre::bail!("channel {}: target current must be > 0", self.id);
        }
        Ok(ResolvedTargets {
            voltage,
            current_ma,
            min_voltage: profile.map(|p| p.min_voltage),
            max_voltage: profile.map(|p| p.max_voltage),
        })
    }
}

impl Config {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading config {}", path.display()))?;
        let cfg: Self = toml::from_str(&text)
            .wrap_err_with(|| format!("parsing config {}", path.display()))?;
        cfg.validate()
            .wrap_err_with(|| format!("validating config {}", path.display()))?;
        Ok(cfg)
    }

    /// Structural validation; the core re-validates each channel's derived
    /// runtime configuration at start.
    pub fn validate(&self) -> eyre::Result<()> {
        if self.channels.len() > MAX_CHANNELS {
            eyre::bail!(
                "{} channels configured, at most {MAX_CHANNELS} supported",
                self.channels.len()
            );
        }
        if !self.safety.max_voltage.is_finite()
            || !self.safety.min_voltage.is_finite()
            || self.safety.min_voltage >= self.safety.max_voltage
        {
            eyre::bail!("safety: min_voltage must be finite and below max_voltage");
        }
        if self.safety.max_current_ma == 0 {
            eyre::bail!("safety: max_current_ma must be > 0");
        }
        if self.defaults.sensor_read_interval_ms == 0
            || self.defaults.actuator_update_interval_ms == 0
        {
            eyre::bail!("defaults: intervals must be >= 1 ms");
        }
        if self.hardware.module_addresses.is_empty() {
            eyre::bail!("hardware: module_addresses must not be empty");
        }
        if self.hardware.pwm_freq_hz == 0 {
            eyre::bail!("hardware: pwm_freq_hz must be > 0");
        }
        if self.hardware.shunt_milliohms == 0 {
            eyre::bail!("hardware: shunt_milliohms must be > 0");
        }

        let mut ids: Vec<u8> = Vec::with_capacity(self.channels.len());
        for ch in &self.channels {
            if ids.contains(&ch.id) {
                eyre::bail!("duplicate channel id {}", ch.id);
            }
            ids.push(ch.id);
            if ch.sensor_channel >= SENSOR_CHANNELS_PER_MODULE {
                eyre::bail!(
                    "channel {}: sensor_channel {} out of range 0..{SENSOR_CHANNELS_PER_MODULE}",
                    ch.id,
                    ch.sensor_channel
                );
            }
            if usize::from(ch.sensor_module) >= self.hardware.module_addresses.len() {
                eyre::bail!(
                    "channel {}: sensor_module {} has no configured address",
                    ch.id,
                    ch.sensor_module
                );
            }
            ch.resolve_targets()?;
            if let Some(tol) = ch.voltage_tolerance
                && (!tol.is_finite() || tol < 0.0)
            {
                eyre::bail!("channel {}: voltage_tolerance must be finite and >= 0", ch.id);
            }
        }
        Ok(())
    }
}

/// Parse a config from TOML text without touching the filesystem.
pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Battery chemistry preset: regulation targets plus voltage limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Profile {
    pub name: &'static str,
    pub display_name: &'static str,
    pub voltage: f32,
    pub current_ma: u32,
    pub min_voltage: f32,
    pub max_voltage: f32,
}

pub const PROFILES: &[Profile] = &[
    Profile {
        name: "li_ion_single",
        display_name: "Li-ion Single Cell",
        voltage: 4.2,
        current_ma: 1_000,
        min_voltage: 3.0,
        max_voltage: 4.2,
    },
    Profile {
        name: "li_ion_2s",
        display_name: "Li-ion 2S Pack",
        voltage: 8.4,
        current_ma: 2_000,
        min_voltage: 6.0,
        max_voltage: 8.4,
    },
    Profile {
        name: "li_ion_3s",
        display_name: "Li-ion 3S Pack",
        voltage: 12.6,
        current_ma: 2_000,
        min_voltage: 9.0,
        max_voltage: 12.6,
    },
    Profile {
        name: "lead_acid_6v",
        display_name: "6V Lead Acid",
        voltage: 7.2,
        current_ma: 1_500,
        min_voltage: 5.5,
        max_voltage: 7.5,
    },
    Profile {
        name: "lead_acid_12v",
        display_name: "12V Lead Acid",
        voltage: 14.4,
        current_ma: 3_000,
        min_voltage: 11.0,
        max_voltage: 15.0,
    },
    Profile {
        name: "nimh_6cell",
        display_name: "NiMH 6-Cell",
        voltage: 8.4,
        current_ma: 1_000,
        min_voltage: 6.0,
        max_voltage: 9.0,
    },
];

/// Look up a built-in profile by its config name.
pub fn profile(name: &str) -> Option<&'static Profile> {
    PROFILES.iter().find(|p| p.name == name)
}
