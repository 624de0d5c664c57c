use analyzer_traits::Sample;
use thiserror::Error;

/// Why a channel was forced into its terminal fault state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Bus voltage exceeded the configured maximum (OVP).
    OverVoltage,
    /// Current exceeded the configured maximum (OCP).
    OverCurrent,
    /// Temperature protection (OTP); reserved for temperature-equipped
    /// builds, never produced from a voltage/current sample.
    OverTemperature,
    /// Run exceeded the configured maximum duration.
    Timeout,
    /// Bus transactions kept failing past the retry budget.
    BusError,
}

impl core::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            FaultKind::OverVoltage => "over-voltage",
            FaultKind::OverCurrent => "over-current",
            FaultKind::OverTemperature => "over-temperature",
            FaultKind::Timeout => "max run time exceeded",
            FaultKind::BusError => "bus error",
        };
        f.write_str(s)
    }
}

/// Terminal fault state of a channel. Once recorded the channel stays
/// stopped until explicitly restarted; `status()` reports it indefinitely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultRecord {
    pub kind: FaultKind,
    /// The sample that tripped the fault; absent for bus faults raised
    /// without a successful read.
    pub sample: Option<Sample>,
    /// Milliseconds since channel start when the fault was recorded.
    pub timestamp_ms: u64,
}

#[derive(Debug, Error, Clone)]
pub enum ChannelError {
    #[error("bus error: {0}")]
    Bus(String),
    #[error("safety fault: {0}")]
    Safety(FaultKind),
    #[error("unknown channel {0}")]
    UnknownChannel(u8),
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing sensor facade")]
    MissingSensor,
    #[error("missing actuator facade")]
    MissingActuator,
    #[error("duplicate channel id {0}")]
    DuplicateChannel(u8),
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
