//! Published channel state snapshots.

use analyzer_traits::Sample;

use crate::engine::SubMode;
use crate::error::FaultRecord;

/// Which regulation mode a channel runs; the `Custom` variant's strategy
/// function is not carried into snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    ConstantVoltage,
    ConstantCurrent,
    ConstantCurrentConstantVoltage,
    CurrentLimiting,
    Custom,
}

impl core::fmt::Display for ModeKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ModeKind::ConstantVoltage => "cv",
            ModeKind::ConstantCurrent => "cc",
            ModeKind::ConstantCurrentConstantVoltage => "cc_cv",
            ModeKind::CurrentLimiting => "current_limiting",
            ModeKind::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Immutable snapshot of one channel's regulation state, republished by the
/// owning task every tick. Cheap to clone; safe to read concurrently.
#[derive(Debug, Clone)]
pub struct ChannelStatus {
    pub id: u8,
    pub mode: ModeKind,
    /// Active sub-mode for CC/CV runs; `None` otherwise.
    pub sub_mode: Option<SubMode>,
    pub duty: u16,
    pub target_voltage_mv: i32,
    pub target_current_ma: i32,
    pub last_sample: Option<Sample>,
    pub cycle_count: u64,
    pub runtime_ms: u64,
    pub is_running: bool,
    pub fault: Option<FaultRecord>,
}

impl ChannelStatus {
    /// Initial snapshot published before the channel task runs.
    pub fn idle(id: u8, mode: ModeKind, voltage_mv: i32, current_ma: i32) -> Self {
        Self {
            id,
            mode,
            sub_mode: None,
            duty: crate::channel::FAILSAFE_DUTY,
            target_voltage_mv: voltage_mv,
            target_current_ma: current_ma,
            last_sample: None,
            cycle_count: 0,
            runtime_ms: 0,
            is_running: false,
            fault: None,
        }
    }
}
