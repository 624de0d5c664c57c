#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Control core of the multi-channel battery analyzer (hardware-agnostic).
//!
//! All hardware interactions go through the `analyzer_traits::PowerSensor`
//! and `analyzer_traits::DutyActuator` facades.
//!
//! ## Architecture
//!
//! - **Measurement**: per-channel latest-sample cache (`measurement`)
//! - **Regulation**: adaptive step-size duty control with CC/CV and related
//!   modes (`engine`)
//! - **Safety**: stateless limit checks on fresh samples (`safety`)
//! - **Scheduling**: dual-rate loop decoupling sensor reads from actuator
//!   updates (`scheduler`)
//! - **Orchestration**: one task per channel over shared bus facades
//!   (`orchestrator`)
//!
//! ## Fixed-Point Arithmetic
//!
//! Internals operate in millivolts / milliamps (`i32`) and milliseconds
//! (`u64`) for deterministic behavior; duty is a bounded `u16` on the
//! 12-bit PWM scale. Physical-unit config surfaces quantize once at
//! channel start.

pub mod channel;
pub mod conversions;
pub mod engine;
pub mod error;
pub mod hw_error;
pub mod measurement;
pub mod mocks;
pub mod orchestrator;
pub mod safety;
pub mod scheduler;
pub mod status;
pub mod util;

pub use channel::{ChannelConfig, FAILSAFE_DUTY, MAX_DUTY, MIN_DUTY, SafetyLimits};
pub use engine::{Mode, RegulationEngine, StrategyFn, SubMode};
pub use error::{BuildError, ChannelError, FaultKind, FaultRecord};
pub use measurement::{MeasurementCache, Sample};
pub use orchestrator::{ChannelSpec, Orchestrator};
pub use safety::{SafetyVerdict, check_sample};
pub use scheduler::{BUS_RETRY_LIMIT, ChannelCommand, ChannelScheduler, TickOutcome};
pub use status::{ChannelStatus, ModeKind};
