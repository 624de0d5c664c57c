#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Hardware facades for the analyzer.
//!
//! Real devices (INA3221 monitor array, PCA9685 PWM expander) live behind
//! the `hardware` feature and share one `SharedI2c` handle per physical
//! bus. The simulated rig below implements the same facade traits against
//! a simple charging-cell plant so everything upstream runs on any host.

pub mod error;
pub mod ina3221;
pub mod pca9685;

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod bus;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use analyzer_traits::{DutyActuator, PowerSensor, Sample};

use crate::error::HwError;
use crate::pca9685::PWM_MAX;

fn lock_unpoisoned<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(p) => p.into_inner(),
    }
}

/// Plant parameters for one simulated cell.
#[derive(Debug, Clone, Copy)]
pub struct SimCellParams {
    /// Resting voltage before charging starts.
    pub open_circuit_v: f32,
    /// Charge current at full duty.
    pub full_scale_ma: u32,
    /// Series resistance producing the IR rise under load.
    pub internal_res_mohm: u32,
    /// Accumulated charge (mA-reads) per mV of open-circuit rise; larger
    /// values charge slower. Zero freezes the state of charge.
    pub charge_scale: u32,
}

impl Default for SimCellParams {
    fn default() -> Self {
        Self {
            open_circuit_v: 6.5,
            full_scale_ma: 3_000,
            internal_res_mohm: 150,
            charge_scale: 2_000,
        }
    }
}

struct SimCell {
    actuator_channel: u8,
    open_circuit_mv: i32,
    full_scale_ma: i32,
    internal_res_mohm: i32,
    charge_scale: u32,
    charge_acc: u32,
}

struct RigState {
    cells: Mutex<HashMap<(u8, u8), SimCell>>,
    duties: Mutex<HashMap<u8, u16>>,
    seq: AtomicU64,
}

/// Simulated monitor array + PWM expander pair sharing one plant.
///
/// Duty drives current linearly; bus voltage is the open-circuit voltage
/// plus the IR rise, and the open-circuit voltage creeps up as charge
/// accumulates. Increasing duty strictly increases output, matching the
/// power stage contract.
pub struct SimulatedRig {
    state: Arc<RigState>,
}

impl Default for SimulatedRig {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRig {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RigState {
                cells: Mutex::new(HashMap::new()),
                duties: Mutex::new(HashMap::new()),
                seq: AtomicU64::new(0),
            }),
        }
    }

    /// Wire a cell between a sensor position and an actuator channel.
    pub fn add_cell(
        &self,
        sensor_module: u8,
        sensor_channel: u8,
        actuator_channel: u8,
        params: SimCellParams,
    ) {
        let cell = SimCell {
            actuator_channel,
            open_circuit_mv: analyzer_traits::quantize_mv(params.open_circuit_v),
            full_scale_ma: params.full_scale_ma.min(i32::MAX as u32) as i32,
            internal_res_mohm: params.internal_res_mohm.min(i32::MAX as u32) as i32,
            charge_scale: params.charge_scale,
            charge_acc: 0,
        };
        lock_unpoisoned(&self.state.cells).insert((sensor_module, sensor_channel), cell);
    }

    /// Facade handle implementing `PowerSensor`.
    pub fn sensor(&self) -> SimulatedSensor {
        SimulatedSensor {
            state: Arc::clone(&self.state),
        }
    }

    /// Facade handle implementing `DutyActuator`.
    pub fn actuator(&self) -> SimulatedActuator {
        SimulatedActuator {
            state: Arc::clone(&self.state),
        }
    }
}

#[derive(Clone)]
pub struct SimulatedSensor {
    state: Arc<RigState>,
}

impl PowerSensor for SimulatedSensor {
    fn read(
        &self,
        module: u8,
        sub_channel: u8,
    ) -> Result<Sample, Box<dyn std::error::Error + Send + Sync>> {
        let duty = {
            let cells = lock_unpoisoned(&self.state.cells);
            let cell = cells.get(&(module, sub_channel)).ok_or(HwError::NoDevice {
                module,
                channel: sub_channel,
            })?;
            let duties = lock_unpoisoned(&self.state.duties);
            duties.get(&cell.actuator_channel).copied().unwrap_or(0)
        };

        let mut cells = lock_unpoisoned(&self.state.cells);
        let cell = cells.get_mut(&(module, sub_channel)).ok_or(HwError::NoDevice {
            module,
            channel: sub_channel,
        })?;

        let current_ma = i32::from(duty) * cell.full_scale_ma / i32::from(PWM_MAX);
        let bus_voltage_mv = cell.open_circuit_mv + current_ma * cell.internal_res_mohm / 1000;

        // Integrate charge: accumulated current raises the open-circuit
        // voltage once per `charge_scale` mA-reads.
        if cell.charge_scale > 0 {
            cell.charge_acc += current_ma.max(0) as u32;
            let rise = cell.charge_acc / cell.charge_scale;
            cell.open_circuit_mv += rise as i32;
            cell.charge_acc %= cell.charge_scale;
        }

        let power_mw = ((i64::from(bus_voltage_mv) * i64::from(current_ma)) / 1000)
            .clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
        let timestamp_ms = self.state.seq.fetch_add(1, Ordering::Relaxed);
        Ok(Sample {
            bus_voltage_mv,
            current_ma,
            power_mw,
            timestamp_ms,
        })
    }
}

#[derive(Clone)]
pub struct SimulatedActuator {
    state: Arc<RigState>,
}

impl DutyActuator for SimulatedActuator {
    fn set_duty(
        &self,
        channel: u8,
        duty: u16,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if duty > PWM_MAX {
            return Err(Box::new(HwError::DutyOutOfRange {
                duty,
                max: PWM_MAX,
            }));
        }
        lock_unpoisoned(&self.state.duties).insert(channel, duty);
        Ok(())
    }
}
