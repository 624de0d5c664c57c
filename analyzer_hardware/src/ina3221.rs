//! INA3221 triple-channel voltage/current monitor.
//!
//! Register conversion helpers are pure and host-testable; the I2C-backed
//! facade is gated behind the `hardware` feature. One facade instance
//! serves every module on its bus; the array addressing follows the stock
//! wiring (modules at 0x40..0x43, three monitoring channels each).

/// Configuration register: continuous shunt+bus mode, all channels.
pub const REG_CONFIG: u8 = 0x00;
pub const CONFIG_CONTINUOUS_ALL: u16 = 0x7127;

/// Shunt/bus voltage register pair for a monitoring channel (0..=2).
#[inline]
pub fn shunt_voltage_reg(channel: u8) -> u8 {
    0x01 + 2 * channel
}

#[inline]
pub fn bus_voltage_reg(channel: u8) -> u8 {
    0x02 + 2 * channel
}

/// Bus voltage from the raw register: 13-bit left-aligned, 8 mV/LSB.
#[inline]
pub fn bus_voltage_mv(raw: u16) -> i32 {
    (i32::from(raw as i16) >> 3) * 8
}

/// Shunt drop from the raw register: 13-bit left-aligned, 40 µV/LSB;
/// current follows from the shunt value (µV / mΩ = mA).
#[inline]
pub fn shunt_current_ma(raw: u16, shunt_milliohms: u32) -> i32 {
    let shunt_uv = (i32::from(raw as i16) >> 3) * 40;
    shunt_uv / shunt_milliohms.max(1) as i32
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub use backed::Ina3221Array;

#[cfg(all(feature = "hardware", target_os = "linux"))]
mod backed {
    use std::time::Instant;

    use analyzer_traits::{PowerSensor, Sample};
    use tracing::trace;

    use super::{
        CONFIG_CONTINUOUS_ALL, REG_CONFIG, bus_voltage_mv, bus_voltage_reg, shunt_current_ma,
        shunt_voltage_reg,
    };
    use crate::bus::SharedI2c;
    use crate::error::{HwError, Result};

    /// All INA3221 modules on one monitoring bus.
    pub struct Ina3221Array {
        bus: SharedI2c,
        addresses: Vec<u16>,
        shunt_milliohms: u32,
        epoch: Instant,
    }

    impl Ina3221Array {
        /// Configure every module for continuous conversion and return the
        /// array facade.
        pub fn new(bus: SharedI2c, addresses: Vec<u16>, shunt_milliohms: u32) -> Result<Self> {
            {
                let mut i2c = bus.acquire();
                for &addr in &addresses {
                    i2c.set_slave_address(addr)
                        .map_err(|e| HwError::I2c(e.to_string()))?;
                    let cfg = CONFIG_CONTINUOUS_ALL.to_be_bytes();
                    i2c.write(&[REG_CONFIG, cfg[0], cfg[1]])
                        .map_err(|e| HwError::I2c(e.to_string()))?;
                }
            }
            Ok(Self {
                bus,
                addresses,
                shunt_milliohms,
                epoch: Instant::now(),
            })
        }

        fn read_u16(i2c: &mut rppal::i2c::I2c, reg: u8) -> Result<u16> {
            let mut buf = [0_u8; 2];
            i2c.write_read(&[reg], &mut buf)
                .map_err(|e| HwError::I2c(e.to_string()))?;
            Ok(u16::from_be_bytes(buf))
        }
    }

    impl PowerSensor for Ina3221Array {
        fn read(
            &self,
            module: u8,
            sub_channel: u8,
        ) -> std::result::Result<Sample, Box<dyn std::error::Error + Send + Sync>> {
            let addr = *self
                .addresses
                .get(usize::from(module))
                .ok_or(HwError::NoDevice {
                    module,
                    channel: sub_channel,
                })?;
            if sub_channel > 2 {
                return Err(Box::new(HwError::NoDevice {
                    module,
                    channel: sub_channel,
                }));
            }

            // Both register reads happen under one bus acquisition so the
            // sample is a single atomic transaction.
            let (bus_raw, shunt_raw) = {
                let mut i2c = self.bus.acquire();
                i2c.set_slave_address(addr)
                    .map_err(|e| HwError::I2c(e.to_string()))?;
                let bus_raw = Self::read_u16(&mut i2c, bus_voltage_reg(sub_channel))?;
                let shunt_raw = Self::read_u16(&mut i2c, shunt_voltage_reg(sub_channel))?;
                (bus_raw, shunt_raw)
            };

            let bus_voltage_mv = bus_voltage_mv(bus_raw);
            let current_ma = shunt_current_ma(shunt_raw, self.shunt_milliohms);
            let power_mw = ((i64::from(bus_voltage_mv) * i64::from(current_ma)) / 1000)
                .clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
            let timestamp_ms = self.epoch.elapsed().as_millis() as u64;
            trace!(module, sub_channel, bus_voltage_mv, current_ma, "ina3221 sample");
            Ok(Sample {
                bus_voltage_mv,
                current_ma,
                power_mw,
                timestamp_ms,
            })
        }
    }
}
