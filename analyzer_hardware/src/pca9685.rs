//! PCA9685 16-channel 12-bit PWM expander.
//!
//! Register encoding helpers are pure and host-testable; the I2C-backed
//! facade is gated behind the `hardware` feature.

/// Full scale of the 12-bit duty range.
pub const PWM_MAX: u16 = 4095;

pub const REG_MODE1: u8 = 0x00;
pub const REG_PRESCALE: u8 = 0xFE;
pub const LED0_ON_L: u8 = 0x06;

pub const MODE1_SLEEP: u8 = 0x10;
pub const MODE1_AUTO_INCREMENT: u8 = 0x20;
pub const MODE1_RESTART: u8 = 0x80;

const OSCILLATOR_HZ: u32 = 25_000_000;

/// Base of the 4-register ON_L/ON_H/OFF_L/OFF_H block for a channel.
#[inline]
pub fn led_base(channel: u8) -> u8 {
    LED0_ON_L + 4 * channel
}

/// Prescale value for a PWM frequency, clamped to the device range.
#[inline]
pub fn prescale_for(freq_hz: u32) -> u8 {
    let div = 4096 * freq_hz.max(1);
    let pre = (OSCILLATOR_HZ + div / 2) / div;
    pre.saturating_sub(1).clamp(3, 255) as u8
}

/// ON_L/ON_H/OFF_L/OFF_H payload for a duty value. Zero uses the full-off
/// latch and full scale the full-on latch, per datasheet.
#[inline]
pub fn duty_registers(duty: u16) -> [u8; 4] {
    if duty == 0 {
        [0, 0, 0, 0x10]
    } else if duty >= PWM_MAX {
        [0, 0x10, 0, 0]
    } else {
        [0, 0, (duty & 0xFF) as u8, (duty >> 8) as u8]
    }
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub use backed::Pca9685;

#[cfg(all(feature = "hardware", target_os = "linux"))]
mod backed {
    use analyzer_traits::DutyActuator;
    use tracing::trace;

    use super::{
        MODE1_AUTO_INCREMENT, MODE1_SLEEP, PWM_MAX, REG_MODE1, REG_PRESCALE, duty_registers,
        led_base, prescale_for,
    };
    use crate::bus::SharedI2c;
    use crate::error::{HwError, Result};

    pub struct Pca9685 {
        bus: SharedI2c,
        address: u16,
    }

    impl Pca9685 {
        /// Program the PWM frequency and wake the device.
        pub fn new(bus: SharedI2c, address: u16, freq_hz: u32) -> Result<Self> {
            {
                let mut i2c = bus.acquire();
                i2c.set_slave_address(address)
                    .map_err(|e| HwError::I2c(e.to_string()))?;
                // Prescale can only be set while asleep.
                i2c.write(&[REG_MODE1, MODE1_AUTO_INCREMENT | MODE1_SLEEP])
                    .map_err(|e| HwError::I2c(e.to_string()))?;
                i2c.write(&[REG_PRESCALE, prescale_for(freq_hz)])
                    .map_err(|e| HwError::I2c(e.to_string()))?;
                i2c.write(&[REG_MODE1, MODE1_AUTO_INCREMENT])
                    .map_err(|e| HwError::I2c(e.to_string()))?;
            }
            // Oscillator restart time per datasheet.
            std::thread::sleep(std::time::Duration::from_micros(500));
            Ok(Self { bus, address })
        }
    }

    impl DutyActuator for Pca9685 {
        fn set_duty(
            &self,
            channel: u8,
            duty: u16,
        ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            if duty > PWM_MAX {
                return Err(Box::new(HwError::DutyOutOfRange {
                    duty,
                    max: PWM_MAX,
                }));
            }
            let regs = duty_registers(duty);
            // One auto-incremented write covers the whole ON/OFF block, so
            // the update is a single atomic transaction.
            let mut i2c = self.bus.acquire();
            i2c.set_slave_address(self.address)
                .map_err(|e| HwError::I2c(e.to_string()))?;
            i2c.write(&[led_base(channel), regs[0], regs[1], regs[2], regs[3]])
                .map_err(|e| HwError::I2c(e.to_string()))?;
            trace!(channel, duty, "pca9685 duty write");
            Ok(())
        }
    }
}
