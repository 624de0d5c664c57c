pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// One voltage/current/power reading from a sensor channel.
///
/// All fields are integer fixed-point: millivolts, milliamps, milliwatts.
/// `timestamp_ms` is milliseconds since the producing facade's epoch and is
/// strictly monotonic per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub bus_voltage_mv: i32,
    pub current_ma: i32,
    pub power_mw: i32,
    pub timestamp_ms: u64,
}

impl Sample {
    /// Build a sample from physical units, quantizing to mV/mA and deriving
    /// power. Non-finite inputs quantize to 0.
    pub fn from_volts_ma(volts: f32, ma: f32, timestamp_ms: u64) -> Self {
        let bus_voltage_mv = quantize_mv(volts);
        let current_ma = quantize_ma(ma);
        // mV * mA = nW; divide back to mW in i64 to avoid overflow.
        let power_mw = ((bus_voltage_mv as i64 * current_ma as i64) / 1000)
            .clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        Self {
            bus_voltage_mv,
            current_ma,
            power_mw,
            timestamp_ms,
        }
    }
}

/// Quantize volts to integer millivolts, rounding to nearest and clamping to
/// the i32 range. Non-finite values (NaN/±Inf) map to 0.
#[inline]
pub fn quantize_mv(volts: f32) -> i32 {
    if !volts.is_finite() {
        return 0;
    }
    let scaled = (volts * 1000.0).round();
    if scaled >= i32::MAX as f32 {
        i32::MAX
    } else if scaled <= i32::MIN as f32 {
        i32::MIN
    } else {
        scaled as i32
    }
}

/// Quantize milliamps to integer milliamps (same NaN/range handling as
/// `quantize_mv`, identity scale).
#[inline]
pub fn quantize_ma(ma: f32) -> i32 {
    if !ma.is_finite() {
        return 0;
    }
    let r = ma.round();
    if r >= i32::MAX as f32 {
        i32::MAX
    } else if r <= i32::MIN as f32 {
        i32::MIN
    } else {
        r as i32
    }
}

/// Voltage/current sensor facade for a physical sensor module array.
///
/// Implementations must serialize concurrent calls addressing the same
/// physical module (one bus transaction at a time); channels wired to
/// distinct buses may proceed in parallel. `module` selects the device on
/// the bus, `sub_channel` the monitoring channel within it.
pub trait PowerSensor: Send + Sync {
    fn read(
        &self,
        module: u8,
        sub_channel: u8,
    ) -> Result<Sample, Box<dyn std::error::Error + Send + Sync>>;
}

/// PWM duty-cycle actuator facade for one physical expander device.
///
/// Implementations must serialize concurrent writes to the same device and
/// reject out-of-range duty values even though callers validate them.
pub trait DutyActuator: Send + Sync {
    fn set_duty(
        &self,
        channel: u8,
        duty: u16,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
