use analyzer_core::{
    ChannelConfig, MAX_DUTY, MIN_DUTY, Mode, RegulationEngine, SafetyLimits,
};
use analyzer_core::engine::{current_multiplier, voltage_multiplier};
use analyzer_traits::Sample;
use proptest::prelude::*;

fn cfg(base_step: u16) -> ChannelConfig {
    ChannelConfig {
        id: 0,
        sensor_module: 0,
        sensor_channel: 0,
        actuator_channel: 0,
        target_voltage_mv: 8_400,
        target_current_ma: 700,
        base_step,
        voltage_tolerance_mv: 50,
        current_tolerance_ma: 50,
        limits: SafetyLimits::default(),
        sensor_read_interval_ms: 10,
        actuator_update_interval_ms: 1,
    }
}

fn mode(selector: u8) -> Mode {
    match selector % 4 {
        0 => Mode::ConstantVoltage,
        1 => Mode::ConstantCurrent,
        2 => Mode::ConstantCurrentConstantVoltage,
        _ => Mode::CurrentLimiting,
    }
}

prop_compose! {
    fn samples_strategy()(
        points in prop::collection::vec((0_i32..40_000, 0_i32..8_000), 1..200)
    ) -> Vec<Sample> {
        points
            .into_iter()
            .enumerate()
            .map(|(k, (mv, ma))| Sample {
                bus_voltage_mv: mv,
                current_ma: ma,
                power_mw: ((i64::from(mv) * i64::from(ma)) / 1000) as i32,
                timestamp_ms: k as u64,
            })
            .collect()
    }
}

proptest! {
    /// Duty stays inside [MIN_DUTY, MAX_DUTY] for every reachable state,
    /// whatever the measurement sequence, mode, or step size.
    #[test]
    fn duty_always_within_bounds(
        samples in samples_strategy(),
        selector in 0_u8..4,
        base_step in 1_u16..512,
    ) {
        let mut engine = RegulationEngine::new(mode(selector), &cfg(base_step));
        for s in &samples {
            let duty = engine.next_duty(s);
            prop_assert!((MIN_DUTY..=MAX_DUTY).contains(&duty));
            prop_assert_eq!(duty, engine.duty());
        }
    }

    /// For a fixed error sign, a larger error magnitude never produces a
    /// smaller duty adjustment.
    #[test]
    fn step_magnitude_is_monotonic_in_error(
        err_small in 1_i32..4_000,
        err_extra in 0_i32..4_000,
        below in proptest::bool::ANY,
    ) {
        let err_large = err_small + err_extra;
        // Mid-range start so neither step clamps.
        let start = 2_048_i32;

        let delta = |err: i32| -> i32 {
            let mut engine = RegulationEngine::new(Mode::ConstantVoltage, &cfg(2));
            // Private duty state is reached through the public law: walk the
            // engine to the start duty with a huge error first.
            while i32::from(engine.duty()) < start {
                let walked = engine.next_duty(&Sample {
                    bus_voltage_mv: 0,
                    current_ma: 0,
                    power_mw: 0,
                    timestamp_ms: 0,
                });
                if walked == MAX_DUTY {
                    break;
                }
            }
            let at = i32::from(engine.duty());
            let measured = if below { 8_400 - err } else { 8_400 + err };
            let next = i32::from(engine.next_duty(&Sample {
                bus_voltage_mv: measured,
                current_ma: 0,
                power_mw: 0,
                timestamp_ms: 1,
            }));
            (next - at).abs()
        };

        let d_small = delta(err_small);
        let d_large = delta(err_large);
        prop_assert!(
            d_large >= d_small,
            "|error| {} gave step {}, |error| {} gave step {}",
            err_large, d_large, err_small, d_small
        );
    }

    /// The multiplier tables themselves are non-decreasing in |error|.
    #[test]
    fn multipliers_are_non_decreasing(a in 0_i32..10_000, b in 0_i32..10_000) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(voltage_multiplier(lo) <= voltage_multiplier(hi));
        prop_assert!(current_multiplier(lo) <= current_multiplier(hi));
    }
}
