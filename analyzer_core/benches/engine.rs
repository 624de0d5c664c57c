use analyzer_core::{ChannelConfig, Mode, RegulationEngine, SafetyLimits};
use analyzer_traits::Sample;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn cfg() -> ChannelConfig {
    ChannelConfig {
        id: 0,
        sensor_module: 0,
        sensor_channel: 0,
        actuator_channel: 0,
        target_voltage_mv: 8_400,
        target_current_ma: 700,
        base_step: 2,
        voltage_tolerance_mv: 50,
        current_tolerance_ma: 50,
        limits: SafetyLimits::default(),
        sensor_read_interval_ms: 10,
        actuator_update_interval_ms: 1,
    }
}

fn bench_next_duty(c: &mut Criterion) {
    let samples: Vec<Sample> = (0..256_u64)
        .map(|k| Sample {
            bus_voltage_mv: 6_500 + (k as i32 * 17) % 2_500,
            current_ma: (k as i32 * 31) % 1_400,
            power_mw: 0,
            timestamp_ms: k,
        })
        .collect();

    c.bench_function("cc_cv_next_duty", |b| {
        let mut engine = RegulationEngine::new(Mode::ConstantCurrentConstantVoltage, &cfg());
        let mut idx = 0_usize;
        b.iter(|| {
            let s = &samples[idx % samples.len()];
            idx += 1;
            black_box(engine.next_duty(black_box(s)))
        });
    });
}

criterion_group!(benches, bench_next_duty);
criterion_main!(benches);
