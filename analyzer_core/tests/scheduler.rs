use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use analyzer_core::mocks::{ManualClock, RecordingActuator, ScriptedSensor, SensorStep, StaticSensor};
use analyzer_core::{
    BUS_RETRY_LIMIT, ChannelCommand, ChannelConfig, ChannelScheduler, ChannelStatus, FAILSAFE_DUTY,
    FaultKind, Mode, RegulationEngine, SafetyLimits, TickOutcome,
};
use analyzer_traits::{DutyActuator, PowerSensor, Sample};
use crossbeam_channel::Sender;

fn cfg(sensor_ms: u64, actuator_ms: u64) -> ChannelConfig {
    ChannelConfig {
        id: 7,
        sensor_module: 0,
        sensor_channel: 1,
        actuator_channel: 4,
        target_voltage_mv: 8_400,
        target_current_ma: 700,
        base_step: 2,
        voltage_tolerance_mv: 50,
        current_tolerance_ma: 50,
        limits: SafetyLimits::default(),
        sensor_read_interval_ms: sensor_ms,
        actuator_update_interval_ms: actuator_ms,
    }
}

struct Harness {
    scheduler: ChannelScheduler,
    clock: ManualClock,
    commands: Sender<ChannelCommand>,
    stop: Arc<AtomicBool>,
    shared: Arc<Mutex<ChannelStatus>>,
}

fn harness(
    cfg: ChannelConfig,
    mode: Mode,
    sensor: Arc<dyn PowerSensor>,
    actuator: Arc<dyn DutyActuator>,
) -> Harness {
    let clock = ManualClock::new();
    let (tx, rx) = crossbeam_channel::bounded(8);
    let stop = Arc::new(AtomicBool::new(false));
    let shared = Arc::new(Mutex::new(ChannelStatus::idle(
        cfg.id,
        mode.kind(),
        cfg.target_voltage_mv,
        cfg.target_current_ma,
    )));
    let scheduler = ChannelScheduler::new(
        cfg,
        mode,
        sensor,
        actuator,
        Arc::new(clock.clone()),
        rx,
        Arc::clone(&stop),
        Arc::clone(&shared),
    )
    .expect("valid scheduler config");
    Harness {
        scheduler,
        clock,
        commands: tx,
        stop,
        shared,
    }
}

impl Harness {
    /// One tick followed by the inter-tick advance `run()` would sleep.
    fn tick_and_advance(&mut self, ms: u64) -> TickOutcome {
        let out = self.scheduler.tick();
        self.clock.advance(Duration::from_millis(ms));
        out
    }

    fn status(&self) -> ChannelStatus {
        self.shared.lock().expect("status slot").clone()
    }
}

/// 10 ms sensor interval against a 1 ms actuator interval yields exactly
/// ten duty updates per sensor read.
#[test]
fn dual_rate_gives_ten_writes_per_read() {
    let sensor = Arc::new(ScriptedSensor::repeating(7.2, 300.0));
    let actuator = Arc::new(RecordingActuator::new());
    let mut h = harness(cfg(10, 1), Mode::ConstantCurrent, sensor.clone(), actuator.clone());

    h.scheduler.begin();
    for _ in 0..21 {
        assert_eq!(h.tick_and_advance(1), TickOutcome::Running);
    }

    // Reads at t = 0, 10, 20; a write on every tick.
    assert_eq!(sensor.reads(), 3);
    assert_eq!(actuator.duties(4).len(), 21);
}

#[test]
fn first_tick_always_reads() {
    let sensor = Arc::new(ScriptedSensor::repeating(7.2, 300.0));
    let actuator = Arc::new(RecordingActuator::new());
    let mut h = harness(cfg(1_000, 1), Mode::ConstantCurrent, sensor.clone(), actuator.clone());

    h.scheduler.begin();
    h.tick_and_advance(1);
    assert_eq!(sensor.reads(), 1, "empty cache forces a read on tick one");
    assert_eq!(actuator.duties(4).len(), 1);
}

/// With equal intervals the scheduler reads every tick and its duty
/// sequence matches a plain single-rate loop over the same samples.
#[test]
fn equal_intervals_match_single_rate_reference() {
    let steps: Vec<SensorStep> = (0..15)
        .map(|k| SensorStep::Read {
            volts: 6.5 + 0.1 * k as f32,
            ma: 100.0 * k as f32,
        })
        .collect();

    let sensor = Arc::new(ScriptedSensor::new(steps.clone()));
    let actuator = Arc::new(RecordingActuator::new());
    let mut h = harness(cfg(5, 5), Mode::ConstantCurrent, sensor, actuator.clone());
    h.scheduler.begin();
    for _ in 0..15 {
        h.tick_and_advance(5);
    }

    // Single-rate reference: read, regulate, write, every iteration.
    let ref_sensor = ScriptedSensor::new(steps);
    let mut ref_engine = RegulationEngine::new(Mode::ConstantCurrent, &cfg(5, 5));
    let expected: Vec<u16> = (0..15)
        .map(|_| {
            let s = ref_sensor.read(0, 0).expect("scripted read");
            ref_engine.next_duty(&s)
        })
        .collect();

    assert_eq!(actuator.duties(4), expected);
}

/// 5200 mA measured against a 5000 mA limit trips an
/// over-current fault; the only write after the fault is the fail-safe.
#[test]
fn over_current_fault_writes_failsafe_once() {
    let sensor = Arc::new(ScriptedSensor::new(vec![
        SensorStep::Read { volts: 7.2, ma: 300.0 },
        SensorStep::Read { volts: 7.2, ma: 5_200.0 },
    ]));
    let actuator = Arc::new(RecordingActuator::new());
    let mut h = harness(cfg(1, 1), Mode::ConstantCurrent, sensor, actuator.clone());

    h.scheduler.begin();
    assert_eq!(h.tick_and_advance(1), TickOutcome::Running);
    assert_eq!(h.tick_and_advance(1), TickOutcome::Faulted);

    let duties = actuator.duties(4);
    assert_eq!(duties.last(), Some(&FAILSAFE_DUTY));
    let writes_after_first_tick = duties.len();

    // Further ticks must not touch the actuator again.
    assert_eq!(h.tick_and_advance(1), TickOutcome::Faulted);
    assert_eq!(h.tick_and_advance(1), TickOutcome::Faulted);
    assert_eq!(actuator.duties(4).len(), writes_after_first_tick);

    let status = h.status();
    assert!(!status.is_running);
    let fault = status.fault.expect("fault recorded");
    assert_eq!(fault.kind, FaultKind::OverCurrent);
    assert_eq!(fault.sample.expect("triggering sample").current_ma, 5_200);
}

#[test]
fn transient_bus_errors_are_retried_within_the_tick() {
    let sensor = Arc::new(ScriptedSensor::new(vec![
        SensorStep::Fail,
        SensorStep::Fail,
        SensorStep::Read { volts: 7.2, ma: 300.0 },
    ]));
    let actuator = Arc::new(RecordingActuator::new());
    let mut h = harness(cfg(1, 1), Mode::ConstantCurrent, sensor, actuator.clone());

    h.scheduler.begin();
    assert_eq!(h.tick_and_advance(1), TickOutcome::Running);
    assert_eq!(actuator.duties(4).len(), 1);
    assert!(h.status().fault.is_none());
}

#[test]
fn persistent_bus_errors_escalate_to_a_fault() {
    let sensor = Arc::new(ScriptedSensor::new(vec![SensorStep::Fail]));
    let actuator = Arc::new(RecordingActuator::new());
    let mut h = harness(cfg(1, 1), Mode::ConstantCurrent, sensor.clone(), actuator.clone());

    h.scheduler.begin();
    assert_eq!(h.tick_and_advance(1), TickOutcome::Faulted);

    // Initial attempt plus the full retry budget, then the fail-safe write.
    assert_eq!(sensor.reads(), 0);
    assert_eq!(actuator.duties(4), vec![FAILSAFE_DUTY]);
    let fault = h.status().fault.expect("bus fault recorded");
    assert_eq!(fault.kind, FaultKind::BusError);
    assert!(fault.sample.is_none());
    // Sanity: the budget used here is the documented one.
    assert_eq!(BUS_RETRY_LIMIT, 3);
}

#[test]
fn run_timeout_faults_via_fresh_sample_check() {
    let mut cfg = cfg(1, 1);
    cfg.limits.max_run_ms = Some(5);
    let sensor = Arc::new(ScriptedSensor::repeating(7.2, 300.0));
    let actuator = Arc::new(RecordingActuator::new());
    let mut h = harness(cfg, Mode::ConstantCurrent, sensor, actuator.clone());

    h.scheduler.begin();
    let mut outcome = TickOutcome::Running;
    for _ in 0..10 {
        outcome = h.tick_and_advance(1);
        if outcome != TickOutcome::Running {
            break;
        }
    }
    assert_eq!(outcome, TickOutcome::Faulted);
    let fault = h.status().fault.expect("timeout fault");
    assert_eq!(fault.kind, FaultKind::Timeout);
    assert_eq!(actuator.duties(4).last(), Some(&FAILSAFE_DUTY));
}

/// A sensor that re-serves the same timestamp does not reset the read
/// clock, and regulation keeps running off the cached sample.
#[test]
fn stale_samples_are_discarded_not_fatal() {
    let sensor = Arc::new(StaticSensor {
        sample: Sample {
            bus_voltage_mv: 7_200,
            current_ma: 300,
            power_mw: 2_160,
            timestamp_ms: 42,
        },
    });
    let actuator = Arc::new(RecordingActuator::new());
    let mut h = harness(cfg(1, 1), Mode::ConstantCurrent, sensor, actuator.clone());

    h.scheduler.begin();
    for _ in 0..5 {
        assert_eq!(h.tick_and_advance(1), TickOutcome::Running);
    }
    assert!(h.status().fault.is_none());
    // Every tick still regulates from the cached sample.
    assert_eq!(actuator.duties(4).len(), 5);
}

#[test]
fn retarget_command_changes_regulation() {
    let sensor = Arc::new(ScriptedSensor::repeating(7.2, 700.0));
    let actuator = Arc::new(RecordingActuator::new());
    let mut h = harness(cfg(1, 1), Mode::ConstantCurrent, sensor, actuator.clone());

    h.scheduler.begin();
    h.tick_and_advance(1);
    // Measured current equals the target: duty holds at zero.
    assert_eq!(h.status().duty, 0);

    h.commands
        .send(ChannelCommand::SetTarget {
            voltage_mv: 8_400,
            current_ma: 1_000,
        })
        .expect("send retarget");
    h.tick_and_advance(1);
    let status = h.status();
    assert_eq!(status.target_current_ma, 1_000);
    // Error 300 mA -> x4 multiplier on base_step 2.
    assert_eq!(status.duty, 8);
}

#[test]
fn invalid_retarget_is_rejected_and_ignored() {
    let sensor = Arc::new(ScriptedSensor::repeating(7.2, 700.0));
    let actuator = Arc::new(RecordingActuator::new());
    let mut h = harness(cfg(1, 1), Mode::ConstantCurrent, sensor, actuator.clone());

    h.scheduler.begin();
    h.commands
        .send(ChannelCommand::SetTarget {
            voltage_mv: 40_000, // above the 30 V limit
            current_ma: 700,
        })
        .expect("send retarget");
    h.tick_and_advance(1);
    let status = h.status();
    assert_eq!(status.target_voltage_mv, 8_400);
    assert!(status.is_running);
}

#[test]
fn cancellation_is_cooperative_and_idempotent() {
    let sensor = Arc::new(ScriptedSensor::repeating(7.2, 300.0));
    let actuator = Arc::new(RecordingActuator::new());
    let mut h = harness(cfg(1, 1), Mode::ConstantCurrent, sensor, actuator.clone());

    h.scheduler.begin();
    h.tick_and_advance(1);
    h.stop.store(true, Ordering::Relaxed);
    assert_eq!(h.tick_and_advance(1), TickOutcome::Stopped);
    assert_eq!(actuator.duties(4).last(), Some(&FAILSAFE_DUTY));
    let writes = actuator.duties(4).len();

    // Stopping again neither writes nor changes state.
    assert_eq!(h.tick_and_advance(1), TickOutcome::Stopped);
    assert_eq!(actuator.duties(4).len(), writes);
    assert!(!h.status().is_running);
    assert!(h.status().fault.is_none());
}
