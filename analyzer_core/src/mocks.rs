//! Test and helper doubles for the control core.
//!
//! Shared by the crate's integration tests and by callers that want to run
//! the orchestrator without hardware: a deterministic clock, scripted
//! sensors, and a recording actuator that models bus-transaction
//! boundaries.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use analyzer_traits::{Clock, DutyActuator, PowerSensor, Sample};

use crate::channel::MAX_DUTY;

fn lock_unpoisoned<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(p) => p.into_inner(),
    }
}

/// Deterministic clock whose time only moves when advanced (directly or via
/// `sleep`). Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, d: Duration) {
        let mut off = lock_unpoisoned(&self.offset);
        *off = off.saturating_add(d);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *lock_unpoisoned(&self.offset)
    }

    /// Advances the shared timeline instead of sleeping.
    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

/// One step of a sensor script.
#[derive(Debug, Clone, Copy)]
pub enum SensorStep {
    Read { volts: f32, ma: f32 },
    Fail,
}

/// Sensor facade that plays back a script; the last step repeats forever.
/// Timestamps increase by one per successful read, so every sample is
/// strictly newer than the previous one.
pub struct ScriptedSensor {
    state: Mutex<ScriptState>,
}

struct ScriptState {
    steps: Vec<SensorStep>,
    idx: usize,
    next_ts: u64,
    reads: u64,
}

impl ScriptedSensor {
    pub fn new(steps: Vec<SensorStep>) -> Self {
        Self {
            state: Mutex::new(ScriptState {
                steps,
                idx: 0,
                next_ts: 0,
                reads: 0,
            }),
        }
    }

    /// A sensor that reports the same operating point forever.
    pub fn repeating(volts: f32, ma: f32) -> Self {
        Self::new(vec![SensorStep::Read { volts, ma }])
    }

    /// Number of successful reads served so far.
    pub fn reads(&self) -> u64 {
        lock_unpoisoned(&self.state).reads
    }
}

impl PowerSensor for ScriptedSensor {
    fn read(
        &self,
        _module: u8,
        _sub_channel: u8,
    ) -> Result<Sample, Box<dyn std::error::Error + Send + Sync>> {
        let mut st = lock_unpoisoned(&self.state);
        let step = match st.steps.get(st.idx) {
            Some(s) => *s,
            None => match st.steps.last() {
                Some(s) => *s,
                None => return Err("empty sensor script".into()),
            },
        };
        st.idx = st.idx.saturating_add(1);
        match step {
            SensorStep::Fail => Err("injected bus failure".into()),
            SensorStep::Read { volts, ma } => {
                let ts = st.next_ts;
                st.next_ts += 1;
                st.reads += 1;
                Ok(Sample::from_volts_ma(volts, ma, ts))
            }
        }
    }
}

/// Sensor that returns the exact same sample (including timestamp) on every
/// read; useful to exercise the stale-sample path of the cache.
pub struct StaticSensor {
    pub sample: Sample,
}

impl PowerSensor for StaticSensor {
    fn read(
        &self,
        _module: u8,
        _sub_channel: u8,
    ) -> Result<Sample, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.sample)
    }
}

/// Begin/end boundary of one recorded actuator transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorEvent {
    Begin { channel: u8, duty: u16 },
    End { channel: u8 },
}

/// Actuator facade that records transaction boundaries. The internal lock
/// is held for the whole transaction (optionally stretched by `hold`), so
/// concurrent callers exercise the same mutual exclusion a real bus facade
/// provides, and the event log exposes any interleaving.
#[derive(Default)]
pub struct RecordingActuator {
    events: Mutex<Vec<ActuatorEvent>>,
    hold: Duration,
    fail_next: AtomicU32,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep each transaction open for `hold` to widen race windows.
    pub fn with_transaction_hold(hold: Duration) -> Self {
        Self {
            hold,
            ..Self::default()
        }
    }

    /// Fail the next `n` writes with an injected bus error.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::Relaxed);
    }

    pub fn events(&self) -> Vec<ActuatorEvent> {
        lock_unpoisoned(&self.events).clone()
    }

    /// Duty values written to `channel`, in order.
    pub fn duties(&self, channel: u8) -> Vec<u16> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ActuatorEvent::Begin { channel: c, duty } if c == channel => Some(duty),
                _ => None,
            })
            .collect()
    }
}

impl DutyActuator for RecordingActuator {
    fn set_duty(
        &self,
        channel: u8,
        duty: u16,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if duty > MAX_DUTY {
            return Err(format!("duty {duty} out of range 0..={MAX_DUTY}").into());
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1))
            .is_ok();
        if injected {
            return Err("injected bus failure".into());
        }
        let mut log = lock_unpoisoned(&self.events);
        log.push(ActuatorEvent::Begin { channel, duty });
        if !self.hold.is_zero() {
            std::thread::sleep(self.hold);
        }
        log.push(ActuatorEvent::End { channel });
        Ok(())
    }
}
