//! Dual-rate per-channel control loop.
//!
//! One scheduler owns one channel: its configuration, regulation engine and
//! measurement cache. The tick cadence is the actuator update interval; the
//! sensor is only read when the (slower) sensor interval has elapsed, and
//! regulation runs every tick against the fresh-or-cached sample. Sensor
//! conversion and averaging latency dominates actuation settling time, so
//! decoupling the rates buys up to `sensor_interval / actuator_interval`
//! duty updates per sample without extra bus traffic.
//!
//! Safety evaluation is bound to fresh samples only; cached data is never
//! re-checked. On any fault or stop the fail-safe duty is written exactly
//! once, before the channel is marked stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use analyzer_traits::{Clock, DutyActuator, PowerSensor, Sample};
use crossbeam_channel::{Receiver, TryRecvError};

use crate::channel::{ChannelConfig, FAILSAFE_DUTY, validate_targets};
use crate::engine::{Mode, RegulationEngine};
use crate::error::{BuildError, FaultKind, FaultRecord};
use crate::hw_error::map_bus_error;
use crate::measurement::MeasurementCache;
use crate::safety::{SafetyVerdict, check_sample};
use crate::status::ChannelStatus;
use crate::util::STATUS_LOG_EVERY;

/// Transient bus failures are retried this many times within a tick before
/// the channel escalates to a `BusError` fault.
pub const BUS_RETRY_LIMIT: u32 = 3;

/// Operator requests delivered to a running channel task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCommand {
    SetTarget { voltage_mv: i32, current_ma: i32 },
    Stop,
}

/// Result of one scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running,
    /// Cooperative stop; fail-safe duty already written.
    Stopped,
    /// Terminal fault recorded; fail-safe duty already written.
    Faulted,
}

pub struct ChannelScheduler {
    cfg: ChannelConfig,
    engine: RegulationEngine,
    cache: MeasurementCache,
    sensor: Arc<dyn PowerSensor>,
    actuator: Arc<dyn DutyActuator>,
    clock: Arc<dyn Clock + Send + Sync>,
    commands: Receiver<ChannelCommand>,
    stop: Arc<AtomicBool>,
    shared: Arc<Mutex<ChannelStatus>>,
    epoch: Instant,
    start_ms: u64,
    last_read_ms: Option<u64>,
    cycle_count: u64,
    fault: Option<FaultRecord>,
    running: bool,
    failsafe_written: bool,
}

impl ChannelScheduler {
    /// Validate the configuration and assemble the loop state. A rejected
    /// configuration never reaches the control loop.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: ChannelConfig,
        mode: Mode,
        sensor: Arc<dyn PowerSensor>,
        actuator: Arc<dyn DutyActuator>,
        clock: Arc<dyn Clock + Send + Sync>,
        commands: Receiver<ChannelCommand>,
        stop: Arc<AtomicBool>,
        shared: Arc<Mutex<ChannelStatus>>,
    ) -> Result<Self, BuildError> {
        cfg.validate()?;
        let engine = RegulationEngine::new(mode, &cfg);
        let epoch = clock.now();
        Ok(Self {
            cfg,
            engine,
            cache: MeasurementCache::new(),
            sensor,
            actuator,
            clock,
            commands,
            stop,
            shared,
            epoch,
            start_ms: 0,
            last_read_ms: None,
            cycle_count: 0,
            fault: None,
            running: false,
            failsafe_written: false,
        })
    }

    /// Reset per-run state and mark the channel running. Must be called
    /// before the first `tick`.
    pub fn begin(&mut self) {
        self.epoch = self.clock.now();
        self.start_ms = 0;
        self.last_read_ms = None;
        self.cycle_count = 0;
        self.fault = None;
        self.running = true;
        self.failsafe_written = false;
        tracing::info!(
            channel = self.cfg.id,
            mode = %self.engine.mode_kind(),
            target_voltage_mv = self.cfg.target_voltage_mv,
            target_current_ma = self.cfg.target_current_ma,
            sensor_interval_ms = self.cfg.sensor_read_interval_ms,
            actuator_interval_ms = self.cfg.actuator_update_interval_ms,
            "regulation start"
        );
        self.publish();
    }

    /// Run until faulted, stopped, or cancelled.
    pub fn run(mut self) {
        self.begin();
        let tick = Duration::from_millis(self.cfg.actuator_update_interval_ms);
        loop {
            match self.tick() {
                TickOutcome::Running => self.clock.sleep(tick),
                TickOutcome::Stopped | TickOutcome::Faulted => break,
            }
        }
    }

    /// One scheduler iteration: drain commands, read the sensor if due,
    /// regulate from the fresh-or-cached sample, publish a snapshot.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.running {
            // Terminal; no writes of any kind happen past this point.
            return if self.fault.is_some() {
                TickOutcome::Faulted
            } else {
                TickOutcome::Stopped
            };
        }
        if self.stop.load(Ordering::Relaxed) {
            self.shutdown("cancelled");
            return TickOutcome::Stopped;
        }
        if let Some(out) = self.drain_commands() {
            return out;
        }

        let now = self.clock.ms_since(self.epoch);
        // First tick always reads (empty cache); afterwards only when the
        // sensor interval has elapsed. Saturating arithmetic keeps the
        // comparison wraparound-safe.
        let read_due = match self.last_read_ms {
            None => true,
            Some(t) => now.saturating_sub(t) >= self.cfg.sensor_read_interval_ms,
        };
        if read_due && !self.acquire_sample(now) {
            return TickOutcome::Faulted;
        }

        if let Some(sample) = self.cache.latest().copied() {
            let duty = self.engine.next_duty(&sample);
            if !self.write_duty(duty) {
                return TickOutcome::Faulted;
            }
        }

        self.cycle_count += 1;
        if self.cycle_count.is_multiple_of(STATUS_LOG_EVERY)
            && let Some(s) = self.cache.latest()
        {
            tracing::debug!(
                channel = self.cfg.id,
                bus_voltage_mv = s.bus_voltage_mv,
                current_ma = s.current_ma,
                power_mw = s.power_mw,
                duty = self.engine.duty(),
                cycles = self.cycle_count,
                "regulation status"
            );
        }
        self.publish();
        TickOutcome::Running
    }

    /// Read the sensor with bounded retries, update the cache and run the
    /// safety monitor on the fresh sample. Returns false when the tick must
    /// end in a fault (fail-safe already written).
    fn acquire_sample(&mut self, now: u64) -> bool {
        let mut attempts = 0_u32;
        let sample = loop {
            match self
                .sensor
                .read(self.cfg.sensor_module, self.cfg.sensor_channel)
            {
                Ok(s) => break s,
                Err(e) => {
                    let err = map_bus_error(&*e);
                    attempts += 1;
                    if attempts > BUS_RETRY_LIMIT {
                        tracing::error!(
                            channel = self.cfg.id,
                            error = %err,
                            "sensor read failed past retry budget"
                        );
                        self.fault(FaultKind::BusError, None, now);
                        return false;
                    }
                    tracing::warn!(
                        channel = self.cfg.id,
                        attempt = attempts,
                        error = %err,
                        "sensor read failed; retrying"
                    );
                }
            }
        };

        if !self.cache.store(sample) {
            // Not strictly newer than the cached entry; never presented to
            // the safety monitor as fresh.
            tracing::debug!(
                channel = self.cfg.id,
                timestamp_ms = sample.timestamp_ms,
                "discarding stale sensor sample"
            );
            return true;
        }
        self.last_read_ms = Some(now);

        let elapsed = now.saturating_sub(self.start_ms);
        match check_sample(&sample, &self.cfg.limits, elapsed) {
            SafetyVerdict::Ok => {}
            SafetyVerdict::UnderVoltage => {
                if self.running {
                    tracing::warn!(
                        channel = self.cfg.id,
                        bus_voltage_mv = sample.bus_voltage_mv,
                        min_voltage_mv = self.cfg.limits.min_voltage_mv,
                        "bus voltage below floor while regulating"
                    );
                } else {
                    tracing::debug!(
                        channel = self.cfg.id,
                        bus_voltage_mv = sample.bus_voltage_mv,
                        "bus voltage below floor"
                    );
                }
            }
            SafetyVerdict::Fault(kind) => {
                self.fault(kind, Some(sample), now);
                return false;
            }
        }
        true
    }

    /// Apply a duty target with bounded retries. Returns false when the
    /// tick must end in a fault.
    fn write_duty(&mut self, duty: u16) -> bool {
        let mut attempts = 0_u32;
        loop {
            match self.actuator.set_duty(self.cfg.actuator_channel, duty) {
                Ok(()) => return true,
                Err(e) => {
                    let err = map_bus_error(&*e);
                    attempts += 1;
                    if attempts > BUS_RETRY_LIMIT {
                        tracing::error!(
                            channel = self.cfg.id,
                            error = %err,
                            "duty write failed past retry budget"
                        );
                        let now = self.clock.ms_since(self.epoch);
                        self.fault(FaultKind::BusError, self.cache.latest().copied(), now);
                        return false;
                    }
                    tracing::warn!(
                        channel = self.cfg.id,
                        attempt = attempts,
                        error = %err,
                        "duty write failed; retrying"
                    );
                }
            }
        }
    }

    fn drain_commands(&mut self) -> Option<TickOutcome> {
        loop {
            match self.commands.try_recv() {
                Ok(ChannelCommand::SetTarget {
                    voltage_mv,
                    current_ma,
                }) => match validate_targets(voltage_mv, current_ma, &self.cfg.limits) {
                    Ok(()) => {
                        self.cfg.target_voltage_mv = voltage_mv;
                        self.cfg.target_current_ma = current_ma;
                        self.engine.retarget(voltage_mv, current_ma);
                        tracing::info!(
                            channel = self.cfg.id,
                            target_voltage_mv = voltage_mv,
                            target_current_ma = current_ma,
                            "targets updated"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(channel = self.cfg.id, error = %e, "rejecting retarget");
                    }
                },
                Ok(ChannelCommand::Stop) => {
                    self.shutdown("stop requested");
                    return Some(TickOutcome::Stopped);
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return None,
            }
        }
    }

    /// Record a terminal fault: fail-safe write first, then mark stopped.
    fn fault(&mut self, kind: FaultKind, sample: Option<Sample>, now: u64) {
        tracing::error!(channel = self.cfg.id, fault = %kind, "channel fault");
        self.fault = Some(FaultRecord {
            kind,
            sample,
            timestamp_ms: now,
        });
        self.write_failsafe();
        self.running = false;
        self.publish();
    }

    /// Cooperative stop; idempotent.
    fn shutdown(&mut self, reason: &str) {
        if self.running {
            tracing::info!(
                channel = self.cfg.id,
                reason,
                cycles = self.cycle_count,
                "channel stopping"
            );
        }
        self.write_failsafe();
        self.running = false;
        self.publish();
    }

    /// The one post-fault/post-stop actuator write: output disabled.
    fn write_failsafe(&mut self) {
        if self.failsafe_written {
            return;
        }
        self.failsafe_written = true;
        if let Err(e) = self
            .actuator
            .set_duty(self.cfg.actuator_channel, FAILSAFE_DUTY)
        {
            tracing::error!(channel = self.cfg.id, error = %e, "fail-safe duty write failed");
        }
    }

    fn publish(&mut self) {
        let snapshot = ChannelStatus {
            id: self.cfg.id,
            mode: self.engine.mode_kind(),
            sub_mode: self.engine.sub_mode(),
            duty: self.engine.duty(),
            target_voltage_mv: self.cfg.target_voltage_mv,
            target_current_ma: self.cfg.target_current_ma,
            last_sample: self.cache.latest().copied(),
            cycle_count: self.cycle_count,
            runtime_ms: self.clock.ms_since(self.epoch).saturating_sub(self.start_ms),
            is_running: self.running,
            fault: self.fault.clone(),
        };
        if let Ok(mut slot) = self.shared.lock() {
            *slot = snapshot;
        }
    }
}
