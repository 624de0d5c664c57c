//! Multi-channel orchestration.
//!
//! Owns the active channel set and runs one OS thread per channel, each
//! executing its scheduler loop until fault, stop, or cancellation.
//! Channels are independent; the only cross-channel contention is inside
//! the per-bus facades. Status reads never block the control loops: each
//! task republishes an immutable snapshot every tick and `status()` only
//! clones the latest one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use analyzer_traits::{Clock, DutyActuator, MonotonicClock, PowerSensor};
use crossbeam_channel::{Sender, TrySendError};

use crate::channel::{ChannelConfig, SafetyLimits, validate_targets};
use crate::engine::Mode;
use crate::error::{BuildError, ChannelError, Result};
use crate::scheduler::{ChannelCommand, ChannelScheduler};
use crate::status::ChannelStatus;

/// Everything needed to bring one channel up: validated configuration,
/// regulation mode, and the facades for the buses the channel is wired to.
pub struct ChannelSpec {
    pub config: ChannelConfig,
    pub mode: Mode,
    pub sensor: Arc<dyn PowerSensor>,
    pub actuator: Arc<dyn DutyActuator>,
}

struct ChannelHandle {
    id: u8,
    limits: SafetyLimits,
    stop: Arc<AtomicBool>,
    commands: Sender<ChannelCommand>,
    shared: Arc<Mutex<ChannelStatus>>,
    join: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    fn snapshot(&self) -> ChannelStatus {
        // A poisoned slot can only come from a panicked channel task; the
        // last published snapshot is still the best answer.
        match self.shared.lock() {
            Ok(s) => s.clone(),
            Err(p) => p.into_inner().clone(),
        }
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.commands.try_send(ChannelCommand::Stop);
    }
}

pub struct Orchestrator {
    clock: Arc<dyn Clock + Send + Sync>,
    channels: Vec<ChannelHandle>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::new()))
    }

    /// Inject a clock (deterministic in tests).
    pub fn with_clock(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            clock,
            channels: Vec::new(),
        }
    }

    /// Start a set of channels. Every configuration is validated before any
    /// task is spawned; an invalid channel blocks the whole set and is
    /// reported synchronously.
    pub fn start(&mut self, specs: Vec<ChannelSpec>) -> Result<()> {
        for spec in &specs {
            spec.config.validate().map_err(eyre::Report::new)?;
            self.check_id_free(spec.config.id)?;
        }
        let mut seen = Vec::with_capacity(specs.len());
        for spec in &specs {
            if seen.contains(&spec.config.id) {
                return Err(eyre::Report::new(BuildError::DuplicateChannel(
                    spec.config.id,
                )));
            }
            seen.push(spec.config.id);
        }
        for spec in specs {
            self.spawn(spec)?;
        }
        Ok(())
    }

    /// Start (or restart) a single channel. Restarting replaces a handle
    /// whose task already terminated; a channel that is still running is a
    /// duplicate and rejected.
    pub fn start_channel(&mut self, spec: ChannelSpec) -> Result<()> {
        spec.config.validate().map_err(eyre::Report::new)?;
        self.check_id_free(spec.config.id)?;
        self.spawn(spec)
    }

    fn check_id_free(&mut self, id: u8) -> Result<()> {
        if let Some(pos) = self.channels.iter().position(|h| h.id == id) {
            if self.channels[pos].snapshot().is_running {
                return Err(eyre::Report::new(BuildError::DuplicateChannel(id)));
            }
            // Terminated (faulted or stopped): explicit restart discards
            // the old fault record.
            let mut old = self.channels.swap_remove(pos);
            old.request_stop();
            if let Some(join) = old.join.take() {
                let _ = join.join();
            }
        }
        Ok(())
    }

    fn spawn(&mut self, spec: ChannelSpec) -> Result<()> {
        let id = spec.config.id;
        let limits = spec.config.limits.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = crossbeam_channel::bounded(8);
        let shared = Arc::new(Mutex::new(ChannelStatus::idle(
            id,
            spec.mode.kind(),
            spec.config.target_voltage_mv,
            spec.config.target_current_ma,
        )));

        let scheduler = ChannelScheduler::new(
            spec.config,
            spec.mode,
            spec.sensor,
            spec.actuator,
            Arc::clone(&self.clock),
            rx,
            Arc::clone(&stop),
            Arc::clone(&shared),
        )
        .map_err(eyre::Report::new)?;

        let join = std::thread::Builder::new()
            .name(format!("channel-{id}"))
            .spawn(move || scheduler.run())?;

        tracing::debug!(channel = id, "channel task spawned");
        self.channels.push(ChannelHandle {
            id,
            limits,
            stop,
            commands: tx,
            shared,
            join: Some(join),
        });
        Ok(())
    }

    /// Retarget a running channel. Validated here against the channel's
    /// limits so the caller gets a synchronous error; the task re-validates
    /// on receipt.
    pub fn set_target(&self, id: u8, voltage_mv: i32, current_ma: i32) -> Result<()> {
        let handle = self.handle(id)?;
        validate_targets(voltage_mv, current_ma, &handle.limits).map_err(eyre::Report::new)?;
        match handle.commands.try_send(ChannelCommand::SetTarget {
            voltage_mv,
            current_ma,
        }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(eyre::Report::new(ChannelError::State(
                "channel command queue full".into(),
            ))),
            Err(TrySendError::Disconnected(_)) => Err(eyre::Report::new(ChannelError::State(
                "channel task terminated".into(),
            ))),
        }
    }

    /// Cooperatively stop one channel and wait for its fail-safe shutdown.
    /// Idempotent; stopping an already-stopped channel is a no-op.
    pub fn stop(&mut self, id: u8) -> Result<()> {
        let handle = self
            .channels
            .iter_mut()
            .find(|h| h.id == id)
            .ok_or_else(|| eyre::Report::new(ChannelError::UnknownChannel(id)))?;
        handle.request_stop();
        if let Some(join) = handle.join.take()
            && join.join().is_err()
        {
            tracing::warn!(channel = id, "channel task panicked");
        }
        Ok(())
    }

    /// Request cancellation of every channel, then wait for each fail-safe
    /// shutdown. Safe to call more than once.
    pub fn stop_all(&mut self) {
        for handle in &self.channels {
            handle.request_stop();
        }
        for handle in &mut self.channels {
            if let Some(join) = handle.join.take()
                && join.join().is_err()
            {
                tracing::warn!(channel = handle.id, "channel task panicked");
            }
        }
    }

    /// Snapshot of every channel's last published regulation state. Never
    /// blocks a control loop.
    pub fn status(&self) -> Vec<ChannelStatus> {
        self.channels.iter().map(ChannelHandle::snapshot).collect()
    }

    pub fn channel_status(&self, id: u8) -> Result<ChannelStatus> {
        Ok(self.handle(id)?.snapshot())
    }

    /// Channels whose tasks are still regulating.
    pub fn running_count(&self) -> usize {
        self.channels
            .iter()
            .filter(|h| h.snapshot().is_running)
            .count()
    }

    fn handle(&self, id: u8) -> Result<&ChannelHandle> {
        self.channels
            .iter()
            .find(|h| h.id == id)
            .ok_or_else(|| eyre::Report::new(ChannelError::UnknownChannel(id)))
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop_all();
    }
}
