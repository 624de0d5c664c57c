//! Facade assembly and the operator run loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use analyzer_config::{ChannelCfg, Config};
use analyzer_core::conversions::channel_config;
use analyzer_core::util::duty_ratio;
use analyzer_core::{ChannelSpec, ChannelStatus, Orchestrator};
use analyzer_traits::{DutyActuator, PowerSensor};
use eyre::WrapErr;

pub struct RunArgs {
    pub duration_s: Option<u64>,
    pub simulate: bool,
    pub channels: Vec<u8>,
    pub status_every_s: u64,
    pub json: bool,
}

pub fn run_channels(cfg: &Config, args: &RunArgs) -> eyre::Result<()> {
    let selected: Vec<&ChannelCfg> = cfg
        .channels
        .iter()
        .filter(|ch| args.channels.is_empty() || args.channels.contains(&ch.id))
        .collect();
    if selected.is_empty() {
        eyre::bail!("no channels selected (config defines {})", cfg.channels.len());
    }

    let (sensor, actuator) = if args.simulate {
        build_simulated(&selected)?
    } else {
        build_hardware(cfg)?
    };

    let mut specs = Vec::with_capacity(selected.len());
    for ch in &selected {
        specs.push(ChannelSpec {
            config: channel_config(cfg, ch)
                .wrap_err_with(|| format!("channel {} configuration", ch.id))?,
            mode: ch.mode.into(),
            sensor: Arc::clone(&sensor),
            actuator: Arc::clone(&actuator),
        });
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::Relaxed);
        })
        .wrap_err("installing ctrl-c handler")?;
    }

    let mut orch = Orchestrator::new();
    orch.start(specs)?;
    tracing::info!(
        channels = selected.len(),
        simulate = args.simulate,
        "regulation running"
    );

    let started = Instant::now();
    let deadline = args.duration_s.map(|s| started + Duration::from_secs(s));
    let status_every = Duration::from_secs(args.status_every_s.max(1));
    let mut next_report = started + status_every;
    loop {
        std::thread::sleep(Duration::from_millis(100));
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("interrupt received; stopping all channels");
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::info!("run duration elapsed; stopping all channels");
            break;
        }
        if orch.running_count() == 0 {
            tracing::warn!("no channels left running");
            break;
        }
        if Instant::now() >= next_report {
            for status in orch.status() {
                report(&status, args.json);
            }
            next_report += status_every;
        }
    }

    orch.stop_all();
    let final_status = orch.status();
    for status in &final_status {
        report(status, args.json);
    }

    let faulted: Vec<String> = final_status
        .iter()
        .filter_map(|s| s.fault.as_ref().map(|f| format!("{}: {}", s.id, f.kind)))
        .collect();
    if !faulted.is_empty() {
        eyre::bail!("channels faulted: {}", faulted.join(", "));
    }
    Ok(())
}

fn build_simulated(
    selected: &[&ChannelCfg],
) -> eyre::Result<(Arc<dyn PowerSensor>, Arc<dyn DutyActuator>)> {
    use analyzer_hardware::{SimCellParams, SimulatedRig};

    let rig = SimulatedRig::new();
    for ch in selected {
        let targets = ch.resolve_targets()?;
        rig.add_cell(
            ch.sensor_module,
            ch.sensor_channel,
            ch.actuator_channel,
            SimCellParams {
                // A partially discharged cell well below the target.
                open_circuit_v: (targets.voltage - 1.9).max(0.5),
                ..SimCellParams::default()
            },
        );
    }
    Ok((Arc::new(rig.sensor()), Arc::new(rig.actuator())))
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn build_hardware(cfg: &Config) -> eyre::Result<(Arc<dyn PowerSensor>, Arc<dyn DutyActuator>)> {
    use analyzer_hardware::bus::SharedI2c;
    use analyzer_hardware::ina3221::Ina3221Array;
    use analyzer_hardware::pca9685::Pca9685;

    let sensor_bus = SharedI2c::open(cfg.hardware.sensor_bus)
        .wrap_err_with(|| format!("opening i2c bus {}", cfg.hardware.sensor_bus))?;
    // The expander may share the monitoring segment; reuse the handle so
    // the mutual exclusion stays scoped to the physical bus.
    let actuator_bus = if cfg.hardware.actuator_bus == cfg.hardware.sensor_bus {
        sensor_bus.clone()
    } else {
        SharedI2c::open(cfg.hardware.actuator_bus)
            .wrap_err_with(|| format!("opening i2c bus {}", cfg.hardware.actuator_bus))?
    };

    let sensor = Ina3221Array::new(
        sensor_bus,
        cfg.hardware.module_addresses.clone(),
        cfg.hardware.shunt_milliohms,
    )
    .wrap_err("initializing ina3221 array")?;
    let actuator = Pca9685::new(
        actuator_bus,
        cfg.hardware.actuator_address,
        cfg.hardware.pwm_freq_hz,
    )
    .wrap_err("initializing pca9685")?;
    Ok((Arc::new(sensor), Arc::new(actuator)))
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn build_hardware(_cfg: &Config) -> eyre::Result<(Arc<dyn PowerSensor>, Arc<dyn DutyActuator>)> {
    eyre::bail!("built without hardware support; rerun with --simulate")
}

fn report(status: &ChannelStatus, json: bool) {
    if json {
        let line = serde_json::json!({
            "channel": status.id,
            "mode": status.mode.to_string(),
            "sub_mode": status.sub_mode.map(|m| format!("{m:?}")),
            "running": status.is_running,
            "duty": status.duty,
            "duty_ratio": duty_ratio(status.duty),
            "bus_voltage_mv": status.last_sample.map(|s| s.bus_voltage_mv),
            "current_ma": status.last_sample.map(|s| s.current_ma),
            "power_mw": status.last_sample.map(|s| s.power_mw),
            "target_voltage_mv": status.target_voltage_mv,
            "target_current_ma": status.target_current_ma,
            "cycles": status.cycle_count,
            "runtime_ms": status.runtime_ms,
            "fault": status.fault.as_ref().map(|f| f.kind.to_string()),
        });
        println!("{line}");
    } else {
        let (v, i, p) = status
            .last_sample
            .map_or((0, 0, 0), |s| (s.bus_voltage_mv, s.current_ma, s.power_mw));
        println!(
            "ch{} [{}] V:{:.3}V I:{}mA P:{:.2}W D:{} ({:.1}%) T:{:.3}V/{}mA cycles:{} {}",
            status.id,
            status.mode,
            f64::from(v) / 1000.0,
            i,
            f64::from(p) / 1000.0,
            status.duty,
            f64::from(duty_ratio(status.duty)) * 100.0,
            f64::from(status.target_voltage_mv) / 1000.0,
            status.target_current_ma,
            status.cycle_count,
            status
                .fault
                .as_ref()
                .map_or_else(
                    || if status.is_running { "running".to_string() } else { "stopped".to_string() },
                    |f| format!("FAULT: {}", f.kind)
                ),
        );
    }
}
