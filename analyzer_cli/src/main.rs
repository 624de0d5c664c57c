mod cli;
mod run;

use std::path::Path;

use analyzer_config::{Config, PROFILES};
use clap::Parser;
use cli::{Cli, Commands, FILE_GUARD};
use eyre::WrapErr;
use tracing_subscriber::EnvFilter;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();

    match &args.cmd {
        Commands::Profiles => {
            for p in PROFILES {
                println!(
                    "{:<14} {:<18} {:.1}V @ {}mA (window {:.1}V..{:.1}V)",
                    p.name, p.display_name, p.voltage, p.current_ma, p.min_voltage, p.max_voltage
                );
            }
            Ok(())
        }
        Commands::Check => {
            let cfg = Config::load(&args.config)?;
            init_tracing(&args, &cfg)?;
            println!(
                "config OK: {} channel(s), {} sensor module(s)",
                cfg.channels.len(),
                cfg.hardware.module_addresses.len()
            );
            Ok(())
        }
        Commands::Run {
            duration_s,
            simulate,
            channels,
            status_every_s,
        } => {
            let cfg = Config::load(&args.config)?;
            init_tracing(&args, &cfg)?;
            run::run_channels(
                &cfg,
                &run::RunArgs {
                    duration_s: *duration_s,
                    simulate: *simulate,
                    channels: channels.clone(),
                    status_every_s: *status_every_s,
                    json: args.json,
                },
            )
        }
    }
}

fn init_tracing(args: &Cli, cfg: &Config) -> eyre::Result<()> {
    // RUST_LOG wins; then the CLI flag; the config level backs the default.
    let level = if args.log_level == "info" {
        cfg.logging.level.clone().unwrap_or_else(|| "info".into())
    } else {
        args.log_level.clone()
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .wrap_err_with(|| format!("invalid log level {level:?}"))?;

    if let Some(file) = &cfg.logging.file {
        let path = Path::new(file);
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let name = path.file_name().unwrap_or_else(|| "analyzer.log".as_ref());
        let appender =
            tracing_appender::rolling::never(dir.unwrap_or_else(|| Path::new(".")), name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(writer)
            .init();
    } else if args.json {
        // Keep stdout clean for the JSON status lines.
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}
