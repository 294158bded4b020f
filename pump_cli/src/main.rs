mod cli;
mod error_fmt;
mod run;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use pump_config::Config;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    let _ = color_eyre::install();

    if let Err(e) = real_main(cli) {
        let json = JSON_MODE.get().copied().unwrap_or(false);
        if json {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn real_main(cli: Cli) -> eyre::Result<()> {
    let cfg = run::load_config(&cli.config)?;
    init_tracing(&cli, &cfg);
    tracing::debug!(config = %cli.config.display(), fast = cli.fast, "config loaded");

    match cli.cmd {
        Commands::Run {
            setpoint,
            duration_ms,
            params,
            calibrate_first,
            save_params,
        } => {
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&shutdown);
            ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
                .map_err(|e| eyre::eyre!("install Ctrl-C handler: {e}"))?;
            run::run(
                &cfg,
                setpoint,
                duration_ms,
                params.as_deref(),
                calibrate_first,
                save_params.as_deref(),
                cli.fast,
                cli.json,
                &shutdown,
            )?;
        }
        Commands::Calibrate { f_nom, params, out } => {
            run::calibrate(
                &cfg,
                f_nom,
                params.as_deref(),
                out.as_deref(),
                cli.fast,
                cli.json,
            )?;
        }
        Commands::FitScale { csv, params } => {
            run::fit_scale(&csv, params.as_deref(), cli.json)?;
        }
        Commands::ShowParams { params } => {
            run::show_params(&cfg, params.as_deref(), cli.json)?;
        }
        Commands::SelfCheck => run::self_check(&cfg, cli.json)?,
    }
    Ok(())
}

/// Console layer on stderr (JSON when `--json`), plus an optional file layer
/// from `[logging]`. Level: `RUST_LOG`, then `--log-level`, then
/// `logging.level`, then `info`.
fn init_tracing(cli: &Cli, cfg: &Config) {
    let level = cli
        .log_level
        .as_deref()
        .or(cfg.logging.level.as_deref())
        .unwrap_or("info")
        .to_owned();
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let console = if cli.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter())
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(filter())
            .boxed()
    };

    let file_layer = cfg.logging.file.as_ref().map(|path| {
        let path = std::path::Path::new(path);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let name = path
            .file_name()
            .map_or_else(|| "pumpctl.log".into(), |n| n.to_string_lossy().into_owned());
        let appender = match cfg.logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(filter())
            .boxed()
    });

    let _ = tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init();
}
