//! Entry point for the bookmate catalog shell.
//!
//! - Parse the optional data-source argument.
//! - Load configuration (`conf/config.toml` or `BOOKMATE_CONFIG_PATH`).
//! - Restore saved databases and login data from the preference store.
//! - Run the cold-start launch, then the command loop.

mod config;
mod messages;
mod terminal;

use crate::config::{config_path, load_config};
use crate::terminal::{Shell, TerminalHost, shutdown};
use anyhow::{Context, Result};
use bookmate_core::{AppContext, Background, LaunchOutcome, Preferences, builtin_registry, ui_channel};
use std::env;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

fn main() {
    let reload_handle = init_tracing();
    if let Err(err) = run(&reload_handle) {
        error!("{err:?}");
        std::process::exit(1);
    }
}

fn run(reload_handle: &ReloadHandle) -> Result<()> {
    let argument = parse_args();
    let config_path = config_path();
    let config = load_config(&config_path);
    set_log_level(reload_handle, config.log_level.as_filter_str());
    info!(
        config = %config_path.display(),
        preferences = %config.preferences_path.display(),
        provider = %config.default_provider,
        level = %config.log_level,
        "Starting bookmate"
    );

    let preferences = Preferences::load(&config.preferences_path);
    let load_notice = preferences.load_error().map(|err| {
        format!(
            "Saved settings in {} could not be read and were reset ({err}).",
            preferences.path().display()
        )
    });
    let context = Arc::new(AppContext::load(builtin_registry(), preferences));
    let host = Arc::new(TerminalHost::stdio(Arc::clone(&context)));
    if let Some(notice) = load_notice {
        host.say(notice);
    }
    install_shutdown_handler(Arc::clone(&context), Arc::clone(&host));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("bookmate-worker")
        .build()
        .context("Failed to start the worker runtime")?;
    let (queue, ui_loop) = ui_channel();
    let background = Background::new(runtime.handle().clone(), queue);
    let mut shell = Shell::new(
        Arc::clone(&context),
        Arc::clone(&host),
        background,
        ui_loop,
        config,
    );

    match shell.start(argument.as_deref())? {
        LaunchOutcome::Opened { database, .. } => {
            info!(url = %database.meta().url(), "Opened database at startup")
        }
        outcome => info!(?outcome, "Startup finished without an open database"),
    }
    shell.run()?;
    shutdown(&context, &host);
    Ok(())
}

fn parse_args() -> Option<String> {
    env::args().nth(1).filter(|arg| !arg.trim().is_empty())
}

fn install_shutdown_handler(context: Arc<AppContext>, host: Arc<TerminalHost>) {
    if let Err(err) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C; closing databases and saving preferences");
        shutdown(&context, &host);
        std::process::exit(130);
    }) {
        warn!("Failed to install Ctrl+C signal handler: {err}");
    }
}

fn init_tracing() -> ReloadHandle {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter_layer),
        )
        .init();
    handle
}

fn set_log_level(handle: &ReloadHandle, level: &str) {
    if env::var_os("RUST_LOG").is_some() {
        info!(%level, "RUST_LOG is set; ignoring configured log level");
        return;
    }
    let parsed = EnvFilter::builder()
        .parse(level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = handle.modify(|filter| *filter = parsed) {
        warn!(%level, "Failed to update log level from config: {err}");
    } else {
        info!(%level, "Applied log level from config");
    }
}
