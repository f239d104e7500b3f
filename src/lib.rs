use std::env;
use std::sync::Arc;
use futures::StreamExt;
use log::{info, warn};

use crate::cli::{Cli, Command};
use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::device::btle::BtleTransport;
use crate::device::constants::STATUS_AUTO_DISCONNECTED;
use crate::device::publisher::PublishedState;
use crate::device::supervisor::ConnectionSupervisor;
use crate::device::types::{ConnectionState, WindClock};
use crate::error::{AppRunError, ConfigError};

pub mod cli;
pub mod config;
pub mod device;
pub mod error;

pub fn init_logging(verbose: bool) {
    let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

async fn load_config(config_io: &ConfigIO) -> Result<Config, ConfigError> {
    match config_io.read().await {
        Ok(config) => Ok(config),
        Err(err) if err.is_file_not_found_error() => {
            info!("Config file not found, using defaults");
            Ok(Config::default())
        },
        Err(err) => Err(err),
    }
}

// a watch ends once the connection has been torn down by something other than us
fn is_final(state: &PublishedState) -> bool {
    match state.state {
        ConnectionState::Failed(_) | ConnectionState::Disconnected => true,
        ConnectionState::Idle => state.status == STATUS_AUTO_DISCONNECTED,
        _ => false,
    }
}

fn print_state(state: &PublishedState, json: bool) -> Result<(), AppRunError> {
    if json {
        println!("{}", serde_json::to_string(state)?);
        return Ok(());
    }

    match (&state.snapshot, &state.error) {
        (Some(snapshot), _) => println!("{:?}: {} | {}", state.state, state.status, snapshot),
        (None, Some(error)) => println!("{:?}: {} ({})", state.state, state.status, error),
        (None, None) => println!("{:?}: {}", state.state, state.status),
    }
    Ok(())
}

async fn read_once(supervisor: ConnectionSupervisor<BtleTransport>, wind_clock: Option<u8>) -> Result<(), AppRunError> {
    if let Some(hour) = wind_clock {
        supervisor.set_wind_clock(Some(WindClock::new(hour)?));
    }

    supervisor.acquire().await;
    let state = supervisor.current();
    supervisor.disconnect().await;

    match state.snapshot {
        Some(snapshot) => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        },
        None => Err(AppRunError::NoData { message: state.error.unwrap_or(state.status) }),
    }
}

async fn watch(supervisor: ConnectionSupervisor<BtleTransport>, json: bool) -> Result<(), AppRunError> {
    let mut subscription = supervisor.subscribe();
    let acquisition = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.acquire().await }
    });

    'mainloop: loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                supervisor.disconnect().await;
                break 'mainloop;
            },
            state = subscription.receiver.next() => match state {
                None => break 'mainloop,
                Some(state) => {
                    print_state(&state, json)?;
                    if is_final(&state) {
                        break 'mainloop;
                    }
                },
            },
        }
    }

    supervisor.unsubscribe(subscription.id);
    if let Err(err) = acquisition.await {
        warn!("Acquisition task failed: {}", err);
    }
    Ok(())
}

async fn run_command(cli: Cli) -> Result<(), AppRunError> {
    let config_io = match &cli.config {
        Some(path) => ConfigIO::open(path)?,
        None => ConfigIO::open_default()?,
    };

    match cli.command {
        Command::Config { init } => {
            let config = load_config(&config_io).await?;
            if init {
                config_io.save(&config).await?;
            }
            println!("{}", config_io.path().to_string_lossy());
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        },
        Command::Read { wind_clock } => {
            let mut instance_lock = config_io.instance_lock()?;
            let _guard = instance_lock.acquire()?;
            let config = load_config(&config_io).await?;

            let supervisor = ConnectionSupervisor::new(Arc::new(BtleTransport::new()), config.device_config());
            read_once(supervisor, wind_clock).await
        },
        Command::Watch { json } => {
            let mut instance_lock = config_io.instance_lock()?;
            let _guard = instance_lock.acquire()?;
            let config = load_config(&config_io).await?;

            let supervisor = ConnectionSupervisor::new(Arc::new(BtleTransport::new()), config.device_config());
            watch(supervisor, json).await
        },
    }
}

pub fn run(cli: Cli) -> Result<(), AppRunError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_command(cli))
}
