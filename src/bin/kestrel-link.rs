use std::process::ExitCode;
use clap::Parser;
use log::{error, info};
use kestrel_link::cli::Cli;
use kestrel_link::error::{AppRunError, ConfigError};
use kestrel_link::{init_logging, run};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    info!(concat!("kestrel-link ", env!("CARGO_PKG_VERSION")));

    match run(cli) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("Another kestrel-link process is already using the bluetooth adapter");
            ExitCode::FAILURE
        },
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        },
        Ok(_) => ExitCode::SUCCESS,
    }
}
