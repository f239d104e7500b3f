use std::path::PathBuf;
use clap::{Parser, Subcommand};

/// Read weather data from a Kestrel meter over bluetooth.
#[derive(Debug, Parser)]
#[command(name = "kestrel-link")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a configuration file, instead of the default location
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Take one reading, print it as JSON and disconnect
    Read {
        /// Wind direction as a clock position (1-12) to attach to the reading
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=12))]
        wind_clock: Option<u8>,
    },

    /// Take one reading and follow the connection until it is torn down (Ctrl-C disconnects)
    Watch {
        /// Print every published state as a JSON line
        #[arg(long)]
        json: bool,
    },

    /// Print the configuration file location and the effective configuration
    Config {
        /// Write the effective configuration back to the file
        #[arg(long)]
        init: bool,
    },
}
