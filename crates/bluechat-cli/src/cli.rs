//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Adapter backend (memory or bluez), overriding the configuration
    #[arg(short, long)]
    pub backend: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show adapter state and bonded devices
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// List bonded devices, optionally discovering nearby ones
    Devices {
        /// Run discovery for this many seconds
        #[arg(short, long, value_name = "SECS")]
        scan: Option<u64>,
    },
    /// Wait for a peer to connect, then chat
    Listen,
    /// Connect to a bonded device, then chat
    Connect {
        /// Hardware address of the peer, e.g. 00:11:22:AA:BB:CC
        address: String,
    },
    /// Run two endpoints on an in-memory radio and exchange messages
    Demo {
        /// Number of messages each side sends
        #[arg(short, long, default_value_t = 3)]
        messages: usize,
    },
    /// Print an example configuration file
    Config,
}
