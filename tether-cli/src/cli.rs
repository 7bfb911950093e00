//! CLI argument definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Namespace lifecycle and peer-id driver", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create namespaces with sample subsystems, cross-link them and tear them down
    Demo {
        /// Number of namespaces to create
        #[arg(short, long, default_value = "3", value_parser = clap::value_parser!(u16).range(1..))]
        namespaces: u16,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Exchange RTM_NEWNSID / RTM_GETNSID messages between in-process namespaces
    Nsid {
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show version information
    Version,
}
