//! Command-line argument parsing.
//!
//! Keeps argument parsing separate from execution logic.

use clap::{Parser, Subcommand, ValueEnum};
use nixling_common::InstallMethod;
use std::path::PathBuf;

/// Nixling - talk to your NixOS package manager in plain language
#[derive(Parser)]
#[command(name = "nixlingctl")]
#[command(about = "Nixling - natural-language package management for NixOS", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (overrides $NIXLING_CONFIG and the default locations)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace); RUST_LOG wins when set
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output JSON only
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Carry out a request, e.g. `nixlingctl ask install firefox`
    Ask {
        /// The request, in plain words
        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        text: Vec<String>,

        /// Show the command without running it
        #[arg(long)]
        dry_run: bool,

        /// Give up after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Show how a request would be understood and what would run
    Plan {
        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        text: Vec<String>,
    },

    /// List profile generations (rollback targets)
    Generations {
        /// Which profile to list
        #[arg(long, value_enum, default_value_t = MethodArg::Imperative)]
        method: MethodArg,
    },

    /// Inspect or reset the cache
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Hit rate, sizes and evictions
    Stats,
    /// Drop every cached entry
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum MethodArg {
    Declarative,
    HomeManager,
    Imperative,
}

impl From<MethodArg> for InstallMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Declarative => InstallMethod::Declarative,
            MethodArg::HomeManager => InstallMethod::HomeManager,
            MethodArg::Imperative => InstallMethod::Imperative,
        }
    }
}
