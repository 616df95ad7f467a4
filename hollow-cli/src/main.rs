//! Hollow — virtualized depot workspace CLI.
//!
//! # Usage
//!
//! ```text
//! hollow sync <filespec>... [--method virtual|regular] [--flush atomic|single]
//!             [--revision R] [--force] [--preview] [--quiet] [--flush-only]
//!             [--clobber] [--always-resident REGEX] [--client-size BYTES]
//!             [--local --root DIR] [--port N]
//! hollow resident <pattern> --root <dir> [--preview]
//! hollow reconfig --root <dir> [--to-server ...] [--to-workspace ...] [--to-user ...] [--preview]
//! hollow setting get <name> | set <name> <value> | list [--json]
//! hollow service run [--port N] | status [--json] | gc [--idle-secs N]
//! ```

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    reconfig::ReconfigArgs, resident::ResidentArgs, service::ServiceCommand,
    setting::SettingCommand, sync::SyncArgs,
};
use hollow_core::types::{FlushType, SyncMethod};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "hollow",
    version,
    about = "Sync depot files as on-demand placeholders instead of full content",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync depot file specs into the workspace (placeholders by default).
    Sync(SyncArgs),

    /// Hydrate placeholders matching a pattern to full content.
    Resident(ResidentArgs),

    /// Rebind placeholder depot metadata without touching content.
    Reconfig(ReconfigArgs),

    /// Read and write service settings.
    Setting {
        #[command(subcommand)]
        command: SettingCommand,
    },

    /// Run and inspect the background service.
    Service {
        #[command(subcommand)]
        command: ServiceCommand,
    },
}

// ---------------------------------------------------------------------------
// Shared enum arguments — parsed from CLI strings, convert to core types
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `SyncMethod` from CLI args.
#[derive(Debug, Clone, Default)]
pub struct SyncMethodArg(pub SyncMethod);

impl FromStr for SyncMethodArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "virtual" => Ok(Self(SyncMethod::Virtual)),
            "regular" => Ok(Self(SyncMethod::Regular)),
            other => Err(format!(
                "unknown sync method '{other}'; expected: virtual, regular"
            )),
        }
    }
}

impl fmt::Display for SyncMethodArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Thin wrapper so clap can parse `FlushType` from CLI args.
#[derive(Debug, Clone, Default)]
pub struct FlushTypeArg(pub FlushType);

impl FromStr for FlushTypeArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "atomic" => Ok(Self(FlushType::Atomic)),
            "single" => Ok(Self(FlushType::Single)),
            other => Err(format!(
                "unknown flush type '{other}'; expected: atomic, single"
            )),
        }
    }
}

impl fmt::Display for FlushTypeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Sync(args) => args.run(),
        Commands::Resident(args) => args.run(),
        Commands::Reconfig(args) => args.run(),
        Commands::Setting { command } => commands::setting::run(command),
        Commands::Service { command } => commands::service::run(command),
    }
}

/// Log frames streamed back from the service re-emit through `tracing`;
/// keep them out of normal output unless RUST_LOG asks for them.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
