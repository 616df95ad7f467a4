//! `hollow reconfig` — rebind placeholder depot metadata in place.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use hollow_core::types::{DepotServer, DepotUser, DepotWorkspace};
use hollow_sync::{NullProgress, ReconfigureTarget};

use crate::commands::{self, DepotArgs};

/// Arguments for `hollow reconfig`.
#[derive(Args, Debug)]
pub struct ReconfigArgs {
    /// Workspace root holding the placeholders.
    #[arg(long)]
    pub root: PathBuf,

    /// Only rebind placeholders matching this regex.
    #[arg(long)]
    pub pattern: Option<String>,

    /// New depot server recorded in matching placeholders.
    #[arg(long)]
    pub to_server: Option<String>,

    /// New workspace (client) name recorded in matching placeholders.
    #[arg(long)]
    pub to_workspace: Option<String>,

    /// New depot user recorded in matching placeholders.
    #[arg(long)]
    pub to_user: Option<String>,

    /// Report what would be rebound without touching anything.
    #[arg(long)]
    pub preview: bool,

    /// Suppress progress output.
    #[arg(long)]
    pub quiet: bool,

    #[command(flatten)]
    pub depot: DepotArgs,
}

impl ReconfigArgs {
    pub fn run(self) -> Result<()> {
        let mut options = self.depot.options();
        options.flags.preview = self.preview;
        options.flags.quiet = self.quiet;

        let target = ReconfigureTarget {
            server: self.to_server.clone().map(DepotServer::from),
            client: self.to_workspace.clone().map(DepotWorkspace::from),
            user: self.to_user.clone().map(DepotUser::from),
        };

        let orchestrator = commands::local_orchestrator(&self.depot, &self.root);
        let result = orchestrator
            .reconfigure(&options, &target, self.pattern.as_deref(), &NullProgress)
            .context("reconfig failed")?;
        commands::report(&result, self.preview)
    }
}
