//! `hollow resident` — hydrate matching placeholders to full content.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use hollow_sync::NullProgress;

use crate::commands::{self, DepotArgs};

/// Arguments for `hollow resident`.
#[derive(Args, Debug)]
pub struct ResidentArgs {
    /// Regex matched against depot paths and workspace-relative paths.
    pub pattern: String,

    /// Workspace root holding the placeholders.
    #[arg(long)]
    pub root: PathBuf,

    /// Report what would be hydrated without touching anything.
    #[arg(long)]
    pub preview: bool,

    /// Suppress progress output.
    #[arg(long)]
    pub quiet: bool,

    #[command(flatten)]
    pub depot: DepotArgs,
}

impl ResidentArgs {
    pub fn run(self) -> Result<()> {
        let mut options = self.depot.options();
        options.flags.preview = self.preview;
        options.flags.quiet = self.quiet;

        let orchestrator = commands::local_orchestrator(&self.depot, &self.root);
        let result = orchestrator
            .make_resident(&options, &self.pattern, &NullProgress)
            .with_context(|| format!("resident failed for pattern '{}'", self.pattern))?;
        commands::report(&result, self.preview)
    }
}
