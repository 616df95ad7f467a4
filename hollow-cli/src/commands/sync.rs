//! `hollow sync` — sync depot file specs as placeholders or full content.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use hollow_proto::ServiceClient;
use hollow_sync::NullProgress;

use crate::commands::{self, DepotArgs};
use crate::{FlushTypeArg, SyncMethodArg};

/// Arguments for `hollow sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Depot file specs, each optionally suffixed with revision syntax
    /// (`#3`, `#head`, `@change`, `@label`, `@2024/01/31`).
    #[arg(required = true)]
    pub files: Vec<String>,

    /// Revision applied to specs that carry none of their own.
    #[arg(long)]
    pub revision: Option<String>,

    /// How content reaches the workspace: virtual (placeholders) or regular.
    #[arg(long, default_value_t = SyncMethodArg::default())]
    pub method: SyncMethodArg,

    /// When have-revisions reach the server: atomic (per file) or single.
    #[arg(long, default_value_t = FlushTypeArg::default())]
    pub flush: FlushTypeArg,

    /// Resync files already at the target revision.
    #[arg(long)]
    pub force: bool,

    /// Report what would change without touching anything.
    #[arg(long)]
    pub preview: bool,

    /// Suppress progress output.
    #[arg(long)]
    pub quiet: bool,

    /// Record have-revisions without writing any files.
    #[arg(long)]
    pub flush_only: bool,

    /// Overwrite local files sync never wrote.
    #[arg(long)]
    pub clobber: bool,

    /// Regex over depot paths fetched resident even under virtual sync.
    #[arg(long)]
    pub always_resident: Option<String>,

    /// Files at or below this many bytes are fetched resident.
    #[arg(long)]
    pub client_size: Option<u64>,

    /// Run in-process over the memory depot backend instead of the service.
    #[arg(long)]
    pub local: bool,

    /// Workspace root mapped for --local runs.
    #[arg(long, requires = "local")]
    pub root: Option<PathBuf>,

    /// Service port.
    #[arg(long, conflicts_with = "local")]
    pub port: Option<u16>,

    #[command(flatten)]
    pub depot: DepotArgs,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let mut options = self.depot.options();
        options.files = self
            .files
            .iter()
            .map(|spec| apply_revision(spec, self.revision.as_deref()))
            .collect();
        options.method = self.method.0;
        options.flush = self.flush.0;
        options.flags.force = self.force;
        options.flags.preview = self.preview;
        options.flags.quiet = self.quiet;
        options.flags.flush_only = self.flush_only;
        options.flags.clobber_writable = self.clobber;
        options.always_resident = self.always_resident.clone();
        options.client_size = self.client_size;

        let result = if self.local {
            let root = self.root.as_deref().context("--local requires --root")?;
            let orchestrator = commands::local_orchestrator(&self.depot, root);
            orchestrator
                .sync(&options, &NullProgress)
                .context("local sync failed")?
        } else {
            let client = ServiceClient::new(commands::service_port(self.port));
            client.sync(options).context("sync request failed")?
        };
        commands::report(&result, self.preview)
    }
}

/// Append the default revision to specs that carry none of their own.
fn apply_revision(spec: &str, revision: Option<&str>) -> String {
    let Some(revision) = revision else {
        return spec.to_string();
    };
    if spec.contains('#') || spec.contains('@') {
        return spec.to_string();
    }
    if revision.starts_with('#') || revision.starts_with('@') {
        format!("{spec}{revision}")
    } else {
        format!("{spec}#{revision}")
    }
}
