//! Subcommand implementations for the `hollow` binary, plus the depot
//! connection flags and result reporting they share.

pub mod reconfig;
pub mod resident;
pub mod service;
pub mod setting;
pub mod sync;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use hollow_core::depot::memory::MemoryDepotFactory;
use hollow_core::types::{
    DepotServer, DepotSyncOptions, DepotSyncResult, DepotUser, DepotWorkspace, ExecutionContext,
    Identity, SyncAction,
};
use hollow_service::paths::DEFAULT_PORT;
use hollow_sync::{ConnectionCache, IdentityContext, SyncOrchestrator, SyncTunables};

/// Depot connection flags shared by the workspace commands.
#[derive(Args, Debug, Clone)]
pub struct DepotArgs {
    /// Depot server address (host:port).
    #[arg(long, default_value = "localhost:1666")]
    pub server: String,

    /// Depot workspace (client) name.
    #[arg(long)]
    pub workspace: String,

    /// Depot user name (defaults to the login user).
    #[arg(long)]
    pub user: Option<String>,

    /// Identity the request executes under (defaults to the user).
    #[arg(long)]
    pub identity: Option<String>,
}

impl DepotArgs {
    pub fn user(&self) -> String {
        self.user.clone().unwrap_or_else(login_user)
    }

    pub fn identity(&self) -> String {
        self.identity.clone().unwrap_or_else(|| self.user())
    }

    /// Base request with the connection and identity fields filled in.
    pub fn options(&self) -> DepotSyncOptions {
        DepotSyncOptions {
            server: DepotServer::from(self.server.clone()),
            workspace: DepotWorkspace::from(self.workspace.clone()),
            user: DepotUser::from(self.user()),
            context: ExecutionContext {
                identity: Identity::from(self.identity()),
            },
            ..Default::default()
        }
    }
}

pub fn login_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "hollow".to_string())
}

pub fn service_port(port: Option<u16>) -> u16 {
    port.unwrap_or(DEFAULT_PORT)
}

/// In-process orchestrator over the memory depot backend, with `workspace`
/// mapped to `root`. A networked VCS adapter would slot in through the same
/// factory trait.
pub fn local_orchestrator(depot: &DepotArgs, root: &Path) -> SyncOrchestrator {
    let factory = MemoryDepotFactory::new();
    factory.map_workspace(&depot.workspace, root);
    let cache = Arc::new(ConnectionCache::new(Arc::new(factory)));
    let identities = Arc::new(IdentityContext::new(Identity::from(login_user())));
    SyncOrchestrator::new(cache, identities, SyncTunables::default())
}

/// Print one diagnostic line per modification plus a summary. Returns an
/// error when the aggregate status failed so the process exits nonzero.
pub fn report(result: &DepotSyncResult, preview: bool) -> Result<()> {
    let prefix = if preview { "[preview] " } else { "" };
    for modification in &result.modifications {
        let glyph = match modification.action {
            SyncAction::Added => "+".green().bold(),
            SyncAction::Updated => "✎".cyan().bold(),
            SyncAction::Deleted => "-".red().bold(),
            SyncAction::UpToDate => "·".bright_black(),
            _ => "✗".red().bold(),
        };
        let mut line = format!("{}: {}", modification.action, modification.depot_path);
        if let Some(revision) = modification.revision {
            line.push_str(&format!("#{revision}"));
        }
        if let Some(message) = &modification.message {
            line.push_str(&format!(" ({message})"));
        }
        println!("{prefix}{glyph} {line}");
    }

    let total = result.modifications.len();
    let failed = result
        .modifications
        .iter()
        .filter(|m| m.action.is_error())
        .count();
    if result.succeeded() {
        println!("{prefix}{} {total} file(s), all clean", "✓".green().bold());
        Ok(())
    } else if failed > 0 {
        println!("{prefix}{} {failed} of {total} file(s) failed", "✗".red().bold());
        anyhow::bail!("completed with errors")
    } else {
        // ignore-output runs settle status without a per-file list.
        anyhow::bail!("request failed")
    }
}
