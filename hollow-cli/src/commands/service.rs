//! `hollow service` — run the foreground service and inspect a running one.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use hollow_core::depot::memory::MemoryDepotFactory;
use hollow_proto::{ProtoError, ServiceClient, ServiceStatus};

use crate::commands;

#[derive(Subcommand, Debug)]
pub enum ServiceCommand {
    /// Run the service in the foreground until ctrl-c.
    Run(RunArgs),
    /// Query a running service's status.
    Status(StatusArgs),
    /// Close idle depot connections on a running service.
    Gc(GcArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Listen port (overrides the ServicePort setting).
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Service port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct GcArgs {
    /// Close connections idle for at least this many seconds.
    #[arg(long, default_value_t = 0)]
    pub idle_secs: u64,

    /// Service port.
    #[arg(long)]
    pub port: Option<u16>,
}

pub fn run(command: ServiceCommand) -> Result<()> {
    match command {
        ServiceCommand::Run(args) => {
            let home = dirs::home_dir().context("could not determine home directory")?;
            // The in-memory backend stands in until a networked VCS adapter
            // is plugged into the factory trait.
            let factory = Arc::new(MemoryDepotFactory::new());
            hollow_service::start_blocking(&home, factory, args.port)
                .context("service exited with error")?;
        }
        ServiceCommand::Status(args) => {
            let client = ServiceClient::new(commands::service_port(args.port));
            match client.status() {
                Ok(status) => print_status(&status, args.json)?,
                Err(ProtoError::Io { .. }) => {
                    if args.json {
                        let payload = serde_json::json!({ "running": false });
                        println!(
                            "{}",
                            serde_json::to_string_pretty(&payload)
                                .context("failed to render status JSON")?
                        );
                    } else {
                        println!("service is not running");
                    }
                }
                Err(err) => return Err(err).context("failed to query service status"),
            }
        }
        ServiceCommand::Gc(args) => {
            let client = ServiceClient::new(commands::service_port(args.port));
            let closed = client
                .garbage_collect(args.idle_secs)
                .context("gc request failed")?;
            println!("closed {closed} idle connection(s)");
        }
    }
    Ok(())
}

fn print_status(status: &ServiceStatus, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(status).context("failed to render status JSON")?
        );
        return Ok(());
    }
    println!("running: {}", status.running);
    println!("driver connected: {}", status.driver_connected);
    println!("started at: {}", format_unix(status.started_at_unix));
    println!("last request: {}", format_unix(status.last_request_unix));
    println!("last modified: {}", format_unix(status.last_modified_unix));
    println!("idle connections: {}", status.idle_connections);
    Ok(())
}

fn format_unix(seconds: u64) -> String {
    if seconds == 0 {
        "never".to_string()
    } else {
        format!("{seconds} (unix seconds)")
    }
}
