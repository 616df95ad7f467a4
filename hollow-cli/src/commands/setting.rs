//! `hollow setting` — read and write service settings over the wire.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tabled::{settings::Style, Table, Tabled};

use hollow_core::settings::SettingNode;
use hollow_proto::ServiceClient;

use crate::commands;

#[derive(Subcommand, Debug)]
pub enum SettingCommand {
    /// Print one setting's current value.
    Get(GetArgs),
    /// Set one setting; the value must parse for the setting's type.
    Set(SetArgs),
    /// List every setting with its current value.
    List(ListArgs),
}

#[derive(Args, Debug)]
pub struct GetArgs {
    pub name: String,

    /// Service port.
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Args, Debug)]
pub struct SetArgs {
    pub name: String,
    pub value: String,

    /// Service port.
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,

    /// Service port.
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Tabled)]
struct SettingRow {
    #[tabled(rename = "setting")]
    setting: String,
    #[tabled(rename = "value")]
    value: String,
}

pub fn run(command: SettingCommand) -> Result<()> {
    match command {
        SettingCommand::Get(args) => {
            let client = ServiceClient::new(commands::service_port(args.port));
            match client
                .get_setting(&args.name)
                .context("get-setting request failed")?
            {
                Some(node) => println!("{}", render(&node)),
                None => anyhow::bail!("unknown setting '{}'", args.name),
            }
        }
        SettingCommand::Set(args) => {
            let client = ServiceClient::new(commands::service_port(args.port));
            let accepted = client
                .set_setting(&args.name, SettingNode::scalar(args.value.clone()))
                .context("set-setting request failed")?;
            if !accepted {
                anyhow::bail!("value '{}' rejected for '{}'", args.value, args.name);
            }
            println!("{} = {}", args.name, args.value);
        }
        SettingCommand::List(args) => {
            let client = ServiceClient::new(commands::service_port(args.port));
            let settings = client
                .get_all_settings()
                .context("get-all-settings request failed")?;
            if args.json {
                let map: serde_json::Map<String, serde_json::Value> = settings
                    .iter()
                    .map(|(name, node)| (name.clone(), node.to_json()))
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::Value::Object(map))
                        .context("failed to render settings JSON")?
                );
            } else {
                let rows: Vec<SettingRow> = settings
                    .iter()
                    .map(|(name, node)| SettingRow {
                        setting: name.clone(),
                        value: render(node),
                    })
                    .collect();
                let mut table = Table::new(rows);
                table.with(Style::rounded());
                println!("{table}");
            }
        }
    }
    Ok(())
}

/// Scalars print as their canonical text; composites as their JSON form.
fn render(node: &SettingNode) -> String {
    match node.as_text() {
        Some(text) => text.to_string(),
        None => node.to_json().to_string(),
    }
}
