//! List command: load a plugin directory and show what it provides

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use hotswap_core::{PluginInfo, PluginStatus};

use super::{load_host, print_failures, resolve_dir};

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Plugin directory (defaults to the configured one)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Print plugin info as JSON
    #[arg(long)]
    pub json: bool,

    /// Include each plugin's routes
    #[arg(long)]
    pub routes: bool,
}

pub fn run(args: ListArgs) -> Result<()> {
    let dir = resolve_dir(args.dir, None)?;
    let host = load_host(&dir)?;
    let infos = host.registry.all_plugins_info();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
    } else if infos.is_empty() {
        println!("No plugins loaded from {}", dir.display());
    } else {
        for info in &infos {
            for line in describe(info, args.routes) {
                println!("{line}");
            }
        }
    }

    print_failures(&host.report);
    host.registry.shutdown_all();
    Ok(())
}

fn describe(info: &PluginInfo, with_routes: bool) -> Vec<String> {
    let status = match info.status {
        PluginStatus::Enabled => "✓",
        PluginStatus::Disabled => "○",
    };
    let description = if info.description.is_empty() {
        "No description"
    } else {
        info.description.as_str()
    };

    let mut lines = vec![format!(
        "{} {} v{}    {}",
        status, info.name, info.version, description
    )];
    if !info.dependencies.is_empty() {
        lines.push(format!("    depends on: {}", info.dependencies.join(", ")));
    }
    if with_routes {
        for route in &info.routes {
            let auth = if route.auth_required { " [auth]" } else { "" };
            lines.push(format!("    {} {}{}", route.method, route.path, auth));
        }
    }
    lines
}
