//! Graph command: dependency load order from manifests

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use hotswap_core::{PluginCandidate, discover, load_order};

use super::resolve_dir;

#[derive(Debug, Args)]
pub struct GraphArgs {
    /// Plugin directory (defaults to the configured one)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Print the dependency map as JSON instead
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: GraphArgs) -> Result<()> {
    let dir = resolve_dir(args.dir, None)?;
    let candidates = discover(&dir)?;

    if args.json {
        let map: serde_json::Map<String, serde_json::Value> = candidates
            .iter()
            .map(|c| (c.name.clone(), serde_json::json!(c.dependencies())))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }

    if candidates.is_empty() {
        println!("No plugins in {}", dir.display());
        return Ok(());
    }

    let order = load_order(&candidates)?;
    for line in render_order(&order) {
        println!("{line}");
    }
    Ok(())
}

/// One numbered line per plugin, with its dependencies
fn render_order(order: &[&PluginCandidate]) -> Vec<String> {
    order
        .iter()
        .enumerate()
        .map(|(index, candidate)| {
            let deps = candidate.dependencies();
            let module = if candidate.library.is_some() {
                ""
            } else {
                " (no module)"
            };
            if deps.is_empty() {
                format!("{:>3}. {}{}", index + 1, candidate.name, module)
            } else {
                format!(
                    "{:>3}. {}{} <- {}",
                    index + 1,
                    candidate.name,
                    module,
                    deps.join(", ")
                )
            }
        })
        .collect()
}
