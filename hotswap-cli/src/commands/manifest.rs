//! Manifest command

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use hotswap_core::load_plugin_manifest;
use hotswap_plugin_api::API_VERSION;

#[derive(Debug, Args)]
pub struct ManifestArgs {
    /// Manifest file (.toml or .json)
    pub path: PathBuf,
}

pub fn run(args: ManifestArgs) -> Result<()> {
    let manifest = load_plugin_manifest(&args.path)?;
    println!("{}", serde_json::to_string_pretty(&manifest)?);

    if !manifest.supports_runtime(API_VERSION) {
        eprintln!(
            "warning: '{}' requires runtime {}, this host provides {}",
            manifest.name,
            manifest.min_runtime_version.as_deref().unwrap_or("?"),
            API_VERSION
        );
    }
    Ok(())
}
