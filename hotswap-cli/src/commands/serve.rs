//! Serve command: host plugins from a directory until interrupted

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use hotswap_core::{
    ConfigLoader, DynamicLoader, PluginRegistry, PluginWatcher, RouteTable, WatcherOptions,
    load_directory,
};
use tracing::info;

use super::print_failures;

/// Arguments for the serve command
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Config file layered over the user config
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Plugin directory (overrides config)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Watch for changes but do not apply them
    #[arg(long)]
    pub no_hot_reload: bool,

    /// Do not watch the plugin directory at all
    #[arg(long)]
    pub no_watch: bool,
}

/// Run the serve command
pub async fn run(args: ServeArgs) -> Result<()> {
    let mut config = ConfigLoader::load(args.config.as_deref())?;
    if let Some(dir) = args.dir {
        config.plugins.dir = dir;
    }
    if args.no_hot_reload {
        config.plugins.hot_reload = false;
    }
    if args.no_watch {
        config.plugins.watcher_enabled = false;
    }
    let plugins = config.plugins;

    let registry = PluginRegistry::new();
    let routes = Arc::new(RouteTable::new());
    registry.set_router(Some(routes.clone()));
    let loader = Arc::new(DynamicLoader::new());

    info!(dir = %plugins.dir.display(), "Loading plugins");
    let report = load_directory(&registry, &loader, &plugins.dir)?;
    print_failures(&report);

    let watcher = if plugins.watcher_enabled {
        std::fs::create_dir_all(&plugins.dir).with_context(|| {
            format!("Failed to create plugin directory {}", plugins.dir.display())
        })?;
        let watcher = PluginWatcher::new(
            &plugins.dir,
            registry.clone(),
            loader.clone(),
            WatcherOptions::from(&plugins),
        );
        watcher.start()?;
        Some(watcher)
    } else {
        None
    };

    println!(
        "Serving {} plugin(s), {} route(s) from {}",
        registry.len(),
        routes.len(),
        plugins.dir.display()
    );
    if watcher.is_some() {
        let mode = if plugins.hot_reload { "on" } else { "off" };
        println!("Watching for changes (hot reload {mode})");
    }
    println!("Press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    if let Some(watcher) = watcher {
        watcher.shutdown().await;
    }
    registry.shutdown_all();
    Ok(())
}
