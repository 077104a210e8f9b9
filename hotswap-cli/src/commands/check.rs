//! Check command: load a plugin directory and report dependency problems

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Args;

use super::{load_host, print_failures, resolve_dir};

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Plugin directory (defaults to the configured one)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,
}

pub fn run(args: CheckArgs) -> Result<()> {
    let dir = resolve_dir(args.dir, None)?;
    let host = load_host(&dir)?;
    print_failures(&host.report);

    let problems = host.registry.check_dependencies();
    for problem in &problems {
        eprintln!("✗ {problem}");
    }

    let loaded = host.registry.len();
    host.registry.shutdown_all();

    let failures = problems.len() + host.report.failed.len();
    if failures > 0 {
        bail!("{failures} problem(s) found in {}", dir.display());
    }

    println!("✓ {loaded} plugin(s) loaded, dependencies satisfied");
    Ok(())
}
