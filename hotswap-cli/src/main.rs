use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "hotswap", about = "Run and inspect hot-reloadable plugins")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify plugin dependencies in a directory
    Check(commands::check::CheckArgs),
    /// Print the dependency load order of a directory
    Graph(commands::graph::GraphArgs),
    /// List the plugins a directory provides
    List(commands::list::ListArgs),
    /// Parse and print a plugin manifest
    Manifest(commands::manifest::ManifestArgs),
    /// Host plugins and reload them as their files change
    Serve(commands::serve::ServeArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Check(args) => commands::check::run(args),
        Commands::Graph(args) => commands::graph::run(args),
        Commands::List(args) => commands::list::run(args),
        Commands::Manifest(args) => commands::manifest::run(args),
        Commands::Serve(args) => commands::serve::run(args).await,
    }
}
