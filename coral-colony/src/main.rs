use anyhow::Result;
use clap::Parser;
use coral_colony::{Colony, PersistentColonyDir};
use std::path::PathBuf;

#[derive(Parser, Debug)]
struct Cli {
    /// [tracing_subscriber::EnvFilter]
    #[clap(short, long)]
    tracing_env_filter: Option<String>,
    /// Colony state directory. Defaults to
    /// `<config_dir>/coral/colonies/<colony-id>`.
    #[clap(long)]
    colony_dir: Option<PathBuf>,
    /// Colony id used to locate the default state directory.
    #[clap(long, default_value = "default")]
    colony_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            args.tracing_env_filter
                .unwrap_or("coral_colony=debug,tower_http=debug".to_string()),
        )
        .init();

    let dir = match args.colony_dir {
        Some(path) => PersistentColonyDir::new(path),
        None => PersistentColonyDir::for_colony(&args.colony_id),
    };

    let colony = Colony::start(dir).await?;
    colony.run_until_done().await?;

    Ok(())
}
