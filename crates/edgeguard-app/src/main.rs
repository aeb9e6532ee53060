//! EdgeGuard - edge bot-mitigation gateway.

use clap::Parser;

use edgeguard_app::cli::{Args, Command};
use edgeguard_app::logging::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Keep the guard alive so buffered log lines reach the file
    let _log_guard = init_logging(&args.log_level, args.log_dir.as_deref());

    match args.command {
        Command::Provision(provision) => {
            edgeguard_app::run_provision(&provision).await?;
        }
        Command::Serve(serve) => {
            tracing::info!("Starting EdgeGuard...");
            edgeguard_app::run_serve(serve).await?;
        }
        Command::DefaultRules => edgeguard_app::print_default_rules()?,
    }

    Ok(())
}
