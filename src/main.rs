use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ptywatch_core::Settings;

mod cli;
mod commands;
mod output;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Setup logging
    setup_logging(cli.debug);

    // Load settings: file, then environment, then flags
    let mut settings = Settings::load(cli.config.as_deref())?;
    settings.apply_env();
    cli.merge_into(&mut settings);
    settings.validate();

    match &cli.command {
        Command::Watch { .. } => commands::watch::run(settings).await,
        Command::Status { since, json, short } => {
            commands::status::run(&settings, *since, *json, *short)
        }
        Command::Tail {
            session_id,
            limit,
            json,
        } => commands::tail::run(&settings, session_id, *limit, *json),
        Command::Packs => commands::packs::run(&settings),
    }
}

fn setup_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("ptywatch=debug,ptywatch_core=debug")
        } else {
            EnvFilter::new("ptywatch=info,ptywatch_core=info")
        }
    });

    // stderr keeps `status --short` output clean
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
