use clap::Parser;
use noema_server::cli::{self, Cli, Commands};
use noema_server::config::NoemaConfig;
use noema_server::serve;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli {
        config: config_path,
        data_dir,
        http_addr,
        command,
    } = Cli::parse();

    match command {
        Commands::Config(cmd) => cli::config_cmd::run(cmd, &config_path, data_dir, http_addr).await,
        Commands::Rules(cmd) => cli::rules::run(cmd).await,
        command => {
            let config =
                NoemaConfig::load_or_default(&config_path)?.with_overrides(data_dir, http_addr);
            dispatch(command, config).await
        }
    }
}

async fn dispatch(command: Commands, config: NoemaConfig) -> anyhow::Result<()> {
    match command {
        Commands::Serve => serve::run(config).await,
        Commands::Process(args) => cli::process::run(args, config).await,
        Commands::Query(args) => cli::facts::query(args, config).await,
        Commands::Assert(args) => cli::facts::assert(args, config).await,
        Commands::Retract(args) => cli::facts::retract(args, config).await,
        Commands::Learn(args) => cli::learn::record(args, config).await,
        Commands::Consolidate(args) => cli::learn::consolidate(args, config).await,
        Commands::Backup => cli::backup::run(config).await,
        Commands::Restore(args) => cli::backup::run_restore(args, config).await,
        Commands::Snapshots(args) => cli::backup::list(args, config).await,
        Commands::Stats(args) => cli::stats::run(args, config).await,
        Commands::Rules(_) | Commands::Config(_) => Ok(()),
    }
}
