//! agro-deploy - agrotalhoes 部署工具
//!
//! Usage:
//! - Deploy from a workstation: `agro-deploy deploy`
//! - Different host: `agro-deploy deploy --host 10.0.0.5`
//! - First deploy on a fresh VPS: `agro-deploy deploy --provision`
//! - On the server (called by `deploy`): `agro-deploy remote-update`
//! - Once, to create the database: `agro-deploy db-bootstrap`

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use agro_deploy::config::{self, DeployConfig};
use agro_deploy::domain::{DatabaseEngine, RemoteLayout, SourceStrategy};
use agro_deploy::infra::CommandRunner;
use agro_deploy::services::{self, database, update, DeployOptions, UpdateOptions};
use agro_deploy::DeployError;

#[derive(Parser)]
#[command(name = "agro-deploy")]
#[command(about = "Deploy the agrotalhoes application to its VPS")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./deploy.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Package, upload and run the remote update
    Deploy {
        /// Override the target host
        #[arg(long)]
        host: Option<String>,

        /// Install system packages on the host first (needs root or sudo)
        #[arg(long)]
        provision: bool,
    },

    /// Run the update procedure on this host
    RemoteUpdate {
        /// Where the new source comes from
        #[arg(long, value_enum, default_value_t = SourceArg::Auto)]
        source: SourceArg,

        /// Stop when migrations fail instead of continuing
        #[arg(long)]
        halt_on_migration_failure: bool,

        /// Deployment directory (defaults to the current directory)
        #[arg(long)]
        deploy_dir: Option<PathBuf>,

        /// Directory layout
        #[arg(long, value_enum)]
        layout: Option<LayoutArg>,
    },

    /// Create the application database if it does not exist
    DbBootstrap {
        #[arg(long, value_enum)]
        engine: Option<EngineArg>,

        /// Database name
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    /// Archive if present, version control otherwise
    Auto,
    Archive,
    Git,
}

#[derive(Clone, Copy, ValueEnum)]
enum LayoutArg {
    InPlace,
    Releases,
}

#[derive(Clone, Copy, ValueEnum)]
enum EngineArg {
    Postgresql,
    Mssql,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<DeployError>()
                .map(DeployError::exit_code)
                .unwrap_or(1);
            std::process::exit(code);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = config::load(cli.config.as_deref())?;
    let runner = CommandRunner;

    match cli.command {
        Commands::Deploy { host, provision } => {
            if let Some(host) = host {
                config.target.host = host;
            }
            let options = DeployOptions { provision };
            let code = services::deploy(&config, &runner, &options).await?;
            Ok(code)
        }
        Commands::RemoteUpdate {
            source,
            halt_on_migration_failure,
            deploy_dir,
            layout,
        } => {
            if let Some(dir) = deploy_dir {
                config.update.deploy_dir = dir;
            }
            if halt_on_migration_failure {
                config.update.halt_on_migration_failure = true;
            }
            if let Some(layout) = layout {
                config.update.layout = match layout {
                    LayoutArg::InPlace => RemoteLayout::InPlace,
                    LayoutArg::Releases => RemoteLayout::Releases,
                };
            }

            let options = UpdateOptions {
                strategy: strategy_for(source, &config),
                timeout: config.command_timeout(),
                console: true,
            };
            let report = update::execute(&config.update, &runner, options)
                .await
                .context("remote update could not start")?;
            Ok(report.exit_code)
        }
        Commands::DbBootstrap { engine, name } => {
            if let Some(engine) = engine {
                config.database.engine = match engine {
                    EngineArg::Postgresql => DatabaseEngine::Postgresql,
                    EngineArg::Mssql => DatabaseEngine::Mssql,
                };
            }
            if let Some(name) = name {
                config.database.name = name;
            }
            database::bootstrap(&runner, &config.database, config.command_timeout()).await?;
            Ok(0)
        }
    }
}

fn strategy_for(source: SourceArg, config: &DeployConfig) -> SourceStrategy {
    let settings = &config.update;
    match source {
        SourceArg::Auto => update::infer_strategy(settings),
        SourceArg::Archive => SourceStrategy::Archive {
            path: settings.resolve(&settings.archive),
        },
        SourceArg::Git => SourceStrategy::VersionControl {
            remote: settings.git_remote.clone(),
            branch: settings.git_branch.clone(),
        },
    }
}
