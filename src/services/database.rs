//! Idempotent database bootstrap
//!
//! Checks for the database by name and creates it only when absent.
//! Tables are left to the application's own migrations.

use std::time::Duration;
use tracing::info;

use crate::config::file::DatabaseConfig;
use crate::domain::database::{parse_count_output, BootstrapOutcome, DatabaseEngine, DatabaseName};
use crate::error::{DeployError, DeployResult};
use crate::infra::command::{CommandExecutor, CommandSpec, NullSink};

/// Client invocation for one SQL statement
pub fn sql_command(config: &DatabaseConfig, sql: &str) -> CommandSpec {
    let host = config.host_or_default();
    let maintenance_db = config.engine.maintenance_database();

    match config.engine {
        DatabaseEngine::Postgresql => {
            let mut spec = CommandSpec::new("psql")
                .args(["-h", host.as_str()])
                .args(["-d", maintenance_db]);
            if let Some(port) = config.port {
                spec = spec.args(["-p".to_string(), port.to_string()]);
            }
            if let Some(ref user) = config.user {
                spec = spec.args(["-U", user.as_str()]);
            }
            if let Some(ref password) = config.password {
                spec = spec.env("PGPASSWORD", password.as_str());
            }
            spec.args(["-v", "ON_ERROR_STOP=1", "-tA", "-c", sql])
        }
        DatabaseEngine::Mssql => {
            let server = match config.port {
                Some(port) => format!("{},{}", host, port),
                None => host,
            };
            let mut spec = CommandSpec::new("sqlcmd")
                .args(["-S", server.as_str()])
                .args(["-d", maintenance_db]);
            spec = match config.user {
                Some(ref user) => spec.args(["-U", user.as_str()]),
                // Windows 集成认证
                None => spec.arg("-E"),
            };
            if let Some(ref password) = config.password {
                spec = spec.env("SQLCMDPASSWORD", password.as_str());
            }
            spec.args(["-b", "-h", "-1", "-Q", sql])
        }
    }
}

/// Create the configured database if it does not exist yet
pub async fn bootstrap(
    executor: &dyn CommandExecutor,
    config: &DatabaseConfig,
    timeout: Option<Duration>,
) -> DeployResult<BootstrapOutcome> {
    let name = DatabaseName::parse(&config.name)?;
    let engine = config.engine;

    let exists = sql_command(config, &engine.exists_query(&name)).timeout(timeout);
    let outcome = executor.run(&exists, &NullSink).await?;
    if !outcome.success() {
        return Err(DeployError::RemoteCommand {
            step: format!("{} existence check", engine),
            code: outcome.exit_code(),
        });
    }
    let count = parse_count_output(&outcome.stdout).ok_or_else(|| {
        DeployError::RemoteCommand {
            step: format!("{} existence check (unexpected output)", engine),
            code: 1,
        }
    })?;

    if count > 0 {
        println!("Database '{}' already exists", name);
        info!(database = %name, engine = %engine, "Database already exists, nothing to do");
        return Ok(BootstrapOutcome::AlreadyExists);
    }

    let create = sql_command(config, &engine.create_statement(&name)).timeout(timeout);
    let outcome = executor.run(&create, &NullSink).await?;
    if !outcome.success() {
        return Err(DeployError::RemoteCommand {
            step: format!("CREATE DATABASE {}", name),
            code: outcome.exit_code(),
        });
    }

    println!("Database '{}' created", name);
    info!(database = %name, engine = %engine, "Database created");
    Ok(BootstrapOutcome::Created)
}
