//! Deploy orchestrator
//!
//! Local side of a deployment, strictly in order:
//! bundle → (provision) → transfer → remote trigger.
//! Bundling and transfer failures abort immediately, without cleanup.

use std::path::Path;
use tracing::info;

use crate::config::file::DeployConfig;
use crate::error::DeployResult;
use crate::infra::command::CommandExecutor;
use crate::infra::ssh::RemoteTarget;
use crate::services::{bundle, provision, transfer, trigger};

/// Per-invocation options
#[derive(Clone, Debug, Default)]
pub struct DeployOptions {
    /// Install system packages on the host before uploading
    pub provision: bool,
}

/// Run the full pipeline, returning the remote exit code
pub async fn deploy(
    config: &DeployConfig,
    executor: &dyn CommandExecutor,
    options: &DeployOptions,
) -> DeployResult<i32> {
    let target = RemoteTarget::from_config(&config.target);
    let timeout = config.command_timeout();

    info!(host = %target.host, remote_dir = %target.remote_dir, "Starting deployment");

    // 1. Bundle
    info!(paths = ?config.bundle.paths, "[1/3] Packaging application");
    let bundle = bundle::create(bundle::BundleSpec::from_config(&config.bundle)).await?;

    if options.provision {
        info!("Provisioning remote host");
        provision::provision(executor, &target, &config.provision.packages, timeout).await?;
    }

    // 2. Transfer
    info!(size = bundle.size, "[2/3] Uploading bundle");
    let mut files: Vec<&Path> = vec![bundle.path.as_path()];
    files.extend(config.transfer.extra_files.iter().map(|p| p.as_path()));
    transfer::upload(executor, &target, &files, timeout).await?;

    // 3. Trigger
    info!("[3/3] Running remote update");
    let code = trigger::trigger(executor, &target, &config.target.remote_command, timeout).await?;

    if code == 0 {
        info!("Deployment finished");
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeployError;
    use crate::infra::command::testing::ScriptedExecutor;
    use std::fs;
    use tempfile::TempDir;

    fn config_for(root: &Path) -> DeployConfig {
        let mut config = DeployConfig::default();
        config.bundle.root = root.to_path_buf();
        config.bundle.paths = vec!["core".to_string(), "manage.py".to_string()];
        config
    }

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("core")).unwrap();
        fs::write(dir.path().join("core/views.py"), "").unwrap();
        fs::write(dir.path().join("manage.py"), "").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_pipeline_order_and_exit_code() {
        let dir = project();
        let executor = ScriptedExecutor::new();
        executor.fail("remote-update", 2);

        let code = deploy(&config_for(dir.path()), &executor, &DeployOptions::default())
            .await
            .unwrap();

        assert_eq!(code, 2);
        let commands = executor.commands();
        assert_eq!(commands.len(), 2);
        assert!(commands[0].starts_with("scp"));
        assert!(commands[1].starts_with("ssh"));
        assert!(dir.path().join("deploy.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_provision_runs_before_transfer() {
        let dir = project();
        let executor = ScriptedExecutor::new();

        deploy(
            &config_for(dir.path()),
            &executor,
            &DeployOptions { provision: true },
        )
        .await
        .unwrap();

        let commands = executor.commands();
        assert_eq!(commands.len(), 3);
        assert!(commands[0].contains("apt-get install -y"));
        assert!(commands[1].starts_with("scp"));
    }

    #[tokio::test]
    async fn test_packaging_failure_stops_pipeline() {
        let dir = project();
        let mut config = config_for(dir.path());
        config.bundle.paths.push("templates".to_string());
        let executor = ScriptedExecutor::new();

        let err = deploy(&config, &executor, &DeployOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::MissingSource(_)));
        assert!(executor.commands().is_empty());
    }

    #[tokio::test]
    async fn test_transfer_failure_skips_trigger() {
        let dir = project();
        let executor = ScriptedExecutor::new();
        executor.fail("scp", 1);

        let err = deploy(&config_for(dir.path()), &executor, &DeployOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Transfer { .. }));
        assert_eq!(executor.commands().len(), 1);
        assert!(!executor.commands()[0].starts_with("ssh"));
    }

    #[tokio::test]
    async fn test_extra_files_are_uploaded() {
        let dir = project();
        let updater = dir.path().join("agro-deploy");
        fs::write(&updater, "binary").unwrap();
        let mut config = config_for(dir.path());
        config.transfer.extra_files = vec![updater.clone()];
        let executor = ScriptedExecutor::new();

        deploy(&config, &executor, &DeployOptions::default())
            .await
            .unwrap();

        assert!(executor.commands()[0].contains(&updater.display().to_string()));
    }
}
