//! Remote host provisioning (system packages through apt-get, as root)

use std::time::Duration;
use tracing::{error, info};

use crate::error::{DeployError, DeployResult};
use crate::infra::command::{shell_quote, CommandExecutor, ConsoleSink};
use crate::infra::ssh::RemoteTarget;

/// Build the remote shell command installing `packages`
pub fn install_command(packages: &[String], as_root: bool) -> String {
    let sudo = if as_root { "" } else { "sudo " };
    let packages = packages
        .iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "{sudo}apt-get update && {sudo}env DEBIAN_FRONTEND=noninteractive apt-get install -y {packages}"
    )
}

/// Install system packages on the remote host
pub async fn provision(
    executor: &dyn CommandExecutor,
    target: &RemoteTarget,
    packages: &[String],
    timeout: Option<Duration>,
) -> DeployResult<()> {
    if packages.is_empty() {
        info!("No packages to provision");
        return Ok(());
    }

    info!(packages = ?packages, "Provisioning remote host");
    let command = install_command(packages, target.is_root());
    let spec = target.ssh_exec(&command).timeout(timeout);
    let outcome = executor.run(&spec, &ConsoleSink).await?;

    if !outcome.success() {
        error!(code = ?outcome.code, "Provisioning failed");
        return Err(DeployError::Provision { code: outcome.code });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::command::testing::ScriptedExecutor;

    fn packages() -> Vec<String> {
        vec!["python3-venv".to_string(), "nginx".to_string()]
    }

    #[test]
    fn test_install_command_as_root() {
        assert_eq!(
            install_command(&packages(), true),
            "apt-get update && env DEBIAN_FRONTEND=noninteractive apt-get install -y python3-venv nginx"
        );
    }

    #[test]
    fn test_install_command_with_sudo() {
        let cmd = install_command(&packages(), false);
        assert!(cmd.starts_with("sudo apt-get update && sudo env"));
    }

    #[tokio::test]
    async fn test_provision_failure() {
        let target = RemoteTarget {
            host: "example.org".to_string(),
            user: "deploy".to_string(),
            port: 22,
            identity_file: None,
            remote_dir: "/srv/app".to_string(),
        };
        let executor = ScriptedExecutor::new();
        executor.fail("apt-get", 100);

        let err = provision(&executor, &target, &packages(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Provision { code: Some(100) }));
        assert_eq!(err.exit_code(), 100);
    }

    #[tokio::test]
    async fn test_empty_package_list_is_noop() {
        let target = RemoteTarget {
            host: "example.org".to_string(),
            user: "root".to_string(),
            port: 22,
            identity_file: None,
            remote_dir: "/srv/app".to_string(),
        };
        let executor = ScriptedExecutor::new();
        provision(&executor, &target, &[], None).await.unwrap();
        assert!(executor.commands().is_empty());
    }
}
