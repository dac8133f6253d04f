//! Transfer of the bundle (and extra files) to the remote host over scp

use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

use crate::error::{DeployError, DeployResult};
use crate::infra::command::{CommandExecutor, ConsoleSink};
use crate::infra::ssh::RemoteTarget;

/// Upload files into the remote deployment directory
///
/// No retry: authentication or network failures abort the pipeline.
pub async fn upload(
    executor: &dyn CommandExecutor,
    target: &RemoteTarget,
    files: &[&Path],
    timeout: Option<Duration>,
) -> DeployResult<()> {
    for file in files {
        if !file.exists() {
            return Err(DeployError::MissingSource(file.to_path_buf()));
        }
    }

    info!(
        destination = %target.destination(),
        remote_dir = %target.remote_dir,
        files = files.len(),
        "Uploading"
    );

    let spec = target.scp_upload(files).timeout(timeout);
    let outcome = executor.run(&spec, &ConsoleSink).await?;

    if !outcome.success() {
        let message = outcome
            .stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("scp failed")
            .to_string();
        error!(code = ?outcome.code, %message, "Transfer failed");
        return Err(DeployError::Transfer {
            code: outcome.code,
            message,
        });
    }

    info!("Upload complete");
    Ok(())
}
