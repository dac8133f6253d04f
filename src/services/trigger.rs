//! Remote trigger: runs the update procedure over ssh and mirrors its exit code

use std::time::Duration;
use tracing::{info, warn};

use crate::error::DeployResult;
use crate::infra::command::{CommandExecutor, ConsoleSink};
use crate::infra::ssh::RemoteTarget;

/// Run `remote_command` inside the remote deployment directory
///
/// Blocks until the remote side exits. Returns its exit code; a session
/// killed by a signal reports -1.
pub async fn trigger(
    executor: &dyn CommandExecutor,
    target: &RemoteTarget,
    remote_command: &str,
    timeout: Option<Duration>,
) -> DeployResult<i32> {
    info!(
        destination = %target.destination(),
        command = %remote_command,
        "Triggering remote update"
    );

    let spec = target.ssh_exec_in_dir(remote_command).timeout(timeout);
    let outcome = executor.run(&spec, &ConsoleSink).await?;
    let code = outcome.exit_code();

    if code == 0 {
        info!("Remote update finished");
    } else {
        warn!(exit_code = code, "Remote update reported failure, see the remote log");
    }
    Ok(code)
}
