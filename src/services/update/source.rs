//! Source acquisition and release activation
//!
//! Two mutually exclusive strategies: extract the uploaded archive, or
//! hard-reset the working tree to the remote branch tip.

use flate2::read::GzDecoder;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use tracing::info;

use crate::config::env::constants::{CURRENT_LINK, RELEASES_DIR, RELEASE_ID_LEN};
use crate::config::file::UpdateConfig;
use crate::domain::deploy::{RemoteLayout, SourceStrategy};
use crate::services::bundle::sha256_file;

use super::context::UpdateContext;
use super::StepFailure;

/// An extracted, content-addressed release
#[derive(Clone, Debug, PartialEq)]
pub struct Release {
    pub id: String,
    pub dir: PathBuf,
}

/// Legacy selection: archive if present, version control otherwise
///
/// Resolved once, before the run, so the procedure itself only ever sees
/// an explicit strategy.
pub fn infer_strategy(settings: &UpdateConfig) -> SourceStrategy {
    let archive = settings.resolve(&settings.archive);
    if archive.exists() {
        SourceStrategy::Archive { path: archive }
    } else {
        SourceStrategy::VersionControl {
            remote: settings.git_remote.clone(),
            branch: settings.git_branch.clone(),
        }
    }
}

/// Acquire the new source; returns the release when the layout uses them
pub async fn acquire(
    ctx: &UpdateContext<'_>,
    strategy: &SourceStrategy,
) -> Result<Option<Release>, StepFailure> {
    match strategy {
        SourceStrategy::Archive { path } => {
            let path = ctx.resolve(path);
            match ctx.settings.layout {
                RemoteLayout::InPlace => {
                    extract_in_place(ctx, &path).await?;
                    Ok(None)
                }
                RemoteLayout::Releases => extract_release(ctx, &path).await.map(Some),
            }
        }
        SourceStrategy::VersionControl { remote, branch } => {
            pull_and_reset(ctx, remote, branch).await?;
            Ok(None)
        }
    }
}

async fn extract_in_place(ctx: &UpdateContext<'_>, archive: &Path) -> Result<(), StepFailure> {
    if !archive.exists() {
        return Err(StepFailure::new(1, format!("archive not found: {}", archive.display())));
    }

    ctx.log_stdout(&format!("Extracting {}", archive.display()));
    unpack(archive, &ctx.deploy_dir).await?;
    remove_archive(ctx, archive)
}

async fn extract_release(ctx: &UpdateContext<'_>, archive: &Path) -> Result<Release, StepFailure> {
    if !archive.exists() {
        return Err(StepFailure::new(1, format!("archive not found: {}", archive.display())));
    }

    let digest = {
        let archive = archive.to_path_buf();
        spawn_blocking(move || sha256_file(&archive))
            .await
            .map_err(|e| StepFailure::new(1, e.to_string()))?
            .map_err(|e| StepFailure::new(1, format!("cannot hash archive: {}", e)))?
    };
    let id = digest[..RELEASE_ID_LEN].to_string();
    let releases = ctx.deploy_dir.join(RELEASES_DIR);
    let dir = releases.join(&id);

    if dir.is_dir() {
        ctx.log_stdout(&format!("Release {} already present, reusing", id));
    } else {
        let partial = releases.join(format!(".{}.partial", id));
        if partial.exists() {
            fs::remove_dir_all(&partial).map_err(|e| StepFailure::io("clean partial release", e))?;
        }
        ctx.log_stdout(&format!("Extracting {} into {}", archive.display(), dir.display()));
        unpack(archive, &partial).await?;
        fs::rename(&partial, &dir).map_err(|e| StepFailure::io("finalize release", e))?;
    }

    remove_archive(ctx, archive)?;
    Ok(Release { id, dir })
}

async fn pull_and_reset(
    ctx: &UpdateContext<'_>,
    remote: &str,
    branch: &str,
) -> Result<(), StepFailure> {
    ctx.log_stdout(&format!("No archive, updating from {}/{}", remote, branch));

    let fetch = ctx
        .command("git")
        .current_dir(&ctx.deploy_dir)
        .args(["fetch", remote]);
    let outcome = ctx.run(fetch).await?;
    if !outcome.success() {
        return Err(StepFailure::new(outcome.exit_code(), "git fetch failed"));
    }

    let reset = ctx
        .command("git")
        .current_dir(&ctx.deploy_dir)
        .args(["reset".to_string(), "--hard".to_string(), format!("{}/{}", remote, branch)]);
    let outcome = ctx.run(reset).await?;
    if !outcome.success() {
        return Err(StepFailure::new(outcome.exit_code(), "git reset failed"));
    }
    Ok(())
}

/// Unpack a .tar.gz into `dest`, overwriting existing files
async fn unpack(archive: &Path, dest: &Path) -> Result<(), StepFailure> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    spawn_blocking(move || -> std::io::Result<()> {
        fs::create_dir_all(&dest)?;
        let file = fs::File::open(&archive)?;
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        tar.set_overwrite(true);
        tar.set_preserve_permissions(true);
        tar.unpack(&dest)
    })
    .await
    .map_err(|e| StepFailure::new(1, e.to_string()))?
    .map_err(|e| StepFailure::io("extract archive", e))
}

fn remove_archive(ctx: &UpdateContext<'_>, archive: &Path) -> Result<(), StepFailure> {
    fs::remove_file(archive).map_err(|e| StepFailure::io("remove archive", e))?;
    ctx.log_stdout(&format!("Removed {}", archive.display()));
    Ok(())
}

/// Point `current` at the release by swapping the symlink atomically
#[cfg(unix)]
pub fn activate(deploy_dir: &Path, release: &Release) -> std::io::Result<()> {
    let link = deploy_dir.join(CURRENT_LINK);
    let staging = deploy_dir.join(format!(".{}.next", CURRENT_LINK));
    if fs::symlink_metadata(&staging).is_ok() {
        fs::remove_file(&staging)?;
    }
    std::os::unix::fs::symlink(Path::new(RELEASES_DIR).join(&release.id), &staging)?;
    fs::rename(&staging, &link)?;
    info!(release = %release.id, "Release activated");
    Ok(())
}

#[cfg(not(unix))]
pub fn activate(_deploy_dir: &Path, _release: &Release) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "release activation requires symlinks (unix only)",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_infer_strategy_prefers_archive() {
        let dir = TempDir::new().unwrap();
        let mut settings = UpdateConfig::default();
        settings.deploy_dir = dir.path().to_path_buf();

        assert_eq!(
            infer_strategy(&settings),
            SourceStrategy::VersionControl {
                remote: "origin".to_string(),
                branch: "main".to_string(),
            }
        );

        fs::write(dir.path().join("deploy.tar.gz"), "x").unwrap();
        assert_eq!(
            infer_strategy(&settings),
            SourceStrategy::Archive {
                path: dir.path().join("deploy.tar.gz")
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_activate_swaps_symlink() {
        let dir = TempDir::new().unwrap();
        let first = Release {
            id: "aaaaaaaaaaaa".to_string(),
            dir: dir.path().join("releases/aaaaaaaaaaaa"),
        };
        let second = Release {
            id: "bbbbbbbbbbbb".to_string(),
            dir: dir.path().join("releases/bbbbbbbbbbbb"),
        };
        fs::create_dir_all(&first.dir).unwrap();
        fs::create_dir_all(&second.dir).unwrap();

        activate(dir.path(), &first).unwrap();
        activate(dir.path(), &second).unwrap();

        let target = fs::read_link(dir.path().join("current")).unwrap();
        assert_eq!(target, Path::new("releases/bbbbbbbbbbbb"));
        assert!(!dir.path().join(".current.next").exists());
    }
}
