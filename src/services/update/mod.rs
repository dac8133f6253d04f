//! Remote update procedure
//!
//! Runs on the target host, strictly in order with no branching back:
//!
//! 1. environment adjustment
//! 2. source acquisition (archive or version control)
//! 3. dependency sync (virtualenv + pip)
//! 4. schema migration
//! 5. static asset collection
//! 6. process restart (application server, then reverse proxy)
//! 7. completion banner
//!
//! Every status line goes to the console and the run log. Migration and
//! asset collection failures are logged and the run continues, unless
//! the migration policy says to halt.

pub mod context;
pub mod source;

use chrono::Local;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::env::constants::{CRYPTOGRAPHY_LEGACY_FLAG, VERSION};
use crate::config::file::UpdateConfig;
use crate::domain::deploy::{
    DeployStatus, DeployStep, MigrationPolicy, RemoteLayout, SourceStrategy, UpdateReport,
};
use crate::error::{DeployError, DeployResult};
use crate::infra::command::{CommandError, CommandExecutor, CommandOutcome};
use crate::infra::tee_log::TeeLog;

pub use context::UpdateContext;
pub use source::{infer_strategy, Release};

/// Banner appended when the run completes
pub const SUCCESS_BANNER: &str = "=== Deployment completed successfully ===";

/// A step that could not complete
#[derive(Debug, Clone)]
pub struct StepFailure {
    pub code: i32,
    pub message: String,
}

impl StepFailure {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        // 0 不能作为失败退出码
        let code = if code == 0 { 1 } else { code };
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn io(action: &str, e: std::io::Error) -> Self {
        Self::new(1, format!("{}: {}", action, e))
    }
}

impl From<CommandError> for StepFailure {
    fn from(e: CommandError) -> Self {
        let code = match e {
            CommandError::Timeout { .. } => 124,
            CommandError::SpawnFailed { .. } => 127,
            CommandError::WaitFailed(_) => 1,
        };
        Self::new(code, e.to_string())
    }
}

/// Options for one run
#[derive(Clone, Debug)]
pub struct UpdateOptions {
    pub strategy: SourceStrategy,
    pub timeout: Option<Duration>,
    /// Mirror the log to the console
    pub console: bool,
}

const STEPS: [(&str, &str); 7] = [
    ("environment", "Environment Adjustment"),
    ("acquire_source", "Source Acquisition"),
    ("dependencies", "Dependency Sync"),
    ("migrate", "Schema Migration"),
    ("collectstatic", "Static Asset Collection"),
    ("restart", "Process Restart"),
    ("complete", "Completion"),
];

/// Run the update procedure
///
/// Errors only for problems detected before the run starts (invalid
/// configuration, unusable deploy or log directory). Step failures are
/// recorded in the returned report.
pub async fn execute(
    settings: &UpdateConfig,
    executor: &dyn CommandExecutor,
    options: UpdateOptions,
) -> DeployResult<UpdateReport> {
    if settings.layout == RemoteLayout::Releases
        && matches!(options.strategy, SourceStrategy::VersionControl { .. })
    {
        return Err(DeployError::config(
            "the releases layout needs an archive; version-control updates only work in place",
        ));
    }

    let deploy_dir = std::fs::canonicalize(&settings.deploy_dir)?;
    let log_dir = if settings.log_dir.is_absolute() {
        settings.log_dir.clone()
    } else {
        deploy_dir.join(&settings.log_dir)
    };
    let log = TeeLog::create(&log_dir, Local::now())?;
    let log = if options.console { log } else { log.without_console() };

    let mut ctx = UpdateContext::new(settings, executor, &log, deploy_dir, options.timeout);
    let mut report = UpdateReport::new(&options.strategy, log.path().to_path_buf());
    report.steps = STEPS
        .iter()
        .enumerate()
        .map(|(i, (name, display))| DeployStep::new(i + 1, name, display))
        .collect();

    info!(
        log = %log.path().display(),
        source = options.strategy.name(),
        "Starting remote update"
    );
    ctx.log_stdout(&format!(
        "=== Remote update started (agro-deploy {}, {}) ===",
        VERSION,
        Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    ctx.log_stdout(&format!("Deploy directory: {}", ctx.deploy_dir.display()));

    let code = run_steps(&mut ctx, &options.strategy, &mut report).await;
    let status = if code == 0 {
        DeployStatus::Success
    } else {
        DeployStatus::Failed
    };
    report.complete(status, code);

    write_report(&report);
    info!(exit_code = code, status = report.status.as_str(), "Remote update finished");
    Ok(report)
}

async fn run_steps(
    ctx: &mut UpdateContext<'_>,
    strategy: &SourceStrategy,
    report: &mut UpdateReport,
) -> i32 {
    let settings = ctx.settings;

    // Step 1: environment adjustment
    begin(ctx, &mut report.steps[0], "Adjusting environment...");
    let legacy_flag = (CRYPTOGRAPHY_LEGACY_FLAG.to_string(), "1".to_string());
    for (key, value) in std::iter::once(legacy_flag).chain(settings.extra_env.clone()) {
        ctx.log_stdout(&format!("export {}={}", key, value));
        ctx.env.insert(key, value);
    }
    report.steps[0].finish(true, None);

    // Step 2: source acquisition
    begin(ctx, &mut report.steps[1], &format!("Acquiring source ({})...", strategy.name()));
    let release = match source::acquire(ctx, strategy).await {
        Ok(release) => {
            report.steps[1].finish(true, release.as_ref().map(|r| format!("release {}", r.id)));
            release
        }
        Err(failure) => return abort(ctx, report, 1, failure),
    };
    if let Some(ref release) = release {
        ctx.app_dir = release.dir.clone();
        report.release = Some(release.id.clone());
    }

    // Step 3: dependency sync
    begin(ctx, &mut report.steps[2], "Syncing dependencies...");
    if let Err(failure) = sync_dependencies(ctx).await {
        return abort(ctx, report, 2, failure);
    }
    report.steps[2].finish(true, None);

    // Step 4: schema migration
    begin(ctx, &mut report.steps[3], "Applying migrations...");
    let migrate = manage(ctx, &["migrate", "--noinput"]).await;
    match migrate {
        Ok(()) => report.steps[3].finish(true, None),
        Err(failure) => {
            report.steps[3].finish(false, Some(failure.message.clone()));
            match settings.migration_policy() {
                MigrationPolicy::Halt => {
                    ctx.log_stderr("Migration failed, halting (halt_on_migration_failure)");
                    return finish_failed(ctx, report, 4, failure.code);
                }
                MigrationPolicy::Continue => {
                    warn!(code = failure.code, "Migration failed, continuing");
                    ctx.log_stderr(&format!(
                        "Warning: migration failed (exit code {}), continuing",
                        failure.code
                    ));
                }
            }
        }
    }

    // Step 5: static asset collection
    begin(ctx, &mut report.steps[4], "Collecting static files...");
    match manage(ctx, &["collectstatic", "--noinput"]).await {
        Ok(()) => report.steps[4].finish(true, None),
        Err(failure) => {
            report.steps[4].finish(false, Some(failure.message.clone()));
            ctx.log_stderr(&format!(
                "Warning: collectstatic failed (exit code {}), continuing",
                failure.code
            ));
        }
    }

    // Step 6: activation (releases layout) and process restart
    begin(ctx, &mut report.steps[5], "Restarting services...");
    if let Some(ref release) = release {
        if let Err(e) = source::activate(&ctx.deploy_dir, release) {
            return abort(ctx, report, 5, StepFailure::io("activate release", e));
        }
        ctx.log_stdout(&format!("Activated release {}", release.id));
    }
    let restart_failure = restart_services(ctx).await;
    match restart_failure {
        None => report.steps[5].finish(true, None),
        Some(ref failure) => report.steps[5].finish(false, Some(failure.message.clone())),
    }

    // Step 7: completion
    begin(ctx, &mut report.steps[6], "Finishing...");
    match restart_failure {
        None => {
            report.steps[6].finish(true, None);
            ctx.log_stdout(SUCCESS_BANNER);
            0
        }
        Some(failure) => {
            report.steps[6].finish(false, None);
            ctx.log_stderr(&format!(
                "=== Deployment failed: {} (exit code {}) ===",
                failure.message, failure.code
            ));
            failure.code
        }
    }
}

/// Create/activate the virtualenv and install requirements
async fn sync_dependencies(ctx: &mut UpdateContext<'_>) -> Result<(), StepFailure> {
    let venv = ctx.venv_dir();

    if venv.is_dir() {
        ctx.log_stdout(&format!("Using existing virtualenv {}", venv.display()));
    } else {
        ctx.log_stdout(&format!("Creating virtualenv {}", venv.display()));
        let create = ctx
            .command(ctx.settings.python.clone())
            .current_dir(&ctx.deploy_dir)
            .args(["-m".to_string(), "venv".to_string(), venv.display().to_string()]);
        check(ctx.run(create).await?, "virtualenv creation")?;
    }

    // 等价于 source venv/bin/activate
    let bin = venv.join("bin");
    let path = match std::env::var("PATH") {
        Ok(current) if !current.is_empty() => format!("{}:{}", bin.display(), current),
        _ => bin.display().to_string(),
    };
    ctx.env.insert("VIRTUAL_ENV".to_string(), venv.display().to_string());
    ctx.env.insert("PATH".to_string(), path);

    let upgrade = ctx
        .command(ctx.venv_bin("python"))
        .args(["-m", "pip", "install", "--upgrade", "pip"]);
    check(ctx.run(upgrade).await?, "pip upgrade")?;

    let install = ctx
        .command(ctx.venv_bin("pip"))
        .args(["install", "-r", ctx.settings.requirements.as_str()]);
    check(ctx.run(install).await?, "pip install")?;
    Ok(())
}

/// `python manage.py <args>` inside the application directory
async fn manage(ctx: &UpdateContext<'_>, args: &[&str]) -> Result<(), StepFailure> {
    let spec = ctx
        .command(ctx.venv_bin("python"))
        .arg(ctx.settings.manage_py.clone())
        .args(args.iter().copied());
    let outcome = ctx.run(spec).await?;
    check(outcome, &format!("manage.py {}", args[0]))
}

/// Restart every configured service in order; all are attempted
///
/// Returns the first failure.
async fn restart_services(ctx: &UpdateContext<'_>) -> Option<StepFailure> {
    let mut first_failure = None;

    for service in &ctx.settings.services {
        let spec = if ctx.settings.use_sudo {
            ctx.command("sudo").args(["systemctl", "restart", service.as_str()])
        } else {
            ctx.command("systemctl").args(["restart", service.as_str()])
        };

        let result = match ctx.run(spec).await {
            Ok(outcome) => check(outcome, &format!("restart {}", service)),
            Err(e) => Err(StepFailure::from(e)),
        };

        match result {
            Ok(()) => ctx.log_stdout(&format!("Restarted {}", service)),
            Err(failure) => {
                error!(service = %service, code = failure.code, "Service restart failed");
                ctx.log_stderr(&format!("Error: {}", failure.message));
                if first_failure.is_none() {
                    first_failure = Some(failure);
                }
            }
        }
    }

    first_failure
}

fn begin(ctx: &UpdateContext<'_>, step: &mut DeployStep, message: &str) {
    step.start();
    ctx.step(step, message);
}

fn check(outcome: CommandOutcome, what: &str) -> Result<(), StepFailure> {
    if outcome.success() {
        Ok(())
    } else {
        Err(StepFailure::new(
            outcome.exit_code(),
            format!("{} failed (exit code {})", what, outcome.exit_code()),
        ))
    }
}

/// Fatal failure in `steps[index]`: later steps never start
fn abort(
    ctx: &UpdateContext<'_>,
    report: &mut UpdateReport,
    index: usize,
    failure: StepFailure,
) -> i32 {
    report.steps[index].finish(false, Some(failure.message.clone()));
    ctx.log_stderr(&format!("Error: {}", failure.message));
    finish_failed(ctx, report, index + 1, failure.code)
}

fn finish_failed(ctx: &UpdateContext<'_>, report: &mut UpdateReport, from: usize, code: i32) -> i32 {
    for step in report.steps.iter_mut().skip(from) {
        step.skip(Some(format!("not reached, step {} failed", from)));
    }
    error!(exit_code = code, "Remote update aborted");
    ctx.log_stderr(&format!("=== Deployment failed (exit code {}) ===", code));
    code
}

/// Persist the report as JSON next to the log file
fn write_report(report: &UpdateReport) {
    let path: PathBuf = report.log_file.with_extension("json");
    match serde_json::to_string_pretty(report) {
        Ok(json) => {
            if let Err(e) = std::fs::write(&path, json) {
                warn!(path = %path.display(), error = %e, "Failed to write run report");
            }
        }
        Err(e) => warn!(error = %e, "Failed to serialize run report"),
    }
}
