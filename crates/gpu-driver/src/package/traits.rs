//! Package manager capability trait and shared step types.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DriverError, Step, StepOutcome};
use crate::exec::{Cmd, CommandOutput, CommandRunner};
use crate::host::OsFamily;

/// One step of the install sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStep {
    Dependencies,
    /// Download the repository descriptor or keyring.
    FetchRepository,
    /// Persist the fetched material on the host.
    Repository,
    KernelHeaders,
    RefreshCache,
    Driver,
}

/// One step of the remove sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoveStep {
    Driver,
    Repository,
    RefreshCache,
    KernelHeaders,
    Dependencies,
}

/// Canonical install order: dependencies, repository fetch and write,
/// kernel headers, cache refresh, driver.
pub const DEFAULT_INSTALL_SEQUENCE: &[InstallStep] = &[
    InstallStep::Dependencies,
    InstallStep::FetchRepository,
    InstallStep::Repository,
    InstallStep::KernelHeaders,
    InstallStep::RefreshCache,
    InstallStep::Driver,
];

/// Remove order shared by every family.
pub const REMOVE_SEQUENCE: &[RemoveStep] = &[
    RemoveStep::Driver,
    RemoveStep::Repository,
    RemoveStep::RefreshCache,
    RemoveStep::KernelHeaders,
    RemoveStep::Dependencies,
];

impl From<InstallStep> for Step {
    fn from(step: InstallStep) -> Self {
        match step {
            InstallStep::Dependencies => Self::InstallDependencies,
            InstallStep::FetchRepository => Self::FetchRepository,
            InstallStep::Repository => Self::RegisterRepository,
            InstallStep::KernelHeaders => Self::InstallKernelHeaders,
            InstallStep::RefreshCache => Self::RefreshCache,
            InstallStep::Driver => Self::InstallDriver,
        }
    }
}

impl From<RemoveStep> for Step {
    fn from(step: RemoveStep) -> Self {
        match step {
            RemoveStep::Driver => Self::RemoveDriver,
            RemoveStep::Repository => Self::UnregisterRepository,
            RemoveStep::RefreshCache => Self::RefreshCache,
            RemoveStep::KernelHeaders => Self::RemoveKernelHeaders,
            RemoveStep::Dependencies => Self::RemoveDependencies,
        }
    }
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Step::from(*self).fmt(f)
    }
}

impl fmt::Display for RemoveStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Step::from(*self).fmt(f)
    }
}

/// Capability set every OS-family package manager provides.
///
/// Implementations must make each mutating call safe to re-run: installing
/// an installed package is not a new failure.
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// OS family this adapter serves.
    fn family(&self) -> OsFamily;

    /// Header/devel packages matching `kernel_release`, in install order.
    fn kernel_packages(&self, kernel_release: &str) -> Vec<String>;

    /// Order in which the orchestrator runs install steps.
    fn install_sequence(&self) -> &'static [InstallStep] {
        DEFAULT_INSTALL_SEQUENCE
    }

    /// Install the packages the driver build needs.
    async fn install_dependencies(&self) -> StepOutcome;

    /// Install headers for the running kernel.
    async fn install_kernel_headers(&self, kernel_release: &str) -> StepOutcome;

    /// Install the driver package.
    async fn install_driver(&self, package: &str) -> StepOutcome;

    /// Remove the driver package.
    async fn remove_driver(&self, package: &str) -> StepOutcome;

    /// Remove headers for the running kernel.
    async fn remove_kernel_headers(&self, kernel_release: &str) -> StepOutcome;

    /// Remove the packages installed by [`Self::install_dependencies`].
    async fn remove_dependencies(&self) -> StepOutcome;

    /// Refresh repository metadata.
    async fn refresh_cache(&self) -> StepOutcome;

    /// Install a package from a local file.
    async fn install_local_package(&self, path: &Path) -> StepOutcome;

    /// Remove a package installed by [`Self::install_local_package`],
    /// including its configuration files. Succeeds if it is not installed.
    async fn remove_local_package(&self, package: &str) -> StepOutcome;

    /// Installed version of `package`.
    ///
    /// # Errors
    /// Returns [`DriverError::Version`] when the package is absent or the
    /// query output cannot be parsed.
    async fn query_installed_version(&self, package: &str) -> StepOutcome<String>;
}

/// Run a package manager command, mapping any failure to
/// [`DriverError::Package`].
pub(crate) async fn run_package_cmd(
    runner: &dyn CommandRunner,
    cmd: &Cmd,
    action: &str,
) -> StepOutcome<CommandOutput> {
    debug!(command = %cmd, "{action}");

    let output = runner
        .run(cmd)
        .await
        .map_err(|e| DriverError::Package(format!("Error {action}: `{cmd}`: {e}")))?;

    if output.success() {
        Ok(output)
    } else {
        Err(DriverError::Package(format!(
            "Error {action}: `{cmd}` {}",
            output.failure_summary()
        )))
    }
}
