//! Driver lifecycle orchestration.
//!
//! [`DriverOps`] runs the install and remove sequences for one host. The
//! first failing step aborts the operation; earlier steps are neither
//! retried nor undone, so a failed operation is fixed by running it again.
//! A step that outlives the configured step deadline fails the same way.
//!
//! ```text
//! install: probe -> [adapter install sequence] -> version
//! remove:  probe -> driver -> repository -> refresh* -> headers -> deps
//!                                 (* only if an artifact was deleted)
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::DriverConfig;
use crate::error::{DriverError, DriverOpsError, Step, StepOutcome};
use crate::exec::CommandRunner;
use crate::host::{HostProbe, HostProfile, OsFamily};
use crate::package::{self, InstallStep, PackageManager, RemoveStep, REMOVE_SEQUENCE};
use crate::repository::{Registrar, RepositoryDescriptor};

/// Which driver package to manage, and on which OS family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverSpec {
    pub package_name: String,
    pub os_family: OsFamily,
}

impl DriverSpec {
    /// Create a driver spec.
    #[must_use]
    pub fn new(package_name: impl Into<String>, os_family: OsFamily) -> Self {
        Self {
            package_name: package_name.into(),
            os_family,
        }
    }

    /// Spec using the package configured for `os_family`.
    #[must_use]
    pub fn from_config(config: &DriverConfig, os_family: OsFamily) -> Self {
        Self::new(config.driver_package(os_family), os_family)
    }
}

/// Progress of the current (or last) operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "step")]
pub enum Phase {
    Idle,
    Probing,
    Installing(InstallStep),
    Removing(RemoveStep),
    Done,
    Failed(Step),
}

/// Installs, removes and reports the vendor GPU driver on one host.
pub struct DriverOps {
    spec: DriverSpec,
    config: DriverConfig,
    probe: HostProbe,
    registrar: Registrar,
    packages: Box<dyn PackageManager>,
    step_timeout: Option<Duration>,
    phase: Phase,
}

impl DriverOps {
    /// Create an orchestrator for `spec`, selecting the package manager for
    /// its OS family.
    ///
    /// # Errors
    /// Returns [`DriverError::Network`] if the HTTP client cannot be built.
    pub fn new(
        spec: DriverSpec,
        config: DriverConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, DriverError> {
        let probe = HostProbe::new(runner.clone(), config.os_release_path.clone());
        let registrar = Registrar::new(Duration::from_secs(config.http_timeout_secs))?;
        let packages = package::for_family(spec.os_family, runner);
        Ok(Self::with_parts(spec, config, probe, registrar, packages))
    }

    /// Create an orchestrator from explicit components.
    #[must_use]
    pub fn with_parts(
        spec: DriverSpec,
        config: DriverConfig,
        probe: HostProbe,
        registrar: Registrar,
        packages: Box<dyn PackageManager>,
    ) -> Self {
        let step_timeout = config.step_timeout_secs.map(Duration::from_secs);
        Self {
            spec,
            config,
            probe,
            registrar,
            packages,
            step_timeout,
            phase: Phase::Idle,
        }
    }

    /// Fail any single step that runs longer than `limit`.
    ///
    /// An expired step is dropped (killing its child process) and reported
    /// as that step's failure, like any other error.
    #[must_use]
    pub fn with_step_timeout(mut self, limit: Duration) -> Self {
        self.step_timeout = Some(limit);
        self
    }

    /// Driver this orchestrator manages.
    #[must_use]
    pub fn spec(&self) -> &DriverSpec {
        &self.spec
    }

    /// Progress of the current or most recent operation.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Install the driver and return the installed version.
    ///
    /// # Errors
    /// Returns the first failing step and its classified error.
    pub async fn install(&mut self) -> Result<String, DriverOpsError> {
        info!(package = %self.spec.package_name, family = %self.spec.os_family, "Installing GPU driver");

        let profile = self.probe_host().await?;
        let descriptor = RepositoryDescriptor::for_host(&profile, &self.config);
        let mut fetched: Option<Vec<u8>> = None;

        for &step in self.packages.install_sequence() {
            self.phase = Phase::Installing(step);
            debug!(step = %step, "Running install step");

            let outcome = within(
                self.step_timeout,
                step.into(),
                self.install_step(step, &profile, &descriptor, &mut fetched),
            )
            .await;
            self.check(step.into(), outcome)?;
        }

        let version = within(self.step_timeout, Step::QueryVersion, self.query_version()).await;
        let version = self.check(Step::QueryVersion, version)?;

        self.phase = Phase::Done;
        info!(package = %self.spec.package_name, version = %version, "GPU driver installed");
        Ok(version)
    }

    async fn install_step(
        &self,
        step: InstallStep,
        profile: &HostProfile,
        descriptor: &RepositoryDescriptor,
        fetched: &mut Option<Vec<u8>>,
    ) -> StepOutcome {
        let packages = self.packages.as_ref();
        match step {
            InstallStep::Dependencies => packages.install_dependencies().await,
            InstallStep::FetchRepository => {
                *fetched = Some(self.registrar.fetch(descriptor).await?);
                Ok(())
            }
            InstallStep::Repository => match fetched.take() {
                Some(body) => self.registrar.persist(descriptor, &body, packages).await,
                None => self.registrar.register(descriptor, packages).await,
            },
            InstallStep::KernelHeaders => {
                packages.install_kernel_headers(&profile.kernel_release).await
            }
            InstallStep::RefreshCache => packages.refresh_cache().await,
            InstallStep::Driver => packages.install_driver(&self.spec.package_name).await,
        }
    }

    /// Remove the driver, its repository, kernel headers and dependencies.
    ///
    /// A missing repository artifact is skipped. A missing driver package
    /// fails with whatever the package manager reports.
    ///
    /// # Errors
    /// Returns the first failing step and its classified error.
    pub async fn remove(&mut self) -> Result<(), DriverOpsError> {
        info!(package = %self.spec.package_name, family = %self.spec.os_family, "Removing GPU driver");

        let profile = self.probe_host().await?;
        let descriptor = RepositoryDescriptor::for_host(&profile, &self.config);
        let mut artifact_removed = false;

        for &step in REMOVE_SEQUENCE {
            self.phase = Phase::Removing(step);
            debug!(step = %step, "Running remove step");

            let outcome = within(
                self.step_timeout,
                step.into(),
                self.remove_step(step, &profile, &descriptor, &mut artifact_removed),
            )
            .await;
            self.check(step.into(), outcome)?;
        }

        self.phase = Phase::Done;
        info!(package = %self.spec.package_name, "GPU driver removed");
        Ok(())
    }

    async fn remove_step(
        &self,
        step: RemoveStep,
        profile: &HostProfile,
        descriptor: &RepositoryDescriptor,
        artifact_removed: &mut bool,
    ) -> StepOutcome {
        let packages = self.packages.as_ref();
        match step {
            RemoveStep::Driver => packages.remove_driver(&self.spec.package_name).await,
            RemoveStep::Repository => {
                *artifact_removed = self.registrar.unregister(descriptor, packages).await?;
                Ok(())
            }
            RemoveStep::RefreshCache if !*artifact_removed => {
                debug!("Repository unchanged, skipping cache refresh");
                Ok(())
            }
            RemoveStep::RefreshCache => packages.refresh_cache().await,
            RemoveStep::KernelHeaders => {
                packages.remove_kernel_headers(&profile.kernel_release).await
            }
            RemoveStep::Dependencies => packages.remove_dependencies().await,
        }
    }

    /// Installed driver version.
    ///
    /// Does not probe the host; the package manager was bound at
    /// construction.
    ///
    /// # Errors
    /// Returns a [`DriverError::Version`] failure if the package is absent.
    pub async fn version(&self) -> Result<String, DriverOpsError> {
        within(self.step_timeout, Step::QueryVersion, self.query_version())
            .await
            .map_err(|e| DriverOpsError::new(Step::QueryVersion, e))
    }

    async fn query_version(&self) -> StepOutcome<String> {
        self.packages
            .query_installed_version(&self.spec.package_name)
            .await
    }

    async fn probe_host(&mut self) -> Result<HostProfile, DriverOpsError> {
        self.phase = Phase::Probing;
        let profile = within(self.step_timeout, Step::Probe, self.probe.probe()).await;
        let profile = self.check(Step::Probe, profile)?;

        if profile.os_family != self.spec.os_family {
            let mismatch = DriverError::Probe(format!(
                "Host reports {} family but driver is configured for {}",
                profile.os_family, self.spec.os_family
            ));
            return self.check(Step::Probe, Err(mismatch));
        }
        Ok(profile)
    }

    /// Record a step result, moving to [`Phase::Failed`] on error.
    fn check<T>(&mut self, step: Step, outcome: StepOutcome<T>) -> Result<T, DriverOpsError> {
        outcome.map_err(|source| {
            error!(step = %step, kind = %source.kind(), error = %source, "Lifecycle step failed");
            self.phase = Phase::Failed(step);
            DriverOpsError::new(step, source)
        })
    }
}

/// Run one step, failing it as `step` if `limit` passes first.
async fn within<T>(
    limit: Option<Duration>,
    step: Step,
    fut: impl Future<Output = StepOutcome<T>>,
) -> StepOutcome<T> {
    let Some(limit) = limit else {
        return fut.await;
    };
    match tokio::time::timeout(limit, fut).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(step = %step, limit = ?limit, "Step deadline expired");
            Err(step.timed_out(limit))
        }
    }
}
