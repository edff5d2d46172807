//! RHEL-family package manager (yum/rpm).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::traits::{run_package_cmd, PackageManager};
use crate::error::{DriverError, StepOutcome};
use crate::exec::{Cmd, CommandRunner};
use crate::host::OsFamily;

/// Build and runtime dependencies of the vendor driver on RHEL hosts.
pub const PACKAGE_DEPS: &[&str] = &[
    "tar",
    "bzip2",
    "make",
    "automake",
    "gcc",
    "gcc-c++",
    "pciutils",
    "elfutils-libelf-devel",
    "libglvnd-devel",
    "iptables",
    "firewalld",
    "vim",
    "bind-utils",
    "wget",
];

/// yum-based adapter.
#[derive(Clone)]
pub struct Yum {
    runner: Arc<dyn CommandRunner>,
}

impl Yum {
    /// Create a yum adapter running commands through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn yum(&self, args: Vec<String>, action: &str) -> StepOutcome {
        let cmd = Cmd::new("yum").args(args);
        run_package_cmd(self.runner.as_ref(), &cmd, action).await?;
        Ok(())
    }
}

/// Strip the quoting `--queryformat "'%{VERSION}'"` leaves around the value.
#[must_use]
pub fn clean_rpm_version(raw: &str) -> &str {
    raw.trim().trim_matches(|c| c == '\'' || c == '"').trim()
}

#[async_trait]
impl PackageManager for Yum {
    fn family(&self) -> OsFamily {
        OsFamily::Rhel
    }

    fn kernel_packages(&self, kernel_release: &str) -> Vec<String> {
        vec![
            format!("kernel-devel-{kernel_release}"),
            format!("kernel-headers-{kernel_release}"),
        ]
    }

    async fn install_dependencies(&self) -> StepOutcome {
        info!(count = PACKAGE_DEPS.len(), "Installing driver dependencies");
        let mut args = vec!["install".to_string(), "-y".to_string()];
        args.extend(PACKAGE_DEPS.iter().map(ToString::to_string));
        self.yum(args, "installing driver dependencies").await
    }

    async fn install_kernel_headers(&self, kernel_release: &str) -> StepOutcome {
        let packages = self.kernel_packages(kernel_release);
        info!(packages = ?packages, "Installing devel kernel and headers");
        let mut args = vec!["install".to_string(), "-y".to_string()];
        args.extend(packages);
        self.yum(args, "installing devel kernel headers").await
    }

    async fn install_driver(&self, package: &str) -> StepOutcome {
        info!(package = %package, "Installing driver package");
        self.yum(
            vec!["install".into(), "-y".into(), package.to_string()],
            "installing driver",
        )
        .await
    }

    async fn remove_driver(&self, package: &str) -> StepOutcome {
        info!(package = %package, "Erasing driver package");
        self.yum(
            vec!["erase".into(), "-y".into(), package.to_string()],
            "removing driver",
        )
        .await
    }

    async fn remove_kernel_headers(&self, kernel_release: &str) -> StepOutcome {
        let packages = self.kernel_packages(kernel_release);
        info!(packages = ?packages, "Erasing devel kernel and headers");
        let mut args = vec!["erase".to_string(), "-y".to_string()];
        args.extend(packages);
        self.yum(args, "removing devel kernel headers").await
    }

    // Erases the shared toolchain unconditionally, even if other software
    // on the host still needs it.
    async fn remove_dependencies(&self) -> StepOutcome {
        for dep in PACKAGE_DEPS {
            info!(package = %dep, "Erasing dependency");
            self.yum(
                vec!["erase".into(), "-y".into(), (*dep).to_string()],
                &format!("removing {dep}"),
            )
            .await?;
        }
        Ok(())
    }

    async fn refresh_cache(&self) -> StepOutcome {
        self.yum(
            vec!["clean".into(), "expire-cache".into()],
            "flushing the cache",
        )
        .await
    }

    async fn install_local_package(&self, path: &Path) -> StepOutcome {
        self.yum(
            vec!["localinstall".into(), "-y".into(), path.display().to_string()],
            "installing local package",
        )
        .await
    }

    async fn remove_local_package(&self, package: &str) -> StepOutcome {
        let query = Cmd::new("rpm").args(["-q", package]);
        let installed = self
            .runner
            .run(&query)
            .await
            .map_err(|e| DriverError::Package(format!("Error querying {package}: `{query}`: {e}")))?
            .success();
        if !installed {
            debug!(package = %package, "Package not installed, nothing to erase");
            return Ok(());
        }

        self.yum(
            vec!["erase".into(), "-y".into(), package.to_string()],
            "removing local package",
        )
        .await
    }

    async fn query_installed_version(&self, package: &str) -> StepOutcome<String> {
        let cmd = Cmd::new("rpm").args(["-q", "--queryformat", "'%{VERSION}'", package]);
        let output = self.runner.run(&cmd).await.map_err(|e| {
            DriverError::Version(format!("Error querying version: `{cmd}`: {e}"))
        })?;

        if !output.success() {
            return Err(DriverError::Version(format!(
                "Cannot return version for package that isn't installed: {package} ({})",
                output.failure_summary()
            )));
        }

        let version = clean_rpm_version(&output.stdout);
        if version.is_empty() {
            return Err(DriverError::Version(format!(
                "Empty version reported for {package}"
            )));
        }
        Ok(version.to_string())
    }
}
