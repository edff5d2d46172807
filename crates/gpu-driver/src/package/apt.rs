//! Debian-family package manager (apt/dpkg).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::traits::{run_package_cmd, InstallStep, PackageManager};
use crate::error::{DriverError, StepOutcome};
use crate::exec::{Cmd, CommandRunner};
use crate::host::OsFamily;

/// Kernel headers are installed between fetching and installing the keyring.
const APT_INSTALL_SEQUENCE: &[InstallStep] = &[
    InstallStep::Dependencies,
    InstallStep::FetchRepository,
    InstallStep::KernelHeaders,
    InstallStep::Repository,
    InstallStep::RefreshCache,
    InstallStep::Driver,
];

/// apt-based adapter.
///
/// The vendor driver package declares its own dependencies, so the
/// dependency steps do nothing here.
#[derive(Clone)]
pub struct Apt {
    runner: Arc<dyn CommandRunner>,
}

impl Apt {
    /// Create an apt adapter running commands through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// apt and dpkg tools run non-interactively, in the C locale.
    fn tool<I, S>(program: &str, args: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Cmd::new(program)
            .args(args)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .env("LC_ALL", "C")
    }

    fn apt_get<I, S>(args: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::tool("apt-get", args)
    }
}

/// Extract the installed version from `apt-cache policy` output.
///
/// Every line is scanned; the first `Installed:` field wins. `(none)` means
/// the package is known but not installed.
///
/// # Errors
/// Returns [`DriverError::Version`] if no line carries an installed version.
pub fn parse_policy_version(output: &str, package: &str) -> StepOutcome<String> {
    let value = output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Installed:"))
        .map(str::trim)
        .ok_or_else(|| {
            DriverError::Version(format!("No installed version reported for {package}"))
        })?;

    if value.is_empty() || value == "(none)" {
        return Err(DriverError::Version(format!(
            "Cannot return version for package that isn't installed: {package}"
        )));
    }
    Ok(value.to_string())
}

#[async_trait]
impl PackageManager for Apt {
    fn family(&self) -> OsFamily {
        OsFamily::Debian
    }

    fn kernel_packages(&self, kernel_release: &str) -> Vec<String> {
        vec![format!("linux-headers-{kernel_release}")]
    }

    fn install_sequence(&self) -> &'static [InstallStep] {
        APT_INSTALL_SEQUENCE
    }

    async fn install_dependencies(&self) -> StepOutcome {
        debug!("Driver package pulls its own dependencies on apt hosts");
        Ok(())
    }

    async fn install_kernel_headers(&self, kernel_release: &str) -> StepOutcome {
        let packages = self.kernel_packages(kernel_release);
        info!(packages = ?packages, "Installing kernel headers");
        let cmd = Self::apt_get(["install", "-y"]).args(packages);
        run_package_cmd(self.runner.as_ref(), &cmd, "installing kernel headers").await?;
        Ok(())
    }

    async fn install_driver(&self, package: &str) -> StepOutcome {
        info!(package = %package, "Installing driver package");
        let cmd = Self::apt_get(["install", "-y", package]);
        run_package_cmd(self.runner.as_ref(), &cmd, "installing driver").await?;
        Ok(())
    }

    async fn remove_driver(&self, package: &str) -> StepOutcome {
        info!(package = %package, "Purging driver package");
        let cmd = Self::apt_get(["purge", "-y", package]);
        run_package_cmd(self.runner.as_ref(), &cmd, "removing driver").await?;
        Ok(())
    }

    async fn remove_kernel_headers(&self, kernel_release: &str) -> StepOutcome {
        let packages = self.kernel_packages(kernel_release);
        info!(packages = ?packages, "Purging kernel headers");
        let cmd = Self::apt_get(["purge", "-y"]).args(packages);
        run_package_cmd(self.runner.as_ref(), &cmd, "removing kernel headers").await?;
        Ok(())
    }

    async fn remove_dependencies(&self) -> StepOutcome {
        debug!("No explicit dependencies to remove on apt hosts");
        Ok(())
    }

    async fn refresh_cache(&self) -> StepOutcome {
        let cmd = Self::apt_get(["update"]);
        run_package_cmd(self.runner.as_ref(), &cmd, "updating package lists").await?;
        Ok(())
    }

    // --force-confmiss restores conffiles (the keyring's source list) that
    // were deleted while the package stayed installed.
    async fn install_local_package(&self, path: &Path) -> StepOutcome {
        let cmd = Self::tool("dpkg", ["-i", "--force-confmiss"]).arg(path.display().to_string());
        run_package_cmd(self.runner.as_ref(), &cmd, "installing local package").await?;
        Ok(())
    }

    async fn remove_local_package(&self, package: &str) -> StepOutcome {
        info!(package = %package, "Purging repository package");
        let cmd = Self::apt_get(["purge", "-y", package]);
        run_package_cmd(self.runner.as_ref(), &cmd, "removing repository package").await?;
        Ok(())
    }

    async fn query_installed_version(&self, package: &str) -> StepOutcome<String> {
        let cmd = Self::tool("apt-cache", ["policy", package]);
        let output = self.runner.run(&cmd).await.map_err(|e| {
            DriverError::Version(format!("Error querying version: `{cmd}`: {e}"))
        })?;

        if !output.success() {
            return Err(DriverError::Version(format!(
                "Error querying version: `{cmd}` {}",
                output.failure_summary()
            )));
        }
        parse_policy_version(&output.stdout, package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY_INSTALLED: &str = "cuda-drivers:
  Installed: 535.129.03
  Candidate: 545.23.08-1
  Version table:
     545.23.08-1 600
        600 https://developer.download.nvidia.com/compute/cuda/repos/ubuntu2204/x86_64  Packages
 *** 535.129.03 100
        100 /var/lib/dpkg/status
";

    #[test]
    fn test_parse_installed_version() {
        assert_eq!(
            parse_policy_version(POLICY_INSTALLED, "cuda-drivers").unwrap(),
            "535.129.03"
        );
    }

    #[test]
    fn test_parse_skips_leading_lines() {
        let output = "N: some notice\nW: a warning\n  Installed: 1.2.3\n";
        assert_eq!(parse_policy_version(output, "pkg").unwrap(), "1.2.3");
    }

    #[test]
    fn test_parse_missing_installed_line() {
        let err = parse_policy_version("cuda-drivers:\n  Candidate: 545.23.08-1\n", "cuda-drivers")
            .unwrap_err();
        assert!(matches!(err, DriverError::Version(_)));

        let err = parse_policy_version("", "cuda-drivers").unwrap_err();
        assert!(matches!(err, DriverError::Version(_)));
    }

    #[test]
    fn test_parse_not_installed() {
        let output = "cuda-drivers:\n  Installed: (none)\n  Candidate: 545.23.08-1\n";
        let err = parse_policy_version(output, "cuda-drivers").unwrap_err();
        assert!(matches!(err, DriverError::Version(_)));
    }

    /// Runner that records commands and succeeds with canned output.
    #[derive(Default)]
    struct Recorder {
        stdout: String,
        seen: std::sync::Mutex<Vec<Cmd>>,
    }

    #[async_trait]
    impl CommandRunner for Recorder {
        async fn run(&self, cmd: &Cmd) -> std::io::Result<crate::exec::CommandOutput> {
            self.seen.lock().unwrap().push(cmd.clone());
            Ok(crate::exec::CommandOutput::ok(self.stdout.clone()))
        }
    }

    fn pins_c_locale(cmd: &Cmd) -> bool {
        cmd.env.iter().any(|(k, v)| k == "LC_ALL" && v == "C")
    }

    #[tokio::test]
    async fn test_version_query_runs_in_c_locale() {
        let recorder = Arc::new(Recorder {
            stdout: POLICY_INSTALLED.to_string(),
            ..Recorder::default()
        });
        let apt = Apt::new(recorder.clone());

        assert_eq!(
            apt.query_installed_version("cuda-drivers").await.unwrap(),
            "535.129.03"
        );
        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen[0].to_string(), "apt-cache policy cuda-drivers");
        assert!(pins_c_locale(&seen[0]));
    }

    #[tokio::test]
    async fn test_mutating_commands_run_in_c_locale() {
        let recorder = Arc::new(Recorder::default());
        let apt = Apt::new(recorder.clone());

        apt.install_kernel_headers("5.15.0-60-generic").await.unwrap();
        apt.install_local_package(Path::new("/tmp/k/cuda-keyring_1.1-1_all.deb"))
            .await
            .unwrap();
        apt.remove_local_package("cuda-keyring").await.unwrap();
        apt.refresh_cache().await.unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert!(seen.iter().all(pins_c_locale));
        assert_eq!(
            seen[1].to_string(),
            "dpkg -i --force-confmiss /tmp/k/cuda-keyring_1.1-1_all.deb"
        );
        assert_eq!(seen[2].to_string(), "apt-get purge -y cuda-keyring");
    }

    #[test]
    fn test_kernel_packages() {
        let apt = Apt::new(Arc::new(crate::exec::SystemRunner));
        assert_eq!(
            apt.kernel_packages("5.15.0-60-generic"),
            vec!["linux-headers-5.15.0-60-generic".to_string()]
        );
        let sequence = apt.install_sequence();
        let headers = sequence.iter().position(|s| *s == InstallStep::KernelHeaders);
        let keyring = sequence.iter().position(|s| *s == InstallStep::Repository);
        assert!(headers < keyring);
        assert_eq!(sequence[1], InstallStep::FetchRepository);
    }
}
