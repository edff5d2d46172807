//! Host identification.
//!
//! Reads the OS identity from the os-release file and asks the kernel for
//! the machine architecture and running release. Nothing here is cached:
//! callers probe at the start of every lifecycle operation.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{DriverError, StepOutcome};
use crate::exec::{Cmd, CommandRunner};

/// Package-ecosystem grouping of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    /// Debian, Ubuntu and derivatives (apt/dpkg).
    Debian,
    /// RHEL, CentOS and derivatives (yum/rpm).
    Rhel,
}

impl OsFamily {
    /// Classify an os-release `ID` plus its `ID_LIKE` tokens.
    #[must_use]
    pub fn from_ids<'a>(id: &'a str, id_like: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        std::iter::once(id)
            .chain(id_like)
            .find_map(|token| match token.to_lowercase().as_str() {
                "debian" | "ubuntu" => Some(Self::Debian),
                "rhel" | "centos" | "fedora" | "rocky" | "almalinux" => Some(Self::Rhel),
                _ => None,
            })
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debian => write!(f, "debian"),
            Self::Rhel => write!(f, "rhel"),
        }
    }
}

/// Identity of the host a lifecycle operation runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostProfile {
    pub os_family: OsFamily,
    /// os-release `ID` (e.g. "ubuntu", "centos").
    pub os_id: String,
    /// os-release `VERSION_ID` (e.g. "22.04", "7").
    pub os_version_id: String,
    /// Machine architecture (e.g. "x86_64").
    pub architecture: String,
    /// Running kernel release (e.g. "5.15.0-60-generic").
    pub kernel_release: String,
}

impl HostProfile {
    /// Vendor repository name for this OS release.
    ///
    /// Ubuntu 22.04 maps to `ubuntu2204`. Fedora has its own repositories
    /// (`fedora<major>`); every other RHEL-family host maps to `rhel<major>`.
    #[must_use]
    pub fn distribution_tag(&self) -> String {
        match self.os_family {
            OsFamily::Debian => {
                let version: String = self
                    .os_version_id
                    .chars()
                    .filter(char::is_ascii_digit)
                    .collect();
                format!("{}{version}", self.os_id.to_lowercase())
            }
            OsFamily::Rhel => {
                let major = self.os_version_id.split('.').next().unwrap_or_default();
                if self.os_id.eq_ignore_ascii_case("fedora") {
                    format!("fedora{major}")
                } else {
                    format!("rhel{major}")
                }
            }
        }
    }
}

/// Parse os-release `KEY=value` content.
///
/// Blank lines and `#` comments are skipped; surrounding single or double
/// quotes are removed from values.
#[must_use]
pub fn parse_os_release(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}

/// Probes host identity through system commands.
#[derive(Clone)]
pub struct HostProbe {
    runner: Arc<dyn CommandRunner>,
    os_release_path: PathBuf,
}

impl HostProbe {
    /// Create a probe reading OS identity from `os_release_path`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, os_release_path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            os_release_path: os_release_path.into(),
        }
    }

    /// Machine architecture as reported by `uname -m`.
    ///
    /// # Errors
    /// Returns [`DriverError::Probe`] if the command fails or prints nothing.
    pub async fn detect_architecture(&self) -> StepOutcome<String> {
        self.uname("-m", "system architecture").await
    }

    /// Running kernel release as reported by `uname -r`.
    ///
    /// # Errors
    /// Returns [`DriverError::Probe`] if the command fails or prints nothing.
    pub async fn detect_kernel_release(&self) -> StepOutcome<String> {
        self.uname("-r", "kernel version").await
    }

    /// OS family from the os-release file.
    ///
    /// # Errors
    /// Returns [`DriverError::Probe`] if the file is unreadable or names an
    /// unsupported distribution.
    pub async fn detect_os_family(&self) -> StepOutcome<OsFamily> {
        let (family, _) = self.read_os_release().await?;
        Ok(family)
    }

    /// Full host profile.
    ///
    /// # Errors
    /// Returns [`DriverError::Probe`] if any lookup fails.
    pub async fn probe(&self) -> StepOutcome<HostProfile> {
        let (os_family, fields) = self.read_os_release().await?;
        let architecture = self.detect_architecture().await?;
        let kernel_release = self.detect_kernel_release().await?;

        let profile = HostProfile {
            os_family,
            os_id: fields.get("ID").cloned().unwrap_or_default(),
            os_version_id: fields.get("VERSION_ID").cloned().unwrap_or_default(),
            architecture,
            kernel_release,
        };

        info!(
            os_family = %profile.os_family,
            os_id = %profile.os_id,
            os_version_id = %profile.os_version_id,
            architecture = %profile.architecture,
            kernel_release = %profile.kernel_release,
            "Probed host"
        );
        Ok(profile)
    }

    async fn read_os_release(&self) -> StepOutcome<(OsFamily, HashMap<String, String>)> {
        let path = &self.os_release_path;
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            DriverError::Probe(format!("Error reading {}: {e}", path.display()))
        })?;

        let fields = parse_os_release(&contents);
        let id = fields.get("ID").map(String::as_str).unwrap_or_default();
        let id_like = fields.get("ID_LIKE").map(String::as_str).unwrap_or_default();

        let family = OsFamily::from_ids(id, id_like.split_whitespace()).ok_or_else(|| {
            DriverError::Probe(format!(
                "Unsupported OS '{id}' (ID_LIKE '{id_like}') in {}",
                path.display()
            ))
        })?;

        debug!(os_id = %id, os_family = %family, "Detected OS family");
        Ok((family, fields))
    }

    async fn uname(&self, flag: &str, what: &str) -> StepOutcome<String> {
        let cmd = Cmd::new("uname").arg(flag);
        let output = self
            .runner
            .run(&cmd)
            .await
            .map_err(|e| DriverError::Probe(format!("Error detecting {what}: `{cmd}`: {e}")))?;

        if !output.success() {
            return Err(DriverError::Probe(format!(
                "Error detecting {what}: `{cmd}` {}",
                output.failure_summary()
            )));
        }

        let value = output.stdout.trim();
        if value.is_empty() {
            return Err(DriverError::Probe(format!(
                "Error detecting {what}: `{cmd}` printed nothing"
            )));
        }
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UBUNTU: &str = r#"NAME="Ubuntu"
VERSION="22.04.3 LTS (Jammy Jellyfish)"
ID=ubuntu
ID_LIKE=debian
VERSION_ID="22.04"
"#;

    const CENTOS: &str = r#"NAME="CentOS Linux"
VERSION="7 (Core)"
ID="centos"
ID_LIKE="rhel fedora"
VERSION_ID="7"
"#;

    fn profile(family: OsFamily, id: &str, version: &str) -> HostProfile {
        HostProfile {
            os_family: family,
            os_id: id.to_string(),
            os_version_id: version.to_string(),
            architecture: "x86_64".to_string(),
            kernel_release: "5.15.0-60-generic".to_string(),
        }
    }

    #[test]
    fn test_parse_os_release() {
        let fields = parse_os_release(CENTOS);
        assert_eq!(fields.get("ID").unwrap(), "centos");
        assert_eq!(fields.get("ID_LIKE").unwrap(), "rhel fedora");
        assert_eq!(fields.get("VERSION").unwrap(), "7 (Core)");
    }

    #[test]
    fn test_parse_os_release_skips_comments() {
        let fields = parse_os_release("# comment\n\nID='rocky'\nnot a pair\n");
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get("ID").unwrap(), "rocky");
    }

    #[test]
    fn test_family_from_ids() {
        let ubuntu = parse_os_release(UBUNTU);
        assert_eq!(
            OsFamily::from_ids(&ubuntu["ID"], ubuntu["ID_LIKE"].split_whitespace()),
            Some(OsFamily::Debian)
        );
        assert_eq!(OsFamily::from_ids("centos", []), Some(OsFamily::Rhel));
        assert_eq!(OsFamily::from_ids("pop", ["ubuntu", "debian"]), Some(OsFamily::Debian));
        assert_eq!(OsFamily::from_ids("ol", ["fedora"]), Some(OsFamily::Rhel));
        assert_eq!(OsFamily::from_ids("arch", []), None);
    }

    #[test]
    fn test_distribution_tag() {
        assert_eq!(
            profile(OsFamily::Debian, "ubuntu", "22.04").distribution_tag(),
            "ubuntu2204"
        );
        assert_eq!(
            profile(OsFamily::Rhel, "centos", "7").distribution_tag(),
            "rhel7"
        );
        assert_eq!(
            profile(OsFamily::Rhel, "rocky", "8.9").distribution_tag(),
            "rhel8"
        );
    }

    #[test]
    fn test_fedora_keeps_its_own_tag() {
        assert_eq!(OsFamily::from_ids("fedora", []), Some(OsFamily::Rhel));
        assert_eq!(
            profile(OsFamily::Rhel, "fedora", "39").distribution_tag(),
            "fedora39"
        );
        // Derivatives that only list fedora in ID_LIKE still use the RHEL tree.
        assert_eq!(
            profile(OsFamily::Rhel, "centos", "9").distribution_tag(),
            "rhel9"
        );
    }
}
