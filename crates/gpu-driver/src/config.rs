//! Driver provisioning configuration.
//!
//! Every field has a default, so an empty or missing config file yields a
//! usable configuration for a stock host.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::host::OsFamily;

/// Default vendor repository root.
pub const DEFAULT_REPO_BASE_URL: &str = "https://developer.download.nvidia.com/compute/cuda/repos";

/// Default keyring package published in each Debian-family repository.
pub const DEFAULT_KEYRING_FILE: &str = "cuda-keyring_1.1-1_all.deb";

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Config file is not valid YAML for [`DriverConfig`].
    #[error("Failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Settings for driver provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DriverConfig {
    /// Driver package installed on Debian-family hosts.
    pub ubuntu_driver_package: String,
    /// Driver package installed on RHEL-family hosts.
    pub centos_driver_package: String,
    /// Vendor repository root; `<tag>/<arch>/...` is appended.
    pub repo_base_url: String,
    /// Keyring package file name for Debian-family repositories.
    pub keyring_file: String,
    /// Directory holding yum repository files.
    pub yum_repos_dir: PathBuf,
    /// Directory holding apt source lists.
    pub apt_sources_dir: PathBuf,
    /// OS identification file.
    pub os_release_path: PathBuf,
    /// Timeout for the repository fetch.
    pub http_timeout_secs: u64,
    /// Deadline for each lifecycle step. Unset means steps may run as long
    /// as they need.
    pub step_timeout_secs: Option<u64>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            ubuntu_driver_package: "cuda-drivers".to_string(),
            centos_driver_package: "nvidia-driver-latest-dkms".to_string(),
            repo_base_url: DEFAULT_REPO_BASE_URL.to_string(),
            keyring_file: DEFAULT_KEYRING_FILE.to_string(),
            yum_repos_dir: PathBuf::from("/etc/yum.repos.d"),
            apt_sources_dir: PathBuf::from("/etc/apt/sources.list.d"),
            os_release_path: PathBuf::from("/etc/os-release"),
            http_timeout_secs: 30,
            step_timeout_secs: None,
        }
    }
}

impl DriverConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let config = Self::from_yaml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        info!(path = %path.display(), "Loaded driver config");
        Ok(config)
    }

    /// Load from `path` if given, otherwise use defaults.
    ///
    /// # Errors
    /// Returns an error if a given file cannot be read or parsed.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p).await,
            None => {
                debug!("No config file given, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse configuration from YAML text.
    ///
    /// # Errors
    /// Returns an error if the text is not a valid config document.
    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
    }

    /// Driver package configured for `family`.
    #[must_use]
    pub fn driver_package(&self, family: OsFamily) -> &str {
        match family {
            OsFamily::Debian => &self.ubuntu_driver_package,
            OsFamily::Rhel => &self.centos_driver_package,
        }
    }
}
