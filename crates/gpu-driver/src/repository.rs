//! Vendor package repository registration.
//!
//! RHEL-family hosts get a plain `.repo` file dropped into the yum
//! repository directory. Debian-family hosts install a keyring package,
//! which in turn writes the apt source list tracked here as the artifact.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::DriverConfig;
use crate::error::{DriverError, StepOutcome};
use crate::host::{HostProfile, OsFamily};
use crate::package::PackageManager;

/// What the fetched registration material is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Written verbatim to `local_path`.
    TextRepoFile,
    /// Installed through the package manager's local-file install.
    BinaryKeyringPackage,
}

/// Where to fetch repository material and where it lands on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    pub source_url: String,
    pub local_path: PathBuf,
    pub content_kind: ContentKind,
}

impl RepositoryDescriptor {
    /// Descriptor for `profile` under the configured repository layout.
    #[must_use]
    pub fn for_host(profile: &HostProfile, config: &DriverConfig) -> Self {
        let tag = profile.distribution_tag();
        let arch = &profile.architecture;
        let base = config.repo_base_url.trim_end_matches('/');

        match profile.os_family {
            OsFamily::Rhel => Self {
                source_url: format!("{base}/{tag}/{arch}/cuda-{tag}.repo"),
                local_path: config.yum_repos_dir.join(format!("cuda-{tag}.repo")),
                content_kind: ContentKind::TextRepoFile,
            },
            OsFamily::Debian => Self {
                source_url: format!("{base}/{tag}/{arch}/{}", config.keyring_file),
                local_path: config
                    .apt_sources_dir
                    .join(format!("cuda-{tag}-{arch}.list")),
                content_kind: ContentKind::BinaryKeyringPackage,
            },
        }
    }

    /// File name of the fetched material.
    fn file_name(&self) -> &str {
        self.source_url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("repository")
    }

    /// Package that owns the artifact, for keyring registrations.
    ///
    /// Debian package files are named `<name>_<version>_<arch>.deb`.
    #[must_use]
    pub fn keyring_package(&self) -> Option<&str> {
        match self.content_kind {
            ContentKind::TextRepoFile => None,
            ContentKind::BinaryKeyringPackage => self
                .file_name()
                .split('_')
                .next()
                .filter(|name| !name.is_empty()),
        }
    }
}

/// Fetches and persists repository registration material.
#[derive(Clone)]
pub struct Registrar {
    client: Client,
}

impl Registrar {
    /// Create a registrar whose fetches time out after `timeout`.
    ///
    /// # Errors
    /// Returns [`DriverError::Network`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> StepOutcome<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DriverError::Network(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Make the vendor repository visible to the local package manager.
    ///
    /// Equivalent to [`Self::fetch`] followed by [`Self::persist`].
    ///
    /// # Errors
    /// - [`DriverError::Network`] if the fetch fails or returns non-2xx
    /// - [`DriverError::Write`] if the artifact or scratch file cannot be written
    /// - [`DriverError::Package`] if the keyring package fails to install
    pub async fn register(
        &self,
        descriptor: &RepositoryDescriptor,
        package_manager: &dyn PackageManager,
    ) -> StepOutcome {
        let body = self.fetch(descriptor).await?;
        self.persist(descriptor, &body, package_manager).await
    }

    /// Download the registration material for `descriptor`.
    ///
    /// # Errors
    /// Returns [`DriverError::Network`] on transport failure or a non-2xx
    /// response.
    pub async fn fetch(&self, descriptor: &RepositoryDescriptor) -> StepOutcome<Vec<u8>> {
        let url = &descriptor.source_url;
        debug!(url = %url, "GET request");

        let response = self.client.get(url).send().await.map_err(|e| {
            DriverError::Network(format!("Error getting vendor repository from {url}: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DriverError::Network(format!(
                "Error getting vendor repository from {url}: HTTP {status}"
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            DriverError::Network(format!("Error reading vendor repository from {url}: {e}"))
        })?;
        Ok(body.to_vec())
    }

    /// Install previously fetched material on the host.
    ///
    /// # Errors
    /// - [`DriverError::Write`] if the artifact or scratch file cannot be written
    /// - [`DriverError::Package`] if the keyring package fails to install
    pub async fn persist(
        &self,
        descriptor: &RepositoryDescriptor,
        body: &[u8],
        package_manager: &dyn PackageManager,
    ) -> StepOutcome {
        match descriptor.content_kind {
            ContentKind::TextRepoFile => write_repo_file(&descriptor.local_path, body).await?,
            ContentKind::BinaryKeyringPackage => {
                install_keyring(descriptor.file_name(), body, package_manager).await?;
            }
        }

        info!(
            source = %descriptor.source_url,
            path = %descriptor.local_path.display(),
            "Registered vendor repository"
        );
        Ok(())
    }

    /// Delete the repository artifact.
    ///
    /// For keyring registrations the keyring package is purged first. Its
    /// source list is a dpkg conffile, and dpkg will not recreate a deleted
    /// conffile while the package stays installed.
    ///
    /// Returns whether the artifact was present; a missing artifact is not
    /// an error.
    ///
    /// # Errors
    /// - [`DriverError::Package`] if the keyring package cannot be purged
    /// - [`DriverError::Write`] if the file exists but cannot be removed
    pub async fn unregister(
        &self,
        descriptor: &RepositoryDescriptor,
        package_manager: &dyn PackageManager,
    ) -> StepOutcome<bool> {
        let path = &descriptor.local_path;
        let present = tokio::fs::try_exists(path).await.unwrap_or(false);

        if let Some(keyring) = descriptor.keyring_package() {
            package_manager.remove_local_package(keyring).await?;
        }

        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(DriverError::Write(format!(
                    "Error removing {}: {e}",
                    path.display()
                )));
            }
        }

        if present {
            info!(path = %path.display(), "Removed vendor repository");
        } else {
            debug!(path = %path.display(), "Repository artifact already absent");
        }
        Ok(present)
    }
}

async fn write_repo_file(path: &Path, body: &[u8]) -> StepOutcome {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            DriverError::Write(format!("Error creating {}: {e}", parent.display()))
        })?;
    }

    tokio::fs::write(path, body)
        .await
        .map_err(|e| DriverError::Write(format!("Error writing {}: {e}", path.display())))
}

/// Install a keyring package from a scratch directory.
///
/// The directory is removed when `scratch` drops, whichever way this
/// returns.
async fn install_keyring(
    file_name: &str,
    body: &[u8],
    package_manager: &dyn PackageManager,
) -> StepOutcome {
    let scratch = tempfile::Builder::new()
        .prefix("gpu-driver-keyring")
        .tempdir()
        .map_err(|e| DriverError::Write(format!("Error creating scratch directory: {e}")))?;

    let package_path = scratch.path().join(file_name);
    tokio::fs::write(&package_path, body).await.map_err(|e| {
        DriverError::Write(format!("Error writing {}: {e}", package_path.display()))
    })?;

    debug!(path = %package_path.display(), "Installing keyring package");
    package_manager.install_local_package(&package_path).await
}
