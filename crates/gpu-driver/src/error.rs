//! Error taxonomy for driver lifecycle operations.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified failure of a single lifecycle step.
///
/// Every external call (process, HTTP, filesystem) is mapped onto one of
/// these variants at the point where it fails. The detail string names the
/// command or path involved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Architecture, kernel or OS identity detection failed.
    #[error("Probe error: {0}")]
    Probe(String),

    /// Repository descriptor or keyring fetch failed.
    #[error("Network error: {0}")]
    Network(String),

    /// Writing or deleting the repository artifact failed.
    #[error("Write error: {0}")]
    Write(String),

    /// A package manager invocation returned non-zero.
    #[error("Package error: {0}")]
    Package(String),

    /// The installed-version query found nothing usable.
    #[error("Version error: {0}")]
    Version(String),
}

/// Discriminant of [`DriverError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Probe,
    Network,
    Write,
    Package,
    Version,
}

impl DriverError {
    /// Error kind of this failure.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Probe(_) => ErrorKind::Probe,
            Self::Network(_) => ErrorKind::Network,
            Self::Write(_) => ErrorKind::Write,
            Self::Package(_) => ErrorKind::Package,
            Self::Version(_) => ErrorKind::Version,
        }
    }

    /// Human-readable detail without the kind prefix.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Probe(d)
            | Self::Network(d)
            | Self::Write(d)
            | Self::Package(d)
            | Self::Version(d) => d,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probe => write!(f, "probe"),
            Self::Network => write!(f, "network"),
            Self::Write => write!(f, "write"),
            Self::Package => write!(f, "package"),
            Self::Version => write!(f, "version"),
        }
    }
}

/// Result of one discrete lifecycle step.
pub type StepOutcome<T = ()> = Result<T, DriverError>;

/// A step of the install or remove sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Probe,
    InstallDependencies,
    FetchRepository,
    RegisterRepository,
    InstallKernelHeaders,
    RefreshCache,
    InstallDriver,
    QueryVersion,
    RemoveDriver,
    UnregisterRepository,
    RemoveKernelHeaders,
    RemoveDependencies,
}

impl Step {
    /// Error kind a failure of this step is classified as when it has no
    /// more specific cause, such as running past its deadline.
    #[must_use]
    pub fn default_kind(self) -> ErrorKind {
        match self {
            Self::Probe => ErrorKind::Probe,
            Self::FetchRepository => ErrorKind::Network,
            Self::RegisterRepository | Self::UnregisterRepository => ErrorKind::Write,
            Self::QueryVersion => ErrorKind::Version,
            Self::InstallDependencies
            | Self::InstallKernelHeaders
            | Self::RefreshCache
            | Self::InstallDriver
            | Self::RemoveDriver
            | Self::RemoveKernelHeaders
            | Self::RemoveDependencies => ErrorKind::Package,
        }
    }

    /// Classified error for this step exceeding `limit`.
    #[must_use]
    pub fn timed_out(self, limit: Duration) -> DriverError {
        let detail = format!("{self} did not finish within {limit:?}");
        match self.default_kind() {
            ErrorKind::Probe => DriverError::Probe(detail),
            ErrorKind::Network => DriverError::Network(detail),
            ErrorKind::Write => DriverError::Write(detail),
            ErrorKind::Package => DriverError::Package(detail),
            ErrorKind::Version => DriverError::Version(detail),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Probe => "host probe",
            Self::InstallDependencies => "dependency install",
            Self::FetchRepository => "repository fetch",
            Self::RegisterRepository => "repository registration",
            Self::InstallKernelHeaders => "kernel header install",
            Self::RefreshCache => "package cache refresh",
            Self::InstallDriver => "driver install",
            Self::QueryVersion => "version query",
            Self::RemoveDriver => "driver removal",
            Self::UnregisterRepository => "repository removal",
            Self::RemoveKernelHeaders => "kernel header removal",
            Self::RemoveDependencies => "dependency removal",
        };
        f.write_str(name)
    }
}

/// Error surfaced across the orchestrator boundary.
///
/// Wraps the classified step error together with the step that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{step} failed: {source}")]
pub struct DriverOpsError {
    /// Step that aborted the operation.
    pub step: Step,
    /// Classified cause.
    #[source]
    pub source: DriverError,
}

impl DriverOpsError {
    /// Wrap a step error.
    #[must_use]
    pub fn new(step: Step, source: DriverError) -> Self {
        Self { step, source }
    }

    /// Error kind of the underlying step failure.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}
