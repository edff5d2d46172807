//! Lifecycle event handling.
//!
//! The controller decides nothing about *when* to install or remove; it
//! runs one event at a time against the orchestrator, publishes a unit
//! status for the operator, and defers failed events so they can be
//! redriven.

use std::fmt;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::DriverOpsError;
use crate::orchestrator::DriverOps;

/// Lifecycle request delivered to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEvent {
    Install,
    Remove,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

/// Status reported for the managed unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "message")]
pub enum UnitStatus {
    /// No event handled yet.
    Unknown,
    /// An operation is in flight.
    Maintenance(String),
    /// The last operation failed and needs a redrive or operator action.
    Blocked(String),
    /// The last operation completed.
    Active(String),
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Maintenance(m) => write!(f, "maintenance: {m}"),
            Self::Blocked(m) => write!(f, "blocked: {m}"),
            Self::Active(m) => write!(f, "active: {m}"),
        }
    }
}

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// The operation completed; carries the installed version for installs.
    Completed(Option<String>),
    /// The operation failed and the event should be delivered again.
    Deferred(DriverOpsError),
}

impl EventOutcome {
    /// Whether the event finished.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// How often and how fast to redeliver a deferred event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedrivePolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for RedrivePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(30),
        }
    }
}

/// Serializes lifecycle operations for one host.
pub struct LifecycleController {
    ops: Mutex<DriverOps>,
    status: RwLock<UnitStatus>,
    workload_version: RwLock<Option<String>>,
}

impl LifecycleController {
    /// Wrap an orchestrator.
    #[must_use]
    pub fn new(ops: DriverOps) -> Self {
        Self {
            ops: Mutex::new(ops),
            status: RwLock::new(UnitStatus::Unknown),
            workload_version: RwLock::new(None),
        }
    }

    /// Current unit status.
    #[must_use]
    pub fn status(&self) -> UnitStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Driver version recorded by the last successful install.
    #[must_use]
    pub fn workload_version(&self) -> Option<String> {
        self.workload_version
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Handle one event. Waits for any operation already in flight.
    pub async fn handle(&self, event: LifecycleEvent) -> EventOutcome {
        let mut ops = self.ops.lock().await;

        let message = match event {
            LifecycleEvent::Install => "Installing nvidia drivers...",
            LifecycleEvent::Remove => "Removing nvidia drivers...",
        };
        info!(event = %event, "{message}");
        self.set_status(UnitStatus::Maintenance(message.to_string()));

        let result = match event {
            LifecycleEvent::Install => ops.install().await.map(Some),
            LifecycleEvent::Remove => ops.remove().await.map(|()| None),
        };

        match result {
            Ok(version) => {
                if let Some(v) = &version {
                    self.set_workload_version(Some(v.clone()));
                    self.set_status(UnitStatus::Active("Ready".to_string()));
                } else {
                    self.set_workload_version(None);
                    self.set_status(UnitStatus::Active("Removed".to_string()));
                }
                EventOutcome::Completed(version)
            }
            Err(e) => {
                error!(event = %event, step = %e.step, error = %e, "Lifecycle event deferred");
                self.set_status(UnitStatus::Blocked(e.to_string()));
                EventOutcome::Deferred(e)
            }
        }
    }

    /// Handle `event`, redelivering it while it is deferred.
    ///
    /// Returns the outcome of the last attempt.
    pub async fn redrive(&self, event: LifecycleEvent, policy: RedrivePolicy) -> EventOutcome {
        let attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = self.handle(event).await;
            if outcome.is_completed() || attempt >= attempts {
                return outcome;
            }

            warn!(
                event = %event,
                attempt,
                max_attempts = attempts,
                backoff_secs = policy.backoff.as_secs(),
                "Redriving deferred event"
            );
            tokio::time::sleep(policy.backoff).await;
            attempt += 1;
        }
    }

    /// Installed driver version, queried through the single-flight lock.
    ///
    /// # Errors
    /// Returns the version-query failure.
    pub async fn version(&self) -> Result<String, DriverOpsError> {
        self.ops.lock().await.version().await
    }

    // Values are only ever replaced whole, so a poisoned lock still holds a
    // complete value.
    fn set_status(&self, status: UnitStatus) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn set_workload_version(&self, version: Option<String>) {
        *self
            .workload_version
            .write()
            .unwrap_or_else(PoisonError::into_inner) = version;
    }
}
