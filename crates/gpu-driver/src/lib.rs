//! GPU kernel driver provisioning.
//!
//! This crate installs, removes and reports the vendor's proprietary GPU
//! driver on a host, using the host's own package manager.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     LifecycleController                      │
//! │        single-flight lock • unit status • redrive            │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          DriverOps                           │
//! │            install() • remove() • version()                  │
//! ├────────────────┬─────────────────────┬───────────────────────┤
//! │   HostProbe    │     Registrar       │    PackageManager     │
//! │ os-release     │ GET repo/keyring    │  Apt  (Debian family) │
//! │ uname -m / -r  │ write / delete file │  Yum  (RHEL family)   │
//! └────────────────┴─────────────────────┴───────────────────────┘
//! ```
//!
//! Every step returns a classified [`DriverError`]; the first failure
//! aborts the operation and is reported as a [`DriverOpsError`] naming the
//! step. Nothing is rolled back, and every step is safe to run again.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use gpu_driver::{DriverConfig, DriverOps, DriverSpec, OsFamily, SystemRunner};
//!
//! let config = DriverConfig::default();
//! let spec = DriverSpec::from_config(&config, OsFamily::Rhel);
//! let mut ops = DriverOps::new(spec, config, Arc::new(SystemRunner))?;
//!
//! let version = ops.install().await?;
//! println!("installed {version}");
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod exec;
pub mod host;
pub mod orchestrator;
pub mod package;
pub mod repository;

pub use config::{ConfigError, DriverConfig};
pub use controller::{EventOutcome, LifecycleController, LifecycleEvent, RedrivePolicy, UnitStatus};
pub use error::{DriverError, DriverOpsError, ErrorKind, Step, StepOutcome};
pub use exec::{Cmd, CommandOutput, CommandRunner, SystemRunner};
pub use host::{HostProbe, HostProfile, OsFamily};
pub use orchestrator::{DriverOps, DriverSpec, Phase};
pub use package::{InstallStep, PackageManager, RemoveStep};
pub use repository::{ContentKind, Registrar, RepositoryDescriptor};
