//! Package manager adapters.
//!
//! This module contains the [`PackageManager`] trait and one implementation
//! per supported OS family. Use [`for_family`] to pick the adapter for a
//! host.

pub mod apt;
pub mod traits;
pub mod yum;

use std::sync::Arc;

pub use apt::Apt;
pub use traits::{
    InstallStep, PackageManager, RemoveStep, DEFAULT_INSTALL_SEQUENCE, REMOVE_SEQUENCE,
};
pub use yum::Yum;

use crate::exec::CommandRunner;
use crate::host::OsFamily;

/// Build the adapter for `family`.
#[must_use]
pub fn for_family(family: OsFamily, runner: Arc<dyn CommandRunner>) -> Box<dyn PackageManager> {
    match family {
        OsFamily::Debian => Box::new(Apt::new(runner)),
        OsFamily::Rhel => Box::new(Yum::new(runner)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::SystemRunner;

    #[test]
    fn test_for_family() {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        assert_eq!(
            for_family(OsFamily::Debian, runner.clone()).family(),
            OsFamily::Debian
        );
        assert_eq!(for_family(OsFamily::Rhel, runner).family(), OsFamily::Rhel);
    }
}
