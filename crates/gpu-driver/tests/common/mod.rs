//! Shared fixtures for driver lifecycle tests.

#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gpu_driver::{Cmd, CommandOutput, CommandRunner, DriverConfig};
use tempfile::TempDir;

pub const UBUNTU_OS_RELEASE: &str = r#"NAME="Ubuntu"
VERSION="22.04.3 LTS (Jammy Jellyfish)"
ID=ubuntu
ID_LIKE=debian
VERSION_ID="22.04"
"#;

pub const CENTOS_OS_RELEASE: &str = r#"NAME="CentOS Linux"
VERSION="7 (Core)"
ID="centos"
ID_LIKE="rhel fedora"
VERSION_ID="7"
"#;

pub const APT_POLICY_INSTALLED: &str = "cuda-drivers:
  Installed: 535.129.03
  Candidate: 545.23.08-1
  Version table:
";

// =============================================================================
// Scripted host
// =============================================================================

/// One command the fake host received.
#[derive(Debug, Clone)]
pub struct Call {
    /// Command line as displayed (`program arg arg`).
    pub line: String,
    /// Whether the watched path existed when the command ran.
    pub watched_present: bool,
    /// Arguments that named existing files when the command ran.
    pub existing_files: Vec<PathBuf>,
}

/// In-memory [`CommandRunner`] that records every invocation.
///
/// `uname -m` and `uname -r` answer from the configured profile. Any other
/// command succeeds with empty output unless a rule matches its prefix; the
/// most recently added matching rule wins.
pub struct FakeHost {
    arch: String,
    kernel_release: String,
    rules: Mutex<Vec<(String, CommandOutput)>>,
    delays: Mutex<Vec<(String, Duration)>>,
    calls: Mutex<Vec<Call>>,
    watched: Mutex<Option<PathBuf>>,
}

impl FakeHost {
    pub fn new(kernel_release: &str) -> Arc<Self> {
        Arc::new(Self {
            arch: "x86_64".to_string(),
            kernel_release: kernel_release.to_string(),
            rules: Mutex::new(Vec::new()),
            delays: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            watched: Mutex::new(None),
        })
    }

    /// Answer commands starting with `prefix` with `output`.
    pub fn respond(&self, prefix: &str, output: CommandOutput) {
        self.rules
            .lock()
            .unwrap()
            .push((prefix.to_string(), output));
    }

    /// Fail commands starting with `prefix` with exit code `code`.
    pub fn fail(&self, prefix: &str, code: i32) {
        let mut output = CommandOutput::with_code(code);
        output.stderr = format!("scripted failure for {prefix}");
        self.respond(prefix, output);
    }

    /// Make commands starting with `prefix` take `delay` before answering.
    pub fn stall(&self, prefix: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .push((prefix.to_string(), delay));
    }

    /// Record, for every later call, whether `path` exists.
    pub fn watch(&self, path: &Path) {
        *self.watched.lock().unwrap() = Some(path.to_path_buf());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Command lines, excluding host probes.
    pub fn lines(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|c| c.line)
            .filter(|l| !l.starts_with("uname"))
            .collect()
    }

    /// Index of the first recorded command starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.lines().iter().position(|l| l.starts_with(prefix))
    }

    pub fn call(&self, prefix: &str) -> Option<Call> {
        self.calls().into_iter().find(|c| c.line.starts_with(prefix))
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl CommandRunner for FakeHost {
    async fn run(&self, cmd: &Cmd) -> io::Result<CommandOutput> {
        let line = cmd.to_string();
        let watched_present = self
            .watched
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|p| p.exists());
        let existing_files = cmd
            .args
            .iter()
            .map(PathBuf::from)
            .filter(|p| p.is_absolute() && p.is_file())
            .collect();

        self.calls.lock().unwrap().push(Call {
            line: line.clone(),
            watched_present,
            existing_files,
        });

        let delay = self
            .delays
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone());
        if let Some(output) = scripted {
            return Ok(output);
        }

        Ok(match line.as_str() {
            "uname -m" => CommandOutput::ok(format!("{}\n", self.arch)),
            "uname -r" => CommandOutput::ok(format!("{}\n", self.kernel_release)),
            _ => CommandOutput::ok(""),
        })
    }
}

// =============================================================================
// Host filesystem
// =============================================================================

/// Temporary stand-in for `/etc`: os-release plus repository directories.
pub struct HostDirs {
    pub root: TempDir,
}

impl HostDirs {
    pub fn new(os_release: &str) -> Self {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("os-release"), os_release).unwrap();
        Self { root }
    }

    pub fn yum_repos_dir(&self) -> PathBuf {
        self.root.path().join("yum.repos.d")
    }

    pub fn apt_sources_dir(&self) -> PathBuf {
        self.root.path().join("sources.list.d")
    }

    /// Config pointing every host path into the temp dir and the
    /// repository at `repo_base_url`.
    pub fn config(&self, repo_base_url: &str) -> DriverConfig {
        DriverConfig {
            repo_base_url: repo_base_url.to_string(),
            yum_repos_dir: self.yum_repos_dir(),
            apt_sources_dir: self.apt_sources_dir(),
            os_release_path: self.root.path().join("os-release"),
            http_timeout_secs: 5,
            ..DriverConfig::default()
        }
    }
}
