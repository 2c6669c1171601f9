//! Common test utilities for slurm-ops integration tests.
//!
//! Provides `TestEnv`, a fake host filesystem in a temporary directory,
//! so the binary never touches the real `/etc/slurm`.

#![allow(dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

/// A test environment with an isolated filesystem root.
///
/// The `slurm_ops()` method returns a `Command` that sets `SLURM_OPS_ROOT`
/// per-invocation, making tests parallel-safe. Managed files are owned by
/// the ids of the user running the tests, so no real `slurm` account or
/// root privileges are needed.
pub struct TestEnv {
    pub root: TempDir,
}

impl TestEnv {
    /// Create a new test environment with the apt directory layout.
    pub fn new() -> Self {
        let env = Self {
            root: TempDir::new().unwrap(),
        };
        std::fs::create_dir_all(env.etc()).unwrap();
        std::fs::create_dir_all(env.join("etc/default")).unwrap();
        env
    }

    /// Get a Command for the slurm-ops binary rooted in the temp directory.
    pub fn slurm_ops(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_slurm-ops"));
        cmd.env("SLURM_OPS_ROOT", self.root.path());
        cmd.env("SLURM_OPS_OWNER", self.owner());
        cmd.env_remove("SLURM_OPS_SERVICE");
        cmd.env_remove("SLURM_OPS_BACKEND");
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// Get the path to the fake host root.
    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Join a relative path onto the fake host root.
    pub fn join(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }

    /// The apt configuration directory.
    pub fn etc(&self) -> PathBuf {
        self.join("etc/slurm")
    }

    /// `uid:gid` of the user running the tests.
    #[cfg(unix)]
    pub fn owner(&self) -> String {
        use std::os::unix::fs::MetadataExt;
        let meta = std::fs::metadata(self.root.path()).unwrap();
        format!("{}:{}", meta.uid(), meta.gid())
    }

    #[cfg(not(unix))]
    pub fn owner(&self) -> String {
        "0:0".to_string()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse JSON output from a command.
pub fn parse_json(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).expect("Failed to parse JSON output")
}
