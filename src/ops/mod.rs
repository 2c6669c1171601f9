//! Installation backends and per-daemon management.
//!
//! Slurm can be installed from Debian packages ([`AptManager`]) or from the
//! `slurm` snap ([`SnapManager`]). The backend decides how the daemon is
//! installed and where its configuration, state, and environment files
//! live. [`SlurmManager`] composes a backend with one [`Service`] and hands
//! out the config, secret, options, and service handles for that daemon.
//!
//! Every absolute path a backend uses is resolved under the
//! [`HostContext`] root, which is `/` in production and a temporary
//! directory in tests.

pub mod apt;
pub mod daemon;
pub mod exporter;
pub mod service;
pub mod snap;

pub use apt::AptManager;
pub use daemon::SlurmManager;
pub use exporter::PrometheusExporter;
pub use service::{ServiceManager, SnapServiceManager, SystemctlManager};
pub use snap::SnapManager;

use crate::env::EnvFile;
use crate::sys::{CommandRunner, IdentityResolver, Ownership, SystemIdentity, SystemRunner};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Mode of the state save directory and its parent.
pub const STATE_DIR_MODE: u32 = 0o755;

/// Name of the `StateSaveLocation` directory under the backend's state path.
pub const STATE_SAVE_DIR: &str = "checkpoint";

/// Available installation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// Debian packages installed with apt (default).
    #[default]
    Apt,
    /// The `slurm` snap.
    Snap,
}

impl BackendType {
    /// Parse a backend type from a string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "apt" | "deb" | "debian" => Some(Self::Apt),
            "snap" => Some(Self::Snap),
            _ => None,
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Snap => "snap",
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The Slurm daemons this crate manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Sackd,
    Slurmctld,
    Slurmd,
    Slurmdbd,
    Slurmrestd,
}

impl Service {
    pub const ALL: [Service; 5] = [
        Service::Sackd,
        Service::Slurmctld,
        Service::Slurmd,
        Service::Slurmdbd,
        Service::Slurmrestd,
    ];

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|svc| svc.name() == s.to_lowercase())
    }

    /// Daemon name, which is also its package and systemd unit name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sackd => "sackd",
            Self::Slurmctld => "slurmctld",
            Self::Slurmd => "slurmd",
            Self::Slurmdbd => "slurmdbd",
            Self::Slurmrestd => "slurmrestd",
        }
    }

    /// Environment variable holding the daemon's startup options,
    /// e.g. `SLURMD_OPTIONS`.
    pub fn options_var(&self) -> String {
        format!("{}_OPTIONS", self.name().to_uppercase())
    }

    /// User the daemon runs as and owns its files.
    pub fn user(&self) -> &'static str {
        match self {
            Self::Slurmd => "root",
            Self::Slurmrestd => "slurmrestd",
            Self::Sackd | Self::Slurmctld | Self::Slurmdbd => "slurm",
        }
    }

    /// Group the daemon runs as and owns its files.
    pub fn group(&self) -> &'static str {
        self.user()
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Host-wide settings shared by the backends: the filesystem root, how
/// external commands run, and how account names resolve.
#[derive(Clone)]
pub struct HostContext {
    root: PathBuf,
    runner: Arc<dyn CommandRunner>,
    identity: Arc<dyn IdentityResolver>,
    owner: Option<(String, String)>,
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("root", &self.root)
            .field("owner", &self.owner)
            .finish()
    }
}

impl HostContext {
    /// Context rooted at `root` using the host's commands and accounts.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            runner: Arc::new(SystemRunner::default()),
            identity: Arc::new(SystemIdentity),
            owner: None,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = identity;
        self
    }

    /// Own every managed file by `user:group` instead of the daemon's
    /// account.
    pub fn with_owner(mut self, user: impl Into<String>, group: impl Into<String>) -> Self {
        self.owner = Some((user.into(), group.into()));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    /// Map an absolute host path into the root.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    /// Ownership policy for a file owned by `user:group`, unless an owner
    /// override is set.
    pub fn ownership(&self, mode: u32, user: &str, group: &str) -> Ownership {
        let (user, group) = match &self.owner {
            Some((u, g)) => (u.as_str(), g.as_str()),
            None => (user, group),
        };
        Ownership::new(mode, user, group).with_identity(Arc::clone(&self.identity))
    }
}

impl Default for HostContext {
    fn default() -> Self {
        Self::new("/")
    }
}

/// Installation backend for Slurm.
pub trait OpsManager: Send + Sync {
    /// Get the backend type.
    fn backend_type(&self) -> BackendType;

    /// Install the daemon and apply host-level overrides.
    fn install(&self) -> Result<()>;

    /// Installed version.
    fn version(&self) -> Result<String>;

    /// Whether the daemon is installed.
    fn is_installed(&self) -> bool {
        self.version().is_ok()
    }

    /// Directory holding Slurm configuration and secrets.
    fn etc_path(&self) -> PathBuf;

    /// Directory holding Slurm state.
    fn var_lib_path(&self) -> PathBuf;

    /// Environment file read by the unit `unit` at start.
    fn env_file(&self, unit: &str) -> EnvFile;

    /// Environment file read by `service` at start.
    fn env_file_for(&self, service: Service) -> EnvFile {
        self.env_file(service.name())
    }

    /// Start/stop/query handle for the unit `unit`.
    fn service_manager_for(&self, unit: &str) -> Box<dyn ServiceManager>;
}

/// Create the backend `backend` for `service`.
pub fn ops_manager(
    backend: BackendType,
    service: Service,
    ctx: HostContext,
) -> Box<dyn OpsManager> {
    match backend {
        BackendType::Apt => Box::new(AptManager::new(service, ctx)),
        BackendType::Snap => Box::new(SnapManager::new(ctx)),
    }
}

/// Create `<var_lib>/checkpoint`, used as Slurm's `StateSaveLocation`.
pub(crate) fn create_state_save_location(ctx: &HostContext, var_lib: &Path) -> Result<()> {
    let target = var_lib.join(STATE_SAVE_DIR);
    std::fs::create_dir_all(&target)?;

    let ownership = ctx.ownership(STATE_DIR_MODE, "slurm", "slurm");
    ownership.apply(var_lib)?;
    ownership.apply(&target)?;
    debug!("created state save location {}", target.display());
    Ok(())
}

/// Write a host file outside the Slurm config directory, creating its
/// parent directories.
pub(crate) fn write_host_file(path: &Path, contents: &str, mode: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    set_mode(path, mode)?;
    debug!("wrote {}", path.display());
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(Error::Io)
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
