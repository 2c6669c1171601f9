//! System utilities for file ownership, identity lookup, and external commands.

use crate::{Error, Result};
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use wait_timeout::ChildExt;

/// Default bound on how long an external command may run.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Resolves user and group names to numeric ids.
///
/// Production code uses [`SystemIdentity`], which consults the host's
/// `passwd` and `group` databases. Tests substitute [`FixedIdentity`] so no
/// real system accounts are required.
pub trait IdentityResolver: Send + Sync {
    /// Resolve a user name to a uid.
    fn uid(&self, user: &str) -> std::result::Result<u32, String>;

    /// Resolve a group name to a gid.
    fn gid(&self, group: &str) -> std::result::Result<u32, String>;
}

/// Identity lookups backed by the host's account databases.
///
/// Names that are not found but parse as integers are taken as raw ids,
/// the same way `chown 1000:1000` behaves.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

#[cfg(unix)]
impl IdentityResolver for SystemIdentity {
    fn uid(&self, user: &str) -> std::result::Result<u32, String> {
        match nix::unistd::User::from_name(user) {
            Ok(Some(u)) => Ok(u.uid.as_raw()),
            Ok(None) => user
                .parse::<u32>()
                .map_err(|_| format!("unknown user '{}'", user)),
            Err(e) => Err(format!("failed to look up user '{}': {}", user, e)),
        }
    }

    fn gid(&self, group: &str) -> std::result::Result<u32, String> {
        match nix::unistd::Group::from_name(group) {
            Ok(Some(g)) => Ok(g.gid.as_raw()),
            Ok(None) => group
                .parse::<u32>()
                .map_err(|_| format!("unknown group '{}'", group)),
            Err(e) => Err(format!("failed to look up group '{}': {}", group, e)),
        }
    }
}

#[cfg(not(unix))]
impl IdentityResolver for SystemIdentity {
    fn uid(&self, user: &str) -> std::result::Result<u32, String> {
        Err(format!("cannot resolve user '{}': not a Unix host", user))
    }

    fn gid(&self, group: &str) -> std::result::Result<u32, String> {
        Err(format!("cannot resolve group '{}': not a Unix host", group))
    }
}

/// Identity lookups that map every name to the same fixed ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedIdentity {
    pub uid: u32,
    pub gid: u32,
}

impl FixedIdentity {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// Ids of the current process.
    #[cfg(unix)]
    pub fn current() -> Self {
        Self {
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        }
    }
}

impl IdentityResolver for FixedIdentity {
    fn uid(&self, _user: &str) -> std::result::Result<u32, String> {
        Ok(self.uid)
    }

    fn gid(&self, _group: &str) -> std::result::Result<u32, String> {
        Ok(self.gid)
    }
}

/// Access mode and owner a managed file must carry after every write.
#[derive(Clone)]
pub struct Ownership {
    pub mode: u32,
    pub user: String,
    pub group: String,
    identity: Arc<dyn IdentityResolver>,
}

impl std::fmt::Debug for Ownership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ownership")
            .field("mode", &format_args!("{:#o}", self.mode))
            .field("user", &self.user)
            .field("group", &self.group)
            .finish()
    }
}

impl Ownership {
    /// Create a policy resolved against the host's account databases.
    pub fn new(mode: u32, user: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            mode,
            user: user.into(),
            group: group.into(),
            identity: Arc::new(SystemIdentity),
        }
    }

    /// Use a different identity resolver for user/group lookups.
    pub fn with_identity(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = identity;
        self
    }

    /// Same owner and resolver, different mode.
    pub fn with_mode(&self, mode: u32) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }

    /// Get the identity resolver.
    pub fn identity(&self) -> &Arc<dyn IdentityResolver> {
        &self.identity
    }

    /// Force the mode and owner of `path` to this policy.
    ///
    /// User and group are resolved before anything is changed, so an unknown
    /// account leaves the file as it was.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Permission`] if the user or group cannot be resolved
    /// or the `chown` is refused, and [`Error::Io`] if the file cannot be
    /// reached at all.
    #[cfg(unix)]
    pub fn apply(&self, path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let uid = self.identity.uid(&self.user).map_err(|reason| Error::Permission {
            path: path.to_path_buf(),
            reason,
        })?;
        let gid = self.identity.gid(&self.group).map_err(|reason| Error::Permission {
            path: path.to_path_buf(),
            reason,
        })?;

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(self.mode))?;
        std::os::unix::fs::chown(path, Some(uid), Some(gid)).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => Error::Permission {
                path: path.to_path_buf(),
                reason: format!("cannot chown to {}:{}: {}", self.user, self.group, e),
            },
            _ => Error::Io(e),
        })?;

        debug!(
            "applied mode {:o} and owner {}:{} to {}",
            self.mode,
            self.user,
            self.group,
            path.display()
        );
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn apply(&self, path: &Path) -> Result<()> {
        Err(Error::Permission {
            path: path.to_path_buf(),
            reason: "file ownership is not supported on this platform".to_string(),
        })
    }
}

/// Replace `path` with `bytes` through a temporary file in the same
/// directory, so readers see either the old contents or the new ones.
///
/// The new file is created with mode `0600`; callers set the final mode.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Short host name of this machine (everything before the first `.`).
#[cfg(unix)]
pub fn hostname() -> Result<String> {
    let name = nix::unistd::gethostname()
        .map_err(|e| Error::Other(format!("Failed to get hostname: {}", e)))?;
    let name = name.to_string_lossy();
    Ok(name.split('.').next().unwrap_or_default().to_string())
}

#[cfg(not(unix))]
pub fn hostname() -> Result<String> {
    std::env::var("COMPUTERNAME").map_err(|e| Error::Other(format!("Failed to get hostname: {}", e)))
}

/// Captured result of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into [`Error::Command`].
    pub fn check(self, command: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        let code = self
            .code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        Err(Error::Command {
            command: command.to_string(),
            reason: format!("exit code {}: {}", code, self.stderr.trim()),
        })
    }
}

/// Runs external programs on behalf of the installation backends.
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` to completion and capture its output.
    ///
    /// A non-zero exit is not an error here; callers decide with
    /// [`CommandOutput::check`].
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Run and fail on a non-zero exit.
    fn call(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        self.run(program, args)?.check(&render_command(program, args))
    }
}

/// Render a command line for logs and error messages.
pub fn render_command(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs commands on the host with a bounded wait.
#[derive(Debug, Clone, Copy)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let rendered = render_command(program, args);
        debug!("running `{}`", rendered);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Command {
                command: rendered.clone(),
                reason: format!("failed to spawn: {}", e),
            })?;

        // Drain both pipes concurrently so a chatty child cannot block on a full pipe.
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Command {
                    command: rendered,
                    reason: format!("timed out after {}s", self.timeout.as_secs()),
                });
            }
        };

        Ok(CommandOutput {
            code: status.code(),
            stdout: join_reader(stdout),
            stderr: join_reader(stderr),
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: Option<std::thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
