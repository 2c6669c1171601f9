//! Service environment files (`/etc/default/<service>` and friends).
//!
//! Files are read the way systemd's `EnvironmentFile=` reads them: one
//! `KEY=value` per line, `#` and `;` comments, blank lines ignored. A value
//! is unquoted only when the whole value is one quoted word, and `$VAR`
//! is never expanded. Unquoted values keep their inner spaces.
//!
//! Writing always emits double-quoted values with `\`, `"`, and `$`
//! escaped, so values read back exactly as written.

use crate::sys;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Permissions for a newly created environment file.
pub const ENV_FILE_MODE: u32 = 0o644;

/// Handle to one environment file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvFile {
    path: PathBuf,
}

impl EnvFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every assignment in file order. A missing file reads as empty.
    pub fn load(&self) -> Result<Vec<(String, String)>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Err(Error::Format {
                    path: self.path.clone(),
                    reason: "file is not valid UTF-8".to_string(),
                });
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let mut entries = Vec::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!("{}:{}: ignoring line without '='", self.path.display(), n + 1);
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                warn!("{}:{}: ignoring assignment without a name", self.path.display(), n + 1);
                continue;
            }
            entries.push((key.to_string(), unquote(value.trim())));
        }
        Ok(entries)
    }

    /// Get the value of `key`, if present.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .load()?
            .into_iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v))
    }

    /// Set one or more variables, keeping the position of existing ones.
    pub fn set<I, K, V>(&self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut entries = self.load()?;
        for (key, value) in vars {
            let key = key.into();
            let value = value.into();
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some((_, slot)) => *slot = value,
                None => entries.push((key, value)),
            }
        }
        self.write(&entries)
    }

    /// Remove `key`. Removing an absent key is not an error.
    pub fn unset(&self, key: &str) -> Result<()> {
        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|(k, _)| k != key);
        if entries.len() == before {
            return Ok(());
        }
        self.write(&entries)
    }

    /// Create the file empty if it does not already exist.
    #[cfg(unix)]
    pub fn touch(&self) -> Result<()> {
        use std::os::unix::fs::OpenOptionsExt;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .mode(ENV_FILE_MODE)
            .open(&self.path)?;
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn touch(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        Ok(())
    }

    fn write(&self, entries: &[(String, String)]) -> Result<()> {
        let content: String = entries
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"\n", k, escape(v)))
            .collect();
        let mode = match std::fs::metadata(&self.path) {
            Ok(meta) => permissions_of(&meta),
            Err(_) => ENV_FILE_MODE,
        };
        sys::write_atomic(&self.path, content.as_bytes())?;
        set_permissions(&self.path, mode)?;
        debug!("wrote {} variables to {}", entries.len(), self.path.display());
        Ok(())
    }
}

/// Strip one level of quoting from a value that is a single quoted word.
/// Anything else, including a partly quoted value, is returned verbatim.
fn unquote(value: &str) -> String {
    let fully_quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if fully_quoted {
        if let Some(mut words) = shlex::split(value) {
            if words.len() == 1 {
                return words.remove(0);
            }
        }
    }
    value.to_string()
}

#[cfg(unix)]
fn permissions_of(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permissions_of(_meta: &std::fs::Metadata) -> u32 {
    ENV_FILE_MODE
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
