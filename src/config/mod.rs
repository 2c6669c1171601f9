//! Configuration file management.
//!
//! A [`ConfigFile`] owns one configuration file on disk: it loads and dumps
//! documents through an injected [`Editor`], and forces the file's mode and
//! owner after every write.
//!
//! ## Includes
//!
//! Every primary file `<name>` can have sibling fragments named
//! `<name>.<label>` (for example `slurm.conf.accounting`). Fragments let
//! independent callers each own one slice of the configuration. They are
//! discovered by listing the directory, never from a fixed list, and the
//! listing is redone on every call to [`ConfigFile::includes`]; nothing is
//! cached.
//!
//! ## Snapshots
//!
//! [`ConfigFile::save`] copies the primary and every include to
//! `<file>.snapshot`; [`ConfigFile::restore`] copies them back. Snapshot
//! files are never reported as includes.
//!
//! ## Merging
//!
//! Daemons whose configuration dialect has no native include directive
//! need one flat file. [`ConfigFile::merge`] folds every include, in
//! lexicographic order of file name, into the primary.
//!
//! None of these operations are transactional across files. A failure
//! halfway through `save`, `restore`, or `merge` leaves earlier files
//! updated.

pub mod editor;

pub use editor::{Editor, JsonEditor, KeyValueConfig, KeyValueEditor, TomlEditor};

use crate::sys::{self, Ownership};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Suffix of snapshot files.
pub const SNAPSHOT_SUFFIX: &str = ".snapshot";

/// One managed configuration file.
pub struct ConfigFile<E: Editor> {
    path: PathBuf,
    ownership: Ownership,
    editor: Arc<E>,
}

impl<E: Editor> Clone for ConfigFile<E> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            ownership: self.ownership.clone(),
            editor: Arc::clone(&self.editor),
        }
    }
}

impl<E: Editor> std::fmt::Debug for ConfigFile<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigFile")
            .field("path", &self.path)
            .field("ownership", &self.ownership)
            .finish()
    }
}

impl<E: Editor> ConfigFile<E> {
    /// Manage the file at `path`, written with `ownership`.
    pub fn new(path: impl Into<PathBuf>, editor: E, ownership: Ownership) -> Self {
        Self {
            path: path.into(),
            ownership,
            editor: Arc::new(editor),
        }
    }

    /// Another file sharing this one's editor and ownership policy.
    fn sibling(&self, path: PathBuf) -> Self {
        Self {
            path,
            ownership: self.ownership.clone(),
            editor: Arc::clone(&self.editor),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ownership(&self) -> &Ownership {
        &self.ownership
    }

    pub fn editor(&self) -> &E {
        &self.editor
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Parse the file.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the file does not exist, [`Error::Format`] if
    /// the editor cannot parse it.
    pub fn load(&self) -> Result<E::Document> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(self.path.clone()));
            }
            Err(e) => return Err(Error::Io(e)),
        };
        self.editor.load(&bytes).map_err(|reason| Error::Format {
            path: self.path.clone(),
            reason,
        })
    }

    /// Replace the entire file with `doc`.
    ///
    /// The document is serialized before the file is touched and the new
    /// contents are renamed into place, so a failed dump leaves the previous
    /// file intact. Mode and owner are forced afterwards on every call.
    ///
    /// This overwrites whatever the file held. Use [`ConfigFile::edit`] to
    /// change part of it.
    pub fn dump(&self, doc: &E::Document) -> Result<()> {
        let bytes = self.editor.dump(doc).map_err(|reason| Error::Serialize {
            path: self.path.clone(),
            reason,
        })?;

        sys::write_atomic(&self.path, &bytes)?;
        self.ownership.apply(&self.path)?;
        debug!("wrote {} bytes to {}", bytes.len(), self.path.display());
        Ok(())
    }

    /// Load, mutate, and dump the file in one step.
    ///
    /// A missing file starts as the editor's empty document. The file is
    /// written only if `f` returns `Ok`; an error (or panic) inside `f`
    /// leaves it untouched.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use slurm_ops::config::{ConfigFile, KeyValueEditor};
    /// use slurm_ops::sys::Ownership;
    ///
    /// let config = ConfigFile::new(
    ///     "/etc/slurm/slurmdbd.conf",
    ///     KeyValueEditor,
    ///     Ownership::new(0o600, "slurm", "slurm"),
    /// );
    /// config.edit(|doc| {
    ///     doc.set("DbdPort", "6819");
    ///     Ok(())
    /// })?;
    /// # Ok::<(), slurm_ops::Error>(())
    /// ```
    pub fn edit<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut E::Document) -> Result<R>,
    {
        let mut doc = match self.load() {
            Ok(doc) => doc,
            Err(Error::NotFound(_)) => Default::default(),
            Err(e) => return Err(e),
        };
        let value = f(&mut doc)?;
        self.dump(&doc)?;
        Ok(value)
    }

    /// Remove the file. Removing a file that does not exist is not an error.
    pub fn delete(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("deleted {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Handle to the include `name`, whether or not it exists yet.
    ///
    /// `name` is either the full file name (`slurm.conf.accounting`) or
    /// just the label (`accounting`). Nothing is created on disk until the
    /// handle is written.
    pub fn include(&self, name: &str) -> ConfigFile<E> {
        let base = self.file_name();
        let prefix = format!("{}.", base);
        let file_name = if name.starts_with(&prefix) {
            name.to_string()
        } else {
            format!("{}{}", prefix, name)
        };
        self.sibling(self.parent_dir().join(file_name))
    }

    /// Every include currently on disk, keyed by file name.
    pub fn includes(&self) -> Result<Includes<E>> {
        let prefix = format!("{}.", self.file_name());
        let files = self
            .list_siblings(|name| name.starts_with(&prefix) && !name.ends_with(SNAPSHOT_SUFFIX))?;
        Ok(Includes {
            primary: self.clone(),
            files,
        })
    }

    /// Every snapshot currently on disk for this file and its includes,
    /// keyed by snapshot file name.
    pub fn snapshots(&self) -> Result<Snapshots<E>> {
        let base = self.file_name();
        let own = format!("{}{}", base, SNAPSHOT_SUFFIX);
        let prefix = format!("{}.", base);
        let files = self.list_siblings(|name| {
            name == own || (name.starts_with(&prefix) && name.ends_with(SNAPSHOT_SUFFIX))
        })?;
        Ok(Snapshots { files })
    }

    /// Path of the snapshot for this file.
    pub fn snapshot_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(SNAPSHOT_SUFFIX);
        PathBuf::from(name)
    }

    /// Copy this file and every include to `<file>.snapshot`.
    ///
    /// Files that do not exist are skipped. Any other failure stops the
    /// loop, possibly after some snapshots were already written.
    pub fn save(&self) -> Result<()> {
        let includes = self.includes()?;
        for file in std::iter::once(self).chain(includes.iter().map(|(_, f)| f)) {
            let target = file.snapshot_path();
            match std::fs::copy(&file.path, &target) {
                Ok(_) => debug!("saved snapshot {}", target.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("skipping snapshot of missing {}", file.path.display());
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        info!("saved snapshot of {}", self.path.display());
        Ok(())
    }

    /// Copy every snapshot back over the file it was taken from.
    ///
    /// Restored files get this file's mode and owner re-applied. Without
    /// any snapshots this does nothing.
    pub fn restore(&self) -> Result<()> {
        for (_, snapshot) in self.snapshots()?.iter() {
            let Some(target) = snapshot
                .to_str()
                .and_then(|s| s.strip_suffix(SNAPSHOT_SUFFIX))
                .map(PathBuf::from)
            else {
                continue;
            };
            match std::fs::copy(snapshot, &target) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::Io(e)),
            }
            self.ownership.apply(&target)?;
            debug!("restored {} from snapshot", target.display());
        }
        info!("restored snapshot of {}", self.path.display());
        Ok(())
    }

    /// Fold every include into this file.
    ///
    /// Includes are applied in lexicographic order of file name, each one
    /// overriding fields set by the previous ones. The primary is not
    /// cleared first, so fields only it sets survive. All includes are
    /// parsed before the primary is written; a bad include leaves the
    /// primary untouched.
    pub fn merge(&self) -> Result<()> {
        let includes = self.includes()?;
        let overlays = includes
            .iter()
            .map(|(_, file)| file.load())
            .collect::<Result<Vec<_>>>()?;
        let count = overlays.len();

        self.edit(|doc| {
            for overlay in overlays {
                self.editor.update(doc, overlay);
            }
            Ok(())
        })?;
        info!("merged {} includes into {}", count, self.path.display());
        Ok(())
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    fn list_siblings<P>(&self, matches: P) -> Result<BTreeMap<String, ConfigFile<E>>>
    where
        P: Fn(&str) -> bool,
    {
        let mut files = BTreeMap::new();
        let entries = match std::fs::read_dir(self.parent_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(Error::Io(e)),
        };
        for entry in entries {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if matches(&name) && entry.path().is_file() {
                files.insert(name, self.sibling(entry.path()));
            }
        }
        Ok(files)
    }
}

/// Includes of one primary file, ordered by file name.
pub struct Includes<E: Editor> {
    primary: ConfigFile<E>,
    files: BTreeMap<String, ConfigFile<E>>,
}

impl<E: Editor> Includes<E> {
    /// Handle to include `name`. Absent includes still get a usable handle
    /// (see [`ConfigFile::include`]).
    pub fn get(&self, name: &str) -> ConfigFile<E> {
        match self.files.get(name) {
            Some(file) => file.clone(),
            None => self.primary.include(name),
        }
    }

    /// Whether include `name` existed when this listing was taken.
    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
            || self
                .files
                .contains_key(self.primary.include(name).file_name().as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigFile<E>)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Snapshot files of one primary file and its includes, ordered by name.
pub struct Snapshots<E: Editor> {
    files: BTreeMap<String, ConfigFile<E>>,
}

impl<E: Editor> Snapshots<E> {
    pub fn get(&self, name: &str) -> Option<&ConfigFile<E>> {
        self.files.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Snapshot names and paths.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.path()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
