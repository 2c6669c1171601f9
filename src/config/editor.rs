//! Format-specific parse/serialize capability injected into [`ConfigFile`].
//!
//! [`ConfigFile`] never interprets configuration contents. An [`Editor`]
//! turns bytes into a document, a document back into bytes, and knows how
//! to lay one document over another for [`ConfigFile::merge`].
//!
//! [`ConfigFile`]: super::ConfigFile
//! [`ConfigFile::merge`]: super::ConfigFile::merge

use serde::{Deserialize, Serialize};

/// Parse/serialize/update capability for one configuration dialect.
pub trait Editor: Send + Sync {
    /// Structured form of a configuration file. `Default` is the empty document.
    type Document: Default;

    /// Parse raw file contents.
    fn load(&self, bytes: &[u8]) -> Result<Self::Document, String>;

    /// Serialize a document into raw file contents.
    fn dump(&self, doc: &Self::Document) -> Result<Vec<u8>, String>;

    /// Apply `overlay` on top of `base`. Fields in `overlay` win.
    fn update(&self, base: &mut Self::Document, overlay: Self::Document);
}

fn utf8(bytes: &[u8]) -> Result<&str, String> {
    std::str::from_utf8(bytes).map_err(|e| format!("invalid UTF-8: {}", e))
}

/// Keys that introduce one record per line and may repeat, such as the
/// node and partition definitions of `slurm.conf` or the device lines of
/// `gres.conf`.
pub const REPEATABLE_KEYS: &[&str] = &[
    "DownNodes",
    "FrontendName",
    "Name",
    "NodeName",
    "NodeSet",
    "PartitionName",
    "SwitchName",
];

/// Whether `key` may appear on more than one line.
pub fn is_repeatable(key: &str) -> bool {
    REPEATABLE_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

/// `Key=Value` configuration such as `slurm.conf` or `slurmdbd.conf`.
///
/// Lines are kept in file order, repeats included. Keys compare
/// case-insensitively, as Slurm does, and the last occurrence of a key is
/// its effective value. Records keyed by one of [`REPEATABLE_KEYS`] are
/// read with [`KeyValueConfig::get_all`] and added with
/// [`KeyValueConfig::add`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueConfig {
    entries: Vec<(String, String)>,
}

impl KeyValueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective value of `key`: its last occurrence.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of `key`, in file order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Set `key` to a single value. The first occurrence is updated in
    /// place and any later ones are dropped.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        let Some(first) = self
            .entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(&key))
        else {
            self.entries.push((key, value));
            return;
        };
        self.entries[first].1 = value;
        let mut idx = 0;
        self.entries.retain(|(k, _)| {
            let keep = idx <= first || !k.eq_ignore_ascii_case(&key);
            idx += 1;
            keep
        });
    }

    /// Append one more `key` line, unless the exact same line is present.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if !self
            .entries
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case(&key) && *v == value)
        {
            self.entries.push((key, value));
        }
    }

    /// Add repeatable keys, set the others.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if is_repeatable(&key) {
            self.add(key, value);
        } else {
            self.set(key, value);
        }
    }

    /// Remove every occurrence of `key`, returning its effective value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let previous = self.get(key).map(str::to_string);
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
        previous
    }

    /// Every line, in file order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for KeyValueConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut config = KeyValueConfig::new();
        for (k, v) in iter {
            config.insert(k, v);
        }
        config
    }
}

/// Editor for [`KeyValueConfig`] documents.
///
/// Loading keeps every line, so a dump writes back each record the file
/// held. Updating sets ordinary keys and appends repeatable records that
/// the base does not already contain.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValueEditor;

impl Editor for KeyValueEditor {
    type Document = KeyValueConfig;

    fn load(&self, bytes: &[u8]) -> Result<KeyValueConfig, String> {
        let mut config = KeyValueConfig::new();
        for (n, line) in utf8(bytes)?.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| format!("line {}: expected `Key=Value`, got `{}`", n + 1, line))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("line {}: empty key", n + 1));
            }
            config
                .entries
                .push((key.to_string(), value.trim().to_string()));
        }
        Ok(config)
    }

    fn dump(&self, doc: &KeyValueConfig) -> Result<Vec<u8>, String> {
        let mut out = String::new();
        for (key, value) in doc.iter() {
            if value.contains('\n') {
                return Err(format!("value for `{}` contains a newline", key));
            }
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        Ok(out.into_bytes())
    }

    fn update(&self, base: &mut KeyValueConfig, overlay: KeyValueConfig) {
        for (key, value) in overlay.entries {
            base.insert(key, value);
        }
    }
}

/// Editor for TOML documents. Update replaces top-level keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlEditor;

impl Editor for TomlEditor {
    type Document = toml::Table;

    fn load(&self, bytes: &[u8]) -> Result<toml::Table, String> {
        utf8(bytes)?.parse::<toml::Table>().map_err(|e| e.to_string())
    }

    fn dump(&self, doc: &toml::Table) -> Result<Vec<u8>, String> {
        toml::to_string(doc)
            .map(String::into_bytes)
            .map_err(|e| e.to_string())
    }

    fn update(&self, base: &mut toml::Table, overlay: toml::Table) {
        for (key, value) in overlay {
            base.insert(key, value);
        }
    }
}

/// Editor for JSON object documents. Update replaces top-level keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEditor;

impl Editor for JsonEditor {
    type Document = serde_json::Map<String, serde_json::Value>;

    fn load(&self, bytes: &[u8]) -> Result<Self::Document, String> {
        let text = utf8(bytes)?;
        if text.trim().is_empty() {
            return Ok(Self::Document::new());
        }
        serde_json::from_str(text).map_err(|e| e.to_string())
    }

    fn dump(&self, doc: &Self::Document) -> Result<Vec<u8>, String> {
        let mut bytes = serde_json::to_vec_pretty(doc).map_err(|e| e.to_string())?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    fn update(&self, base: &mut Self::Document, overlay: Self::Document) {
        for (key, value) in overlay {
            base.insert(key, value);
        }
    }
}
