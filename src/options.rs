//! Marshal and parse `<SERVICE>_OPTIONS` environment variable values.
//!
//! Slurm daemons receive their startup flags through a single shell-quoted
//! string stored in the service environment file, for example:
//!
//! ```text
//! SLURMD_OPTIONS="-Z --conf 'RealMemory=60000 CPUs=16' --conf-server localhost:6817"
//! ```
//!
//! [`Options`] is the ordered, structured view of that string.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Value of one option flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// Presence-only flag such as `-Z`. `false` means "omit".
    Flag(bool),
    /// Flag followed by an argument such as `--conf-server host:6817`.
    Value(String),
}

impl OptionValue {
    /// Get the string argument, if this is a valued flag.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Value(s) => Some(s),
            OptionValue::Flag(_) => None,
        }
    }

    /// Whether the flag is set: `true` flags and any valued flag.
    pub fn is_set(&self) -> bool {
        !matches!(self, OptionValue::Flag(false))
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Flag(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Value(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Value(value)
    }
}

/// Ordered mapping from flag token to value.
///
/// Insertion order is preserved; inserting an existing flag replaces its
/// value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    entries: Vec<(String, OptionValue)>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, flag: &str) -> Option<&OptionValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == flag)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, flag: &str) -> bool {
        self.get(flag).is_some()
    }

    /// Insert or replace a flag. Returns the previous value.
    pub fn insert(
        &mut self,
        flag: impl Into<String>,
        value: impl Into<OptionValue>,
    ) -> Option<OptionValue> {
        let flag = flag.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == flag) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((flag, value));
                None
            }
        }
    }

    pub fn remove(&mut self, flag: &str) -> Option<OptionValue> {
        let idx = self.entries.iter().position(|(k, _)| k == flag)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<OptionValue>> FromIterator<(K, V)> for Options {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = Options::new();
        for (k, v) in iter {
            options.insert(k, v);
        }
        options
    }
}

/// Marshal options into a single shell-quoted string.
///
/// `true` flags are emitted alone, `false` flags are dropped, and valued
/// flags are emitted as `flag value`. Every token is quoted individually so
/// that [`parse`] reproduces the same mapping.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if a token contains a NUL byte, which no
/// shell can represent.
///
/// # Examples
///
/// ```
/// use slurm_ops::options::{marshal, Options, OptionValue};
///
/// let options: Options = [
///     ("-Z", OptionValue::from(true)),
///     ("--conf-server", OptionValue::from("ctl0")),
/// ]
/// .into_iter()
/// .collect();
/// assert_eq!(marshal(&options).unwrap(), "-Z --conf-server ctl0");
/// ```
pub fn marshal(options: &Options) -> Result<String> {
    let mut tokens: Vec<&str> = Vec::with_capacity(options.len() * 2);
    for (flag, value) in options.iter() {
        match value {
            OptionValue::Flag(true) => tokens.push(flag),
            OptionValue::Flag(false) => {}
            OptionValue::Value(v) => {
                tokens.push(flag);
                tokens.push(v);
            }
        }
    }

    shlex::try_join(tokens).map_err(|e| Error::InvalidInput(format!("cannot quote option: {}", e)))
}

/// Parse a shell-quoted option string.
///
/// A token starting with `-` is a flag. It takes the following token as its
/// value unless it is the last token or the next token is also a flag, in
/// which case it is recorded as `true`. Stray non-flag tokens are ignored.
///
/// # Errors
///
/// Returns [`Error::Format`] if the string has unbalanced quotes.
pub fn parse(input: &str) -> Result<Options> {
    let tokens = shlex::split(input).ok_or_else(|| Error::Format {
        path: std::path::PathBuf::new(),
        reason: format!("unbalanced quoting in options `{}`", input),
    })?;

    let mut options = Options::new();
    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        if !token.starts_with('-') {
            i += 1;
            continue;
        }
        match tokens.get(i + 1) {
            Some(next) if !next.starts_with('-') => {
                options.insert(token.as_str(), next.as_str());
                i += 2;
            }
            _ => {
                options.insert(token.as_str(), true);
                i += 1;
            }
        }
    }

    Ok(options)
}
