//! Command implementations for the slurm-ops CLI.
//!
//! Each command builds its result struct from the library and returns it;
//! `main.rs` decides between JSON and human-readable output.

use crate::cli::{ConfigTarget, SecretName, ServiceCommands};
use crate::config::{ConfigFile, KeyValueEditor};
use crate::ops::{BackendType, HostContext, PrometheusExporter, Service, SlurmManager};
use crate::options::OptionValue;
use crate::secret::SecretFile;
use crate::{Error, Result};
use serde::Serialize;
use std::path::PathBuf;

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!(r#"{{"error": "{}"}}"#, e))
}

/// Settings every command needs to locate its daemon.
#[derive(Debug, Clone)]
pub struct Target {
    pub service: Option<String>,
    pub backend: String,
    pub root: PathBuf,
    pub owner: Option<String>,
}

/// Build the manager for the daemon named by `target`.
pub fn manager(target: &Target) -> Result<SlurmManager> {
    let service_name = target.service.as_deref().ok_or_else(|| {
        Error::InvalidInput("no service given; use --service or SLURM_OPS_SERVICE".to_string())
    })?;
    let service = Service::from_str(service_name)
        .ok_or_else(|| Error::InvalidInput(format!("unknown service '{}'", service_name)))?;
    let backend = BackendType::from_str(&target.backend)
        .ok_or_else(|| Error::InvalidInput(format!("unknown backend '{}'", target.backend)))?;

    let mut ctx = HostContext::new(&target.root);
    if let Some(owner) = &target.owner {
        let (user, group) = owner.split_once(':').ok_or_else(|| {
            Error::InvalidInput(format!("owner '{}' is not USER:GROUP", owner))
        })?;
        ctx = ctx.with_owner(user, group);
    }
    Ok(SlurmManager::new(service, backend, ctx))
}

// ==================== config ====================

fn config_primary(manager: &SlurmManager, target: &ConfigTarget) -> Result<ConfigFile<KeyValueEditor>> {
    match &target.file {
        Some(name) => manager.config_file(name),
        None => manager.config().ok_or_else(|| {
            Error::InvalidInput(format!(
                "{} has no configuration file; use --file",
                manager.service()
            ))
        }),
    }
}

/// Resolve the file a key/value command acts on: the primary, or one of
/// its includes.
fn config_file(manager: &SlurmManager, target: &ConfigTarget) -> Result<ConfigFile<KeyValueEditor>> {
    let primary = config_primary(manager, target)?;
    Ok(match &target.include {
        Some(label) => primary.include(label),
        None => primary,
    })
}

/// Resolve the primary for commands spanning the whole include set.
fn primary_only(
    manager: &SlurmManager,
    target: &ConfigTarget,
    command: &str,
) -> Result<ConfigFile<KeyValueEditor>> {
    if target.include.is_some() {
        return Err(Error::InvalidInput(format!(
            "--include cannot be used with `config {}`",
            command
        )));
    }
    config_primary(manager, target)
}

#[derive(Debug, Serialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct ConfigShow {
    pub path: PathBuf,
    pub exists: bool,
    pub entries: Vec<ConfigEntry>,
}

impl Output for ConfigShow {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if !self.exists {
            return format!("{} does not exist", self.path.display());
        }
        if self.entries.is_empty() {
            return format!("{} is empty", self.path.display());
        }
        self.entries
            .iter()
            .map(|e| format!("{}={}", e.key, e.value))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Show every key of the target file. A missing file shows as empty.
pub fn config_show(manager: &SlurmManager, target: &ConfigTarget) -> Result<ConfigShow> {
    let file = config_file(manager, target)?;
    let (exists, entries) = match file.load() {
        Ok(doc) => (
            true,
            doc.iter()
                .map(|(k, v)| ConfigEntry {
                    key: k.to_string(),
                    value: v.to_string(),
                })
                .collect(),
        ),
        Err(Error::NotFound(_)) => (false, Vec::new()),
        Err(e) => return Err(e),
    };
    Ok(ConfigShow {
        path: file.path().to_path_buf(),
        exists,
        entries,
    })
}

#[derive(Debug, Serialize)]
pub struct ConfigValue {
    pub path: PathBuf,
    pub key: String,
    pub value: Option<String>,
}

impl Output for ConfigValue {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match &self.value {
            Some(v) => v.clone(),
            None => format!("{} is not set", self.key),
        }
    }
}

pub fn config_get(manager: &SlurmManager, target: &ConfigTarget, key: &str) -> Result<ConfigValue> {
    let file = config_file(manager, target)?;
    let doc = file.load()?;
    Ok(ConfigValue {
        path: file.path().to_path_buf(),
        key: key.to_string(),
        value: doc.get(key).map(str::to_string),
    })
}

#[derive(Debug, Serialize)]
pub struct ConfigChanged {
    pub path: PathBuf,
    pub key: String,
    pub previous: Option<String>,
    pub value: Option<String>,
}

impl Output for ConfigChanged {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match &self.value {
            Some(v) => format!("Set {}={} in {}", self.key, v, self.path.display()),
            None => format!("Unset {} in {}", self.key, self.path.display()),
        }
    }
}

/// Set `key` in the target file. Repeatable records such as `NodeName`
/// are appended instead of replacing the existing lines.
pub fn config_set_value(
    manager: &SlurmManager,
    target: &ConfigTarget,
    key: &str,
    value: &str,
) -> Result<ConfigChanged> {
    let file = config_file(manager, target)?;
    let previous = file.edit(|doc| {
        let previous = doc.get(key).map(str::to_string);
        doc.insert(key, value);
        Ok(previous)
    })?;
    Ok(ConfigChanged {
        path: file.path().to_path_buf(),
        key: key.to_string(),
        previous,
        value: Some(value.to_string()),
    })
}

pub fn config_unset(manager: &SlurmManager, target: &ConfigTarget, key: &str) -> Result<ConfigChanged> {
    let file = config_file(manager, target)?;
    let previous = file.edit(|doc| Ok(doc.remove(key)))?;
    Ok(ConfigChanged {
        path: file.path().to_path_buf(),
        key: key.to_string(),
        previous,
        value: None,
    })
}

#[derive(Debug, Serialize)]
pub struct FileList {
    pub path: PathBuf,
    pub files: Vec<String>,
}

impl Output for FileList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.files.is_empty() {
            return format!("No files found for {}", self.path.display());
        }
        self.files.join("\n")
    }
}

pub fn config_includes(manager: &SlurmManager, target: &ConfigTarget) -> Result<FileList> {
    let primary = primary_only(manager, target, "includes")?;
    let files = primary.includes()?.names().map(str::to_string).collect();
    Ok(FileList {
        path: primary.path().to_path_buf(),
        files,
    })
}

pub fn config_snapshots(manager: &SlurmManager, target: &ConfigTarget) -> Result<FileList> {
    let primary = primary_only(manager, target, "snapshots")?;
    let files = primary.snapshots()?.names().map(str::to_string).collect();
    Ok(FileList {
        path: primary.path().to_path_buf(),
        files,
    })
}

#[derive(Debug, Serialize)]
pub struct ConfigAction {
    pub action: &'static str,
    pub path: PathBuf,
}

impl Output for ConfigAction {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let verb = match self.action {
            "save" => "Saved snapshot of",
            "restore" => "Restored snapshot of",
            "merge" => "Merged includes into",
            "delete" => "Deleted",
            other => other,
        };
        format!("{} {}", verb, self.path.display())
    }
}

pub fn config_delete(manager: &SlurmManager, target: &ConfigTarget) -> Result<ConfigAction> {
    let file = config_file(manager, target)?;
    file.delete()?;
    Ok(ConfigAction {
        action: "delete",
        path: file.path().to_path_buf(),
    })
}

pub fn config_save(manager: &SlurmManager, target: &ConfigTarget) -> Result<ConfigAction> {
    let primary = primary_only(manager, target, "save")?;
    primary.save()?;
    Ok(ConfigAction {
        action: "save",
        path: primary.path().to_path_buf(),
    })
}

pub fn config_restore(manager: &SlurmManager, target: &ConfigTarget) -> Result<ConfigAction> {
    let primary = primary_only(manager, target, "restore")?;
    primary.restore()?;
    Ok(ConfigAction {
        action: "restore",
        path: primary.path().to_path_buf(),
    })
}

pub fn config_merge(manager: &SlurmManager, target: &ConfigTarget) -> Result<ConfigAction> {
    let primary = primary_only(manager, target, "merge")?;
    primary.merge()?;
    Ok(ConfigAction {
        action: "merge",
        path: primary.path().to_path_buf(),
    })
}

// ==================== options ====================

#[derive(Debug, Serialize)]
pub struct OptionEntry {
    pub flag: String,
    pub value: OptionValue,
}

#[derive(Debug, Serialize)]
pub struct OptionsShow {
    pub service: String,
    pub variable: String,
    pub path: PathBuf,
    pub options: Vec<OptionEntry>,
}

impl Output for OptionsShow {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.options.is_empty() {
            return format!("{} is empty", self.variable);
        }
        self.options
            .iter()
            .map(|o| match &o.value {
                OptionValue::Flag(set) => format!("{} ({})", o.flag, set),
                OptionValue::Value(v) => format!("{} {}", o.flag, v),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn options_show(manager: &SlurmManager) -> Result<OptionsShow> {
    let options = manager
        .options()?
        .iter()
        .map(|(flag, value)| OptionEntry {
            flag: flag.to_string(),
            value: value.clone(),
        })
        .collect();
    Ok(OptionsShow {
        service: manager.service().to_string(),
        variable: manager.service().options_var(),
        path: manager.env_file().path().to_path_buf(),
        options,
    })
}

/// Set `flag`. Without a value the flag becomes a bare switch.
pub fn options_set(manager: &SlurmManager, flag: &str, value: Option<String>) -> Result<OptionsShow> {
    if !flag.starts_with('-') {
        return Err(Error::InvalidInput(format!(
            "option '{}' must start with '-'",
            flag
        )));
    }
    manager.edit_options(|opts| {
        match value {
            Some(v) => opts.insert(flag, v),
            None => opts.insert(flag, true),
        };
        Ok(())
    })?;
    options_show(manager)
}

pub fn options_unset(manager: &SlurmManager, flag: &str) -> Result<OptionsShow> {
    manager.edit_options(|opts| {
        opts.remove(flag);
        Ok(())
    })?;
    options_show(manager)
}

// ==================== secret ====================

fn secret_file(manager: &SlurmManager, name: SecretName) -> SecretFile {
    match name {
        SecretName::Key => manager.key(),
        SecretName::Jwt => manager.jwt(),
    }
}

fn secret_label(name: SecretName) -> &'static str {
    match name {
        SecretName::Key => "key",
        SecretName::Jwt => "jwt",
    }
}

#[derive(Debug, Serialize)]
pub struct SecretInfo {
    pub name: &'static str,
    pub path: PathBuf,
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Output for SecretInfo {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match &self.value {
            Some(v) => v.trim_end().to_string(),
            None => format!("{} {} (sha256:{})", self.name, self.path.display(), self.fingerprint),
        }
    }
}

fn secret_info(file: &SecretFile, name: SecretName, value: Option<String>) -> Result<SecretInfo> {
    Ok(SecretInfo {
        name: secret_label(name),
        path: file.path().to_path_buf(),
        fingerprint: file.fingerprint()?,
        value,
    })
}

/// Generate a new secret. Only the fingerprint is reported.
pub fn secret_generate(manager: &SlurmManager, name: SecretName) -> Result<SecretInfo> {
    let file = secret_file(manager, name);
    file.generate()?;
    secret_info(&file, name, None)
}

pub fn secret_get(manager: &SlurmManager, name: SecretName) -> Result<SecretInfo> {
    let file = secret_file(manager, name);
    let value = file.get()?;
    secret_info(&file, name, Some(value))
}

pub fn secret_set(manager: &SlurmManager, name: SecretName, value: &str) -> Result<SecretInfo> {
    let file = secret_file(manager, name);
    file.set(value)?;
    secret_info(&file, name, None)
}

pub fn secret_fingerprint(manager: &SlurmManager, name: SecretName) -> Result<SecretInfo> {
    let file = secret_file(manager, name);
    secret_info(&file, name, None)
}

// ==================== service ====================

#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub unit: String,
    pub action: &'static str,
    pub active: Option<bool>,
}

impl Output for ServiceStatus {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match self.active {
            Some(true) => format!("{} is active", self.unit),
            Some(false) => format!("{} is inactive", self.unit),
            None => format!("{}: {}", self.unit, self.action),
        }
    }
}

pub fn service(manager: &SlurmManager, command: ServiceCommands) -> Result<ServiceStatus> {
    let service = manager.service_manager();
    let action = match command {
        ServiceCommands::Start => {
            service.start()?;
            "start"
        }
        ServiceCommands::Stop => {
            service.stop()?;
            "stop"
        }
        ServiceCommands::Restart => {
            service.restart()?;
            "restart"
        }
        ServiceCommands::Enable => {
            service.enable()?;
            "enable"
        }
        ServiceCommands::Disable => {
            service.disable()?;
            "disable"
        }
        ServiceCommands::Status => {
            return Ok(ServiceStatus {
                unit: service.unit().to_string(),
                action: "status",
                active: Some(service.is_active()?),
            });
        }
    };
    Ok(ServiceStatus {
        unit: service.unit().to_string(),
        action,
        active: None,
    })
}

// ==================== exporter ====================

#[derive(Debug, Serialize)]
pub struct ExporterArgs {
    pub path: PathBuf,
    pub args: Vec<String>,
}

impl Output for ExporterArgs {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        shlex::try_join(self.args.iter().map(String::as_str)).unwrap_or_else(|_| self.args.join(" "))
    }
}

fn exporter_args(exporter: &PrometheusExporter) -> Result<ExporterArgs> {
    Ok(ExporterArgs {
        path: exporter.env_file().path().to_path_buf(),
        args: exporter.args()?,
    })
}

pub fn exporter_show(manager: &SlurmManager) -> Result<ExporterArgs> {
    exporter_args(&manager.exporter())
}

pub fn exporter_set(manager: &SlurmManager, args: &[String]) -> Result<ExporterArgs> {
    let exporter = manager.exporter();
    exporter.set_args(args)?;
    exporter_args(&exporter)
}

pub fn exporter_unset(manager: &SlurmManager) -> Result<ExporterArgs> {
    let exporter = manager.exporter();
    exporter.clear_args()?;
    exporter_args(&exporter)
}

// ==================== lifecycle ====================

#[derive(Debug, Serialize)]
pub struct VersionInfo {
    pub service: String,
    pub backend: String,
    pub installed: bool,
    pub version: Option<String>,
}

impl Output for VersionInfo {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match &self.version {
            Some(v) => format!("{} {} ({})", self.service, v, self.backend),
            None => format!("{} is not installed ({})", self.service, self.backend),
        }
    }
}

pub fn version(manager: &SlurmManager) -> Result<VersionInfo> {
    let version = manager.version().ok();
    Ok(VersionInfo {
        service: manager.service().to_string(),
        backend: manager.backend_type().to_string(),
        installed: version.is_some(),
        version,
    })
}

pub fn install(manager: &SlurmManager) -> Result<VersionInfo> {
    manager.install()?;
    version(manager)
}
