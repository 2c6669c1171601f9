//! CLI argument definitions for slurm-ops.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// slurm-ops - Manage Slurm daemons and their configuration on a single host.
///
/// Every command acts on one daemon (`--service`). Files are located by the
/// installation backend (`--backend`) under the filesystem root (`--root`).
#[derive(Parser, Debug)]
#[command(name = "slurm-ops")]
#[command(author, version, about = "Manage Slurm daemons and their configuration", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Daemon to act on (sackd, slurmctld, slurmd, slurmdbd, slurmrestd).
    /// Can also be set via SLURM_OPS_SERVICE environment variable.
    #[arg(short = 's', long, global = true, env = "SLURM_OPS_SERVICE")]
    pub service: Option<String>,

    /// Installation backend (apt or snap).
    /// Can also be set via SLURM_OPS_BACKEND environment variable.
    #[arg(long, global = true, env = "SLURM_OPS_BACKEND", default_value = "apt")]
    pub backend: String,

    /// Filesystem root every managed path is resolved under.
    /// Can also be set via SLURM_OPS_ROOT environment variable.
    #[arg(long, global = true, env = "SLURM_OPS_ROOT", default_value = "/")]
    pub root: PathBuf,

    /// Own managed files by USER:GROUP instead of the daemon's account.
    /// Can also be set via SLURM_OPS_OWNER environment variable.
    #[arg(long, global = true, env = "SLURM_OPS_OWNER", value_name = "USER:GROUP")]
    pub owner: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Configuration file commands
    Config {
        #[command(flatten)]
        target: ConfigTarget,

        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// `<SERVICE>_OPTIONS` commands
    Options {
        #[command(subcommand)]
        command: OptionsCommands,
    },

    /// Secret file commands (slurm.key, jwt_hs256.key)
    Secret {
        #[command(subcommand)]
        command: SecretCommands,
    },

    /// Control the daemon through systemd or snapd
    Service {
        #[command(subcommand)]
        command: ServiceCommands,
    },

    /// prometheus-slurm-exporter arguments
    Exporter {
        #[command(subcommand)]
        command: ExporterCommands,
    },

    /// Show the installed version
    Version,

    /// Install the daemon with the selected backend
    Install,
}

/// Which configuration file a `config` command targets.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigTarget {
    /// Configuration file to use instead of the daemon's primary
    /// (e.g. cgroup.conf)
    #[arg(long, global = true)]
    pub file: Option<String>,

    /// Target the include fragment with this label (e.g. accounting for
    /// slurm.conf.accounting)
    #[arg(long, global = true)]
    pub include: Option<String>,
}

/// Configuration file subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show every key in the file
    Show,

    /// Get one value
    Get {
        /// Configuration key (case-insensitive)
        key: String,
    },

    /// Set one value, creating the file if needed
    Set {
        /// Configuration key
        key: String,
        /// New value
        value: String,
    },

    /// Remove one key
    Unset {
        /// Configuration key (case-insensitive)
        key: String,
    },

    /// Delete the file
    Delete,

    /// List include fragments of the file
    Includes,

    /// List snapshots of the file and its includes
    Snapshots,

    /// Snapshot the file and all its includes
    Save,

    /// Restore the file and its includes from their snapshots
    Restore,

    /// Fold every include into the file
    Merge,
}

/// `<SERVICE>_OPTIONS` subcommands
#[derive(Subcommand, Debug)]
pub enum OptionsCommands {
    /// Show the parsed options
    Show,

    /// Set a flag, with a value or as a bare switch
    Set {
        /// Flag token (e.g. --conf-server, -Z)
        #[arg(allow_hyphen_values = true)]
        flag: String,
        /// Value for the flag; omit for a bare switch
        #[arg(allow_hyphen_values = true)]
        value: Option<String>,
    },

    /// Remove a flag
    Unset {
        /// Flag token
        #[arg(allow_hyphen_values = true)]
        flag: String,
    },
}

/// Secret subcommands
#[derive(Subcommand, Debug)]
pub enum SecretCommands {
    /// Generate and store a new secret
    Generate {
        #[arg(value_enum)]
        name: SecretName,
    },

    /// Print the secret (base64 for key, PEM for jwt)
    Get {
        #[arg(value_enum)]
        name: SecretName,
    },

    /// Store a secret (base64 for key, PEM for jwt)
    Set {
        #[arg(value_enum)]
        name: SecretName,
        /// Secret value
        value: String,
    },

    /// Print the SHA-256 fingerprint of the stored secret
    Fingerprint {
        #[arg(value_enum)]
        name: SecretName,
    },
}

/// Service subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCommands {
    Start,
    Stop,
    Restart,
    /// Start the daemon at boot
    Enable,
    /// Do not start the daemon at boot
    Disable,
    /// Report whether the daemon is running
    Status,
}

/// Exporter subcommands
#[derive(Subcommand, Debug)]
pub enum ExporterCommands {
    /// Show the exporter's arguments
    Show,

    /// Replace the exporter's arguments
    Set {
        /// Arguments, passed after `--`
        #[arg(allow_hyphen_values = true, trailing_var_arg = true, num_args = 1..)]
        args: Vec<String>,
    },

    /// Remove the exporter's arguments
    Unset,
}

/// Secrets a daemon can hold.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretName {
    /// slurm.key
    Key,
    /// jwt_hs256.key
    Jwt,
}
