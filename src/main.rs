//! slurm-ops CLI - Manage Slurm daemons and their configuration.

use clap::Parser;
use slurm_ops::cli::{
    Cli, Commands, ConfigCommands, ExporterCommands, OptionsCommands, SecretCommands,
};
use slurm_ops::commands::{self, Output, Target};
use std::process;

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let human = cli.human_readable;

    if let Err(e) = run_command(cli, human) {
        if human {
            eprintln!("Error: {}", e);
        } else {
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
        }
        process::exit(1);
    }
}

/// Log to stderr so stdout carries only command output. `RUST_LOG`
/// overrides the default `warn` level.
fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run_command(cli: Cli, human: bool) -> Result<(), slurm_ops::Error> {
    let host = Target {
        service: cli.service,
        backend: cli.backend,
        root: cli.root,
        owner: cli.owner,
    };
    let manager = commands::manager(&host)?;

    match cli.command {
        Commands::Config { target, command } => match command {
            ConfigCommands::Show => {
                output(&commands::config_show(&manager, &target)?, human);
            }
            ConfigCommands::Get { key } => {
                output(&commands::config_get(&manager, &target, &key)?, human);
            }
            ConfigCommands::Set { key, value } => {
                let result = commands::config_set_value(&manager, &target, &key, &value)?;
                output(&result, human);
            }
            ConfigCommands::Unset { key } => {
                output(&commands::config_unset(&manager, &target, &key)?, human);
            }
            ConfigCommands::Delete => {
                output(&commands::config_delete(&manager, &target)?, human);
            }
            ConfigCommands::Includes => {
                output(&commands::config_includes(&manager, &target)?, human);
            }
            ConfigCommands::Snapshots => {
                output(&commands::config_snapshots(&manager, &target)?, human);
            }
            ConfigCommands::Save => {
                output(&commands::config_save(&manager, &target)?, human);
            }
            ConfigCommands::Restore => {
                output(&commands::config_restore(&manager, &target)?, human);
            }
            ConfigCommands::Merge => {
                output(&commands::config_merge(&manager, &target)?, human);
            }
        },

        Commands::Options { command } => match command {
            OptionsCommands::Show => {
                output(&commands::options_show(&manager)?, human);
            }
            OptionsCommands::Set { flag, value } => {
                output(&commands::options_set(&manager, &flag, value)?, human);
            }
            OptionsCommands::Unset { flag } => {
                output(&commands::options_unset(&manager, &flag)?, human);
            }
        },

        Commands::Secret { command } => match command {
            SecretCommands::Generate { name } => {
                output(&commands::secret_generate(&manager, name)?, human);
            }
            SecretCommands::Get { name } => {
                output(&commands::secret_get(&manager, name)?, human);
            }
            SecretCommands::Set { name, value } => {
                output(&commands::secret_set(&manager, name, &value)?, human);
            }
            SecretCommands::Fingerprint { name } => {
                output(&commands::secret_fingerprint(&manager, name)?, human);
            }
        },

        Commands::Service { command } => {
            output(&commands::service(&manager, command)?, human);
        }

        Commands::Exporter { command } => match command {
            ExporterCommands::Show => {
                output(&commands::exporter_show(&manager)?, human);
            }
            ExporterCommands::Set { args } => {
                output(&commands::exporter_set(&manager, &args)?, human);
            }
            ExporterCommands::Unset => {
                output(&commands::exporter_unset(&manager)?, human);
            }
        },

        Commands::Version => {
            output(&commands::version(&manager)?, human);
        }

        Commands::Install => {
            output(&commands::install(&manager)?, human);
        }
    }

    Ok(())
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
