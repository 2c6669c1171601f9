//! `slurm` snap backend.

use super::{
    create_state_save_location, BackendType, HostContext, OpsManager, ServiceManager,
    SnapServiceManager,
};
use crate::env::EnvFile;
use crate::{Error, Result};
use std::path::PathBuf;
use tracing::info;

/// Name of the snap carrying every daemon.
pub const SNAP_NAME: &str = "slurm";

const ETC_PATH: &str = "/var/snap/slurm/common/etc/slurm";
const VAR_LIB_PATH: &str = "/var/snap/slurm/common/var/lib/slurm";

/// Environment file shared by every daemon in the snap.
pub const ENV_FILE: &str = "/var/snap/slurm/common/.env";

/// Channel the snap is installed from.
pub const CHANNEL: &str = "23.11/stable";

/// Backend installing Slurm from the `slurm` snap.
///
/// One snap carries every daemon, so this backend is the same for all
/// services.
#[derive(Debug, Clone)]
pub struct SnapManager {
    ctx: HostContext,
}

impl SnapManager {
    pub fn new(ctx: HostContext) -> Self {
        Self { ctx }
    }
}

impl OpsManager for SnapManager {
    fn backend_type(&self) -> BackendType {
        BackendType::Snap
    }

    fn install(&self) -> Result<()> {
        info!("installing slurm snap from {}", CHANNEL);
        self.ctx
            .runner()
            .call("snap", &["install", "slurm", "--channel", CHANNEL, "--classic"])?;
        create_state_save_location(&self.ctx, &self.var_lib_path())?;
        self.ctx
            .runner()
            .call("snap", &["stop", "--disable", "slurm.munged"])?;
        Ok(())
    }

    fn version(&self) -> Result<String> {
        let output = self.ctx.runner().call("snap", &["info", "slurm"])?;
        parse_installed_version(&output.stdout).ok_or_else(|| Error::Command {
            command: "snap info slurm".to_string(),
            reason: "unable to retrieve snap info. ensure slurm is correctly installed".to_string(),
        })
    }

    fn etc_path(&self) -> PathBuf {
        self.ctx.resolve(ETC_PATH)
    }

    fn var_lib_path(&self) -> PathBuf {
        self.ctx.resolve(VAR_LIB_PATH)
    }

    fn env_file(&self, _unit: &str) -> EnvFile {
        EnvFile::new(self.ctx.resolve(ENV_FILE))
    }

    fn service_manager_for(&self, unit: &str) -> Box<dyn ServiceManager> {
        Box::new(SnapServiceManager::new(SNAP_NAME, unit, self.ctx.clone()))
    }
}

/// First token of the `installed:` line of `snap info`.
fn parse_installed_version(info: &str) -> Option<String> {
    info.lines()
        .find_map(|line| line.strip_prefix("installed:"))
        .and_then(|rest| rest.split_whitespace().next())
        .map(str::to_string)
}
