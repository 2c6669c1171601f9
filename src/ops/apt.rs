//! Debian package backend.

use super::{
    create_state_save_location, write_host_file, BackendType, HostContext, OpsManager, Service,
    ServiceManager, SystemctlManager,
};
use crate::env::EnvFile;
use crate::Result;
use std::path::PathBuf;
use tracing::{debug, info};

const ETC_PATH: &str = "/etc/slurm";
const VAR_LIB_PATH: &str = "/var/lib/slurm";
const ENV_DIR: &str = "/etc/default";

/// File raising open file, locked memory, and stack limits for every user.
pub const ULIMIT_FILE: &str = "/etc/security/limits.d/20-charmed-hpc-openfile.conf";

const ULIMIT_CONFIG: &str = "\
* soft nofile  1048576
* hard nofile  1048576
* soft memlock unlimited
* hard memlock unlimited
* soft stack unlimited
* hard stack unlimited
";

const SACKD_OVERRIDE: &str = "\
[Unit]
StartLimitIntervalSec=90
StartLimitBurst=10
[Service]
Restart=on-failure
RestartSec=10
";

const SLURMCTLD_OVERRIDE: &str = "\
[Service]
LimitMEMLOCK=infinity
LimitNOFILE=1048576
Restart=on-failure
RestartSec=10
";

const SLURMD_OVERRIDE: &str = "\
[Unit]
StartLimitIntervalSec=90
StartLimitBurst=10

[Service]
LimitMEMLOCK=infinity
LimitNOFILE=1048576
Restart=on-failure
RestartSec=10
";

/// Unit file installed for slurmrestd, whose package ships none usable.
pub const SLURMRESTD_UNIT_FILE: &str = "/usr/lib/systemd/system/slurmrestd.service";

const SLURMRESTD_UNIT: &str = "\
[Unit]
Description=Slurm REST daemon
After=network.target slurmctld.service
ConditionPathExists=/etc/slurm/slurm.conf
Documentation=man:slurmrestd(8)

[Service]
Type=simple
EnvironmentFile=-/etc/default/slurmrestd
Environment=\"SLURM_JWT=daemon\"
ExecStart=/usr/sbin/slurmrestd $SLURMRESTD_OPTIONS -vv 0.0.0.0:6820
ExecReload=/bin/kill -HUP $MAINPID
User=slurmrestd
Group=slurmrestd

# Restart service if failed
Restart=on-failure
RestartSec=30s

[Install]
WantedBy=multi-user.target
";

/// Fixed uid and gid of the slurmrestd system account.
pub const SLURMRESTD_ID: &str = "64031";

/// Exit status of `groupadd`/`adduser` when the account already exists.
const ACCOUNT_EXISTS: i32 = 9;

/// Backend installing Slurm from Debian packages.
#[derive(Debug, Clone)]
pub struct AptManager {
    service: Service,
    ctx: HostContext,
}

impl AptManager {
    pub fn new(service: Service, ctx: HostContext) -> Self {
        Self { service, ctx }
    }

    pub fn service(&self) -> Service {
        self.service
    }

    /// Packages installed for this daemon, the daemon's own package first.
    pub fn packages(&self) -> Vec<&'static str> {
        let extras: &[&'static str] = match self.service {
            Service::Sackd => &["slurm-client"],
            Service::Slurmctld => &["libpmix-dev", "mailutils", "prometheus-slurm-exporter"],
            Service::Slurmd => &["slurm-client", "libpmix-dev", "openmpi-bin"],
            Service::Slurmrestd => &["slurm-wlm-basic-plugins"],
            Service::Slurmdbd => &[],
        };
        let mut packages = vec![self.service.name()];
        packages.extend_from_slice(extras);
        packages
    }

    fn install_packages(&self) -> Result<()> {
        let packages = self.packages();
        debug!("installing packages {:?} with apt", packages);
        let mut args = vec!["install", "-y"];
        args.extend(packages);
        self.ctx.runner().call("apt-get", &args)?;
        Ok(())
    }

    fn drop_in_path(&self) -> PathBuf {
        self.ctx.resolve(format!(
            "/etc/systemd/system/{}.service.d/10-charmed-hpc.conf",
            self.service.name()
        ))
    }

    fn set_ulimit(&self) -> Result<()> {
        write_host_file(&self.ctx.resolve(ULIMIT_FILE), ULIMIT_CONFIG, 0o644)
    }

    fn disable_munge(&self) -> Result<()> {
        self.ctx.runner().call("systemctl", &["disable", "--now", "munge"])?;
        Ok(())
    }

    /// Create the slurmrestd account, tolerating one that already exists.
    fn create_slurmrestd_account(&self) -> Result<()> {
        let runner = self.ctx.runner();

        let groupadd = ["--gid", SLURMRESTD_ID, "slurmrestd"];
        let output = runner.run("groupadd", &groupadd)?;
        if output.code == Some(ACCOUNT_EXISTS) {
            debug!("group 'slurmrestd' already exists");
        } else {
            output.check(&crate::sys::render_command("groupadd", &groupadd))?;
        }

        let adduser = [
            "--system",
            "--group",
            "--uid",
            SLURMRESTD_ID,
            "--no-create-home",
            "--home",
            "/nonexistent",
            "slurmrestd",
        ];
        let output = runner.run("adduser", &adduser)?;
        if output.code == Some(ACCOUNT_EXISTS) {
            debug!("user 'slurmrestd' already exists");
        } else {
            output.check(&crate::sys::render_command("adduser", &adduser))?;
        }
        Ok(())
    }

    /// Replace package defaults that do not suit a managed cluster.
    fn apply_overrides(&self) -> Result<()> {
        match self.service {
            Service::Sackd => {
                write_host_file(&self.drop_in_path(), SACKD_OVERRIDE, 0o644)?;
                self.env_file_for(Service::Sackd).touch()?;
            }
            Service::Slurmctld => {
                self.set_ulimit()?;
                write_host_file(&self.drop_in_path(), SLURMCTLD_OVERRIDE, 0o644)?;
                self.disable_munge()?;
            }
            Service::Slurmd => {
                self.set_ulimit()?;
                write_host_file(&self.drop_in_path(), SLURMD_OVERRIDE, 0o644)?;
                self.disable_munge()?;
            }
            Service::Slurmrestd => {
                self.create_slurmrestd_account()?;
                self.env_file_for(Service::Slurmrestd).touch()?;
                write_host_file(
                    &self.ctx.resolve(SLURMRESTD_UNIT_FILE),
                    SLURMRESTD_UNIT,
                    0o644,
                )?;
            }
            Service::Slurmdbd => debug!("slurmdbd does not require any overrides"),
        }

        self.ctx.runner().call("systemctl", &["daemon-reload"])?;
        Ok(())
    }
}

impl OpsManager for AptManager {
    fn backend_type(&self) -> BackendType {
        BackendType::Apt
    }

    fn install(&self) -> Result<()> {
        info!("installing {} with apt", self.service);
        self.install_packages()?;
        create_state_save_location(&self.ctx, &self.var_lib_path())?;
        self.apply_overrides()
    }

    fn version(&self) -> Result<String> {
        let output = self.ctx.runner().call(
            "dpkg-query",
            &["--show", "--showformat=${Version}", self.service.name()],
        )?;
        Ok(output.stdout.trim().to_string())
    }

    fn etc_path(&self) -> PathBuf {
        self.ctx.resolve(ETC_PATH)
    }

    fn var_lib_path(&self) -> PathBuf {
        self.ctx.resolve(VAR_LIB_PATH)
    }

    fn env_file(&self, unit: &str) -> EnvFile {
        EnvFile::new(self.ctx.resolve(format!("{}/{}", ENV_DIR, unit)))
    }

    fn service_manager_for(&self, unit: &str) -> Box<dyn ServiceManager> {
        Box::new(SystemctlManager::new(unit, self.ctx.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingRunner, TestEnv};
    use crate::Error;
    use std::fs;

    fn apt(env: &TestEnv, service: Service) -> (AptManager, std::sync::Arc<RecordingRunner>) {
        let runner = RecordingRunner::new();
        (AptManager::new(service, env.context(runner.clone())), runner)
    }

    #[test]
    fn test_paths() {
        let env = TestEnv::new();
        let (apt, _) = apt(&env, Service::Slurmd);
        assert_eq!(apt.etc_path(), env.join("etc/slurm"));
        assert_eq!(apt.var_lib_path(), env.join("var/lib/slurm"));
        assert_eq!(
            apt.env_file_for(Service::Slurmdbd).path(),
            env.join("etc/default/slurmdbd")
        );
    }

    #[test]
    fn test_service_manager_uses_systemctl() {
        let env = TestEnv::new();
        let (apt, runner) = apt(&env, Service::Slurmctld);
        apt.service_manager_for("slurmctld").stop().unwrap();
        assert_eq!(
            apt.env_file("prometheus-slurm-exporter").path(),
            env.join("etc/default/prometheus-slurm-exporter")
        );
        assert_eq!(runner.calls(), vec!["systemctl stop slurmctld"]);
    }

    #[test]
    fn test_packages() {
        let env = TestEnv::new();
        assert_eq!(
            apt(&env, Service::Slurmd).0.packages(),
            vec!["slurmd", "slurm-client", "libpmix-dev", "openmpi-bin"]
        );
        assert_eq!(apt(&env, Service::Slurmdbd).0.packages(), vec!["slurmdbd"]);
    }

    #[test]
    #[cfg(unix)]
    fn test_install_slurmctld() {
        let env = TestEnv::new();
        let (apt, runner) = apt(&env, Service::Slurmctld);
        apt.install().unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "apt-get install -y slurmctld libpmix-dev mailutils prometheus-slurm-exporter",
                "systemctl disable --now munge",
                "systemctl daemon-reload",
            ]
        );
        assert!(env.join("var/lib/slurm/checkpoint").is_dir());
        assert_eq!(
            fs::read_to_string(env.join(
                "etc/systemd/system/slurmctld.service.d/10-charmed-hpc.conf"
            ))
            .unwrap(),
            SLURMCTLD_OVERRIDE
        );
        let ulimit = fs::read_to_string(env.join(
            "etc/security/limits.d/20-charmed-hpc-openfile.conf",
        ))
        .unwrap();
        assert!(ulimit.contains("* soft nofile  1048576"));
    }

    #[test]
    #[cfg(unix)]
    fn test_install_sackd_creates_env_file() {
        let env = TestEnv::new();
        let (apt, runner) = apt(&env, Service::Sackd);
        apt.install().unwrap();

        assert!(env.join("etc/default/sackd").is_file());
        assert!(!env.join("etc/security/limits.d/20-charmed-hpc-openfile.conf").exists());
        assert!(!runner.calls().iter().any(|c| c.contains("munge")));
    }

    #[test]
    #[cfg(unix)]
    fn test_install_slurmrestd_tolerates_existing_account() {
        let env = TestEnv::new();
        let (apt, runner) = apt(&env, Service::Slurmrestd);
        runner.respond("groupadd --gid 64031 slurmrestd", 9, "");
        apt.install().unwrap();

        let calls = runner.calls();
        assert_eq!(calls[1], "groupadd --gid 64031 slurmrestd");
        assert!(calls[2].starts_with("adduser --system --group --uid 64031"));
        assert!(env.join("etc/default/slurmrestd").is_file());
        let unit = fs::read_to_string(env.join("usr/lib/systemd/system/slurmrestd.service")).unwrap();
        assert!(unit.contains("ExecStart=/usr/sbin/slurmrestd $SLURMRESTD_OPTIONS"));
    }

    #[test]
    #[cfg(unix)]
    fn test_install_slurmrestd_account_failure() {
        let env = TestEnv::new();
        let (apt, runner) = apt(&env, Service::Slurmrestd);
        runner.respond(
            "adduser --system --group --uid 64031 --no-create-home --home /nonexistent slurmrestd",
            1,
            "",
        );
        let err = apt.install().unwrap_err();
        assert!(matches!(err, Error::Command { .. }));
    }

    #[test]
    fn test_install_package_failure_stops() {
        let env = TestEnv::new();
        let (apt, runner) = apt(&env, Service::Slurmdbd);
        runner.respond("apt-get install -y slurmdbd", 100, "");
        assert!(apt.install().is_err());
        assert_eq!(runner.calls().len(), 1);
        assert!(!env.join("var/lib/slurm/checkpoint").exists());
    }

    #[test]
    fn test_version() {
        let env = TestEnv::new();
        let (apt, runner) = apt(&env, Service::Slurmd);
        runner.respond(
            "dpkg-query --show --showformat=${Version} slurmd",
            0,
            "23.11.4-1.2u1\n",
        );
        assert_eq!(apt.version().unwrap(), "23.11.4-1.2u1");
        assert!(apt.is_installed());
    }

    #[test]
    fn test_not_installed() {
        let env = TestEnv::new();
        let (apt, runner) = apt(&env, Service::Slurmd);
        runner.respond("dpkg-query --show --showformat=${Version} slurmd", 1, "");
        assert!(!apt.is_installed());
    }
}
