//! Starting, stopping, and querying daemons through the host's init system.
//!
//! Debian packages run under systemd and are driven with `systemctl`. The
//! snap runs its daemons as snap apps, named `<snap>.<unit>`, and is
//! driven with `snap start|stop|restart`.

use super::HostContext;
use crate::Result;
use tracing::info;

/// Lifecycle operations on one daemon.
pub trait ServiceManager: Send + Sync {
    /// Name of the unit or snap app being managed.
    fn unit(&self) -> &str;

    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    fn restart(&self) -> Result<()>;

    /// Start the daemon at boot.
    fn enable(&self) -> Result<()>;

    /// Stop starting the daemon at boot.
    fn disable(&self) -> Result<()>;

    /// Whether the daemon is currently running.
    fn is_active(&self) -> Result<bool>;
}

/// Service manager backed by `systemctl`.
#[derive(Debug, Clone)]
pub struct SystemctlManager {
    unit: String,
    ctx: HostContext,
}

impl SystemctlManager {
    pub fn new(unit: impl Into<String>, ctx: HostContext) -> Self {
        Self {
            unit: unit.into(),
            ctx,
        }
    }

    fn systemctl(&self, verb: &str) -> Result<()> {
        info!("systemctl {} {}", verb, self.unit);
        self.ctx.runner().call("systemctl", &[verb, self.unit.as_str()])?;
        Ok(())
    }
}

impl ServiceManager for SystemctlManager {
    fn unit(&self) -> &str {
        &self.unit
    }

    fn start(&self) -> Result<()> {
        self.systemctl("start")
    }

    fn stop(&self) -> Result<()> {
        self.systemctl("stop")
    }

    fn restart(&self) -> Result<()> {
        self.systemctl("restart")
    }

    fn enable(&self) -> Result<()> {
        self.systemctl("enable")
    }

    fn disable(&self) -> Result<()> {
        self.systemctl("disable")
    }

    /// `systemctl is-active` exits non-zero for any state but active.
    fn is_active(&self) -> Result<bool> {
        let output = self
            .ctx
            .runner()
            .run("systemctl", &["is-active", "--quiet", self.unit.as_str()])?;
        Ok(output.success())
    }
}

/// Service manager for an app of a snap.
#[derive(Debug, Clone)]
pub struct SnapServiceManager {
    snap: String,
    unit: String,
    app: String,
    ctx: HostContext,
}

impl SnapServiceManager {
    pub fn new(snap: impl Into<String>, unit: impl Into<String>, ctx: HostContext) -> Self {
        let snap = snap.into();
        let unit = unit.into();
        Self {
            app: format!("{}.{}", snap, unit),
            snap,
            unit,
            ctx,
        }
    }

    /// Fully qualified app name, e.g. `slurm.slurmd`.
    pub fn app(&self) -> &str {
        &self.app
    }

    fn run_snap(&self, args: &[&str]) -> Result<()> {
        info!("snap {}", args.join(" "));
        self.ctx.runner().call("snap", args)?;
        Ok(())
    }
}

impl ServiceManager for SnapServiceManager {
    fn unit(&self) -> &str {
        &self.unit
    }

    fn start(&self) -> Result<()> {
        self.run_snap(&["start", self.app.as_str()])
    }

    fn stop(&self) -> Result<()> {
        self.run_snap(&["stop", self.app.as_str()])
    }

    fn restart(&self) -> Result<()> {
        self.run_snap(&["restart", self.app.as_str()])
    }

    fn enable(&self) -> Result<()> {
        self.run_snap(&["start", "--enable", self.app.as_str()])
    }

    fn disable(&self) -> Result<()> {
        self.run_snap(&["stop", "--disable", self.app.as_str()])
    }

    fn is_active(&self) -> Result<bool> {
        let output = self.ctx.runner().call("snap", &["info", self.snap.as_str()])?;
        Ok(app_is_active(&output.stdout, &self.app))
    }
}

/// Read the state of `app` from the `services:` section of `snap info`,
/// where each line reads `<app>: <daemon>, <enabled>, <state>`.
fn app_is_active(info: &str, app: &str) -> bool {
    let prefix = format!("{}:", app);
    info.lines()
        .find_map(|line| line.trim().strip_prefix(prefix.as_str()))
        .and_then(|status| status.split(',').next_back())
        .is_some_and(|state| state.trim() == "active")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingRunner, TestEnv};
    use crate::Error;

    const SNAP_INFO_ACTIVE: &str = "\
name:      slurm
services:
  slurm.logrotate:                 oneshot, enabled, inactive
  slurm.slurm-prometheus-exporter: simple, disabled, inactive
  slurm.slurmctld:                 simple, disabled, active
  slurm.slurmd:                    simple, enabled, active
installed:          23.11.7             (x1) 114MB classic
";

    const SNAP_INFO_INACTIVE: &str = "\
name:      slurm
services:
  slurm.slurmctld:                 simple, disabled, inactive
  slurm.slurmd:                    simple, enabled, inactive
installed:          23.11.7             (x1) 114MB classic
";

    #[test]
    fn test_systemctl_lifecycle() {
        let env = TestEnv::new();
        let runner = RecordingRunner::new();
        let service = SystemctlManager::new("slurmd", env.context(runner.clone()));

        service.start().unwrap();
        service.stop().unwrap();
        service.restart().unwrap();
        service.enable().unwrap();
        service.disable().unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "systemctl start slurmd",
                "systemctl stop slurmd",
                "systemctl restart slurmd",
                "systemctl enable slurmd",
                "systemctl disable slurmd",
            ]
        );
    }

    #[test]
    fn test_systemctl_is_active() {
        let env = TestEnv::new();
        let runner = RecordingRunner::new();
        let service = SystemctlManager::new("slurmdbd", env.context(runner.clone()));
        assert!(service.is_active().unwrap());

        runner.respond("systemctl is-active --quiet slurmdbd", 3, "");
        assert!(!service.is_active().unwrap());
        assert_eq!(runner.calls()[0], "systemctl is-active --quiet slurmdbd");
    }

    #[test]
    fn test_systemctl_failure_is_command_error() {
        let env = TestEnv::new();
        let runner = RecordingRunner::new();
        runner.respond("systemctl start slurmctld", 1, "");
        let service = SystemctlManager::new("slurmctld", env.context(runner));
        assert!(matches!(service.start().unwrap_err(), Error::Command { .. }));
    }

    #[test]
    fn test_snap_lifecycle() {
        let env = TestEnv::new();
        let runner = RecordingRunner::new();
        let service = SnapServiceManager::new("slurm", "slurmctld", env.context(runner.clone()));
        assert_eq!(service.app(), "slurm.slurmctld");
        assert_eq!(service.unit(), "slurmctld");

        service.start().unwrap();
        service.stop().unwrap();
        service.restart().unwrap();
        service.enable().unwrap();
        service.disable().unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "snap start slurm.slurmctld",
                "snap stop slurm.slurmctld",
                "snap restart slurm.slurmctld",
                "snap start --enable slurm.slurmctld",
                "snap stop --disable slurm.slurmctld",
            ]
        );
    }

    #[test]
    fn test_snap_is_active() {
        let env = TestEnv::new();
        let runner = RecordingRunner::new();
        runner.respond("snap info slurm", 0, SNAP_INFO_ACTIVE);
        let service = SnapServiceManager::new("slurm", "slurmd", env.context(runner.clone()));
        assert!(service.is_active().unwrap());
        assert_eq!(runner.calls(), vec!["snap info slurm"]);

        let runner = RecordingRunner::new();
        runner.respond("snap info slurm", 0, SNAP_INFO_INACTIVE);
        let service = SnapServiceManager::new("slurm", "slurmd", env.context(runner));
        assert!(!service.is_active().unwrap());
    }

    #[test]
    fn test_app_is_active() {
        assert!(app_is_active(SNAP_INFO_ACTIVE, "slurm.slurmctld"));
        assert!(!app_is_active(SNAP_INFO_ACTIVE, "slurm.logrotate"));
        assert!(!app_is_active(SNAP_INFO_ACTIVE, "slurm.slurmrestd"));
        assert!(!app_is_active(SNAP_INFO_ACTIVE, "slurm.slurm"));
    }
}
