//! `prometheus-slurm-exporter`, installed next to slurmctld.

use super::service::ServiceManager;
use super::OpsManager;
use crate::env::EnvFile;
use crate::{Error, Result};

/// Unit name of the exporter.
pub const EXPORTER_UNIT: &str = "prometheus-slurm-exporter";

/// Variable holding the exporter's command line arguments.
pub const ARGS_VAR: &str = "ARGS";

/// The exporter's service and its command line arguments.
pub struct PrometheusExporter {
    service: Box<dyn ServiceManager>,
    env: EnvFile,
}

impl std::fmt::Debug for PrometheusExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusExporter")
            .field("unit", &self.service.unit())
            .field("env", &self.env)
            .finish()
    }
}

impl PrometheusExporter {
    pub fn new(ops: &dyn OpsManager) -> Self {
        Self {
            service: ops.service_manager_for(EXPORTER_UNIT),
            env: ops.env_file(EXPORTER_UNIT),
        }
    }

    pub fn service(&self) -> &dyn ServiceManager {
        self.service.as_ref()
    }

    pub fn env_file(&self) -> &EnvFile {
        &self.env
    }

    /// Arguments passed to the exporter. Missing means none.
    pub fn args(&self) -> Result<Vec<String>> {
        let Some(raw) = self.env.get(ARGS_VAR)? else {
            return Ok(Vec::new());
        };
        shlex::split(&raw).ok_or_else(|| Error::Format {
            path: self.env.path().to_path_buf(),
            reason: format!("unbalanced quotes in {}", ARGS_VAR),
        })
    }

    /// Replace the exporter's arguments.
    pub fn set_args<I, S>(&self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<S> = args.into_iter().collect();
        let joined = shlex::try_join(args.iter().map(|a| a.as_ref()))
            .map_err(|e| Error::InvalidInput(format!("cannot quote exporter arguments: {}", e)))?;
        self.env.set([(ARGS_VAR, joined)])
    }

    pub fn clear_args(&self) -> Result<()> {
        self.env.unset(ARGS_VAR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{AptManager, Service, SnapManager};
    use crate::test_utils::{RecordingRunner, TestEnv};

    #[test]
    fn test_apt_exporter_files() {
        let env = TestEnv::new();
        let runner = RecordingRunner::new();
        let apt = AptManager::new(Service::Slurmctld, env.context(runner.clone()));
        let exporter = PrometheusExporter::new(&apt);

        assert_eq!(
            exporter.env_file().path(),
            env.join("etc/default/prometheus-slurm-exporter")
        );
        exporter.service().restart().unwrap();
        assert_eq!(runner.calls(), vec!["systemctl restart prometheus-slurm-exporter"]);
    }

    #[test]
    fn test_snap_exporter_shares_env_file() {
        let env = TestEnv::new();
        let runner = RecordingRunner::new();
        let snap = SnapManager::new(env.context(runner.clone()));
        let exporter = PrometheusExporter::new(&snap);

        assert_eq!(exporter.env_file().path(), env.join("var/snap/slurm/common/.env"));
        exporter.service().start().unwrap();
        assert_eq!(runner.calls(), vec!["snap start slurm.prometheus-slurm-exporter"]);
    }

    #[test]
    fn test_args_round_trip() {
        let env = TestEnv::new();
        std::fs::create_dir_all(env.join("etc/default")).unwrap();
        let apt = AptManager::new(Service::Slurmctld, env.context(RecordingRunner::new()));
        let exporter = PrometheusExporter::new(&apt);
        assert!(exporter.args().unwrap().is_empty());

        exporter
            .set_args(["-listen-address", ":9092", "-slurm.collect-limits"])
            .unwrap();
        assert_eq!(
            exporter.args().unwrap(),
            vec!["-listen-address", ":9092", "-slurm.collect-limits"]
        );

        exporter.set_args(["-web.config", "/etc/exporter/web config.yml"]).unwrap();
        assert_eq!(
            exporter.args().unwrap(),
            vec!["-web.config", "/etc/exporter/web config.yml"]
        );

        exporter.clear_args().unwrap();
        assert!(exporter.args().unwrap().is_empty());
        assert_eq!(exporter.env_file().get(ARGS_VAR).unwrap(), None);
    }

    #[test]
    fn test_args_unbalanced_quotes() {
        let env = TestEnv::new();
        std::fs::create_dir_all(env.join("etc/default")).unwrap();
        std::fs::write(
            env.join("etc/default/prometheus-slurm-exporter"),
            "ARGS=-listen-address \"oops\n",
        )
        .unwrap();
        let apt = AptManager::new(Service::Slurmctld, env.context(RecordingRunner::new()));
        let err = PrometheusExporter::new(&apt).args().unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }
}
