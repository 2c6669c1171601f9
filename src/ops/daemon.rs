//! Per-daemon management: one service on one backend.

use super::{
    ops_manager, BackendType, HostContext, OpsManager, PrometheusExporter, Service, ServiceManager,
};
use crate::config::{ConfigFile, KeyValueEditor};
use crate::env::EnvFile;
use crate::options::{self, OptionValue, Options};
use crate::secret::{SecretFile, JWT_KEY_FILE, SLURM_KEY_FILE};
use crate::scontrol;
use crate::sys::{self, Ownership};
use crate::{Error, Result};
use tracing::debug;

/// Flag listing the controllers a daemon fetches its configuration from.
pub const CONF_SERVER_FLAG: &str = "--conf-server";

/// Flag marking `slurmd` as a dynamic node.
pub const DYNAMIC_FLAG: &str = "-Z";

/// Flag carrying a dynamic node's own configuration line.
pub const NODE_CONF_FLAG: &str = "--conf";

/// Daemons that fetch their configuration from a controller.
const CONF_SERVER_SERVICES: &[Service] = &[Service::Sackd, Service::Slurmd];

/// Environment variable pointing slurmdbd at the MySQL socket.
pub const MYSQL_UNIX_PORT_VAR: &str = "MYSQL_UNIX_PORT";

/// Configuration files each daemon owns, with their modes. The first
/// entry is the daemon's primary file.
fn config_files(service: Service) -> &'static [(&'static str, u32)] {
    match service {
        Service::Slurmctld => &[
            ("slurm.conf", 0o644),
            ("acct_gather.conf", 0o600),
            ("cgroup.conf", 0o644),
            ("gres.conf", 0o644),
            ("oci.conf", 0o644),
        ],
        Service::Slurmdbd => &[("slurmdbd.conf", 0o600)],
        Service::Sackd | Service::Slurmd | Service::Slurmrestd => &[],
    }
}

/// Manager for one Slurm daemon.
pub struct SlurmManager {
    service: Service,
    ops: Box<dyn OpsManager>,
    ctx: HostContext,
}

impl std::fmt::Debug for SlurmManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlurmManager")
            .field("service", &self.service)
            .field("backend", &self.ops.backend_type())
            .field("ctx", &self.ctx)
            .finish()
    }
}

impl SlurmManager {
    pub fn new(service: Service, backend: BackendType, ctx: HostContext) -> Self {
        Self {
            service,
            ops: ops_manager(backend, service, ctx.clone()),
            ctx,
        }
    }

    pub fn service(&self) -> Service {
        self.service
    }

    pub fn ops(&self) -> &dyn OpsManager {
        self.ops.as_ref()
    }

    pub fn backend_type(&self) -> BackendType {
        self.ops.backend_type()
    }

    fn ownership(&self, mode: u32) -> Ownership {
        self.ctx
            .ownership(mode, self.service.user(), self.service.group())
    }

    /// Fail unless this daemon is one of `services`.
    fn require(&self, services: &[Service], what: &str) -> Result<()> {
        if services.contains(&self.service) {
            return Ok(());
        }
        Err(Error::InvalidInput(format!(
            "{} is not supported by {}",
            what, self.service
        )))
    }

    // ==================== Service control ====================

    /// Start/stop/query handle for this daemon.
    pub fn service_manager(&self) -> Box<dyn ServiceManager> {
        self.ops.service_manager_for(self.service.name())
    }

    /// The Prometheus exporter shipped alongside Slurm.
    pub fn exporter(&self) -> PrometheusExporter {
        PrometheusExporter::new(self.ops.as_ref())
    }

    /// Run `scontrol <args>` on this host.
    pub fn scontrol(&self, args: &[&str]) -> Result<String> {
        scontrol::scontrol(self.ctx.runner(), args)
    }

    // ==================== Secrets ====================

    /// The symmetric `slurm.key` shared by every daemon in the cluster.
    pub fn key(&self) -> SecretFile {
        SecretFile::symmetric(self.ops.etc_path().join(SLURM_KEY_FILE), &self.ownership(0o600))
    }

    /// The RSA key signing JWT tokens.
    pub fn jwt(&self) -> SecretFile {
        SecretFile::rsa(self.ops.etc_path().join(JWT_KEY_FILE), &self.ownership(0o600))
    }

    // ==================== Configuration files ====================

    /// The daemon's primary configuration file, if it has one.
    pub fn config(&self) -> Option<ConfigFile<KeyValueEditor>> {
        let (name, _) = config_files(self.service).first()?;
        self.config_file(name).ok()
    }

    /// Configuration file `name` owned by this daemon.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] if the daemon does not manage `name`.
    pub fn config_file(&self, name: &str) -> Result<ConfigFile<KeyValueEditor>> {
        let (name, mode) = config_files(self.service)
            .iter()
            .find(|(n, _)| *n == name)
            .ok_or_else(|| {
                Error::InvalidInput(format!("{} does not manage '{}'", self.service, name))
            })?;
        Ok(ConfigFile::new(
            self.ops.etc_path().join(name),
            KeyValueEditor,
            self.ownership(*mode),
        ))
    }

    pub fn acct_gather(&self) -> Option<ConfigFile<KeyValueEditor>> {
        self.config_file("acct_gather.conf").ok()
    }

    pub fn cgroup(&self) -> Option<ConfigFile<KeyValueEditor>> {
        self.config_file("cgroup.conf").ok()
    }

    pub fn gres(&self) -> Option<ConfigFile<KeyValueEditor>> {
        self.config_file("gres.conf").ok()
    }

    pub fn oci(&self) -> Option<ConfigFile<KeyValueEditor>> {
        self.config_file("oci.conf").ok()
    }

    // ==================== Options ====================

    pub fn env_file(&self) -> EnvFile {
        self.ops.env_file_for(self.service)
    }

    /// Current `<SERVICE>_OPTIONS`. Missing means no options.
    pub fn options(&self) -> Result<Options> {
        match self.env_file().get(&self.service.options_var())? {
            Some(value) => options::parse(&value),
            None => Ok(Options::new()),
        }
    }

    /// Load, mutate, and store `<SERVICE>_OPTIONS`. Nothing is written if
    /// `f` fails.
    pub fn edit_options<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Options) -> Result<R>,
    {
        let mut opts = self.options()?;
        let value = f(&mut opts)?;
        let marshaled = options::marshal(&opts)?;
        debug!("setting {}={}", self.service.options_var(), marshaled);
        self.env_file()
            .set([(self.service.options_var(), marshaled)])?;
        Ok(value)
    }

    /// Controllers listed in `--conf-server`.
    pub fn conf_server(&self) -> Result<Vec<String>> {
        self.require(CONF_SERVER_SERVICES, CONF_SERVER_FLAG)?;
        let opts = self.options()?;
        Ok(opts
            .get(CONF_SERVER_FLAG)
            .and_then(OptionValue::as_str)
            .map(|s| {
                s.split(',')
                    .filter(|host| !host.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    pub fn set_conf_server<S: AsRef<str>>(&self, servers: &[S]) -> Result<()> {
        self.require(CONF_SERVER_SERVICES, CONF_SERVER_FLAG)?;
        let joined = servers
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(",");
        self.edit_options(|opts| {
            opts.insert(CONF_SERVER_FLAG, joined);
            Ok(())
        })
    }

    pub fn clear_conf_server(&self) -> Result<()> {
        self.require(CONF_SERVER_SERVICES, CONF_SERVER_FLAG)?;
        self.edit_options(|opts| {
            opts.remove(CONF_SERVER_FLAG);
            Ok(())
        })
    }

    /// Whether this is a dynamic node (`-Z`).
    pub fn dynamic(&self) -> Result<bool> {
        self.require(&[Service::Slurmd], DYNAMIC_FLAG)?;
        Ok(self
            .options()?
            .get(DYNAMIC_FLAG)
            .is_some_and(|v| *v == OptionValue::Flag(true)))
    }

    pub fn set_dynamic(&self, dynamic: bool) -> Result<()> {
        self.require(&[Service::Slurmd], DYNAMIC_FLAG)?;
        self.edit_options(|opts| {
            opts.insert(DYNAMIC_FLAG, dynamic);
            Ok(())
        })
    }

    /// Node configuration passed with `--conf`.
    pub fn node_conf(&self) -> Result<Option<String>> {
        self.require(&[Service::Slurmd], NODE_CONF_FLAG)?;
        Ok(self
            .options()?
            .get(NODE_CONF_FLAG)
            .and_then(OptionValue::as_str)
            .map(str::to_string))
    }

    pub fn set_node_conf(&self, conf: &str) -> Result<()> {
        self.require(&[Service::Slurmd], NODE_CONF_FLAG)?;
        self.edit_options(|opts| {
            opts.insert(NODE_CONF_FLAG, conf);
            Ok(())
        })
    }

    pub fn clear_node_conf(&self) -> Result<()> {
        self.require(&[Service::Slurmd], NODE_CONF_FLAG)?;
        self.edit_options(|opts| {
            opts.remove(NODE_CONF_FLAG);
            Ok(())
        })
    }

    // ==================== Environment ====================

    pub fn mysql_unix_port(&self) -> Result<Option<String>> {
        self.require(&[Service::Slurmdbd], MYSQL_UNIX_PORT_VAR)?;
        self.env_file().get(MYSQL_UNIX_PORT_VAR)
    }

    pub fn set_mysql_unix_port(&self, socket: &str) -> Result<()> {
        self.require(&[Service::Slurmdbd], MYSQL_UNIX_PORT_VAR)?;
        self.env_file().set([(MYSQL_UNIX_PORT_VAR, socket)])
    }

    pub fn clear_mysql_unix_port(&self) -> Result<()> {
        self.require(&[Service::Slurmdbd], MYSQL_UNIX_PORT_VAR)?;
        self.env_file().unset(MYSQL_UNIX_PORT_VAR)
    }

    // ==================== Lifecycle ====================

    pub fn install(&self) -> Result<()> {
        self.ops.install()
    }

    pub fn version(&self) -> Result<String> {
        self.ops.version()
    }

    pub fn is_installed(&self) -> bool {
        self.ops.is_installed()
    }

    /// Short host name of the machine the daemon runs on.
    pub fn hostname(&self) -> Result<String> {
        sys::hostname()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyValueConfig;
    use crate::test_utils::{RecordingRunner, TestEnv};

    fn manager(env: &TestEnv, service: Service, backend: BackendType) -> SlurmManager {
        let manager = SlurmManager::new(service, backend, env.context(RecordingRunner::new()));
        std::fs::create_dir_all(manager.ops().etc_path()).unwrap();
        if let Some(parent) = manager.env_file().path().parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        manager
    }

    #[test]
    fn test_config_by_service() {
        let env = TestEnv::new();
        let ctld = manager(&env, Service::Slurmctld, BackendType::Apt);
        assert_eq!(ctld.config().unwrap().path(), env.join("etc/slurm/slurm.conf"));
        assert_eq!(ctld.config().unwrap().ownership().mode, 0o644);
        assert_eq!(ctld.acct_gather().unwrap().ownership().mode, 0o600);
        assert!(ctld.cgroup().is_some());
        assert!(ctld.gres().is_some());
        assert!(ctld.oci().is_some());

        let dbd = manager(&env, Service::Slurmdbd, BackendType::Apt);
        let config = dbd.config().unwrap();
        assert_eq!(config.path(), env.join("etc/slurm/slurmdbd.conf"));
        assert_eq!(config.ownership().mode, 0o600);
        assert!(dbd.cgroup().is_none());

        assert!(manager(&env, Service::Slurmd, BackendType::Apt).config().is_none());
    }

    #[test]
    fn test_config_file_unknown_name() {
        let env = TestEnv::new();
        let dbd = manager(&env, Service::Slurmdbd, BackendType::Apt);
        assert!(matches!(
            dbd.config_file("slurm.conf").unwrap_err(),
            Error::InvalidInput(_)
        ));
    }

    #[test]
    fn test_snap_paths() {
        let env = TestEnv::new();
        let ctld = manager(&env, Service::Slurmctld, BackendType::Snap);
        assert_eq!(
            ctld.key().path(),
            env.join("var/snap/slurm/common/etc/slurm/slurm.key")
        );
        assert_eq!(ctld.env_file().path(), env.join("var/snap/slurm/common/.env"));
    }

    #[test]
    fn test_secrets_owned_by_service() {
        let env = TestEnv::new();
        let slurmd = manager(&env, Service::Slurmd, BackendType::Apt);
        let key = slurmd.key();
        assert_eq!(key.path(), env.join("etc/slurm/slurm.key"));
        assert_eq!(key.ownership().user, "root");
        assert_eq!(key.ownership().mode, 0o600);
        assert_eq!(slurmd.jwt().path(), env.join("etc/slurm/jwt_hs256.key"));
    }

    #[test]
    fn test_options_missing_env_file() {
        let env = TestEnv::new();
        let slurmd = manager(&env, Service::Slurmd, BackendType::Apt);
        assert!(slurmd.options().unwrap().is_empty());
        assert!(slurmd.conf_server().unwrap().is_empty());
        assert!(!slurmd.dynamic().unwrap());
        assert_eq!(slurmd.node_conf().unwrap(), None);
    }

    #[test]
    fn test_conf_server() {
        let env = TestEnv::new();
        let slurmd = manager(&env, Service::Slurmd, BackendType::Apt);
        slurmd.set_conf_server(&["ctl0:6817", "ctl1:6817"]).unwrap();
        assert_eq!(slurmd.conf_server().unwrap(), vec!["ctl0:6817", "ctl1:6817"]);
        let raw = slurmd.env_file().get("SLURMD_OPTIONS").unwrap().unwrap();
        assert_eq!(
            shlex::split(&raw).unwrap(),
            vec!["--conf-server", "ctl0:6817,ctl1:6817"]
        );

        slurmd.clear_conf_server().unwrap();
        assert!(slurmd.conf_server().unwrap().is_empty());
    }

    #[test]
    fn test_dynamic_node() {
        let env = TestEnv::new();
        let slurmd = manager(&env, Service::Slurmd, BackendType::Apt);
        slurmd.set_dynamic(true).unwrap();
        slurmd.set_node_conf("RealMemory=60000 CPUs=16").unwrap();
        slurmd.set_conf_server(&["ctl0"]).unwrap();

        assert!(slurmd.dynamic().unwrap());
        assert_eq!(
            slurmd.node_conf().unwrap().as_deref(),
            Some("RealMemory=60000 CPUs=16")
        );
        assert_eq!(slurmd.conf_server().unwrap(), vec!["ctl0"]);

        slurmd.set_dynamic(false).unwrap();
        assert!(!slurmd.dynamic().unwrap());
        let raw = slurmd.env_file().get("SLURMD_OPTIONS").unwrap().unwrap();
        assert!(!raw.contains("-Z"));

        slurmd.clear_node_conf().unwrap();
        assert_eq!(slurmd.node_conf().unwrap(), None);
    }

    #[test]
    fn test_edit_options_error_writes_nothing() {
        let env = TestEnv::new();
        let slurmd = manager(&env, Service::Slurmd, BackendType::Apt);
        let result: Result<()> = slurmd.edit_options(|opts| {
            opts.insert("-Z", true);
            Err(Error::Other("abort".to_string()))
        });
        assert!(result.is_err());
        assert!(!slurmd.env_file().path().exists());
    }

    #[test]
    fn test_snap_options_share_env_file() {
        let env = TestEnv::new();
        let slurmd = manager(&env, Service::Slurmd, BackendType::Snap);
        let sackd = manager(&env, Service::Sackd, BackendType::Snap);
        slurmd.set_conf_server(&["ctl0"]).unwrap();
        sackd.set_conf_server(&["ctl1"]).unwrap();

        assert_eq!(slurmd.conf_server().unwrap(), vec!["ctl0"]);
        assert_eq!(sackd.conf_server().unwrap(), vec!["ctl1"]);
    }

    #[test]
    fn test_mysql_unix_port() {
        let env = TestEnv::new();
        let dbd = manager(&env, Service::Slurmdbd, BackendType::Apt);
        assert_eq!(dbd.mysql_unix_port().unwrap(), None);

        dbd.set_mysql_unix_port("/run/mysqld/mysqld.sock").unwrap();
        assert_eq!(
            dbd.mysql_unix_port().unwrap().as_deref(),
            Some("/run/mysqld/mysqld.sock")
        );

        dbd.clear_mysql_unix_port().unwrap();
        assert_eq!(dbd.mysql_unix_port().unwrap(), None);
    }

    #[test]
    fn test_slurmdbd_config_round_trip() {
        let env = TestEnv::new();
        let dbd = manager(&env, Service::Slurmdbd, BackendType::Apt);
        let config = dbd.config().unwrap();
        let doc: KeyValueConfig = [("DbdHost", "db0"), ("StorageType", "accounting_storage/mysql")]
            .into_iter()
            .collect();
        config.dump(&doc).unwrap();
        assert_eq!(config.load().unwrap(), doc);
    }

    #[test]
    fn test_conf_server_only_on_config_clients() {
        let env = TestEnv::new();
        let ctld = manager(&env, Service::Slurmctld, BackendType::Apt);
        for result in [
            ctld.conf_server().map(drop),
            ctld.set_conf_server(&["ctl0"]),
            ctld.clear_conf_server(),
        ] {
            match result {
                Err(Error::InvalidInput(msg)) => assert!(msg.contains("slurmctld")),
                other => panic!("unexpected result: {:?}", other),
            }
        }
        assert!(!ctld.env_file().path().exists());

        let sackd = manager(&env, Service::Sackd, BackendType::Apt);
        sackd.set_conf_server(&["ctl0", "ctl1"]).unwrap();
        assert_eq!(sackd.conf_server().unwrap(), vec!["ctl0", "ctl1"]);
    }

    #[test]
    fn test_dynamic_node_flags_only_on_slurmd() {
        let env = TestEnv::new();
        let sackd = manager(&env, Service::Sackd, BackendType::Apt);
        assert!(matches!(sackd.dynamic(), Err(Error::InvalidInput(_))));
        assert!(matches!(sackd.set_dynamic(true), Err(Error::InvalidInput(_))));
        assert!(matches!(sackd.node_conf(), Err(Error::InvalidInput(_))));
        assert!(matches!(
            sackd.set_node_conf("Features=gpu"),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(sackd.clear_node_conf(), Err(Error::InvalidInput(_))));

        let dbd = manager(&env, Service::Slurmdbd, BackendType::Apt);
        assert!(matches!(dbd.set_dynamic(true), Err(Error::InvalidInput(_))));
        assert!(!dbd.env_file().path().exists());

        let slurmd = manager(&env, Service::Slurmd, BackendType::Apt);
        assert!(matches!(
            slurmd.set_mysql_unix_port("/run/mysqld/mysqld.sock"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_service_manager_per_backend() {
        let env = TestEnv::new();
        let runner = RecordingRunner::new();
        let apt = SlurmManager::new(
            Service::Slurmctld,
            BackendType::Apt,
            env.context(runner.clone()),
        );
        apt.service_manager().restart().unwrap();

        let snap = SlurmManager::new(Service::Slurmd, BackendType::Snap, env.context(runner.clone()));
        snap.service_manager().stop().unwrap();

        assert_eq!(
            runner.calls(),
            vec!["systemctl restart slurmctld", "snap stop slurm.slurmd"]
        );
    }

    #[test]
    fn test_exporter_from_manager() {
        let env = TestEnv::new();
        let runner = RecordingRunner::new();
        let ctld = SlurmManager::new(
            Service::Slurmctld,
            BackendType::Apt,
            env.context(runner.clone()),
        );
        std::fs::create_dir_all(env.join("etc/default")).unwrap();
        let exporter = ctld.exporter();
        exporter.set_args(["-listen-address", ":9092"]).unwrap();
        exporter.service().restart().unwrap();

        assert_eq!(exporter.args().unwrap(), vec!["-listen-address", ":9092"]);
        assert_eq!(runner.calls(), vec!["systemctl restart prometheus-slurm-exporter"]);
    }

    #[test]
    fn test_scontrol_uses_host_runner() {
        let env = TestEnv::new();
        let runner = RecordingRunner::new();
        runner.respond("scontrol ping", 0, "Slurmctld(primary) at ctl0 is UP\n");
        let ctld = SlurmManager::new(
            Service::Slurmctld,
            BackendType::Apt,
            env.context(runner.clone()),
        );
        assert_eq!(
            ctld.scontrol(&["ping"]).unwrap(),
            "Slurmctld(primary) at ctl0 is UP\n"
        );
        ctld.scontrol(&["reconfigure"]).unwrap();
        assert_eq!(runner.calls(), vec!["scontrol ping", "scontrol reconfigure"]);
    }

    #[test]
    fn test_owner_override_applies_to_files() {
        let env = TestEnv::new();
        let ctx = env.context(RecordingRunner::new()).with_owner("1234", "5678");
        let dbd = SlurmManager::new(Service::Slurmdbd, BackendType::Apt, ctx);
        let ownership = dbd.config().unwrap().ownership().clone();
        assert_eq!((ownership.user.as_str(), ownership.group.as_str()), ("1234", "5678"));
    }
}
