//! Controller configuration

use anyhow::{Context, Result};
use controller_lib::engine::{ImportConfig, SupervisorConfig, WatchConfig};
use controller_lib::falco::{FalcoConfig, RetryPolicy};
use controller_lib::models::{DEFAULT_RESOURCES, DEFAULT_RESOURCE_GROUP, DEFAULT_RESOURCE_VERSION};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the JSON config file
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "./config.local.json";
const ENV_PREFIX: &str = "CONTROLLER";

/// Controller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_mongo_uri")]
    pub mongo_uri: String,

    #[serde(default = "default_mongo_db")]
    pub mongo_db: String,

    /// Fallback cluster name when none can be detected
    #[serde(default)]
    pub cluster: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `json` or `pretty`
    #[serde(default = "default_log_format")]
    pub log_format: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_true")]
    pub save_logs: bool,

    /// Kubeconfig used outside the cluster
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_resource_group")]
    pub resource_group: String,

    #[serde(default = "default_resource_version")]
    pub resource_version: String,

    /// Custom resource plurals to mirror
    #[serde(default = "default_resources")]
    pub resources: Vec<String>,

    #[serde(default = "default_reconnect_delay")]
    pub watch_reconnect_delay_secs: u64,

    /// Periodic re-import, disabled when unset or zero
    #[serde(default)]
    pub resync_interval_secs: Option<u64>,

    #[serde(default)]
    pub scope_stale_delete_to_cluster: bool,

    /// Mirror into process memory instead of MongoDB
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub falco: FalcoSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FalcoSettings {
    pub enabled: bool,
    pub namespace: String,
    pub label_selector: String,
    pub container: String,
    pub collection: String,
    pub max_failures: u32,
}

impl Default for FalcoSettings {
    fn default() -> Self {
        let defaults = FalcoConfig::default();
        Self {
            enabled: false,
            namespace: defaults.namespace,
            label_selector: defaults.label_selector,
            container: defaults.container,
            collection: defaults.collection,
            max_failures: defaults.retry.max_failures,
        }
    }
}

fn default_mongo_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_mongo_db() -> String {
    "k8s_mirror".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_true() -> bool {
    true
}

fn default_api_port() -> u16 {
    8080
}

fn default_resource_group() -> String {
    DEFAULT_RESOURCE_GROUP.to_string()
}

fn default_resource_version() -> String {
    DEFAULT_RESOURCE_VERSION.to_string()
}

fn default_resources() -> Vec<String> {
    DEFAULT_RESOURCES.iter().map(|r| r.to_string()).collect()
}

fn default_reconnect_delay() -> u64 {
    5
}

impl ControllerConfig {
    /// Load configuration from `$CONFIG_PATH` and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path, config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Layer `environment` over the optional JSON file at `path`
    pub fn load_from(path: &str, environment: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Json).required(false))
            .add_source(
                environment
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("resources"),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        let parsed: Self = config
            .try_deserialize()
            .context("Invalid configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<()> {
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            anyhow::bail!("log_format must be json or pretty, got {}", self.log_format);
        }
        if self.resource_group.is_empty() || self.resource_version.is_empty() {
            anyhow::bail!("resource_group and resource_version must not be empty");
        }
        Ok(())
    }

    /// Kubeconfig path: explicit setting, then `$KUBECONFIG`, then `~/.kube/config`
    pub fn kubeconfig_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.kubeconfig {
            return Ok(path.clone());
        }

        if let Ok(path) = std::env::var("KUBECONFIG") {
            return Ok(PathBuf::from(path));
        }

        let home = dirs_next::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".kube").join("config"))
    }

    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig {
            reconnect_delay: Duration::from_secs(self.watch_reconnect_delay_secs),
        }
    }

    pub fn import_config(&self) -> ImportConfig {
        ImportConfig {
            scope_stale_delete_to_cluster: self.scope_stale_delete_to_cluster,
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            resync_interval: self
                .resync_interval_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }

    pub fn falco_config(&self) -> FalcoConfig {
        FalcoConfig {
            namespace: self.falco.namespace.clone(),
            label_selector: self.falco.label_selector.clone(),
            container: self.falco.container.clone(),
            collection: self.falco.collection.clone(),
            retry: RetryPolicy {
                max_failures: self.falco.max_failures,
                ..RetryPolicy::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix(ENV_PREFIX).source(Some(vars))
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let config = ControllerConfig::load_from("/nonexistent/config.json", env(&[])).unwrap();

        assert_eq!(config.mongo_uri, "mongodb://localhost:27017");
        assert_eq!(config.mongo_db, "k8s_mirror");
        assert_eq!(config.cluster, None);
        assert_eq!(config.log_dir, PathBuf::from("./logs"));
        assert!(config.save_logs);
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.resources.len(), 12);
        assert_eq!(config.watch_config().reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.supervisor_config().resync_interval, None);
        assert!(!config.import_config().scope_stale_delete_to_cluster);
        assert!(!config.dry_run);
        assert!(!config.falco.enabled);
    }

    #[test]
    fn test_json_file() {
        let file = write_config(
            r#"{
                "mongo_uri": "mongodb://mongo:27017",
                "mongo_db": "reports",
                "cluster": "prod-eu",
                "log_level": "debug",
                "save_logs": false,
                "resources": ["sbomreports"],
                "falco": {"enabled": true, "namespace": "security"}
            }"#,
        );

        let config =
            ControllerConfig::load_from(file.path().to_str().unwrap(), env(&[])).unwrap();

        assert_eq!(config.mongo_uri, "mongodb://mongo:27017");
        assert_eq!(config.mongo_db, "reports");
        assert_eq!(config.cluster.as_deref(), Some("prod-eu"));
        assert_eq!(config.log_level, "debug");
        assert!(!config.save_logs);
        assert_eq!(config.resources, vec!["sbomreports"]);
        assert!(config.falco.enabled);
        assert_eq!(config.falco_config().namespace, "security");
        assert_eq!(config.falco_config().container, "falco");
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_config(r#"{"mongo_db": "from-file", "api_port": 9000}"#);

        let config = ControllerConfig::load_from(
            file.path().to_str().unwrap(),
            env(&[
                ("CONTROLLER_MONGO_DB", "from-env"),
                ("CONTROLLER_RESOURCES", "sbomreports,configauditreports"),
                ("CONTROLLER_RESYNC_INTERVAL_SECS", "600"),
                ("CONTROLLER_FALCO__ENABLED", "true"),
            ]),
        )
        .unwrap();

        assert_eq!(config.mongo_db, "from-env");
        assert_eq!(config.api_port, 9000);
        assert_eq!(config.resources, vec!["sbomreports", "configauditreports"]);
        assert_eq!(
            config.supervisor_config().resync_interval,
            Some(Duration::from_secs(600))
        );
        assert!(config.falco.enabled);
    }

    #[test]
    fn test_single_underscore_after_prefix() {
        let single = ControllerConfig::load_from(
            "/nonexistent/config.json",
            env(&[("CONTROLLER_MONGO_DB", "single")]),
        )
        .unwrap();
        assert_eq!(single.mongo_db, "single");

        let double = ControllerConfig::load_from(
            "/nonexistent/config.json",
            env(&[("CONTROLLER__MONGO_DB", "double")]),
        )
        .unwrap();
        assert_eq!(double.mongo_db, "k8s_mirror");
    }

    #[test]
    fn test_zero_resync_disables_it() {
        let config = ControllerConfig::load_from(
            "/nonexistent/config.json",
            env(&[("CONTROLLER_RESYNC_INTERVAL_SECS", "0")]),
        )
        .unwrap();
        assert_eq!(config.supervisor_config().resync_interval, None);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let file = write_config("{ not json");
        assert!(ControllerConfig::load_from(file.path().to_str().unwrap(), env(&[])).is_err());
    }

    #[test]
    fn test_invalid_log_format_is_an_error() {
        let result = ControllerConfig::load_from(
            "/nonexistent/config.json",
            env(&[("CONTROLLER_LOG_FORMAT", "xml")]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_kubeconfig_wins() {
        let config = ControllerConfig::load_from(
            "/nonexistent/config.json",
            env(&[("CONTROLLER_KUBECONFIG", "/etc/kube/admin.yaml")]),
        )
        .unwrap();
        assert_eq!(
            config.kubeconfig_path().unwrap(),
            PathBuf::from("/etc/kube/admin.yaml")
        );
    }
}
