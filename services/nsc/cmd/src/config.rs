//! Configuration handling for the client sidecar.
//!
//! Values come from, in increasing precedence: built-in defaults, the
//! `client:` section of the YAML config file, environment variables, and
//! finally explicitly passed command line flags (applied in `main`).

use anyhow::Result;
use nsc_client::selector::{parse_labels, DEFAULT_INTERFACE_PREFIX};
use nsc_client::{MechanismType, NetworkServiceSelector};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Client sidecar configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Control-plane endpoint, e.g. `http://127.0.0.1:5001`
    pub nsm_server: String,
    /// Network service requested when no selector list is given
    pub network_service: String,
    /// Labels for `network_service`
    pub labels: BTreeMap<String, String>,
    /// Selector list; takes precedence over `network_service`
    pub selectors: Vec<NetworkServiceSelector>,
    /// Requested mechanism
    pub mechanism: MechanismType,
    /// Prefix for generated interface names
    pub interface_prefix: String,
    /// Attempts per network service
    pub retry_attempts: u32,
    /// Delay between attempts
    pub retry_delay: Duration,
    /// Timeout for a single request
    pub request_timeout: Duration,
    /// Explicit pod name (empty = resolve from host)
    pub pod_name: String,
    /// Explicit namespace (empty = resolve from deployment)
    pub namespace: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nsm_server: "http://127.0.0.1:5001".to_string(),
            network_service: String::new(),
            labels: BTreeMap::new(),
            selectors: Vec::new(),
            mechanism: MechanismType::Kernel,
            interface_prefix: DEFAULT_INTERFACE_PREFIX.to_string(),
            retry_attempts: nsc_client::retry::DEFAULT_MAX_ATTEMPTS,
            retry_delay: nsc_client::retry::DEFAULT_INTER_DELAY,
            request_timeout: nsc_client::grpc::DEFAULT_REQUEST_TIMEOUT,
            pod_name: String::new(),
            namespace: String::new(),
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    client: Option<FileConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    nsm_server: Option<String>,
    network_service: Option<String>,
    labels: Option<BTreeMap<String, String>>,
    selectors: Option<Vec<String>>,
    mechanism: Option<String>,
    interface_prefix: Option<String>,
    retry_attempts: Option<u32>,
    retry_delay: Option<String>,
    request_timeout: Option<String>,
    pod_name: Option<String>,
    namespace: Option<String>,
}

impl ClientConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        if let Ok(content) = std::fs::read_to_string(&config_path) {
            match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    if let Some(file_config) = root_config.client {
                        config.apply_file_config(file_config)?;
                    }
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?}: {}, using defaults",
                    config_path.as_ref(),
                    e
                ),
            }
        } else {
            warn!("Config file {:?} not found, using defaults", config_path.as_ref());
        }

        config.apply_environment_overrides(|key| std::env::var(key).ok())?;

        info!(
            "Final client configuration: nsm_server={}, services={}, mechanism={}, retry={}x{:?}",
            config.nsm_server,
            config.selectors().len(),
            config.mechanism,
            config.retry_attempts,
            config.retry_delay
        );

        Ok(config)
    }

    /// Selectors to request: the explicit list, or the single configured service
    pub fn selectors(&self) -> Vec<NetworkServiceSelector> {
        if !self.selectors.is_empty() {
            return self.selectors.clone();
        }
        if self.network_service.is_empty() {
            return Vec::new();
        }
        vec![NetworkServiceSelector {
            service: self.network_service.clone(),
            interface: None,
            labels: self.labels.clone(),
        }]
    }

    fn apply_file_config(&mut self, file: FileConfig) -> Result<()> {
        if let Some(nsm_server) = file.nsm_server {
            self.nsm_server = nsm_server;
        }
        if let Some(network_service) = file.network_service {
            self.network_service = network_service;
        }
        if let Some(labels) = file.labels {
            self.labels = labels;
        }
        if let Some(selectors) = file.selectors {
            self.selectors = selectors
                .iter()
                .map(|s| NetworkServiceSelector::parse(s))
                .collect::<Result<_, _>>()?;
        }
        if let Some(mechanism) = file.mechanism {
            self.mechanism = mechanism.parse()?;
        }
        if let Some(prefix) = file.interface_prefix {
            self.interface_prefix = prefix;
        }
        if let Some(attempts) = file.retry_attempts {
            self.retry_attempts = attempts;
        }
        if let Some(delay) = file.retry_delay {
            self.retry_delay = humantime::parse_duration(&delay)?;
        }
        if let Some(timeout) = file.request_timeout {
            self.request_timeout = humantime::parse_duration(&timeout)?;
        }
        if let Some(pod_name) = file.pod_name {
            self.pod_name = pod_name;
        }
        if let Some(namespace) = file.namespace {
            self.namespace = namespace;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// `NAMESPACE` is deliberately absent: it is the deployment context the
    /// identity resolver falls back to, not an explicit setting.
    fn apply_environment_overrides<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| var(key).filter(|value| !value.is_empty());

        if let Some(nsm_server) = lookup("NSM_SERVER_ADDR") {
            self.nsm_server = nsm_server;
            info!("Control-plane endpoint overridden by environment: {}", self.nsm_server);
        }

        if let Some(service) = lookup("CLIENT_NETWORK_SERVICE") {
            self.network_service = service;
        }

        if let Some(labels) = lookup("CLIENT_LABELS") {
            self.labels = parse_labels(&labels, ',').map_err(|e| anyhow::anyhow!("CLIENT_LABELS: {}", e))?;
        }

        if let Some(selectors) = lookup("NS_NETWORKSERVICEMESH_IO") {
            self.selectors = NetworkServiceSelector::parse_list(&selectors)?;
            info!("Network service selectors overridden by environment: {}", selectors);
        }

        if let Some(mechanism) = lookup("MECHANISM_TYPE") {
            self.mechanism = mechanism.parse()?;
        }

        if let Some(attempts) = lookup("NSM_CONNECTION_RETRY") {
            match attempts.parse::<u32>() {
                Ok(attempts) => self.retry_attempts = attempts,
                Err(e) => warn!("Ignoring NSM_CONNECTION_RETRY={:?}: {}", attempts, e),
            }
        }

        if let Some(delay) = lookup("NSM_REQUEST_DELAY") {
            match humantime::parse_duration(&delay) {
                Ok(delay) => self.retry_delay = delay,
                Err(e) => warn!("Ignoring NSM_REQUEST_DELAY={:?}: {}", delay, e),
            }
        }

        if let Some(pod_name) = lookup("POD_NAME") {
            self.pod_name = pod_name;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.nsm_server, "http://127.0.0.1:5001");
        assert_eq!(config.retry_attempts, 10);
        assert_eq!(config.retry_delay, Duration::from_secs(5));
        assert_eq!(config.mechanism, MechanismType::Kernel);
        assert!(config.selectors().is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
client:
  nsm_server: http://10.0.0.5:5001
  network_service: secure-intranet
  labels:
    app: web
  mechanism: memif
  retry_attempts: 3
  retry_delay: 2s
  request_timeout: 30s
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = ClientConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.nsm_server, "http://10.0.0.5:5001");
        assert_eq!(config.mechanism, MechanismType::Memif);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(2));
        assert_eq!(config.request_timeout, Duration::from_secs(30));

        let selectors = config.selectors();
        assert_eq!(selectors.len(), 1);
        assert_eq!(selectors[0].service, "secure-intranet");
        assert_eq!(selectors[0].labels.get("app").map(String::as_str), Some("web"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = ClientConfig::load_from_file("/nonexistent/nsc.yaml").unwrap();
        assert_eq!(config.retry_attempts, 10);
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("NSM_SERVER_ADDR", "http://manager:5001"),
            ("CLIENT_NETWORK_SERVICE", "secure-intranet"),
            ("CLIENT_LABELS", "app=web,tier=frontend"),
            ("NS_NETWORKSERVICEMESH_IO", "vpn-gateway/vpn0?tier=edge,monitoring"),
            ("NSM_CONNECTION_RETRY", "not-a-number"),
            ("NSM_REQUEST_DELAY", "250ms"),
            ("POD_NAME", "web-0"),
            ("NAMESPACE", "ignored"),
        ]);

        let mut config = ClientConfig::default();
        config
            .apply_environment_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.nsm_server, "http://manager:5001");
        assert_eq!(config.labels.get("tier").map(String::as_str), Some("frontend"));
        assert_eq!(config.retry_attempts, 10);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.pod_name, "web-0");
        assert!(config.namespace.is_empty());

        let services: Vec<_> = config.selectors().into_iter().map(|s| s.service).collect();
        assert_eq!(services, ["vpn-gateway", "monitoring"]);
    }

    #[test]
    fn test_bad_selector_in_environment_is_an_error() {
        let mut config = ClientConfig::default();
        let result = config.apply_environment_overrides(|key| {
            (key == "NS_NETWORKSERVICEMESH_IO").then(|| "/eth0".to_string())
        });
        assert!(result.is_err());
    }
}
