use serde::Deserialize;

/// Top-level configuration loaded from the YAML file given on the command
/// line, with environment overrides applied by the binaries.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub k8s: K8sConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
            debug: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct K8sConfig {
    /// Path to a kubeconfig file; empty means in-cluster configuration.
    pub kubeconfig: String,
    /// Namespace used for persisted UAV metrics.
    pub namespace: String,
    /// Comma-separated namespaces to watch; empty means `default`.
    pub watch_namespaces: String,
}

impl Default for K8sConfig {
    fn default() -> Self {
        K8sConfig {
            kubeconfig: String::new(),
            namespace: "default".to_string(),
            watch_namespaces: "default".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub collect_interval_seconds: u64,
    /// Namespaces the workload source lists; empty means all.
    pub namespaces: Vec<String>,
    pub enable_node: bool,
    pub enable_pod: bool,
    pub enable_network: bool,
    pub enable_custom: bool,
    pub enable_uav: bool,
    pub cache_retention_seconds: u64,
    /// Carry a failed source's previous section forward instead of
    /// publishing it empty.
    pub keep_last_on_error: bool,
    pub network_max_pairs: usize,
    pub network_test_timeout_seconds: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            enabled: true,
            collect_interval_seconds: 30,
            namespaces: vec!["default".to_string()],
            enable_node: true,
            enable_pod: true,
            enable_network: false,
            enable_custom: false,
            enable_uav: true,
            cache_retention_seconds: 300,
            keep_last_on_error: false,
            network_max_pairs: 5,
            network_test_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            format: "text".to_string(),
            output: "stdout".to_string(),
        }
    }
}

/// Split a comma-separated namespace list, dropping blanks. An empty result
/// falls back to `["default"]`.
pub fn parse_watch_namespaces(raw: &str) -> Vec<String> {
    let parsed: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect();
    if parsed.is_empty() {
        vec!["default".to_string()]
    } else {
        parsed
    }
}
