//! Controller configuration, loaded once from a TOML file in `main` and
//! threaded through every component constructor behind an `Arc<Config>`
//! (§9: no global singletons).

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Adopter strategy selected by `autoconf_mode` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdopterMode {
    Opt82,
    Cdp,
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// The controller's configuration, exactly the keys enumerated in §6.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Store connection specification. The database engine itself is out of
    /// scope (§1); the reference `InMemoryDeviceStore` ignores this value,
    /// but it is still parsed since a real deployment's store constructor
    /// would need it.
    pub database: String,

    /// Command RPC bind address (`host:port`).
    pub command_socket: String,

    /// Ingest Listener bind target. In the original this is a zmq PULL bind
    /// address; this crate's Ingest Listener instead subscribes to this
    /// value interpreted as a NATS subject (§6 "[ADDED] Transport framing").
    pub opt82_zmq_listener: String,

    /// NATS server URL the Ingest Listener connects to.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// DNS name embedded in emitted base configurations so switches call
    /// back here.
    pub liscain_adopt_dn: String,
    /// Bootstrap credentials used by `Driver::initial_setup`.
    pub liscain_init_username: String,
    pub liscain_init_password: String,

    /// Device class a first-contact device is assigned (§3: `device_class`
    /// is never null after creation; this crate ships a single driver).
    #[serde(default = "default_device_class")]
    pub default_device_class: String,

    /// Path to the base config template for `default_device_class`
    /// (`baseconfig/<vendor>.cfg`, §6).
    pub base_config_template_path: PathBuf,

    /// TFTP-shaped bootstrap listener bind address.
    pub bootstrap_listener: String,

    #[serde(flatten)]
    pub autoconf: AutoconfConfig,

    /// Optional ephemeral-blob HTTP server.
    pub http_port: Option<u16>,
    pub serve_http: Option<bool>,
}

fn default_nats_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_device_class() -> String {
    "CiscoIOS".to_string()
}

/// The `autoconf_*` key family (§6), grouped for convenience but flattened
/// into the same TOML section as the rest of `Config`.
#[derive(Debug, Clone, Deserialize)]
pub struct AutoconfConfig {
    #[serde(rename = "autoconf_enabled", default)]
    pub enabled: bool,
    #[serde(rename = "autoconf_mode")]
    pub mode: Option<AdopterMode>,
    #[serde(rename = "autoconf_path")]
    pub path: Option<PathBuf>,
    #[serde(rename = "autoconf_version_whitelist_prefix")]
    pub version_whitelist_prefix: Option<String>,
    #[serde(rename = "autoconf_cdp_jaspy_api")]
    pub cdp_jaspy_api: Option<String>,
}

impl AutoconfConfig {
    /// Parse the comma-separated whitelist prefix list (§4.6).
    pub fn whitelist_prefixes(&self) -> Option<Vec<String>> {
        self.version_whitelist_prefix
            .as_ref()
            .map(|s| s.split(',').map(|p| p.trim().to_string()).collect())
    }
}

impl Config {
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
database = "sqlite://ztp.db"
command_socket = "127.0.0.1:9001"
opt82_zmq_listener = "opt82.ingest"
liscain_adopt_dn = "ztp.example.com"
liscain_init_username = "admin"
liscain_init_password = "secret"
base_config_template_path = "baseconfig/cisco_ios.cfg"
bootstrap_listener = "127.0.0.1:6900"
autoconf_enabled = true
autoconf_mode = "opt82"
autoconf_path = "autoconf"
autoconf_version_whitelist_prefix = "15.2,16."
"#;

    #[test]
    fn parses_sample_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.command_socket, "127.0.0.1:9001");
        assert!(config.autoconf.enabled);
        assert_eq!(config.autoconf.mode, Some(AdopterMode::Opt82));
        assert_eq!(
            config.autoconf.whitelist_prefixes(),
            Some(vec!["15.2".to_string(), "16.".to_string()])
        );
        assert_eq!(config.default_device_class, "CiscoIOS");
        assert_eq!(config.nats_url, "nats://127.0.0.1:4222");
    }

    #[test]
    fn whitelist_absent_means_accept_all() {
        let config: Config = toml::from_str(SAMPLE.replace("autoconf_version_whitelist_prefix = \"15.2,16.\"\n", "").as_str()).unwrap();
        assert_eq!(config.autoconf.whitelist_prefixes(), None);
    }
}
