//! JSON config structs for the three pushmesh daemons plus the loader. A
//! missing or unparseable file is a fatal `ConfigError` — there is no
//! hand-rolled parser here, just `serde_json` over a plain struct.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub fn load<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Connection parameters for the shared Redis KV store, plus the key
/// prefix used by every `SessionStore`/`TopicStore` built on top of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(rename = "Port")]
    pub port: String,
    #[serde(rename = "ConnectTimeout")]
    pub connect_timeout_ms: u64,
    #[serde(rename = "ReadTimeout")]
    pub read_timeout_ms: u64,
    #[serde(rename = "WriteTimeout")]
    pub write_timeout_ms: u64,
    #[serde(rename = "KeyPrefix", default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    "push".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(rename = "TransportProtocols")]
    pub transport_protocols: String,
    #[serde(rename = "Listen")]
    pub listen: String,
    #[serde(rename = "MsgServerList", default)]
    pub msg_server_list: Vec<String>,
    #[serde(rename = "MsgServerNum")]
    pub msg_server_num: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgServerConfig {
    #[serde(rename = "TransportProtocols")]
    pub transport_protocols: String,
    #[serde(rename = "Listen")]
    pub listen: String,
    #[serde(rename = "Redis")]
    pub redis: RedisConfig,
    #[serde(rename = "ScanDeadSessionTimeout")]
    pub scan_dead_session_timeout_secs: u64,
    /// Accepted for config-file compatibility but deliberately not used to
    /// terminate the sweeper loop (see `pushmesh_msgserver::sweeper`).
    #[serde(rename = "Expire", default)]
    pub expire_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "MsgServerList", default)]
    pub msg_server_list: Vec<String>,
    #[serde(rename = "Redis")]
    pub redis: RedisConfig,
    /// `true` (default): a single MsgServer dial failure during startup
    /// aborts the whole process, so a partial cluster never comes up
    /// silently. `false`: log and skip, continue with whichever subset
    /// connected.
    #[serde(rename = "StrictCluster", default = "default_strict_cluster")]
    pub strict_cluster: bool,
}

fn default_strict_cluster() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_msg_server_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "TransportProtocols": "tcp",
                "Listen": "0.0.0.0:8000",
                "Redis": {{
                    "Port": "127.0.0.1:6379",
                    "ConnectTimeout": 1000,
                    "ReadTimeout": 1000,
                    "WriteTimeout": 1000,
                    "KeyPrefix": "push"
                }},
                "ScanDeadSessionTimeout": 30,
                "Expire": 3600
            }}"#
        )
        .unwrap();
        let cfg: MsgServerConfig = load(file.path()).unwrap();
        assert_eq!(cfg.listen, "0.0.0.0:8000");
        assert_eq!(cfg.redis.key_prefix, "push");
        assert_eq!(cfg.scan_dead_session_timeout_secs, 30);
    }

    #[test]
    fn missing_file_is_config_error() {
        let result: Result<GatewayConfig, _> = load(Path::new("/nonexistent/gateway.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn unparseable_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let result: Result<GatewayConfig, _> = load(file.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn manager_config_strict_cluster_defaults_true() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "UUID": "mgr-1",
                "MsgServerList": ["10.0.0.1:8000"],
                "Redis": {{
                    "Port": "127.0.0.1:6379",
                    "ConnectTimeout": 1000,
                    "ReadTimeout": 1000,
                    "WriteTimeout": 1000
                }}
            }}"#
        )
        .unwrap();
        let cfg: ManagerConfig = load(file.path()).unwrap();
        assert!(cfg.strict_cluster);
        assert_eq!(cfg.redis.key_prefix, "push");
    }
}
