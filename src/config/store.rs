// Server list persistence
//
// Saves and restores the configured lease servers so a restarted viewer can
// hand the same EndpointConfig to a new scheduler. TOML is the native format;
// `.json` paths use the `{"servers": [...]}` layout of the desktop viewer.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::{ConfigError, ConfigResult, EndpointConfig, guess_local_endpoint};

/// File name looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "pitv-viewer.toml";

/// All configured lease servers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerList {
    #[serde(default)]
    pub servers: Vec<EndpointConfig>,
}

impl ServerList {
    pub fn new(servers: Vec<EndpointConfig>) -> Self {
        Self { servers }
    }

    /// Sample list matching the mobile viewer's first-run defaults
    pub fn sample() -> Self {
        Self {
            servers: vec![EndpointConfig::new(
                "https://10.0.2.2:8080",
                "viewer",
                "",
                guess_local_endpoint(),
            )],
        }
    }

    /// Select a server by 0-based index or exact server URL
    pub fn find(&self, selector: &str) -> ConfigResult<&EndpointConfig> {
        if let Ok(index) = selector.parse::<usize>() {
            if let Some(config) = self.servers.get(index) {
                return Ok(config);
            }
        }

        self.servers
            .iter()
            .find(|config| config.server_url == selector)
            .ok_or_else(|| ConfigError::NoSuchServer(selector.to_string()))
    }

    /// Validate every entry, prefixing problems with the entry index
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let errors: Vec<String> = self
            .servers
            .iter()
            .enumerate()
            .filter_map(|(index, config)| config.validate().err().map(|errs| (index, errs)))
            .flat_map(|(index, errs)| errs.into_iter().map(move |e| format!("servers[{}]: {}", index, e)))
            .collect();

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::serialize(e.to_string()))
    }
}

/// Reads and writes a [`ServerList`] at a fixed path
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the first existing default location, or the user config
    /// directory when none exists yet
    pub fn locate() -> Self {
        let paths = Self::default_paths();
        let path = paths
            .iter()
            .find(|path| path.exists())
            .or_else(|| paths.last())
            .cloned()
            .unwrap_or_else(|| PathBuf::from(LOCAL_CONFIG_FILE));
        Self::new(path)
    }

    /// Candidate locations, most specific first
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("pitv-viewer").join("servers.toml"));
        }
        paths
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn is_json(&self) -> bool {
        self.path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    }

    /// Load the stored list
    pub fn load_all(&self) -> ConfigResult<ServerList> {
        if !self.path.exists() {
            return Err(ConfigError::NotFound(self.path.clone()));
        }

        let content = fs::read_to_string(&self.path)?;
        let list = if self.is_json() {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };

        log::debug!("Loaded server list from {}", self.path.display());
        Ok(list)
    }

    /// Replace the stored list
    pub fn save_all(&self, list: &ServerList) -> ConfigResult<()> {
        let content = if self.is_json() { list.to_json()? } else { list.to_toml()? };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, content)?;

        log::info!("Saved {} server(s) to {}", list.servers.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn full_config() -> EndpointConfig {
        EndpointConfig {
            server_url: "https://example:8080".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            local_udp_endpoint: "10.0.0.5:5000".to_string(),
            tls_ca_data: String::new(),
            tls_client_public_key_data: "cert-pem".to_string(),
            tls_client_private_key_data: "key-pem".to_string(),
        }
    }

    #[test]
    fn test_toml_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("nested").join("servers.toml"));
        let list = ServerList::new(vec![full_config(), EndpointConfig::default()]);

        store.save_all(&list).unwrap();
        assert!(store.exists());
        assert_eq!(store.load_all().unwrap(), list);
    }

    #[test]
    fn test_json_store_layout() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("servers.json"));
        let list = ServerList::new(vec![full_config()]);

        store.save_all(&list).unwrap();
        let raw = fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value["servers"].is_array());
        assert_eq!(value["servers"][0]["server_url"], "https://example:8080");
        assert_eq!(store.load_all().unwrap(), list);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("absent.toml"));
        assert!(matches!(store.load_all(), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let list: ServerList = toml::from_str(
            r#"
            [[servers]]
            server_url = "https://example:8080"
            local_udp_endpoint = "10.0.0.5"
            "#,
        )
        .unwrap();
        let config = &list.servers[0];
        assert_eq!(config.username, "");
        assert_eq!(config.tls_ca_data, "");
        assert_eq!(config.local_udp_port().unwrap(), 80);
    }

    #[test]
    fn test_find_by_index_or_url() {
        let mut second = full_config();
        second.server_url = "https://other:9000".to_string();
        let list = ServerList::new(vec![full_config(), second]);

        assert_eq!(list.find("1").unwrap().server_url, "https://other:9000");
        assert_eq!(list.find("https://example:8080").unwrap().username, "u");
        assert!(matches!(list.find("7"), Err(ConfigError::NoSuchServer(_))));
    }

    #[test]
    fn test_validate_reports_index() {
        let list = ServerList::new(vec![
            full_config(),
            EndpointConfig::new("https://example:8080", "u", "p", "host:abc"),
        ]);
        let errors = list.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("servers[1]"));
    }

    #[test]
    fn test_sample_is_valid() {
        let sample = ServerList::sample();
        assert_eq!(sample.servers.len(), 1);
        assert!(sample.validate().is_ok());
        assert!(sample.to_toml().unwrap().contains("[[servers]]"));
    }
}
