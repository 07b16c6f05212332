//! Configuration file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use simbatch_net::{Endpoint, DEFAULT_BACKLOG, DEFAULT_PORT};

/// Looked up in the current directory when no config path is given.
pub const DEFAULT_CONFIG_FILE: &str = "simbatch.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub manager: ManagerConfig,
    pub simulator: SimulatorConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Simulator worker addresses, as `host:port`.
    pub workers: Vec<String>,
    pub worker_count: usize,
    /// Bound on every blocking worker read or write, `0` disables it.
    pub timeout_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            workers: Vec::new(),
            worker_count: 1,
            timeout_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub port: u16,
    pub backlog: i32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Extra directories searched for output plugins.
    pub streams: Vec<PathBuf>,
    /// Root directory of installed packages.
    pub packages: Option<PathBuf>,
}

impl Config {
    pub fn from_path(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading config file {}", path.display()))?;
        let config = toml::from_str(&text)
            .with_context(|| format!("failed parsing config file {}", path.display()))?;
        debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Loads the given config file, or the default one if present.
    pub fn load(path: Option<&str>) -> Result<Config> {
        match path {
            Some(p) => Config::from_path(Path::new(p)),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Config::from_path(default)
                } else {
                    Ok(Config::default())
                }
            }
        }
    }

    pub fn endpoints(&self) -> Result<Vec<Endpoint>> {
        let mut endpoints = Vec::with_capacity(self.manager.workers.len());
        for worker in &self.manager.workers {
            endpoints.push(worker.parse::<Endpoint>()?);
        }
        Ok(endpoints)
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self.manager.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config() {
        let config: Config = toml::from_str(
            r#"
            [manager]
            workers = ["127.0.0.1:48620", "node2:48621"]
            worker_count = 2
            timeout_ms = 1500

            [simulator]
            port = 5000
            backlog = 4

            [paths]
            streams = ["/opt/simbatch/streams"]
            packages = "/srv/pkgs"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.endpoints().unwrap(),
            vec![Endpoint::new("127.0.0.1", 48620), Endpoint::new("node2", 48621)]
        );
        assert_eq!(config.manager.worker_count, 2);
        assert_eq!(config.timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.simulator.port, 5000);
        assert_eq!(config.paths.packages, Some(PathBuf::from("/srv/pkgs")));
    }

    #[test]
    fn missing_sections_take_defaults() {
        let config: Config = toml::from_str("[manager]\nworker_count = 3\n").unwrap();
        assert_eq!(config.manager.worker_count, 3);
        assert!(config.endpoints().unwrap().is_empty());
        assert_eq!(config.timeout(), None);
        assert_eq!(config.simulator, SimulatorConfig::default());
    }

    #[test]
    fn bad_worker_address() {
        let config: Config = toml::from_str("[manager]\nworkers = [\"nowhere\"]\n").unwrap();
        assert!(config.endpoints().is_err());
    }

    #[test]
    fn explicit_config_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(Config::load(path.to_str()).is_err());

        std::fs::write(&path, "[simulator]\nport = 7000\n").unwrap();
        assert_eq!(Config::load(path.to_str()).unwrap().simulator.port, 7000);
    }
}
