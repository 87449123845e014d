use crate::domain::config::{
    CommHubConfig, DeviceConfig, GlobalConfig, SerialConfig, TcpClientConfig, TcpServerConfig,
    TransportConfig,
};
use crate::domain::error::{CommHubError, CommHubResult};
use std::fs;
use std::path::{Path, PathBuf};

const PROJECT_DIR: &str = ".commhub";
const CONFIG_FILE: &str = "config.toml";

/// Configuration manager
pub struct ConfigManager {
    global_config_path: PathBuf,
    project_config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create new configuration manager
    pub fn new() -> CommHubResult<Self> {
        let global_config_path = Self::get_global_config_path()?;
        let project_config_path = Self::find_project_config_path();

        Ok(Self {
            global_config_path,
            project_config_path,
        })
    }

    /// Manager rooted at explicit paths
    pub fn with_paths(global_config_path: PathBuf, project_config_path: Option<PathBuf>) -> Self {
        Self {
            global_config_path,
            project_config_path,
        }
    }

    /// Load global settings, then merge project devices on top
    pub fn load_config(&self) -> CommHubResult<CommHubConfig> {
        let mut config = CommHubConfig::default();

        if self.global_config_path.exists() {
            let global_config = self.load_config_from_path(&self.global_config_path)?;
            config.global = global_config.global;
            config.event_bus = global_config.event_bus;
            config.broadcaster = global_config.broadcaster;
            config.observer_server = global_config.observer_server;
            config.devices = global_config.devices;
        }

        if let Some(project_path) = &self.project_config_path {
            if project_path.exists() {
                let project_config = self.load_config_from_path(project_path)?;
                for device in project_config.devices {
                    // Project presets shadow global ones with the same name.
                    config.devices.retain(|d| d.name != device.name);
                    config.devices.push(device);
                }
            }
        }

        Ok(config)
    }

    /// Save configuration to files
    pub fn save_config(&self, config: &CommHubConfig) -> CommHubResult<()> {
        match &self.project_config_path {
            Some(project_path) => {
                let global_config = CommHubConfig {
                    devices: Vec::new(),
                    ..config.clone()
                };
                self.save_config_to_path(&self.global_config_path, &global_config)?;

                let project_config = CommHubConfig {
                    devices: config.devices.clone(),
                    ..CommHubConfig::default()
                };
                self.save_config_to_path(project_path, &project_config)
            }
            None => self.save_config_to_path(&self.global_config_path, config),
        }
    }

    /// Get global configuration path
    fn get_global_config_path() -> CommHubResult<PathBuf> {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .ok_or_else(|| CommHubError::Config {
                message: "Could not determine home directory".to_string(),
            })?;

        Ok(base.join("commhub").join(CONFIG_FILE))
    }

    /// Find project configuration path by walking up directory tree
    fn find_project_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut path = current_dir.as_path();

        loop {
            let config_path = path.join(PROJECT_DIR).join(CONFIG_FILE);
            if config_path.exists() {
                return Some(config_path);
            }

            path = path.parent()?;
        }
    }

    /// Load configuration from specific path
    pub fn load_config_from_path(&self, path: &Path) -> CommHubResult<CommHubConfig> {
        let content = fs::read_to_string(path).map_err(|e| CommHubError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        toml::from_str(&content).map_err(|e| CommHubError::Config {
            message: format!("Failed to parse config file {}: {}", path.display(), e),
        })
    }

    /// Save configuration to specific path
    pub fn save_config_to_path(&self, path: &Path, config: &CommHubConfig) -> CommHubResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CommHubError::Config {
                message: format!("Failed to create config directory: {}", e),
            })?;
        }

        let content = toml::to_string_pretty(config).map_err(|e| CommHubError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| CommHubError::Config {
            message: format!("Failed to write config file {}: {}", path.display(), e),
        })
    }

    /// Create a project configuration with one preset per transport kind
    pub fn init_project_config(&self, path: &Path) -> CommHubResult<PathBuf> {
        let config_file = path.join(PROJECT_DIR).join(CONFIG_FILE);

        if config_file.exists() {
            return Err(CommHubError::Config {
                message: "Project configuration already exists".to_string(),
            });
        }

        let mut plc = TcpClientConfig::new("192.168.1.100", 502);
        plc.auto_reconnect = true;

        let default_config = CommHubConfig {
            global: GlobalConfig::default(),
            devices: vec![
                DeviceConfig {
                    name: "example_serial".to_string(),
                    description: "Example serial device".to_string(),
                    hex_mode: false,
                    transport: TransportConfig::Serial(SerialConfig::new("/dev/ttyUSB0", 9600)),
                },
                DeviceConfig {
                    name: "example_tcp".to_string(),
                    description: "Example TCP device with reconnect".to_string(),
                    hex_mode: true,
                    transport: TransportConfig::TcpClient(plc),
                },
                DeviceConfig {
                    name: "example_listener".to_string(),
                    description: "Example TCP listener".to_string(),
                    hex_mode: false,
                    transport: TransportConfig::TcpServer(TcpServerConfig::new("0.0.0.0", 9000)),
                },
            ],
            ..CommHubConfig::default()
        };

        self.save_config_to_path(&config_file, &default_config)?;
        Ok(config_file)
    }

    /// Get the current project config path (if any)
    pub fn get_project_config_path(&self) -> Option<&PathBuf> {
        self.project_config_path.as_ref()
    }

    /// Get the global config path
    pub fn get_global_config_path_ref(&self) -> &PathBuf {
        &self.global_config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager_in(dir: &TempDir, project: bool) -> ConfigManager {
        let project_path = project.then(|| dir.path().join(PROJECT_DIR).join(CONFIG_FILE));
        ConfigManager::with_paths(dir.path().join("global").join(CONFIG_FILE), project_path)
    }

    #[test]
    fn test_load_default_config() {
        let dir = TempDir::new().unwrap();
        let config = manager_in(&dir, false).load_config().unwrap();

        assert_eq!(config.global.log_level, "info");
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_init_project_config() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, true);

        let config_file = manager.init_project_config(dir.path()).unwrap();
        assert!(config_file.exists());
        assert!(manager.init_project_config(dir.path()).is_err());

        let config = manager.load_config().unwrap();
        assert_eq!(config.devices.len(), 3);
        assert!(matches!(config.devices[1].transport, TransportConfig::TcpClient(_)));
    }

    #[test]
    fn test_project_devices_shadow_global() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, true);

        let device = |host: &str| DeviceConfig {
            name: "plc".to_string(),
            description: String::new(),
            hex_mode: false,
            transport: TransportConfig::TcpClient(TcpClientConfig::new(host, 502)),
        };
        manager
            .save_config_to_path(
                manager.get_global_config_path_ref(),
                &CommHubConfig {
                    devices: vec![device("10.0.0.1")],
                    ..CommHubConfig::default()
                },
            )
            .unwrap();
        manager
            .save_config_to_path(
                manager.get_project_config_path().unwrap(),
                &CommHubConfig {
                    devices: vec![device("10.0.0.2")],
                    ..CommHubConfig::default()
                },
            )
            .unwrap();

        let config = manager.load_config().unwrap();
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].transport.endpoint(), "10.0.0.2:502");
    }
}
