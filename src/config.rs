use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Register layout and execution limits of the emulated machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MachineConfig {
    pub keyboard_data: u16,
    pub keyboard_control: u16,
    pub display_data: u16,
    pub display_control: u16,
    /// Resident code reaching this address is back in the monitor.
    pub monitor_entry: u16,
    /// Instructions resident code may run before it is stopped. `None`
    /// means no limit: a run only ends when the code halts or jumps back to
    /// the monitor.
    pub max_resident_steps: Option<u64>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            keyboard_data: 0xD010,
            keyboard_control: 0xD011,
            display_data: 0xD012,
            display_control: 0xD013,
            monitor_entry: 0xFF00,
            max_resident_steps: None,
        }
    }
}

impl MachineConfig {
    pub fn register_addresses(&self) -> [u16; 4] {
        [
            self.keyboard_data,
            self.keyboard_control,
            self.display_data,
            self.display_control,
        ]
    }

    pub fn is_register(&self, address: u16) -> bool {
        self.register_addresses().contains(&address)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_sessions: usize,
    pub require_api_key: bool,
    /// Step budget for each run inside a session. Always bounded, since a
    /// session has nobody at a keyboard to break out of a loop.
    pub max_resident_steps: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3030,
            max_sessions: 16,
            require_api_key: true,
            max_resident_steps: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HostConfig {
    pub machine: MachineConfig,
    pub server: ServerConfig,
    pub log_level: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            machine: MachineConfig::default(),
            server: ServerConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl HostConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: HostConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Machine settings for server sessions: the server's step budget
    /// replaces whatever the machine section says.
    pub fn session_machine(&self) -> MachineConfig {
        MachineConfig {
            max_resident_steps: Some(self.server.max_resident_steps),
            ..self.machine.clone()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let registers = self.machine.register_addresses();
        for (i, a) in registers.iter().enumerate() {
            if registers[i + 1..].contains(a) {
                return Err(ConfigError::Invalid(format!(
                    "register address ${:04X} is used twice",
                    a
                )));
            }
        }
        if self.server.max_sessions == 0 {
            return Err(ConfigError::Invalid("max_sessions must be at least 1".to_string()));
        }
        if self.server.max_resident_steps == 0 {
            return Err(ConfigError::Invalid("server.max_resident_steps must be at least 1".to_string()));
        }
        Ok(())
    }
}
