//! BlueChat CLI Configuration Management
//!
//! Configuration is layered with figment, lowest priority first:
//! - Default values
//! - `bluechat.toml` in the working directory
//! - `~/.bluechat/config.toml`
//! - An explicit `--config` file
//! - Environment variables (`BLUECHAT_*`, nested keys split on `__`)

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use bluechat_core::{Capability, CapabilityTier, RuntimePermissions};
use bluechat_rfcomm::RfcommConfig;

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the BlueChat CLI application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// RFCOMM transport configuration
    pub rfcomm: RfcommConfig,

    /// CLI-specific configuration
    pub cli: CliConfig,

    /// Capability grants handed to the session controller
    pub permissions: PermissionConfig,
}

/// Which adapter implementation backs the session controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process radio private to this process; only `status`, `devices`
    /// and `demo` are meaningful on it
    Memory,
    /// Host adapter through BlueZ
    Bluez,
}

impl Default for Backend {
    /// BlueZ when this build can reach it, otherwise the in-process radio
    fn default() -> Self {
        if cfg!(all(target_os = "linux", feature = "bluez")) {
            Backend::Bluez
        } else {
            Backend::Memory
        }
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "bluez" => Ok(Backend::Bluez),
            other => Err(ConfigError::Validation(format!("Unknown backend: {}", other))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Memory => write!(f, "memory"),
            Backend::Bluez => write!(f, "bluez"),
        }
    }
}

/// CLI-specific configuration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Adapter backend
    pub backend: Backend,

    /// Prompt shown in the interactive chat
    pub prompt: String,

    /// Name of the local adapter on the in-memory radio
    pub adapter_name: String,

    /// Address of the local adapter on the in-memory radio
    pub adapter_address: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            prompt: "bluechat> ".to_string(),
            adapter_name: "bluechat".to_string(),
            adapter_address: "00:00:00:00:00:01".to_string(),
        }
    }
}

/// Permission tier and explicit grants
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    pub tier: CapabilityTier,

    /// Capabilities granted up front when the tier is `runtime_granted`
    pub granted: Vec<Capability>,
}

impl PermissionConfig {
    /// Build the permission gate described by this section
    pub fn gate(&self) -> RuntimePermissions {
        let permissions = RuntimePermissions::new(self.tier);
        for capability in &self.granted {
            permissions.grant(*capability);
        }
        permissions
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration with the standard priority order
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file("bluechat.toml"));

        if let Some(path) = Self::default_config_path() {
            figment = figment.merge(Toml::file(path));
        }
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::FileSystem(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        Self::extract(figment.merge(Env::prefixed("BLUECHAT_").split("__")))
    }

    /// Load configuration from a specific file path only
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()));
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment
            .extract()
            .map_err(|e| ConfigError::Loading(format!("Failed to load configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// `~/.bluechat/config.toml`, when a home directory is known
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".bluechat").join("config.toml"))
    }

    /// Save configuration to a specific file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::FileSystem(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), toml_string)
            .map_err(|e| ConfigError::FileSystem(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rfcomm
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.cli.backend == Backend::Memory && self.cli.adapter_address.is_empty() {
            return Err(ConfigError::Validation(
                "adapter_address must be set for the memory backend".to_string(),
            ));
        }

        if self.permissions.tier == CapabilityTier::Legacy && !self.permissions.granted.is_empty() {
            return Err(ConfigError::Validation(
                "granted capabilities only apply to the runtime_granted tier".to_string(),
            ));
        }

        Ok(())
    }

    /// Example configuration file content
    pub fn example_config() -> String {
        let example = AppConfig {
            permissions: PermissionConfig {
                tier: CapabilityTier::RuntimeGranted,
                granted: vec![Capability::Connect, Capability::Scan],
            },
            ..Default::default()
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
