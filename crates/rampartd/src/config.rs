//! rampart.toml configuration parser.
//!
//! ```toml
//! [server]
//! port = 8480
//!
//! [blue_green]
//! health_check_url = "http://{slot}.app.internal:3000"
//!
//! [canary]
//! metrics_endpoint = "http://prometheus-adapter:9090"
//!
//! [hooks]
//! deploy_url = "http://deployer.internal/deploy"
//! switch_url = "http://router.internal/switch"
//! split_url = "http://router.internal/split"
//!
//! [slots]
//! active = "blue"
//! blue_version = "v1"
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use rampart_rollout::{BlueGreenConfig, BlueGreenState, CanaryConfig, ConfigError, Slot};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub blue_green: BlueGreenConfig,
    pub canary: CanaryConfig,
    pub hooks: HooksConfig,
    pub slots: SlotsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8480,
        }
    }
}

/// Webhook endpoints behind the deploy and traffic capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub deploy_url: String,
    pub switch_url: String,
    pub split_url: String,
    pub timeout_secs: u64,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            deploy_url: "http://localhost:8081/deploy".to_string(),
            switch_url: "http://localhost:8082/switch".to_string(),
            split_url: "http://localhost:8082/split".to_string(),
            timeout_secs: 30,
        }
    }
}

impl HooksConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Slot layout at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotsConfig {
    pub active: Slot,
    pub blue_version: String,
    pub green_version: String,
}

impl Default for SlotsConfig {
    fn default() -> Self {
        Self {
            active: Slot::Blue,
            blue_version: String::new(),
            green_version: String::new(),
        }
    }
}

impl SlotsConfig {
    pub fn initial_state(&self) -> BlueGreenState {
        BlueGreenState::new(self.active, &self.blue_version, &self.green_version)
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: DaemonConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.blue_green.validate()?;
        self.canary.validate()?;
        if self.hooks.timeout_secs == 0 {
            return Err(ConfigError::Zero("hooks.timeout_secs"));
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
