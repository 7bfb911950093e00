//! Configuration file loading

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tether_namespace::ManagerConfig;
use tether_rtnl::RtnlConfig;

/// Everything `--config` may set; missing sections keep their defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub manager: ManagerConfig,
    pub rtnl: RtnlConfig,
}

impl Settings {
    /// Defaults, or the contents of `path` when given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let settings: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        settings.manager.validate().context("Invalid manager config")?;
        settings.rtnl.validate().context("Invalid rtnl config")?;
        tracing::debug!(path = %path.display(), ?settings, "Loaded configuration");
        Ok(settings)
    }
}
