//! Node-agent client configuration (`talosconfig`)
//!
//! Only the fields needed to dial are read: the current context name and,
//! per context, the API endpoints plus base64-encoded PEM credentials.

use crate::{Result, TalosmonError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TalosConfig {
    #[serde(default)]
    pub context: String,

    #[serde(default)]
    pub contexts: BTreeMap<String, TalosContext>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TalosContext {
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub ca: String,
    #[serde(default)]
    pub crt: String,
    #[serde(default)]
    pub key: String,
}

impl TalosConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TalosmonError::RpcDialFailed(format!(
                "failed to read client config {}: {}",
                path.display(),
                e
            ))
        })?;

        let config = Self::from_yaml(&raw)?;
        debug!(path = %path.display(), contexts = config.contexts.len(), "Loaded client config");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| {
            TalosmonError::RpcDialFailed(format!("failed to parse client config: {}", e))
        })
    }

    /// The named context, or the file's current one when `name` is `None`.
    pub fn context(&self, name: Option<&str>) -> Result<&TalosContext> {
        let name = name.unwrap_or(&self.context);
        if name.is_empty() {
            return Err(TalosmonError::RpcDialFailed(
                "client config has no current context".to_string(),
            ));
        }

        self.contexts.get(name).ok_or_else(|| {
            TalosmonError::RpcDialFailed(format!("client config has no context {:?}", name))
        })
    }
}
