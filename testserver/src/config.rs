use anyhow::{Context, Result};
use noodle_core::endpoint::Endpoint;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Default, Clone, Debug, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read config file '{}'", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file '{}'", path.display()))
    }
}
