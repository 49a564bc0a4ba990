use anyhow::{Context, Result};
use directories::ProjectDirs;
use noodle_core::endpoint::Endpoint;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Default, Clone, Debug, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

impl AppConfig {
    /// Loads `path`, or `config.json` in the user config directory when no path is given.
    ///
    /// A missing default file is an empty config; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read config file '{}'", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file '{}'", path.display()))
    }

    fn parse(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// `host:port` targets, in file order.
    pub fn targets(&self) -> Vec<String> {
        self.endpoints.iter().map(Endpoint::target).collect()
    }
}

fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "noodle", "noodle").map(|dirs| dirs.config_dir().join("config.json"))
}
