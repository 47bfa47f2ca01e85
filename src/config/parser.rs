use super::Config;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "vigil.yaml";

pub struct Parser;

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Default config location: `<config_dir>/vigil/vigil.yaml`.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vigil").join(CONFIG_FILE_NAME))
    }

    /// Find the config file to use.
    ///
    /// An explicit path must exist. Without one, the default location is used
    /// when present; `None` means "run with defaults".
    pub fn find_config_file(&self, explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file '{}' does not exist",
                    path.display()
                )));
            }
            return Ok(Some(path.to_path_buf()));
        }

        Ok(Self::default_config_path().filter(|p| p.exists()))
    }

    /// Load config from file path
    pub fn load_config<P: AsRef<Path>>(&self, path: P) -> Result<Config> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        self.parse_config(&content)
    }

    /// Parse and validate config from YAML text. Empty text yields defaults.
    pub fn parse_config(&self, content: &str) -> Result<Config> {
        let config: Config = if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Resolve and load the config in one step.
    ///
    /// Returns the config together with the file it came from.
    pub fn load(&self, explicit: Option<&Path>) -> Result<(Config, Option<PathBuf>)> {
        match self.find_config_file(explicit)? {
            Some(path) => {
                let config = self.load_config(&path)?;
                Ok((config, Some(path)))
            }
            None => Ok((Config::default(), None)),
        }
    }
}
