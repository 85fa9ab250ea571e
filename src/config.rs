//! Optional TOML defaults for the mount surface.
//!
//! The file supplies what would otherwise be repeated on every command
//! line: extra pass-through options, the name-policy switches, and the
//! log filter. Command-line values win over the file.

use std::fmt;
use std::io;
use std::path::Path;

use serde::Deserialize;

use crate::resolve::NamePolicy;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub mount: MountSection,
    pub names: NamesSection,
    pub log: LogSection,
}

/// Extra `-o` options appended to every mount.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MountSection {
    pub options: Vec<String>,
}

/// Name-policy switches; see [`NamePolicy`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NamesSection {
    pub fat_safe: bool,
    pub fat_lowercase: bool,
    pub casefold: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSection {
    pub filter: String,
}

impl Default for LogSection {
    fn default() -> Self {
        LogSection { filter: "info".to_owned() }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "cannot read config: {err}"),
            ConfigError::Parse(err) => write!(f, "cannot parse config: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Config::from_str(&text)
    }

    pub fn from_str(text: &str) -> Result<Config, ConfigError> {
        toml::from_str(text).map_err(ConfigError::Parse)
    }

    pub fn name_policy(&self) -> NamePolicy {
        NamePolicy {
            fat_safe: self.names.fat_safe,
            fat_lowercase: self.names.fat_lowercase,
            casefold_perm: self.names.casefold,
            decap: false,
        }
    }
}
