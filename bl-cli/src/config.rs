use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{ActionError, ConfigError, ConfigIssue};

pub const CONFIG_EXAMPLE: &str = r#"[Default]
key = "hp"

[Name]
hp = "My Headphones"

[Address]
hp = "AA:BB:CC:DD:EE:FF"
"#;

#[derive(Debug, Deserialize)]
pub struct DeviceConfig {
    #[serde(rename = "Default", default)]
    pub default: DefaultSection,
    #[serde(rename = "Name", default)]
    pub names: BTreeMap<String, String>,
    #[serde(rename = "Address", default)]
    pub addresses: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DefaultSection {
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub key: String,
    pub name: String,
    pub address: String,
}

fn address_regex() -> &'static Regex {
    static ADDRESS: OnceLock<Regex> = OnceLock::new();
    ADDRESS.get_or_init(|| {
        Regex::new(r"^([0-9A-F]{2}:){5}[0-9A-F]{2}$").expect("address pattern is valid")
    })
}

pub fn is_valid_address(address: &str) -> bool {
    address_regex().is_match(address)
}

/// `<user config dir>/bl/config.toml`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bl").join("config.toml"))
}

impl DeviceConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| match source.kind() {
            ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
            _ => ConfigError::Read {
                path: path.to_path_buf(),
                source,
            },
        })?;

        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let issues = config.validate();
        if !issues.is_empty() {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                issues,
            });
        }

        tracing::debug!("Loaded {} device(s) from {}", config.names.len(), path.display());
        Ok(config)
    }

    /// Every broken rule, in file order. Empty means the config is usable.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        // Compared as written, like the [Name] and [Address] keys
        let default = self.default.key.as_str();

        if default.trim().is_empty() {
            issues.push(ConfigIssue::EmptyDefaultKey);
        } else {
            if !self.names.contains_key(default) {
                issues.push(ConfigIssue::DefaultWithoutName(default.to_string()));
            }
            if !self.addresses.contains_key(default) {
                issues.push(ConfigIssue::DefaultWithoutAddress(default.to_string()));
            }
        }

        for key in self.names.keys() {
            if !self.addresses.contains_key(key) {
                issues.push(ConfigIssue::NameWithoutAddress(key.clone()));
            }
        }
        for (key, address) in &self.addresses {
            if !self.names.contains_key(key) {
                issues.push(ConfigIssue::AddressWithoutName(key.clone()));
            }
            if !is_valid_address(address) {
                issues.push(ConfigIssue::MalformedAddress {
                    key: key.clone(),
                    address: address.clone(),
                });
            }
        }

        issues
    }

    pub fn default_key(&self) -> &str {
        &self.default.key
    }

    pub fn device(&self, key: &str) -> Result<Device, ActionError> {
        match (self.names.get(key), self.addresses.get(key)) {
            (Some(name), Some(address)) => Ok(Device {
                key: key.to_string(),
                name: name.clone(),
                address: address.clone(),
            }),
            _ => Err(ActionError::UnknownDevice(key.to_string())),
        }
    }

    pub fn devices(&self) -> Vec<Device> {
        self.names
            .keys()
            .filter_map(|key| self.device(key).ok())
            .collect()
    }
}
