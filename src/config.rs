//! Settings file handling

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::models::TenantId;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Path to the SQLite database
    pub database: PathBuf,
    /// Tenant whose data every command operates on
    pub tenant: TenantId,
    /// Fallback tracing filter when RUST_LOG is unset
    pub log_level: String,
    /// Decimal places for printed money values
    pub display_scale: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: PathBuf::from("kitchen_bom.db"),
            tenant: 1,
            log_level: "info".to_string(),
            display_scale: 4,
        }
    }
}

impl Settings {
    /// Read settings from a TOML file, or use defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid settings in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.database, PathBuf::from("kitchen_bom.db"));
        assert_eq!(settings.tenant, 1);
        assert_eq!(settings.display_scale, 4);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = Settings::parse("tenant = 7\ndisplay_scale = 2\n").unwrap();
        assert_eq!(settings.tenant, 7);
        assert_eq!(settings.display_scale, 2);
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(Settings::parse("databse = \"x.db\"\n").is_err());
    }
}
