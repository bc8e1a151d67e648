//! Configuration.
//!
//! ```toml
//! max_attached = 8
//!
//! [[databases]]
//! name = "Super Nintendo"
//! path = "/data/roms/snes.sqlite"
//!
//! [catalog]            # optional, replaces the built-in game catalog
//! root_table = "Game"
//! key_column = "GameId"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::catalog::{Catalog, CatalogDef};
use crate::error::{RomqlError, RomqlResult};

/// A database to attach at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseEntry {
    /// Display name; sanitized into the schema name.
    pub name: String,
    pub path: PathBuf,
}

/// Main configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RomqlConfig {
    /// Upper bound on attachments per container. Only ever lowers the
    /// engine's own limit.
    pub max_attached: Option<usize>,

    #[serde(default)]
    pub databases: Vec<DatabaseEntry>,

    /// Custom catalog; `None` uses [`Catalog::games`].
    pub catalog: Option<CatalogDef>,
}

impl RomqlConfig {
    /// Create a new configuration builder
    pub fn builder() -> RomqlConfigBuilder {
        RomqlConfigBuilder::default()
    }

    /// `<config dir>/romql/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("romql").join("config.toml"))
    }

    pub fn from_toml(text: &str) -> RomqlResult<Self> {
        toml::from_str(text).map_err(|e| RomqlError::Config(e.to_string()))
    }

    /// Load an explicit config file; it must exist.
    pub fn load(path: &Path) -> RomqlResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
            .map_err(|e| RomqlError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load the default config file, or defaults when there is none.
    pub fn load_default() -> RomqlResult<Self> {
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// The validated catalog this configuration selects.
    pub fn catalog(&self) -> RomqlResult<Catalog> {
        match &self.catalog {
            Some(def) => Catalog::from_def(def.clone()),
            None => Ok(Catalog::games()),
        }
    }
}

/// Builder for RomqlConfig
#[derive(Debug, Default)]
pub struct RomqlConfigBuilder {
    config: RomqlConfig,
}

impl RomqlConfigBuilder {
    pub fn max_attached(mut self, limit: usize) -> Self {
        self.config.max_attached = Some(limit);
        self
    }

    /// Attach `path` under `name` at startup.
    pub fn database(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.config.databases.push(DatabaseEntry {
            name: name.into(),
            path: path.into(),
        });
        self
    }

    pub fn catalog(mut self, def: CatalogDef) -> Self {
        self.config.catalog = Some(def);
        self
    }

    /// Build the configuration
    pub fn build(self) -> RomqlConfig {
        self.config
    }
}
