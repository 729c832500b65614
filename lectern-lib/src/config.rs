use std::{fs, io, path::PathBuf, sync::Arc};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::fs::config_dir;

const FILE_NAME: &str = "lectern.toml";

/// Handle to the core configuration
pub type Cfg = Arc<RwLock<CoreConfig>>;

/// The core configuration, serialized to TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Shortest plaintext password accepted when provisioning or rotating a credential
    pub min_password_len: usize,
    /// Avatar shown for roster entries that don't carry one of their own
    pub default_avatar: String,
    /// Location of the database file. Falls back to the XDG state directory.
    pub database_path: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            min_password_len: 6,
            default_avatar: "/images/default-avatar.png".into(),
            database_path: None,
        }
    }
}

impl CoreConfig {
    pub fn load() -> io::Result<Self> {
        let path = config_dir()?.join(FILE_NAME);

        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            Ok(toml::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring unreadable config at {}: {err}", path.display());
                Self::default()
            }))
        } else {
            let cfg = Self::default();
            cfg.save()?;
            Ok(cfg)
        }
    }

    pub fn save(&self) -> io::Result<()> {
        let contents = toml::to_string_pretty(self).map_err(io::Error::other)?;

        fs::write(config_dir()?.join(FILE_NAME), contents)
    }

    pub fn into_handle(self) -> Cfg {
        Arc::new(RwLock::new(self))
    }

    #[cfg(test)]
    pub(crate) fn mock() -> Self {
        Self::default()
    }
}
