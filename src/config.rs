use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::controller::ControllerSettings;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Owner of every session and set this install writes.
    pub user: String,
    /// End rest automatically after this many seconds.
    pub auto_rest_secs: Option<u64>,
    pub store_timeout_secs: u64,
    pub default_rpe: Option<u8>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user: default_user(),
            auto_rest_secs: None,
            store_timeout_secs: 15,
            default_rpe: Some(8),
            log_level: "info".to_string(),
        }
    }
}

fn default_user() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| "local".to_string())
}

impl From<&Config> for ControllerSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            auto_rest_secs: cfg.auto_rest_secs,
            store_timeout_secs: cfg.store_timeout_secs.max(1),
            default_rpe: cfg.default_rpe,
        }
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = if let Some(pd) = ProjectDirs::from("", "", "setlog") {
            pd.config_dir().join("config.json")
        } else {
            PathBuf::from("setlog_config.json")
        };
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        if let Ok(bytes) = fs::read(&self.path) {
            if let Ok(cfg) = serde_json::from_slice::<Config>(&bytes) {
                return cfg;
            }
        }
        Config::default()
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg).unwrap_or_default();
        fs::write(&self.path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config::default();
        store.save(&cfg).unwrap();
        let loaded = store.load();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn save_and_load_custom_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config {
            user: "alice".into(),
            auto_rest_secs: Some(120),
            store_timeout_secs: 5,
            default_rpe: None,
            log_level: "debug".into(),
        };
        store.save(&cfg).unwrap();
        let loaded = store.load();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn missing_or_corrupt_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::with_path(&path);
        assert_eq!(store.load(), Config::default());

        fs::write(&path, b"{ not json").unwrap();
        assert_eq!(store.load(), Config::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, br#"{ "auto_rest_secs": 90 }"#).unwrap();

        let cfg = FileConfigStore::with_path(&path).load();
        assert_eq!(cfg.auto_rest_secs, Some(90));
        assert_eq!(cfg.store_timeout_secs, 15);
        assert_eq!(cfg.default_rpe, Some(8));
    }

    #[test]
    fn controller_settings_from_config() {
        let cfg = Config {
            auto_rest_secs: Some(60),
            store_timeout_secs: 0,
            ..Config::default()
        };
        let settings = ControllerSettings::from(&cfg);
        assert_eq!(settings.auto_rest_secs, Some(60));
        assert_eq!(settings.store_timeout_secs, 1);
        assert_eq!(settings.default_rpe, Some(8));
    }
}
