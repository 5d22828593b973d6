use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::app_dirs::AppDirs;
use crate::challenge::{ChallengeConfig, COUNTDOWN_TICKS, DEFAULT_BATCH};
use crate::daily::DEFAULT_REFERENCE_UTC_OFFSET_MINUTES;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub classic_duration_secs: u64,
    pub countdown_ticks: u32,
    pub initial_batch: usize,
    pub max_word_length: Option<usize>,
    /// Remote word endpoint; the embedded bank is used when unset.
    pub word_supply_url: Option<String>,
    pub reference_utc_offset_minutes: i32,
    /// Identity results are recorded under. Unset means local only.
    pub identity: Option<String>,
    pub line_width: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            classic_duration_secs: 60,
            countdown_ticks: COUNTDOWN_TICKS,
            initial_batch: DEFAULT_BATCH,
            max_word_length: None,
            word_supply_url: None,
            reference_utc_offset_minutes: DEFAULT_REFERENCE_UTC_OFFSET_MINUTES,
            identity: None,
            line_width: 60,
        }
    }
}

impl Config {
    pub fn classic_challenge(&self) -> ChallengeConfig {
        ChallengeConfig::classic(self.classic_duration_secs * 1000)
            .with_countdown_ticks(self.countdown_ticks)
            .with_initial_batch(self.initial_batch)
    }

    pub fn daily_challenge(&self) -> ChallengeConfig {
        ChallengeConfig::daily().with_countdown_ticks(self.countdown_ticks)
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
        let path = AppDirs::config_path().unwrap_or_else(|| PathBuf::from("key_crusher_config.json"));
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
        let Ok(bytes) = fs::read(&self.path) else {
            return Config::default();
        };
        match serde_json::from_slice::<Config>(&bytes) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring malformed config");
                Config::default()
            }
        }
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg)?;
        fs::write(&self.path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::Mode;
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
            classic_duration_secs: 30,
            countdown_ticks: 0,
            initial_batch: 80,
            max_word_length: Some(7),
            word_supply_url: Some("https://words.example/api".into()),
            reference_utc_offset_minutes: 60,
            identity: Some("typist".into()),
            line_width: 40,
        };
        store.save(&cfg).unwrap();
        let loaded = store.load();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"classic_duration_secs": 15}"#).unwrap();

        let loaded = FileConfigStore::with_path(&path).load();
        assert_eq!(loaded.classic_duration_secs, 15);
        assert_eq!(loaded.initial_batch, DEFAULT_BATCH);
    }

    #[test]
    fn malformed_file_loads_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();

        assert_eq!(FileConfigStore::with_path(&path).load(), Config::default());
    }

    #[test]
    fn challenge_configs_follow_settings() {
        let cfg = Config {
            classic_duration_secs: 15,
            countdown_ticks: 1,
            ..Config::default()
        };

        let classic = cfg.classic_challenge();
        assert_eq!(classic.mode, Mode::Classic);
        assert_eq!(classic.duration_ms, Some(15_000));
        assert_eq!(classic.countdown_ticks, 1);

        let daily = cfg.daily_challenge();
        assert_eq!(daily.mode, Mode::Daily);
        assert_eq!(daily.duration_ms, None);
    }
}
