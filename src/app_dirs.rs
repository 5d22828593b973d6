use directories::ProjectDirs;
use std::path::PathBuf;

const APP_NAME: &str = "key-crusher";

/// Centralized application directory resolution
pub struct AppDirs;

impl AppDirs {
    /// `$HOME/.local/state/key-crusher`, or the platform data dir without `HOME`.
    pub fn state_dir() -> Option<PathBuf> {
        if let Ok(home) = std::env::var("HOME") {
            Some(
                PathBuf::from(home)
                    .join(".local")
                    .join("state")
                    .join(APP_NAME),
            )
        } else {
            ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_local_dir().to_path_buf())
        }
    }

    pub fn db_path() -> Option<PathBuf> {
        Self::state_dir().map(|dir| dir.join("challenges.db"))
    }

    pub fn log_path() -> Option<PathBuf> {
        Self::state_dir().map(|dir| dir.join("key-crusher.log"))
    }

    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_live_under_the_state_dir() {
        if let Some(state) = AppDirs::state_dir() {
            assert!(state.ends_with(APP_NAME));
            assert_eq!(AppDirs::db_path().unwrap().parent(), Some(state.as_path()));
            assert_eq!(AppDirs::log_path().unwrap().parent(), Some(state.as_path()));
        }
    }
}
