// ── Host settings ────────────────────────────────────────────────────────────

use rumo_sftp::TrackedExtensions;
use rumo_watch::{WatchSettings, WatchStrategy, DEFAULT_DEBOUNCE};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_WATCHED_DIR: &str = "build/type";
pub const DEFAULT_CONFIG_FILE: &str = ".vscode/sftp.json";
/// Config-file events closer together than this are one reload.
pub const DEFAULT_CONFIG_SETTLE: Duration = Duration::from_millis(200);

/// Where things live below the project root and how the watch behaves.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub project_root: PathBuf,
    /// Watched build-output directory, relative to the project root.
    pub watched_dir: PathBuf,
    /// Endpoint config file, relative to the project root.
    pub config_file: PathBuf,
    pub debounce: Duration,
    pub config_settle: Duration,
    pub extensions: TrackedExtensions,
    pub strategy: WatchStrategy,
    /// Watch `config_file` for changes and reload on every edit.
    pub watch_config: bool,
}

impl SyncSettings {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            watched_dir: PathBuf::from(DEFAULT_WATCHED_DIR),
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            debounce: DEFAULT_DEBOUNCE,
            config_settle: DEFAULT_CONFIG_SETTLE,
            extensions: TrackedExtensions::default(),
            strategy: WatchStrategy::Auto,
            watch_config: true,
        }
    }

    pub fn watched_root(&self) -> PathBuf {
        resolve(&self.project_root, &self.watched_dir)
    }

    pub fn config_path(&self) -> PathBuf {
        resolve(&self.project_root, &self.config_file)
    }

    pub fn watch_settings(&self) -> WatchSettings {
        WatchSettings::new(self.watched_root())
            .with_debounce(self.debounce)
            .with_strategy(self.strategy)
            .with_extensions(self.extensions.clone())
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
