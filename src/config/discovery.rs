//! Config discovery for tailsource.
//!
//! Walks parent directories to find `tailsource.yaml` and checks for global config
//! at `~/.config/tailsource/config.yaml`.

use std::path::{Path, PathBuf};

/// Project config filename to search for in parent directories.
pub const PROJECT_CONFIG_NAME: &str = "tailsource.yaml";

/// Global config filename within the tailsource config directory.
pub const GLOBAL_CONFIG_NAME: &str = "config.yaml";

/// Result of config discovery.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryResult {
    /// Directory containing `tailsource.yaml`.
    pub project_root: Option<PathBuf>,
    /// Full path to the project config file.
    pub project_config: Option<PathBuf>,
    /// Full path to the global config file.
    pub global_config: Option<PathBuf>,
}

impl DiscoveryResult {
    /// Returns true if any config was found (project or global).
    pub fn has_config(&self) -> bool {
        self.project_config.is_some() || self.global_config.is_some()
    }

    /// The file to load. A project config shadows the global one completely.
    pub fn winning_config(&self) -> Option<&Path> {
        self.project_config
            .as_deref()
            .or(self.global_config.as_deref())
    }
}

fn is_file(path: &Path) -> bool {
    path.try_exists().unwrap_or(false) && path.is_file()
}

/// Discover config files starting from the current working directory.
pub fn discover() -> DiscoveryResult {
    match std::env::current_dir() {
        Ok(dir) => discover_from(&dir.canonicalize().unwrap_or(dir)).0,
        Err(_) => discover_global(),
    }
}

fn discover_global() -> DiscoveryResult {
    let mut result = DiscoveryResult::default();
    if let Some(config_dir) = dirs::config_dir() {
        let global_config_path = config_dir.join("tailsource").join(GLOBAL_CONFIG_NAME);
        if is_file(&global_config_path) {
            result.global_config = Some(global_config_path);
        }
    }
    result
}

/// Discover config files starting from `start`.
///
/// Also returns every directory that was searched, for `-v` output.
pub fn discover_from(start: &Path) -> (DiscoveryResult, Vec<PathBuf>) {
    let mut result = discover_global();
    let mut searched_paths = Vec::new();

    for ancestor in start.ancestors() {
        searched_paths.push(ancestor.to_path_buf());

        let config_path = ancestor.join(PROJECT_CONFIG_NAME);
        if is_file(&config_path) {
            result.project_root = Some(ancestor.to_path_buf());
            result.project_config = Some(config_path);
            break;
        }
    }

    (result, searched_paths)
}
