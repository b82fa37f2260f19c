//! Configuration and state locations
//!
//! Every location can be pinned with an environment variable; otherwise the
//! platform's config/data directories are used.

use std::path::{Path, PathBuf};

const APP_DIR: &str = "codepool";

/// File names probed in the config directory, first existing wins
const CONFIG_FILES: &[&str] = &["config.json", "config.json5", "config.toml"];

/// Directory holding the config file (`CODEPOOL_CONFIG_DIR`)
pub fn config_dir() -> PathBuf {
    config_dir_with(&env_var)
}

/// Config file to load (`CODEPOOL_CONFIG`, else the first existing file in [`config_dir`])
pub fn config_path() -> PathBuf {
    config_path_with(&env_var)
}

/// Root for sessions and programs (`CODEPOOL_STATE_DIR`)
pub fn state_dir() -> PathBuf {
    state_dir_with(&env_var)
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn config_dir_with(var: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    match var("CODEPOOL_CONFIG_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => platform_dir(dirs::config_dir(), &[".config"]),
    }
}

fn config_path_with(var: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = var("CODEPOOL_CONFIG") {
        return PathBuf::from(path);
    }
    first_existing(&config_dir_with(var))
}

fn state_dir_with(var: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    match var("CODEPOOL_STATE_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => platform_dir(dirs::data_dir(), &[".local", "share"]),
    }
}

/// `<base>/codepool`, falling back to `~/<home_rel>/codepool`, then `./.codepool`
fn platform_dir(base: Option<PathBuf>, home_rel: &[&str]) -> PathBuf {
    base.or_else(|| {
        dirs::home_dir().map(|home| home_rel.iter().fold(home, |path, part| path.join(part)))
    })
    .map(|dir| dir.join(APP_DIR))
    .unwrap_or_else(|| PathBuf::from(format!(".{}", APP_DIR)))
}

fn first_existing(dir: &Path) -> PathBuf {
    CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .unwrap_or_else(|| dir.join(CONFIG_FILES[0]))
}
