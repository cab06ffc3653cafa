use std::path::PathBuf;

/// Name of the primary configuration file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

const DIR_NAME: &str = ".tom";

/// Resolve the config directory from the process environment.
#[must_use]
pub fn config_dir() -> PathBuf {
    config_dir_with_env(|key| std::env::var(key).ok())
}

/// Resolve the config directory using `env` for lookups.
///
/// `TOM_CONFIG_DIR` wins. Under `sudo` the invoking user's directory is used so
/// that `sudo tomclient ...` shares the same token as the unprivileged user.
pub fn config_dir_with_env(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    let var = |key: &str| env(key).filter(|v| !v.is_empty());

    if let Some(dir) = var("TOM_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(user) = var("SUDO_USER") {
        return var("SUDO_HOME").map_or_else(
            || PathBuf::from("/home").join(user).join(DIR_NAME),
            |home| PathBuf::from(home).join(DIR_NAME),
        );
    }
    var("HOME").map_or_else(|| PathBuf::from(DIR_NAME), |home| PathBuf::from(home).join(DIR_NAME))
}
