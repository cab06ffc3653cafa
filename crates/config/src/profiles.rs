//! Named configuration profiles.
//!
//! A profile is a `config-<name>.json` file next to `config.json`. The active
//! profile is selected by writing `{"include": "config-<name>.json"}` into
//! `config.json`.

use crate::schema::{Config, validate_include};
use crate::{fs, paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tomclient_types::{Result, TomError};

const PREFIX: &str = "config-";
const SUFFIX: &str = ".json";

/// `prod` → `config-prod.json`; already-qualified names pass through.
#[must_use]
pub fn file_name(profile: &str) -> String {
    let mut name = profile.to_string();
    if !name.starts_with(PREFIX) {
        name.insert_str(0, PREFIX);
    }
    if !name.ends_with(SUFFIX) {
        name.push_str(SUFFIX);
    }
    name
}

fn display_name(file: &str) -> &str {
    let file = file.strip_suffix(SUFFIX).unwrap_or(file);
    file.strip_prefix(PREFIX).unwrap_or(file)
}

/// Profile names found in `dir`, sorted. A missing directory yields none.
///
/// # Errors
///
/// Returns [`TomError::Config`] if the directory exists but cannot be read.
pub fn list_profiles(dir: &Path) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(TomError::Config(format!(
                "failed to read config directory {}: {e}",
                dir.display()
            )));
        }
    };

    let mut profiles: Vec<String> = entries
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| !t.is_dir()))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(PREFIX) && name.ends_with(SUFFIX))
        .map(|name| display_name(&name).to_string())
        .collect();
    profiles.sort();
    Ok(profiles)
}

#[derive(Deserialize, Serialize)]
struct IncludeOnly {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    include: Option<String>,
}

/// The profile `config.json` currently includes, if any.
///
/// # Errors
///
/// Returns [`TomError::Config`] if `config.json` exists but cannot be parsed.
pub fn current_profile(dir: &Path) -> Result<Option<String>> {
    let path = dir.join(paths::CONFIG_FILE_NAME);
    let Some(data) = fs::read_optional(&path)? else {
        return Ok(None);
    };
    let parsed: IncludeOnly = serde_json::from_str(&data).map_err(|e| {
        TomError::Config(format!("failed to parse {}: {e}", path.display()))
    })?;
    Ok(parsed
        .include
        .filter(|s| !s.is_empty())
        .map(|s| display_name(&s).to_string()))
}

/// Point `config.json` at `profile`. The profile file must already exist.
///
/// # Errors
///
/// Returns [`TomError::Config`] if the profile does not exist and
/// [`TomError::Storage`] if `config.json` cannot be written.
pub fn set_current_profile(dir: &Path, profile: &str) -> Result<()> {
    let file = file_name(profile);
    validate_include(&file)?;
    if !dir.join(&file).is_file() {
        return Err(TomError::Config(format!(
            "profile '{}' does not exist",
            display_name(&file)
        )));
    }

    fs::ensure_private_dir(dir)?;
    let data = serde_json::to_vec_pretty(&IncludeOnly {
        include: Some(file.clone()),
    })?;
    fs::write_private(&dir.join(paths::CONFIG_FILE_NAME), &data)?;
    tracing::debug!(profile = %display_name(&file), "active profile switched");
    Ok(())
}

/// Write `config` as profile `profile`, without its `include` pointer.
///
/// # Errors
///
/// Returns [`TomError::Config`] if `profile` names the primary file and
/// [`TomError::Storage`] if the file cannot be written.
pub fn save_profile(config: &Config, dir: &Path, profile: &str) -> Result<()> {
    if profile == paths::CONFIG_FILE_NAME || profile == "config" {
        return Err(TomError::Config(
            "cannot save to 'config.json' directly, use a profile name".into(),
        ));
    }
    let file = file_name(profile);
    validate_include(&file)?;

    let mut profile_config = config.clone();
    profile_config.include = None;

    fs::ensure_private_dir(dir)?;
    let data = serde_json::to_vec_pretty(&profile_config)?;
    fs::write_private(&dir.join(&file), &data)
}

/// Load a single profile file over defaults. No environment overrides apply.
///
/// # Errors
///
/// Returns [`TomError::Config`] if the profile is missing or malformed.
pub fn load_profile(dir: &Path, profile: &str) -> Result<Config> {
    let file = file_name(profile);
    let path = dir.join(&file);
    let data = fs::read_optional(&path)?.ok_or_else(|| {
        TomError::Config(format!("profile '{}' does not exist", display_name(&file)))
    })?;
    let label = path.display().to_string();
    let mut config = Config::layered(&[(label.as_str(), data.as_str())])?;
    config.config_dir = dir.to_path_buf();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AuthMode;

    #[test]
    fn test_file_name_normalisation() {
        assert_eq!(file_name("prod"), "config-prod.json");
        assert_eq!(file_name("config-prod"), "config-prod.json");
        assert_eq!(file_name("config-prod.json"), "config-prod.json");
        assert_eq!(display_name("config-lab.json"), "lab");
    }

    #[test]
    fn test_list_profiles() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_profiles(&dir.path().join("missing")).unwrap().is_empty());

        for name in ["config-prod.json", "config-lab.json", "config.json", "token.json"] {
            std::fs::write(dir.path().join(name), "{}").unwrap();
        }
        std::fs::create_dir(dir.path().join("config-dir.json")).unwrap();

        assert_eq!(list_profiles(dir.path()).unwrap(), vec!["lab", "prod"]);
    }

    #[test]
    fn test_set_and_get_current_profile() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(current_profile(dir.path()).unwrap(), None);

        std::fs::write(dir.path().join("config-lab.json"), "{}").unwrap();
        set_current_profile(dir.path(), "lab").unwrap();
        assert_eq!(current_profile(dir.path()).unwrap().as_deref(), Some("lab"));

        let raw = std::fs::read_to_string(dir.path().join("config.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value, serde_json::json!({"include": "config-lab.json"}));
    }

    #[test]
    fn test_set_missing_profile_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = set_current_profile(dir.path(), "nope").unwrap_err();
        assert!(err.to_string().contains("profile 'nope' does not exist"));
        assert!(!dir.path().join("config.json").exists());
    }

    #[test]
    fn test_save_and_load_profile() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            include: Some("config-other.json".into()),
            auth_mode: AuthMode::Jwt,
            oauth_client_id: Some("cid".into()),
            ..Config::default()
        };
        save_profile(&config, dir.path(), "lab").unwrap();

        let loaded = load_profile(dir.path(), "lab").unwrap();
        assert_eq!(loaded.include, None);
        assert_eq!(loaded.auth_mode, AuthMode::Jwt);
        assert_eq!(loaded.oauth_client_id.as_deref(), Some("cid"));
        assert_eq!(loaded.config_dir, dir.path());
    }

    #[test]
    fn test_profile_switch_changes_loaded_config() {
        let dir = tempfile::tempdir().unwrap();
        let lab = Config {
            api_url: Some("http://lab".into()),
            ..Config::default()
        };
        save_profile(&lab, dir.path(), "lab").unwrap();
        set_current_profile(dir.path(), "lab").unwrap();

        let loaded = Config::load_with_env(Some(dir.path()), |_| None).unwrap();
        assert_eq!(loaded.api_url.as_deref(), Some("http://lab"));
    }

    #[test]
    fn test_qualified_name_saves_single_prefixed_file() {
        let dir = tempfile::tempdir().unwrap();
        save_profile(&Config::default(), dir.path(), "config-prod").unwrap();

        let path = dir.path().join(file_name("config-prod"));
        assert!(path.ends_with("config-prod.json"));
        assert!(path.is_file());
        assert!(!dir.path().join("config-config-prod.json").exists());
        assert_eq!(list_profiles(dir.path()).unwrap(), vec!["prod".to_string()]);
    }

    #[test]
    fn test_save_refuses_primary_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_profile(&Config::default(), dir.path(), "config.json").unwrap_err();
        assert!(err.to_string().contains("cannot save"));
    }

    #[test]
    fn test_load_missing_profile() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_profile(dir.path(), "ghost").is_err());
    }
}
