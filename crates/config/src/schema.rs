use crate::{fs, paths};
use figment::{
    Figment,
    providers::{Format as _, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tomclient_types::{ProviderId, Result, TomError};

/// Header used for `api_key` mode when none is configured.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

const OFFLINE_ACCESS: &str = "offline_access";

/// How outgoing broker requests are authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    None,
    ApiKey,
    /// OAuth2/PKCE login; the stored ID or access token is sent as a bearer.
    Jwt,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::ApiKey => write!(f, "api_key"),
            Self::Jwt => write!(f, "jwt"),
        }
    }
}

impl std::str::FromStr for AuthMode {
    type Err = TomError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "api_key" => Ok(Self::ApiKey),
            "jwt" => Ok(Self::Jwt),
            other => Err(TomError::Config(format!(
                "invalid auth_mode '{other}' - must be one of: none, api_key, jwt"
            ))),
        }
    }
}

fn default_provider() -> String {
    ProviderId::Oidc.to_string()
}
fn default_redirect_port() -> u16 {
    8899
}
fn default_scopes() -> String {
    "openid email profile".to_string()
}

/// Top-level client configuration, as stored in `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of a `config-*.json` profile to layer over this file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,
    /// Base URL of the broker API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    pub auth_mode: AuthMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_header: Option<String>,
    pub oauth_provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth_client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth_client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth_discovery_url: Option<String>,
    pub oauth_redirect_port: u16,
    /// Space-separated scope list.
    pub oauth_scopes: String,
    pub oauth_use_refresh: bool,
    /// Directory holding `config.json` and `token.json`.
    #[serde(skip)]
    pub config_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            include: None,
            api_url: None,
            auth_mode: AuthMode::None,
            api_key: None,
            api_key_header: None,
            oauth_provider: default_provider(),
            oauth_client_id: None,
            oauth_client_secret: None,
            oauth_discovery_url: None,
            oauth_redirect_port: default_redirect_port(),
            oauth_scopes: default_scopes(),
            oauth_use_refresh: false,
            config_dir: PathBuf::new(),
        }
    }
}

impl Config {
    /// Parses configuration from a JSON string, merged with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`TomError::Config`] if the JSON is invalid or extraction fails.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::layered(&[("<inline>", json)])
    }

    /// Loads the configuration for `dir` (or the default directory), applying
    /// the included profile and `TOM_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`TomError::Config`] if a file cannot be read or parsed, the
    /// `include` value is invalid, or an environment override is malformed.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        Self::load_with_env(dir, |key| std::env::var(key).ok())
    }

    /// [`load`](Self::load) with an explicit environment lookup.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn load_with_env(dir: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let dir = dir.map_or_else(|| paths::config_dir_with_env(&env), Path::to_path_buf);
        let main_path = dir.join(paths::CONFIG_FILE_NAME);
        let main = fs::read_optional(&main_path)?;

        let mut sources = Vec::new();
        let main_label = main_path.display().to_string();
        if let Some(main) = main.as_deref() {
            sources.push((main_label.as_str(), main));
        }
        let mut config = Self::layered(&sources)?;

        let include = config.include.clone();
        if let Some(include) = include.as_deref() {
            validate_include(include)?;
            let include_path = dir.join(include);
            let included = fs::read_optional(&include_path)?.ok_or_else(|| {
                TomError::Config(format!(
                    "included config file '{include}' does not exist in {}",
                    dir.display()
                ))
            })?;
            let include_label = include_path.display().to_string();
            sources.push((include_label.as_str(), included.as_str()));
            config = Self::layered(&sources)?;
            // The profile itself never redirects further.
            config.include = Some(include.to_string());
        }

        config.config_dir = dir;
        config.apply_env(&env)?;
        config.ensure_offline_access();
        Ok(config)
    }

    pub(crate) fn layered(sources: &[(&str, &str)]) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        for (_, json) in sources {
            figment = figment.merge(Json::string(json));
        }
        figment.extract().map_err(|e| {
            let origin = sources.last().map_or("defaults", |(label, _)| *label);
            TomError::Config(format!("failed to parse {origin}: {e}"))
        })
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |key: &str| env(key).filter(|v| !v.is_empty());

        if let Some(v) = var("TOM_API_URL") {
            self.api_url = Some(v);
        }
        if let Some(v) = var("TOM_AUTH_MODE") {
            self.auth_mode = v.parse()?;
        }
        if let Some(v) = var("TOM_API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = var("TOM_OAUTH_PROVIDER") {
            self.oauth_provider = v;
        }
        if let Some(v) = var("TOM_OAUTH_CLIENT_ID") {
            self.oauth_client_id = Some(v);
        }
        if let Some(v) = var("TOM_OAUTH_CLIENT_SECRET") {
            self.oauth_client_secret = Some(v);
        }
        if let Some(v) = var("TOM_OAUTH_DISCOVERY_URL") {
            self.oauth_discovery_url = Some(v);
        }
        if let Some(v) = var("TOM_OAUTH_REDIRECT_PORT") {
            self.oauth_redirect_port = v.parse().map_err(|_| {
                TomError::Config(format!("TOM_OAUTH_REDIRECT_PORT '{v}' is not a valid port"))
            })?;
        }
        if let Some(v) = var("TOM_OAUTH_SCOPES") {
            self.oauth_scopes = v;
        }
        if let Some(v) = var("TOM_OAUTH_USE_REFRESH") {
            self.oauth_use_refresh = matches!(v.as_str(), "1" | "true" | "TRUE");
        }
        Ok(())
    }

    /// Most providers only issue refresh tokens for `offline_access`; Google
    /// uses `access_type=offline` on the authorization URL instead.
    fn ensure_offline_access(&mut self) {
        if !self.oauth_use_refresh || self.oauth_provider == ProviderId::Google.to_string() {
            return;
        }
        if self.oauth_scopes.split_whitespace().any(|s| s == OFFLINE_ACCESS) {
            return;
        }
        if self.oauth_scopes.trim().is_empty() {
            self.oauth_scopes = OFFLINE_ACCESS.to_string();
        } else {
            self.oauth_scopes = format!("{} {OFFLINE_ACCESS}", self.oauth_scopes.trim_end());
        }
    }

    /// The configured OAuth provider.
    ///
    /// # Errors
    ///
    /// Returns [`TomError::UnsupportedProvider`] for unknown names.
    pub fn provider_id(&self) -> Result<ProviderId> {
        self.oauth_provider.parse()
    }

    /// Header name for `api_key` mode.
    #[must_use]
    pub fn api_key_header(&self) -> &str {
        self.api_key_header
            .as_deref()
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_API_KEY_HEADER)
    }

    /// `http://localhost:{port}/callback`.
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/callback", self.oauth_redirect_port)
    }

    /// Check the settings required by the selected auth mode.
    ///
    /// Settings that the mode ignores are reported as warnings only.
    ///
    /// # Errors
    ///
    /// Returns [`TomError::Config`] for missing required settings and
    /// [`TomError::UnsupportedProvider`] for an unknown provider.
    pub fn validate(&self) -> Result<()> {
        let has_oauth = self.oauth_client_id.is_some() || self.oauth_discovery_url.is_some();
        match self.auth_mode {
            AuthMode::None => {
                if self.api_key.is_some() {
                    tracing::warn!("api_key is set but auth_mode is 'none' - it will not be used");
                }
                if has_oauth {
                    tracing::warn!("OAuth settings are present but auth_mode is 'none' - they will not be used");
                }
                Ok(())
            }
            AuthMode::ApiKey => {
                if is_blank(self.api_key.as_deref()) {
                    return Err(TomError::Config(
                        "auth_mode is 'api_key' but TOM_API_KEY is not set".into(),
                    ));
                }
                if has_oauth {
                    tracing::warn!("OAuth settings are present but auth_mode is 'api_key' - they will not be used");
                }
                Ok(())
            }
            AuthMode::Jwt => {
                if is_blank(self.oauth_client_id.as_deref()) {
                    return Err(TomError::Config(
                        "auth_mode is 'jwt' but TOM_OAUTH_CLIENT_ID is not set".into(),
                    ));
                }
                if is_blank(self.oauth_discovery_url.as_deref()) {
                    return Err(TomError::Config(
                        "auth_mode is 'jwt' but TOM_OAUTH_DISCOVERY_URL is not set".into(),
                    ));
                }
                if self.api_key.is_some() {
                    tracing::warn!("api_key is set but auth_mode is 'jwt' - it will not be used");
                }
                let provider = self.provider_id()?;
                if provider == ProviderId::Google && is_blank(self.oauth_client_secret.as_deref()) {
                    return Err(TomError::Config(format!(
                        "OAuth provider '{provider}' requires client_secret but TOM_OAUTH_CLIENT_SECRET is not set"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Write this configuration to `config.json` in its directory.
    ///
    /// # Errors
    ///
    /// Returns [`TomError::Storage`] if the directory or file cannot be written.
    pub fn save(&self) -> Result<()> {
        fs::ensure_private_dir(&self.config_dir)?;
        let data = serde_json::to_vec_pretty(self)?;
        fs::write_private(&self.config_dir.join(paths::CONFIG_FILE_NAME), &data)
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

/// `include` must name a `config-*.json` sibling and never the primary file.
pub(crate) fn validate_include(include: &str) -> Result<()> {
    if include == paths::CONFIG_FILE_NAME {
        return Err(TomError::Config(format!(
            "config include cannot be '{}'",
            paths::CONFIG_FILE_NAME
        )));
    }
    let valid = include.starts_with("config-")
        && include.ends_with(".json")
        && !include.contains(['/', '\\']);
    if !valid {
        return Err(TomError::Config(format!(
            "config include must match pattern 'config-*.json', got '{include}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    fn jwt_config() -> Config {
        Config {
            auth_mode: AuthMode::Jwt,
            oauth_client_id: Some("cid".into()),
            oauth_discovery_url: Some("https://idp.example/.well-known/openid-configuration".into()),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config() {
        let c = Config::default();
        assert_eq!(c.auth_mode, AuthMode::None);
        assert_eq!(c.oauth_provider, "oidc");
        assert_eq!(c.oauth_redirect_port, 8899);
        assert_eq!(c.oauth_scopes, "openid email profile");
        assert!(!c.oauth_use_refresh);
        assert_eq!(c.api_key_header(), "X-API-Key");
    }

    #[test]
    fn test_from_json_defaults_applied() {
        let c = Config::from_json(r#"{"auth_mode":"jwt","oauth_redirect_port":9000}"#).unwrap();
        assert_eq!(c.auth_mode, AuthMode::Jwt);
        assert_eq!(c.oauth_redirect_port, 9000);
        assert_eq!(c.oauth_scopes, "openid email profile");
        assert_eq!(c.redirect_uri(), "http://localhost:9000/callback");
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(matches!(Config::from_json("{oops"), Err(TomError::Config(_))));
    }

    #[test]
    fn test_load_missing_dir_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let c = Config::load_with_env(Some(&dir.path().join("nope")), no_env).unwrap();
        assert_eq!(c.auth_mode, AuthMode::None);
        assert_eq!(c.config_dir, dir.path().join("nope"));
    }

    #[test]
    fn test_load_include_layers_profile() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"include":"config-prod.json","api_url":"http://main"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("config-prod.json"),
            r#"{"api_url":"https://prod","auth_mode":"api_key","api_key":"k"}"#,
        )
        .unwrap();

        let c = Config::load_with_env(Some(dir.path()), no_env).unwrap();
        assert_eq!(c.api_url.as_deref(), Some("https://prod"));
        assert_eq!(c.auth_mode, AuthMode::ApiKey);
        assert_eq!(c.include.as_deref(), Some("config-prod.json"));
    }

    #[test]
    fn test_include_self_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"include":"config.json"}"#).unwrap();
        let err = Config::load_with_env(Some(dir.path()), no_env).unwrap_err();
        assert!(err.to_string().contains("cannot be 'config.json'"));
    }

    #[test]
    fn test_include_pattern_enforced() {
        assert!(validate_include("prod.json").is_err());
        assert!(validate_include("config-prod.yaml").is_err());
        assert!(validate_include("config-../x.json").is_err());
        assert!(validate_include("config-prod.json").is_ok());
    }

    #[test]
    fn test_include_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"include":"config-gone.json"}"#,
        )
        .unwrap();
        let err = Config::load_with_env(Some(dir.path()), no_env).unwrap_err();
        assert!(err.to_string().contains("config-gone.json"));
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"auth_mode":"none","oauth_client_id":"file-id"}"#,
        )
        .unwrap();
        let env = env_of(&[
            ("TOM_AUTH_MODE", "jwt"),
            ("TOM_OAUTH_CLIENT_ID", "env-id"),
            ("TOM_OAUTH_REDIRECT_PORT", "9100"),
            ("TOM_OAUTH_USE_REFRESH", "1"),
        ]);
        let c = Config::load_with_env(Some(dir.path()), env).unwrap();
        assert_eq!(c.auth_mode, AuthMode::Jwt);
        assert_eq!(c.oauth_client_id.as_deref(), Some("env-id"));
        assert_eq!(c.oauth_redirect_port, 9100);
        assert!(c.oauth_use_refresh);
    }

    #[test]
    fn test_env_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let bad_mode = env_of(&[("TOM_AUTH_MODE", "saml")]);
        assert!(Config::load_with_env(Some(dir.path()), bad_mode).is_err());
        let bad_port = env_of(&[("TOM_OAUTH_REDIRECT_PORT", "99999")]);
        assert!(Config::load_with_env(Some(dir.path()), bad_port).is_err());
    }

    #[test]
    fn test_offline_access_appended_when_refreshing() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_of(&[("TOM_OAUTH_USE_REFRESH", "true")]);
        let c = Config::load_with_env(Some(dir.path()), env).unwrap();
        assert_eq!(c.oauth_scopes, "openid email profile offline_access");
    }

    #[test]
    fn test_offline_access_not_appended_for_google() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_of(&[
            ("TOM_OAUTH_USE_REFRESH", "true"),
            ("TOM_OAUTH_PROVIDER", "google"),
        ]);
        let c = Config::load_with_env(Some(dir.path()), env).unwrap();
        assert_eq!(c.oauth_scopes, "openid email profile");
    }

    #[test]
    fn test_validate_jwt_requirements() {
        assert!(jwt_config().validate().is_ok());

        let mut c = jwt_config();
        c.oauth_client_id = None;
        assert!(c.validate().unwrap_err().to_string().contains("CLIENT_ID"));

        let mut c = jwt_config();
        c.oauth_discovery_url = Some(String::new());
        assert!(c.validate().unwrap_err().to_string().contains("DISCOVERY_URL"));
    }

    #[test]
    fn test_validate_google_requires_secret() {
        let mut c = jwt_config();
        c.oauth_provider = "google".into();
        assert!(c.validate().unwrap_err().to_string().contains("client_secret"));
        c.oauth_client_secret = Some("s".into());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_validate_unknown_provider() {
        let mut c = jwt_config();
        c.oauth_provider = "okta".into();
        assert!(matches!(
            c.validate(),
            Err(TomError::UnsupportedProvider(ref p)) if p == "okta"
        ));
    }

    #[test]
    fn test_validate_api_key() {
        let mut c = Config {
            auth_mode: AuthMode::ApiKey,
            ..Config::default()
        };
        assert!(c.validate().is_err());
        c.api_key = Some("secret".into());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = jwt_config();
        c.config_dir = dir.path().join(".tom");
        c.save().unwrap();
        let back = Config::load_with_env(Some(&c.config_dir), no_env).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_auth_mode_parse() {
        assert_eq!("api_key".parse::<AuthMode>().unwrap(), AuthMode::ApiKey);
        assert!("bearer".parse::<AuthMode>().is_err());
        assert_eq!(AuthMode::Jwt.to_string(), "jwt");
    }
}
