use anyhow::anyhow;
use serde::Deserialize;
use std::{
    fmt,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use url::Url;

use crate::{
    dialect::{self, ApiDialect},
    message::{MessageTemplate, TemplateError},
};

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Can't read the config file at {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse the config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("The config value '{key}' is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("The 'message' template is invalid: {0}")]
    Template(#[from] TemplateError),
}

// What's written in the config file. Every key except the optional ones
// has to be present, serde reports the missing ones.
#[derive(Deserialize, Clone, Debug)]
pub struct RawConfig {
    pub admin_secret: String,
    pub legacy_mr: bool,
    pub reg_url: String,
    pub reg_page: String,
    pub admins: Vec<String>,
    pub expiration: i64,
    pub message: Option<String>,
    pub admin_access_token: Option<String>,
    pub admin_api_url: Option<String>,

    // Only used by the console host.
    pub request_timeout_secs: Option<u64>,
}

/// One entry of the `admins` list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminRule {
    /// A user who is always allowed, e.g. `@alice:example.org`.
    Identity(String),
    /// Anyone the admin API reports as linked to this SSO provider.
    /// Written as `sso:<provider>`, e.g. `sso:cas`.
    SsoProvider(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdminPolicy {
    rules: Vec<AdminRule>,
}

impl AdminPolicy {
    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> AdminPolicy {
        let rules = entries
            .iter()
            .map(|e| {
                let entry = e.as_ref().trim();
                match entry.strip_prefix("sso:") {
                    Some(provider) if !provider.is_empty() => {
                        AdminRule::SsoProvider(provider.to_string())
                    }
                    _ => AdminRule::Identity(entry.to_string()),
                }
            })
            .collect();

        AdminPolicy { rules }
    }

    pub fn rules(&self) -> &[AdminRule] {
        &self.rules
    }

    pub fn sso_providers(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().filter_map(|r| match r {
            AdminRule::SsoProvider(p) => Some(p.as_str()),
            AdminRule::Identity(_) => None,
        })
    }

    pub fn has_identity(&self, user: &str) -> bool {
        self.rules
            .iter()
            .any(|r| matches!(r, AdminRule::Identity(id) if id == user))
    }
}

/// Credentials for the homeserver admin API, present only when a delegated
/// SSO rule can actually be evaluated.
#[derive(Clone)]
pub struct AdminApiAccess {
    pub api_url: String,
    pub access_token: String,
}

#[derive(Clone)]
pub struct Settings {
    pub admin_secret: String,
    pub dialect: &'static dyn ApiDialect,
    pub reg_url: String,
    pub reg_page: String,
    pub admins: AdminPolicy,
    pub expiration_days: u64,
    pub message: Option<MessageTemplate>,
    pub admin_api: Option<AdminApiAccess>,
    pub request_timeout: Option<Duration>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("admin_secret", &"<redacted>")
            .field("dialect", &self.dialect.name())
            .field("reg_url", &self.reg_url)
            .field("reg_page", &self.reg_page)
            .field("admins", &self.admins)
            .field("expiration_days", &self.expiration_days)
            .field("message", &self.message.is_some())
            .field("admin_api", &self.admin_api.as_ref().map(|a| &a.api_url))
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Settings {
    pub fn from_raw(raw: RawConfig) -> Result<Settings, ConfigError> {
        if raw.admin_secret.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "admin_secret",
                reason: "it must not be empty".to_string(),
            });
        }

        check_http_url("reg_url", &raw.reg_url)?;

        let expiration_days = u64::try_from(raw.expiration).map_err(|_| ConfigError::Invalid {
            key: "expiration",
            reason: format!("expected a number of days, got {}", raw.expiration),
        })?;

        let message = match raw.message.as_deref() {
            Some(m) if !m.is_empty() => Some(MessageTemplate::parse(m)?),
            _ => None,
        };

        let admins = AdminPolicy::from_entries(&raw.admins);

        // An empty token is as good as no token.
        let access_token = raw.admin_access_token.filter(|t| !t.trim().is_empty());
        let admin_api = match (access_token, admins.sso_providers().next()) {
            (Some(access_token), Some(_)) => {
                let api_url = raw.admin_api_url.ok_or_else(|| ConfigError::Invalid {
                    key: "admin_api_url",
                    reason: "it's required when 'admin_access_token' is set and 'admins' contains an sso: entry".to_string(),
                })?;
                check_http_url("admin_api_url", &api_url)?;
                Some(AdminApiAccess {
                    api_url,
                    access_token,
                })
            }
            _ => None,
        };

        Ok(Settings {
            admin_secret: raw.admin_secret,
            dialect: dialect::for_legacy_flag(raw.legacy_mr),
            reg_url: raw.reg_url,
            reg_page: raw.reg_page,
            admins,
            expiration_days,
            message,
            admin_api,
            request_timeout: raw.request_timeout_secs.map(Duration::from_secs),
        })
    }

    /// The registration API root for the configured dialect.
    pub fn api_base_url(&self) -> String {
        self.dialect.base_url(&self.reg_url)
    }
}

fn check_http_url(key: &'static str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::Invalid {
        key,
        reason: format!("'{}' is not a valid URL ({})", value, e),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid {
            key,
            reason: format!("expected an http or https URL, got the scheme '{}'", other),
        }),
    }
}

pub fn parse_config(contents: &str) -> Result<Settings, ConfigError> {
    let raw: RawConfig = toml::from_str(contents)?;
    Settings::from_raw(raw)
}

pub fn read_config(path: &Path) -> Result<Settings, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    parse_config(&contents)
}

pub fn get_config_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or(anyhow!(
        "invitebot looks for its config file in your $HOME directory, but it
can't find the environment variable $HOME (aka: '~'). Pass --config with
the path of your config file instead.",
    ))?;

    Ok(Path::new(&home).join(".invitebot"))
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(get_config_dir()?.join(CONFIG_FILE_NAME))
}

#[cfg(test)]
pub(crate) fn test_settings(reg_url: &str, legacy: bool) -> Settings {
    Settings::from_raw(RawConfig {
        admin_secret: "s3cret".to_string(),
        legacy_mr: legacy,
        reg_url: reg_url.to_string(),
        reg_page: "/register".to_string(),
        admins: vec!["@alice:example.org".to_string()],
        expiration: 7,
        message: None,
        admin_access_token: None,
        admin_api_url: None,
        request_timeout_secs: None,
    })
    .expect("test settings are valid")
}
