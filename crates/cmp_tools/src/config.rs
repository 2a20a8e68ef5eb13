#![forbid(unsafe_code)]

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use cmp_storage::credential::{CredentialScheme, PlaintextScheme, Sha256Scheme};

pub const ENV_STORE_PATH: &str = "CMP_STORE_PATH";
pub const ENV_SEED_DEFAULTS: &str = "CMP_SEED_DEFAULTS";
pub const ENV_CREDENTIAL_SCHEME: &str = "CMP_CREDENTIAL_SCHEME";
pub const ENV_LOG: &str = "CMP_LOG";

const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchemeKind {
    #[default]
    Plaintext,
    Sha256,
}

impl SchemeKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "plaintext" | "plain" => Some(Self::Plaintext),
            "sha256" => Some(Self::Sha256),
            _ => None,
        }
    }

    pub fn build(self) -> Arc<dyn CredentialScheme> {
        match self {
            Self::Plaintext => Arc::new(PlaintextScheme),
            Self::Sha256 => Arc::new(Sha256Scheme),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalConfig {
    pub store_path: PathBuf,
    /// Create the default admin/staff/user accounts when the store has no users.
    pub seed_defaults: bool,
    pub credential_scheme: SchemeKind,
    pub log_filter: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(
                std::env::var_os("XDG_CONFIG_HOME"),
                std::env::var_os("HOME"),
            ),
            seed_defaults: true,
            credential_scheme: SchemeKind::default(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl PortalConfig {
    /// Defaults with environment overrides applied, plus the warnings for
    /// ignored values. Runs before logging is up, so the caller emits them.
    pub fn load() -> (Self, Vec<String>) {
        let mut config = Self::default();
        let warnings = apply_env_overrides(&mut config);
        (config, warnings)
    }
}

pub fn default_store_path(xdg_config_home: Option<OsString>, home: Option<OsString>) -> PathBuf {
    let non_empty = |v: Option<OsString>| v.filter(|v| !v.is_empty()).map(PathBuf::from);
    if let Some(base) = non_empty(xdg_config_home) {
        return base.join("cmp").join("store.json");
    }
    if let Some(home) = non_empty(home) {
        return home.join(".config").join("cmp").join("store.json");
    }
    PathBuf::from(".cmp").join("store.json")
}

fn parse_boolish(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Returns one warning per variable that was set but could not be used.
#[must_use]
pub fn apply_env_overrides(config: &mut PortalConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if let Ok(raw) = std::env::var(ENV_STORE_PATH) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.store_path = PathBuf::from(trimmed);
        }
    }

    if let Ok(raw) = std::env::var(ENV_SEED_DEFAULTS) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            match parse_boolish(trimmed) {
                Some(value) => config.seed_defaults = value,
                None => warnings.push(format!("invalid {ENV_SEED_DEFAULTS}, ignoring: {trimmed}")),
            }
        }
    }

    if let Ok(raw) = std::env::var(ENV_CREDENTIAL_SCHEME) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            match SchemeKind::parse(trimmed) {
                Some(kind) => config.credential_scheme = kind,
                None => {
                    warnings.push(format!("invalid {ENV_CREDENTIAL_SCHEME}, ignoring: {trimmed}"))
                }
            }
        }
    }

    if let Ok(raw) = std::env::var(ENV_LOG) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.log_filter = trimmed.to_string();
        }
    }

    warnings
}
