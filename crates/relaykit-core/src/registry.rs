//! Provider registry loaded from the provider file
//!
//! The file holds one TOML table per provider:
//!
//! ```toml
//! [OPENROUTER]
//! api_key = "${OPENROUTER_API_KEY}"
//! base_url = "https://openrouter.ai/api/v1"
//! ```
//!
//! The registry is built once at startup and shared read-only (usually behind
//! an `Arc`) by every client.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use url::Url;

use crate::error::{Error, Result};

/// Environment variable that overrides the provider file location
pub const PROVIDER_ENV_VAR: &str = "RELAYKIT_PROVIDER_ENV";

/// Credentials and endpoint of one named provider
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub name: String,
    pub api_key: String,
    pub base_url: String,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ProviderConfig {
    pub fn new(
        name: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    /// Join `path` onto the base URL without doubling slashes
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Deserialize)]
struct ProviderSection {
    api_key: String,
    base_url: String,
}

/// Read-only mapping from provider name to [`ProviderConfig`]
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    /// Build a registry from already-constructed configs
    pub fn from_providers(providers: impl IntoIterator<Item = ProviderConfig>) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
        }
    }

    /// Load the provider file, logging and swallowing failures.
    ///
    /// A missing or malformed file yields an empty registry; every later
    /// [`resolve`](Self::resolve) then fails with a configuration error.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(registry) => registry,
            Err(e) => {
                error!("Error loading providers: {}", e);
                warn!("No providers found in {}", path.display());
                Self::default()
            }
        }
    }

    /// Load the provider file, returning configuration errors to the caller
    pub fn try_load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!(
                "failed to read provider file {}: {}",
                path.display(),
                e
            ))
        })?;
        let registry = Self::from_toml_str(&content)?;
        debug!(
            "Loaded {} provider(s) from {}",
            registry.len(),
            path.display()
        );
        Ok(registry)
    }

    /// Parse provider tables from TOML text after `${VAR}` expansion
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let sections: BTreeMap<String, ProviderSection> = toml::from_str(&expanded)
            .map_err(|e| Error::configuration(format!("failed to parse provider file: {}", e)))?;

        let mut providers = BTreeMap::new();
        for (name, section) in sections {
            Url::parse(&section.base_url).map_err(|e| {
                Error::configuration(format!(
                    "provider '{}' has an invalid base_url '{}': {}",
                    name, section.base_url, e
                ))
            })?;
            if section.api_key.is_empty() {
                warn!("Provider '{}' has an empty api_key", name);
            }
            providers.insert(
                name.clone(),
                ProviderConfig {
                    name,
                    api_key: section.api_key,
                    base_url: section.base_url,
                },
            );
        }

        if providers.is_empty() {
            warn!("No providers found in provider file");
        }

        Ok(Self { providers })
    }

    /// Look up a provider by name
    pub fn resolve(&self, name: &str) -> Result<&ProviderConfig> {
        self.providers.get(name).ok_or_else(|| {
            Error::configuration(format!(
                "provider '{}' not found. Available providers: [{}]",
                name,
                self.names().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    /// Provider names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.values()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Where to look for the provider file when none is given explicitly.
///
/// `$RELAYKIT_PROVIDER_ENV`, then `./.provider_env`, then
/// `~/.relaykit/provider_env`.
pub fn default_provider_path() -> PathBuf {
    if let Ok(path) = std::env::var(PROVIDER_ENV_VAR) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    let local = PathBuf::from(".provider_env");
    if local.exists() {
        return local;
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".relaykit")
        .join("provider_env")
}

/// Mask a secret for Debug output and logs.
/// First 3 and last 4 chars for secrets longer than 7 chars, otherwise "***".
pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

/// Replace `${VAR}` with the value of the environment variable `VAR`.
/// Unset variables expand to the empty string.
fn expand_env_vars(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        result.push_str(&rest[..start]);
        let var_name = &rest[start + 2..start + len];
        match std::env::var(var_name) {
            Ok(value) => result.push_str(&value),
            Err(_) => warn!(
                "Environment variable '{}' referenced in provider file is not set",
                var_name
            ),
        }
        rest = &rest[start + len + 1..];
    }
    result.push_str(rest);
    result
}
