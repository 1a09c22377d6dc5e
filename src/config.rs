use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use crate::inference::catalog::DEFAULT_MAX_CANDIDATES;
use crate::inference::Provider;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_DEADLINE_SECS: u64 = 90;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: Option<String>,
    pub provider: Provider,
    pub max_candidates: usize,
    pub chain_deadline: Option<Duration>,
    pub env_file: PathBuf,
    pub gemini_base_url: Option<String>,
    pub openai_base_url: Option<String>,
    pub groq_base_url: Option<String>,
    pub openrouter_base_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let provider = match get("AI_PROVIDER") {
            Some(name) => Provider::from_string(&name)
                .with_context(|| format!("AI_PROVIDER '{}' is not one of gemini, openai, groq, openrouter", name))?,
            None => Provider::Gemini,
        };

        let max_candidates = match get("MAX_CANDIDATES") {
            Some(n) => n
                .parse::<usize>()
                .with_context(|| format!("MAX_CANDIDATES '{}' is not a number", n))?,
            None => DEFAULT_MAX_CANDIDATES,
        };

        let deadline_secs = match get("CHAIN_DEADLINE_SECS") {
            Some(n) => n
                .parse::<u64>()
                .with_context(|| format!("CHAIN_DEADLINE_SECS '{}' is not a number", n))?,
            None => DEFAULT_DEADLINE_SECS,
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            database_url: get("DATABASE_URL"),
            provider,
            max_candidates,
            // 0 disables the overall deadline.
            chain_deadline: (deadline_secs > 0).then(|| Duration::from_secs(deadline_secs)),
            env_file: PathBuf::from(get("ENV_FILE").unwrap_or_else(|| ".env".to_string())),
            gemini_base_url: get("GEMINI_BASE_URL"),
            openai_base_url: get("OPENAI_BASE_URL"),
            groq_base_url: get("GROQ_BASE_URL"),
            openrouter_base_url: get("OPENROUTER_BASE_URL"),
        })
    }
}

/// Process-wide provider credentials.
///
/// The orchestrator calls `reload` at the start of every run, so a rotated key takes
/// effect on the next request without a restart.
pub trait CredentialSource: Send + Sync {
    fn reload(&self);
    fn current_credential(&self, provider: Provider) -> Option<String>;
}

/// Credentials from the process environment, overlaid by an env file on each reload.
/// Values in the file win; an empty value removes the key.
pub struct EnvCredentials {
    env_file: PathBuf,
    keys: RwLock<HashMap<Provider, String>>,
    /// Keys whose process value was copied from the env file at startup. Only the file
    /// counts for them, so deleting the line revokes the key.
    from_file: HashSet<Provider>,
}

impl EnvCredentials {
    pub fn new(env_file: impl Into<PathBuf>) -> Self {
        let env_file = env_file.into();
        let from_file = file_entries(&env_file)
            .into_iter()
            .filter(|(provider, value)| {
                env::var(provider.credential_var()).is_ok_and(|current| current.trim() == value.trim())
            })
            .map(|(provider, _)| provider)
            .collect();

        let credentials = Self {
            env_file,
            keys: RwLock::new(HashMap::new()),
            from_file,
        };
        credentials.reload();
        credentials
    }

    fn read_keys(&self) -> HashMap<Provider, String> {
        let mut keys = HashMap::new();
        for provider in Provider::all() {
            if self.from_file.contains(&provider) {
                continue;
            }
            if let Ok(value) = env::var(provider.credential_var()) {
                if !value.trim().is_empty() {
                    keys.insert(provider, value.trim().to_string());
                }
            }
        }

        for (provider, value) in file_entries(&self.env_file) {
            if value.trim().is_empty() {
                keys.remove(&provider);
            } else {
                keys.insert(provider, value.trim().to_string());
            }
        }

        keys
    }
}

/// Provider key lines of an env file, in file order. A missing file has none.
fn file_entries(path: &Path) -> Vec<(Provider, String)> {
    let entries = match dotenv::from_path_iter(path) {
        Ok(entries) => entries,
        Err(e) => {
            log::debug!("No credential file at {:?}: {}", path, e);
            return Vec::new();
        }
    };

    entries
        .filter_map(|entry| match entry {
            Ok(pair) => Some(pair),
            Err(e) => {
                log::warn!("⚠️ Skipping malformed line in {:?}: {}", path, e);
                None
            }
        })
        .filter_map(|(key, value)| {
            Provider::all()
                .into_iter()
                .find(|p| p.credential_var() == key)
                .map(|provider| (provider, value))
        })
        .collect()
}

impl CredentialSource for EnvCredentials {
    fn reload(&self) {
        let keys = self.read_keys();
        log::debug!(
            "🔑 Credentials reloaded for: {:?}",
            keys.keys().map(|p| p.to_string()).collect::<Vec<_>>()
        );
        *self.keys.write().unwrap_or_else(|e| e.into_inner()) = keys;
    }

    fn current_credential(&self, provider: Provider) -> Option<String> {
        self.keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&provider)
            .cloned()
    }
}
