use crate::config::{ApiKeyEntry, AuthConfig};
use crate::key_store::{self, KeyStore, KeyStoreError};
use std::collections::HashSet;
use std::sync::Arc;

/// Environment list entries with this value are treated as removed.
pub const DELETED_KEY: &str = "DELETED";

/// Key store value marking a key that exists but may not be used.
pub const DISABLED_VALUE: &str = "disabled";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    Rejected,
    /// `bound_domain` is only known to the key-store strategy.
    Authenticated { bound_domain: Option<String> },
}

/// Validates presented API keys with the strategy selected at startup.
#[derive(Clone)]
pub enum AuthValidator {
    Environment(KeyList),
    KeyStore(Arc<dyn KeyStore>),
}

impl AuthValidator {
    pub fn from_config(config: &AuthConfig) -> Self {
        match config {
            AuthConfig::Environment { keys } => {
                let entries = keys.as_deref().unwrap_or_default();
                if entries.is_empty() {
                    tracing::warn!("No API keys configured, every API request will be rejected");
                }
                AuthValidator::Environment(KeyList::new(entries))
            }
            AuthConfig::KeyStore { key_store } => {
                AuthValidator::KeyStore(key_store::from_config(key_store))
            }
        }
    }

    pub fn strategy(&self) -> &'static str {
        match self {
            AuthValidator::Environment(_) => "environment",
            AuthValidator::KeyStore(_) => "key_store",
        }
    }

    pub async fn validate(&self, key: &str) -> Result<AuthOutcome, KeyStoreError> {
        match self {
            AuthValidator::Environment(keys) => Ok(if keys.contains(key) {
                AuthOutcome::Authenticated { bound_domain: None }
            } else {
                AuthOutcome::Rejected
            }),
            AuthValidator::KeyStore(store) => {
                let outcome = match store.get(key).await? {
                    Some(value) if !value.is_empty() && value != DISABLED_VALUE => {
                        AuthOutcome::Authenticated {
                            bound_domain: Some(value),
                        }
                    }
                    _ => AuthOutcome::Rejected,
                };
                Ok(outcome)
            }
        }
    }
}

/// The usable keys of the environment strategy.
#[derive(Clone, Debug, Default)]
pub struct KeyList {
    valid: HashSet<String>,
}

impl KeyList {
    /// Tombstoned and disabled entries are dropped; each entry is judged on its own.
    pub fn new(entries: &[ApiKeyEntry]) -> Self {
        let valid = entries
            .iter()
            .filter(|entry| !entry.disabled && entry.key != DELETED_KEY)
            .map(|entry| entry.key.clone())
            .collect();

        KeyList { valid }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.valid.contains(key)
    }
}
