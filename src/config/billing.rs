//! Billing engine configuration

use serde::Deserialize;

use crate::domain::billing::{CodeHasher, HashSecret};

use super::error::ValidationError;

/// Billing engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Free trial length in days
    #[serde(default = "default_trial_days")]
    pub trial_days: i64,

    /// How many days before trial end the expiring notice goes out
    #[serde(default = "default_expiring_soon_days")]
    pub expiring_soon_days: u32,

    /// Candidate scan size per maintenance sweep pass
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: u32,

    /// Hash secrets as comma-separated `<version>:<secret>` entries, e.g.
    /// `1:oldsecret,2:newsecret`. New rows hash with the highest version;
    /// lookups match any. Empty means hashing is unconfigured and the
    /// affected commands fail with HASH_SECRET_MISSING.
    #[serde(default)]
    pub hash_secrets: String,
}

impl BillingConfig {
    /// Parses the configured hash secrets.
    pub fn hash_secrets(&self) -> Result<Vec<HashSecret>, ValidationError> {
        let mut secrets = Vec::new();
        for entry in self.hash_secrets.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (version, secret) = entry
                .split_once(':')
                .ok_or_else(|| ValidationError::InvalidHashSecret(entry.to_string()))?;
            let version: u32 = version
                .parse()
                .map_err(|_| ValidationError::InvalidHashSecret(entry.to_string()))?;
            if secret.is_empty() {
                return Err(ValidationError::InvalidHashSecret(entry.to_string()));
            }
            secrets.push(HashSecret::new(version, secret));
        }
        Ok(secrets)
    }

    /// Builds the code hasher from the configured secrets.
    pub fn code_hasher(&self) -> Result<CodeHasher, ValidationError> {
        Ok(CodeHasher::new(self.hash_secrets()?))
    }

    /// Validate billing configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.trial_days < 1 {
            return Err(ValidationError::InvalidTrialDays);
        }
        if self.sweep_batch_size < 1 {
            return Err(ValidationError::InvalidSweepBatchSize);
        }
        self.hash_secrets()?;
        Ok(())
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            trial_days: default_trial_days(),
            expiring_soon_days: default_expiring_soon_days(),
            sweep_batch_size: default_sweep_batch_size(),
            hash_secrets: String::new(),
        }
    }
}

fn default_trial_days() -> i64 {
    14
}

fn default_expiring_soon_days() -> u32 {
    3
}

fn default_sweep_batch_size() -> u32 {
    100
}
