//! Storage credentials forwarded into local worker containers.

use std::fmt;

use crate::error::JobError;

pub const ACCESS_KEY_ID_VAR: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_ACCESS_KEY_VAR: &str = "AWS_SECRET_ACCESS_KEY";
pub const DEFAULT_REGION_VAR: &str = "AWS_DEFAULT_REGION";

/// Object storage credentials passed unmodified to every container.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

impl StorageCredentials {
    pub fn from_env() -> Result<Self, JobError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve all three variables, reporting every missing or empty one.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, JobError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credentials = Self {
            access_key_id: lookup(ACCESS_KEY_ID_VAR).unwrap_or_default(),
            secret_access_key: lookup(SECRET_ACCESS_KEY_VAR).unwrap_or_default(),
            region: lookup(DEFAULT_REGION_VAR).unwrap_or_default(),
        };
        credentials.validate()?;
        Ok(credentials)
    }

    /// Every value must be non-empty.
    pub fn validate(&self) -> Result<(), JobError> {
        let missing: Vec<&'static str> = self
            .env_pairs()
            .into_iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(name, _)| name)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(JobError::MissingCredentials(missing))
        }
    }

    /// `(name, value)` pairs in the order they are passed to containers.
    pub fn env_pairs(&self) -> [(&'static str, &str); 3] {
        [
            (ACCESS_KEY_ID_VAR, self.access_key_id.as_str()),
            (SECRET_ACCESS_KEY_VAR, self.secret_access_key.as_str()),
            (DEFAULT_REGION_VAR, self.region.as_str()),
        ]
    }
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}
