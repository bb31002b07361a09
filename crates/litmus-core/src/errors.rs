use thiserror::Error;

#[derive(Debug, Error)]
#[error("config error: {0}")]
pub struct ConfigError(pub String);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("{entity} already exists: {key}")]
    AlreadyExists { entity: &'static str, key: String },

    #[error("invalid state for {entity} {key}: {message}")]
    InvalidState {
        entity: &'static str,
        key: String,
        message: String,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn already_exists(entity: &'static str, key: impl ToString) -> Self {
        StoreError::AlreadyExists {
            entity,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    /// Maps UNIQUE violations to `AlreadyExists`, everything else to `Sqlite`.
    pub(crate) fn from_insert(err: rusqlite::Error, entity: &'static str, key: &str) -> Self {
        if let rusqlite::Error::SqliteFailure(code, _) = &err {
            if code.code == rusqlite::ErrorCode::ConstraintViolation
                && code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            {
                return StoreError::already_exists(entity, key);
            }
        }
        StoreError::Sqlite(err)
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),
}

/// Returns true when an error chain carries a configuration problem.
pub fn is_config_error(e: &anyhow::Error) -> bool {
    e.chain().any(|c| c.downcast_ref::<ConfigError>().is_some())
        || e.to_string().starts_with("config error")
}
