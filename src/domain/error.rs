//! Domain error types.

/// Top-level error type for predledger.
#[derive(Debug, thiserror::Error)]
pub enum PredledgerError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("quote unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("failed to persist {target}: {reason}")]
    Persistence { target: String, reason: String },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("state document version {found} is newer than supported version {supported}")]
    StateVersion { found: u32, supported: u32 },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PredledgerError {
    pub fn unavailable(symbol: &str, reason: impl Into<String>) -> Self {
        PredledgerError::DataUnavailable {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }

    pub fn persistence(target: impl Into<String>, reason: impl ToString) -> Self {
        PredledgerError::Persistence {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, PredledgerError::DataUnavailable { .. })
    }
}

impl From<&PredledgerError> for std::process::ExitCode {
    fn from(err: &PredledgerError) -> Self {
        let code: u8 = match err {
            PredledgerError::Io(_) => 1,
            PredledgerError::ConfigParse { .. }
            | PredledgerError::ConfigMissing { .. }
            | PredledgerError::ConfigInvalid { .. } => 2,
            PredledgerError::Persistence { .. }
            | PredledgerError::Database { .. }
            | PredledgerError::DatabaseQuery { .. }
            | PredledgerError::StateVersion { .. }
            | PredledgerError::Serialization(_) => 3,
            PredledgerError::DataUnavailable { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
