//! Error types for romql.

use thiserror::Error;

/// The main error type for romql operations.
#[derive(Debug, Error)]
pub enum RomqlError {
    /// The filter text could not be tokenized.
    #[error("Lex error at position {position}: {message}")]
    Lex { position: usize, message: String },

    /// The token stream does not form a valid expression.
    #[error("Parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    /// A filter term cannot be reduced to one column and one value.
    #[error("Translation error: {0}")]
    Translation(String),

    /// An identifier in the filter names no catalog column.
    #[error("Unknown column '{name}'{}", suggestion.as_ref().map(|s| format!(". Did you mean '{}'?", s)).unwrap_or_default())]
    UnknownIdentifier {
        name: String,
        suggestion: Option<String>,
    },

    /// Attach target is not a usable database, or a schema is not attached.
    #[error("Schema error: {0}")]
    Schema(String),

    /// The database engine rejected a statement.
    #[error("Engine error: {message}\n  statement: {statement}")]
    Engine { statement: String, message: String },

    /// Configuration or catalog definition error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RomqlError {
    /// Create a lex error at the given byte offset.
    pub fn lex(position: usize, message: impl Into<String>) -> Self {
        Self::Lex {
            position,
            message: message.into(),
        }
    }

    /// Create a parse error at the given byte offset.
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    /// Wrap an engine failure together with the statement that caused it.
    pub fn engine(statement: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Engine {
            statement: statement.into(),
            message: err.to_string(),
        }
    }

    /// Filter-level errors leave every piece of state intact; the caller
    /// may keep its previous filter or treat the filter as empty.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Lex { .. }
                | Self::Parse { .. }
                | Self::Translation(_)
                | Self::UnknownIdentifier { .. }
        )
    }
}

/// Result type alias for romql operations.
pub type RomqlResult<T> = Result<T, RomqlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RomqlError::lex(7, "unterminated string");
        assert_eq!(err.to_string(), "Lex error at position 7: unterminated string");
    }

    #[test]
    fn test_unknown_identifier_display() {
        let err = RomqlError::UnknownIdentifier {
            name: "Publsher".to_string(),
            suggestion: Some("Publisher".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Unknown column 'Publsher'. Did you mean 'Publisher'?"
        );

        let err = RomqlError::UnknownIdentifier {
            name: "Zzz".to_string(),
            suggestion: None,
        };
        assert_eq!(err.to_string(), "Unknown column 'Zzz'");
    }

    #[test]
    fn test_recoverable() {
        assert!(RomqlError::parse(0, "x").is_recoverable());
        assert!(RomqlError::Translation("x".into()).is_recoverable());
        assert!(!RomqlError::Schema("x".into()).is_recoverable());
        assert!(!RomqlError::engine("SELECT 1", "boom").is_recoverable());
    }
}
