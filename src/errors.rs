use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors raised while turning PGN records into chunks
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChunkerError {
    /// Header or structure of a record could not be parsed
    #[error("Malformed record: {0}")]
    MalformedRecord(String),
    /// A move could not be validated at the given node path
    #[error("Illegal move '{san}' at {path}: {reason}")]
    IllegalMove {
        path: String,
        san: String,
        reason: String,
    },
    /// The injected token counter failed
    #[error("Token count unavailable: {0}")]
    TokenCountUnavailable(String),
    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(String),
    /// JSON/TOML (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The batch run was cancelled before the input was dispatched
    #[error("Cancelled: {0}")]
    Cancelled(String),
    /// A worker panicked while processing a game
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChunkerError {
    /// Stable, short name used to group errors in the run summary
    pub fn kind(&self) -> &'static str {
        match self {
            ChunkerError::MalformedRecord(_) => "malformed_record",
            ChunkerError::IllegalMove { .. } => "illegal_move",
            ChunkerError::TokenCountUnavailable(_) => "token_count_unavailable",
            ChunkerError::Configuration(_) => "configuration",
            ChunkerError::Io(_) => "io",
            ChunkerError::Serialization(_) => "serialization",
            ChunkerError::Cancelled(_) => "cancelled",
            ChunkerError::Internal(_) => "internal",
        }
    }
}

// Convenience type alias
pub type Result<T> = std::result::Result<T, ChunkerError>;

impl From<std::io::Error> for ChunkerError {
    fn from(error: std::io::Error) -> Self {
        ChunkerError::Io(error.to_string())
    }
}

impl From<serde_json::Error> for ChunkerError {
    fn from(error: serde_json::Error) -> Self {
        ChunkerError::Serialization(format!("JSON: {}", error))
    }
}

impl From<toml::de::Error> for ChunkerError {
    fn from(error: toml::de::Error) -> Self {
        ChunkerError::Configuration(format!("TOML: {}", error))
    }
}

/// Non-fatal conditions collected per game and aggregated into the run summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkWarning {
    /// Two different inputs produced the same truncated id; resolved by suffixing
    IdCollision { base_id: String, assigned_id: String },
    /// Chunk still above budget after every compression step (but within the hard ceiling)
    OversizeAfterCompression {
        path: String,
        token_count: usize,
        budget: usize,
    },
    /// Token counter failed; a character heuristic was used instead
    TokenCountUnavailable { path: String, reason: String },
    /// Embedded-game marker left as a normal variation
    AmbiguousMarker { path: String, reason: String },
    /// Best-effort mode dropped a branch at its first illegal move
    IllegalMoveTruncated {
        path: String,
        san: String,
        reason: String,
    },
}

impl ChunkWarning {
    pub fn kind(&self) -> &'static str {
        match self {
            ChunkWarning::IdCollision { .. } => "id_collision",
            ChunkWarning::OversizeAfterCompression { .. } => "oversize_after_compression",
            ChunkWarning::TokenCountUnavailable { .. } => "token_count_unavailable",
            ChunkWarning::AmbiguousMarker { .. } => "ambiguous_marker",
            ChunkWarning::IllegalMoveTruncated { .. } => "illegal_move_truncated",
        }
    }
}

impl fmt::Display for ChunkWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkWarning::IdCollision {
                base_id,
                assigned_id,
            } => write!(f, "Id collision on {}, assigned {}", base_id, assigned_id),
            ChunkWarning::OversizeAfterCompression {
                path,
                token_count,
                budget,
            } => write!(
                f,
                "Unit '{}' is {} tokens after compression (budget {})",
                path, token_count, budget
            ),
            ChunkWarning::TokenCountUnavailable { path, reason } => {
                write!(f, "Token count estimated for '{}': {}", path, reason)
            }
            ChunkWarning::AmbiguousMarker { path, reason } => {
                write!(f, "Ambiguous embedded-game marker at '{}': {}", path, reason)
            }
            ChunkWarning::IllegalMoveTruncated { path, san, reason } => {
                write!(f, "Branch truncated at '{}' ({}): {}", path, san, reason)
            }
        }
    }
}

// Helper macros for error creation
#[macro_export]
macro_rules! malformed_record {
    ($msg:expr) => {
        $crate::errors::ChunkerError::MalformedRecord($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::errors::ChunkerError::MalformedRecord(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::errors::ChunkerError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::errors::ChunkerError::Configuration(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ChunkerError::MalformedRecord("bad header".to_string());
        assert_eq!(error.to_string(), "Malformed record: bad header");

        let error = ChunkerError::IllegalMove {
            path: "main/12.Nf3".to_string(),
            san: "Nf3".to_string(),
            reason: "no knight can reach f3".to_string(),
        };
        assert!(error.to_string().contains("main/12.Nf3"));
        assert_eq!(error.kind(), "illegal_move");
    }

    #[test]
    fn test_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: ChunkerError = io_error.into();

        match error {
            ChunkerError::Io(msg) => assert!(msg.contains("file not found")),
            _ => panic!("Expected Io"),
        }
    }

    #[test]
    fn test_error_macros() {
        let error = config_error!("target_token_budget must be > 0, got {}", 0);
        match error {
            ChunkerError::Configuration(msg) => assert!(msg.contains("got 0")),
            _ => panic!("Expected Configuration"),
        }

        let error = malformed_record!("empty record");
        assert_eq!(error.kind(), "malformed_record");
    }

    #[test]
    fn test_warning_serialization() {
        let warning = ChunkWarning::IdCollision {
            base_id: "abc".to_string(),
            assigned_id: "abc-1".to_string(),
        };
        let json = serde_json::to_value(&warning).unwrap();
        assert_eq!(json["kind"], "id_collision");
        assert_eq!(warning.kind(), "id_collision");
    }
}
