use thiserror::Error;

/// Top-level error type for the botdesk crates.
///
/// Subsystem crates define their own error types and implement
/// `From<BotdeskError>` so that the `?` operator works across crate
/// boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BotdeskError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for BotdeskError {
    fn from(err: toml::de::Error) -> Self {
        BotdeskError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for BotdeskError {
    fn from(err: serde_json::Error) -> Self {
        BotdeskError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for botdesk operations.
pub type Result<T> = std::result::Result<T, BotdeskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BotdeskError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_error_display_all_variants() {
        let cases: Vec<(BotdeskError, &str)> = vec![
            (
                BotdeskError::Config("bad key".to_string()),
                "Configuration error: bad key",
            ),
            (
                BotdeskError::Storage("disk full".to_string()),
                "Storage error: disk full",
            ),
            (
                BotdeskError::Serialization("invalid json".to_string()),
                "Serialization error: invalid json",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BotdeskError = io_err.into();
        assert!(matches!(err, BotdeskError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_toml_error_becomes_config() {
        let parse_err = toml::from_str::<toml::Value>("not = = valid").unwrap_err();
        let err: BotdeskError = parse_err.into();
        assert!(matches!(err, BotdeskError::Config(_)));
    }

    #[test]
    fn test_json_error_becomes_serialization() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: BotdeskError = parse_err.into();
        assert!(matches!(err, BotdeskError::Serialization(_)));
    }
}
