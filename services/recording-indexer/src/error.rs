use thiserror::Error;

/// Errors raised by the recording indexer.
///
/// Unrecognized keys are not errors on the scan path: the scanner counts them
/// and moves on. Only the push path turns them into [`IndexerError::UnrecognizedKey`].
#[derive(Error, Debug)]
pub enum IndexerError {
    /// Required configuration is missing or invalid. Fatal at startup.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Enumerating the bucket failed, including page fetch timeouts.
    #[error("Failed to list bucket {bucket}: {reason}")]
    Listing { bucket: String, reason: String },

    /// A catalog upsert failed, including upsert timeouts.
    #[error("Failed to upsert recording for {s3_key}: {reason}")]
    Store { s3_key: String, reason: String },

    /// A catalog read failed.
    #[error("Catalog query failed: {0}")]
    Query(String),

    /// The key matches neither segment naming grammar.
    #[error("Unrecognized segment key: {0}")]
    UnrecognizedKey(String),
}

impl From<config::ConfigError> for IndexerError {
    fn from(e: config::ConfigError) -> Self {
        IndexerError::Config(e.to_string())
    }
}
