use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Database connectivity or query error
    #[error(transparent)]
    Database(#[from] mongodb::error::Error),

    /// An aggregation result row that could not be decoded
    #[error("malformed aggregation result for {query}: {source}")]
    Malformed {
        query: &'static str,
        #[source]
        source: mongodb::bson::de::Error,
    },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Type alias for collector operation results
pub type Result<T> = std::result::Result<T, Error>;
