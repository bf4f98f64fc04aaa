//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Remote service error: {0}")]
    Remote(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The waypoint generator could not satisfy a constrained request.
    #[error("No route available: {0}")]
    NoRouteAvailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A write did not reach the remote store. Absorbed by the sync worker.
    #[error("Remote write failed for {collection}/{id}: {reason}")]
    RemoteWriteFailed {
        collection: String,
        id: String,
        reason: String,
    },

    /// A stored journey breaks the stage invariants and cannot be tracked.
    #[error("Corrupt journey record {id}: {reason}")]
    CorruptRecord { id: String, reason: String },

    #[error("Remote read failed: {0}")]
    RemoteReadFailed(String),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
