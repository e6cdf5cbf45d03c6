use std::path::PathBuf;
use thiserror::Error;

/// Failure while localizing a single asset.
///
/// These never abort a run: the asset store logs them, records them in the
/// failure ledger and hands the original reference back to the caller.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("HTTP {status} for {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("request for {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stylesheet {url} is not valid UTF-8")]
    Decode { url: String },

    #[error("invalid reference {reference:?}: {source}")]
    InvalidReference {
        reference: String,
        #[source]
        source: url::ParseError,
    },
}
