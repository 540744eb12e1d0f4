//! Error types for the tilestream crate.

use std::fmt;

/// Result type for tilestream operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while streaming tiles.
///
/// Content errors for a single tile never propagate past the streaming
/// manager; they are logged and the tile is retried on a later frame.
#[derive(Debug)]
pub enum Error {
    /// HTTP request failed.
    Http {
        /// The URL that failed.
        url: String,
        /// The error message.
        message: String,
    },
    /// HTTP response had a non-success status code.
    HttpStatus {
        /// The URL that returned the error.
        url: String,
        /// The HTTP status code.
        status: u16,
    },
    /// A tileset manifest could not be parsed.
    Manifest {
        /// The manifest URL.
        url: String,
        /// Description of the problem.
        message: String,
    },
    /// A content decoder rejected a payload.
    Decode {
        /// The content URL.
        url: String,
        /// The error message.
        message: String,
    },
    /// No decoder is registered for the content's file kind.
    UnsupportedContent {
        /// The content URL.
        url: String,
        /// The file extension, if the URL had one.
        extension: Option<String>,
    },
    /// The elevation service failed or returned unusable data.
    Elevation {
        /// The error message.
        message: String,
    },
    /// Cache operation failed.
    Cache {
        /// The operation that failed.
        operation: &'static str,
        /// The error message.
        message: String,
    },
    /// Invalid data or arguments.
    InvalidData {
        /// Context for where the error occurred.
        context: &'static str,
        /// Description of what was invalid.
        detail: String,
    },
    /// A load was abandoned because its tile was unloaded first.
    Cancelled {
        /// The content URL.
        url: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http { url, message } => {
                write!(f, "http request to {url} failed: {message}")
            }
            Error::HttpStatus { url, status } => {
                write!(f, "http request to {url} returned status {status}")
            }
            Error::Manifest { url, message } => {
                write!(f, "invalid tileset manifest {url}: {message}")
            }
            Error::Decode { url, message } => {
                write!(f, "failed to decode {url}: {message}")
            }
            Error::UnsupportedContent { url, extension } => match extension {
                Some(ext) => write!(f, "no decoder for .{ext} content ({url})"),
                None => write!(f, "cannot determine content kind of {url}"),
            },
            Error::Elevation { message } => write!(f, "elevation query failed: {message}"),
            Error::Cache { operation, message } => {
                write!(f, "cache {operation} failed: {message}")
            }
            Error::InvalidData { context, detail } => {
                write!(f, "invalid {context}: {detail}")
            }
            Error::Cancelled { url } => write!(f, "load of {url} cancelled by unload"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Whether a later retry of the same content could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Http { .. } | Error::HttpStatus { .. } | Error::Decode { .. } | Error::Cache { .. }
        )
    }
}
