//! Error type shared by the recorder, the credential provider and the
//! management client.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while recording, replaying or talking to the
/// resource manager.
///
/// None of these are retried or swallowed; they surface to the caller (or the
/// test) as soon as they happen.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Missing or invalid credential identifiers, or an unusable identity
    /// metadata endpoint. Raised before any management call is made.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Strict replay was requested but the scenario has no cassette.
    #[error("No cassette named '{name}' at {path}")]
    CassetteMissing {
        /// Scenario name the session was opened with.
        name: String,
        /// Where the cassette was expected.
        path: PathBuf,
    },

    /// A replayed request did not match any unconsumed recorded interaction.
    #[error("No matching interaction found in cassette '{cassette}' for {method} {uri}{hint}")]
    NoMatchingInteraction {
        /// Cassette being replayed.
        cassette: String,
        /// Method of the unmatched request.
        method: String,
        /// URI of the unmatched request.
        uri: String,
        /// Closest recorded candidate, pre-formatted for the message.
        hint: String,
    },

    /// The real transport failed while recording (or in bypass mode).
    #[error("Transport error: {0}")]
    Transport(String),

    /// A cassette file exists but cannot be read back.
    #[error("Malformed cassette {path}: {reason}")]
    MalformedCassette {
        /// The offending file.
        path: PathBuf,
        /// Parser or decoder message.
        reason: String,
    },

    /// Filesystem failure while persisting a cassette.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The service answered with an error status.
    #[error("Service error ({status}) {code}: {message}")]
    Service {
        /// HTTP status code.
        status: u16,
        /// Service error code, `Unknown` when the body carried none.
        code: String,
        /// Human readable message.
        message: String,
    },

    /// A request or response body could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// HTTP status used when this error crosses the `HttpClient` boundary.
    pub fn status(&self) -> u16 {
        match self {
            Self::Configuration(_) => 400,
            Self::CassetteMissing { .. } | Self::NoMatchingInteraction { .. } => 404,
            Self::Transport(_) => 502,
            Self::Service { status, .. } => http_types::StatusCode::try_from(*status)
                .map(u16::from)
                .unwrap_or(500),
            Self::MalformedCassette { .. } | Self::Io { .. } | Self::Serialization(_) => 500,
        }
    }

    /// Wrap this error so it can be returned from `HttpClient::send`.
    pub fn into_http(self) -> http_client::Error {
        let status = self.status();
        http_client::Error::new(status, self)
    }

    /// Recover the typed error from an `http_client::Error`.
    ///
    /// Errors that did not originate in this crate become [`Error::Transport`].
    pub fn from_http(error: http_client::Error) -> Self {
        match error.downcast::<Error>() {
            Ok(inner) => inner,
            Err(other) => Self::Transport(other.to_string()),
        }
    }
}
