//! Error taxonomy for the Quadra client.

use std::time::Duration;

use thiserror::Error;

pub type QuadraResult<T> = Result<T, QuadraError>;

/// Error label sent by the server as the first segment of a
/// `"<LABEL>: <message>"` error body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerErrorKind {
    MalformedQuery,
    MalformedData,
    UnsupportedQueryLanguage,
    UnsupportedFileFormat,
    PreconditionFailed,
    QueryTimeout,
    Io,
    /// The server did not use a recognized label; the full body is kept
    /// as the message.
    Unclassified,
}

impl ServerErrorKind {
    fn from_label(label: &str) -> Option<Self> {
        match label {
            "MALFORMED QUERY" => Some(Self::MalformedQuery),
            "MALFORMED DATA" => Some(Self::MalformedData),
            "UNSUPPORTED QUERY LANGUAGE" => Some(Self::UnsupportedQueryLanguage),
            "UNSUPPORTED FILE FORMAT" => Some(Self::UnsupportedFileFormat),
            "PRECONDITION FAILED" => Some(Self::PreconditionFailed),
            "QUERY TIMEOUT" => Some(Self::QueryTimeout),
            "IO EXCEPTION" => Some(Self::Io),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum QuadraError {
    /// The server answered 401.
    #[error("unauthorized: check username/password for this server")]
    Unauthorized,

    /// Any other non-2xx answer, with the parsed error label.
    #[error("server error ({kind:?}): {message}")]
    Server {
        kind: ServerErrorKind,
        message: String,
    },

    /// Connect/read failure below the HTTP layer.
    #[error("{message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// A 2xx body that the bound response handler could not decode.
    #[error("malformed response body: {0}")]
    Decode(String),

    /// Stored-procedure wire codec failure (truncated input, bad tag,
    /// unencodable value).
    #[error("wire codec error: {0}")]
    Codec(String),

    /// No pooled connection became available within the configured wait.
    #[error("no connection available after waiting {waited:?}")]
    PoolExhausted { waited: Duration },

    #[error("connection pool is closed")]
    PoolClosed,

    /// API misuse that must fail fast instead of guessing (e.g.
    /// `overwrite = true` uploads).
    #[error("unsupported usage: {0}")]
    Misuse(String),
}

impl QuadraError {
    /// Parse a non-2xx error body of the form `"<LABEL>: <message>"` into
    /// a typed server error. Bodies without a recognized label are kept
    /// whole as unclassified.
    pub(crate) fn from_error_body(body: &str) -> Self {
        if let Some(idx) = body.find(':') {
            let label = body[..idx].trim();
            if let Some(kind) = ServerErrorKind::from_label(label) {
                return QuadraError::Server {
                    kind,
                    message: body[idx + 1..].trim_start().to_string(),
                };
            }
        }
        QuadraError::Server {
            kind: ServerErrorKind::Unclassified,
            message: body.to_string(),
        }
    }

    /// Rewrite a low-level connect failure into something actionable.
    ///
    /// A refused connection while a backend session is active almost always
    /// means the session port is not reachable from this host (firewall, or
    /// the session has expired and its port was reclaimed). That is the
    /// single most common deployment failure, so name it instead of
    /// surfacing a bare I/O error.
    pub(crate) fn from_transport(err: reqwest::Error, session_active: bool) -> Self {
        let message = if err.is_connect() && session_active {
            format!(
                "could not reach the backend session ({err}); \
                 the session port may be blocked or the session may have \
                 expired (its lifetime elapsed while idle)"
            )
        } else if err.is_connect() {
            format!("could not connect to the server: {err}")
        } else if err.is_timeout() {
            format!("request timed out: {err}")
        } else {
            format!("transport failure: {err}")
        };
        QuadraError::Network {
            message,
            source: Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_labeled_error_bodies() {
        let err = QuadraError::from_error_body("MALFORMED QUERY: unexpected token ')'");
        match err {
            QuadraError::Server { kind, message } => {
                assert_eq!(kind, ServerErrorKind::MalformedQuery);
                assert_eq!(message, "unexpected token ')'");
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[test]
    fn keeps_unlabeled_bodies_whole() {
        let err = QuadraError::from_error_body("something exploded: badly");
        match err {
            QuadraError::Server { kind, message } => {
                assert_eq!(kind, ServerErrorKind::Unclassified);
                assert_eq!(message, "something exploded: badly");
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[test]
    fn parses_every_known_label() {
        for (label, kind) in [
            ("MALFORMED DATA", ServerErrorKind::MalformedData),
            ("UNSUPPORTED QUERY LANGUAGE", ServerErrorKind::UnsupportedQueryLanguage),
            ("UNSUPPORTED FILE FORMAT", ServerErrorKind::UnsupportedFileFormat),
            ("PRECONDITION FAILED", ServerErrorKind::PreconditionFailed),
            ("QUERY TIMEOUT", ServerErrorKind::QueryTimeout),
            ("IO EXCEPTION", ServerErrorKind::Io),
        ] {
            match QuadraError::from_error_body(&format!("{label}: boom")) {
                QuadraError::Server { kind: k, .. } => assert_eq!(k, kind),
                other => panic!("expected server error, got {other:?}"),
            }
        }
    }
}
