//! Error and Result module.
//!
//! Mirrors the taxonomy in the design: configuration failures are fatal at
//! startup but recoverable during reload; handler/connection failures never
//! bring the process down, they are mapped to a response or logged.

use std::fmt;
use std::io;

use thiserror::Error;

/// Errors raised while loading or validating `config.json`, or while
/// loading a handler/controller artifact.
///
/// Fatal at startup (the process exits non-zero); recoverable during
/// reload, where the message becomes the reload response body.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{path}: invalid JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{field} is required for {context}")]
    MissingField {
        field: &'static str,
        context: String,
    },
    #[error("artifact {path} does not define `{symbol}`")]
    MissingSymbol { path: String, symbol: &'static str },
    #[error("artifact {path}: {reason}")]
    InvalidArtifact { path: String, reason: String },
}

/// A handler signaled a specific HTTP status via an explicit error.
///
/// Terminal for the request: the dispatcher stops running the handler and
/// the status/body below are flushed as the response.
#[derive(Debug)]
pub struct HandlerHttpError {
    pub status: http::StatusCode,
    pub log_message: Option<String>,
}

impl fmt::Display for HandlerHttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP error {}", self.status)
    }
}

impl std::error::Error for HandlerHttpError {}

/// Any other failure raised while running a handler. Becomes a 500 with
/// the failure's string form as the body.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerException(pub String);

/// The mock request's peer socket was observed closed mid-response.
/// `flush` becomes a silent no-op; this is logged once, not propagated.
#[derive(Debug, Error)]
#[error("peer closed the connection")]
pub struct ConnectionPeerClosed;

/// Either tunnel pump failed. Both halves are closed regardless; whether
/// this is logged at `info` (cancelled) or with a stack (real failure) is
/// decided by the connection driver, not by this type.
#[derive(Debug, Error)]
#[error("tunnel pump failed: {0}")]
pub struct TunnelPeerError(#[from] pub io::Error);

/// 400/404-shaped failures from the control plane.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("missing required argument `{0}`")]
    MissingArgument(&'static str),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
}

impl ControlPlaneError {
    pub fn status(&self) -> http::StatusCode {
        match self {
            ControlPlaneError::MissingArgument(_) | ControlPlaneError::BadRequest(_) => {
                http::StatusCode::BAD_REQUEST
            }
            ControlPlaneError::NotFound(_) => http::StatusCode::NOT_FOUND,
            ControlPlaneError::Unauthorized => http::StatusCode::UNAUTHORIZED,
        }
    }
}

/// Failure surfaced to a handler from the forwarding client (C5):
/// transport-level failure talking to the upstream. HTTP error statuses
/// from the upstream are *not* represented here — they pass through as a
/// normal response, per spec.
#[derive(Debug, Error)]
#[error("forward to {url} failed: {source}")]
pub struct ForwardError {
    pub url: String,
    #[source]
    pub source: hyper::Error,
}

/// Argument lookup failure used by [`crate::context::RequestContext`].
#[derive(Debug, Error)]
#[error("missing argument `{0}`")]
pub struct MissingArgument(pub String);
