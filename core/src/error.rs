//! Error tiers and the result-code classifier.
//!
//! # Design
//! Configuration errors (`ConfigError`) are found while binding a request and
//! never reach the transport. Transport errors exist only once `perform` has
//! run; `classify` maps the raw result code onto the closed `ErrorKind`
//! taxonomy and the error keeps the code and the transport's own diagnostic
//! for debugging.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::transport::{ResultCode, ValueKind};

/// Closed taxonomy every error is reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedProtocol,
    MalformedUrl,
    HostResolutionFailed,
    ConnectionFailed,
    PartialFile,
    Timeout,
    TooManyRedirects,
    Aborted,
    UnsupportedTlsVersion,
    UnsupportedHttpVersion,
    UnsupportedFeature,
    Generic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::UnsupportedProtocol => "unsupported protocol",
            ErrorKind::MalformedUrl => "malformed URL",
            ErrorKind::HostResolutionFailed => "host resolution failed",
            ErrorKind::ConnectionFailed => "connection failed",
            ErrorKind::PartialFile => "partial file",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TooManyRedirects => "too many redirects",
            ErrorKind::Aborted => "aborted",
            ErrorKind::UnsupportedTlsVersion => "unsupported TLS version",
            ErrorKind::UnsupportedHttpVersion => "unsupported HTTP version",
            ErrorKind::UnsupportedFeature => "unsupported feature",
            ErrorKind::Generic => "transport error",
        };
        f.write_str(name)
    }
}

/// Map a transport result code onto the error taxonomy. Total: anything not
/// listed is `Generic`.
pub fn classify(code: ResultCode) -> ErrorKind {
    match code {
        ResultCode::UNSUPPORTED_PROTOCOL => ErrorKind::UnsupportedProtocol,
        ResultCode::URL_MALFORMAT => ErrorKind::MalformedUrl,
        ResultCode::COULDNT_RESOLVE_HOST => ErrorKind::HostResolutionFailed,
        ResultCode::COULDNT_CONNECT => ErrorKind::ConnectionFailed,
        ResultCode::PARTIAL_FILE => ErrorKind::PartialFile,
        ResultCode::OPERATION_TIMEDOUT => ErrorKind::Timeout,
        ResultCode::TOO_MANY_REDIRECTS => ErrorKind::TooManyRedirects,
        ResultCode::ABORTED_BY_CALLBACK => ErrorKind::Aborted,
        _ => ErrorKind::Generic,
    }
}

/// Problems with the request itself, detected before any network activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("must provide a URL")]
    MissingUrl,

    #[error("invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("must provide either data, a file or a multipart form for {0}")]
    MissingBody(String),

    #[error("unsupported combination: {0}")]
    UnsupportedCombination(String),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("unsupported TLS version: {0}")]
    UnsupportedTlsVersion(String),

    #[error("unsupported HTTP version: {0}")]
    UnsupportedHttpVersion(String),

    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: &'static str },

    #[error("option {option} expects a {expected} value, got {found}")]
    OptionKind {
        option: &'static str,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("unknown info key: {0}")]
    UnknownInfo(String),

    #[error("unable to open {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no request has been bound to the session")]
    NotBound,
}

impl ConfigError {
    pub(crate) fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ConfigError::File {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::InvalidUrl { .. } => ErrorKind::MalformedUrl,
            ConfigError::UnsupportedTlsVersion(_) => ErrorKind::UnsupportedTlsVersion,
            ConfigError::UnsupportedHttpVersion(_) => ErrorKind::UnsupportedHttpVersion,
            ConfigError::UnsupportedFeature(_) => ErrorKind::UnsupportedFeature,
            _ => ErrorKind::Generic,
        }
    }
}

/// Any failure of a session call.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{kind}: {message}")]
    Transport {
        kind: ErrorKind,
        code: ResultCode,
        message: String,
    },
}

impl Error {
    /// Build a transport error from a result code and the diagnostic text
    /// the transport left behind (may be empty).
    pub fn from_code(code: ResultCode, diagnostic: &str) -> Self {
        let message = if diagnostic.is_empty() {
            code.description().to_string()
        } else {
            diagnostic.to_string()
        };
        Error::Transport {
            kind: classify(code),
            code,
            message,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(err) => err.kind(),
            Error::Transport { kind, .. } => *kind,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// The raw result code, for transport errors.
    pub fn code(&self) -> Option<ResultCode> {
        match self {
            Error::Config(_) => None,
            Error::Transport { code, .. } => Some(*code),
        }
    }
}
