//! SWD-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::platform::{PlatformError, PlatformErrorKind};

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, SwdError>;

/// Top-level error type for Sanction Warden.
#[derive(Debug, Error)]
pub enum SwdError {
    #[error("[SWD-1101] subject {subject_id} in community {community_id} is already restricted")]
    AlreadyRestricted { community_id: u64, subject_id: u64 },

    #[error("[SWD-1201] invalid sanction record: {details}")]
    InvalidRecord { details: String },

    #[error("[SWD-2001] membership platform failure ({kind}): {details}")]
    Platform {
        kind: PlatformErrorKind,
        details: String,
    },

    #[error("[SWD-2002] {what} {id} not found")]
    NotFound { what: &'static str, id: u64 },

    #[error("[SWD-3001] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[SWD-4001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[SWD-4002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[SWD-4003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[SWD-5001] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[SWD-5002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[SWD-5003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[SWD-5900] runtime failure: {details}")]
    Runtime { details: String },
}

impl SwdError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRestricted { .. } => "SWD-1101",
            Self::InvalidRecord { .. } => "SWD-1201",
            Self::Platform { .. } => "SWD-2001",
            Self::NotFound { .. } => "SWD-2002",
            Self::Sql { .. } => "SWD-3001",
            Self::InvalidConfig { .. } => "SWD-4001",
            Self::MissingConfig { .. } => "SWD-4002",
            Self::ConfigParse { .. } => "SWD-4003",
            Self::Serialization { .. } => "SWD-5001",
            Self::Io { .. } => "SWD-5002",
            Self::ChannelClosed { .. } => "SWD-5003",
            Self::Runtime { .. } => "SWD-5900",
        }
    }

    /// Whether a later attempt might resolve the failure.
    ///
    /// Nothing in this crate retries on its own; the flag tells the sweep
    /// whether a record is worth revisiting next cycle and tells callers
    /// what they may retry. Platform permission failures are never retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Platform { kind, .. } => matches!(kind, PlatformErrorKind::Unavailable),
            Self::NotFound { .. }
            | Self::Sql { .. }
            | Self::Io { .. }
            | Self::ChannelClosed { .. }
            | Self::Runtime { .. } => true,
            _ => false,
        }
    }

    /// True for the apply precondition failure callers are expected to branch on.
    #[must_use]
    pub const fn is_already_restricted(&self) -> bool {
        matches!(self, Self::AlreadyRestricted { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<PlatformError> for SwdError {
    fn from(value: PlatformError) -> Self {
        Self::Platform {
            kind: value.kind,
            details: value.details,
        }
    }
}

impl From<rusqlite::Error> for SwdError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for SwdError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for SwdError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
