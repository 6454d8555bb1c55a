//! Error types for the checkpoint writer core.
//!
//! The central [`Error`] enum mirrors the failure taxonomy of a dump cycle:
//!
//! - `Config`: a malformed option. Callers log it and fall back to a default.
//! - `UnsupportedMode`: auto-sized or single-shared-file output was requested.
//! - `BackendIo`: the container backend failed, or the shard's token arrived
//!   poisoned by an upstream holder.
//! - `ObjectStore`: the store rejected an upload or reported error detail.
//! - `Transport`: a peer endpoint disappeared or a rank is out of range.
//! - `Protocol`: the token hand-off chain was violated.
//! - `Registry`: plugin registration or lookup failed.
//!
//! [`CompressionParamError`] is deliberately not a variant: malformed
//! compression parameters are dropped, never surfaced as an `Err`.

use crate::upload::ErrorDetails;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for a dump cycle.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A malformed option was supplied.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// The requested file-count mode has no implementation.
    #[error("Unsupported file mode: {mode}")]
    UnsupportedMode { mode: String },

    /// The container backend failed for this holder or an upstream one.
    #[error("Backend I/O error: {0}")]
    BackendIo(#[from] BackendError),

    /// The object store rejected the upload.
    #[error("Object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),

    /// Point-to-point or collective messaging failed.
    #[error("Transport error: {context}")]
    Transport { context: String },

    /// A token arrived out of order or a hand-off happened without a token.
    #[error("Protocol violation: {context}")]
    Protocol { context: String },

    /// Plugin registration or lookup failed.
    #[error("Registry error: {reason}")]
    Registry { reason: String },
}

/// A malformed option. Never fatal on its own.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for `{option}`, using {fallback}")]
    InvalidValue {
        option: &'static str,
        value: String,
        fallback: String,
    },

    #[error("missing value for `{option}`, using {fallback}")]
    MissingValue {
        option: &'static str,
        fallback: String,
    },

    #[error("value {value} for `{option}` is out of range, using {fallback}")]
    OutOfRange {
        option: &'static str,
        value: String,
        fallback: String,
    },
}

/// A compression parameter token that was dropped during parsing.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CompressionParamError {
    #[error("unrecognized compression parameter `{token}`")]
    UnknownKey { token: String },

    #[error("malformed value in compression parameter `{token}`")]
    Malformed { token: String },

    #[error("compression parameter `{token}` is out of range")]
    OutOfRange { token: String },
}

/// Failure reported by a [`StructuredFileBackend`].
///
/// [`StructuredFileBackend`]: crate::backend::StructuredFileBackend
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("failed to create container `{name}`: {reason}")]
    Create { name: String, reason: String },

    #[error("failed to open container `{name}`: {reason}")]
    Open { name: String, reason: String },

    #[error("failed to create group `{path}`: {reason}")]
    Group { path: String, reason: String },

    #[error("failed to write dataset `{dataset}`: {reason}")]
    Write { dataset: String, reason: String },

    #[error("failed to snapshot container: {reason}")]
    Snapshot { reason: String },

    #[error("failed to close container: {reason}")]
    Close { reason: String },

    #[error("failed to read container image: {reason}")]
    Read { reason: String },

    /// The token arrived already poisoned by an upstream holder.
    #[error("chain poisoned by rank {origin}: {reason}")]
    Poisoned { origin: usize, reason: String },
}

/// Failure of a single object upload. Always fatal for the process.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("upload of `{key}` finished with status `{status}`{details}")]
    Rejected {
        key: String,
        status: String,
        details: ErrorDetails,
    },

    #[error("upload of `{key}` reported error detail{details}")]
    ErrorDetail { key: String, details: ErrorDetails },

    #[error("upload of `{key}` transferred {sent} of {expected} bytes")]
    Incomplete {
        key: String,
        sent: usize,
        expected: usize,
    },
}

impl Error {
    /// Fatal errors abort the whole process instead of only the holder's chain.
    pub fn is_fatal_for_process(&self) -> bool {
        matches!(
            self,
            Self::ObjectStore(_)
                | Self::UnsupportedMode { .. }
                | Self::Transport { .. }
                | Self::Protocol { .. }
        )
    }
}
