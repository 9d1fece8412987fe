use std::error::Error as StdError;
use std::io;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Any failure that cannot be confidently attributed to any other error
    /// category in this enum.
    ///
    /// In particular this means that use of Internal is never a guarantee
    /// the error is not, for example, due to a user error - merely that it
    /// cannot be confidently determined by the code.
    Internal,

    /// The user provided invalid input or performed an action that is
    /// unsupported or impossible to complete.
    User,
}

/// Condition tags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A salt, key, passphrase, iteration count or chunk did not meet the
    /// fixed size and range requirements.
    InvalidParameters,
    /// The container header or body layout is invalid: bad magic, truncated
    /// data, or trailing bytes after the tag.
    MalformedContainer,
    /// The container carries a format version this build does not know.
    UnsupportedVersion,
    /// The stream tag did not verify due to an incorrect passphrase,
    /// tampering or corruption. Never worth retrying.
    AuthenticationFailed,
    /// Interaction with the filesystem or another reader/writer failed.
    Io,
    /// Passphrase could not be obtained from the configured reader.
    PassphraseUnavailable,
    /// Unexpected state reached within menc logic.
    InternalInvariant,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct MencError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Specific condition tag, always provided.
    pub kind: ErrorKind,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

impl MencError {
    /// Creates a new error tagged with a category and kind.
    pub fn new(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind,
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that retains the originating source error.
    pub fn with_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind,
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    pub(crate) fn invalid_parameters(msg: impl Into<String>) -> Self {
        Self::new(ErrorCategory::User, ErrorKind::InvalidParameters, msg)
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::new(ErrorCategory::User, ErrorKind::MalformedContainer, msg)
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, ErrorKind::InternalInvariant, msg)
    }

    /// Maps an I/O error from the container stream. Running out of input
    /// while reading a fixed-size field means the container is truncated.
    pub(crate) fn from_container_io(err: io::Error, msg: impl Into<String>) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::with_source(ErrorCategory::User, ErrorKind::MalformedContainer, msg, err)
        } else {
            Self::with_source(ErrorCategory::Internal, ErrorKind::Io, msg, err)
        }
    }

    pub(crate) fn io(err: io::Error, msg: impl Into<String>) -> Self {
        Self::with_source(ErrorCategory::Internal, ErrorKind::Io, msg, err)
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Returns the preserved source error if present.
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Whether the failure may go away when the operation is repeated.
    ///
    /// Only storage failures qualify; a verification failure is final.
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Io
    }

    /// Wraps the current error with a higher-level message while preserving the original as source.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        Self {
            category,
            kind,
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, MencError>;
