//! Structured errors for ingestion calls
//!
//! Every error carries the [`Op`] it happened in and whether retrying the call could help, so
//! callers can decide on retries without inspecting messages.
use std::{fmt::Display, time::Duration};

use kusto_client::DataFormat;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The operation an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Unknown,
    FileIngest,
    ReaderIngest,
    StreamIngest,
    MappingLookup,
    ManagerInit,
    StreamConnect,
}

impl Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown operation",
            Self::FileIngest => "file ingestion",
            Self::ReaderIngest => "reader ingestion",
            Self::StreamIngest => "streaming ingestion",
            Self::MappingLookup => "mapping lookup",
            Self::ManagerInit => "resource manager creation",
            Self::StreamConnect => "stream connection",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error("{option}() does not support mapping kind {kind}")]
    InvalidMappingKind {
        option: &'static str,
        kind: DataFormat,
    },

    #[error("ingestion mapping could not be encoded: {0}")]
    MalformedMapping(String),

    #[error("cannot use both an inline ingestion mapping and a mapping reference")]
    ConflictingMappings,

    #[error("format {format} cannot be ingested with a {kind} mapping")]
    MappingFormatMismatch {
        format: DataFormat,
        kind: DataFormat,
    },

    #[error("a format must be provided with a format option when ingesting from a reader")]
    MissingFormat,

    #[error("cannot delete the source of a reader ingestion, there is no local file")]
    DeleteSourceWithReader,

    #[error("format {0} cannot be used with streaming ingestion")]
    UnsupportedStreamFormat(DataFormat),

    #[error("invalid source '{path}': {reason}")]
    InvalidSource { path: String, reason: String },

    #[error("could not find a mapping reference for '{0}'")]
    MappingNotFound(String),

    #[error("cannot stream {size} compressed bytes, the limit is {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("failed to compress payload: {0}")]
    Compress(#[source] std::io::Error),

    #[error("bug: {0}")]
    Internal(String),

    #[error("remote call failed: {0}")]
    Remote(#[source] BoxError),

    #[error("remote call did not complete within {}", humantime::format_duration(*.0))]
    Timeout(Duration),
}

impl ErrorKind {
    /// Only failures of the remote side can go away on their own
    fn default_retryable(&self) -> bool {
        matches!(self, Self::Remote(_) | Self::Timeout(_))
    }

    /// The argument the caller passed was unusable
    pub fn is_client_args(&self) -> bool {
        matches!(
            self,
            Self::InvalidMappingKind { .. }
                | Self::MalformedMapping(_)
                | Self::ConflictingMappings
                | Self::MappingFormatMismatch { .. }
                | Self::MissingFormat
                | Self::DeleteSourceWithReader
                | Self::UnsupportedStreamFormat(_)
                | Self::InvalidSource { .. }
        )
    }
}

/// The error type of every ingestion operation
#[derive(Debug, thiserror::Error)]
#[error("{op}: {kind}")]
pub struct Error {
    op: Op,
    retryable: bool,
    #[source]
    kind: ErrorKind,
}

impl Error {
    pub fn new(op: Op, kind: ErrorKind) -> Self {
        Self {
            op,
            retryable: kind.default_retryable(),
            kind,
        }
    }

    /// Wrap a failure reported by a remote collaborator
    pub fn remote(op: Op, retryable: bool, source: impl Into<BoxError>) -> Self {
        Self {
            op,
            retryable,
            kind: ErrorKind::Remote(source.into()),
        }
    }

    pub(crate) fn internal(op: Op, msg: impl Into<String>) -> Self {
        Self::new(op, ErrorKind::Internal(msg.into()))
    }

    /// Map an error from the HTTP client, keeping its own notion of retryability
    pub(crate) fn from_client(op: Op, e: kusto_client::Error) -> Self {
        match e {
            kusto_client::Error::NoResultTable
            | kusto_client::Error::MissingColumn { .. }
            | kusto_client::Error::InvalidCell { .. } => {
                Self::internal(op, format!("problem converting management response: {e}"))
            }
            e => Self::remote(op, e.is_retryable(), e),
        }
    }

    /// Attach the operation, unless a more specific one was already recorded
    pub fn with_op(mut self, op: Op) -> Self {
        if self.op == Op::Unknown {
            self.op = op;
        }
        self
    }

    pub fn set_no_retry(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}
