use thiserror::Error;
use uuid::Uuid;

pub type PwatResult<T> = Result<T, PwatError>;

#[derive(Debug, Error)]
pub enum PwatError {
    #[error("not an attachment container (missing PAT3 tag)")]
    NotThisFormat,

    #[error("unsupported container version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },

    #[error("container format error: {0}")]
    ContainerFormat(String),

    #[error("wrong passphrase")]
    WrongPassphrase,

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("stream truncated: {0}")]
    TruncatedStream(String),

    #[error("bad attachment record: {0}")]
    BadRecord(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("digest mismatch for attachment {attmt_uuid}: {detail}")]
    DigestMismatch { attmt_uuid: Uuid, detail: String },

    #[error("cancelled by user")]
    UserCancelled,

    #[error("container belongs to database {found}, expected {expected}")]
    HeaderMismatch { expected: Uuid, found: Uuid },

    #[error("attachment not found: {0}")]
    NotFound(Uuid),

    #[error("invalid container state: {0}")]
    InvalidState(&'static str),

    #[error("config error: {0}")]
    Config(String),
}

impl PwatError {
    /// Errors that describe decoded plaintext. When one of these is raised
    /// before the trailing HMAC has been checked, the stream may simply have
    /// been tampered with, so callers authenticate before reporting them.
    pub fn is_content_error(&self) -> bool {
        matches!(
            self,
            PwatError::BadRecord(_)
                | PwatError::Compression(_)
                | PwatError::DigestMismatch { .. }
                | PwatError::HeaderMismatch { .. }
                | PwatError::UnsupportedVersion { .. }
                | PwatError::ContainerFormat(_)
        )
    }
}
