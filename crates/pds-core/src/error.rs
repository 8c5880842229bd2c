use thiserror::Error;

/// Error taxonomy shared by every core crate (`pds-repo`, `pds-sync`,
/// `pds-storage-sqlite`). `pds-server` maps each variant onto an XRPC-style
/// HTTP response; nothing below that boundary knows about HTTP.
#[derive(Debug, Error)]
pub enum PdsError {
    /// Malformed request, bad MST key, oversize payload. Not retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Repo, record, or block absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// `KeyExists` on create, or a concurrent write was detected.
    #[error("conflict: {0}")]
    Conflict(String),

    /// CID mismatch on CAR import, bad signature, MST canonicalization
    /// violation. Fatal for the operation that raised it, always logged.
    #[error("integrity error: {0}")]
    IntegrityError(String),

    /// Storage timeout or sequencer contention. Safe to retry with backoff.
    #[error("transient error: {0}")]
    Transient(String),

    /// `subscribeRepos` cursor below the retention window or ahead of
    /// `current_seq`.
    #[error("cursor out of range: {0}")]
    CursorOutOfRange(String),

    /// Subscriber fell behind its bounded outbound buffer.
    #[error("consumer too slow")]
    ConsumerTooSlow,

    /// Storage-layer failure that doesn't fit a more specific kind.
    #[error("storage error: {0}")]
    Storage(String),

    /// Signing/verification failure below the integrity-error threshold
    /// (e.g. malformed key material supplied at startup).
    #[error("crypto error: {0}")]
    Crypto(String),
}

pub type PdsResult<T> = Result<T, PdsError>;
