//! Error types for the ga-balloons library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BalloonError`]: **Rejected or fatal**: the requested operation cannot
//!   proceed at all (duplicate job, unknown id, unreadable upload, storage
//!   failure). Returned synchronously as `Err(BalloonError)` from engine and
//!   job-manager calls.
//!
//! * [`PageError`]: **Page-level**: one page could not be rasterised or
//!   read. It halts the running job in the `error` state while the
//!   checkpoint keeps every page completed before it. It is only ever
//!   surfaced through a later status poll, never to an unrelated caller.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification used by the HTTP boundary and by callers that only
/// care about *what kind* of failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A running job already owns the content hash.
    Conflict,
    /// Unknown job id, missing checkpoint, or missing result.
    NotFound,
    /// Unreadable, corrupt, or oversize upload.
    InvalidInput,
    /// A page could not be rendered or read; see [`PageError`].
    ProcessingFailure,
    /// Storage, serialisation, or configuration failure.
    Internal,
}

/// All rejected-operation and fatal errors returned by the library.
#[derive(Debug, Error)]
pub enum BalloonError {
    // ── Rejections ────────────────────────────────────────────────────────
    /// A job for this content is already running.
    #[error("A job for drawing {hash} is already running (job {job_id})")]
    Conflict { hash: String, job_id: String },

    /// The content is briefly unavailable for a new job.
    #[error("Drawing {hash} is busy: {reason}")]
    Busy { hash: String, reason: String },

    /// No job with this id is known (never existed or already reaped).
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    /// Resume was requested but no progress has been saved for the content.
    #[error("No saved progress for drawing {hash}; start a fresh run instead")]
    CheckpointNotFound { hash: String },

    /// No finalized results exist for the content.
    #[error("No results for drawing {hash}")]
    ResultNotFound { hash: String },

    /// No upload is stored for the content.
    #[error("No stored drawing {hash}")]
    DrawingNotFound { hash: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// The upload could not be used at all.
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// The bytes were read but they are not a PDF.
    #[error("Upload is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { magic: Vec<u8> },

    /// The upload exceeds the configured size limit.
    #[error("Upload too large: {size} bytes (max {max} bytes)")]
    UploadTooLarge { size: usize, max: usize },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// A page number outside the document was requested.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    // ── Detection errors ──────────────────────────────────────────────────
    /// The configured vision provider is not initialised (missing API key etc.).
    #[error("Vision provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// Reading or writing durable state failed.
    #[error("Storage error at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored record could not be encoded or decoded.
    #[error("Corrupt record '{path}': {detail}")]
    Serialization { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BalloonError {
    /// Map this error onto the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BalloonError::Conflict { .. } | BalloonError::Busy { .. } => ErrorKind::Conflict,
            BalloonError::JobNotFound { .. }
            | BalloonError::CheckpointNotFound { .. }
            | BalloonError::ResultNotFound { .. }
            | BalloonError::DrawingNotFound { .. } => ErrorKind::NotFound,
            BalloonError::InvalidInput { .. }
            | BalloonError::NotAPdf { .. }
            | BalloonError::UploadTooLarge { .. }
            | BalloonError::CorruptPdf { .. }
            | BalloonError::PageOutOfRange { .. } => ErrorKind::InvalidInput,
            BalloonError::ProviderNotConfigured { .. }
            | BalloonError::Storage { .. }
            | BalloonError::Serialization { .. }
            | BalloonError::InvalidConfig(_)
            | BalloonError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BalloonError::Storage {
            path: path.into(),
            source,
        }
    }
}

/// A page-level failure inside a running job.
///
/// Recorded as the job's terminal `error` message; the checkpoint keeps every
/// page completed before the failing one.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The detection pipeline failed after its own retries.
    #[error("Page {page}: detection failed after {retries} retries: {detail}")]
    DetectionFailed {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// The detection call timed out.
    #[error("Page {page}: detection timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

impl PageError {
    /// Every page failure halts the job as a processing failure.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ProcessingFailure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_display_names_both_ids() {
        let e = BalloonError::Conflict {
            hash: "abc123".into(),
            job_id: "job-1".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("abc123"), "got: {msg}");
        assert!(msg.contains("job-1"), "got: {msg}");
        assert_eq!(e.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn not_found_family_maps_to_not_found() {
        for e in [
            BalloonError::JobNotFound { job_id: "x".into() },
            BalloonError::CheckpointNotFound { hash: "h".into() },
            BalloonError::ResultNotFound { hash: "h".into() },
            BalloonError::DrawingNotFound { hash: "h".into() },
        ] {
            assert_eq!(e.kind(), ErrorKind::NotFound, "{e}");
        }
    }

    #[test]
    fn page_errors_are_processing_failures() {
        let e = PageError::RenderFailed {
            page: 2,
            detail: "bad stream".into(),
        };
        assert_eq!(e.kind(), ErrorKind::ProcessingFailure);
        assert!(e.to_string().starts_with("Page 2"));
    }

    #[test]
    fn upload_errors_are_invalid_input() {
        let e = BalloonError::UploadTooLarge { size: 11, max: 10 };
        assert_eq!(e.kind(), ErrorKind::InvalidInput);
        assert!(e.to_string().contains("max 10"));

        let e = BalloonError::NotAPdf {
            magic: b"GIF8".to_vec(),
        };
        assert_eq!(e.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn page_error_display() {
        let e = PageError::DetectionFailed {
            page: 3,
            retries: 2,
            detail: "HTTP 503".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Page 3"));
        assert!(msg.contains("HTTP 503"));

        let e = PageError::Timeout { page: 7, secs: 60 };
        assert!(e.to_string().contains("60s"));
    }
}
