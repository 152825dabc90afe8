//! Crate-wide error aggregation.
//!
//! Most modules define their own narrow `Error` enum (see `model::ModelError`,
//! `store::StoreError`, `bep::BepError`); this type exists for the few
//! boundaries that need to report across module lines — the UI-visible
//! `io_failure` diff (§7) and the control surface (§6.4).

use std::path::PathBuf;

use thiserror::Error;

/// A filesystem operation that failed, along with the OS error code if one
/// was available. Carried verbatim inside `diff::DiffKind::IoFailure` so the
/// UI surface can display "the offending path and the OS code" per §7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoFailure {
    pub path: PathBuf,
    pub os_code: Option<i32>,
    pub message: String,
}

impl IoFailure {
    pub fn from_io_error(path: PathBuf, err: &std::io::Error) -> Self {
        Self { path, os_code: err.raw_os_error(), message: err.to_string() }
    }
}

/// Top-level error type surfaced by the control surface and by components
/// that bridge several subsystems.
#[derive(Debug, Error)]
pub enum Error {
    #[error("model error: {0}")]
    Model(#[from] crate::model::ModelError),
    #[error("storage error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("bep protocol error: {0}")]
    Bep(#[from] crate::bep::BepError),
    #[error("filesystem I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("cluster is tainted; a prior diff failed to apply and the model rejects further mutation")]
    Tainted,
}

impl From<IoFailure> for Error {
    fn from(f: IoFailure) -> Self {
        Error::Io { path: f.path, message: f.message }
    }
}
