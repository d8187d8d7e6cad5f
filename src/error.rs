use std::error::Error;
use std::fmt;

/// Failures surfaced by the extractor and its collaborators.
///
/// Workers keep their first error; after every worker has been joined the
/// extractor reports the one from the lowest thread id. Counters accumulated
/// up to the failure are kept either way.
#[non_exhaustive]
#[derive(Debug)]
pub enum JoinError {
    /// The table cursor could not be opened or a requested column is missing.
    SourceOpen(String),
    /// A cell could not be decoded mid-stream.
    SourceRead { row_id: i64, reason: String },
    /// A spot violated its declared length invariants while running strict.
    InvalidSpot { row_id: i64 },
    /// Writer I/O failure. Fatal to the run.
    WriteFail(std::io::Error),
    /// Worker-side infrastructure failure: thread pool, shared queue, panic.
    Worker(String),
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::SourceOpen(reason) => write!(f, "cannot open table cursor: {reason}"),
            JoinError::SourceRead { row_id, reason } => {
                write!(f, "row #{row_id}: cell read failed: {reason}")
            }
            JoinError::InvalidSpot { row_id } => {
                write!(f, "row #{row_id}: spot violates its declared length invariants")
            }
            JoinError::WriteFail(e) => write!(f, "write failed: {e}"),
            JoinError::Worker(reason) => write!(f, "worker failure: {reason}"),
        }
    }
}

impl Error for JoinError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            JoinError::WriteFail(e) => Some(e),
            _ => None,
        }
    }
}
