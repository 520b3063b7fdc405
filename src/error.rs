use thiserror::Error;

use crate::page::PageId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    IntConversion(#[from] std::num::TryFromIntError),
    #[error("page {0} does not exist")]
    NoSuchPage(PageId),
    #[error("store is exhausted, {needed} more pages are needed but only {free} of {capacity} are free")]
    StoreExhausted {
        capacity: usize,
        needed: usize,
        free: usize,
    },
    #[error("a store needs at least 2 pages, but capacity was {0}")]
    CapacityTooSmall(usize),
    #[error("page {page_id} is corrupted: {reason}")]
    CorruptedPage { page_id: PageId, reason: String },
    #[error("entry index {index} is out of bounds for page {page_id}")]
    EntryOutOfBounds { page_id: PageId, index: usize },
    #[error("range scan aborted after visiting {leaves_visited} leaves")]
    ScanAborted { leaves_visited: usize },
    #[error("malformed workload line: {reason}")]
    MalformedLine { reason: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub(crate) fn corrupted<S: Into<String>>(page_id: PageId, reason: S) -> Error {
        Error::CorruptedPage {
            page_id,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed<S: Into<String>>(reason: S) -> Error {
        Error::MalformedLine {
            reason: reason.into(),
        }
    }
}
