use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error fetching {location}: {reason}")]
    Network { location: String, reason: String },
    #[error("credential rejected by {location} (HTTP {status})")]
    Auth { location: String, status: u16 },
    #[error("invalid document source {location:?}: {reason}")]
    InvalidSource { location: String, reason: String },
}

impl FetchError {
    pub fn network(location: impl Into<String>, reason: impl ToString) -> Self {
        FetchError::Network {
            location: location.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to decode document: {reason}")]
pub struct DecodeError {
    pub reason: String,
}

impl DecodeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Keeps the whole context chain of an engine error.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// Document-level failure. Terminal for the load attempt that produced it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// A single page failed; absorbed by the scheduler.
#[derive(Debug, Clone, Error)]
#[error("page {page} failed to render: {reason}")]
pub struct PageRenderError {
    pub page: usize,
    pub reason: String,
}

impl PageRenderError {
    pub fn new(page: usize, err: &anyhow::Error) -> Self {
        Self {
            page,
            reason: format!("{err:#}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PageCacheError {
    #[error("page {index} is outside 0..{page_count}")]
    OutOfRange { index: usize, page_count: usize },
    #[error("page {index} was already written")]
    AlreadyFilled { index: usize },
    #[error("write from stale generation {stale} (current {current})")]
    StaleGeneration { stale: u64, current: u64 },
}
