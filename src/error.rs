/// Whether a failure was the caller's fault or the store's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Infrastructure,
}

#[derive(thiserror::Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid service date {0:?}, expected YYYYMMDD")]
    InvalidDate(String),
    #[error("Invalid time {0:?}, expected seconds since midnight or HH:MM:SS")]
    InvalidTime(String),
    #[error("Invalid time range: start {start} is after end {end}")]
    InvalidTimeRange { start: i64, end: i64 },
    #[error("Unknown route: {0:?}")]
    UnknownRoute(String),
    #[error("Unknown block: {0:?}")]
    UnknownBlock(String),
    #[error("Unknown stop: {0:?}")]
    UnknownStop(String),
    #[error("Schedule store failure: {0}")]
    Store(#[from] sqlx::Error),
    #[error("Failed to read GTFS feed: {0}")]
    Feed(#[from] gtfs_structures::Error),
    #[error("Corrupt block trip index row: {0}")]
    CorruptIndex(String),
    #[error("Failed to encode query parameter: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScheduleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScheduleError::InvalidDate(_)
            | ScheduleError::InvalidTime(_)
            | ScheduleError::InvalidTimeRange { .. }
            | ScheduleError::UnknownRoute(_)
            | ScheduleError::UnknownBlock(_)
            | ScheduleError::UnknownStop(_) => ErrorKind::Validation,
            ScheduleError::Store(_)
            | ScheduleError::Feed(_)
            | ScheduleError::CorruptIndex(_)
            | ScheduleError::Json(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

pub type Result<T, E = ScheduleError> = std::result::Result<T, E>;
