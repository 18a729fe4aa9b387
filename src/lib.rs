pub mod block_index;
pub mod calendar;
pub mod config;
pub mod error;
pub mod gtfs_import;
pub mod gtfs_time;
pub mod matcher;
pub mod models;
pub mod schedule_index;
pub mod schedule_window;
pub mod store;

#[cfg(test)]
mod test_fixtures;

pub use error::{ErrorKind, Result, ScheduleError};
pub use schedule_index::ScheduleIndex;
