use std::collections::BTreeSet;

use chrono::Weekday;

use crate::error::Result;
use crate::gtfs_time::ServiceDate;
use crate::models::ExceptionType;
use crate::store::ScheduleStore;

fn weekday_column(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Service ids running on `date`: the weekly calendar minus removals, plus
/// additions. An addition wins even for services without a calendar row.
pub async fn active_service_ids(
    store: &ScheduleStore,
    date: &ServiceDate,
) -> Result<BTreeSet<String>> {
    let date_string = date.to_gtfs_string();
    let weekly: Vec<String> = sqlx::query_scalar(&format!(
        "SELECT service_id FROM calendar WHERE start_date <= ? AND end_date >= ? AND {} = 1",
        weekday_column(date.weekday())
    ))
    .bind(&date_string)
    .bind(&date_string)
    .fetch_all(store.pool())
    .await?;

    let exceptions: Vec<(String, i64)> =
        sqlx::query_as("SELECT service_id, exception_type FROM calendar_dates WHERE date = ?")
            .bind(&date_string)
            .fetch_all(store.pool())
            .await?;

    let exceptions = exceptions
        .into_iter()
        .filter_map(|(service_id, code)| match code {
            1 => Some((service_id, ExceptionType::Added)),
            2 => Some((service_id, ExceptionType::Removed)),
            _ => {
                log::warn!(
                    "Ignoring calendar exception with unknown type {} for service {:?} on {}",
                    code,
                    service_id,
                    date
                );
                None
            }
        });

    let active = apply_exceptions(weekly, exceptions);
    log::debug!("{} services active on {}", active.len(), date);
    Ok(active)
}

/// `(base - removed) ∪ added`
pub fn apply_exceptions(
    base: impl IntoIterator<Item = String>,
    exceptions: impl IntoIterator<Item = (String, ExceptionType)>,
) -> BTreeSet<String> {
    let mut active: BTreeSet<String> = base.into_iter().collect();
    let mut added = vec![];
    for (service_id, exception_type) in exceptions {
        match exception_type {
            ExceptionType::Removed => {
                active.remove(&service_id);
            }
            ExceptionType::Added => added.push(service_id),
        }
    }
    active.extend(added);
    active
}
