use crate::error::{Result, ScheduleError};
use crate::gtfs_time::ensure_non_negative;
use crate::models::StopEvent;
use crate::store::ScheduleStore;

/// Arrivals and departures at `stop_id` where either time falls inside
/// `[window_start, window_end]`, ordered by arrival, departure, trip id.
pub async fn arrivals_departures_for_stop(
    store: &ScheduleStore,
    stop_id: &str,
    window_start: i64,
    window_end: i64,
) -> Result<Vec<StopEvent>> {
    ensure_non_negative(window_start)?;
    ensure_non_negative(window_end)?;
    if window_start > window_end {
        return Err(ScheduleError::InvalidTimeRange {
            start: window_start,
            end: window_end,
        });
    }
    if stop_id.trim().is_empty() || !store.stop_exists(stop_id).await? {
        return Err(ScheduleError::UnknownStop(stop_id.to_string()));
    }

    let rows: Vec<(String, String, i64, i64, i64)> = sqlx::query_as(
        r#"
        SELECT
            st.trip_id,
            t.route_id,
            st.stop_sequence,
            COALESCE(st.arrival_time, st.departure_time) AS arrival,
            COALESCE(st.departure_time, st.arrival_time) AS departure
        FROM stop_times st
        JOIN trips t ON t.id = st.trip_id
        WHERE st.stop_id = ?1
            AND COALESCE(st.arrival_time, st.departure_time) IS NOT NULL
            AND (
                COALESCE(st.arrival_time, st.departure_time) BETWEEN ?2 AND ?3
                OR COALESCE(st.departure_time, st.arrival_time) BETWEEN ?2 AND ?3
            )
        ORDER BY arrival, departure, st.trip_id
        "#,
    )
    .bind(stop_id)
    .bind(window_start)
    .bind(window_end)
    .fetch_all(store.pool())
    .await?;

    let events: Vec<StopEvent> = rows
        .into_iter()
        .map(
            |(trip_id, route_id, stop_sequence, arrival_time, departure_time)| StopEvent {
                trip_id,
                route_id,
                stop_sequence,
                arrival_time,
                departure_time,
            },
        )
        .collect();

    log::debug!(
        "{} events at stop {:?} in [{}, {}]",
        events.len(),
        stop_id,
        window_start,
        window_end
    );
    Ok(events)
}
