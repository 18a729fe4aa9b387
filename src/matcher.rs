use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, ScheduleError};
use crate::gtfs_time::ensure_non_negative;
use crate::models::ActiveTrip;
use crate::store::ScheduleStore;

/// `(trip, route, block, service, index, sequence, first departure, last arrival)`
type CandidateRow = (String, String, String, String, i64, i64, i64, i64);

enum Membership<'a> {
    Route(&'a str),
    Blocks(&'a [String]),
}

impl Membership<'_> {
    /// SQL condition on `t`/`e` bound to parameter `?{param}`, and the value
    /// to bind there.
    fn filter(&self, param: usize) -> Result<(String, String)> {
        Ok(match *self {
            Membership::Route(route_id) => (format!("t.route_id = ?{param}"), route_id.to_string()),
            Membership::Blocks(block_ids) => (
                format!("e.block_id IN (SELECT value FROM json_each(?{param}))"),
                serde_json::to_string(block_ids)?,
            ),
        })
    }
}

async fn active_index_ids(
    store: &ScheduleStore,
    membership: Membership<'_>,
    service_ids: &BTreeSet<String>,
) -> Result<Vec<i64>> {
    if service_ids.is_empty() {
        return Ok(vec![]);
    }
    let (condition, value) = membership.filter(2)?;
    let ids = sqlx::query_scalar(&format!(
        r#"
        SELECT DISTINCT e.block_trip_index_id
        FROM block_trip_entry e
        JOIN trips t ON t.id = e.trip_id
        WHERE e.service_id IN (SELECT value FROM json_each(?1))
            AND {condition}
        ORDER BY e.block_trip_index_id
        "#
    ))
    .bind(serde_json::to_string(service_ids)?)
    .bind(value)
    .fetch_all(store.pool())
    .await?;
    Ok(ids)
}

/// Fails with the first of `block_ids`, in the given order, that no trip
/// runs under.
pub async fn ensure_known_blocks(store: &ScheduleStore, block_ids: &[String]) -> Result<()> {
    let known = store.known_blocks(block_ids).await?;
    match block_ids
        .iter()
        .find(|block_id| block_id.trim().is_empty() || !known.contains(block_id.as_str()))
    {
        Some(unknown) => Err(ScheduleError::UnknownBlock(unknown.clone())),
        None => Ok(()),
    }
}

/// Index ids with an entry on `route_id` under one of `service_ids`.
pub async fn list_active_indices_for_route(
    store: &ScheduleStore,
    route_id: &str,
    service_ids: &BTreeSet<String>,
) -> Result<Vec<i64>> {
    active_index_ids(store, Membership::Route(route_id), service_ids).await
}

/// Index ids with an entry in one of `block_ids` under one of `service_ids`.
pub async fn list_active_indices_for_blocks(
    store: &ScheduleStore,
    block_ids: &[String],
    service_ids: &BTreeSet<String>,
) -> Result<Vec<i64>> {
    if block_ids.is_empty() {
        return Ok(vec![]);
    }
    active_index_ids(store, Membership::Blocks(block_ids), service_ids).await
}

/// Trips of the given indices that match `membership` and run under one of
/// `service_ids`, with their spans aggregated from stop times.
async fn load_candidates(
    store: &ScheduleStore,
    index_ids: &[i64],
    membership: Membership<'_>,
    service_ids: &BTreeSet<String>,
) -> Result<Vec<ActiveTrip>> {
    if index_ids.is_empty() {
        return Ok(vec![]);
    }
    let (condition, value) = membership.filter(3)?;
    let rows: Vec<CandidateRow> = sqlx::query_as(&format!(
        r#"
        SELECT
            e.trip_id,
            t.route_id,
            e.block_id,
            e.service_id,
            e.block_trip_index_id,
            e.block_trip_sequence,
            MIN(st.departure_time),
            MAX(st.arrival_time)
        FROM block_trip_entry e
        JOIN trips t ON t.id = e.trip_id
        JOIN stop_times st ON st.trip_id = e.trip_id
        WHERE e.block_trip_index_id IN (SELECT value FROM json_each(?1))
            AND e.service_id IN (SELECT value FROM json_each(?2))
            AND {condition}
        GROUP BY e.block_trip_index_id, e.trip_id
        HAVING MIN(st.departure_time) IS NOT NULL AND MAX(st.arrival_time) IS NOT NULL
        "#
    ))
    .bind(serde_json::to_string(index_ids)?)
    .bind(serde_json::to_string(service_ids)?)
    .bind(value)
    .fetch_all(store.pool())
    .await?;

    Ok(rows
        .into_iter()
        .map(
            |(trip_id, route_id, block_id, service_id, index_id, sequence, first, last)| {
                ActiveTrip {
                    trip_id,
                    route_id,
                    block_id,
                    service_id,
                    block_trip_index_id: index_id,
                    block_trip_sequence: sequence,
                    first_departure: first,
                    last_arrival: last,
                }
            },
        )
        .collect())
}

/// The most recently started trip whose span reaches back to `from_time`.
pub fn select_latest_started(
    candidates: impl IntoIterator<Item = ActiveTrip>,
    current_time: i64,
    from_time: i64,
) -> Option<ActiveTrip> {
    candidates
        .into_iter()
        .filter(|trip| trip.first_departure <= current_time && trip.last_arrival >= from_time)
        .min_by(|a, b| {
            b.first_departure
                .cmp(&a.first_departure)
                .then_with(|| a.trip_id.cmp(&b.trip_id))
        })
}

/// The earliest started trip whose closed span contains `current_time`.
pub fn select_earliest_in_progress(
    candidates: impl IntoIterator<Item = ActiveTrip>,
    current_time: i64,
) -> Option<ActiveTrip> {
    candidates
        .into_iter()
        .filter(|trip| trip.first_departure <= current_time && current_time <= trip.last_arrival)
        .min_by(|a, b| {
            a.first_departure
                .cmp(&b.first_departure)
                .then_with(|| a.trip_id.cmp(&b.trip_id))
        })
}

pub async fn find_active_trip_for_route(
    store: &ScheduleStore,
    route_id: &str,
    current_time: i64,
    from_time: i64,
    service_ids: &BTreeSet<String>,
) -> Result<Option<ActiveTrip>> {
    ensure_non_negative(current_time)?;
    ensure_non_negative(from_time)?;
    if from_time > current_time {
        return Err(ScheduleError::InvalidTimeRange {
            start: from_time,
            end: current_time,
        });
    }
    if route_id.trim().is_empty() || !store.route_exists(route_id).await? {
        return Err(ScheduleError::UnknownRoute(route_id.to_string()));
    }

    let index_ids = list_active_indices_for_route(store, route_id, service_ids).await?;
    let candidates =
        load_candidates(store, &index_ids, Membership::Route(route_id), service_ids).await?;
    log::debug!(
        "Route {:?}: {} candidate trips in {} indices",
        route_id,
        candidates.len(),
        index_ids.len()
    );
    Ok(select_latest_started(candidates, current_time, from_time))
}

pub async fn find_active_trip_in_block(
    store: &ScheduleStore,
    block_id: &str,
    current_time: i64,
    service_ids: &BTreeSet<String>,
) -> Result<Option<ActiveTrip>> {
    let block_ids = [block_id.to_string()];
    let mut matches = find_active_trips_for_blocks(store, &block_ids, current_time, service_ids).await?;
    Ok(matches.remove(block_id))
}

/// Matches many blocks at once with a single index lookup and candidate
/// scan. Blocks without a trip in progress are absent from the result.
pub async fn find_active_trips_for_blocks(
    store: &ScheduleStore,
    block_ids: &[String],
    current_time: i64,
    service_ids: &BTreeSet<String>,
) -> Result<BTreeMap<String, ActiveTrip>> {
    ensure_non_negative(current_time)?;
    ensure_known_blocks(store, block_ids).await?;

    let index_ids = list_active_indices_for_blocks(store, block_ids, service_ids).await?;
    let candidates =
        load_candidates(store, &index_ids, Membership::Blocks(block_ids), service_ids).await?;

    let mut by_block: BTreeMap<String, Vec<ActiveTrip>> = BTreeMap::new();
    for candidate in candidates {
        by_block
            .entry(candidate.block_id.clone())
            .or_default()
            .push(candidate);
    }

    Ok(by_block
        .into_iter()
        .filter_map(|(block_id, trips)| {
            select_earliest_in_progress(trips, current_time).map(|trip| (block_id, trip))
        })
        .collect())
}
