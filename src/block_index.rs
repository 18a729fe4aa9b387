//! Derived block trip index.
//!
//! Trips that share a block and an identical ordered stop list are folded
//! into one `block_trip_index` row, whatever service calendars they run
//! under. Every folded trip gets a `block_trip_entry` row carrying its
//! position among the trips of the same (block, service) ordered by first
//! departure.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use futures::TryStreamExt;
use serde::Serialize;
use sqlx::{Sqlite, Transaction};

use crate::error::{Result, ScheduleError};
use crate::models::{BlockTripIndexRow, ScheduleFeed};
use crate::store::{clear_block_trip_index, write_schedule, ScheduleStore};

const STOP_SEPARATOR: u8 = 0x1f;

/// The stop pattern and time span of one trip, as needed for indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct TripSchedule {
    pub trip_id: String,
    pub block_id: String,
    pub service_id: String,
    pub stop_ids: Vec<String>,
    pub first_departure: Option<i64>,
    pub last_arrival: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEntry {
    pub trip_id: String,
    pub block_id: String,
    pub service_id: String,
    pub block_trip_sequence: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedIndex {
    pub index_key: String,
    pub stop_sequence_key: String,
    pub service_ids: BTreeSet<String>,
    pub entries: Vec<PlannedEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RebuildSummary {
    pub indices: usize,
    pub entries: usize,
    pub skipped_trips: usize,
}

/// Fingerprint of an ordered stop list.
pub fn stop_sequence_key<S: AsRef<str>>(stop_ids: &[S]) -> String {
    let mut bytes = Vec::new();
    for (i, stop_id) in stop_ids.iter().enumerate() {
        if i > 0 {
            bytes.push(STOP_SEPARATOR);
        }
        bytes.extend_from_slice(stop_id.as_ref().as_bytes());
    }
    format!("{:016x}", seahash::hash(&bytes))
}

/// Orders the trips of one (block, service) and hands out 0-based sequence
/// numbers. Untimed trips go last; ties fall back to the trip id.
fn assign_block_sequences(trips: &[TripSchedule]) -> HashMap<&str, i64> {
    let mut by_block_service: BTreeMap<(&str, &str), Vec<&TripSchedule>> = BTreeMap::new();
    for trip in trips {
        by_block_service
            .entry((trip.block_id.as_str(), trip.service_id.as_str()))
            .or_default()
            .push(trip);
    }

    let mut sequences = HashMap::new();
    for ((block_id, service_id), mut block_trips) in by_block_service {
        block_trips.sort_by(|a, b| {
            (a.first_departure.is_none(), a.first_departure, &a.trip_id).cmp(&(
                b.first_departure.is_none(),
                b.first_departure,
                &b.trip_id,
            ))
        });
        for pair in block_trips.windows(2) {
            if let (Some(end), Some(start)) = (pair[0].last_arrival, pair[1].first_departure) {
                if end > start {
                    log::warn!(
                        "Trips {:?} and {:?} overlap in block {:?} under service {:?}",
                        pair[0].trip_id,
                        pair[1].trip_id,
                        block_id,
                        service_id
                    );
                }
            }
        }
        for (sequence, trip) in block_trips.into_iter().enumerate() {
            sequences.insert(trip.trip_id.as_str(), sequence as i64);
        }
    }
    sequences
}

/// Computes the index rows for a set of blocked trips. The result is sorted
/// by index key and every index's entries by trip id, so the same input
/// always produces the same plan.
pub fn plan_block_indices(trips: &[TripSchedule]) -> Vec<PlannedIndex> {
    let trips: Vec<TripSchedule> = trips
        .iter()
        .filter(|trip| !trip.block_id.trim().is_empty())
        .cloned()
        .collect();
    let sequences = assign_block_sequences(&trips);

    let mut indices: BTreeMap<String, PlannedIndex> = BTreeMap::new();
    for trip in &trips {
        let key = stop_sequence_key(&trip.stop_ids);
        let index_key = format!("{}:{}", trip.block_id, key);
        let index = indices
            .entry(index_key.clone())
            .or_insert_with(|| PlannedIndex {
                index_key,
                stop_sequence_key: key,
                service_ids: BTreeSet::new(),
                entries: vec![],
            });
        index.service_ids.insert(trip.service_id.clone());
        index.entries.push(PlannedEntry {
            trip_id: trip.trip_id.clone(),
            block_id: trip.block_id.clone(),
            service_id: trip.service_id.clone(),
            block_trip_sequence: sequences[trip.trip_id.as_str()],
        });
    }

    indices
        .into_values()
        .map(|mut index| {
            index.entries.sort_by(|a, b| a.trip_id.cmp(&b.trip_id));
            index
        })
        .collect()
}

/// Recomputes every block trip index row from the current trips and stop
/// times in one transaction. On failure the previous index stays in place.
pub async fn rebuild(store: &ScheduleStore) -> Result<RebuildSummary> {
    let mut tx = store.pool().begin().await?;
    let summary = rebuild_in(&mut tx).await?;
    tx.commit().await?;
    log_summary(&summary);
    Ok(summary)
}

/// Writes `feed` over the stored schedule and rebuilds the index from it as
/// one unit. If either step fails the previous schedule and index remain.
pub async fn replace_and_rebuild(
    store: &ScheduleStore,
    feed: &ScheduleFeed,
    imported_at: i64,
) -> Result<RebuildSummary> {
    let mut tx = store.pool().begin().await?;
    write_schedule(&mut tx, feed, imported_at).await?;
    let summary = rebuild_in(&mut tx).await?;
    tx.commit().await?;
    log_summary(&summary);
    Ok(summary)
}

fn log_summary(summary: &RebuildSummary) {
    log::info!(
        "Rebuilt block trip index: {} indices, {} entries, {} trips without block.",
        summary.indices,
        summary.entries,
        summary.skipped_trips
    );
}

async fn rebuild_in(tx: &mut Transaction<'_, Sqlite>) -> Result<RebuildSummary> {

    let trip_rows: Vec<(String, Option<String>, String)> =
        sqlx::query_as("SELECT id, block_id, service_id FROM trips ORDER BY id")
            .fetch_all(&mut **tx)
            .await?;

    let mut skipped_trips = 0;
    let mut trips: Vec<TripSchedule> = vec![];
    let mut trip_positions: HashMap<String, usize> = HashMap::new();
    for (trip_id, block_id, service_id) in trip_rows {
        match block_id {
            Some(block_id) if !block_id.trim().is_empty() => {
                trip_positions.insert(trip_id.clone(), trips.len());
                trips.push(TripSchedule {
                    trip_id,
                    block_id,
                    service_id,
                    stop_ids: vec![],
                    first_departure: None,
                    last_arrival: None,
                });
            }
            _ => skipped_trips += 1,
        }
    }

    {
        let mut stop_times = sqlx::query_as::<_, (String, String, Option<i64>, Option<i64>)>(
            r#"
            SELECT trip_id, stop_id, arrival_time, departure_time
            FROM stop_times
            ORDER BY trip_id, stop_sequence
            "#,
        )
        .fetch(&mut **tx);

        while let Some((trip_id, stop_id, arrival, departure)) = stop_times.try_next().await? {
            let Some(&position) = trip_positions.get(&trip_id) else {
                continue;
            };
            let trip = &mut trips[position];
            trip.stop_ids.push(stop_id);
            if let Some(departure) = departure {
                trip.first_departure =
                    Some(trip.first_departure.map_or(departure, |d| d.min(departure)));
            }
            if let Some(arrival) = arrival {
                trip.last_arrival = Some(trip.last_arrival.map_or(arrival, |a| a.max(arrival)));
            }
        }
    }

    let created_at: i64 =
        sqlx::query_scalar("SELECT imported_at FROM import_metadata WHERE id = 1")
            .fetch_optional(&mut **tx)
            .await?
            .unwrap_or(0);

    let plan = plan_block_indices(&trips);

    clear_block_trip_index(tx).await?;

    let mut summary = RebuildSummary {
        indices: plan.len(),
        entries: 0,
        skipped_trips,
    };
    for (i, index) in plan.iter().enumerate() {
        let id = i as i64 + 1;
        let service_ids = serde_json::to_string(&index.service_ids)?;
        sqlx::query(
            r#"
            INSERT INTO block_trip_index (id, index_key, service_ids, stop_sequence_key, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(&index.index_key)
        .bind(&service_ids)
        .bind(&index.stop_sequence_key)
        .bind(created_at)
        .execute(&mut **tx)
        .await?;

        for entry in &index.entries {
            sqlx::query(
                r#"
                INSERT INTO block_trip_entry
                    (block_trip_index_id, trip_id, block_id, service_id, block_trip_sequence)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(id)
            .bind(&entry.trip_id)
            .bind(&entry.block_id)
            .bind(&entry.service_id)
            .bind(entry.block_trip_sequence)
            .execute(&mut **tx)
            .await?;
            summary.entries += 1;
        }
    }

    Ok(summary)
}

/// A persisted index row with its service set decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockTripIndex {
    pub id: i64,
    pub index_key: String,
    pub stop_sequence_key: String,
    pub service_ids: BTreeSet<String>,
    pub created_at: i64,
}

impl TryFrom<BlockTripIndexRow> for BlockTripIndex {
    type Error = ScheduleError;

    fn try_from(row: BlockTripIndexRow) -> Result<Self> {
        let service_ids = serde_json::from_str(&row.service_ids).map_err(|e| {
            ScheduleError::CorruptIndex(format!("{}: service_ids: {}", row.index_key, e))
        })?;
        Ok(BlockTripIndex {
            id: row.id,
            index_key: row.index_key,
            stop_sequence_key: row.stop_sequence_key,
            service_ids,
            created_at: row.created_at,
        })
    }
}

pub async fn load_indices(store: &ScheduleStore) -> Result<Vec<BlockTripIndex>> {
    store
        .block_trip_indices()
        .await?
        .into_iter()
        .map(BlockTripIndex::try_from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MEMORY_DATA_PATH;
    use crate::test_fixtures::{self, FeedBuilder, EVERY_DAY};

    fn trip(id: &str, block: &str, service: &str, stops: &[&str], span: (i64, i64)) -> TripSchedule {
        TripSchedule {
            trip_id: id.into(),
            block_id: block.into(),
            service_id: service.into(),
            stop_ids: stops.iter().map(|s| s.to_string()).collect(),
            first_departure: Some(span.0),
            last_arrival: Some(span.1),
        }
    }

    #[test]
    fn fingerprint_depends_on_order_and_boundaries() {
        assert_eq!(stop_sequence_key(&["a", "b"]), stop_sequence_key(&["a", "b"]));
        assert_ne!(stop_sequence_key(&["a", "b"]), stop_sequence_key(&["b", "a"]));
        assert_ne!(stop_sequence_key(&["ab", "c"]), stop_sequence_key(&["a", "bc"]));
        assert_eq!(stop_sequence_key(&["a"]).len(), 16);
    }

    #[test]
    fn service_variants_with_one_pattern_share_an_index() {
        let plan = plan_block_indices(&[
            trip("wk-1", "B1", "weekday", &["S1", "S2"], (100, 200)),
            trip("sat-1", "B1", "saturday", &["S1", "S2"], (150, 250)),
            trip("wk-2", "B1", "weekday", &["S1", "S2"], (300, 400)),
        ]);
        assert_eq!(plan.len(), 1);
        assert_eq!(
            plan[0].service_ids,
            BTreeSet::from(["saturday".to_string(), "weekday".to_string()])
        );
        let sequences: Vec<(&str, i64)> = plan[0]
            .entries
            .iter()
            .map(|e| (e.trip_id.as_str(), e.block_trip_sequence))
            .collect();
        assert_eq!(sequences, vec![("sat-1", 0), ("wk-1", 0), ("wk-2", 1)]);
    }

    #[test]
    fn short_turn_variants_get_their_own_index_but_one_sequence() {
        let plan = plan_block_indices(&[
            trip("late", "B1", "s1", &["S1", "S2", "S3"], (500, 600)),
            trip("short", "B1", "s1", &["S1", "S2"], (300, 400)),
            trip("early", "B1", "s1", &["S1", "S2", "S3"], (100, 200)),
        ]);
        assert_eq!(plan.len(), 2);
        let mut sequences: Vec<(String, i64)> = plan
            .iter()
            .flat_map(|index| index.entries.iter())
            .map(|e| (e.trip_id.clone(), e.block_trip_sequence))
            .collect();
        sequences.sort_by_key(|(_, sequence)| *sequence);
        assert_eq!(
            sequences,
            vec![
                ("early".to_string(), 0),
                ("short".to_string(), 1),
                ("late".to_string(), 2)
            ]
        );
    }

    #[test]
    fn blank_blocks_and_untimed_trips() {
        let mut untimed = trip("untimed", "B1", "s1", &["S1"], (0, 0));
        untimed.first_departure = None;
        untimed.last_arrival = None;
        let plan = plan_block_indices(&[
            trip("blank", " ", "s1", &["S1"], (0, 10)),
            untimed,
            trip("timed", "B1", "s1", &["S1"], (900, 1000)),
        ]);
        assert_eq!(plan.len(), 1);
        let entries = &plan[0].entries;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].trip_id, "timed");
        assert_eq!(entries[0].block_trip_sequence, 0);
        assert_eq!(entries[1].trip_id, "untimed");
        assert_eq!(entries[1].block_trip_sequence, 1);
    }

    #[test]
    fn plan_is_independent_of_input_order() {
        let trips = vec![
            trip("a", "B1", "s1", &["S1", "S2"], (100, 200)),
            trip("b", "B1", "s2", &["S1", "S2"], (100, 200)),
            trip("c", "B2", "s1", &["S2", "S1"], (300, 400)),
        ];
        let mut reversed = trips.clone();
        reversed.reverse();
        assert_eq!(plan_block_indices(&trips), plan_block_indices(&reversed));
    }

    #[tokio::test]
    async fn rebuild_indexes_blocked_trips_only() {
        let store = ScheduleStore::open(MEMORY_DATA_PATH).await.unwrap();
        store
            .replace_schedule(&test_fixtures::two_trip_block_feed(), 1_700_000_000)
            .await
            .unwrap();

        let summary = rebuild(&store).await.unwrap();
        assert_eq!(
            summary,
            RebuildSummary {
                indices: 2,
                entries: 2,
                skipped_trips: 1
            }
        );

        let indices = store.block_trip_indices().await.unwrap();
        assert_eq!(indices.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 2]);
        for index in &indices {
            assert!(index.index_key.starts_with("B1:"));
            assert_eq!(index.service_ids, r#"["s1"]"#);
            assert_eq!(index.created_at, 1_700_000_000);
        }

        let entries = store.block_trip_entries().await.unwrap();
        let t1 = entries.iter().find(|e| e.trip_id == "T1").unwrap();
        let t2 = entries.iter().find(|e| e.trip_id == "T2").unwrap();
        assert_eq!(t1.block_trip_sequence, 0);
        assert_eq!(t2.block_trip_sequence, 1);
        assert_ne!(t1.block_trip_index_id, t2.block_trip_index_id);
    }

    #[tokio::test]
    async fn rebuild_is_idempotent() {
        let store = ScheduleStore::open(MEMORY_DATA_PATH).await.unwrap();
        store
            .replace_schedule(&test_fixtures::overlapping_services_feed(), 42)
            .await
            .unwrap();

        rebuild(&store).await.unwrap();
        let first = (
            store.block_trip_indices().await.unwrap(),
            store.block_trip_entries().await.unwrap(),
        );
        rebuild(&store).await.unwrap();
        let second = (
            store.block_trip_indices().await.unwrap(),
            store.block_trip_entries().await.unwrap(),
        );
        assert_eq!(first, second);
        assert_eq!(first.0.len(), 1);
        assert_eq!(first.0[0].service_ids, r#"["wk","xtra"]"#);
    }

    #[tokio::test]
    async fn sequences_increase_with_departure_and_never_overlap() {
        let store = ScheduleStore::open(MEMORY_DATA_PATH).await.unwrap();
        let feed = FeedBuilder::new()
            .route("R1")
            .stops(&["S1", "S2"])
            .calendar("s1", EVERY_DAY, "20250101", "20251231")
            .trip("c", "R1", "s1", Some("B1"), &[("S1", 3000, 3000), ("S2", 3500, 3500)])
            .trip("a", "R1", "s1", Some("B1"), &[("S1", 1000, 1000), ("S2", 1500, 1500)])
            .trip("b", "R1", "s1", Some("B1"), &[("S2", 2000, 2000), ("S1", 2500, 2500)])
            .build();
        store.replace_schedule(&feed, 1).await.unwrap();
        rebuild(&store).await.unwrap();

        let spans: Vec<(i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT e.block_trip_sequence, MIN(st.departure_time), MAX(st.arrival_time)
            FROM block_trip_entry e JOIN stop_times st ON st.trip_id = e.trip_id
            WHERE e.block_id = 'B1' AND e.service_id = 's1'
            GROUP BY e.trip_id, e.block_trip_sequence
            ORDER BY e.block_trip_sequence
            "#,
        )
        .fetch_all(store.pool())
        .await
        .unwrap();

        assert_eq!(
            spans.iter().map(|s| s.0).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        for pair in spans.windows(2) {
            assert!(pair[0].1 < pair[1].1);
            assert!(pair[0].2 <= pair[1].1);
        }
    }

    #[tokio::test]
    async fn reimport_clears_the_index_until_rebuilt() {
        let store = ScheduleStore::open(MEMORY_DATA_PATH).await.unwrap();
        store
            .replace_schedule(&test_fixtures::two_trip_block_feed(), 1)
            .await
            .unwrap();
        rebuild(&store).await.unwrap();
        assert!(!store.block_trip_entries().await.unwrap().is_empty());

        store
            .replace_schedule(&test_fixtures::overlapping_services_feed(), 2)
            .await
            .unwrap();
        assert!(store.block_trip_entries().await.unwrap().is_empty());

        rebuild(&store).await.unwrap();
        let entries = store.block_trip_entries().await.unwrap();
        assert!(entries.iter().all(|e| e.block_id == "B2"));
    }

    #[tokio::test]
    async fn load_indices_decodes_service_sets_and_flags_corrupt_rows() {
        let store = ScheduleStore::open(MEMORY_DATA_PATH).await.unwrap();
        store
            .replace_schedule(&test_fixtures::overlapping_services_feed(), 7)
            .await
            .unwrap();
        rebuild(&store).await.unwrap();

        let indices = load_indices(&store).await.unwrap();
        assert_eq!(indices.len(), 1);
        assert_eq!(
            indices[0].service_ids,
            BTreeSet::from(["wk".to_string(), "xtra".to_string()])
        );

        sqlx::query("UPDATE block_trip_index SET service_ids = 'wk,xtra'")
            .execute(store.pool())
            .await
            .unwrap();
        let err = load_indices(&store).await.unwrap_err();
        assert!(matches!(err, ScheduleError::CorruptIndex(_)));
        assert!(!err.is_validation());
    }
}
