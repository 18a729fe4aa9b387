use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tokio::sync::RwLock;

use crate::block_index::{self, BlockTripIndex, RebuildSummary};
use crate::calendar;
use crate::config::AppConfig;
use crate::error::{Result, ScheduleError};
use crate::gtfs_import;
use crate::gtfs_time::ServiceDate;
use crate::matcher;
use crate::models::{ActiveTrip, ScheduleFeed, StopEvent};
use crate::schedule_window;
use crate::store::ScheduleStore;

/// Entry point for schedule lookups. Readers share the lock; imports and
/// rebuilds hold it exclusively so no reader sees a half-written index.
///
/// Share it between tasks as `Arc<ScheduleIndex>`.
#[derive(Debug)]
pub struct ScheduleIndex {
    store: ScheduleStore,
    lock: RwLock<()>,
}

impl ScheduleIndex {
    pub fn new(store: ScheduleStore) -> Self {
        ScheduleIndex {
            store,
            lock: RwLock::new(()),
        }
    }

    pub async fn open(config: &AppConfig) -> Result<Self> {
        Ok(Self::new(ScheduleStore::open(&config.data_path).await?))
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    /// Replaces the stored schedule with `feed` and rebuilds the block trip
    /// index in the same transaction, before releasing the lock.
    pub async fn import_feed(&self, feed: &ScheduleFeed) -> Result<RebuildSummary> {
        let _guard = self.lock.write().await;
        let imported_at = chrono::Utc::now().timestamp();
        block_index::replace_and_rebuild(&self.store, feed, imported_at).await
    }

    pub async fn import_gtfs_folder(&self, gtfs_folder_path: &Path) -> Result<RebuildSummary> {
        // Parsed before taking the lock; readers keep the old schedule meanwhile.
        let feed = gtfs_import::load_gtfs_folder(gtfs_folder_path)?;
        self.import_feed(&feed).await
    }

    pub async fn rebuild(&self) -> Result<RebuildSummary> {
        let _guard = self.lock.write().await;
        block_index::rebuild(&self.store).await
    }

    pub async fn block_trip_indices(&self) -> Result<Vec<BlockTripIndex>> {
        let _guard = self.lock.read().await;
        block_index::load_indices(&self.store).await
    }

    /// `date` is `YYYYMMDD`.
    pub async fn active_service_ids(&self, date: &str) -> Result<BTreeSet<String>> {
        let date = ServiceDate::parse(date)?;
        let _guard = self.lock.read().await;
        calendar::active_service_ids(&self.store, &date).await
    }

    pub async fn find_active_trip_for_route(
        &self,
        route_id: &str,
        current_time: i64,
        from_time: i64,
        service_ids: &BTreeSet<String>,
    ) -> Result<Option<ActiveTrip>> {
        let _guard = self.lock.read().await;
        matcher::find_active_trip_for_route(&self.store, route_id, current_time, from_time, service_ids)
            .await
    }

    pub async fn find_active_trip_in_block(
        &self,
        block_id: &str,
        current_time: i64,
        service_ids: &BTreeSet<String>,
    ) -> Result<Option<ActiveTrip>> {
        let _guard = self.lock.read().await;
        matcher::find_active_trip_in_block(&self.store, block_id, current_time, service_ids).await
    }

    pub async fn find_active_trips_for_blocks(
        &self,
        block_ids: &[String],
        current_time: i64,
        service_ids: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, ActiveTrip>> {
        let _guard = self.lock.read().await;
        matcher::find_active_trips_for_blocks(&self.store, block_ids, current_time, service_ids)
            .await
    }

    pub async fn list_active_indices_for_route(
        &self,
        route_id: &str,
        service_ids: &BTreeSet<String>,
    ) -> Result<Vec<i64>> {
        if route_id.trim().is_empty() {
            return Err(ScheduleError::UnknownRoute(route_id.to_string()));
        }
        let _guard = self.lock.read().await;
        if !self.store.route_exists(route_id).await? {
            return Err(ScheduleError::UnknownRoute(route_id.to_string()));
        }
        matcher::list_active_indices_for_route(&self.store, route_id, service_ids).await
    }

    pub async fn list_active_indices_for_blocks(
        &self,
        block_ids: &[String],
        service_ids: &BTreeSet<String>,
    ) -> Result<Vec<i64>> {
        let _guard = self.lock.read().await;
        matcher::ensure_known_blocks(&self.store, block_ids).await?;
        matcher::list_active_indices_for_blocks(&self.store, block_ids, service_ids).await
    }

    pub async fn arrivals_departures_for_stop(
        &self,
        stop_id: &str,
        window_start: i64,
        window_end: i64,
    ) -> Result<Vec<StopEvent>> {
        let _guard = self.lock.read().await;
        schedule_window::arrivals_departures_for_stop(&self.store, stop_id, window_start, window_end)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::MEMORY_DATA_PATH;
    use crate::test_fixtures;

    async fn memory_index() -> ScheduleIndex {
        let config = AppConfig {
            data_path: MEMORY_DATA_PATH.into(),
            ..AppConfig::default()
        };
        ScheduleIndex::open(&config).await.unwrap()
    }

    #[tokio::test]
    async fn import_builds_the_index() {
        let index = memory_index().await;
        let summary = index
            .import_feed(&test_fixtures::two_trip_block_feed())
            .await
            .unwrap();
        assert_eq!(summary.indices, 2);

        let services = index.active_service_ids("20250106").await.unwrap();
        let trip = index
            .find_active_trip_in_block("B1", 29000, &services)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(trip.trip_id, "T1");

        let indices = index.block_trip_indices().await.unwrap();
        assert_eq!(indices.len(), 2);
        assert!(indices[0].created_at > 0);
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_the_previous_import() {
        let index = memory_index().await;
        index
            .import_feed(&test_fixtures::two_trip_block_feed())
            .await
            .unwrap();
        sqlx::query(
            r#"
            CREATE TRIGGER reject_index_rows BEFORE INSERT ON block_trip_index
            BEGIN
                SELECT RAISE(ABORT, 'disk full');
            END
            "#,
        )
        .execute(index.store().pool())
        .await
        .unwrap();

        let err = index
            .import_feed(&test_fixtures::overlapping_services_feed())
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::Store(_)));

        assert_eq!(index.block_trip_indices().await.unwrap().len(), 2);
        assert!(index.store().route_exists("R1").await.unwrap());
        assert!(!index.store().route_exists("R2").await.unwrap());
        let services = index.active_service_ids("20250106").await.unwrap();
        let trip = index
            .find_active_trip_in_block("B1", 29000, &services)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(trip.trip_id, "T1");
    }

    #[tokio::test]
    async fn malformed_dates_are_rejected() {
        let index = memory_index().await;
        for date in ["2025-01-06", "20251306", "2025016", ""] {
            let err = index.active_service_ids(date).await.unwrap_err();
            assert!(matches!(err, ScheduleError::InvalidDate(_)), "{date}");
        }
    }

    #[tokio::test]
    async fn index_listings_validate_identifiers() {
        let index = memory_index().await;
        index
            .import_feed(&test_fixtures::two_trip_block_feed())
            .await
            .unwrap();
        let services = BTreeSet::from(["s1".to_string()]);

        assert_eq!(
            index
                .list_active_indices_for_route("R1", &services)
                .await
                .unwrap(),
            vec![1, 2]
        );
        assert!(matches!(
            index.list_active_indices_for_route("", &services).await,
            Err(ScheduleError::UnknownRoute(_))
        ));
        assert!(matches!(
            index
                .list_active_indices_for_blocks(&["B9".to_string()], &services)
                .await,
            Err(ScheduleError::UnknownBlock(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_observe_a_partial_rebuild() {
        let index = Arc::new(memory_index().await);
        index
            .import_feed(&test_fixtures::two_trip_block_feed())
            .await
            .unwrap();
        let services = BTreeSet::from(["s1".to_string()]);

        let mut readers = vec![];
        for _ in 0..4 {
            let index = index.clone();
            let services = services.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..20 {
                    let trip = index
                        .find_active_trip_in_block("B1", 29600, &services)
                        .await
                        .unwrap()
                        .unwrap();
                    assert_eq!(trip.trip_id, "T2");
                    assert_eq!(index.block_trip_indices().await.unwrap().len(), 2);
                }
            }));
        }
        for _ in 0..10 {
            index.rebuild().await.unwrap();
        }
        for reader in readers {
            reader.await.unwrap();
        }
    }
}
