use std::collections::BTreeSet;
use std::str::FromStr;

use indicatif::ProgressIterator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};

use crate::error::Result;
use crate::models::{BlockTripEntryRow, BlockTripIndexRow, ScheduleFeed};

pub const MEMORY_DATA_PATH: &str = ":memory:";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS agencies (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    url TEXT NOT NULL,
    timezone TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS routes (
    id TEXT PRIMARY KEY NOT NULL,
    agency_id TEXT,
    short_name TEXT,
    long_name TEXT,
    route_type INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS stops (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT,
    lat REAL,
    lon REAL
);

CREATE TABLE IF NOT EXISTS trips (
    id TEXT PRIMARY KEY NOT NULL,
    route_id TEXT NOT NULL,
    service_id TEXT NOT NULL,
    block_id TEXT,
    headsign TEXT
);
CREATE INDEX IF NOT EXISTS trips_route_id ON trips (route_id);
CREATE INDEX IF NOT EXISTS trips_block_id ON trips (block_id);

CREATE TABLE IF NOT EXISTS stop_times (
    trip_id TEXT NOT NULL,
    stop_id TEXT NOT NULL,
    stop_sequence INTEGER NOT NULL,
    arrival_time INTEGER,
    departure_time INTEGER,
    PRIMARY KEY (trip_id, stop_sequence)
);
CREATE INDEX IF NOT EXISTS stop_times_stop_id ON stop_times (stop_id, arrival_time);

CREATE TABLE IF NOT EXISTS calendar (
    service_id TEXT PRIMARY KEY NOT NULL,
    monday INTEGER NOT NULL,
    tuesday INTEGER NOT NULL,
    wednesday INTEGER NOT NULL,
    thursday INTEGER NOT NULL,
    friday INTEGER NOT NULL,
    saturday INTEGER NOT NULL,
    sunday INTEGER NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS calendar_dates (
    service_id TEXT NOT NULL,
    date TEXT NOT NULL,
    exception_type INTEGER NOT NULL,
    PRIMARY KEY (service_id, date)
);
CREATE INDEX IF NOT EXISTS calendar_dates_date ON calendar_dates (date);

CREATE TABLE IF NOT EXISTS import_metadata (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    imported_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS block_trip_index (
    id INTEGER PRIMARY KEY NOT NULL,
    index_key TEXT NOT NULL UNIQUE,
    service_ids TEXT NOT NULL,
    stop_sequence_key TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS block_trip_entry (
    block_trip_index_id INTEGER NOT NULL REFERENCES block_trip_index (id),
    trip_id TEXT NOT NULL,
    block_id TEXT NOT NULL,
    service_id TEXT NOT NULL,
    block_trip_sequence INTEGER NOT NULL,
    PRIMARY KEY (block_trip_index_id, trip_id)
);
CREATE INDEX IF NOT EXISTS block_trip_entry_trip_id ON block_trip_entry (trip_id);
CREATE INDEX IF NOT EXISTS block_trip_entry_block_id ON block_trip_entry (block_id, service_id);
"#;

/// The relational schedule store. Cloning shares the underlying pool.
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    pool: SqlitePool,
}

impl ScheduleStore {
    pub async fn open(data_path: &str) -> Result<Self> {
        let pool = if data_path == MEMORY_DATA_PATH {
            // Every connection to :memory: is its own database, so keep
            // exactly one alive for the lifetime of the pool.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
                .await?
        } else {
            let options = SqliteConnectOptions::new()
                .filename(data_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .foreign_keys(true);
            SqlitePoolOptions::new().connect_with(options).await?
        };
        log::debug!("Opened schedule store at {:?}", data_path);

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(ScheduleStore { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Clears every schedule and index table and writes `feed` in their
    /// place, all in one transaction. The block trip index is left empty;
    /// callers rebuild it afterwards.
    pub async fn replace_schedule(&self, feed: &ScheduleFeed, imported_at: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        write_schedule(&mut tx, feed, imported_at).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn route_exists(&self, route_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM routes WHERE id = ?")
            .bind(route_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// The subset of `block_ids` that some trip runs under, in one query.
    pub async fn known_blocks(&self, block_ids: &[String]) -> Result<BTreeSet<String>> {
        if block_ids.is_empty() {
            return Ok(BTreeSet::new());
        }
        let known: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT block_id FROM trips WHERE block_id IN (SELECT value FROM json_each(?))",
        )
        .bind(serde_json::to_string(block_ids)?)
        .fetch_all(&self.pool)
        .await?;
        Ok(known.into_iter().collect())
    }

    pub async fn stop_exists(&self, stop_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stops WHERE id = ?")
            .bind(stop_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn block_trip_indices(&self) -> Result<Vec<BlockTripIndexRow>> {
        let rows: Vec<(i64, String, String, String, i64)> = sqlx::query_as(
            "SELECT id, index_key, service_ids, stop_sequence_key, created_at FROM block_trip_index ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(
                |(id, index_key, service_ids, stop_sequence_key, created_at)| BlockTripIndexRow {
                    id,
                    index_key,
                    service_ids,
                    stop_sequence_key,
                    created_at,
                },
            )
            .collect())
    }

    pub async fn block_trip_entries(&self) -> Result<Vec<BlockTripEntryRow>> {
        let rows: Vec<(i64, String, String, String, i64)> = sqlx::query_as(
            r#"
            SELECT block_trip_index_id, trip_id, block_id, service_id, block_trip_sequence
            FROM block_trip_entry
            ORDER BY block_trip_index_id, trip_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(
                |(block_trip_index_id, trip_id, block_id, service_id, block_trip_sequence)| {
                    BlockTripEntryRow {
                        block_trip_index_id,
                        trip_id,
                        block_id,
                        service_id,
                        block_trip_sequence,
                    }
                },
            )
            .collect())
    }
}

/// Writes `feed` over the current schedule inside `tx`, emptying the block
/// trip index on the way.
pub(crate) async fn write_schedule(
    tx: &mut Transaction<'_, Sqlite>,
    feed: &ScheduleFeed,
    imported_at: i64,
) -> Result<()> {
    clear_block_trip_index(tx).await?;
    for table in [
        "stop_times",
        "trips",
        "calendar_dates",
        "calendar",
        "stops",
        "routes",
        "agencies",
        "import_metadata",
    ] {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut **tx)
            .await?;
    }

    log::info!("Writing {} agencies.", feed.agencies.len());
    for agency in &feed.agencies {
        sqlx::query("INSERT INTO agencies (id, name, url, timezone) VALUES (?, ?, ?, ?)")
            .bind(&agency.id)
            .bind(&agency.name)
            .bind(&agency.url)
            .bind(&agency.timezone)
            .execute(&mut **tx)
            .await?;
    }

    log::info!("Writing {} routes.", feed.routes.len());
    for route in &feed.routes {
        sqlx::query(
            "INSERT INTO routes (id, agency_id, short_name, long_name, route_type) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&route.id)
        .bind(&route.agency_id)
        .bind(&route.short_name)
        .bind(&route.long_name)
        .bind(route.route_type)
        .execute(&mut **tx)
        .await?;
    }

    log::info!("Writing {} stops.", feed.stops.len());
    for stop in &feed.stops {
        sqlx::query("INSERT INTO stops (id, name, lat, lon) VALUES (?, ?, ?, ?)")
            .bind(&stop.id)
            .bind(&stop.name)
            .bind(stop.latitude)
            .bind(stop.longitude)
            .execute(&mut **tx)
            .await?;
    }

    log::info!("Writing {} trips.", feed.trips.len());
    for trip in &feed.trips {
        sqlx::query(
            "INSERT INTO trips (id, route_id, service_id, block_id, headsign) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&trip.id)
        .bind(&trip.route_id)
        .bind(&trip.service_id)
        .bind(&trip.block_id)
        .bind(&trip.headsign)
        .execute(&mut **tx)
        .await?;
    }

    let style = indicatif::ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {human_pos:>7}/{human_len:7} {msg}",
    )
    .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar());
    for stop_time in feed
        .stop_times
        .iter()
        .progress_with_style(style)
        .with_message("Writing stop times.")
        .with_finish(indicatif::ProgressFinish::AndLeave)
    {
        sqlx::query(
            "INSERT INTO stop_times (trip_id, stop_id, stop_sequence, arrival_time, departure_time) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&stop_time.trip_id)
        .bind(&stop_time.stop_id)
        .bind(stop_time.stop_sequence)
        .bind(stop_time.arrival_time.or(stop_time.departure_time))
        .bind(stop_time.departure_time.or(stop_time.arrival_time))
        .execute(&mut **tx)
        .await?;
    }

    log::info!("Writing {} calendars.", feed.calendars.len());
    for calendar in &feed.calendars {
        sqlx::query(
            r#"
            INSERT INTO calendar
                (service_id, monday, tuesday, wednesday, thursday, friday, saturday, sunday, start_date, end_date)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&calendar.service_id)
        .bind(calendar.monday)
        .bind(calendar.tuesday)
        .bind(calendar.wednesday)
        .bind(calendar.thursday)
        .bind(calendar.friday)
        .bind(calendar.saturday)
        .bind(calendar.sunday)
        .bind(&calendar.start_date)
        .bind(&calendar.end_date)
        .execute(&mut **tx)
        .await?;
    }

    log::info!("Writing {} calendar dates.", feed.calendar_dates.len());
    for calendar_date in &feed.calendar_dates {
        sqlx::query(
            "INSERT INTO calendar_dates (service_id, date, exception_type) VALUES (?, ?, ?)",
        )
        .bind(&calendar_date.service_id)
        .bind(&calendar_date.date)
        .bind(calendar_date.exception_type.code())
        .execute(&mut **tx)
        .await?;
    }

    sqlx::query("INSERT INTO import_metadata (id, imported_at) VALUES (1, ?)")
        .bind(imported_at)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Entries go first because they reference the index rows.
pub(crate) async fn clear_block_trip_index(tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
    sqlx::query("DELETE FROM block_trip_entry")
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM block_trip_index")
        .execute(&mut **tx)
        .await?;
    Ok(())
}
