use serde::Serialize;

/// Everything one schedule import writes to the store.
#[derive(Debug, Clone, Default)]
pub struct ScheduleFeed {
    pub agencies: Vec<Agency>,
    pub routes: Vec<Route>,
    pub stops: Vec<Stop>,
    pub trips: Vec<Trip>,
    pub stop_times: Vec<StopTime>,
    pub calendars: Vec<Calendar>,
    pub calendar_dates: Vec<CalendarDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Agency {
    pub id: String,
    pub name: String,
    pub url: String,
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    pub id: String,
    pub agency_id: Option<String>,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub route_type: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stop {
    pub id: String,
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trip {
    pub id: String,
    pub route_id: String,
    pub service_id: String,
    pub block_id: Option<String>,
    pub headsign: Option<String>,
}

/// Times are seconds since local midnight of the service day and may run
/// past 86400.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopTime {
    pub trip_id: String,
    pub stop_id: String,
    pub stop_sequence: i64,
    pub arrival_time: Option<i64>,
    pub departure_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Calendar {
    pub service_id: String,
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
    /// YYYYMMDD, inclusive
    pub start_date: String,
    /// YYYYMMDD, inclusive
    pub end_date: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExceptionType {
    Added,
    Removed,
}

impl ExceptionType {
    pub fn code(self) -> i64 {
        match self {
            ExceptionType::Added => 1,
            ExceptionType::Removed => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarDate {
    pub service_id: String,
    /// YYYYMMDD
    pub date: String,
    pub exception_type: ExceptionType,
}

/// A scheduled trip matched as in progress, with its active interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveTrip {
    pub trip_id: String,
    pub route_id: String,
    pub block_id: String,
    pub service_id: String,
    pub block_trip_index_id: i64,
    pub block_trip_sequence: i64,
    pub first_departure: i64,
    pub last_arrival: i64,
}

/// One arrival/departure of a trip at a stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopEvent {
    pub trip_id: String,
    pub route_id: String,
    pub stop_sequence: i64,
    pub arrival_time: i64,
    pub departure_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockTripIndexRow {
    pub id: i64,
    pub index_key: String,
    pub service_ids: String,
    pub stop_sequence_key: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockTripEntryRow {
    pub block_trip_index_id: i64,
    pub trip_id: String,
    pub block_id: String,
    pub service_id: String,
    pub block_trip_sequence: i64,
}
