use std::path::Path;

use crate::error::Result;
use crate::gtfs_time::GTFS_DATE_FORMAT;
use crate::models::*;

/// Reads an unpacked GTFS folder into a [`ScheduleFeed`]. calendar.txt and
/// calendar_dates.txt may each be missing.
pub fn load_gtfs_folder(gtfs_folder_path: &Path) -> Result<ScheduleFeed> {
    log::info!("Loading original GTFS data from {:?}", gtfs_folder_path);
    let gtfs = gtfs_structures::RawGtfs::from_path(gtfs_folder_path)?;

    log::info!("Preparing agencies.");
    let mut agencies = vec![];
    for agency in gtfs.agencies? {
        agencies.push(Agency {
            id: agency.id.clone().unwrap_or_default(),
            name: agency.name.clone(),
            url: agency.url.clone(),
            timezone: agency.timezone.clone(),
        });
    }

    log::info!("Preparing routes.");
    let mut routes = vec![];
    for route in gtfs.routes? {
        routes.push(Route {
            id: route.id.clone(),
            agency_id: route.agency_id.clone(),
            short_name: route.short_name.clone(),
            long_name: route.long_name.clone(),
            route_type: route_type_code(route.route_type),
        });
    }

    log::info!("Preparing stops.");
    let mut stops = vec![];
    for stop in gtfs.stops? {
        stops.push(Stop {
            id: stop.id.clone(),
            name: stop.name.clone(),
            latitude: stop.latitude,
            longitude: stop.longitude,
        });
    }

    log::info!("Preparing trips.");
    let mut trips = vec![];
    for trip in gtfs.trips? {
        trips.push(Trip {
            id: trip.id.clone(),
            route_id: trip.route_id.clone(),
            service_id: trip.service_id.clone(),
            block_id: trip.block_id.clone().filter(|b| !b.trim().is_empty()),
            headsign: trip.trip_headsign.clone(),
        });
    }

    log::info!("Preparing stop times.");
    let mut stop_times = vec![];
    for stop_time in gtfs.stop_times? {
        stop_times.push(StopTime {
            trip_id: stop_time.trip_id.clone(),
            stop_id: stop_time.stop_id.clone(),
            stop_sequence: stop_time.stop_sequence as i64,
            arrival_time: stop_time.arrival_time.map(i64::from),
            departure_time: stop_time.departure_time.map(i64::from),
        });
    }

    log::info!("Preparing calendars.");
    let mut calendars = vec![];
    for calendar in gtfs.calendar.transpose()?.unwrap_or_default() {
        calendars.push(Calendar {
            service_id: calendar.id.clone(),
            monday: calendar.monday,
            tuesday: calendar.tuesday,
            wednesday: calendar.wednesday,
            thursday: calendar.thursday,
            friday: calendar.friday,
            saturday: calendar.saturday,
            sunday: calendar.sunday,
            start_date: calendar.start_date.format(GTFS_DATE_FORMAT).to_string(),
            end_date: calendar.end_date.format(GTFS_DATE_FORMAT).to_string(),
        });
    }

    let mut calendar_dates = vec![];
    for calendar_date in gtfs.calendar_dates.transpose()?.unwrap_or_default() {
        calendar_dates.push(CalendarDate {
            service_id: calendar_date.service_id.clone(),
            date: calendar_date.date.format(GTFS_DATE_FORMAT).to_string(),
            exception_type: match calendar_date.exception_type {
                gtfs_structures::Exception::Added => ExceptionType::Added,
                gtfs_structures::Exception::Deleted => ExceptionType::Removed,
            },
        });
    }

    log::info!(
        "Loaded {} routes, {} trips and {} stop times.",
        routes.len(),
        trips.len(),
        stop_times.len()
    );
    Ok(ScheduleFeed {
        agencies,
        routes,
        stops,
        trips,
        stop_times,
        calendars,
        calendar_dates,
    })
}

/// The numeric `route_type` as written in routes.txt.
fn route_type_code(route_type: gtfs_structures::RouteType) -> i64 {
    use gtfs_structures::RouteType;
    match route_type {
        RouteType::Tramway => 0,
        RouteType::Subway => 1,
        RouteType::Rail => 2,
        RouteType::Bus => 3,
        RouteType::Ferry => 4,
        RouteType::CableCar => 5,
        RouteType::Gondola => 6,
        RouteType::Funicular => 7,
        RouteType::Coach => 200,
        RouteType::Air => 1100,
        RouteType::Taxi => 1500,
        RouteType::Other(other) => other as i64,
    }
}
