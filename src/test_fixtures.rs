use crate::models::*;

/// Small helper for assembling feeds in tests.
#[derive(Default)]
pub struct FeedBuilder {
    feed: ScheduleFeed,
}

impl FeedBuilder {
    pub fn new() -> Self {
        let mut builder = FeedBuilder::default();
        builder.feed.agencies.push(Agency {
            id: "A".into(),
            name: "Test Agency".into(),
            url: "http://test.example".into(),
            timezone: "America/Los_Angeles".into(),
        });
        builder
    }

    pub fn route(mut self, id: &str) -> Self {
        self.feed.routes.push(Route {
            id: id.into(),
            agency_id: Some("A".into()),
            short_name: Some(id.into()),
            long_name: None,
            route_type: 3,
        });
        self
    }

    pub fn stops(mut self, ids: &[&str]) -> Self {
        for id in ids {
            self.feed.stops.push(Stop {
                id: (*id).into(),
                name: Some(format!("Stop {id}")),
                latitude: Some(47.6),
                longitude: Some(-122.3),
            });
        }
        self
    }

    /// `stops` are `(stop_id, arrival, departure)` in sequence order.
    pub fn trip(
        mut self,
        id: &str,
        route_id: &str,
        service_id: &str,
        block_id: Option<&str>,
        stops: &[(&str, i64, i64)],
    ) -> Self {
        self.feed.trips.push(Trip {
            id: id.into(),
            route_id: route_id.into(),
            service_id: service_id.into(),
            block_id: block_id.map(Into::into),
            headsign: None,
        });
        for (i, (stop_id, arrival, departure)) in stops.iter().enumerate() {
            self.feed.stop_times.push(StopTime {
                trip_id: id.into(),
                stop_id: (*stop_id).into(),
                stop_sequence: i as i64 + 1,
                arrival_time: Some(*arrival),
                departure_time: Some(*departure),
            });
        }
        self
    }

    /// `weekdays` is Monday first.
    pub fn calendar(mut self, service_id: &str, weekdays: [bool; 7], start: &str, end: &str) -> Self {
        self.feed.calendars.push(Calendar {
            service_id: service_id.into(),
            monday: weekdays[0],
            tuesday: weekdays[1],
            wednesday: weekdays[2],
            thursday: weekdays[3],
            friday: weekdays[4],
            saturday: weekdays[5],
            sunday: weekdays[6],
            start_date: start.into(),
            end_date: end.into(),
        });
        self
    }

    pub fn exception(mut self, service_id: &str, date: &str, exception_type: ExceptionType) -> Self {
        self.feed.calendar_dates.push(CalendarDate {
            service_id: service_id.into(),
            date: date.into(),
            exception_type,
        });
        self
    }

    pub fn build(self) -> ScheduleFeed {
        self.feed
    }
}

pub const EVERY_DAY: [bool; 7] = [true; 7];
pub const MONDAYS: [bool; 7] = [true, false, false, false, false, false, false];

/// Block B1 on service s1: T1 spans [28800, 29400], T2 spans [29500, 30300]
/// and runs the stops in reverse. N1 has no block.
pub fn two_trip_block_feed() -> ScheduleFeed {
    FeedBuilder::new()
        .route("R1")
        .stops(&["S1", "S2", "S3"])
        .calendar("s1", EVERY_DAY, "20250101", "20251231")
        .trip(
            "T1",
            "R1",
            "s1",
            Some("B1"),
            &[("S1", 28800, 28800), ("S2", 29100, 29120), ("S3", 29400, 29400)],
        )
        .trip(
            "T2",
            "R1",
            "s1",
            Some("B1"),
            &[("S3", 29500, 29500), ("S2", 29900, 29920), ("S1", 30300, 30300)],
        )
        .trip(
            "N1",
            "R1",
            "s1",
            None,
            &[("S1", 28000, 28000), ("S3", 28600, 28600)],
        )
        .build()
}

/// Block B2 runs the same pattern under weekday service `wk` and an extra
/// service `xtra` whose trip overlaps the weekday one.
pub fn overlapping_services_feed() -> ScheduleFeed {
    FeedBuilder::new()
        .route("R2")
        .stops(&["S1", "S2"])
        .calendar("wk", EVERY_DAY, "20250101", "20251231")
        .exception("xtra", "20250106", ExceptionType::Added)
        .trip(
            "W1",
            "R2",
            "wk",
            Some("B2"),
            &[("S1", 28800, 28800), ("S2", 30000, 30000)],
        )
        .trip(
            "X1",
            "R2",
            "xtra",
            Some("B2"),
            &[("S1", 29400, 29400), ("S2", 30600, 30600)],
        )
        .build()
}
