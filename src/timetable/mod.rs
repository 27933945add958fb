//! Timetable store (C2): parses each line's per-trip stopping-pattern JSON
//! into a normalized, time-indexed list of trips.
//!
//! Service-day semantics (§3, GLOSSARY): all times are stored as *effective
//! seconds* since 04:00 local time of the operating day, so a trip that runs
//! past midnight stays strictly monotonic without date arithmetic at query
//! time.

pub mod error;

use std::collections::HashMap;
use std::path::Path;

pub use error::TimetableError;

use crate::catalog::{Catalog, LineId, StationId};
use crate::idnorm::normalize_train_number;

/// Seconds from local midnight to the service-day epoch (04:00).
const SERVICE_DAY_EPOCH_SECS: i64 = 4 * 3600;

/// Arena index into `Timetable::trips`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TripRef(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    OuterLoop,
    InnerLoop,
    Inbound,
    Outbound,
}

impl Direction {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "outer_loop" => Some(Direction::OuterLoop),
            "inner_loop" => Some(Direction::InnerLoop),
            "inbound" => Some(Direction::Inbound),
            "outbound" => Some(Direction::Outbound),
            _ => None,
        }
    }
}

/// A trip's operating calendar, inferred from a suffix of its base id
/// (§4.2). A brittle heuristic by design (§9) — trips the table can't
/// classify are tagged `Unknown` and excluded from serving (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Weekday,
    SaturdayHoliday,
    Unknown,
}

/// Fixed suffix -> calendar table (§4.2). Extend here if the operator adds
/// a new suffix convention; unknown suffixes fall through to `Unknown` and
/// are logged once so the brittle-heuristic signal stays observable.
fn service_type_from_suffix(base_id: &str) -> ServiceType {
    match base_id.chars().last() {
        Some('H') | Some('h') => ServiceType::Weekday,
        Some('K') | Some('k') => ServiceType::SaturdayHoliday,
        _ => {
            tracing::warn!(trip_id = %base_id, "trip id suffix does not match a known service-type convention, tagging unknown");
            ServiceType::Unknown
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StopTime {
    pub station: StationId,
    /// Effective seconds since the service-day epoch (04:00).
    pub arrival: i64,
    /// Effective seconds since the service-day epoch (04:00).
    pub departure: i64,
}

pub struct Trip {
    pub id: TripRef,
    pub line: LineId,
    pub base_id: String,
    /// `None` if the base id doesn't match the normalization pattern (§4.4).
    pub normalized_number: Option<String>,
    pub service_type: ServiceType,
    pub direction: Direction,
    pub stops: Vec<StopTime>,
    /// Extra terminal stations preserved from a split trip's last stop;
    /// `stops.last()` always carries the first of these as its station.
    pub alt_terminal_stations: Vec<StationId>,
}

impl Trip {
    pub fn first_arrival(&self) -> i64 {
        self.stops.first().map(|s| s.arrival).unwrap_or(0)
    }

    pub fn last_arrival(&self) -> i64 {
        self.stops.last().map(|s| s.arrival).unwrap_or(0)
    }
}

pub struct Timetable {
    pub trips: Vec<Trip>,
    by_line: HashMap<LineId, Vec<TripRef>>,
}

impl Timetable {
    pub fn trip(&self, r: TripRef) -> &Trip {
        &self.trips[r.0]
    }

    pub fn trips_for_line(&self, line: LineId) -> &[TripRef] {
        self.by_line.get(&line).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(serde::Deserialize)]
struct RawTimetable {
    trips: Vec<RawTrip>,
}

#[derive(serde::Deserialize)]
struct RawTrip {
    id: String,
    direction: String,
    stops: Vec<RawStopTime>,
}

#[derive(serde::Deserialize)]
struct RawStopTime {
    station: StationRef,
    arrival: String,
    departure: String,
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum StationRef {
    Single(String),
    Multi(Vec<String>),
}

impl StationRef {
    fn ids(&self) -> Vec<&str> {
        match self {
            StationRef::Single(s) => vec![s.as_str()],
            StationRef::Multi(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

/// Parse `"HH:MM"`, where `HH` may run past 24 for a trip continuing past
/// midnight, into effective seconds since the service-day epoch (04:00).
/// An hour below 4 is assumed to be the informal (non-"25:xx") spelling of
/// a post-midnight time and is rolled forward a day to preserve monotonicity
/// (§4.2, §GLOSSARY).
fn parse_service_time(raw: &str) -> Option<i64> {
    let (h, m) = raw.split_once(':')?;
    let mut hour: i64 = h.parse().ok()?;
    let minute: i64 = m.parse().ok()?;
    if !(0..60).contains(&minute) {
        return None;
    }
    if hour < 4 {
        hour += 24;
    }
    Some(hour * 3600 + minute * 60 - SERVICE_DAY_EPOCH_SECS)
}

/// Load every `timetable_<line external id>.json` file referenced by the
/// catalog, dropping malformed trips with a single logged diagnostic per
/// trip (§4.2, §7 `TripMalformed`).
pub fn load_timetables(dir: &Path, catalog: &Catalog) -> Result<Timetable, TimetableError> {
    let mut trips = Vec::new();
    let mut by_line: HashMap<LineId, Vec<TripRef>> = HashMap::new();

    for line in &catalog.lines {
        let path = dir.join(format!("timetable_{}.json", line.external_id));
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => continue, // a line with no timetable file simply serves no trips
        };
        let raw: RawTimetable = serde_json::from_str(&content).map_err(|source| TimetableError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        for raw_trip in raw.trips {
            match build_trip(line.id, &raw_trip, catalog, TripRef(trips.len())) {
                Some(trip) => {
                    by_line.entry(line.id).or_default().push(trip.id);
                    trips.push(trip);
                }
                None => {
                    tracing::warn!(line = %line.external_id, trip_id = %raw_trip.id, "dropping malformed trip");
                }
            }
        }
    }

    Ok(Timetable { trips, by_line })
}

fn build_trip(line: LineId, raw: &RawTrip, catalog: &Catalog, id: TripRef) -> Option<Trip> {
    let direction = Direction::parse(&raw.direction)?;
    if raw.stops.len() < 2 {
        return None;
    }

    let line_ref = catalog.line(line);
    let last_idx = raw.stops.len() - 1;
    let mut stops = Vec::with_capacity(raw.stops.len());
    let mut alt_terminal_stations = Vec::new();
    let mut line_positions = Vec::with_capacity(raw.stops.len());

    for (i, raw_stop) in raw.stops.iter().enumerate() {
        let ids = raw_stop.station.ids();
        let primary_external = ids.first()?;
        let station = catalog.station_id_by_external(primary_external)?;
        let position = line_ref.position_of(station)?;

        if i == last_idx {
            for extra in ids.iter().skip(1) {
                if let Some(alt) = catalog.station_id_by_external(extra) {
                    alt_terminal_stations.push(alt);
                }
            }
        }

        let arrival = parse_service_time(&raw_stop.arrival)?;
        let departure = parse_service_time(&raw_stop.departure)?;
        if arrival > departure {
            return None;
        }

        line_positions.push(position);
        stops.push(StopTime { station, arrival, departure });
    }

    // Stop times must strictly increase trip-wide.
    for w in stops.windows(2) {
        if w[1].arrival <= w[0].departure {
            return None;
        }
    }

    // Station sequence must be a contiguous, monotonic traversal of the
    // line's ordered station list (no teleportation), allowing wraparound
    // at either end for a closed-loop line.
    if !is_contiguous_traversal(&line_positions, line_ref.station_order.len(), line_ref.closed_loop) {
        return None;
    }

    let normalized_number = normalize_train_number(&raw.id);
    let service_type = service_type_from_suffix(&raw.id);

    Some(Trip {
        id,
        line,
        base_id: raw.id.clone(),
        normalized_number,
        service_type,
        direction,
        stops,
        alt_terminal_stations,
    })
}

/// A traversal is contiguous if each consecutive pair of line-station
/// positions differs by the same unit step (+1 or -1), with wraparound
/// between the first and last index permitted only on a closed loop.
fn is_contiguous_traversal(positions: &[usize], line_len: usize, closed_loop: bool) -> bool {
    if positions.len() < 2 {
        return true;
    }
    let step = |a: usize, b: usize| -> Option<i64> {
        let diff = b as i64 - a as i64;
        if diff == 1 || diff == -1 {
            return Some(diff);
        }
        if closed_loop && line_len > 1 {
            if a == line_len - 1 && b == 0 {
                return Some(1);
            }
            if a == 0 && b == line_len - 1 {
                return Some(-1);
            }
        }
        None
    };

    let mut expected: Option<i64> = None;
    for w in positions.windows(2) {
        let Some(d) = step(w[0], w[1]) else { return false };
        match expected {
            None => expected = Some(d),
            Some(e) if e != d => return false,
            _ => {}
        }
    }
    true
}
