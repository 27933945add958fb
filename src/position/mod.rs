//! Position materializer + query API (C5): the single externally visible
//! operation, `positions(line, at_time)`, that fuses C1-C4 into a stable
//! snapshot of every running train on a line (§4.5).

pub mod error;

use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use utoipa::ToSchema;

pub use error::PositionError;

use crate::catalog::{Catalog, Line};
use crate::fusion::{FusedTrip, FusedTripSet, FusionPublisher};
use crate::segment::{LineSegments, Segment, SegmentKind};
use crate::service_day;
use crate::timetable::{Direction, Timetable, Trip, TripRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Stopped,
    Running,
    Unknown,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Good,
    Stale,
    Suspect,
    Rejected,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub bearing: f64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Position {
    pub train_number: String,
    pub trip_id: String,
    pub line: String,
    pub direction: Direction,
    pub status: Status,
    pub station_id: Option<String>,
    pub from_station_id: Option<String>,
    pub to_station_id: Option<String>,
    pub progress: Option<f64>,
    pub location: Location,
    pub delay: i64,
    pub quality: Quality,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PositionsResponse {
    pub positions: Vec<Position>,
    pub timestamp: DateTime<Utc>,
    pub line: String,
    pub quality: Quality,
}

/// Optional cooperative cancellation: checked once per active-segment
/// iteration boundary (§5 Cancellation and timeouts).
pub struct Deadline(pub Instant);

impl Deadline {
    fn expired(&self) -> bool {
        Instant::now() > self.0
    }
}

/// `positions(line, at_time)` (§4.5). `at` defaults to "now" at the call
/// site; this function always takes an explicit instant so it stays pure
/// and testable.
#[allow(clippy::too_many_arguments)]
pub fn positions(
    catalog: &Catalog,
    timetable: &Timetable,
    segment_index: &crate::segment::SegmentIndex,
    publisher: &FusionPublisher,
    tz: chrono_tz::Tz,
    holidays: &[NaiveDate],
    line_external_id: &str,
    at: DateTime<Utc>,
    deadline: Option<&Deadline>,
) -> Result<PositionsResponse, PositionError> {
    let line_id = catalog
        .line_id_by_external(line_external_id)
        .ok_or_else(|| PositionError::LineUnknown { line_id: line_external_id.to_string() })?;
    let line = catalog.line(line_id);

    let moment = service_day::resolve(at, tz, holidays);
    let fused = publisher.current();
    let stale = publisher.is_stale(at);

    let Some(line_segs) = segment_index.line(line_id) else {
        return Ok(PositionsResponse {
            positions: Vec::new(),
            timestamp: at,
            line: line_external_id.to_string(),
            quality: if stale { Quality::Stale } else { Quality::Good },
        });
    };

    let active = line_segs.active_at(moment.effective_seconds, timetable, moment.calendar);

    let mut out = Vec::with_capacity(active.len());
    for seg in active {
        if let Some(d) = deadline {
            if d.expired() {
                return Err(PositionError::Canceled);
            }
        }
        if let Some(position) = materialize(
            seg,
            line,
            catalog,
            timetable,
            &fused,
            moment.effective_seconds,
            stale,
            line_segs,
        ) {
            out.push(position);
        }
    }

    out.sort_by(|a, b| a.train_number.cmp(&b.train_number));

    Ok(PositionsResponse {
        positions: out,
        timestamp: at,
        line: line_external_id.to_string(),
        quality: if stale { Quality::Stale } else { Quality::Good },
    })
}

fn offset_at(fused_trip: Option<&FusedTrip>, stop_index: usize) -> i64 {
    fused_trip.map(|f| f.offset_at(stop_index)).unwrap_or(0)
}

/// Shifted `[start, end)` plus the offsets applied to each endpoint, for one
/// segment under one trip's fused delay schedule (§4.5 step 4).
fn shifted_bounds(seg: &Segment, fused_trip: Option<&FusedTrip>) -> (i64, i64, i64, i64) {
    let offset_from = offset_at(fused_trip, seg.stop_index);
    let offset_to = match seg.kind {
        SegmentKind::Dwell { .. } => offset_from,
        SegmentKind::Motion { .. } => offset_at(fused_trip, seg.stop_index + 1),
    };
    (seg.t_start + offset_from, seg.t_end + offset_to, offset_from, offset_to)
}

fn trip_segments<'a>(line_segs: &'a LineSegments, trip: TripRef) -> impl Iterator<Item = &'a Segment> {
    line_segs.segments.iter().filter(move |s| s.trip == trip)
}

#[allow(clippy::too_many_arguments)]
fn materialize(
    seg: &Segment,
    line: &Line,
    catalog: &Catalog,
    timetable: &Timetable,
    fused: &FusedTripSet,
    t: i64,
    stale: bool,
    line_segs: &LineSegments,
) -> Option<Position> {
    let trip = timetable.trip(seg.trip);
    let fused_trip = fused.fused_trip(seg.trip);

    let (mut start, mut end, mut offset_from, mut offset_to) = shifted_bounds(seg, fused_trip);
    let mut chosen = seg;

    if !(t >= start && t < end) {
        let mut found = None;
        let mut first = None;
        let mut last = None;
        for candidate in trip_segments(line_segs, seg.trip) {
            let bounds = shifted_bounds(candidate, fused_trip);
            if first.is_none() {
                first = Some((candidate, bounds));
            }
            last = Some((candidate, bounds));
            if found.is_none() && t >= bounds.0 && t < bounds.1 {
                found = Some((candidate, bounds));
            }
        }
        match found {
            Some((c, (s, e, of, ot))) => {
                chosen = c;
                start = s;
                end = e;
                offset_from = of;
                offset_to = ot;
            }
            None => {
                // A fusion offset shift can push every segment later (or
                // earlier) than the unshifted window `active_at` used to pick
                // this trip. Before the trip's earliest shifted segment it is
                // still sitting at its origin; past its latest shifted
                // segment it has already finished and is simply omitted.
                match (first, last) {
                    (Some((origin, (s, e, of, ot))), _) if t < s => {
                        chosen = origin;
                        start = s;
                        end = e;
                        offset_from = of;
                        offset_to = ot;
                    }
                    (_, Some((_, (_, e, _, _)))) if t >= e => return None,
                    _ => return Some(invalid_position(trip, line, offset_to)),
                }
            }
        }
    }

    let span = end - start;
    let (progress, degenerate) = if span <= 0 {
        (0.0, true)
    } else {
        (((t - start) as f64 / span as f64).clamp(0.0, 1.0), false)
    };

    if degenerate {
        return Some(invalid_position(trip, line, offset_to));
    }

    let (location, status, station_id, from_station_id, to_station_id, progress_out) = match chosen.kind {
        SegmentKind::Dwell { station } => {
            let loc = dwell_location(line, catalog, station);
            (loc, Status::Stopped, Some(catalog.station(station).external_id.clone()), None, None, None)
        }
        SegmentKind::Motion { from, to } => {
            let loc = motion_location(line, catalog, from, to, progress);
            (
                loc,
                Status::Running,
                None,
                Some(catalog.station(from).external_id.clone()),
                Some(catalog.station(to).external_id.clone()),
                Some(progress),
            )
        }
    };

    let quality = if fused_trip.map(|f| f.suspect).unwrap_or(false) {
        Quality::Suspect
    } else if stale {
        Quality::Stale
    } else {
        Quality::Good
    };

    let _ = offset_from;

    Some(Position {
        train_number: trip.normalized_number.clone().unwrap_or_else(|| trip.base_id.clone()),
        trip_id: trip.base_id.clone(),
        line: line.external_id.clone(),
        direction: trip.direction,
        status,
        station_id,
        from_station_id,
        to_station_id,
        progress: progress_out,
        location,
        delay: offset_to,
        quality,
    })
}

fn invalid_position(trip: &Trip, line: &Line, delay: i64) -> Position {
    Position {
        train_number: trip.normalized_number.clone().unwrap_or_else(|| trip.base_id.clone()),
        trip_id: trip.base_id.clone(),
        line: line.external_id.clone(),
        direction: trip.direction,
        status: Status::Invalid,
        station_id: None,
        from_station_id: None,
        to_station_id: None,
        progress: Some(0.0),
        location: Location { lat: 0.0, lon: 0.0, bearing: 0.0 },
        delay,
        quality: Quality::Rejected,
    }
}

fn dwell_location(line: &Line, catalog: &Catalog, station: crate::catalog::StationId) -> Location {
    let coord = catalog.station(station).coord();
    let bearing = match (&line.shape, line.position_of(station)) {
        (Some(shape), Some(pos)) => crate::catalog::geo::tangent_at_vertex(&shape.polyline, shape.anchors[pos]),
        _ => 0.0,
    };
    Location { lon: coord.0, lat: coord.1, bearing }
}

fn motion_location(
    line: &Line,
    catalog: &Catalog,
    from: crate::catalog::StationId,
    to: crate::catalog::StationId,
    progress: f64,
) -> Location {
    if let (Some(shape), Some(pos_from), Some(pos_to)) = (&line.shape, line.position_of(from), line.position_of(to)) {
        let anchor_from = shape.anchors[pos_from];
        let anchor_to = shape.anchors[pos_to];
        let dist_from = shape.cumulative_dist[anchor_from];
        let dist_to = shape.cumulative_dist[anchor_to];
        let target = progress * (dist_to - dist_from) + dist_from;
        let (point, bearing) = crate::catalog::geo::interpolate_at_distance(&shape.polyline, &shape.cumulative_dist, target);
        return Location { lon: point.0, lat: point.1, bearing };
    }

    // ShapeInvalid (§7): no geometry on file, fall back to a straight-line
    // interpolation between the two station coordinates.
    let a = catalog.station(from).coord();
    let b = catalog.station(to).coord();
    let lon = a.0 + (b.0 - a.0) * progress;
    let lat = a.1 + (b.1 - a.1) * progress;
    let bearing = crate::catalog::geo::bearing_degrees(a, b);
    Location { lon, lat, bearing }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::FusionPublisher;
    use crate::segment::SegmentIndex;
    use std::time::Duration;

    fn tempdir() -> std::path::PathBuf {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("position-test-{}-{}", std::process::id(), unique));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample() -> (Catalog, Timetable, SegmentIndex, std::path::PathBuf) {
        let dir = tempdir();
        std::fs::write(
            dir.join("stations.json"),
            r#"[
                {"id":"s1","name_ja":"a","name_en":"a","lon":139.00,"lat":35.00},
                {"id":"s2","name_ja":"b","name_en":"b","lon":139.02,"lat":35.00}
            ]"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("lines.json"),
            r#"[{"id":"l1","name_ja":"L","name_en":"L","color":"#fff","stations":["s1","s2"],"closed_loop":false}]"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("shapes.json"),
            r#"{"l1": [[[139.00,35.00],[139.01,35.00],[139.02,35.00]]]}"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("timetable_l1.json"),
            r#"{"trips":[{"id":"1406H","direction":"outbound","stops":[
                {"station":"s1","arrival":"08:00","departure":"08:01"},
                {"station":"s2","arrival":"08:02","departure":"08:02"}
            ]}]}"#,
        )
        .unwrap();

        let bbox = crate::config::Config::default_bounding_box();
        let catalog = crate::catalog::load_catalog(&dir, &bbox).unwrap();
        let timetable = crate::timetable::load_timetables(&dir, &catalog).unwrap();
        let segment_index = SegmentIndex::build(&timetable, &catalog);
        (catalog, timetable, segment_index, dir)
    }

    /// Local Asia/Tokyo wall-clock instant on the 2026-07-27 service day.
    /// Since the service day epoch is 04:00 and all timetable entries here
    /// are >= 04:00, the wall-clock "HH:MM:SS" given here lines up directly
    /// with the matching timetable stop's "HH:MM" label.
    fn wall_clock(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        use chrono::TimeZone;
        chrono_tz::Asia::Tokyo.with_ymd_and_hms(2026, 7, 27, h, m, s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn stationary_at_first_stop_s1() {
        let (catalog, timetable, segment_index, _dir) = sample();
        let publisher = FusionPublisher::new(Duration::from_secs(30), 5);
        let at = wall_clock(8, 0, 30); // mid-dwell at S1 (arr 08:00, dep 08:01)
        let result = positions(&catalog, &timetable, &segment_index, &publisher, chrono_tz::Asia::Tokyo, &[], "l1", at, None).unwrap();
        assert_eq!(result.positions.len(), 1);
        let p = &result.positions[0];
        assert_eq!(p.status, Status::Stopped);
        assert_eq!(p.station_id.as_deref(), Some("s1"));
        assert_eq!(p.delay, 0);
    }

    #[test]
    fn mid_motion_no_delay_progress_is_half() {
        let (catalog, timetable, segment_index, _dir) = sample();
        let publisher = FusionPublisher::new(Duration::from_secs(30), 5);
        // Motion runs 08:01 -> 08:02 (60s); midpoint at 08:01:30.
        let at = wall_clock(8, 1, 30);
        let result = positions(&catalog, &timetable, &segment_index, &publisher, chrono_tz::Asia::Tokyo, &[], "l1", at, None).unwrap();
        assert_eq!(result.positions.len(), 1);
        let p = &result.positions[0];
        assert_eq!(p.status, Status::Running);
        assert!((p.progress.unwrap() - 0.5).abs() < 1e-6);
        assert!((p.location.lon - 139.01).abs() < 1e-6);
    }

    #[test]
    fn progress_at_departure_instant_is_running_not_stopped() {
        let (catalog, timetable, segment_index, _dir) = sample();
        let publisher = FusionPublisher::new(Duration::from_secs(30), 5);
        let at = wall_clock(8, 1, 0); // exactly the scheduled departure
        let result = positions(&catalog, &timetable, &segment_index, &publisher, chrono_tz::Asia::Tokyo, &[], "l1", at, None).unwrap();
        let p = &result.positions[0];
        assert_eq!(p.status, Status::Running);
        assert!(p.progress.unwrap() < 1e-6);
    }

    #[test]
    fn uniform_delay_clamps_to_origin_dwell_before_shifted_motion_starts() {
        use crate::fusion::{FusedTrip, FusedTripSet};
        use std::collections::HashMap;

        let (catalog, timetable, segment_index, _dir) = sample();
        let publisher = FusionPublisher::new(Duration::from_secs(30), 5);

        let mut offsets = HashMap::new();
        offsets.insert(TripRef(0), FusedTrip { offsets: vec![120, 120], suspect: false });
        publisher.publish(FusedTripSet::with_offsets(Utc::now(), offsets));

        // Unshifted motion is 08:01-08:02; 08:01:30 lands inside it, but the
        // +120s offset pushes every shifted segment to start no earlier than
        // 08:03. The trip must still report as stopped at its origin, not
        // invalid.
        let at = wall_clock(8, 1, 30);
        let result = positions(&catalog, &timetable, &segment_index, &publisher, chrono_tz::Asia::Tokyo, &[], "l1", at, None).unwrap();
        assert_eq!(result.positions.len(), 1);
        let p = &result.positions[0];
        assert_eq!(p.status, Status::Stopped);
        assert_eq!(p.station_id.as_deref(), Some("s1"));
        assert_eq!(p.delay, 120);
    }

    #[test]
    fn early_running_trip_is_omitted_past_its_shifted_finish() {
        use crate::fusion::{FusedTrip, FusedTripSet};
        use std::collections::HashMap;

        let (catalog, timetable, segment_index, _dir) = sample();
        let publisher = FusionPublisher::new(Duration::from_secs(30), 5);

        let mut offsets = HashMap::new();
        offsets.insert(TripRef(0), FusedTrip { offsets: vec![-60, -60], suspect: false });
        publisher.publish(FusedTripSet::with_offsets(Utc::now(), offsets));

        // Unshifted motion is 08:01-08:02, so 08:01:40 is still picked up by
        // `active_at` against the unshifted schedule. But a uniform -60s
        // offset means the trip finished its shifted run at 08:01:00, past
        // its last shifted segment, so it must be omitted rather than
        // reported as invalid.
        let at = wall_clock(8, 1, 40);
        let result = positions(&catalog, &timetable, &segment_index, &publisher, chrono_tz::Asia::Tokyo, &[], "l1", at, None).unwrap();
        assert!(result.positions.is_empty());
    }

    #[test]
    fn unknown_line_is_rejected() {
        let (catalog, timetable, segment_index, _dir) = sample();
        let publisher = FusionPublisher::new(Duration::from_secs(30), 5);
        let at = wall_clock(8, 0, 30);
        let result = positions(&catalog, &timetable, &segment_index, &publisher, chrono_tz::Asia::Tokyo, &[], "does-not-exist", at, None);
        assert!(matches!(result, Err(PositionError::LineUnknown { .. })));
    }
}
