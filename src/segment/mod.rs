//! Segment index (C3): derives, from each timetable trip, the ordered list
//! of dwell/motion intervals that answer "what is this trip doing at
//! instant t", and a coarse bucketed index that bounds query-time scan cost
//! independently of timetable size (§4.3, REDESIGN FLAGS).

use std::collections::HashMap;

use crate::catalog::StationId;
use crate::timetable::{ServiceType, Timetable, TripRef};

/// Width, in effective-seconds, of one bucket in the auxiliary time index.
const BUCKET_WIDTH_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Stopped at `station` from arrival to departure.
    Dwell { station: StationId },
    /// Moving from `from` to `to`, departing `from` at `t_start` and
    /// arriving at `to` at `t_end`.
    Motion { from: StationId, to: StationId },
}

/// A half-open `[t_start, t_end)` interval tagging one trip's activity
/// (§3 Segment). `index_in_trip` is the position of this segment within its
/// trip's own segment list, used by the materializer to search neighbours
/// after a fusion offset shifts a segment's bounds (§4.5 step 4).
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub trip: TripRef,
    pub index_in_trip: usize,
    /// Index into the owning trip's `stops` of the segment's origin stop: for
    /// a dwell, the stop it dwells at; for a motion, the stop it departs
    /// from (the destination is always `stop_index + 1`). Used to look up
    /// the matching per-stop fusion offset(s) (§4.5 step 4).
    pub stop_index: usize,
    pub kind: SegmentKind,
    pub t_start: i64,
    pub t_end: i64,
}

impl Segment {
    /// `progress` at instant `t`, assuming `t` falls within `[t_start,
    /// t_end)`. Degenerate zero-duration motions return `(0.0, true)` where
    /// the `bool` flags the result as `invalid` (§4.3).
    pub fn progress_at(&self, t: i64) -> (f64, bool) {
        let span = self.t_end - self.t_start;
        if span <= 0 {
            return (0.0, true);
        }
        let raw = (t - self.t_start) as f64 / span as f64;
        (raw.clamp(0.0, 1.0), false)
    }
}

/// Build one trip's segments: a dwell per intermediate (and terminal) stop
/// and a motion per adjacent-stop pair, in chronological order (§3).
fn build_trip_segments(trip_ref: TripRef, timetable: &Timetable) -> Vec<Segment> {
    let trip = timetable.trip(trip_ref);
    let mut segments = Vec::with_capacity(trip.stops.len() * 2);

    for (i, stop) in trip.stops.iter().enumerate() {
        segments.push(Segment {
            trip: trip_ref,
            index_in_trip: segments.len(),
            stop_index: i,
            kind: SegmentKind::Dwell { station: stop.station },
            t_start: stop.arrival,
            t_end: stop.departure,
        });
        if let Some(next) = trip.stops.get(i + 1) {
            segments.push(Segment {
                trip: trip_ref,
                index_in_trip: segments.len(),
                stop_index: i,
                kind: SegmentKind::Motion { from: stop.station, to: next.station },
                t_start: stop.departure,
                t_end: next.arrival,
            });
        }
    }

    segments
}

/// Per-line segment array, sorted by `t_start`, plus the coarse bucket index
/// over it (§4.3).
pub struct LineSegments {
    pub segments: Vec<Segment>,
    /// bucket index -> `[start, end)` range into `segments` that may overlap
    /// that bucket's time window.
    buckets: HashMap<i64, (usize, usize)>,
}

impl LineSegments {
    fn bucket_of(t: i64) -> i64 {
        t.div_euclid(BUCKET_WIDTH_SECS)
    }

    /// Active segments at `t`, restricted to trips whose service type is
    /// `active_calendar` (§4.3 service-type selection — `Unknown` is never
    /// passed here and would simply match nothing).
    pub fn active_at(&self, t: i64, timetable: &Timetable, active_calendar: ServiceType) -> Vec<&Segment> {
        let bucket = Self::bucket_of(t);
        let Some(&(start, end)) = self.buckets.get(&bucket) else { return Vec::new() };

        self.segments[start..end]
            .iter()
            .filter(|seg| t >= seg.t_start && t < seg.t_end)
            .filter(|seg| timetable.trip(seg.trip).service_type == active_calendar)
            .collect()
    }
}

/// Build the segment index for every line represented in `timetable`.
pub struct SegmentIndex {
    by_line: HashMap<crate::catalog::LineId, LineSegments>,
}

impl SegmentIndex {
    pub fn build(timetable: &Timetable, catalog: &crate::catalog::Catalog) -> Self {
        let mut by_line = HashMap::new();

        for line in &catalog.lines {
            let mut segments = Vec::new();
            for &trip_ref in timetable.trips_for_line(line.id) {
                segments.extend(build_trip_segments(trip_ref, timetable));
            }
            segments.sort_by_key(|s| s.t_start);

            let buckets = build_bucket_index(&segments);
            by_line.insert(line.id, LineSegments { segments, buckets });
        }

        SegmentIndex { by_line }
    }

    pub fn line(&self, line: crate::catalog::LineId) -> Option<&LineSegments> {
        self.by_line.get(&line)
    }
}

/// For each bucket touched by any segment's span, record the widest
/// `[start, end)` slice of the (t_start-sorted) array that could contain a
/// segment overlapping it: from the first segment whose `t_start` index
/// could reach into the bucket, to the last segment whose `t_start` is at or
/// before the bucket's end.
fn build_bucket_index(segments: &[Segment]) -> HashMap<i64, (usize, usize)> {
    let mut buckets: HashMap<i64, (usize, usize)> = HashMap::new();
    if segments.is_empty() {
        return buckets;
    }

    for (i, seg) in segments.iter().enumerate() {
        let first_bucket = LineSegments::bucket_of(seg.t_start);
        let last_bucket = LineSegments::bucket_of(seg.t_end.saturating_sub(1).max(seg.t_start));
        for b in first_bucket..=last_bucket {
            let entry = buckets.entry(b).or_insert((i, i + 1));
            entry.0 = entry.0.min(i);
            entry.1 = entry.1.max(i + 1);
        }
    }

    buckets
}
