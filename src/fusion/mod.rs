//! Real-time fusion engine (C4): a background refresher that fetches the
//! upstream GTFS-RT `TripUpdate` feed, matches its noisy trip identifiers
//! against timetable trips, and publishes an immutable `FusedTripSet` that
//! the position materializer reads without ever seeing a partial update
//! (§4.4, §5).

pub mod error;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use prost::Message;

pub use error::FusionError;

use crate::catalog::Catalog;
use crate::idnorm::normalize_train_number;
use crate::segment::{SegmentKind, SegmentIndex};
use crate::service_day;
use crate::timetable::{Direction, ServiceType, Timetable, TripRef};

/// Offsets are clamped to this range; a trip whose feed delay falls outside
/// it is tagged `suspect` (§4.4 step 4).
const MIN_OFFSET_SECS: i64 = -600;
const MAX_OFFSET_SECS: i64 = 7200;

/// Consecutive transport failures before the publisher is considered
/// degraded (§4.4 step 1); mirrored from config at construction time.
const DEFAULT_DEGRADED_AFTER_FAILURES: u32 = 5;

/// A timetable trip's fused delay schedule: one offset per stop, monotone
/// non-decreasing, plus the data-quality tags carried from matching and
/// clamping (§3 FusedTrip, §4.4 step 4).
#[derive(Debug, Clone)]
pub struct FusedTrip {
    pub offsets: Vec<i64>,
    pub suspect: bool,
}

impl FusedTrip {
    pub fn offset_at(&self, stop_index: usize) -> i64 {
        self.offsets.get(stop_index).copied().unwrap_or(0)
    }
}

/// An immutable snapshot published by the fusion loop. Trips absent from
/// `offsets` carry an implicit zero-offset schedule (§3).
pub struct FusedTripSet {
    pub generated_at: DateTime<Utc>,
    offsets: HashMap<TripRef, FusedTrip>,
    pub unmatched_count: u64,
    pub matched_count: u64,
}

impl FusedTripSet {
    fn empty(at: DateTime<Utc>) -> Self {
        FusedTripSet { generated_at: at, offsets: HashMap::new(), unmatched_count: 0, matched_count: 0 }
    }

    #[cfg(test)]
    pub(crate) fn with_offsets(at: DateTime<Utc>, offsets: HashMap<TripRef, FusedTrip>) -> Self {
        let matched_count = offsets.len() as u64;
        FusedTripSet { generated_at: at, offsets, unmatched_count: 0, matched_count }
    }

    pub fn fused_trip(&self, trip: TripRef) -> Option<&FusedTrip> {
        self.offsets.get(&trip)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PublisherStatus {
    pub degraded: bool,
    pub consecutive_failures: u32,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl Default for PublisherStatus {
    fn default() -> Self {
        PublisherStatus { degraded: false, consecutive_failures: 0, last_fetch_at: None, last_success_at: None }
    }
}

/// Shared publish point: an atomically swapped reference to the latest
/// `FusedTripSet`, plus the publisher's health status (§4.4 step 5, §5).
pub struct FusionPublisher {
    current: RwLock<Arc<FusedTripSet>>,
    status: RwLock<PublisherStatus>,
    degraded_after_failures: u32,
    refresh_interval: StdDuration,
}

impl FusionPublisher {
    pub fn new(refresh_interval: StdDuration, degraded_after_failures: u32) -> Self {
        FusionPublisher {
            current: RwLock::new(Arc::new(FusedTripSet::empty(Utc::now()))),
            status: RwLock::new(PublisherStatus::default()),
            degraded_after_failures: if degraded_after_failures == 0 { DEFAULT_DEGRADED_AFTER_FAILURES } else { degraded_after_failures },
            refresh_interval,
        }
    }

    /// Snapshot the currently published set. Cheap (an `Arc` clone); the
    /// caller uses it for the whole query so every trip it reports reflects
    /// the same fused set (§5 Ordering guarantees).
    pub fn current(&self) -> Arc<FusedTripSet> {
        self.current.read().unwrap().clone()
    }

    pub fn status(&self) -> PublisherStatus {
        *self.status.read().unwrap()
    }

    pub fn refresh_interval(&self) -> StdDuration {
        self.refresh_interval
    }

    pub(crate) fn publish(&self, set: FusedTripSet) {
        let now = set.generated_at;
        *self.current.write().unwrap() = Arc::new(set);
        let mut status = self.status.write().unwrap();
        status.consecutive_failures = 0;
        status.degraded = false;
        status.last_fetch_at = Some(now);
        status.last_success_at = Some(now);
    }

    fn record_failure(&self, at: DateTime<Utc>) {
        let mut status = self.status.write().unwrap();
        status.consecutive_failures += 1;
        status.degraded = status.consecutive_failures >= self.degraded_after_failures;
        status.last_fetch_at = Some(at);
    }

    /// Whether the currently published set is older than two refresh
    /// periods and should downgrade query quality to `stale` (§4.5 step 6).
    pub fn is_stale(&self, at: DateTime<Utc>) -> bool {
        let set = self.current();
        let age = at.signed_duration_since(set.generated_at);
        age.num_seconds() > 2 * self.refresh_interval.as_secs() as i64
    }
}

/// Precomputed grouping of timetable trips by `(normalized train number,
/// service type)`, built once since the timetable is immutable after load
/// (§4.4 step 3).
pub struct MatchIndex {
    by_normalized: HashMap<(String, ServiceType), Vec<TripRef>>,
}

impl MatchIndex {
    pub fn build(timetable: &Timetable) -> Self {
        let mut by_normalized: HashMap<(String, ServiceType), Vec<TripRef>> = HashMap::new();
        for trip in &timetable.trips {
            if let Some(number) = &trip.normalized_number {
                by_normalized.entry((number.clone(), trip.service_type)).or_default().push(trip.id);
            }
        }
        MatchIndex { by_normalized }
    }

    fn candidates(&self, normalized: &str, calendar: ServiceType) -> &[TripRef] {
        self.by_normalized.get(&(normalized.to_string(), calendar)).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn direction_matches_gtfs(direction: Direction, direction_id: u32) -> bool {
    match direction_id {
        0 => matches!(direction, Direction::Outbound | Direction::OuterLoop),
        _ => matches!(direction, Direction::Inbound | Direction::InnerLoop),
    }
}

/// Resolve a GTFS-RT `TripUpdate` entity to exactly one timetable trip, or
/// `None` if it can't be disambiguated (§4.4 step 3).
fn match_trip_update(
    trip_update: &gtfs_realtime::TripUpdate,
    timetable: &Timetable,
    catalog: &Catalog,
    match_index: &MatchIndex,
    segment_index: &SegmentIndex,
    now_effective_seconds: i64,
    calendar: ServiceType,
) -> Option<TripRef> {
    let raw_trip_id = trip_update.trip.trip_id.as_deref()?;
    let normalized = normalize_train_number(raw_trip_id)?;
    let candidates = match_index.candidates(&normalized, calendar);

    match candidates {
        [] => None,
        [only] => Some(*only),
        many => {
            if let Some(direction_id) = trip_update.trip.direction_id {
                let by_direction: Vec<TripRef> = many
                    .iter()
                    .copied()
                    .filter(|&t| direction_matches_gtfs(timetable.trip(t).direction, direction_id))
                    .collect();
                if by_direction.len() == 1 {
                    return Some(by_direction[0]);
                }
            }

            let first_upcoming_station = trip_update
                .stop_time_update
                .first()
                .and_then(|stu| stu.stop_id.as_deref())
                .and_then(|id| catalog.station_id_by_external(id));

            if let Some(target_station) = first_upcoming_station {
                let by_station: Vec<TripRef> = many
                    .iter()
                    .copied()
                    .filter(|&t| {
                        let trip = timetable.trip(t);
                        segment_index
                            .line(trip.line)
                            .map(|line_segs| {
                                line_segs
                                    .active_at(now_effective_seconds, timetable, calendar)
                                    .into_iter()
                                    .any(|seg| seg.trip == t && segment_upcoming_station(seg.kind) == Some(target_station))
                            })
                            .unwrap_or(false)
                    })
                    .collect();
                if by_station.len() == 1 {
                    return Some(by_station[0]);
                }
            }

            tracing::debug!(trip_id = raw_trip_id, candidates = many.len(), "dropping ambiguous trip-id match");
            None
        }
    }
}

fn segment_upcoming_station(kind: SegmentKind) -> Option<crate::catalog::StationId> {
    match kind {
        SegmentKind::Dwell { station } => Some(station),
        SegmentKind::Motion { to, .. } => Some(to),
    }
}

/// Build the per-stop offset array for one matched trip from its
/// `StopTimeUpdate`s: forward-fill unmentioned stops, clamp any
/// stop-to-stop decrease back up to monotone non-decreasing, then clamp
/// the whole array to the accepted range (§4.4 step 4).
fn apply_delays(trip_update: &gtfs_realtime::TripUpdate, stop_count: usize, stop_station_index: impl Fn(usize) -> Option<crate::catalog::StationId>, catalog: &Catalog) -> FusedTrip {
    let mut by_index: HashMap<usize, i64> = HashMap::new();

    for stu in &trip_update.stop_time_update {
        let idx = stu
            .stop_sequence
            .map(|seq| seq as usize - 1)
            .filter(|&i| i < stop_count)
            .or_else(|| {
                stu.stop_id.as_deref().and_then(|raw_id| {
                    let station = catalog.station_id_by_external(raw_id)?;
                    (0..stop_count).find(|&i| stop_station_index(i) == Some(station))
                })
            });

        let Some(idx) = idx else { continue };
        let delay = stu
            .departure
            .as_ref()
            .and_then(|e| e.delay)
            .or_else(|| stu.arrival.as_ref().and_then(|e| e.delay))
            .unwrap_or(0) as i64;
        by_index.insert(idx, delay);
    }

    let mut offsets = Vec::with_capacity(stop_count);
    let mut last = 0i64;
    for i in 0..stop_count {
        if let Some(&d) = by_index.get(&i) {
            last = d;
        }
        offsets.push(last);
    }

    // Delays do not recover across stops within one update.
    for i in 1..offsets.len() {
        if offsets[i] < offsets[i - 1] {
            offsets[i] = offsets[i - 1];
        }
    }

    let mut suspect = false;
    for o in offsets.iter_mut() {
        let clamped = (*o).clamp(MIN_OFFSET_SECS, MAX_OFFSET_SECS);
        if clamped != *o {
            suspect = true;
        }
        *o = clamped;
    }

    FusedTrip { offsets, suspect }
}

/// Run one fetch/parse/match/apply cycle and return the fused set to
/// publish (§4.4 steps 1-4).
#[allow(clippy::too_many_arguments)]
async fn run_cycle(
    client: &reqwest::Client,
    feed_url: &str,
    feed_key: &str,
    timetable: &Timetable,
    catalog: &Catalog,
    match_index: &MatchIndex,
    segment_index: &SegmentIndex,
    tz: chrono_tz::Tz,
    holidays: &[chrono::NaiveDate],
) -> Result<FusedTripSet, FusionError> {
    let now = Utc::now();
    let moment = service_day::resolve(now, tz, holidays);

    let url = if feed_key.is_empty() {
        feed_url.to_string()
    } else {
        let sep = if feed_url.contains('?') { '&' } else { '?' };
        format!("{feed_url}{sep}key={feed_key}")
    };

    let response = client
        .get(&url)
        .timeout(StdDuration::from_secs(10))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(FusionError::HttpStatus(response.status().as_u16()));
    }

    let bytes = response.bytes().await?;
    let feed = gtfs_realtime::FeedMessage::decode(bytes.as_ref())?;

    let mut offsets = HashMap::new();
    let mut matched_count = 0u64;
    let mut unmatched_count = 0u64;

    for entity in &feed.entity {
        let Some(trip_update) = &entity.trip_update else { continue };
        match match_trip_update(
            trip_update,
            timetable,
            catalog,
            match_index,
            segment_index,
            moment.effective_seconds,
            moment.calendar,
        ) {
            Some(trip_ref) => {
                matched_count += 1;
                let trip = timetable.trip(trip_ref);
                let fused = apply_delays(
                    trip_update,
                    trip.stops.len(),
                    |i| trip.stops.get(i).map(|s| s.station),
                    catalog,
                );
                if fused.suspect {
                    tracing::warn!(trip_id = %trip.base_id, "trip-update offsets clamped to accepted range, tagging suspect");
                }
                offsets.insert(trip_ref, fused);
            }
            None => unmatched_count += 1,
        }
    }

    tracing::info!(matched_count, unmatched_count, entities = feed.entity.len(), "fusion cycle complete");

    Ok(FusedTripSet { generated_at: now, offsets, unmatched_count, matched_count })
}

/// Run the background fusion loop forever. Never returns; cancel by
/// dropping the task.
#[allow(clippy::too_many_arguments)]
pub async fn run_fusion_loop(
    publisher: Arc<FusionPublisher>,
    feed_url: String,
    feed_key: String,
    timetable: Arc<Timetable>,
    catalog: Arc<Catalog>,
    segment_index: Arc<SegmentIndex>,
    tz: chrono_tz::Tz,
    holidays: Arc<Vec<chrono::NaiveDate>>,
) {
    let match_index = MatchIndex::build(&timetable);
    let client = reqwest::Client::builder()
        .connect_timeout(StdDuration::from_secs(5))
        .build()
        .expect("fusion HTTP client must build with static configuration");

    let mut interval = tokio::time::interval(publisher.refresh_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        match run_cycle(&client, &feed_url, &feed_key, &timetable, &catalog, &match_index, &segment_index, tz, &holidays).await {
            Ok(set) => publisher.publish(set),
            Err(e) => {
                tracing::warn!(error = %e, "fusion cycle failed, retaining previous fused set");
                publisher.record_failure(Utc::now());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StationId;

    fn fused(offsets: Vec<i64>) -> FusedTrip {
        FusedTrip { offsets, suspect: false }
    }

    #[test]
    fn offset_at_missing_index_is_zero() {
        let f = fused(vec![10, 20]);
        assert_eq!(f.offset_at(5), 0);
    }

    #[test]
    fn direction_matches_gtfs_zero_is_outbound() {
        assert!(direction_matches_gtfs(Direction::Outbound, 0));
        assert!(!direction_matches_gtfs(Direction::Inbound, 0));
        assert!(direction_matches_gtfs(Direction::Inbound, 1));
    }

    #[test]
    fn apply_delays_forward_fills_and_enforces_monotonicity() {
        let stop_ids = vec![StationId(0), StationId(1), StationId(2)];
        let trip_update = gtfs_realtime::TripUpdate {
            trip: gtfs_realtime::TripDescriptor {
                trip_id: Some("1406H".to_string()),
                ..Default::default()
            },
            stop_time_update: vec![
                gtfs_realtime::trip_update::StopTimeUpdate {
                    stop_sequence: Some(1),
                    departure: Some(gtfs_realtime::trip_update::StopTimeEvent { delay: Some(120), ..Default::default() }),
                    ..Default::default()
                },
                gtfs_realtime::trip_update::StopTimeUpdate {
                    stop_sequence: Some(3),
                    departure: Some(gtfs_realtime::trip_update::StopTimeEvent { delay: Some(30), ..Default::default() }),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let catalog_dir = tempdir();
        std::fs::write(
            catalog_dir.join("stations.json"),
            r#"[{"id":"s1","name_ja":"a","name_en":"a","lon":139.0,"lat":35.0}]"#,
        )
        .unwrap();
        std::fs::write(catalog_dir.join("lines.json"), "[]").unwrap();
        let catalog = crate::catalog::load_catalog(&catalog_dir, &crate::config::Config::default_bounding_box()).unwrap();

        let fused = apply_delays(&trip_update, 3, |i| stop_ids.get(i).copied(), &catalog);
        // stop 0: 120 (explicit), stop 1: forward-filled 120 (since 30 < 120,
        // raised back to 120), stop 2: 30 raised to 120 as well.
        assert_eq!(fused.offsets, vec![120, 120, 120]);
        assert!(!fused.suspect);
    }

    #[test]
    fn apply_delays_clamps_and_tags_suspect() {
        let trip_update = gtfs_realtime::TripUpdate {
            trip: gtfs_realtime::TripDescriptor { trip_id: Some("1406H".to_string()), ..Default::default() },
            stop_time_update: vec![gtfs_realtime::trip_update::StopTimeUpdate {
                stop_sequence: Some(1),
                departure: Some(gtfs_realtime::trip_update::StopTimeEvent { delay: Some(10_000), ..Default::default() }),
                ..Default::default()
            }],
            ..Default::default()
        };
        let catalog_dir = tempdir();
        std::fs::write(catalog_dir.join("stations.json"), "[]").unwrap();
        std::fs::write(catalog_dir.join("lines.json"), "[]").unwrap();
        let catalog = crate::catalog::load_catalog(&catalog_dir, &crate::config::Config::default_bounding_box()).unwrap();

        let fused = apply_delays(&trip_update, 1, |_| None, &catalog);
        assert_eq!(fused.offsets, vec![MAX_OFFSET_SECS]);
        assert!(fused.suspect);
    }

    #[test]
    fn is_stale_past_two_refresh_periods() {
        let publisher = FusionPublisher::new(StdDuration::from_secs(30), 5);
        let generated_at = Utc::now() - chrono::Duration::seconds(61);
        publisher.publish(FusedTripSet::empty(generated_at));
        assert!(publisher.is_stale(Utc::now()));
    }

    #[test]
    fn is_stale_within_two_refresh_periods() {
        let publisher = FusionPublisher::new(StdDuration::from_secs(30), 5);
        let generated_at = Utc::now() - chrono::Duration::seconds(10);
        publisher.publish(FusedTripSet::empty(generated_at));
        assert!(!publisher.is_stale(Utc::now()));
    }

    #[test]
    fn record_failure_degrades_after_threshold() {
        let publisher = FusionPublisher::new(StdDuration::from_secs(30), 3);
        for _ in 0..2 {
            publisher.record_failure(Utc::now());
        }
        assert!(!publisher.status().degraded);
        publisher.record_failure(Utc::now());
        assert!(publisher.status().degraded);
    }

    #[test]
    fn publish_resets_failure_count_and_clears_degraded() {
        let publisher = FusionPublisher::new(StdDuration::from_secs(30), 2);
        publisher.record_failure(Utc::now());
        publisher.record_failure(Utc::now());
        assert!(publisher.status().degraded);
        publisher.publish(FusedTripSet::empty(Utc::now()));
        let status = publisher.status();
        assert!(!status.degraded);
        assert_eq!(status.consecutive_failures, 0);
    }

    fn tempdir() -> std::path::PathBuf {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("fusion-test-{}-{}", std::process::id(), unique));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
