//! Static catalog (C1): lines, stations, per-line stitched polyline geometry
//! and the station-to-shape anchoring used by the position materializer.
//!
//! Loaded once at startup from three JSON documents under `static_data_dir`
//! and thereafter immutable except for the admin-editable per-station
//! `rank`/`dwell_time` fields, each guarded by its own lock so that edits to
//! one station never block reads of another.

pub mod error;
pub mod geo;

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

pub use error::CatalogError;

use crate::config::BoundingBox;

/// Arena index into `Catalog::stations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StationId(pub usize);

/// Arena index into `Catalog::lines`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Rank {
    S,
    A,
    B,
}

/// Mutable, admin-editable fields of a station. Kept behind their own lock so
/// the frozen, load-time fields never need to be touched on the write path.
#[derive(Debug, Clone)]
pub struct StationMutable {
    pub rank: Option<Rank>,
    pub dwell_time: u32,
}

pub struct Station {
    pub id: StationId,
    pub external_id: String,
    pub name_ja: String,
    pub name_en: String,
    pub lon: f64,
    pub lat: f64,
    pub lines: Vec<LineId>,
    mutable: RwLock<StationMutable>,
}

impl Station {
    pub fn coord(&self) -> (f64, f64) {
        (self.lon, self.lat)
    }

    pub fn rank(&self) -> Option<Rank> {
        self.mutable.read().unwrap().rank
    }

    pub fn dwell_time(&self) -> u32 {
        self.mutable.read().unwrap().dwell_time
    }

    pub fn patch(&self, rank: Rank, dwell_time: u32) {
        let mut guard = self.mutable.write().unwrap();
        guard.rank = Some(rank);
        guard.dwell_time = dwell_time;
    }
}

/// Stitched polyline geometry for a line, plus the precomputed lookups used
/// by the position materializer (§4.5).
pub struct Shape {
    pub polyline: Vec<(f64, f64)>,
    pub cumulative_dist: Vec<f64>,
    /// `anchors[i]` is the polyline vertex index for `Line::station_order[i]`.
    pub anchors: Vec<usize>,
}

pub struct Line {
    pub id: LineId,
    pub external_id: String,
    pub name_ja: String,
    pub name_en: String,
    pub color: String,
    pub station_order: Vec<StationId>,
    pub closed_loop: bool,
    pub shape: Option<Shape>,
}

impl Line {
    /// Position of `station` within this line's ordered station list, if any.
    pub fn position_of(&self, station: StationId) -> Option<usize> {
        self.station_order.iter().position(|&s| s == station)
    }
}

pub struct Catalog {
    pub stations: Vec<Station>,
    pub lines: Vec<Line>,
    station_by_external: HashMap<String, StationId>,
    line_by_external: HashMap<String, LineId>,
}

impl Catalog {
    pub fn station(&self, id: StationId) -> &Station {
        &self.stations[id.0]
    }

    pub fn line(&self, id: LineId) -> &Line {
        &self.lines[id.0]
    }

    pub fn line_id_by_external(&self, external_id: &str) -> Option<LineId> {
        self.line_by_external.get(external_id).copied()
    }

    pub fn station_id_by_external(&self, external_id: &str) -> Option<StationId> {
        self.station_by_external.get(external_id).copied()
    }

    pub fn patch_station_rank(&self, external_id: &str, rank: Rank, dwell_time: u32) -> Result<(), CatalogError> {
        let id = self
            .station_id_by_external(external_id)
            .ok_or_else(|| CatalogError::StationUnknown { station_id: external_id.to_string() })?;
        self.station(id).patch(rank, dwell_time);
        Ok(())
    }
}

#[derive(serde::Deserialize)]
struct RawStation {
    id: String,
    name_ja: String,
    name_en: String,
    lon: f64,
    lat: f64,
}

#[derive(serde::Deserialize)]
struct RawLine {
    id: String,
    name_ja: String,
    name_en: String,
    color: String,
    stations: Vec<String>,
    #[serde(default)]
    closed_loop: bool,
}

type RawShapes = HashMap<String, Vec<Vec<(f64, f64)>>>;

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CatalogError> {
    let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| CatalogError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Load the static catalog from `dir/stations.json`, `dir/lines.json` and
/// `dir/shapes.json`.
pub fn load_catalog(dir: &Path, bbox: &BoundingBox) -> Result<Catalog, CatalogError> {
    let raw_stations: Vec<RawStation> = read_json(&dir.join("stations.json"))?;
    let raw_lines: Vec<RawLine> = read_json(&dir.join("lines.json"))?;
    let raw_shapes: RawShapes = read_json(&dir.join("shapes.json")).unwrap_or_default();

    let mut station_by_external = HashMap::new();
    let mut stations = Vec::with_capacity(raw_stations.len());
    for raw in raw_stations {
        if !bbox.contains(raw.lon, raw.lat) {
            return Err(CatalogError::StationOutOfBounds {
                station_id: raw.id,
                lon: raw.lon,
                lat: raw.lat,
            });
        }
        let id = StationId(stations.len());
        station_by_external.insert(raw.id.clone(), id);
        stations.push(Station {
            id,
            external_id: raw.id,
            name_ja: raw.name_ja,
            name_en: raw.name_en,
            lon: raw.lon,
            lat: raw.lat,
            lines: Vec::new(),
            mutable: RwLock::new(StationMutable { rank: None, dwell_time: 0 }),
        });
    }

    let mut line_by_external = HashMap::new();
    let mut lines = Vec::with_capacity(raw_lines.len());
    for raw in raw_lines {
        let mut station_order = Vec::with_capacity(raw.stations.len());
        for station_external_id in &raw.stations {
            let station_id = station_by_external.get(station_external_id).copied().ok_or_else(|| {
                CatalogError::UnknownStation {
                    line_id: raw.id.clone(),
                    station_id: station_external_id.clone(),
                }
            })?;
            station_order.push(station_id);
        }

        let shape = build_shape(&raw.id, &raw_shapes, &stations, &station_order);

        let line_id = LineId(lines.len());
        line_by_external.insert(raw.id.clone(), line_id);
        lines.push(Line {
            id: line_id,
            external_id: raw.id,
            name_ja: raw.name_ja,
            name_en: raw.name_en,
            color: raw.color,
            station_order,
            closed_loop: raw.closed_loop,
            shape,
        });
    }

    let mut line_membership: Vec<Vec<LineId>> = vec![Vec::new(); stations.len()];
    for line in &lines {
        for &station_id in &line.station_order {
            line_membership[station_id.0].push(line.id);
        }
    }
    for (station, membership) in stations.iter_mut().zip(line_membership.into_iter()) {
        station.lines = membership;
    }

    Ok(Catalog { stations, lines, station_by_external, line_by_external })
}

fn build_shape(
    line_external_id: &str,
    raw_shapes: &RawShapes,
    stations: &[Station],
    station_order: &[StationId],
) -> Option<Shape> {
    let sublines = raw_shapes.get(line_external_id)?;
    let polyline = geo::stitch_sublines(sublines);
    if polyline.len() < 2 {
        tracing::warn!(line = line_external_id, "shape has fewer than 2 coordinates, serving without geometry");
        return None;
    }

    let cumulative_dist = geo::cumulative_distances(&polyline);
    let anchors = station_order
        .iter()
        .map(|&station_id| geo::nearest_vertex(&polyline, stations[station_id.0].coord()))
        .collect();

    Some(Shape { polyline, cumulative_dist, anchors })
}
