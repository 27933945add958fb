//! Geometry helpers shared by shape stitching, station anchoring and bearing
//! computation. Coordinates are always (lon, lat) pairs in degrees.

const EARTH_RADIUS_M: f64 = 6_371_000.0;

fn to_radians(deg: f64) -> f64 {
    deg * std::f64::consts::PI / 180.0
}

fn to_degrees(rad: f64) -> f64 {
    rad * 180.0 / std::f64::consts::PI
}

/// Great-circle distance between two (lon, lat) points, in meters.
pub fn haversine_distance_m(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lon1, lat1) = a;
    let (lon2, lat2) = b;
    let d_lat = to_radians(lat2 - lat1);
    let d_lon = to_radians(lon2 - lon1);
    let lat1r = to_radians(lat1);
    let lat2r = to_radians(lat2);

    let h = (d_lat / 2.0).sin().powi(2) + lat1r.cos() * lat2r.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Squared Euclidean distance in raw (lon, lat) degree space, used only for
/// picking the nearer endpoint/vertex during stitching and anchoring, where
/// a cheap proxy for distance is sufficient and avoids repeated trig calls.
pub fn squared_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    dx * dx + dy * dy
}

/// Initial compass bearing from `a` to `b`, in degrees, normalized to [0, 360).
pub fn bearing_degrees(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lon1, lat1) = (to_radians(a.0), to_radians(a.1));
    let (lon2, lat2) = (to_radians(b.0), to_radians(b.1));
    let d_lon = lon2 - lon1;

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
    let bearing = to_degrees(y.atan2(x));
    (bearing + 360.0) % 360.0
}

/// Stitch an ordered list of sub-line coordinate arrays into one continuous
/// polyline. Each sub-line may be stored in either direction; it is reversed
/// when its last point is closer to the running endpoint than its first.
pub fn stitch_sublines(sublines: &[Vec<(f64, f64)>]) -> Vec<(f64, f64)> {
    let mut result: Vec<(f64, f64)> = Vec::new();

    for subline in sublines {
        if subline.is_empty() {
            continue;
        }

        let oriented = match result.last() {
            None => subline.clone(),
            Some(&last) => {
                let first = subline[0];
                let end = *subline.last().unwrap();
                if squared_distance(last, end) < squared_distance(last, first) {
                    let mut reversed = subline.clone();
                    reversed.reverse();
                    reversed
                } else {
                    subline.clone()
                }
            }
        };

        if result.is_empty() {
            result.extend(oriented);
        } else {
            // Avoid duplicating the join point if the oriented sub-line's
            // first vertex coincides with the running endpoint.
            let skip_first = result.last() == oriented.first();
            result.extend(oriented.into_iter().skip(usize::from(skip_first)));
        }
    }

    result
}

/// Parallel cumulative arc-length array for a polyline: `cumulative[i]` is the
/// distance in meters from `polyline[0]` to `polyline[i]`.
pub fn cumulative_distances(polyline: &[(f64, f64)]) -> Vec<f64> {
    let mut out = Vec::with_capacity(polyline.len());
    let mut acc = 0.0;
    for (i, point) in polyline.iter().enumerate() {
        if i > 0 {
            acc += haversine_distance_m(polyline[i - 1], *point);
        }
        out.push(acc);
    }
    out
}

/// Index of the polyline vertex nearest to `point`, by squared distance.
pub fn nearest_vertex(polyline: &[(f64, f64)], point: (f64, f64)) -> usize {
    polyline
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            squared_distance(**a, point)
                .partial_cmp(&squared_distance(**b, point))
                .unwrap()
        })
        .map(|(idx, _)| idx)
        .expect("polyline must not be empty")
}

/// Interpolate a point on the polyline at the given arc-length distance from
/// the start, using the precomputed cumulative-distance array. Also returns
/// the bearing of the enclosing edge.
pub fn interpolate_at_distance(
    polyline: &[(f64, f64)],
    cumulative: &[f64],
    target_dist: f64,
) -> ((f64, f64), f64) {
    let total = *cumulative.last().unwrap_or(&0.0);
    let clamped = target_dist.clamp(0.0, total);

    let idx = match cumulative.binary_search_by(|d| d.partial_cmp(&clamped).unwrap()) {
        Ok(i) => i,
        Err(i) => i,
    };

    if idx == 0 {
        let bearing = if polyline.len() > 1 { bearing_degrees(polyline[0], polyline[1]) } else { 0.0 };
        return (polyline[0], bearing);
    }
    if idx >= polyline.len() {
        let last = polyline.len() - 1;
        let bearing = if last > 0 { bearing_degrees(polyline[last - 1], polyline[last]) } else { 0.0 };
        return (polyline[last], bearing);
    }

    let seg_start_dist = cumulative[idx - 1];
    let seg_end_dist = cumulative[idx];
    let seg_len = seg_end_dist - seg_start_dist;
    let t = if seg_len > 0.0 { (clamped - seg_start_dist) / seg_len } else { 0.0 };

    let a = polyline[idx - 1];
    let b = polyline[idx];
    let lon = a.0 + (b.0 - a.0) * t;
    let lat = a.1 + (b.1 - a.1) * t;
    (( lon, lat), bearing_degrees(a, b))
}

/// Tangent direction at a polyline vertex, used for bearing at a dwelling
/// station: the direction between its neighbours, or the single adjacent
/// edge if the vertex is an endpoint.
pub fn tangent_at_vertex(polyline: &[(f64, f64)], idx: usize) -> f64 {
    if polyline.len() < 2 {
        return 0.0;
    }
    if idx == 0 {
        return bearing_degrees(polyline[0], polyline[1]);
    }
    if idx >= polyline.len() - 1 {
        return bearing_degrees(polyline[polyline.len() - 2], polyline[polyline.len() - 1]);
    }
    bearing_degrees(polyline[idx - 1], polyline[idx + 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stitching_is_orientation_invariant() {
        let a = vec![(0.0, 0.0), (1.0, 0.0)];
        let b_forward = vec![(1.0, 0.0), (2.0, 0.0)];
        let b_reversed = vec![(2.0, 0.0), (1.0, 0.0)];

        let forward = stitch_sublines(&[a.clone(), b_forward]);
        let reversed = stitch_sublines(&[a, b_reversed]);

        assert_eq!(forward, reversed);
    }

    #[test]
    fn stitching_joins_three_sublines_with_mixed_orientation() {
        let subs = vec![
            vec![(0.0, 0.0), (1.0, 0.0)],
            vec![(2.0, 0.0), (1.0, 0.0)], // reversed
            vec![(2.0, 0.0), (3.0, 0.0)],
        ];
        let stitched = stitch_sublines(&subs);
        assert_eq!(stitched, vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0)]);
    }

    #[test]
    fn bearing_due_north_is_zero() {
        let b = bearing_degrees((139.0, 35.0), (139.0, 36.0));
        assert!(b.abs() < 1e-6);
    }

    #[test]
    fn bearing_due_east_is_ninety() {
        let b = bearing_degrees((139.0, 35.0), (140.0, 35.0));
        assert!((b - 90.0).abs() < 1.0);
    }

    #[test]
    fn cumulative_distances_are_monotone() {
        let polyline = vec![(139.0, 35.0), (139.01, 35.0), (139.02, 35.01)];
        let cum = cumulative_distances(&polyline);
        assert_eq!(cum[0], 0.0);
        assert!(cum[1] > cum[0]);
        assert!(cum[2] > cum[1]);
    }

    #[test]
    fn interpolate_midpoint_of_straight_line() {
        let polyline = vec![(139.0, 35.0), (139.02, 35.0)];
        let cum = cumulative_distances(&polyline);
        let total = cum[1];
        let (point, _bearing) = interpolate_at_distance(&polyline, &cum, total / 2.0);
        assert!((point.0 - 139.01).abs() < 1e-6);
    }

    #[test]
    fn nearest_vertex_picks_closest() {
        let polyline = vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)];
        assert_eq!(nearest_vertex(&polyline, (1.2, 0.0)), 1);
    }
}
