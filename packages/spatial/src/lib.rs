#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory spatial index over point records.
//!
//! Builds an R-tree over outlet and POI locations at the start of a run
//! and provides radius and k-nearest queries for feature extraction.
//! Queries use a bounding-box envelope pre-filter followed by an exact
//! haversine check, so results are geodesically correct while the tree
//! does the pruning.

use geo::{Distance, Haversine, Point};
use rstar::{AABB, PointDistance, RTree, RTreeObject};
use site_scout_models::Coordinates;

/// Kilometers per degree of latitude.
const KM_PER_DEGREE_LAT: f64 = 110.574;

/// Kilometers per degree of longitude at the equator.
const KM_PER_DEGREE_LNG_EQUATOR: f64 = 111.320;

/// Great-circle distance between two coordinates, in kilometers.
#[must_use]
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    Haversine.distance(Point::new(a.lng, a.lat), Point::new(b.lng, b.lat)) / 1000.0
}

/// A point record stored in the R-tree with its payload.
struct PointEntry<T> {
    envelope: AABB<[f64; 2]>,
    coordinates: Coordinates,
    item: T,
}

impl<T> RTreeObject for PointEntry<T> {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl<T> PointDistance for PointEntry<T> {
    /// Squared Euclidean distance in degree space, used only for the
    /// tree's nearest-neighbor ordering; exact distances are computed
    /// with haversine afterwards.
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.coordinates.lng - point[0];
        let dy = self.coordinates.lat - point[1];
        dx.mul_add(dx, dy * dy)
    }
}

/// Pre-built R-tree index over `(Coordinates, T)` pairs.
///
/// Constructed once per run and shared read-only across the parallel
/// feature-extraction phase.
pub struct PointIndex<T> {
    tree: RTree<PointEntry<T>>,
}

impl<T> PointIndex<T> {
    /// Bulk-loads an index from coordinate/payload pairs.
    ///
    /// Records with invalid coordinates are skipped with a logged reason
    /// rather than poisoning the tree.
    pub fn build(items: impl IntoIterator<Item = (Coordinates, T)>) -> Self {
        let entries: Vec<PointEntry<T>> = items
            .into_iter()
            .filter_map(|(coordinates, item)| {
                if coordinates.is_valid() {
                    Some(PointEntry {
                        envelope: AABB::from_point([coordinates.lng, coordinates.lat]),
                        coordinates,
                        item,
                    })
                } else {
                    log::warn!(
                        "Skipping record with invalid coordinates ({}, {})",
                        coordinates.lat,
                        coordinates.lng
                    );
                    None
                }
            })
            .collect();

        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Number of indexed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Returns `true` if the index holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// All records within `radius_km` of `center`, sorted by ascending
    /// distance. Each result carries its exact haversine distance in km.
    #[must_use]
    pub fn within_km(&self, center: Coordinates, radius_km: f64) -> Vec<(f64, &T)> {
        let envelope = query_envelope(center, radius_km);

        let mut hits: Vec<(f64, &T)> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .filter_map(|entry| {
                let distance = haversine_km(center, entry.coordinates);
                (distance <= radius_km).then_some((distance, &entry.item))
            })
            .collect();

        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits
    }

    /// The `k` nearest records to `center`, sorted by ascending distance.
    ///
    /// The tree's nearest-neighbor walk is Euclidean in degree space, so
    /// an over-fetched prefix is re-ranked by exact haversine distance
    /// before truncation.
    #[must_use]
    pub fn nearest_km(&self, center: Coordinates, k: usize) -> Vec<(f64, &T)> {
        if k == 0 {
            return Vec::new();
        }

        let overfetch = k.saturating_mul(4).max(16);
        let mut hits: Vec<(f64, &T)> = self
            .tree
            .nearest_neighbor_iter(&[center.lng, center.lat])
            .take(overfetch)
            .map(|entry| (haversine_km(center, entry.coordinates), &entry.item))
            .collect();

        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits.truncate(k);
        hits
    }
}

/// Bounding box covering a `radius_km` circle around `center`.
///
/// The longitude delta widens with latitude; near the poles it degrades
/// to a full longitude span rather than dividing by ~0.
fn query_envelope(center: Coordinates, radius_km: f64) -> AABB<[f64; 2]> {
    let lat_delta = radius_km / KM_PER_DEGREE_LAT;
    let cos_lat = center.lat.to_radians().cos();
    let lng_delta = if cos_lat > 1e-6 {
        (radius_km / (KM_PER_DEGREE_LNG_EQUATOR * cos_lat)).min(180.0)
    } else {
        180.0
    };

    AABB::from_corners(
        [center.lng - lng_delta, center.lat - lat_delta],
        [center.lng + lng_delta, center.lat + lat_delta],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coords(lat: f64, lng: f64) -> Coordinates {
        Coordinates { lat, lng }
    }

    #[test]
    fn haversine_one_degree_latitude() {
        let d = haversine_km(coords(52.0, 13.0), coords(53.0, 13.0));
        assert!((d - 111.2).abs() < 1.0, "got {d}");
    }

    #[test]
    fn radius_query_filters_by_exact_distance() {
        let index = PointIndex::build(vec![
            (coords(52.50, 13.40), "near"),
            (coords(52.51, 13.41), "nearer"),
            (coords(53.50, 13.40), "far"),
        ]);

        let hits = index.within_km(coords(52.52, 13.405), 10.0);
        let names: Vec<&str> = hits.iter().map(|(_, n)| **n).collect();
        assert_eq!(names, vec!["nearer", "near"]);
    }

    #[test]
    fn radius_query_results_sorted_ascending() {
        let index = PointIndex::build(vec![
            (coords(52.6, 13.4), "b"),
            (coords(52.53, 13.4), "a"),
            (coords(52.7, 13.4), "c"),
        ]);

        let hits = index.within_km(coords(52.52, 13.4), 30.0);
        let distances: Vec<f64> = hits.iter().map(|(d, _)| *d).collect();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn nearest_returns_k_closest() {
        let index = PointIndex::build(vec![
            (coords(52.53, 13.4), 1_u32),
            (coords(52.6, 13.4), 2),
            (coords(52.7, 13.4), 3),
            (coords(53.5, 13.4), 4),
        ]);

        let hits = index.nearest_km(coords(52.52, 13.4), 3);
        let ids: Vec<u32> = hits.iter().map(|(_, id)| **id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn skips_invalid_coordinates_at_build() {
        let index = PointIndex::build(vec![
            (coords(52.5, 13.4), "ok"),
            (coords(f64::NAN, 13.4), "bad"),
        ]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn empty_index_queries_are_empty() {
        let index: PointIndex<u8> = PointIndex::build(Vec::new());
        assert!(index.is_empty());
        assert!(index.within_km(coords(0.0, 0.0), 10.0).is_empty());
        assert!(index.nearest_km(coords(0.0, 0.0), 3).is_empty());
    }
}
