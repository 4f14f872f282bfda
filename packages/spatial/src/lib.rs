#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Geometry primitives for in-process spatial matching.
//!
//! Mirrors the handful of `PostGIS` functions the reconciliation engine
//! relies on (`ST_GeomFromGeoJSON`, `ST_Centroid`, `ST_Intersects`,
//! geography `ST_Distance`) on top of `geo`, and provides an R-tree
//! envelope index so candidate objects can be found without scanning the
//! whole inventory.

use std::collections::BTreeMap;

use city_inventory_models::{Coordinates, GeometryKind};
use geo::{BoundingRect, Centroid, Distance, Geodesic, Geometry, Intersects, Point};
use geojson::GeoJson;
use rstar::{AABB, RTree, RTreeObject};

/// Errors produced while interpreting submitted geometries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpatialError {
    /// The document is not valid `GeoJSON`.
    #[error("Invalid GeoJSON: {message}")]
    InvalidGeoJson {
        /// Parser message.
        message: String,
    },

    /// The document is valid `GeoJSON` but carries no usable geometry.
    #[error("GeoJSON document has no geometry: {message}")]
    NoGeometry {
        /// What was found instead.
        message: String,
    },

    /// The geometry has no centroid (e.g. an empty collection).
    #[error("Geometry is empty")]
    EmptyGeometry,
}

/// Parses a `GeoJSON` geometry (or a feature carrying one) into a
/// [`Geometry`].
///
/// # Errors
///
/// Returns [`SpatialError`] if the text is not `GeoJSON` or does not
/// contain exactly one geometry.
pub fn parse_geometry(text: &str) -> Result<Geometry<f64>, SpatialError> {
    let geojson: GeoJson = text.parse().map_err(|e: geojson::Error| SpatialError::InvalidGeoJson {
        message: e.to_string(),
    })?;

    let geometry = match geojson {
        GeoJson::Geometry(geometry) => geometry,
        GeoJson::Feature(feature) => feature.geometry.ok_or_else(|| SpatialError::NoGeometry {
            message: "feature without geometry".to_string(),
        })?,
        GeoJson::FeatureCollection(_) => {
            return Err(SpatialError::NoGeometry {
                message: "feature collection".to_string(),
            });
        }
    };

    geometry
        .try_into()
        .map_err(|e: geojson::Error| SpatialError::InvalidGeoJson {
            message: e.to_string(),
        })
}

/// Returns the kind of a geometry.
#[must_use]
pub const fn geometry_kind(geometry: &Geometry<f64>) -> GeometryKind {
    match geometry {
        Geometry::Point(_) => GeometryKind::Point,
        Geometry::Line(_) | Geometry::LineString(_) => GeometryKind::LineString,
        Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => GeometryKind::Polygon,
        Geometry::MultiPoint(_) => GeometryKind::MultiPoint,
        Geometry::MultiLineString(_) => GeometryKind::MultiLineString,
        Geometry::MultiPolygon(_) => GeometryKind::MultiPolygon,
        Geometry::GeometryCollection(_) => GeometryKind::GeometryCollection,
    }
}

/// Computes the centroid of a geometry.
///
/// # Errors
///
/// Returns [`SpatialError::EmptyGeometry`] if the geometry is empty.
pub fn centroid(geometry: &Geometry<f64>) -> Result<Coordinates, SpatialError> {
    geometry
        .centroid()
        .map(|p| Coordinates::new(p.x(), p.y()))
        .ok_or(SpatialError::EmptyGeometry)
}

/// Converts coordinates into a [`Geometry::Point`].
#[must_use]
pub fn point_geometry(coordinates: Coordinates) -> Geometry<f64> {
    Geometry::Point(Point::new(coordinates.longitude, coordinates.latitude))
}

/// Geodesic distance in meters between two WGS84 positions.
#[must_use]
pub fn geodesic_distance_m(a: Coordinates, b: Coordinates) -> f64 {
    Geodesic.distance(
        Point::new(a.longitude, a.latitude),
        Point::new(b.longitude, b.latitude),
    )
}

/// Returns `true` if `geometry` is a point within `tolerance` degrees of
/// `coordinates` on both axes.
#[must_use]
pub fn point_matches(geometry: &Geometry<f64>, coordinates: Coordinates, tolerance: f64) -> bool {
    match geometry {
        Geometry::Point(p) => {
            (p.x() - coordinates.longitude).abs() < tolerance
                && (p.y() - coordinates.latitude).abs() < tolerance
        }
        _ => false,
    }
}

/// Returns `true` if the two geometries share any point.
#[must_use]
pub fn geometries_intersect(a: &Geometry<f64>, b: &Geometry<f64>) -> bool {
    a.intersects(b)
}

/// Returns `true` if `geometry` contains or touches the position.
#[must_use]
pub fn covers_point(geometry: &Geometry<f64>, coordinates: Coordinates) -> bool {
    geometry.intersects(&Point::new(coordinates.longitude, coordinates.latitude))
}

/// An object envelope stored in the R-tree.
#[derive(Debug, Clone, PartialEq)]
struct IndexedEnvelope {
    id: i64,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// R-tree of object envelopes keyed by object id.
///
/// Cloning is cheap enough to snapshot the index alongside the rest of an
/// in-memory store.
#[derive(Clone)]
pub struct ObjectIndex {
    tree: RTree<IndexedEnvelope>,
    envelopes: BTreeMap<i64, AABB<[f64; 2]>>,
}

impl Default for ObjectIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: RTree::new(),
            envelopes: BTreeMap::new(),
        }
    }

    /// Number of indexed objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    /// Returns `true` if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    /// Indexes (or re-indexes) an object under `id`.
    pub fn insert(&mut self, id: i64, geometry: &Geometry<f64>) {
        self.remove(id);
        let envelope = compute_envelope(geometry, 0.0);
        self.tree.insert(IndexedEnvelope { id, envelope });
        self.envelopes.insert(id, envelope);
    }

    /// Removes an object from the index.
    pub fn remove(&mut self, id: i64) {
        if let Some(envelope) = self.envelopes.remove(&id) {
            self.tree.remove(&IndexedEnvelope { id, envelope });
        }
    }

    /// Ids of objects whose envelope intersects the envelope of
    /// `geometry` grown by `padding` degrees, in ascending order.
    #[must_use]
    pub fn candidates(&self, geometry: &Geometry<f64>, padding: f64) -> Vec<i64> {
        let query_env = compute_envelope(geometry, padding);
        let mut ids: Vec<i64> = self
            .tree
            .locate_in_envelope_intersecting(&query_env)
            .map(|entry| entry.id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Compute the bounding box envelope for a [`Geometry`], grown by
/// `padding` on every side.
fn compute_envelope(geometry: &Geometry<f64>, padding: f64) -> AABB<[f64; 2]> {
    geometry.bounding_rect().map_or_else(
        || {
            log::trace!("Indexing empty geometry at the origin");
            AABB::from_point([0.0, 0.0])
        },
        |rect| {
            AABB::from_corners(
                [rect.min().x - padding, rect.min().y - padding],
                [rect.max().x + padding, rect.max().y + padding],
            )
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = r#"{"type":"Polygon","coordinates":[[[30.0,59.0],[30.002,59.0],[30.002,59.002],[30.0,59.002],[30.0,59.0]]]}"#;

    #[test]
    fn parses_geometry_and_feature_documents() {
        let geometry = parse_geometry(SQUARE).unwrap();
        assert_eq!(geometry_kind(&geometry), GeometryKind::Polygon);

        let feature = format!(r#"{{"type":"Feature","properties":{{}},"geometry":{SQUARE}}}"#);
        let geometry = parse_geometry(&feature).unwrap();
        assert_eq!(geometry_kind(&geometry), GeometryKind::Polygon);
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(matches!(
            parse_geometry("{\"type\":\"Polygon\""),
            Err(SpatialError::InvalidGeoJson { .. })
        ));
        assert!(matches!(
            parse_geometry(r#"{"type":"FeatureCollection","features":[]}"#),
            Err(SpatialError::NoGeometry { .. })
        ));
    }

    #[test]
    fn computes_polygon_centroid() {
        let geometry = parse_geometry(SQUARE).unwrap();
        let c = centroid(&geometry).unwrap();
        assert!((c.longitude - 30.001).abs() < 1e-9);
        assert!((c.latitude - 59.001).abs() < 1e-9);
    }

    #[test]
    fn geodesic_distance_is_in_meters() {
        let a = Coordinates::new(30.0, 59.0);
        let b = Coordinates::new(30.0, 59.001);
        let d = geodesic_distance_m(a, b);
        assert!((d - 111.4).abs() < 0.5, "{d}");
    }

    #[test]
    fn point_match_uses_tolerance_on_both_axes() {
        let point = point_geometry(Coordinates::new(30.0, 59.0));
        assert!(point_matches(&point, Coordinates::new(30.000_05, 59.000_05), 1e-4));
        assert!(!point_matches(&point, Coordinates::new(30.0002, 59.0), 1e-4));
    }

    #[test]
    fn polygon_covers_inner_point() {
        let geometry = parse_geometry(SQUARE).unwrap();
        assert!(covers_point(&geometry, Coordinates::new(30.001, 59.001)));
        assert!(!covers_point(&geometry, Coordinates::new(30.01, 59.001)));
    }

    #[test]
    fn index_returns_sorted_candidates_and_forgets_removed_ids() {
        let mut index = ObjectIndex::new();
        let square = parse_geometry(SQUARE).unwrap();
        index.insert(7, &square);
        index.insert(3, &point_geometry(Coordinates::new(30.001, 59.001)));
        index.insert(9, &point_geometry(Coordinates::new(31.0, 60.0)));

        let probe = point_geometry(Coordinates::new(30.001, 59.001));
        assert_eq!(index.candidates(&probe, 1e-4), vec![3, 7]);

        index.remove(3);
        assert_eq!(index.candidates(&probe, 1e-4), vec![7]);
        assert_eq!(index.len(), 2);
    }
}
