//! Row location resolution.

use city_inventory_coercion::{RawValue, coerce_double};
use city_inventory_database::{InventoryStore, SearchShape};
use city_inventory_ingest_models::{InputMapping, InputRow, RowStatus};
use city_inventory_models::{Coordinates, GeometryKind, ObjectGeometry};

use crate::reconcile::RowFailure;

/// Decimal places kept from parsed coordinates.
pub const COORDINATE_DECIMALS: i32 = 6;

/// Where a row's service is located.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    /// A submitted `GeoJSON` geometry with its backend-computed centroid.
    Geometry {
        /// The `GeoJSON` text.
        geojson: String,
        /// Its geometry type.
        kind: GeometryKind,
        /// Its centroid.
        centroid: Coordinates,
    },
    /// A point from latitude/longitude columns.
    Point(Coordinates),
}

impl Location {
    /// The representative point: the centroid or the point itself.
    #[must_use]
    pub const fn point(&self) -> Coordinates {
        match self {
            Self::Geometry { centroid, .. } => *centroid,
            Self::Point(point) => *point,
        }
    }

    /// Shape to search existing objects with.
    #[must_use]
    pub fn search_shape(&self) -> SearchShape<'_> {
        match self {
            Self::Geometry { geojson, .. } => SearchShape::GeoJson(geojson),
            Self::Point(point) => SearchShape::Point(*point),
        }
    }

    /// Geometry to store on a new physical object.
    #[must_use]
    pub fn object_geometry(&self) -> ObjectGeometry {
        match self {
            Self::Geometry { geojson, .. } => ObjectGeometry::GeoJson(geojson.clone()),
            Self::Point(point) => ObjectGeometry::Point(*point),
        }
    }

    /// The submitted geometry, when it is not a point.
    #[must_use]
    pub fn non_point_geometry(&self) -> Option<&str> {
        match self {
            Self::Geometry { geojson, kind, .. } if !kind.is_point() => Some(geojson.as_str()),
            _ => None,
        }
    }
}

fn geojson_text(value: &RawValue) -> Result<String, RowFailure> {
    match value {
        RawValue::Text(text) => Ok(text.clone()),
        RawValue::Json(json) => Ok(json.to_string()),
        other => Err(RowFailure::skip(
            RowStatus::SkippedInvalidGeometry,
            format!("geometry value is {}, not GeoJSON", other.kind()),
        )),
    }
}

fn coordinate(value: &RawValue, axis: &str, limit: f64) -> Result<f64, RowFailure> {
    coerce_double(value)
        .filter(|v| v.abs() <= limit)
        .ok_or_else(|| {
            RowFailure::skip(
                RowStatus::SkippedInvalidCoordinates,
                format!("invalid {axis}: {value:?}"),
            )
        })
}

/// Resolves the row's location from its geometry or coordinate columns.
///
/// A present geometry takes precedence; its type and centroid come from the
/// store so the backend decides validity.
///
/// # Errors
///
/// Returns a skip for absent, unparsable or rejected locations, and
/// [`RowFailure::Backend`] if the store fails otherwise.
pub async fn resolve_location<S: InventoryStore + ?Sized>(
    store: &S,
    row: &InputRow,
    mapping: &InputMapping,
) -> Result<Location, RowFailure> {
    if let Some(value) = row.field(mapping.geometry.as_deref()) {
        let geojson = geojson_text(value)?;
        let centroid = store.geometry_centroid(&geojson).await.map_err(|e| {
            if e.is_invalid_geometry() {
                RowFailure::skip(RowStatus::SkippedInvalidGeometry, e.to_string())
            } else {
                RowFailure::Backend(e)
            }
        })?;
        return Ok(Location::Geometry {
            geojson,
            kind: centroid.kind,
            centroid: centroid.centroid,
        });
    }

    let latitude = row.field(mapping.latitude.as_deref());
    let longitude = row.field(mapping.longitude.as_deref());

    let (latitude, longitude) = match (latitude, longitude) {
        (None, None) => {
            return Err(RowFailure::skip(
                RowStatus::SkippedMissingFields,
                "neither geometry nor coordinates present",
            ));
        }
        (Some(latitude), Some(longitude)) => (latitude, longitude),
        (None, Some(_)) => {
            return Err(RowFailure::skip(
                RowStatus::SkippedInvalidCoordinates,
                "latitude is missing",
            ));
        }
        (Some(_), None) => {
            return Err(RowFailure::skip(
                RowStatus::SkippedInvalidCoordinates,
                "longitude is missing",
            ));
        }
    };

    let latitude = coordinate(latitude, "latitude", 90.0)?;
    let longitude = coordinate(longitude, "longitude", 180.0)?;

    Ok(Location::Point(
        Coordinates::new(longitude, latitude).rounded(COORDINATE_DECIMALS),
    ))
}
