#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Inventory entity types.
//!
//! These types represent the shapes of cities, service types, physical
//! objects, buildings and functional objects (services) as stored in and
//! retrieved from the spatial inventory. They are distinct from the input
//! row and outcome types in `city_inventory_ingest_models`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Spatial reference system of every stored geometry (WGS84).
pub const SRID: i32 = 4326;

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Longitude (x).
    pub longitude: f64,
    /// Latitude (y).
    pub latitude: f64,
}

impl Coordinates {
    /// Creates a coordinate pair.
    #[must_use]
    pub const fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// Rounds both axes to `decimals` decimal places.
    #[must_use]
    pub fn rounded(self, decimals: i32) -> Self {
        let factor = 10f64.powi(decimals);
        Self {
            longitude: (self.longitude * factor).round() / factor,
            latitude: (self.latitude * factor).round() / factor,
        }
    }
}

/// Geometry type of a stored or submitted geometry.
///
/// Parses both plain `GeoJSON` names (`"Polygon"`) and `PostGIS`
/// `ST_GeometryType` output (`"ST_Polygon"`).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum GeometryKind {
    /// A single position.
    #[strum(serialize = "Point", serialize = "ST_Point")]
    Point,
    /// A line.
    #[strum(serialize = "LineString", serialize = "ST_LineString")]
    LineString,
    /// A single polygon.
    #[strum(serialize = "Polygon", serialize = "ST_Polygon")]
    Polygon,
    /// Several positions.
    #[strum(serialize = "MultiPoint", serialize = "ST_MultiPoint")]
    MultiPoint,
    /// Several lines.
    #[strum(serialize = "MultiLineString", serialize = "ST_MultiLineString")]
    MultiLineString,
    /// Several polygons.
    #[strum(serialize = "MultiPolygon", serialize = "ST_MultiPolygon")]
    MultiPolygon,
    /// Heterogeneous collection.
    #[strum(serialize = "GeometryCollection", serialize = "ST_GeometryCollection")]
    GeometryCollection,
}

impl GeometryKind {
    /// Returns `true` for [`GeometryKind::Point`].
    #[must_use]
    pub const fn is_point(self) -> bool {
        matches!(self, Self::Point)
    }
}

/// A city the inventory is partitioned by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct City {
    /// Primary key.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Short code, if any.
    pub code: Option<String>,
}

/// Classification metadata for a service category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTypeDescriptor {
    /// Service type primary key.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Short code, if any.
    pub code: Option<String>,
    /// City function this service type belongs to.
    pub function_id: i64,
    /// Infrastructure type the function belongs to.
    pub infrastructure_id: i64,
    /// Whether services of this type live in buildings with addresses.
    pub is_building: bool,
    /// Lower bound for placeholder capacities.
    pub capacity_min: i32,
    /// Upper bound for placeholder capacities.
    pub capacity_max: i32,
}

impl ServiceTypeDescriptor {
    /// Placeholder capacity bounds as an ordered `(low, high)` pair.
    #[must_use]
    pub fn capacity_bounds(&self) -> (i32, i32) {
        (
            self.capacity_min.min(self.capacity_max),
            self.capacity_min.max(self.capacity_max),
        )
    }
}

/// Administrative territories enclosing a point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Territories {
    /// Enclosing municipality.
    pub municipality_id: Option<i64>,
    /// Enclosing administrative unit.
    pub administrative_unit_id: Option<i64>,
}

/// Geometry of a physical object as submitted for insertion or search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObjectGeometry {
    /// A `GeoJSON` geometry document.
    GeoJson(String),
    /// A synthesized point.
    Point(Coordinates),
}

/// Whether a physical object lookup requires an owned building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildingFilter {
    /// Only objects wrapped by a building match.
    WithBuilding,
    /// Only objects without a building match.
    WithoutBuilding,
}

impl BuildingFilter {
    /// The filter matching a service type's building flag.
    #[must_use]
    pub const fn for_service_type(is_building: bool) -> Self {
        if is_building {
            Self::WithBuilding
        } else {
            Self::WithoutBuilding
        }
    }
}

/// Result of centroid computation over a submitted geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometryCentroid {
    /// Type of the submitted geometry.
    pub kind: GeometryKind,
    /// Its centroid.
    pub centroid: Coordinates,
}

/// A physical object located by an address or geometry search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMatch {
    /// The physical object.
    pub physical_object_id: i64,
    /// The building wrapping it, if any.
    pub building_id: Option<i64>,
    /// The building address, if any.
    pub address: Option<String>,
    /// Type of the stored geometry.
    pub geometry_kind: GeometryKind,
}

/// A geolocated inventory entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalObject {
    /// Primary key.
    pub id: i64,
    /// Owning city.
    pub city_id: i64,
    /// Identifier in an external system (e.g. OSM).
    pub external_id: Option<String>,
    /// Type of the stored geometry.
    pub geometry_kind: GeometryKind,
    /// Centroid of the stored geometry.
    pub centroid: Coordinates,
    /// Enclosing territories.
    pub territories: Territories,
}

/// Fields of a physical object to insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPhysicalObject {
    /// Owning city.
    pub city_id: i64,
    /// Identifier in an external system (e.g. OSM).
    pub external_id: Option<String>,
    /// Geometry to store.
    pub geometry: ObjectGeometry,
    /// Precomputed centroid.
    pub centroid: Coordinates,
    /// Enclosing territories.
    pub territories: Territories,
}

/// A physical object specialization carrying a postal address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Building {
    /// Primary key.
    pub id: i64,
    /// The wrapped physical object.
    pub physical_object_id: i64,
    /// Postal address.
    pub address: Option<String>,
}

/// A service instance attached to exactly one physical object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionalObject {
    /// Primary key.
    pub id: i64,
    /// The physical object hosting the service.
    pub physical_object_id: i64,
    /// Service type.
    pub service_type_id: i64,
    /// City function of the service type.
    pub function_id: i64,
    /// Infrastructure type of the function.
    pub infrastructure_id: i64,
    /// Service name.
    pub name: String,
    /// Opening hours text.
    pub opening_hours: Option<String>,
    /// Website.
    pub website: Option<String>,
    /// Phone number.
    pub phone: Option<String>,
    /// Capacity.
    pub capacity: Option<i32>,
    /// `false` when the capacity is a random placeholder.
    pub is_capacity_real: bool,
    /// Free-form additional properties.
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Creation time.
    pub created_at: NaiveDateTime,
    /// Last update (or touch) time.
    pub updated_at: NaiveDateTime,
}

/// The mutable fields of a stored functional object, as read by the
/// update path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredService {
    /// Service name.
    pub name: String,
    /// Opening hours text.
    pub opening_hours: Option<String>,
    /// Website.
    pub website: Option<String>,
    /// Phone number.
    pub phone: Option<String>,
    /// Capacity.
    pub capacity: Option<i32>,
    /// `false` when the capacity is a random placeholder.
    pub is_capacity_real: bool,
    /// Free-form additional properties.
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl From<&FunctionalObject> for StoredService {
    fn from(value: &FunctionalObject) -> Self {
        Self {
            name: value.name.clone(),
            opening_hours: value.opening_hours.clone(),
            website: value.website.clone(),
            phone: value.phone.clone(),
            capacity: value.capacity,
            is_capacity_real: value.is_capacity_real,
            properties: value.properties.clone(),
        }
    }
}

/// Fields of a functional object to insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewService {
    /// The physical object hosting the service.
    pub physical_object_id: i64,
    /// Service type.
    pub service_type_id: i64,
    /// City function of the service type.
    pub function_id: i64,
    /// Infrastructure type of the function.
    pub infrastructure_id: i64,
    /// Service name.
    pub name: String,
    /// Opening hours text.
    pub opening_hours: Option<String>,
    /// Website.
    pub website: Option<String>,
    /// Phone number.
    pub phone: Option<String>,
    /// Capacity (real or placeholder).
    pub capacity: i32,
    /// `false` when the capacity is a random placeholder.
    pub is_capacity_real: bool,
    /// Free-form additional properties.
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Creation time, also used as the initial update time.
    pub created_at: NaiveDateTime,
}

/// Changes to apply to a stored functional object.
///
/// `None` fields are left untouched. Applying changes always stamps
/// `updated_at` with [`ServiceChanges::touched_at`], even when every
/// field is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceChanges {
    /// New name.
    pub name: Option<String>,
    /// New opening hours.
    pub opening_hours: Option<String>,
    /// New website.
    pub website: Option<String>,
    /// New phone.
    pub phone: Option<String>,
    /// New real capacity; also sets `is_capacity_real`.
    pub capacity: Option<i32>,
    /// Properties to merge over the stored ones.
    pub properties: Option<serde_json::Map<String, serde_json::Value>>,
    /// Update timestamp.
    pub touched_at: NaiveDateTime,
}

impl ServiceChanges {
    /// A change set that only stamps `updated_at`.
    #[must_use]
    pub const fn touch(touched_at: NaiveDateTime) -> Self {
        Self {
            name: None,
            opening_hours: None,
            website: None,
            phone: None,
            capacity: None,
            properties: None,
            touched_at,
        }
    }

    /// Names of the fields this change set modifies, in column order.
    #[must_use]
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push("name");
        }
        if self.opening_hours.is_some() {
            fields.push("opening_hours");
        }
        if self.website.is_some() {
            fields.push("website");
        }
        if self.phone.is_some() {
            fields.push("phone");
        }
        if self.capacity.is_some() {
            fields.push("capacity");
            fields.push("is_capacity_real");
        }
        if self.properties.is_some() {
            fields.push("properties");
        }
        fields
    }

    /// Returns `true` when only `updated_at` would change.
    #[must_use]
    pub fn is_touch_only(&self) -> bool {
        self.changed_fields().is_empty()
    }
}
