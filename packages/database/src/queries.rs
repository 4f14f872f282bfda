//! Inventory queries.
//!
//! Every query is raw `PostGIS` SQL issued through `query_raw_params()` /
//! `exec_raw_params()`. Geometries are passed as `GeoJSON` text and
//! converted with `ST_GeomFromGeoJSON`; ids are cast to `bigint` so they
//! read back as `i64` regardless of the column width.

use std::fmt::Write as _;

use city_inventory_models::{
    BuildingFilter, City, Coordinates, GeometryCentroid, GeometryKind, NewPhysicalObject,
    NewService, ObjectGeometry, ObjectMatch, SRID, ServiceChanges, ServiceTypeDescriptor,
    StoredService, Territories,
};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue, Row};

use crate::{
    DbError,
    store::{GeometrySearch, POINT_MATCH_TOLERANCE_DEG, SearchShape},
};

fn conversion_error<E: std::fmt::Display>(column: &str) -> impl FnOnce(E) -> DbError + '_ {
    move |e| DbError::Conversion {
        message: format!("Failed to parse {column}: {e}"),
    }
}

fn opt_string(value: Option<&str>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, |v| DatabaseValue::String(v.to_string()))
}

fn opt_i64(value: Option<i64>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, DatabaseValue::Int64)
}

/// Extracts the `id` column of the first row returned by a
/// `RETURNING id` clause.
fn returning_id(rows: &[Row], entity: &str) -> Result<i64, DbError> {
    let row = rows.first().ok_or_else(|| DbError::Conversion {
        message: format!("Failed to get {entity} id from insert"),
    })?;
    row.to_value("id").map_err(conversion_error("id"))
}

/// Maps a backend error on a geometry-consuming statement to
/// [`DbError::InvalidGeometry`] when the backend rejected the geometry.
fn geometry_error(e: switchy_database::DatabaseError) -> DbError {
    let message = e.to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("geojson") || lower.contains("geometry") || lower.contains("parse error") {
        DbError::InvalidGeometry { message }
    } else {
        DbError::Database(e)
    }
}

fn parse_geometry_kind(row: &Row) -> Result<GeometryKind, DbError> {
    let kind: String = row
        .to_value("geometry_type")
        .map_err(conversion_error("geometry_type"))?;
    kind.parse().map_err(|_| DbError::Conversion {
        message: format!("Unknown geometry type: {kind}"),
    })
}

fn parse_object_match(row: &Row) -> Result<ObjectMatch, DbError> {
    Ok(ObjectMatch {
        physical_object_id: row
            .to_value("physical_object_id")
            .map_err(conversion_error("physical_object_id"))?,
        building_id: row
            .to_value::<Option<i64>>("building_id")
            .map_err(conversion_error("building_id"))?,
        address: row
            .to_value::<Option<String>>("address")
            .map_err(conversion_error("address"))?,
        geometry_kind: parse_geometry_kind(row)?,
    })
}

fn parse_properties(
    text: Option<String>,
) -> Result<serde_json::Map<String, serde_json::Value>, DbError> {
    let Some(text) = text else {
        return Ok(serde_json::Map::new());
    };
    match serde_json::from_str(&text) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(serde_json::Value::Null) => Ok(serde_json::Map::new()),
        Ok(other) => Err(DbError::Conversion {
            message: format!("Expected properties object, found {other}"),
        }),
        Err(e) => Err(DbError::Conversion {
            message: format!("Failed to parse properties: {e}"),
        }),
    }
}

fn properties_json(properties: &serde_json::Map<String, serde_json::Value>) -> DatabaseValue {
    DatabaseValue::String(serde_json::Value::Object(properties.clone()).to_string())
}

/// Looks up a city by name or code.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn find_city(db: &dyn Database, name_or_code: &str) -> Result<Option<City>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT id::bigint AS id, name, code FROM cities
             WHERE name = $1 OR code = $1
             ORDER BY id
             LIMIT 1",
            &[DatabaseValue::String(name_or_code.to_string())],
        )
        .await?;

    let Some(row) = rows.first() else {
        return Ok(None);
    };

    Ok(Some(City {
        id: row.to_value("id").map_err(conversion_error("id"))?,
        name: row.to_value("name").map_err(conversion_error("name"))?,
        code: row
            .to_value::<Option<String>>("code")
            .map_err(conversion_error("code"))?,
    }))
}

/// Returns every service type whose name or code matches, with its
/// function and infrastructure ids.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn find_service_types(
    db: &dyn Database,
    name_or_code: &str,
) -> Result<Vec<ServiceTypeDescriptor>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT st.id::bigint AS id, st.name, st.code,
                    cf.id::bigint AS function_id,
                    cf.city_infrastructure_type_id::bigint AS infrastructure_id,
                    st.is_building,
                    COALESCE(st.capacity_min, 0)::integer AS capacity_min,
                    COALESCE(st.capacity_max, 0)::integer AS capacity_max
             FROM city_service_types st
             JOIN city_functions cf ON cf.id = st.city_function_id
             WHERE st.name = $1 OR st.code = $1
             ORDER BY st.id",
            &[DatabaseValue::String(name_or_code.to_string())],
        )
        .await?;

    rows.iter()
        .map(|row| {
            Ok(ServiceTypeDescriptor {
                id: row.to_value("id").map_err(conversion_error("id"))?,
                name: row.to_value("name").map_err(conversion_error("name"))?,
                code: row
                    .to_value::<Option<String>>("code")
                    .map_err(conversion_error("code"))?,
                function_id: row
                    .to_value("function_id")
                    .map_err(conversion_error("function_id"))?,
                infrastructure_id: row
                    .to_value("infrastructure_id")
                    .map_err(conversion_error("infrastructure_id"))?,
                is_building: row
                    .to_value("is_building")
                    .map_err(conversion_error("is_building"))?,
                capacity_min: row
                    .to_value("capacity_min")
                    .map_err(conversion_error("capacity_min"))?,
                capacity_max: row
                    .to_value("capacity_max")
                    .map_err(conversion_error("capacity_max"))?,
            })
        })
        .collect()
}

/// Computes the type and centroid of a `GeoJSON` geometry.
///
/// # Errors
///
/// Returns [`DbError::InvalidGeometry`] if `PostGIS` rejects the geometry,
/// or another [`DbError`] if the query fails.
pub async fn geometry_centroid(
    db: &dyn Database,
    geojson: &str,
) -> Result<GeometryCentroid, DbError> {
    let rows = db
        .query_raw_params(
            "WITH g AS (SELECT ST_SetSRID(ST_GeomFromGeoJSON($1), $2) AS geometry)
             SELECT ST_GeometryType(geometry) AS geometry_type,
                    ST_X(ST_Centroid(geometry)) AS longitude,
                    ST_Y(ST_Centroid(geometry)) AS latitude
             FROM g",
            &[
                DatabaseValue::String(geojson.to_string()),
                DatabaseValue::Int32(SRID),
            ],
        )
        .await
        .map_err(geometry_error)?;

    let row = rows.first().ok_or_else(|| DbError::InvalidGeometry {
        message: "Centroid query returned no rows".to_string(),
    })?;

    let longitude: Option<f64> = row
        .to_value("longitude")
        .map_err(conversion_error("longitude"))?;
    let latitude: Option<f64> = row
        .to_value("latitude")
        .map_err(conversion_error("latitude"))?;
    let (Some(longitude), Some(latitude)) = (longitude, latitude) else {
        return Err(DbError::InvalidGeometry {
            message: "Geometry is empty".to_string(),
        });
    };

    Ok(GeometryCentroid {
        kind: parse_geometry_kind(row)?,
        centroid: Coordinates::new(longitude, latitude),
    })
}

/// Looks up the municipality and administrative unit of the city that
/// contain a point.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn find_territories(
    db: &dyn Database,
    city_id: i64,
    point: Coordinates,
) -> Result<Territories, DbError> {
    let rows = db
        .query_raw_params(
            "WITH p AS (SELECT ST_SetSRID(ST_MakePoint($2, $3), $4) AS geometry)
             SELECT
                 (SELECT m.id::bigint FROM municipalities m, p
                  WHERE m.city_id = $1 AND ST_Within(p.geometry, m.geometry)
                  ORDER BY m.id LIMIT 1) AS municipality_id,
                 (SELECT a.id::bigint FROM administrative_units a, p
                  WHERE a.city_id = $1 AND ST_Within(p.geometry, a.geometry)
                  ORDER BY a.id LIMIT 1) AS administrative_unit_id",
            &[
                DatabaseValue::Int64(city_id),
                DatabaseValue::Real64(point.longitude),
                DatabaseValue::Real64(point.latitude),
                DatabaseValue::Int32(SRID),
            ],
        )
        .await?;

    let Some(row) = rows.first() else {
        return Ok(Territories::default());
    };

    Ok(Territories {
        municipality_id: row
            .to_value::<Option<i64>>("municipality_id")
            .map_err(conversion_error("municipality_id"))?,
        administrative_unit_id: row
            .to_value::<Option<i64>>("administrative_unit_id")
            .map_err(conversion_error("administrative_unit_id"))?,
    })
}

/// Finds a building whose address ends with `suffix` and whose object
/// centroid lies within `max_distance_m` meters of `point`.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn find_building_by_address(
    db: &dyn Database,
    city_id: i64,
    suffix: &str,
    point: Coordinates,
    max_distance_m: f64,
) -> Result<Option<ObjectMatch>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT phys.id::bigint AS physical_object_id,
                    build.id::bigint AS building_id,
                    build.address,
                    ST_GeometryType(phys.geometry) AS geometry_type
             FROM physical_objects phys
             JOIN buildings build ON build.physical_object_id = phys.id
             WHERE phys.city_id = $1
               AND right(build.address, char_length($2)) = $2
               AND ST_Distance(
                   phys.center::geography,
                   ST_SetSRID(ST_MakePoint($3, $4), $5)::geography
               ) < $6
             ORDER BY phys.id
             LIMIT 1",
            &[
                DatabaseValue::Int64(city_id),
                DatabaseValue::String(suffix.to_string()),
                DatabaseValue::Real64(point.longitude),
                DatabaseValue::Real64(point.latitude),
                DatabaseValue::Int32(SRID),
                DatabaseValue::Real64(max_distance_m),
            ],
        )
        .await?;

    rows.first().map(parse_object_match).transpose()
}

/// Finds a physical object matching a geometry search.
///
/// # Errors
///
/// Returns [`DbError::InvalidGeometry`] if `PostGIS` rejects the search
/// geometry, or another [`DbError`] if the query fails.
pub async fn find_object_by_geometry(
    db: &dyn Database,
    search: &GeometrySearch<'_>,
) -> Result<Option<ObjectMatch>, DbError> {
    let mut sql = String::from(
        "SELECT phys.id::bigint AS physical_object_id,
                build.id::bigint AS building_id,
                build.address,
                ST_GeometryType(phys.geometry) AS geometry_type
         FROM physical_objects phys
         LEFT JOIN buildings build ON build.physical_object_id = phys.id
         WHERE phys.city_id = $1",
    );
    let mut params = vec![DatabaseValue::Int64(search.city_id)];

    match search.buildings {
        BuildingFilter::WithBuilding => sql.push_str(" AND build.id IS NOT NULL"),
        BuildingFilter::WithoutBuilding => sql.push_str(" AND build.id IS NULL"),
    }

    if let Some(id) = search.territories.municipality_id {
        params.push(DatabaseValue::Int64(id));
        let _ = write!(sql, " AND phys.municipality_id = ${}", params.len());
    }
    if let Some(id) = search.territories.administrative_unit_id {
        params.push(DatabaseValue::Int64(id));
        let _ = write!(sql, " AND phys.administrative_unit_id = ${}", params.len());
    }

    match search.shape {
        SearchShape::GeoJson(geojson) => {
            params.push(DatabaseValue::String(geojson.to_string()));
            let geom_idx = params.len();
            params.push(DatabaseValue::Int32(SRID));
            let srid_idx = params.len();
            let _ = write!(
                sql,
                " AND ST_Intersects(ST_SetSRID(ST_GeomFromGeoJSON(${geom_idx}), ${srid_idx}), phys.geometry)"
            );
        }
        SearchShape::Point(point) => {
            params.push(DatabaseValue::Real64(point.longitude));
            let lng_idx = params.len();
            params.push(DatabaseValue::Real64(point.latitude));
            let lat_idx = params.len();
            params.push(DatabaseValue::Real64(POINT_MATCH_TOLERANCE_DEG));
            let tol_idx = params.len();
            params.push(DatabaseValue::Int32(SRID));
            let srid_idx = params.len();
            let _ = write!(
                sql,
                " AND ((ST_GeometryType(phys.geometry) = 'ST_Point'
                        AND abs(ST_X(phys.geometry) - ${lng_idx}) < ${tol_idx}
                        AND abs(ST_Y(phys.geometry) - ${lat_idx}) < ${tol_idx})
                   OR ST_Intersects(ST_SetSRID(ST_MakePoint(${lng_idx}, ${lat_idx}), ${srid_idx}), phys.geometry))"
            );
        }
    }

    sql.push_str(" ORDER BY phys.id LIMIT 1");

    let rows = db
        .query_raw_params(&sql, &params)
        .await
        .map_err(geometry_error)?;

    rows.first().map(parse_object_match).transpose()
}

/// Finds a functional object by host object, service type and exact name.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn find_service(
    db: &dyn Database,
    physical_object_id: i64,
    service_type_id: i64,
    name: &str,
) -> Result<Option<i64>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT id::bigint AS id FROM functional_objects
             WHERE physical_object_id = $1 AND city_service_type_id = $2 AND name = $3
             ORDER BY id
             LIMIT 1",
            &[
                DatabaseValue::Int64(physical_object_id),
                DatabaseValue::Int64(service_type_id),
                DatabaseValue::String(name.to_string()),
            ],
        )
        .await?;

    rows.first()
        .map(|row| row.to_value("id").map_err(conversion_error("id")))
        .transpose()
}

/// Reads the mutable fields of a functional object.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no such object exists, or another
/// [`DbError`] if the query fails.
pub async fn get_service(db: &dyn Database, id: i64) -> Result<StoredService, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT name, opening_hours, website, phone, capacity::integer AS capacity,
                    COALESCE(is_capacity_real, false) AS is_capacity_real,
                    properties::text AS properties
             FROM functional_objects
             WHERE id = $1",
            &[DatabaseValue::Int64(id)],
        )
        .await?;

    let row = rows.first().ok_or(DbError::NotFound {
        entity: "functional_objects",
        id,
    })?;

    Ok(StoredService {
        name: row.to_value("name").map_err(conversion_error("name"))?,
        opening_hours: row
            .to_value::<Option<String>>("opening_hours")
            .map_err(conversion_error("opening_hours"))?,
        website: row
            .to_value::<Option<String>>("website")
            .map_err(conversion_error("website"))?,
        phone: row
            .to_value::<Option<String>>("phone")
            .map_err(conversion_error("phone"))?,
        capacity: row
            .to_value::<Option<i32>>("capacity")
            .map_err(conversion_error("capacity"))?,
        is_capacity_real: row
            .to_value("is_capacity_real")
            .map_err(conversion_error("is_capacity_real"))?,
        properties: parse_properties(
            row.to_value::<Option<String>>("properties")
                .map_err(conversion_error("properties"))?,
        )?,
    })
}

/// Inserts a physical object.
///
/// # Errors
///
/// Returns [`DbError::InvalidGeometry`] if `PostGIS` rejects the geometry,
/// or another [`DbError`] if the insert fails.
pub async fn insert_physical_object(
    db: &dyn Database,
    object: &NewPhysicalObject,
) -> Result<i64, DbError> {
    let mut params = vec![DatabaseValue::Int32(SRID)];
    let geometry_sql = match &object.geometry {
        ObjectGeometry::GeoJson(geojson) => {
            params.push(DatabaseValue::String(geojson.clone()));
            format!("ST_SetSRID(ST_GeomFromGeoJSON(${}), $1)", params.len())
        }
        ObjectGeometry::Point(point) => {
            params.push(DatabaseValue::Real64(point.longitude));
            params.push(DatabaseValue::Real64(point.latitude));
            format!(
                "ST_SetSRID(ST_MakePoint(${}, ${}), $1)",
                params.len() - 1,
                params.len()
            )
        }
    };

    let first = params.len() + 1;
    params.extend([
        DatabaseValue::Real64(object.centroid.longitude),
        DatabaseValue::Real64(object.centroid.latitude),
        DatabaseValue::Int64(object.city_id),
        opt_string(object.external_id.as_deref()),
        opt_i64(object.territories.municipality_id),
        opt_i64(object.territories.administrative_unit_id),
    ]);

    let sql = format!(
        "INSERT INTO physical_objects
             (geometry, center, city_id, osm_id, municipality_id, administrative_unit_id)
         VALUES (
             {geometry_sql},
             ST_SetSRID(ST_MakePoint(${}, ${}), $1),
             ${}, ${}, ${}, ${}
         )
         RETURNING id::bigint AS id",
        first,
        first + 1,
        first + 2,
        first + 3,
        first + 4,
        first + 5,
    );

    let rows = db
        .query_raw_params(&sql, &params)
        .await
        .map_err(geometry_error)?;

    returning_id(&rows, "physical object")
}

/// Inserts a building wrapping a physical object.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub async fn insert_building(
    db: &dyn Database,
    physical_object_id: i64,
    address: Option<&str>,
) -> Result<i64, DbError> {
    let rows = db
        .query_raw_params(
            "INSERT INTO buildings (physical_object_id, address)
             VALUES ($1, $2)
             RETURNING id::bigint AS id",
            &[
                DatabaseValue::Int64(physical_object_id),
                opt_string(address),
            ],
        )
        .await?;

    returning_id(&rows, "building")
}

/// Inserts a functional object.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub async fn insert_service(db: &dyn Database, service: &NewService) -> Result<i64, DbError> {
    let rows = db
        .query_raw_params(
            INSERT_SERVICE_SQL,
            &[
                DatabaseValue::String(service.name.clone()),
                opt_string(service.opening_hours.as_deref()),
                opt_string(service.website.as_deref()),
                opt_string(service.phone.as_deref()),
                DatabaseValue::Int64(service.service_type_id),
                DatabaseValue::Int64(service.function_id),
                DatabaseValue::Int64(service.infrastructure_id),
                DatabaseValue::Int32(service.capacity),
                DatabaseValue::Bool(service.is_capacity_real),
                DatabaseValue::Int64(service.physical_object_id),
                properties_json(&service.properties),
                DatabaseValue::DateTime(service.created_at),
            ],
        )
        .await?;

    returning_id(&rows, "functional object")
}

/// `$11` is bound as JSON text and cast to `jsonb` on the server.
const INSERT_SERVICE_SQL: &str = "INSERT INTO functional_objects (
         name, opening_hours, website, phone,
         city_service_type_id, city_function_id, city_infrastructure_type_id,
         capacity, is_capacity_real, physical_object_id,
         properties, created_at, updated_at
     ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11::text::jsonb, $12, $12)
     RETURNING id::bigint AS id";

/// Builds the `UPDATE` for a change set.
///
/// The `SET` list is built from the non-`None` fields; `updated_at` is
/// always set, so an empty change set touches the row. The id is the last
/// parameter.
fn update_service_statement(id: i64, changes: &ServiceChanges) -> (String, Vec<DatabaseValue>) {
    let mut assignments: Vec<String> = Vec::new();
    let mut params: Vec<DatabaseValue> = Vec::new();

    let mut push = |column: &str, value: DatabaseValue| {
        params.push(value);
        assignments.push(format!("{column} = ${}", params.len()));
    };

    if let Some(name) = &changes.name {
        push("name", DatabaseValue::String(name.clone()));
    }
    if let Some(opening_hours) = &changes.opening_hours {
        push("opening_hours", DatabaseValue::String(opening_hours.clone()));
    }
    if let Some(website) = &changes.website {
        push("website", DatabaseValue::String(website.clone()));
    }
    if let Some(phone) = &changes.phone {
        push("phone", DatabaseValue::String(phone.clone()));
    }
    if let Some(capacity) = changes.capacity {
        push("capacity", DatabaseValue::Int32(capacity));
        push("is_capacity_real", DatabaseValue::Bool(true));
    }
    push("updated_at", DatabaseValue::DateTime(changes.touched_at));

    if let Some(properties) = &changes.properties {
        params.push(properties_json(properties));
        assignments.push(format!(
            "properties = COALESCE(properties, '{{}}'::jsonb) || ${}::text::jsonb",
            params.len()
        ));
    }

    params.push(DatabaseValue::Int64(id));
    let sql = format!(
        "UPDATE functional_objects SET {} WHERE id = ${}",
        assignments.join(", "),
        params.len()
    );

    (sql, params)
}

/// Applies a change set to a functional object.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row was updated, or another
/// [`DbError`] if the update fails.
pub async fn update_service(
    db: &dyn Database,
    id: i64,
    changes: &ServiceChanges,
) -> Result<(), DbError> {
    let (sql, params) = update_service_statement(id, changes);

    let updated = db.exec_raw_params(&sql, &params).await?;
    if updated == 0 {
        return Err(DbError::NotFound {
            entity: "functional_objects",
            id,
        });
    }

    Ok(())
}

/// Replaces the geometry and centroid of a physical object.
///
/// # Errors
///
/// Returns [`DbError::InvalidGeometry`] if `PostGIS` rejects the geometry,
/// or another [`DbError`] if the update fails.
pub async fn replace_geometry(
    db: &dyn Database,
    physical_object_id: i64,
    geojson: &str,
    centroid: Coordinates,
) -> Result<(), DbError> {
    let updated = db
        .exec_raw_params(
            "UPDATE physical_objects
             SET geometry = ST_SetSRID(ST_GeomFromGeoJSON($1), $2),
                 center = ST_SetSRID(ST_MakePoint($3, $4), $2)
             WHERE id = $5",
            &[
                DatabaseValue::String(geojson.to_string()),
                DatabaseValue::Int32(SRID),
                DatabaseValue::Real64(centroid.longitude),
                DatabaseValue::Real64(centroid.latitude),
                DatabaseValue::Int64(physical_object_id),
            ],
        )
        .await
        .map_err(geometry_error)?;

    if updated == 0 {
        return Err(DbError::NotFound {
            entity: "physical_objects",
            id: physical_object_id,
        });
    }

    Ok(())
}
