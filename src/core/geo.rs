// src/core/geo.rs
//! Quadkey <-> geography math for the Bing tile scheme.
//!
//! The conversions here mirror the usual Web-Mercator tile arithmetic:
//! latitude is clamped to the projection's valid band before mapping, and
//! tile indices are clamped to the grid so coordinates sitting exactly on
//! the antimeridian or the polar cut still resolve to a tile.

use super::{
    BoundingBox, GeoCoordinate, QuadKey, MAX_LATITUDE, MAX_LONGITUDE, MIN_LATITUDE,
    MIN_LONGITUDE,
};

/// Maps a geographic coordinate to the tile containing it at `level_of_detail`.
pub fn coordinate_to_quad_key(coordinate: &GeoCoordinate, level_of_detail: i32) -> QuadKey {
    let side = (1i64 << level_of_detail) as f64;

    let lon = coordinate
        .longitude
        .clamp(MIN_LONGITUDE, MAX_LONGITUDE);
    let lat = coordinate.latitude.clamp(MIN_LATITUDE, MAX_LATITUDE);

    let x = (lon + 180.0) / 360.0;
    let sin_lat = lat.to_radians().sin();
    let y = 0.5 - ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() / (4.0 * std::f64::consts::PI);

    let max_index = (side as i64 - 1) as i32;
    QuadKey {
        tile_x: ((x * side).floor() as i64).clamp(0, max_index as i64) as i32,
        tile_y: ((y * side).floor() as i64).clamp(0, max_index as i64) as i32,
        level_of_detail,
    }
}

/// Geographic extent of a tile.
pub fn quad_key_to_bounding_box(quad_key: &QuadKey) -> BoundingBox {
    let side = (1i64 << quad_key.level_of_detail) as f64;

    let lon_min = quad_key.tile_x as f64 / side * 360.0 - 180.0;
    let lon_max = (quad_key.tile_x + 1) as f64 / side * 360.0 - 180.0;

    let lat_max = tile_y_to_latitude(quad_key.tile_y as f64, side);
    let lat_min = tile_y_to_latitude((quad_key.tile_y + 1) as f64, side);

    BoundingBox::new(
        GeoCoordinate::new(lat_min, lon_min),
        GeoCoordinate::new(lat_max, lon_max),
    )
}

fn tile_y_to_latitude(tile_y: f64, side: f64) -> f64 {
    let n = std::f64::consts::PI * (1.0 - 2.0 * tile_y / side);
    n.sinh().atan().to_degrees()
}

/// Visits every quadkey at `level_of_detail` whose extent intersects `bbox`.
pub fn visit_tile_range<F>(bbox: &BoundingBox, level_of_detail: i32, mut visitor: F)
where
    F: FnMut(QuadKey),
{
    // The north-west corner has the smallest tile indices.
    let start = coordinate_to_quad_key(
        &GeoCoordinate::new(bbox.max_point.latitude, bbox.min_point.longitude),
        level_of_detail,
    );
    let end = coordinate_to_quad_key(
        &GeoCoordinate::new(bbox.min_point.latitude, bbox.max_point.longitude),
        level_of_detail,
    );

    for tile_y in start.tile_y..=end.tile_y {
        for tile_x in start.tile_x..=end.tile_x {
            visitor(QuadKey {
                tile_x,
                tile_y,
                level_of_detail,
            });
        }
    }
}

/// Signed-area winding test. Clockwise rings are outer contours.
pub fn is_clockwise(coordinates: &[GeoCoordinate]) -> bool {
    if coordinates.len() < 3 {
        return false;
    }
    let mut doubled_area = 0.0;
    for i in 0..coordinates.len() {
        let a = &coordinates[i];
        let b = &coordinates[(i + 1) % coordinates.len()];
        doubled_area += (b.longitude - a.longitude) * (b.latitude + a.latitude);
    }
    doubled_area > 0.0
}

/// Bounding box of an ordered coordinate sequence.
pub fn coordinates_bounding_box(coordinates: &[GeoCoordinate]) -> BoundingBox {
    let mut bbox = BoundingBox::empty();
    for coordinate in coordinates {
        bbox.expand(coordinate);
    }
    bbox
}
