// src/core/mod.rs
//! Core geographic primitives shared by every subsystem.
//!
//! This module defines the fundamental value types of the pipeline:
//! coordinates, bounding boxes, quadkeys and level-of-detail ranges.

pub mod errors;
pub mod geo;
pub mod strings;

pub use errors::Error;
pub use strings::StringTable;

use anyhow::Result;

/// Latitude clamp of the Web-Mercator projection used by the quadkey scheme.
pub const MIN_LATITUDE: f64 = -85.05112878;
pub const MAX_LATITUDE: f64 = 85.05112878;
pub const MIN_LONGITUDE: f64 = -180.0;
pub const MAX_LONGITUDE: f64 = 180.0;

/// Smallest and largest level of detail a quadkey may carry.
pub const MIN_LEVEL_OF_DETAIL: i32 = 1;
pub const MAX_LEVEL_OF_DETAIL: i32 = 19;

/// A WGS-84 geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoCoordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoCoordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// An axis-aligned geographic rectangle.
///
/// Invariant: `min_point.latitude <= max_point.latitude` and
/// `min_point.longitude <= max_point.longitude`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_point: GeoCoordinate,
    pub max_point: GeoCoordinate,
}

impl BoundingBox {
    pub fn new(min_point: GeoCoordinate, max_point: GeoCoordinate) -> Self {
        Self {
            min_point,
            max_point,
        }
    }

    /// An inverted box that becomes valid once the first point is merged in.
    pub fn empty() -> Self {
        Self {
            min_point: GeoCoordinate::new(f64::INFINITY, f64::INFINITY),
            max_point: GeoCoordinate::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.min_point.latitude <= self.max_point.latitude
            && self.min_point.longitude <= self.max_point.longitude
    }

    /// Grows the box to cover `coordinate`.
    pub fn expand(&mut self, coordinate: &GeoCoordinate) {
        self.min_point.latitude = self.min_point.latitude.min(coordinate.latitude);
        self.min_point.longitude = self.min_point.longitude.min(coordinate.longitude);
        self.max_point.latitude = self.max_point.latitude.max(coordinate.latitude);
        self.max_point.longitude = self.max_point.longitude.max(coordinate.longitude);
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_point.latitude <= other.max_point.latitude
            && self.max_point.latitude >= other.min_point.latitude
            && self.min_point.longitude <= other.max_point.longitude
            && self.max_point.longitude >= other.min_point.longitude
    }

    pub fn contains(&self, coordinate: &GeoCoordinate) -> bool {
        coordinate.latitude >= self.min_point.latitude
            && coordinate.latitude <= self.max_point.latitude
            && coordinate.longitude >= self.min_point.longitude
            && coordinate.longitude <= self.max_point.longitude
    }

    pub fn center(&self) -> GeoCoordinate {
        GeoCoordinate::new(
            0.5 * (self.min_point.latitude + self.max_point.latitude),
            0.5 * (self.min_point.longitude + self.max_point.longitude),
        )
    }
}

/// Bing-style quadtree tile identifier.
///
/// Invariant: `0 <= tile_x, tile_y < 2^level_of_detail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuadKey {
    pub tile_x: i32,
    pub tile_y: i32,
    pub level_of_detail: i32,
}

impl QuadKey {
    pub fn new(tile_x: i32, tile_y: i32, level_of_detail: i32) -> Result<Self> {
        let quad_key = Self {
            tile_x,
            tile_y,
            level_of_detail,
        };
        if !quad_key.is_valid() {
            return Err(Error::InvalidQuadKey(tile_x, tile_y, level_of_detail).into());
        }
        Ok(quad_key)
    }

    pub fn is_valid(&self) -> bool {
        if self.level_of_detail < MIN_LEVEL_OF_DETAIL
            || self.level_of_detail > MAX_LEVEL_OF_DETAIL
        {
            return false;
        }
        let side = 1i32 << self.level_of_detail;
        self.tile_x >= 0 && self.tile_x < side && self.tile_y >= 0 && self.tile_y < side
    }

    /// Bing digit code, e.g. `QuadKey{1, 2, 2}` -> `"21"`.
    pub fn code(&self) -> String {
        let mut code = String::with_capacity(self.level_of_detail as usize);
        for i in (1..=self.level_of_detail).rev() {
            let mask = 1i32 << (i - 1);
            let mut digit = 0u8;
            if self.tile_x & mask != 0 {
                digit += 1;
            }
            if self.tile_y & mask != 0 {
                digit += 2;
            }
            code.push((b'0' + digit) as char);
        }
        code
    }
}

impl std::fmt::Display for QuadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.level_of_detail, self.tile_x, self.tile_y
        )
    }
}

/// Inclusive interval of levels of detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LodRange {
    pub start: i32,
    pub end: i32,
}

impl LodRange {
    pub fn new(start: i32, end: i32) -> Result<Self> {
        if start > end || start < MIN_LEVEL_OF_DETAIL || end > MAX_LEVEL_OF_DETAIL {
            return Err(Error::InvalidLodRange(start, end).into());
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, level_of_detail: i32) -> bool {
        level_of_detail >= self.start && level_of_detail <= self.end
    }
}
