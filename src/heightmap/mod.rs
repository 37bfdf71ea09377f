// src/heightmap/mod.rs
//! Elevation sources for the tile-build pipeline.
//!
//! Two providers exist: a flat one that answers zero everywhere and an
//! SRTM-backed one reading `.hgt` tiles. Which one a tile build uses is a
//! level-of-detail decision made by the application.
//!
//! `preload` takes `&mut self` on purpose: loading tiles is not safe to
//! run concurrently on one provider instance, and exclusive access encodes
//! that contract in the signature.

pub mod srtm;

pub use srtm::SrtmElevationProvider;

use anyhow::Result;

use crate::core::{BoundingBox, GeoCoordinate};

pub trait ElevationProvider {
    /// Elevation in meters at `coordinate`. Reads only preloaded data.
    fn elevation(&self, coordinate: &GeoCoordinate) -> f64;

    /// Blocking synchronous load of the tiles covering `bbox`.
    fn preload(&mut self, bbox: &BoundingBox) -> Result<()>;
}

/// Sea-level-everywhere provider used for coarse detail levels.
#[derive(Debug, Default)]
pub struct FlatElevationProvider;

impl ElevationProvider for FlatElevationProvider {
    fn elevation(&self, _coordinate: &GeoCoordinate) -> f64 {
        0.0
    }

    fn preload(&mut self, _bbox: &BoundingBox) -> Result<()> {
        Ok(())
    }
}
