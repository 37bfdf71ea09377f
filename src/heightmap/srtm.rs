// src/heightmap/srtm.rs
//! SRTM `.hgt` heightmap reader.
//!
//! Tiles are named by their south-west corner (`N50E011.hgt`) and hold a
//! square grid of big-endian `i16` samples, row order north to south.
//! Both 1-arcsec (3601x3601) and 3-arcsec (1201x1201) tiles are accepted;
//! the resolution is detected from the file size.

use anyhow::{Context, Result};
use byteorder::{BigEndian, ReadBytesExt};
use hashbrown::HashMap;
use log::warn;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::ElevationProvider;
use crate::core::{BoundingBox, GeoCoordinate};

/// Sample value SRTM uses for voids.
const VOID_SAMPLE: i16 = -32768;

struct HgtTile {
    samples: Vec<i16>,
    side: usize,
}

pub struct SrtmElevationProvider {
    data_dir: PathBuf,
    tiles: HashMap<(i32, i32), HgtTile>,
}

impl SrtmElevationProvider {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            tiles: HashMap::new(),
        }
    }

    fn tile_name(lat: i32, lon: i32) -> String {
        format!(
            "{}{:02}{}{:03}.hgt",
            if lat >= 0 { 'N' } else { 'S' },
            lat.abs(),
            if lon >= 0 { 'E' } else { 'W' },
            lon.abs()
        )
    }

    fn load_tile(&mut self, lat: i32, lon: i32) -> Result<()> {
        if self.tiles.contains_key(&(lat, lon)) {
            return Ok(());
        }

        let path = self.data_dir.join(Self::tile_name(lat, lon));
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(_) => {
                // Queries over an unloadable tile fall back to sea level.
                warn!("no heightmap tile at {}", path.display());
                return Ok(());
            }
        };

        let bytes = file.metadata()?.len() as usize;
        let count = bytes / 2;
        let side = (count as f64).sqrt() as usize;
        if side * side != count || side < 2 {
            anyhow::bail!("{} is not a square hgt grid", path.display());
        }

        let mut reader = BufReader::new(file);
        let mut samples = vec![0i16; count];
        reader
            .read_i16_into::<BigEndian>(&mut samples)
            .with_context(|| format!("read {}", path.display()))?;

        self.tiles.insert((lat, lon), HgtTile { samples, side });
        Ok(())
    }

    fn sample(tile: &HgtTile, row: usize, column: usize) -> f64 {
        let value = tile.samples[row * tile.side + column];
        if value == VOID_SAMPLE {
            0.0
        } else {
            value as f64
        }
    }
}

impl ElevationProvider for SrtmElevationProvider {
    fn elevation(&self, coordinate: &GeoCoordinate) -> f64 {
        let lat_floor = coordinate.latitude.floor();
        let lon_floor = coordinate.longitude.floor();
        let Some(tile) = self.tiles.get(&(lat_floor as i32, lon_floor as i32)) else {
            return 0.0;
        };

        let cells = (tile.side - 1) as f64;
        // Row 0 is the northern edge of the tile.
        let x = (coordinate.longitude - lon_floor) * cells;
        let y = (1.0 - (coordinate.latitude - lat_floor)) * cells;

        let column = (x.floor() as usize).min(tile.side - 2);
        let row = (y.floor() as usize).min(tile.side - 2);
        let fx = x - column as f64;
        let fy = y - row as f64;

        let top = Self::sample(tile, row, column) * (1.0 - fx)
            + Self::sample(tile, row, column + 1) * fx;
        let bottom = Self::sample(tile, row + 1, column) * (1.0 - fx)
            + Self::sample(tile, row + 1, column + 1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    fn preload(&mut self, bbox: &BoundingBox) -> Result<()> {
        let lat_start = bbox.min_point.latitude.floor() as i32;
        let lat_end = bbox.max_point.latitude.floor() as i32;
        let lon_start = bbox.min_point.longitude.floor() as i32;
        let lon_end = bbox.max_point.longitude.floor() as i32;

        for lat in lat_start..=lat_end {
            for lon in lon_start..=lon_end {
                self.load_tile(lat, lon)?;
            }
        }
        Ok(())
    }
}
