// src/meshing/mod.rs
//! Mesh and polygon primitives plus color gradients.
//!
//! Meshes carry flat vertex/triangle/color buffers ready to hand to a
//! consumer callback. Polygons keep contours and holes as ranges into one
//! flat point buffer; triangulation routes each outer ring with the holes
//! it contains through ear cutting.

use anyhow::Result;
use glam::DVec2;
use std::ops::Range;

use crate::core::GeoCoordinate;

/// Triangle mesh with per-vertex colors.
///
/// Invariants: `vertices.len() == 3 * colors.len()`, every triangle index
/// addresses a vertex.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub name: String,
    pub vertices: Vec<f64>,
    pub triangles: Vec<i32>,
    pub colors: Vec<u32>,
}

impl Mesh {
    pub fn new(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    /// Appends a vertex and returns its index.
    pub fn add_vertex(&mut self, x: f64, y: f64, z: f64, color: Color) -> i32 {
        let index = self.colors.len() as i32;
        self.vertices.extend_from_slice(&[x, y, z]);
        self.colors.push(color.0);
        index
    }

    pub fn add_triangle(&mut self, a: i32, b: i32, c: i32) {
        self.triangles.extend_from_slice(&[a, b, c]);
    }

    pub fn vertex_count(&self) -> usize {
        self.colors.len()
    }
}

/// Contour set plus hole set over one flat point buffer (x, y pairs with
/// x = longitude, y = latitude).
#[derive(Debug, Clone, Default)]
pub struct Polygon {
    pub points: Vec<f64>,
    outers: Vec<Range<usize>>,
    holes: Vec<Range<usize>>,
}

impl Polygon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_contour(&mut self, coordinates: &[GeoCoordinate]) {
        let range = self.push_points(coordinates);
        self.outers.push(range);
    }

    pub fn add_hole(&mut self, coordinates: &[GeoCoordinate]) {
        let range = self.push_points(coordinates);
        self.holes.push(range);
    }

    fn push_points(&mut self, coordinates: &[GeoCoordinate]) -> Range<usize> {
        let start = self.points.len();
        for coordinate in coordinates {
            self.points.push(coordinate.longitude);
            self.points.push(coordinate.latitude);
        }
        start..self.points.len()
    }

    pub fn outer_ranges(&self) -> &[Range<usize>] {
        &self.outers
    }

    pub fn hole_ranges(&self) -> &[Range<usize>] {
        &self.holes
    }

    pub fn is_empty(&self) -> bool {
        self.outers.is_empty()
    }

    /// Ring slice for a range produced by this polygon.
    pub fn ring(&self, range: &Range<usize>) -> &[f64] {
        &self.points[range.clone()]
    }

    /// Mean of all contour points. Used as the anchor for domes, pyramids
    /// and round facades.
    pub fn centroid(&self) -> DVec2 {
        let mut sum = DVec2::ZERO;
        let mut count = 0usize;
        for range in &self.outers {
            for pair in self.points[range.clone()].chunks_exact(2) {
                sum += DVec2::new(pair[0], pair[1]);
                count += 1;
            }
        }
        if count == 0 {
            DVec2::ZERO
        } else {
            sum / count as f64
        }
    }
}

/// One outer ring flattened together with its holes, plus local triangle
/// indices from ear cutting.
pub struct CapGeometry {
    pub points: Vec<f64>,
    pub triangles: Vec<u32>,
}

/// Triangulates every outer contour of `polygon` against the holes whose
/// first vertex lies inside it.
pub fn triangulate(polygon: &Polygon) -> Result<Vec<CapGeometry>> {
    let mut caps = Vec::with_capacity(polygon.outer_ranges().len());
    for outer_range in polygon.outer_ranges() {
        let outer = polygon.ring(outer_range);
        let mut points: Vec<f64> = outer.to_vec();
        let mut hole_indices: Vec<usize> = Vec::new();

        for hole_range in polygon.hole_ranges() {
            let hole = polygon.ring(hole_range);
            if hole.len() >= 2 && point_in_ring(hole[0], hole[1], outer) {
                hole_indices.push(points.len() / 2);
                points.extend_from_slice(hole);
            }
        }

        let triangles = earcutr::earcut(&points, &hole_indices, 2)
            .map_err(|e| anyhow::anyhow!("triangulation failed: {:?}", e))?
            .into_iter()
            .map(|index| index as u32)
            .collect();
        caps.push(CapGeometry { points, triangles });
    }
    Ok(caps)
}

/// Even-odd point-in-ring test over a flat (x, y) buffer.
pub fn point_in_ring(x: f64, y: f64, ring: &[f64]) -> bool {
    let count = ring.len() / 2;
    if count < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = count - 1;
    for i in 0..count {
        let (xi, yi) = (ring[2 * i], ring[2 * i + 1]);
        let (xj, yj) = (ring[2 * j], ring[2 * j + 1]);
        if (yi > y) != (yj > y) {
            let x_intersection = (xj - xi) * (y - yi) / (yj - yi + 1e-20) + xi;
            if x < x_intersection {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Packed ARGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub u32);

impl Color {
    pub const OPAQUE_GRAY: Color = Color(0xff80_8080);

    pub fn from_argb(a: u8, r: u8, g: u8, b: u8) -> Self {
        Color(((a as u32) << 24) | ((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }

    fn channels(self) -> (u8, u8, u8, u8) {
        (
            (self.0 >> 24) as u8,
            (self.0 >> 16) as u8,
            (self.0 >> 8) as u8,
            self.0 as u8,
        )
    }
}

/// Parses `#rgb` or `#rrggbb` (alpha fixed at opaque).
pub fn parse_color(text: &str) -> Option<Color> {
    let hex = text.trim().strip_prefix('#')?;
    match hex.len() {
        3 => {
            let value = u32::from_str_radix(hex, 16).ok()?;
            let r = ((value >> 8) & 0xf) as u8;
            let g = ((value >> 4) & 0xf) as u8;
            let b = (value & 0xf) as u8;
            Some(Color::from_argb(0xff, r * 17, g * 17, b * 17))
        }
        6 => {
            let value = u32::from_str_radix(hex, 16).ok()?;
            Some(Color(0xff00_0000 | value))
        }
        _ => None,
    }
}

/// Color ramp evaluated on `[0, 1]`.
///
/// Sources are style declarations: either a single color (`#ff0000`) or
/// `gradient(stop, stop, ...)` where each stop is a color with an optional
/// `N%` position; unpositioned stops spread evenly.
#[derive(Debug, Clone)]
pub struct ColorGradient {
    stops: Vec<(f64, Color)>,
}

impl ColorGradient {
    /// Fallback ramp for elements whose style names no color.
    pub fn placeholder() -> Self {
        Self {
            stops: vec![(0.0, Color::OPAQUE_GRAY)],
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(color) = parse_color(text) {
            return Some(Self {
                stops: vec![(0.0, color)],
            });
        }

        let body = text
            .strip_prefix("gradient(")?
            .strip_suffix(')')?
            .trim();
        let raw_stops: Vec<&str> = body.split(',').map(str::trim).collect();
        if raw_stops.is_empty() {
            return None;
        }

        let mut stops = Vec::with_capacity(raw_stops.len());
        for (index, raw) in raw_stops.iter().enumerate() {
            let mut parts = raw.split_whitespace();
            let color = parse_color(parts.next()?)?;
            let time = match parts.next() {
                Some(percent) => percent.strip_suffix('%')?.parse::<f64>().ok()? / 100.0,
                None if raw_stops.len() == 1 => 0.0,
                None => index as f64 / (raw_stops.len() - 1) as f64,
            };
            stops.push((time.clamp(0.0, 1.0), color));
        }
        stops.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        Some(Self { stops })
    }

    /// Parses a style declaration value, falling back to the placeholder.
    pub fn from_style_value(value: Option<&str>) -> Self {
        value
            .and_then(Self::parse)
            .unwrap_or_else(Self::placeholder)
    }

    pub fn evaluate(&self, time: f64) -> Color {
        let time = time.clamp(0.0, 1.0);
        match self
            .stops
            .iter()
            .position(|(stop_time, _)| *stop_time >= time)
        {
            Some(0) | None if self.stops.len() == 1 => self.stops[0].1,
            Some(0) => self.stops[0].1,
            None => self.stops[self.stops.len() - 1].1,
            Some(upper) => {
                let (t0, c0) = self.stops[upper - 1];
                let (t1, c1) = self.stops[upper];
                let fraction = if t1 > t0 { (time - t0) / (t1 - t0) } else { 0.0 };
                lerp_color(c0, c1, fraction)
            }
        }
    }
}

fn lerp_color(from: Color, to: Color, fraction: f64) -> Color {
    let (a0, r0, g0, b0) = from.channels();
    let (a1, r1, g1, b1) = to.channels();
    let mix = |x: u8, y: u8| -> u8 {
        (x as f64 + (y as f64 - x as f64) * fraction).round() as u8
    };
    Color::from_argb(mix(a0, a1), mix(r0, r1), mix(g0, g1), mix(b0, b1))
}

/// Deterministic per-seed noise in `[0, 1)` for vertex coloring.
pub fn color_noise(seed: u64) -> f64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in seed.to_le_bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash >> 11) as f64 / (1u64 << 53) as f64
}
