// src/builders/buildings/roofs.rs
//! Roof strategies and their registry.
//!
//! Every strategy receives the footprint polygon plus height, base height
//! and color parameters, and appends its geometry to the element's mesh.
//! `none` is a valid strategy that emits nothing.

use anyhow::Result;

use super::add_colored_vertex;
use crate::builders::MeshContext;
use crate::core::Error;
use crate::meshing::{ColorGradient, Polygon};

/// Parameters shared by every roof and facade strategy.
#[derive(Debug)]
pub struct StrategyParams {
    pub height: f64,
    pub min_height: f64,
    pub gradient: ColorGradient,
    pub seed: u64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            height: 0.0,
            min_height: 0.0,
            gradient: ColorGradient::placeholder(),
            seed: 0,
        }
    }
}

pub trait RoofBuilder: std::fmt::Debug {
    fn params_mut(&mut self) -> &mut StrategyParams;

    fn build(&mut self, polygon: &Polygon, context: &mut MeshContext) -> Result<()>;

    fn set_height(&mut self, height: f64) {
        self.params_mut().height = height;
    }

    fn set_min_height(&mut self, min_height: f64) {
        self.params_mut().min_height = min_height;
    }

    fn set_gradient(&mut self, gradient: ColorGradient, seed: u64) {
        let params = self.params_mut();
        params.gradient = gradient;
        params.seed = seed;
    }
}

macro_rules! strategy_params {
    () => {
        fn params_mut(&mut self) -> &mut StrategyParams {
            &mut self.params
        }
    };
}
pub(crate) use strategy_params;

type RoofFactory = fn() -> Box<dyn RoofBuilder>;

/// Immutable name -> factory table, assembled once per builder.
pub struct RoofBuilderRegistry {
    entries: Vec<(&'static str, RoofFactory)>,
}

impl RoofBuilderRegistry {
    pub fn with_defaults() -> Self {
        Self {
            entries: vec![
                ("none", || Box::<EmptyRoofBuilder>::default()),
                ("flat", || Box::<FlatRoofBuilder>::default()),
                ("dome", || Box::<DomeRoofBuilder>::default()),
                ("pyramidal", || Box::<PyramidalRoofBuilder>::default()),
                ("mansard", || Box::<MansardRoofBuilder>::default()),
            ],
        }
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn RoofBuilder>> {
        self.entries
            .iter()
            .find(|(entry_name, _)| *entry_name == name)
            .map(|(_, factory)| factory())
            .ok_or_else(|| Error::UnknownRoofType(name.to_string()).into())
    }
}

/// Does nothing, on purpose.
#[derive(Default, Debug)]
struct EmptyRoofBuilder {
    params: StrategyParams,
}

impl RoofBuilder for EmptyRoofBuilder {
    strategy_params!();

    fn build(&mut self, _polygon: &Polygon, _context: &mut MeshContext) -> Result<()> {
        Ok(())
    }
}

/// Triangulated cap over the footprint at the roof base height.
#[derive(Default, Debug)]
struct FlatRoofBuilder {
    params: StrategyParams,
}

impl RoofBuilder for FlatRoofBuilder {
    strategy_params!();

    fn build(&mut self, polygon: &Polygon, context: &mut MeshContext) -> Result<()> {
        let params = &self.params;
        for cap in crate::meshing::triangulate(polygon)? {
            let base = context.mesh.vertex_count() as i32;
            for pair in cap.points.chunks_exact(2) {
                add_colored_vertex(
                    context.mesh,
                    pair[0],
                    pair[1],
                    params.min_height,
                    &params.gradient,
                    params.seed,
                );
            }
            for triangle in cap.triangles.chunks_exact(3) {
                context.mesh.add_triangle(
                    base + triangle[0] as i32,
                    base + triangle[1] as i32,
                    base + triangle[2] as i32,
                );
            }
        }
        Ok(())
    }
}

/// Hemisphere over the footprint centroid.
#[derive(Default, Debug)]
struct DomeRoofBuilder {
    params: StrategyParams,
}

impl RoofBuilder for DomeRoofBuilder {
    strategy_params!();

    fn build(&mut self, polygon: &Polygon, context: &mut MeshContext) -> Result<()> {
        let params = &self.params;
        let (center, radius) = footprint_circle(polygon);
        // A dome without an explicit roof height rises by its radius' own
        // vertical allowance.
        let rise = if params.height > 0.0 { params.height } else { 2.0 };
        super::add_dome(
            context.mesh,
            center,
            radius,
            params.min_height,
            rise,
            &params.gradient,
            params.seed,
        );
        Ok(())
    }
}

/// Fan from the contour up to an apex over the centroid.
#[derive(Default, Debug)]
struct PyramidalRoofBuilder {
    params: StrategyParams,
}

impl RoofBuilder for PyramidalRoofBuilder {
    strategy_params!();

    fn build(&mut self, polygon: &Polygon, context: &mut MeshContext) -> Result<()> {
        let params = &self.params;
        let rise = if params.height > 0.0 { params.height } else { 2.0 };
        let center = polygon.centroid();
        let apex_z = params.min_height + rise;

        for range in polygon.outer_ranges() {
            let ring = polygon.ring(range);
            let count = ring.len() / 2;
            if count < 3 {
                continue;
            }
            let apex = add_colored_vertex(
                context.mesh,
                center.x,
                center.y,
                apex_z,
                &params.gradient,
                params.seed,
            );
            for i in 0..count {
                let j = (i + 1) % count;
                let a = add_colored_vertex(
                    context.mesh,
                    ring[2 * i],
                    ring[2 * i + 1],
                    params.min_height,
                    &params.gradient,
                    params.seed,
                );
                let b = add_colored_vertex(
                    context.mesh,
                    ring[2 * j],
                    ring[2 * j + 1],
                    params.min_height,
                    &params.gradient,
                    params.seed,
                );
                context.mesh.add_triangle(a, b, apex);
            }
        }
        Ok(())
    }
}

/// Sloped rim toward an inset ring, capped flat.
#[derive(Default, Debug)]
struct MansardRoofBuilder {
    params: StrategyParams,
}

/// Fraction each contour vertex moves toward the ring centroid.
const MANSARD_INSET: f64 = 0.3;

impl RoofBuilder for MansardRoofBuilder {
    strategy_params!();

    fn build(&mut self, polygon: &Polygon, context: &mut MeshContext) -> Result<()> {
        let params = &self.params;
        let rise = if params.height > 0.0 { params.height } else { 2.0 };
        let top = params.min_height + rise;

        for range in polygon.outer_ranges() {
            let ring = polygon.ring(range);
            let count = ring.len() / 2;
            if count < 3 {
                continue;
            }

            let mut cx = 0.0;
            let mut cy = 0.0;
            for pair in ring.chunks_exact(2) {
                cx += pair[0] / count as f64;
                cy += pair[1] / count as f64;
            }

            let mut inset = Vec::with_capacity(ring.len());
            for pair in ring.chunks_exact(2) {
                inset.push(pair[0] + (cx - pair[0]) * MANSARD_INSET);
                inset.push(pair[1] + (cy - pair[1]) * MANSARD_INSET);
            }

            // Sloped rim between the outer ring and the lifted inset ring.
            for i in 0..count {
                let j = (i + 1) % count;
                let a0 = add_colored_vertex(
                    context.mesh,
                    ring[2 * i],
                    ring[2 * i + 1],
                    params.min_height,
                    &params.gradient,
                    params.seed,
                );
                let b0 = add_colored_vertex(
                    context.mesh,
                    ring[2 * j],
                    ring[2 * j + 1],
                    params.min_height,
                    &params.gradient,
                    params.seed,
                );
                let a1 = add_colored_vertex(
                    context.mesh,
                    inset[2 * i],
                    inset[2 * i + 1],
                    top,
                    &params.gradient,
                    params.seed,
                );
                let b1 = add_colored_vertex(
                    context.mesh,
                    inset[2 * j],
                    inset[2 * j + 1],
                    top,
                    &params.gradient,
                    params.seed,
                );
                context.mesh.add_triangle(a0, b0, a1);
                context.mesh.add_triangle(b0, b1, a1);
            }

            // Flat cap over the inset ring.
            let triangles = earcutr::earcut(&inset, &[], 2)
                .map_err(|e| anyhow::anyhow!("mansard cap triangulation failed: {:?}", e))?;
            let base = context.mesh.vertex_count() as i32;
            for pair in inset.chunks_exact(2) {
                add_colored_vertex(
                    context.mesh,
                    pair[0],
                    pair[1],
                    top,
                    &params.gradient,
                    params.seed,
                );
            }
            for triangle in triangles.chunks_exact(3) {
                context.mesh.add_triangle(
                    base + triangle[0] as i32,
                    base + triangle[1] as i32,
                    base + triangle[2] as i32,
                );
            }
        }
        Ok(())
    }
}

/// Centroid and half of the smaller footprint extent.
pub(crate) fn footprint_circle(polygon: &Polygon) -> (glam::DVec2, f64) {
    let center = polygon.centroid();
    let mut min = glam::DVec2::splat(f64::INFINITY);
    let mut max = glam::DVec2::splat(f64::NEG_INFINITY);
    for range in polygon.outer_ranges() {
        for pair in polygon.ring(range).chunks_exact(2) {
            min = min.min(glam::DVec2::new(pair[0], pair[1]));
            max = max.max(glam::DVec2::new(pair[0], pair[1]));
        }
    }
    let extent = max - min;
    let radius = 0.5 * extent.x.min(extent.y).max(0.0);
    (center, radius)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapcss::Style;
    use crate::meshing::Mesh;

    fn square_polygon() -> Polygon {
        let mut polygon = Polygon::new();
        polygon.add_contour(&[
            crate::core::GeoCoordinate::new(0.0, 0.0),
            crate::core::GeoCoordinate::new(1.0, 0.0),
            crate::core::GeoCoordinate::new(1.0, 1.0),
            crate::core::GeoCoordinate::new(0.0, 1.0),
        ]);
        polygon
    }

    #[test]
    fn test_registry_rejects_unknown() {
        let registry = RoofBuilderRegistry::with_defaults();
        assert!(registry.create("flat").is_ok());
        let err = registry.create("gabled").unwrap_err().to_string();
        assert!(err.contains("UnknownRoofType"), "{}", err);
    }

    #[test]
    fn test_none_roof_emits_nothing() {
        let registry = RoofBuilderRegistry::with_defaults();
        let mut roof = registry.create("none").unwrap();
        let mut mesh = Mesh::new("m".into());
        let style = Style::default();
        roof.set_height(3.0);
        roof.build(
            &square_polygon(),
            &mut MeshContext {
                mesh: &mut mesh,
                style: &style,
            },
        )
        .unwrap();
        assert!(mesh.vertices.is_empty());
    }

    #[test]
    fn test_flat_roof_sits_at_min_height() {
        let registry = RoofBuilderRegistry::with_defaults();
        let mut roof = registry.create("flat").unwrap();
        roof.set_min_height(12.0);
        let mut mesh = Mesh::new("m".into());
        let style = Style::default();
        roof.build(
            &square_polygon(),
            &mut MeshContext {
                mesh: &mut mesh,
                style: &style,
            },
        )
        .unwrap();
        assert!(mesh.vertex_count() >= 4);
        assert!(mesh
            .vertices
            .chunks_exact(3)
            .all(|vertex| (vertex[2] - 12.0).abs() < 1e-12));
    }

    #[test]
    fn test_pyramidal_roof_has_apex() {
        let registry = RoofBuilderRegistry::with_defaults();
        let mut roof = registry.create("pyramidal").unwrap();
        roof.set_min_height(6.0);
        roof.set_height(4.0);
        let mut mesh = Mesh::new("m".into());
        let style = Style::default();
        roof.build(
            &square_polygon(),
            &mut MeshContext {
                mesh: &mut mesh,
                style: &style,
            },
        )
        .unwrap();
        let z_max = mesh
            .vertices
            .chunks_exact(3)
            .map(|vertex| vertex[2])
            .fold(f64::NEG_INFINITY, f64::max);
        assert!((z_max - 10.0).abs() < 1e-12);
    }
}
