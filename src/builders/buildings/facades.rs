// src/builders/buildings/facades.rs
//! Facade strategies and their registry.
//!
//! Facades produce the wall geometry between a building's base elevation
//! and its top. The flat facade follows the footprint (holes included, so
//! courtyards get inner walls); the round variants replace the footprint
//! with a circle fitted to it.

use anyhow::Result;

use super::roofs::{strategy_params, StrategyParams};
use super::{add_dome, add_wall_quad};
use crate::builders::MeshContext;
use crate::core::Error;
use crate::meshing::Polygon;

pub trait FacadeBuilder: std::fmt::Debug {
    fn params_mut(&mut self) -> &mut StrategyParams;

    fn build(&mut self, polygon: &Polygon, context: &mut MeshContext) -> Result<()>;

    fn set_height(&mut self, height: f64) {
        self.params_mut().height = height;
    }

    fn set_min_height(&mut self, min_height: f64) {
        self.params_mut().min_height = min_height;
    }

    fn set_gradient(&mut self, gradient: crate::meshing::ColorGradient, seed: u64) {
        let params = self.params_mut();
        params.gradient = gradient;
        params.seed = seed;
    }
}

type FacadeFactory = fn() -> Box<dyn FacadeBuilder>;

pub struct FacadeBuilderRegistry {
    entries: Vec<(&'static str, FacadeFactory)>,
}

impl FacadeBuilderRegistry {
    pub fn with_defaults() -> Self {
        Self {
            entries: vec![
                ("flat", || Box::<FlatFacadeBuilder>::default()),
                ("cylinder", || Box::<CylinderFacadeBuilder>::default()),
                ("sphere", || Box::<SphereFacadeBuilder>::default()),
            ],
        }
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn FacadeBuilder>> {
        self.entries
            .iter()
            .find(|(entry_name, _)| *entry_name == name)
            .map(|(_, factory)| factory())
            .ok_or_else(|| Error::UnknownFacadeType(name.to_string()).into())
    }
}

/// Straight walls along every footprint edge, outer rings and holes alike.
#[derive(Default, Debug)]
struct FlatFacadeBuilder {
    params: StrategyParams,
}

impl FacadeBuilder for FlatFacadeBuilder {
    strategy_params!();

    fn build(&mut self, polygon: &Polygon, context: &mut MeshContext) -> Result<()> {
        let params = &self.params;
        let bottom = params.min_height;
        let top = params.min_height + params.height;

        let rings = polygon
            .outer_ranges()
            .iter()
            .chain(polygon.hole_ranges().iter());
        for range in rings {
            let ring = polygon.ring(range);
            let count = ring.len() / 2;
            if count < 2 {
                continue;
            }
            for i in 0..count {
                let j = (i + 1) % count;
                add_wall_quad(
                    context.mesh,
                    ring[2 * i],
                    ring[2 * i + 1],
                    ring[2 * j],
                    ring[2 * j + 1],
                    bottom,
                    top,
                    &params.gradient,
                    params.seed,
                );
            }
        }
        Ok(())
    }
}

/// Circular wall fitted to the footprint.
#[derive(Default, Debug)]
struct CylinderFacadeBuilder {
    params: StrategyParams,
}

const CYLINDER_SECTORS: usize = 16;

impl FacadeBuilder for CylinderFacadeBuilder {
    strategy_params!();

    fn build(&mut self, polygon: &Polygon, context: &mut MeshContext) -> Result<()> {
        let params = &self.params;
        let center = polygon.centroid();
        let radius = mean_radius(polygon);
        if radius <= 0.0 {
            return Ok(());
        }

        let bottom = params.min_height;
        let top = params.min_height + params.height;
        for sector in 0..CYLINDER_SECTORS {
            let theta = sector as f64 / CYLINDER_SECTORS as f64 * std::f64::consts::TAU;
            let next = (sector + 1) as f64 / CYLINDER_SECTORS as f64 * std::f64::consts::TAU;
            add_wall_quad(
                context.mesh,
                center.x + radius * theta.cos(),
                center.y + radius * theta.sin(),
                center.x + radius * next.cos(),
                center.y + radius * next.sin(),
                bottom,
                top,
                &params.gradient,
                params.seed,
            );
        }
        Ok(())
    }
}

/// Hemispherical shell rising over the full facade height.
#[derive(Default, Debug)]
struct SphereFacadeBuilder {
    params: StrategyParams,
}

impl FacadeBuilder for SphereFacadeBuilder {
    strategy_params!();

    fn build(&mut self, polygon: &Polygon, context: &mut MeshContext) -> Result<()> {
        let params = &self.params;
        let center = polygon.centroid();
        let radius = mean_radius(polygon);
        if radius <= 0.0 {
            return Ok(());
        }
        add_dome(
            context.mesh,
            center,
            radius,
            params.min_height,
            params.height.max(1.0),
            &params.gradient,
            params.seed,
        );
        Ok(())
    }
}

/// Mean distance of the outer contour points from the centroid.
fn mean_radius(polygon: &Polygon) -> f64 {
    let center = polygon.centroid();
    let mut sum = 0.0;
    let mut count = 0usize;
    for range in polygon.outer_ranges() {
        for pair in polygon.ring(range).chunks_exact(2) {
            sum += (glam::DVec2::new(pair[0], pair[1]) - center).length();
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GeoCoordinate;
    use crate::mapcss::Style;
    use crate::meshing::Mesh;

    fn square_polygon() -> Polygon {
        let mut polygon = Polygon::new();
        polygon.add_contour(&[
            GeoCoordinate::new(0.0, 0.0),
            GeoCoordinate::new(1.0, 0.0),
            GeoCoordinate::new(1.0, 1.0),
            GeoCoordinate::new(0.0, 1.0),
        ]);
        polygon
    }

    #[test]
    fn test_registry_rejects_unknown() {
        let registry = FacadeBuilderRegistry::with_defaults();
        assert!(registry.create("cylinder").is_ok());
        let err = registry.create("zigzag").unwrap_err().to_string();
        assert!(err.contains("UnknownFacadeType"), "{}", err);
    }

    #[test]
    fn test_flat_facade_spans_height() {
        let registry = FacadeBuilderRegistry::with_defaults();
        let mut facade = registry.create("flat").unwrap();
        facade.set_min_height(3.0);
        facade.set_height(7.0);

        let mut mesh = Mesh::new("m".into());
        let style = Style::default();
        facade
            .build(
                &square_polygon(),
                &mut MeshContext {
                    mesh: &mut mesh,
                    style: &style,
                },
            )
            .unwrap();

        // Four edges, one quad each.
        assert_eq!(mesh.vertex_count(), 16);
        assert_eq!(mesh.triangles.len(), 4 * 2 * 3);
        let (mut z_min, mut z_max) = (f64::INFINITY, f64::NEG_INFINITY);
        for vertex in mesh.vertices.chunks_exact(3) {
            z_min = z_min.min(vertex[2]);
            z_max = z_max.max(vertex[2]);
        }
        assert_eq!(z_min, 3.0);
        assert_eq!(z_max, 10.0);
    }

    #[test]
    fn test_flat_facade_walls_holes_too() {
        let registry = FacadeBuilderRegistry::with_defaults();
        let mut facade = registry.create("flat").unwrap();
        facade.set_height(5.0);

        let mut polygon = square_polygon();
        polygon.add_hole(&[
            GeoCoordinate::new(0.4, 0.4),
            GeoCoordinate::new(0.4, 0.6),
            GeoCoordinate::new(0.6, 0.6),
            GeoCoordinate::new(0.6, 0.4),
        ]);

        let mut mesh = Mesh::new("m".into());
        let style = Style::default();
        facade
            .build(
                &polygon,
                &mut MeshContext {
                    mesh: &mut mesh,
                    style: &style,
                },
            )
            .unwrap();
        // Eight edges in total once the courtyard is walled.
        assert_eq!(mesh.vertex_count(), 32);
    }
}
