// src/builders/terrain.rs
//! Terrain element builder.
//!
//! Admitted areas become elevation-sampled, colored ground patches that
//! accumulate into a single `terrain` mesh flushed when the tile stream
//! ends.

use anyhow::Result;

use super::{style_names_layer, BuilderContext, ElementBuilder};
use crate::core::GeoCoordinate;
use crate::entities::{Area, Element};
use crate::meshing::{color_noise, ColorGradient, Mesh, Polygon};

const LAYER: &str = "terrain";

pub struct TerraBuilder {
    mesh: Mesh,
}

impl TerraBuilder {
    pub fn new() -> Self {
        Self {
            mesh: Mesh::new(LAYER.to_string()),
        }
    }
}

impl Default for TerraBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementBuilder for TerraBuilder {
    fn visit_area(&mut self, context: &BuilderContext, area: &Area) -> Result<()> {
        let style = context
            .style_provider
            .for_element(&Element::Area(area.clone()), context.quad_key.level_of_detail);
        if !style_names_layer(&style, LAYER) {
            return Ok(());
        }

        let mut polygon = Polygon::new();
        polygon.add_contour(&area.coordinates);
        let gradient = ColorGradient::from_style_value(style.get_string("color"));

        for cap in crate::meshing::triangulate(&polygon)? {
            let base = self.mesh.vertex_count() as i32;
            for pair in cap.points.chunks_exact(2) {
                let elevation = context
                    .ele_provider
                    .elevation(&GeoCoordinate::new(pair[1], pair[0]));
                let color = gradient.evaluate(color_noise(
                    area.id.wrapping_add(self.mesh.vertex_count() as u64),
                ));
                self.mesh.add_vertex(pair[0], pair[1], elevation, color);
            }
            for triangle in cap.triangles.chunks_exact(3) {
                self.mesh.add_triangle(
                    base + triangle[0] as i32,
                    base + triangle[1] as i32,
                    base + triangle[2] as i32,
                );
            }
        }
        Ok(())
    }

    fn complete(&mut self, context: &BuilderContext) -> Result<()> {
        let mesh = std::mem::replace(&mut self.mesh, Mesh::new(LAYER.to_string()));
        context.emit_mesh(&mesh);
        Ok(())
    }
}
