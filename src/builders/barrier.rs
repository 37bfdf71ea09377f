// src/builders/barrier.rs
//! Barrier element builder: fences and walls extruded along admitted ways,
//! one `barrier:<id>` mesh per way.

use anyhow::Result;

use super::{style_names_layer, BuilderContext, ElementBuilder};
use crate::builders::buildings::add_wall_quad;
use crate::entities::{Element, Way};
use crate::meshing::{ColorGradient, Mesh};

const LAYER: &str = "barrier";
const DEFAULT_HEIGHT: f64 = 1.0;

#[derive(Default)]
pub struct BarrierBuilder;

impl BarrierBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl ElementBuilder for BarrierBuilder {
    fn visit_way(&mut self, context: &BuilderContext, way: &Way) -> Result<()> {
        let style = context
            .style_provider
            .for_element(&Element::Way(way.clone()), context.quad_key.level_of_detail);
        if !style_names_layer(&style, LAYER) {
            return Ok(());
        }
        if way.coordinates.len() < 2 {
            return Ok(());
        }

        let mut height = style.get_value("height");
        if height <= 0.0 {
            height = DEFAULT_HEIGHT;
        }
        let gradient = ColorGradient::from_style_value(style.get_string("color"));

        let mut mesh = Mesh::new(format!("{}:{}", LAYER, way.id));
        for segment in way.coordinates.windows(2) {
            let elevation = context.ele_provider.elevation(&segment[0]);
            add_wall_quad(
                &mut mesh,
                segment[0].longitude,
                segment[0].latitude,
                segment[1].longitude,
                segment[1].latitude,
                elevation,
                elevation + height,
                &gradient,
                way.id,
            );
        }
        context.emit_mesh(&mesh);
        Ok(())
    }
}
