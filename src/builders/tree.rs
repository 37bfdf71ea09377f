// src/builders/tree.rs
//! Tree element builder: a quad-sided trunk plus a dome crown per admitted
//! node, all merged into one `tree` mesh per tile.

use anyhow::Result;

use super::{style_names_layer, BuilderContext, ElementBuilder};
use crate::builders::buildings::{add_dome, add_wall_quad};
use crate::entities::{Element, Node};
use crate::meshing::{ColorGradient, Mesh};

const LAYER: &str = "tree";

// Footprint radii are in the tile's coordinate units; heights in meters.
const DEFAULT_TRUNK_RADIUS: f64 = 0.00001;
const DEFAULT_TRUNK_HEIGHT: f64 = 2.0;
const DEFAULT_CROWN_RADIUS: f64 = 0.00003;
const DEFAULT_CROWN_HEIGHT: f64 = 2.5;

pub struct TreeBuilder {
    mesh: Mesh,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self {
            mesh: Mesh::new(LAYER.to_string()),
        }
    }
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn value_or(style_value: f64, fallback: f64) -> f64 {
    if style_value > 0.0 {
        style_value
    } else {
        fallback
    }
}

impl ElementBuilder for TreeBuilder {
    fn visit_node(&mut self, context: &BuilderContext, node: &Node) -> Result<()> {
        let style = context
            .style_provider
            .for_element(&Element::Node(node.clone()), context.quad_key.level_of_detail);
        if !style_names_layer(&style, LAYER) {
            return Ok(());
        }

        let trunk_radius = value_or(style.get_value("trunk-radius"), DEFAULT_TRUNK_RADIUS);
        let trunk_height = value_or(style.get_value("trunk-height"), DEFAULT_TRUNK_HEIGHT);
        let crown_radius = value_or(style.get_value("crown-radius"), DEFAULT_CROWN_RADIUS);
        let crown_height = value_or(style.get_value("crown-height"), DEFAULT_CROWN_HEIGHT);
        let trunk_gradient = ColorGradient::from_style_value(style.get_string("trunk-color"));
        let crown_gradient = ColorGradient::from_style_value(style.get_string("crown-color"));

        let elevation = context.ele_provider.elevation(&node.coordinate);
        let center = glam::DVec2::new(node.coordinate.longitude, node.coordinate.latitude);

        // Trunk: four wall quads around the node.
        let corners = [
            (center.x - trunk_radius, center.y - trunk_radius),
            (center.x + trunk_radius, center.y - trunk_radius),
            (center.x + trunk_radius, center.y + trunk_radius),
            (center.x - trunk_radius, center.y + trunk_radius),
        ];
        for i in 0..corners.len() {
            let j = (i + 1) % corners.len();
            add_wall_quad(
                &mut self.mesh,
                corners[i].0,
                corners[i].1,
                corners[j].0,
                corners[j].1,
                elevation,
                elevation + trunk_height,
                &trunk_gradient,
                node.id,
            );
        }

        add_dome(
            &mut self.mesh,
            center,
            crown_radius,
            elevation + trunk_height,
            crown_height,
            &crown_gradient,
            node.id,
        );
        Ok(())
    }

    fn complete(&mut self, context: &BuilderContext) -> Result<()> {
        let mesh = std::mem::replace(&mut self.mesh, Mesh::new(LAYER.to_string()));
        context.emit_mesh(&mesh);
        Ok(())
    }
}
