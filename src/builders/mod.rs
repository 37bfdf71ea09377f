// src/builders/mod.rs
//! The per-tile build pipeline.
//!
//! `QuadKeyBuilder` owns the layer registrations; a `build` call makes a
//! fresh `BuilderContext`, instantiates every registered element builder,
//! streams the geo-store and dispatches each admitted element to each
//! builder in registration order. Builders receive the context per call
//! instead of storing it, which keeps them plain state machines.
//!
//! Callbacks are invoked inline on the building thread. Re-entering the
//! pipeline from a callback is undefined behaviour of the contract (not of
//! the language: the interior `RefCell` will panic).

pub mod barrier;
pub mod buildings;
pub mod terrain;
pub mod tree;

use anyhow::Result;
use std::cell::RefCell;

use crate::core::geo::quad_key_to_bounding_box;
use crate::core::{BoundingBox, QuadKey, StringTable};
use crate::entities::{Area, Element, Node, Relation, Way};
use crate::heightmap::ElevationProvider;
use crate::index::GeoStore;
use crate::mapcss::{Style, StyleProvider};
use crate::meshing::Mesh;

/// Per-tile bundle of collaborators handed to element builders.
///
/// Lives exactly as long as one `build` call.
pub struct BuilderContext<'a> {
    pub quad_key: QuadKey,
    pub bounding_box: BoundingBox,
    pub style_provider: &'a StyleProvider,
    pub ele_provider: &'a dyn ElevationProvider,
    pub string_table: &'a StringTable,
    mesh_callback: RefCell<Box<dyn FnMut(&Mesh) + 'a>>,
    element_callback: RefCell<Box<dyn FnMut(&Element) + 'a>>,
}

impl<'a> BuilderContext<'a> {
    pub fn new(
        quad_key: QuadKey,
        style_provider: &'a StyleProvider,
        ele_provider: &'a dyn ElevationProvider,
        string_table: &'a StringTable,
        mesh_callback: Box<dyn FnMut(&Mesh) + 'a>,
        element_callback: Box<dyn FnMut(&Element) + 'a>,
    ) -> Self {
        Self {
            quad_key,
            bounding_box: quad_key_to_bounding_box(&quad_key),
            style_provider,
            ele_provider,
            string_table,
            mesh_callback: RefCell::new(mesh_callback),
            element_callback: RefCell::new(element_callback),
        }
    }

    /// Forwards `mesh` to the consumer. Empty meshes are filtered here so
    /// no builder has to remember the guard.
    pub fn emit_mesh(&self, mesh: &Mesh) {
        if mesh.vertices.is_empty() {
            return;
        }
        (self.mesh_callback.borrow_mut())(mesh);
    }

    pub fn emit_element(&self, element: &Element) {
        (self.element_callback.borrow_mut())(element);
    }
}

/// Mesh plus resolved style, scoped to one element's processing. The mesh
/// is exclusively owned by the enclosing builder until it is flushed
/// through the context, at which point the consumer takes over.
pub struct MeshContext<'a> {
    pub mesh: &'a mut Mesh,
    pub style: &'a Style,
}

/// One method per element variant plus an end-of-stream hook.
pub trait ElementBuilder {
    fn visit_node(&mut self, _context: &BuilderContext, _node: &Node) -> Result<()> {
        Ok(())
    }

    fn visit_way(&mut self, _context: &BuilderContext, _way: &Way) -> Result<()> {
        Ok(())
    }

    fn visit_area(&mut self, _context: &BuilderContext, _area: &Area) -> Result<()> {
        Ok(())
    }

    fn visit_relation(&mut self, _context: &BuilderContext, _relation: &Relation) -> Result<()> {
        Ok(())
    }

    fn complete(&mut self, _context: &BuilderContext) -> Result<()> {
        Ok(())
    }
}

/// Exhaustive dispatch over the element sum type.
pub fn accept(
    element: &Element,
    context: &BuilderContext,
    builder: &mut dyn ElementBuilder,
) -> Result<()> {
    match element {
        Element::Node(node) => builder.visit_node(context, node),
        Element::Way(way) => builder.visit_way(context, way),
        Element::Area(area) => builder.visit_area(context, area),
        Element::Relation(relation) => builder.visit_relation(context, relation),
    }
}

/// Checks whether a style admits an element into the builder registered
/// under `layer`. The building builder has its own dedicated check.
pub fn style_names_layer(style: &crate::mapcss::Style, layer: &str) -> bool {
    style
        .get_string("builders")
        .map(|names| names.split(',').any(|name| name.trim() == layer))
        .unwrap_or(false)
}

pub type ElementBuilderFactory =
    Box<dyn for<'a> Fn(&BuilderContext<'a>) -> Box<dyn ElementBuilder> + Send + Sync>;

/// The orchestrator: streams one tile's elements through every registered
/// element builder.
pub struct QuadKeyBuilder {
    factories: Vec<(String, ElementBuilderFactory)>,
}

impl QuadKeyBuilder {
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// Registers `factory` under `layer_name`, replacing a previous
    /// registration of the same layer.
    pub fn register_element_builder(&mut self, layer_name: &str, factory: ElementBuilderFactory) {
        if let Some(slot) = self
            .factories
            .iter_mut()
            .find(|(name, _)| name == layer_name)
        {
            slot.1 = factory;
        } else {
            self.factories.push((layer_name.to_string(), factory));
        }
    }

    /// Runs the pipeline for one tile.
    ///
    /// Meshes of a given element arrive in builder-registration order;
    /// within one builder, in element-arrival order. The element callback
    /// fires after the element's builders ran, interleaved with its
    /// meshes.
    pub fn build(
        &self,
        geo_store: &GeoStore,
        quad_key: QuadKey,
        style_provider: &StyleProvider,
        ele_provider: &dyn ElevationProvider,
        string_table: &StringTable,
        mesh_callback: Box<dyn FnMut(&Mesh) + '_>,
        element_callback: Box<dyn FnMut(&Element) + '_>,
    ) -> Result<()> {
        let context = BuilderContext::new(
            quad_key,
            style_provider,
            ele_provider,
            string_table,
            mesh_callback,
            element_callback,
        );

        let mut builders: Vec<Box<dyn ElementBuilder>> = self
            .factories
            .iter()
            .map(|(_, factory)| factory(&context))
            .collect();

        let lod = quad_key.level_of_detail;
        for result in geo_store.search(&quad_key)? {
            let element = result?;
            if !style_provider.has_style(&element, lod) {
                continue;
            }
            for builder in &mut builders {
                accept(&element, &context, builder.as_mut())?;
            }
            context.emit_element(&element);
        }

        // The first failure wins, but every builder still gets its
        // completion so scratch state is flushed or dropped.
        let mut first_error: Option<anyhow::Error> = None;
        for builder in &mut builders {
            if let Err(e) = builder.complete(&context) {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for QuadKeyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
