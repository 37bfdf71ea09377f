// src/builders/buildings/mod.rs
//! The building element builder.
//!
//! A building is accumulated as a polygon (contours plus holes) and a mesh
//! named `building:<id>`, both created lazily on the first contributing
//! element and flushed together. Relations either run the multipolygon
//! path (clockwise member areas become contours, counter-clockwise ones
//! holes) or recurse their members through the builder.
//!
//! Roof and facade strategies are looked up in immutable registries owned
//! by the builder; an unknown name fails the element.

pub mod facades;
pub mod roofs;

use anyhow::Result;
use log::debug;

use super::{BuilderContext, ElementBuilder, MeshContext};
use crate::core::geo::is_clockwise;
use crate::core::{Error, GeoCoordinate};
use crate::entities::{Area, Element, Relation};
use crate::mapcss::Style;
use crate::meshing::{ColorGradient, Mesh, Polygon};

use facades::FacadeBuilderRegistry;
use roofs::RoofBuilderRegistry;

const ROOF_TYPE_KEY: &str = "roof-type";
const ROOF_HEIGHT_KEY: &str = "roof-height";
const ROOF_COLOR_KEY: &str = "roof-color";

const FACADE_TYPE_KEY: &str = "facade-type";
const FACADE_COLOR_KEY: &str = "facade-color";

const HEIGHT_KEY: &str = "height";
const MIN_HEIGHT_KEY: &str = "min-height";

const MESH_NAME_PREFIX: &str = "building:";

/// Height used when the input data resolves to a zero height. Broken
/// height tags are common enough that a zero-height building is treated
/// as missing data rather than intent.
const DEFAULT_HEIGHT: f64 = 10.0;

pub struct BuildingBuilder {
    polygon: Option<Polygon>,
    mesh: Option<Mesh>,
    roofs: RoofBuilderRegistry,
    facades: FacadeBuilderRegistry,
}

impl BuildingBuilder {
    pub fn new() -> Self {
        Self {
            polygon: None,
            mesh: None,
            roofs: RoofBuilderRegistry::with_defaults(),
            facades: FacadeBuilderRegistry::with_defaults(),
        }
    }

    /// Creates the polygon/mesh pair if absent. Returns whether this
    /// element is the one that created the mesh and therefore flushes it.
    fn ensure_context(&mut self, element_id: u64) -> bool {
        if self.polygon.is_none() {
            self.polygon = Some(Polygon::new());
        }
        if self.mesh.is_none() {
            self.mesh = Some(Mesh::new(format!("{}{}", MESH_NAME_PREFIX, element_id)));
            return true;
        }
        false
    }

    fn complete_if_necessary(&mut self, context: &BuilderContext, just_created: bool) {
        if just_created {
            if let Some(mesh) = self.mesh.take() {
                context.emit_mesh(&mesh);
            }
        }
    }

    /// A missing `building` declaration classifies the element as not a
    /// building; only the literal `true` participates.
    fn is_building(style: &Style) -> bool {
        style.get_string("building") == Some("true")
    }

    fn is_multipolygon(style: &Style) -> bool {
        style.get_string("multipolygon") == Some("true")
    }

    fn build(&mut self, context: &BuilderContext, element: &Element, style: &Style) -> Result<()> {
        let Some(polygon) = self.polygon.take() else {
            return Ok(());
        };
        if polygon.points.len() < 2 {
            debug!("building {} has no usable footprint", element.id());
            return Ok(());
        }
        let mesh = self
            .mesh
            .as_mut()
            .expect("mesh exists whenever a polygon does");

        // A representative point on the contour: the first two raw doubles
        // of the point buffer.
        let anchor = GeoCoordinate::new(polygon.points[1], polygon.points[0]);

        let mut height = style.get_value(HEIGHT_KEY);
        if height == 0.0 {
            height = DEFAULT_HEIGHT;
        }
        let min_height = style.get_value(MIN_HEIGHT_KEY);
        let elevation = context.ele_provider.elevation(&anchor) + min_height;
        height -= min_height;

        let seed = element.id();

        // Roof first, then facade, so vertex order is reproducible.
        let roof_type = style.get_string(ROOF_TYPE_KEY).unwrap_or("");
        let mut roof = self.roofs.create(roof_type)?;
        roof.set_height(style.get_value(ROOF_HEIGHT_KEY));
        roof.set_min_height(elevation + height);
        roof.set_gradient(gradient_for(style, ROOF_COLOR_KEY), seed);
        roof.build(
            &polygon,
            &mut MeshContext {
                mesh: &mut *mesh,
                style,
            },
        )?;

        let facade_type = style.get_string(FACADE_TYPE_KEY).unwrap_or("");
        let mut facade = self.facades.create(facade_type)?;
        facade.set_height(height);
        facade.set_min_height(elevation);
        facade.set_gradient(gradient_for(style, FACADE_COLOR_KEY), seed);
        facade.build(
            &polygon,
            &mut MeshContext {
                mesh: &mut *mesh,
                style,
            },
        )?;

        // The polygon was moved out above and dies here; the mesh lives on
        // until the creating element flushes it.
        Ok(())
    }
}

impl Default for BuildingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn gradient_for(style: &Style, key: &str) -> ColorGradient {
    ColorGradient::from_style_value(style.get_string(key))
}

impl ElementBuilder for BuildingBuilder {
    fn visit_area(&mut self, context: &BuilderContext, area: &Area) -> Result<()> {
        let style = context
            .style_provider
            .for_element(&Element::Area(area.clone()), context.quad_key.level_of_detail);

        // Relations may forward members that are not buildings themselves.
        if !Self::is_building(&style) {
            return Ok(());
        }

        let just_created = self.ensure_context(area.id);
        self.polygon
            .as_mut()
            .expect("ensure_context populated the polygon")
            .add_contour(&area.coordinates);
        self.build(context, &Element::Area(area.clone()), &style)?;

        self.complete_if_necessary(context, just_created);
        Ok(())
    }

    fn visit_relation(&mut self, context: &BuilderContext, relation: &Relation) -> Result<()> {
        if relation.elements.is_empty() {
            return Ok(());
        }

        let just_created = self.ensure_context(relation.id);

        let element = Element::Relation(relation.clone());
        let style = context
            .style_provider
            .for_element(&element, context.quad_key.level_of_detail);

        if Self::is_multipolygon(&style) && Self::is_building(&style) {
            let polygon = self
                .polygon
                .as_mut()
                .expect("ensure_context populated the polygon");
            collect_multipolygon(polygon, relation)?;
            self.build(context, &element, &style)?;
        } else {
            for member in &relation.elements {
                super::accept(member, context, self)?;
            }
        }

        self.complete_if_necessary(context, just_created);
        Ok(())
    }

    // Nodes and ways never contribute to buildings.
}

/// Adds each member ring of a multipolygon to `polygon`: clockwise areas
/// as contours, counter-clockwise ones as holes. Anything that is not an
/// area has no place inside a multipolygon building.
fn collect_multipolygon(polygon: &mut Polygon, relation: &Relation) -> Result<()> {
    for member in &relation.elements {
        match member {
            Element::Area(area) => {
                if is_clockwise(&area.coordinates) {
                    polygon.add_contour(&area.coordinates);
                } else {
                    polygon.add_hole(&area.coordinates);
                }
            }
            other => return Err(Error::MalformedRelation(other.id()).into()),
        }
    }
    Ok(())
}

/// Shared vertex helper for roof and facade strategies: color is sampled
/// from the gradient with deterministic per-vertex noise.
pub(crate) fn add_colored_vertex(
    mesh: &mut Mesh,
    x: f64,
    y: f64,
    z: f64,
    gradient: &ColorGradient,
    seed: u64,
) -> i32 {
    let color = gradient.evaluate(crate::meshing::color_noise(
        seed.wrapping_add(mesh.vertex_count() as u64),
    ));
    mesh.add_vertex(x, y, z, color)
}

/// Coarse hemisphere over `center`, shared by the dome roof and the
/// sphere facade. `radius` is in footprint units, `rise` in meters.
pub(crate) fn add_dome(
    mesh: &mut Mesh,
    center: glam::DVec2,
    radius: f64,
    base_z: f64,
    rise: f64,
    gradient: &ColorGradient,
    seed: u64,
) {
    const RINGS: usize = 4;
    const SECTORS: usize = 12;

    let mut ring_starts = Vec::with_capacity(RINGS);
    for ring in 0..RINGS {
        let phi = ring as f64 / RINGS as f64 * std::f64::consts::FRAC_PI_2;
        let ring_radius = radius * phi.cos();
        let z = base_z + rise * phi.sin();
        ring_starts.push(mesh.vertex_count() as i32);
        for sector in 0..SECTORS {
            let theta = sector as f64 / SECTORS as f64 * std::f64::consts::TAU;
            add_colored_vertex(
                mesh,
                center.x + ring_radius * theta.cos(),
                center.y + ring_radius * theta.sin(),
                z,
                gradient,
                seed,
            );
        }
    }
    let apex = add_colored_vertex(mesh, center.x, center.y, base_z + rise, gradient, seed);

    for ring in 0..RINGS - 1 {
        let below = ring_starts[ring];
        let above = ring_starts[ring + 1];
        for sector in 0..SECTORS as i32 {
            let next = (sector + 1) % SECTORS as i32;
            mesh.add_triangle(below + sector, below + next, above + sector);
            mesh.add_triangle(below + next, above + next, above + sector);
        }
    }
    let last = ring_starts[RINGS - 1];
    for sector in 0..SECTORS as i32 {
        let next = (sector + 1) % SECTORS as i32;
        mesh.add_triangle(last + sector, last + next, apex);
    }
}

/// Two triangles forming the wall between one footprint edge and its
/// extruded top edge.
pub(crate) fn add_wall_quad(
    mesh: &mut Mesh,
    ax: f64,
    ay: f64,
    bx: f64,
    by: f64,
    bottom: f64,
    top: f64,
    gradient: &ColorGradient,
    seed: u64,
) {
    let a0 = add_colored_vertex(mesh, ax, ay, bottom, gradient, seed);
    let b0 = add_colored_vertex(mesh, bx, by, bottom, gradient, seed);
    let a1 = add_colored_vertex(mesh, ax, ay, top, gradient, seed);
    let b1 = add_colored_vertex(mesh, bx, by, top, gradient, seed);
    mesh.add_triangle(a0, b0, a1);
    mesh.add_triangle(b0, b1, a1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::QuadKeyBuilder;
    use crate::core::geo::quad_key_to_bounding_box;
    use crate::core::{LodRange, QuadKey, StringTable};
    use crate::entities::{normalize_tags, Tag, Tags};
    use crate::heightmap::FlatElevationProvider;
    use crate::index::{GeoStore, InMemoryElementStore};
    use crate::mapcss::StyleProvider;

    fn temp_table(name: &str) -> StringTable {
        let path = std::env::temp_dir().join(format!(
            "mapforge-buildings-{}-{}.bin",
            std::process::id(),
            name
        ));
        let _ = std::fs::remove_file(&path);
        StringTable::new(&path).unwrap()
    }

    fn style_provider(source: &str, table: &StringTable) -> StyleProvider {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let path = std::env::temp_dir().join(format!(
            "mapforge-buildings-style-{}-{}.mapcss",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&path, source).unwrap();
        StyleProvider::parse_file(&path, table).unwrap()
    }

    fn building_tags(table: &StringTable) -> Tags {
        let mut tags = vec![Tag {
            key: table.get_id("building").unwrap(),
            value: table.get_id("yes").unwrap(),
        }];
        normalize_tags(&mut tags);
        tags
    }

    /// Square footprint around the center of the given tile, clockwise.
    fn footprint(quad_key: &QuadKey) -> Vec<GeoCoordinate> {
        let bbox = quad_key_to_bounding_box(quad_key);
        let center = bbox.center();
        let d = 0.0001;
        vec![
            GeoCoordinate::new(center.latitude - d, center.longitude - d),
            GeoCoordinate::new(center.latitude + d, center.longitude - d),
            GeoCoordinate::new(center.latitude + d, center.longitude + d),
            GeoCoordinate::new(center.latitude - d, center.longitude + d),
        ]
    }

    const STYLE: &str = "\
        area[building] {\n\
            building: true;\n\
            height: 12;\n\
            min-height: 2;\n\
            roof-type: flat;\n\
            roof-color: #ff0000;\n\
            facade-type: flat;\n\
            facade-color: #00ff00;\n\
        }\n\
        relation[building] {\n\
            building: true;\n\
            multipolygon: true;\n\
            roof-type: flat;\n\
            roof-color: #ff0000;\n\
            facade-type: flat;\n\
            facade-color: #00ff00;\n\
        }\n";

    fn run_build(
        store_element: Element,
        style_source: &str,
        table: &StringTable,
    ) -> (Vec<Mesh>, Result<()>) {
        let quad_key = QuadKey::new(35205, 21489, 16).unwrap();
        let provider = style_provider(style_source, table);
        let mut geo_store = GeoStore::new();
        geo_store.register_store("InMemory", Box::new(InMemoryElementStore::new()));
        geo_store
            .add_element(
                "InMemory",
                &store_element,
                LodRange::new(16, 16).unwrap(),
                &provider,
            )
            .unwrap();
        // The footprint is built around this tile's center, so the element
        // must land in it.
        assert!(geo_store.has_data(&quad_key));

        let mut quad_key_builder = QuadKeyBuilder::new();
        quad_key_builder
            .register_element_builder("building", Box::new(|_| Box::new(BuildingBuilder::new())));

        let flat = FlatElevationProvider;
        let mut meshes: Vec<Mesh> = Vec::new();
        let result = quad_key_builder.build(
            &geo_store,
            quad_key,
            &provider,
            &flat,
            table,
            Box::new(|mesh| meshes.push(mesh.clone())),
            Box::new(|_| {}),
        );
        (meshes, result)
    }

    #[test]
    fn test_area_building_emits_one_mesh() {
        let table = temp_table("area");
        let quad_key = QuadKey::new(35205, 21489, 16).unwrap();
        let area = Element::Area(Area {
            id: 42,
            tags: building_tags(&table),
            coordinates: footprint(&quad_key),
        });

        let (meshes, result) = run_build(area, STYLE, &table);
        result.unwrap();

        assert_eq!(meshes.len(), 1);
        let mesh = &meshes[0];
        assert_eq!(mesh.name, "building:42");
        assert!(mesh.vertex_count() > 0);
        assert_eq!(mesh.vertices.len(), 3 * mesh.colors.len());
        // Red roof and green facade both present.
        assert!(mesh.colors.contains(&0xffff0000));
        assert!(mesh.colors.contains(&0xff00ff00));
    }

    #[test]
    fn test_height_fallback_extrudes_to_ten() {
        let table = temp_table("fallback");
        let style = "\
            area[building] {\n\
                building: true;\n\
                min-height: 2;\n\
                roof-type: none;\n\
                facade-type: flat;\n\
            }\n";
        let quad_key = QuadKey::new(35205, 21489, 16).unwrap();
        let area = Element::Area(Area {
            id: 7,
            tags: building_tags(&table),
            coordinates: footprint(&quad_key),
        });

        let (meshes, result) = run_build(area, style, &table);
        result.unwrap();
        assert_eq!(meshes.len(), 1);

        // height falls back to 10; facade spans min-height..min-height +
        // (10 - min-height), i.e. z in [2, 10].
        let zs: Vec<f64> = meshes[0].vertices.chunks_exact(3).map(|v| v[2]).collect();
        let z_min = zs.iter().cloned().fold(f64::INFINITY, f64::min);
        let z_max = zs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert!((z_min - 2.0).abs() < 1e-9, "z_min {}", z_min);
        assert!((z_max - 10.0).abs() < 1e-9, "z_max {}", z_max);
    }

    #[test]
    fn test_multipolygon_winding_roles() {
        let table = temp_table("multipolygon");
        let quad_key = QuadKey::new(35205, 21489, 16).unwrap();
        let bbox = quad_key_to_bounding_box(&quad_key);
        let center = bbox.center();
        let (lat, lon) = (center.latitude, center.longitude);
        let d = 0.0002;
        let h = 0.00005;

        // Outer clockwise square, inner counter-clockwise square.
        let outer = Area {
            id: 100,
            tags: Vec::new(),
            coordinates: vec![
                GeoCoordinate::new(lat - d, lon - d),
                GeoCoordinate::new(lat + d, lon - d),
                GeoCoordinate::new(lat + d, lon + d),
                GeoCoordinate::new(lat - d, lon + d),
            ],
        };
        let hole = Area {
            id: 101,
            tags: Vec::new(),
            coordinates: vec![
                GeoCoordinate::new(lat - h, lon - h),
                GeoCoordinate::new(lat - h, lon + h),
                GeoCoordinate::new(lat + h, lon + h),
                GeoCoordinate::new(lat + h, lon - h),
            ],
        };
        assert!(is_clockwise(&outer.coordinates));
        assert!(!is_clockwise(&hole.coordinates));

        let relation = Element::Relation(Relation {
            id: 55,
            tags: building_tags(&table),
            elements: vec![Element::Area(outer), Element::Area(hole)],
        });

        let (meshes, result) = run_build(relation, STYLE, &table);
        result.unwrap();
        assert_eq!(meshes.len(), 1);
        assert_eq!(meshes[0].name, "building:55");

        // Roof triangles must avoid the hole interior.
        let mesh = &meshes[0];
        for triangle in mesh.triangles.chunks_exact(3) {
            let mut cx = 0.0;
            let mut cy = 0.0;
            let mut cz = 0.0;
            for &index in triangle {
                cx += mesh.vertices[3 * index as usize] / 3.0;
                cy += mesh.vertices[3 * index as usize + 1] / 3.0;
                cz += mesh.vertices[3 * index as usize + 2] / 3.0;
            }
            let is_cap = triangle
                .iter()
                .all(|&i| (mesh.vertices[3 * i as usize + 2] - cz).abs() < 1e-12);
            if is_cap {
                let inside_hole =
                    cx > lon - h && cx < lon + h && cy > lat - h && cy < lat + h;
                assert!(!inside_hole, "cap triangle inside the hole");
            }
        }
    }

    #[test]
    fn test_collect_multipolygon_roles_by_winding() {
        let clockwise = |offset: f64| Area {
            id: 1,
            tags: Vec::new(),
            coordinates: vec![
                GeoCoordinate::new(offset, offset),
                GeoCoordinate::new(offset + 1.0, offset),
                GeoCoordinate::new(offset + 1.0, offset + 1.0),
                GeoCoordinate::new(offset, offset + 1.0),
            ],
        };

        // One clockwise ring and one counter-clockwise ring.
        let mut counter = clockwise(0.2);
        counter.coordinates.reverse();
        let mut polygon = Polygon::new();
        collect_multipolygon(
            &mut polygon,
            &Relation {
                id: 2,
                tags: Vec::new(),
                elements: vec![
                    Element::Area(clockwise(0.0)),
                    Element::Area(counter),
                ],
            },
        )
        .unwrap();
        assert_eq!(polygon.outer_ranges().len(), 1);
        assert_eq!(polygon.hole_ranges().len(), 1);

        // Two clockwise rings are both contours.
        let mut polygon = Polygon::new();
        collect_multipolygon(
            &mut polygon,
            &Relation {
                id: 3,
                tags: Vec::new(),
                elements: vec![
                    Element::Area(clockwise(0.0)),
                    Element::Area(clockwise(5.0)),
                ],
            },
        )
        .unwrap();
        assert_eq!(polygon.outer_ranges().len(), 2);
        assert!(polygon.hole_ranges().is_empty());
    }

    #[test]
    fn test_malformed_relation_fails() {
        let table = temp_table("malformed");
        let quad_key = QuadKey::new(35205, 21489, 16).unwrap();
        let relation = Element::Relation(Relation {
            id: 70,
            tags: building_tags(&table),
            elements: vec![Element::Node(crate::entities::Node {
                id: 71,
                tags: Vec::new(),
                coordinate: quad_key_to_bounding_box(&quad_key).center(),
            })],
        });

        let (meshes, result) = run_build(relation, STYLE, &table);
        let message = result.unwrap_err().to_string();
        assert!(message.contains("MalformedRelation"), "{}", message);
        assert!(meshes.is_empty());
    }

    #[test]
    fn test_unknown_roof_type_fails_without_mesh() {
        let table = temp_table("roof");
        let style = "\
            area[building] {\n\
                building: true;\n\
                height: 5;\n\
                roof-type: gabled;\n\
                facade-type: flat;\n\
            }\n";
        let quad_key = QuadKey::new(35205, 21489, 16).unwrap();
        let area = Element::Area(Area {
            id: 8,
            tags: building_tags(&table),
            coordinates: footprint(&quad_key),
        });

        let (meshes, result) = run_build(area, style, &table);
        let message = result.unwrap_err().to_string();
        assert!(message.contains("UnknownRoofType"), "{}", message);
        assert!(meshes.is_empty());
    }

    #[test]
    fn test_non_building_area_is_ignored() {
        let table = temp_table("ignored");
        let style = "area { builders: terrain; }";
        let quad_key = QuadKey::new(35205, 21489, 16).unwrap();
        let area = Element::Area(Area {
            id: 9,
            tags: building_tags(&table),
            coordinates: footprint(&quad_key),
        });

        let (meshes, result) = run_build(area, style, &table);
        result.unwrap();
        assert!(meshes.is_empty());
    }
}
