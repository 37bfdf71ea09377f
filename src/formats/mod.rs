// src/formats/mod.rs
//! Ingestion front-ends.
//!
//! Every importer normalises foreign records into the internal element
//! model with interned tags; the store-side indexing logic never sees a
//! format-specific type. Routing is by file extension.

pub mod geojson;
pub mod pbf;
pub mod shape;

pub use shape::{PolygonMember, ShapeParser, ShapeVisitor};

use anyhow::Result;

use crate::core::{BoundingBox, Error, GeoCoordinate, LodRange, StringTable};
use crate::entities::{normalize_tags, Area, Element, Node, Relation, Tag, Tags, Way};

/// Tags as read from a source file, before interning.
pub type RawTags = Vec<(String, String)>;

/// Parses `path` into elements.
///
/// `region` restricts importers that support it (the PBF reader's node
/// retention filter); the other formats load everything and leave spatial
/// filtering to the store indexing step.
pub fn import_file(
    path: &std::path::Path,
    string_table: &StringTable,
    region: Option<&BoundingBox>,
    range: LodRange,
) -> Result<Vec<Element>> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "shp" => {
            let mut assembler = ElementAssembler::new(string_table);
            ShapeParser::new().parse(path, &mut assembler)?;
            Ok(assembler.into_elements())
        }
        "json" | "geojson" => geojson::import(path, string_table),
        "pbf" => pbf::import(path, string_table, region, range),
        _ => Err(Error::UnsupportedFormat(path.to_path_buf()).into()),
    }
}

pub(crate) fn intern_tags(string_table: &StringTable, raw: &[(String, String)]) -> Result<Tags> {
    let mut tags = Vec::with_capacity(raw.len());
    for (key, value) in raw {
        tags.push(Tag {
            key: string_table.get_id(key)?,
            value: string_table.get_id(value)?,
        });
    }
    normalize_tags(&mut tags);
    Ok(tags)
}

/// Turns shapefile visitor events into elements.
///
/// Closed arcs become areas; polygon records become a relation of ring
/// areas carrying the record tags, so the multipolygon machinery downstream
/// sees the same shape it would for hand-built relations.
struct ElementAssembler<'a> {
    string_table: &'a StringTable,
    elements: Vec<Element>,
    next_id: u64,
}

impl<'a> ElementAssembler<'a> {
    fn new(string_table: &'a StringTable) -> Self {
        Self {
            string_table,
            elements: Vec::new(),
            next_id: 0,
        }
    }

    fn into_elements(self) -> Vec<Element> {
        self.elements
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl ShapeVisitor for ElementAssembler<'_> {
    fn visit_node(&mut self, coordinate: GeoCoordinate, tags: RawTags) -> Result<()> {
        let id = self.take_id();
        self.elements.push(Element::Node(Node {
            id,
            tags: intern_tags(self.string_table, &tags)?,
            coordinate,
        }));
        Ok(())
    }

    fn visit_way(
        &mut self,
        mut coordinates: Vec<GeoCoordinate>,
        tags: RawTags,
        is_closed: bool,
    ) -> Result<()> {
        let id = self.take_id();
        let tags = intern_tags(self.string_table, &tags)?;
        if is_closed {
            coordinates.pop();
            self.elements.push(Element::Area(Area {
                id,
                tags,
                coordinates,
            }));
        } else {
            self.elements.push(Element::Way(Way {
                id,
                tags,
                coordinates,
            }));
        }
        Ok(())
    }

    fn visit_relation(&mut self, members: Vec<PolygonMember>, tags: RawTags) -> Result<()> {
        let id = self.take_id();
        let tags = intern_tags(self.string_table, &tags)?;

        let mut rings = Vec::with_capacity(members.len());
        for member in members {
            if !member.is_ring {
                continue;
            }
            let member_id = self.take_id();
            let mut coordinates = member.coordinates;
            if coordinates.len() > 1 && coordinates.first() == coordinates.last() {
                coordinates.pop();
            }
            rings.push(Element::Area(Area {
                id: member_id,
                tags: Vec::new(),
                coordinates,
            }));
        }

        match rings.len() {
            0 => {}
            1 => {
                // A single ring carries the record tags directly.
                let Some(Element::Area(mut area)) = rings.pop() else {
                    unreachable!();
                };
                area.id = id;
                area.tags = tags;
                self.elements.push(Element::Area(area));
            }
            _ => self.elements.push(Element::Relation(Relation {
                id,
                tags,
                elements: rings,
            })),
        }
        Ok(())
    }
}
