// src/formats/pbf.rs
//! OSM PBF importer.
//!
//! Two streaming passes over the file: pass A retains nodes hitting the
//! import region, pass B assembles ways from the retained refs. The
//! retention filter is an R-tree of tile envelopes so region-restricted
//! imports never hold the whole planet's nodes; an unrestricted import
//! keeps everything. OSM relations are not assembled here.

use anyhow::{Context, Result};
use hashbrown::HashMap;
use log::{debug, info};
use nohash_hasher::BuildNoHashHasher;
use osmpbf::{Element as PbfElement, ElementReader};
use rstar::{RTree, RTreeObject, AABB};
use std::path::Path;

use super::{intern_tags, RawTags};
use crate::core::geo::visit_tile_range;
use crate::core::{BoundingBox, GeoCoordinate, LodRange, StringTable};
use crate::entities::{Area, Element, Node, Way};

type NodeMap = HashMap<i64, NodeRecord, BuildNoHashHasher<i64>>;

struct NodeRecord {
    latitude: f64,
    longitude: f64,
}

struct TileEnvelope {
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for TileEnvelope {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Tag keys whose presence marks a closed way as an area feature.
const AREA_KEYS: [&str; 6] = [
    "building", "landuse", "leisure", "natural", "amenity", "area",
];

pub fn import(
    path: &Path,
    string_table: &StringTable,
    region: Option<&BoundingBox>,
    range: LodRange,
) -> Result<Vec<Element>> {
    let filter = region.map(|bbox| {
        let mut envelopes = Vec::new();
        visit_tile_range(bbox, range.start, |quad_key| {
            let tile = crate::core::geo::quad_key_to_bounding_box(&quad_key);
            envelopes.push(TileEnvelope {
                envelope: AABB::from_corners(
                    [tile.min_point.longitude, tile.min_point.latitude],
                    [tile.max_point.longitude, tile.max_point.latitude],
                ),
            });
        });
        RTree::bulk_load(envelopes)
    });

    let retained = |lat: f64, lon: f64| -> bool {
        match &filter {
            Some(tree) => tree
                .locate_in_envelope_intersecting(&AABB::from_point([lon, lat]))
                .next()
                .is_some(),
            None => true,
        }
    };

    // Pass A: nodes. Tagged nodes become elements; every retained node
    // feeds the way assembly of pass B.
    let mut nodes: NodeMap = NodeMap::with_hasher(BuildNoHashHasher::default());
    let mut elements: Vec<Element> = Vec::new();
    let mut failure: Option<anyhow::Error> = None;
    let mut total_nodes = 0usize;

    let mut handle_node = |id: i64, lat: f64, lon: f64, tags: RawTags| {
        total_nodes += 1;
        if !retained(lat, lon) {
            return;
        }
        if !tags.is_empty() && failure.is_none() {
            match intern_tags(string_table, &tags) {
                Ok(tags) => elements.push(Element::Node(Node {
                    id: id as u64,
                    tags,
                    coordinate: GeoCoordinate::new(lat, lon),
                })),
                Err(e) => failure = Some(e),
            }
        }
        nodes.insert(
            id,
            NodeRecord {
                latitude: lat,
                longitude: lon,
            },
        );
    };

    let reader = ElementReader::from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    reader.for_each(|element| match element {
        PbfElement::Node(node) => {
            let tags: RawTags = node
                .tags()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            handle_node(node.id(), node.lat(), node.lon(), tags);
        }
        PbfElement::DenseNode(node) => {
            let tags: RawTags = node
                .tags()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            handle_node(node.id(), node.lat(), node.lon(), tags);
        }
        _ => {}
    })?;
    if let Some(e) = failure {
        return Err(e);
    }
    info!(
        "{}: retained {} of {} nodes",
        path.display(),
        nodes.len(),
        total_nodes
    );

    // Pass B: ways.
    let mut failure: Option<anyhow::Error> = None;
    let mut total_ways = 0usize;
    let mut skipped_relations = 0usize;

    let reader = ElementReader::from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    reader.for_each(|element| match element {
        PbfElement::Way(way) => {
            total_ways += 1;
            if failure.is_some() {
                return;
            }

            let refs: Vec<i64> = way.refs().collect();
            let mut coordinates = Vec::with_capacity(refs.len());
            for node_id in &refs {
                if let Some(record) = nodes.get(node_id) {
                    coordinates.push(GeoCoordinate::new(record.latitude, record.longitude));
                }
            }
            if coordinates.len() < 2 {
                return;
            }

            let raw_tags: RawTags = way
                .tags()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            let is_closed = refs.len() > 2 && refs.first() == refs.last();
            let treat_as_area = is_closed
                && raw_tags.iter().any(|(key, _)| {
                    AREA_KEYS.contains(&key.as_str())
                });

            match intern_tags(string_table, &raw_tags) {
                Ok(tags) => {
                    if treat_as_area {
                        coordinates.pop();
                        elements.push(Element::Area(Area {
                            id: way.id() as u64,
                            tags,
                            coordinates,
                        }));
                    } else {
                        elements.push(Element::Way(Way {
                            id: way.id() as u64,
                            tags,
                            coordinates,
                        }));
                    }
                }
                Err(e) => failure = Some(e),
            }
        }
        PbfElement::Relation(_) => {
            skipped_relations += 1;
        }
        _ => {}
    })?;
    if let Some(e) = failure {
        return Err(e);
    }
    if skipped_relations > 0 {
        debug!(
            "{}: skipped {} relations (not assembled by this importer)",
            path.display(),
            skipped_relations
        );
    }
    debug!("{}: {} ways seen", path.display(), total_ways);

    Ok(elements)
}
