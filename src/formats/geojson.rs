// src/formats/geojson.rs
//! GeoJSON FeatureCollection importer.
//!
//! Point, LineString, Polygon and MultiPolygon geometries are supported;
//! feature properties become tags. Polygon rings are re-wound so outer
//! rings are clockwise and holes counter-clockwise, which is what the
//! multipolygon machinery downstream keys on.

use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::intern_tags;
use crate::core::geo::is_clockwise;
use crate::core::{GeoCoordinate, StringTable};
use crate::entities::{Area, Element, Node, Relation, Way};

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(rename = "type")]
    kind: String,
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Option<Geometry>,
    #[serde(default)]
    properties: serde_json::Map<String, Value>,
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    #[serde(rename = "type")]
    kind: String,
    coordinates: Value,
}

pub fn import(path: &Path, string_table: &StringTable) -> Result<Vec<Element>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let root: FeatureCollection = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parse {}", path.display()))?;
    if root.kind != "FeatureCollection" {
        anyhow::bail!("{} is not a FeatureCollection", path.display());
    }

    let mut elements = Vec::with_capacity(root.features.len());
    for (index, feature) in root.features.iter().enumerate() {
        let Some(geometry) = &feature.geometry else {
            continue;
        };

        let id = feature
            .id
            .as_ref()
            .and_then(Value::as_u64)
            .unwrap_or(index as u64);
        let raw_tags: Vec<(String, String)> = feature
            .properties
            .iter()
            .filter_map(|(key, value)| {
                let text = match value {
                    Value::String(text) => text.clone(),
                    Value::Number(number) => number.to_string(),
                    Value::Bool(flag) => flag.to_string(),
                    _ => return None,
                };
                Some((key.clone(), text))
            })
            .collect();
        let tags = intern_tags(string_table, &raw_tags)?;

        match geometry.kind.as_str() {
            "Point" => {
                let position = parse_position(&geometry.coordinates)?;
                elements.push(Element::Node(Node {
                    id,
                    tags,
                    coordinate: position,
                }));
            }
            "LineString" => {
                let coordinates = parse_line(&geometry.coordinates)?;
                elements.push(Element::Way(Way {
                    id,
                    tags,
                    coordinates,
                }));
            }
            "Polygon" => {
                let rings = parse_rings(&geometry.coordinates)?;
                if let Some(element) = polygon_element(id, tags, rings) {
                    elements.push(element);
                }
            }
            "MultiPolygon" => {
                let mut rings = Vec::new();
                let polygons = geometry
                    .coordinates
                    .as_array()
                    .context("MultiPolygon coordinates must be an array")?;
                for polygon in polygons {
                    rings.extend(parse_rings(polygon)?);
                }
                if let Some(element) = polygon_element(id, tags, rings) {
                    elements.push(element);
                }
            }
            other => {
                warn!("skipping unsupported geometry '{}' in {}", other, path.display());
            }
        }
    }
    Ok(elements)
}

/// One ring with its role. Outer rings come first in GeoJSON polygon
/// coordinate arrays.
struct Ring {
    is_outer: bool,
    coordinates: Vec<GeoCoordinate>,
}

fn polygon_element(id: u64, tags: crate::entities::Tags, rings: Vec<Ring>) -> Option<Element> {
    let mut areas = Vec::with_capacity(rings.len());
    for ring in rings {
        let mut coordinates = ring.coordinates;
        if coordinates.len() < 3 {
            continue;
        }
        // Outer rings clockwise, holes counter-clockwise.
        if is_clockwise(&coordinates) != ring.is_outer {
            coordinates.reverse();
        }
        areas.push(coordinates);
    }

    match areas.len() {
        0 => None,
        1 => Some(Element::Area(Area {
            id,
            tags,
            coordinates: areas.into_iter().next().unwrap(),
        })),
        _ => Some(Element::Relation(Relation {
            id,
            tags,
            elements: areas
                .into_iter()
                .enumerate()
                .map(|(index, coordinates)| {
                    Element::Area(Area {
                        id: id.wrapping_mul(1000).wrapping_add(index as u64),
                        tags: Vec::new(),
                        coordinates,
                    })
                })
                .collect(),
        })),
    }
}

fn parse_position(value: &Value) -> Result<GeoCoordinate> {
    let pair = value.as_array().context("position must be an array")?;
    let lon = pair
        .first()
        .and_then(Value::as_f64)
        .context("position is missing longitude")?;
    let lat = pair
        .get(1)
        .and_then(Value::as_f64)
        .context("position is missing latitude")?;
    Ok(GeoCoordinate::new(lat, lon))
}

fn parse_line(value: &Value) -> Result<Vec<GeoCoordinate>> {
    value
        .as_array()
        .context("line coordinates must be an array")?
        .iter()
        .map(parse_position)
        .collect()
}

fn parse_rings(value: &Value) -> Result<Vec<Ring>> {
    let rings = value
        .as_array()
        .context("polygon coordinates must be an array")?;
    let mut parsed = Vec::with_capacity(rings.len());
    for (index, ring) in rings.iter().enumerate() {
        let mut coordinates = parse_line(ring)?;
        if coordinates.len() > 1 && coordinates.first() == coordinates.last() {
            coordinates.pop();
        }
        parsed.push(Ring {
            is_outer: index == 0,
            coordinates,
        });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_table() -> StringTable {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let path = std::env::temp_dir().join(format!(
            "mapforge-geojson-{}-{}.bin",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = std::fs::remove_file(&path);
        StringTable::new(&path).unwrap()
    }

    #[test]
    fn test_import_polygon_with_hole() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "id": 9,
                "properties": { "building": "true", "height": 12 },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [
                        [[0.0, 0.0], [0.0, 0.001], [0.001, 0.001], [0.001, 0.0], [0.0, 0.0]],
                        [[0.0004, 0.0004], [0.0006, 0.0004], [0.0006, 0.0006], [0.0004, 0.0006], [0.0004, 0.0004]]
                    ]
                }
            }]
        }"#;
        let path = std::env::temp_dir().join(format!(
            "mapforge-geojson-{}-hole.json",
            std::process::id()
        ));
        File::create(&path).unwrap().write_all(json.as_bytes()).unwrap();

        let table = temp_table();
        let elements = import(&path, &table).unwrap();
        assert_eq!(elements.len(), 1);

        let Element::Relation(relation) = &elements[0] else {
            panic!("expected a relation, got {}", elements[0].kind_name());
        };
        assert_eq!(relation.id, 9);
        assert_eq!(relation.elements.len(), 2);
        let Element::Area(outer) = &relation.elements[0] else {
            panic!("expected ring area");
        };
        let Element::Area(hole) = &relation.elements[1] else {
            panic!("expected ring area");
        };
        assert!(is_clockwise(&outer.coordinates));
        assert!(!is_clockwise(&hole.coordinates));

        let height_key = table.get_id("height").unwrap();
        let height_value = crate::entities::tag_value(&relation.tags, height_key)
            .and_then(|id| table.get_string(id));
        assert_eq!(height_value.as_deref(), Some("12"));

        let _ = std::fs::remove_file(&path);
    }
}
