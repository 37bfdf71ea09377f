// src/entities/mod.rs
//! The map element model: nodes, ways, areas and relations.
//!
//! Elements carry tags as interned string ids (see
//! [`crate::core::StringTable`]) and geometry as ordered coordinate
//! sequences. The sum type replaces the visitor hierarchy of classic map
//! engines with an exhaustive match; builders get one method per variant.

use crate::core::geo::coordinates_bounding_box;
use crate::core::{BoundingBox, GeoCoordinate};

/// One `key=value` pair with both sides interned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    pub key: u32,
    pub value: u32,
}

/// Ordered tag collection. Normalised collections are sorted by key and
/// hold no duplicate keys.
pub type Tags = Vec<Tag>;

/// Sorts by key and collapses duplicate keys, keeping the last occurrence.
pub fn normalize_tags(tags: &mut Tags) {
    tags.sort_by_key(|tag| tag.key);
    tags.reverse();
    tags.dedup_by_key(|tag| tag.key);
    tags.reverse();
}

/// Binary-search lookup in a normalised tag collection.
pub fn tag_value(tags: &Tags, key: u32) -> Option<u32> {
    tags.binary_search_by_key(&key, |tag| tag.key)
        .ok()
        .map(|index| tags[index].value)
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: u64,
    pub tags: Tags,
    pub coordinate: GeoCoordinate,
}

/// Open polyline.
#[derive(Debug, Clone)]
pub struct Way {
    pub id: u64,
    pub tags: Tags,
    pub coordinates: Vec<GeoCoordinate>,
}

/// Implicitly closed polygon ring. Winding is significant: clockwise rings
/// are outer contours, counter-clockwise rings are holes.
#[derive(Debug, Clone)]
pub struct Area {
    pub id: u64,
    pub tags: Tags,
    pub coordinates: Vec<GeoCoordinate>,
}

/// Composite of owned child elements.
#[derive(Debug, Clone)]
pub struct Relation {
    pub id: u64,
    pub tags: Tags,
    pub elements: Vec<Element>,
}

#[derive(Debug, Clone)]
pub enum Element {
    Node(Node),
    Way(Way),
    Area(Area),
    Relation(Relation),
}

impl Element {
    pub fn id(&self) -> u64 {
        match self {
            Element::Node(node) => node.id,
            Element::Way(way) => way.id,
            Element::Area(area) => area.id,
            Element::Relation(relation) => relation.id,
        }
    }

    pub fn tags(&self) -> &Tags {
        match self {
            Element::Node(node) => &node.tags,
            Element::Way(way) => &way.tags,
            Element::Area(area) => &area.tags,
            Element::Relation(relation) => &relation.tags,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Element::Node(_) => "node",
            Element::Way(_) => "way",
            Element::Area(_) => "area",
            Element::Relation(_) => "relation",
        }
    }

    /// Geographic extent; relations aggregate their members.
    pub fn bounding_box(&self) -> BoundingBox {
        match self {
            Element::Node(node) => BoundingBox::new(node.coordinate, node.coordinate),
            Element::Way(way) => coordinates_bounding_box(&way.coordinates),
            Element::Area(area) => coordinates_bounding_box(&area.coordinates),
            Element::Relation(relation) => {
                let mut bbox = BoundingBox::empty();
                for element in &relation.elements {
                    let child = element.bounding_box();
                    if child.is_valid() {
                        bbox.expand(&child.min_point);
                        bbox.expand(&child.max_point);
                    }
                }
                bbox
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_keeps_last_duplicate() {
        let mut tags = vec![
            Tag { key: 2, value: 10 },
            Tag { key: 1, value: 20 },
            Tag { key: 2, value: 30 },
        ];
        normalize_tags(&mut tags);
        assert_eq!(tags.len(), 2);
        assert_eq!(tag_value(&tags, 1), Some(20));
        assert_eq!(tag_value(&tags, 2), Some(30));
        assert_eq!(tag_value(&tags, 3), None);
    }

    #[test]
    fn test_relation_bounding_box_aggregates() {
        let relation = Element::Relation(Relation {
            id: 1,
            tags: Vec::new(),
            elements: vec![
                Element::Node(Node {
                    id: 2,
                    tags: Vec::new(),
                    coordinate: GeoCoordinate::new(1.0, 2.0),
                }),
                Element::Node(Node {
                    id: 3,
                    tags: Vec::new(),
                    coordinate: GeoCoordinate::new(-1.0, 5.0),
                }),
            ],
        });
        let bbox = relation.bounding_box();
        assert_eq!(bbox.min_point, GeoCoordinate::new(-1.0, 2.0));
        assert_eq!(bbox.max_point, GeoCoordinate::new(1.0, 5.0));
    }
}
