// src/index/mod.rs
//! Element stores and the GeoStore facade over them.
//!
//! Stores index every element under each quadkey whose extent the element's
//! bounding box intersects, once per admitted level of detail. Search is a
//! lazy stream so tile builds never materialise a whole tile up front.

pub mod memory;
pub mod persistent;

pub use memory::InMemoryElementStore;
pub use persistent::PersistentElementStore;

use anyhow::Result;
use rayon::prelude::*;
use smallvec::SmallVec;

use crate::core::geo::visit_tile_range;
use crate::core::{BoundingBox, LodRange, QuadKey, StringTable};
use crate::entities::Element;
use crate::formats;
use crate::mapcss::StyleProvider;

/// Backend contract shared by the in-memory and on-disk stores.
///
/// `Send + Sync` because distinct tiles may be built concurrently by
/// different callers against one shared geo store.
pub trait ElementStore: Send + Sync {
    /// Indexes `element` under `quad_key`.
    fn store(&mut self, element: &Element, quad_key: &QuadKey) -> Result<()>;

    /// Lazy stream of every element indexed under `quad_key`.
    fn search(&self, quad_key: &QuadKey)
        -> Result<Box<dyn Iterator<Item = Result<Element>> + '_>>;

    fn has_data(&self, quad_key: &QuadKey) -> bool;

    /// Makes batched writes durable.
    fn flush(&mut self) -> Result<()>;
}

/// Spatial restriction of an `add` operation.
#[derive(Debug, Clone, Copy)]
enum Region {
    Everywhere,
    Within(BoundingBox),
    Tile(QuadKey),
}

/// Facade routing adds and searches over named stores in registration order.
pub struct GeoStore {
    stores: Vec<(String, Box<dyn ElementStore>)>,
}

impl GeoStore {
    pub fn new() -> Self {
        Self { stores: Vec::new() }
    }

    /// Registers `store` under `name`, replacing a previous registration.
    pub fn register_store(&mut self, name: &str, store: Box<dyn ElementStore>) {
        if let Some(slot) = self.stores.iter_mut().find(|(n, _)| n == name) {
            slot.1 = store;
        } else {
            self.stores.push((name.to_string(), store));
        }
    }

    /// Ingests a data file across `range` with no spatial restriction.
    pub fn add_file(
        &mut self,
        name: &str,
        path: &std::path::Path,
        range: LodRange,
        style_provider: &StyleProvider,
        string_table: &StringTable,
    ) -> Result<()> {
        self.add_file_in_region(name, path, Region::Everywhere, range, style_provider, string_table)
    }

    /// Ingests a data file, keeping only elements intersecting `quad_key`.
    pub fn add_file_in_quad_key(
        &mut self,
        name: &str,
        path: &std::path::Path,
        quad_key: QuadKey,
        style_provider: &StyleProvider,
        string_table: &StringTable,
    ) -> Result<()> {
        let range = LodRange::new(quad_key.level_of_detail, quad_key.level_of_detail)?;
        self.add_file_in_region(name, path, Region::Tile(quad_key), range, style_provider, string_table)
    }

    /// Ingests a data file, keeping only elements intersecting `bbox`.
    pub fn add_file_in_bounding_box(
        &mut self,
        name: &str,
        path: &std::path::Path,
        bbox: BoundingBox,
        range: LodRange,
        style_provider: &StyleProvider,
        string_table: &StringTable,
    ) -> Result<()> {
        self.add_file_in_region(name, path, Region::Within(bbox), range, style_provider, string_table)
    }

    fn add_file_in_region(
        &mut self,
        name: &str,
        path: &std::path::Path,
        region: Region,
        range: LodRange,
        style_provider: &StyleProvider,
        string_table: &StringTable,
    ) -> Result<()> {
        let import_region = match region {
            Region::Everywhere => None,
            Region::Within(bbox) => Some(bbox),
            Region::Tile(quad_key) => {
                Some(crate::core::geo::quad_key_to_bounding_box(&quad_key))
            }
        };
        let elements = formats::import_file(path, string_table, import_region.as_ref(), range)?;

        // Style matching and tile-range resolution are pure per element;
        // fan that out, then insert in file order to keep search output
        // deterministic.
        let keys: Vec<SmallVec<[QuadKey; 4]>> = elements
            .par_iter()
            .map(|element| quad_keys_for(element, region, range, style_provider))
            .collect();

        let store = self.store_mut(name)?;
        for (element, element_keys) in elements.iter().zip(keys.iter()) {
            for quad_key in element_keys {
                store.store(element, quad_key)?;
            }
        }
        Ok(())
    }

    /// Ingests a single element across `range`.
    pub fn add_element(
        &mut self,
        name: &str,
        element: &Element,
        range: LodRange,
        style_provider: &StyleProvider,
    ) -> Result<()> {
        let keys = quad_keys_for(element, Region::Everywhere, range, style_provider);
        let store = self.store_mut(name)?;
        for quad_key in &keys {
            store.store(element, quad_key)?;
        }
        Ok(())
    }

    /// Chains each registered store's lazy stream in registration order.
    pub fn search(
        &self,
        quad_key: &QuadKey,
    ) -> Result<Box<dyn Iterator<Item = Result<Element>> + '_>> {
        let mut streams = Vec::with_capacity(self.stores.len());
        for (_, store) in &self.stores {
            streams.push(store.search(quad_key)?);
        }
        Ok(Box::new(streams.into_iter().flatten()))
    }

    pub fn has_data(&self, quad_key: &QuadKey) -> bool {
        self.stores.iter().any(|(_, store)| store.has_data(quad_key))
    }

    pub fn flush(&mut self) -> Result<()> {
        for (_, store) in &mut self.stores {
            store.flush()?;
        }
        Ok(())
    }

    fn store_mut(&mut self, name: &str) -> Result<&mut Box<dyn ElementStore>> {
        self.stores
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, store)| store)
            .ok_or_else(|| anyhow::anyhow!("no store registered under '{}'", name))
    }
}

impl Default for GeoStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Every quadkey `element` must be indexed under, honoring the style
/// admission per level of detail and the spatial restriction of the call.
fn quad_keys_for(
    element: &Element,
    region: Region,
    range: LodRange,
    style_provider: &StyleProvider,
) -> SmallVec<[QuadKey; 4]> {
    let mut keys = SmallVec::new();
    let element_bbox = element.bounding_box();
    if !element_bbox.is_valid() {
        return keys;
    }

    for lod in range.start..=range.end {
        if !style_provider.has_style(element, lod) {
            continue;
        }
        match region {
            Region::Everywhere => {
                visit_tile_range(&element_bbox, lod, |quad_key| keys.push(quad_key));
            }
            Region::Within(bbox) => {
                if !bbox.intersects(&element_bbox) {
                    continue;
                }
                let clipped = clip(&element_bbox, &bbox);
                visit_tile_range(&clipped, lod, |quad_key| keys.push(quad_key));
            }
            Region::Tile(quad_key) => {
                if lod == quad_key.level_of_detail
                    && crate::core::geo::quad_key_to_bounding_box(&quad_key)
                        .intersects(&element_bbox)
                {
                    keys.push(quad_key);
                }
            }
        }
    }
    keys
}

fn clip(a: &BoundingBox, b: &BoundingBox) -> BoundingBox {
    BoundingBox::new(
        crate::core::GeoCoordinate::new(
            a.min_point.latitude.max(b.min_point.latitude),
            a.min_point.longitude.max(b.min_point.longitude),
        ),
        crate::core::GeoCoordinate::new(
            a.max_point.latitude.min(b.max_point.latitude),
            a.max_point.longitude.min(b.max_point.longitude),
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::{coordinate_to_quad_key, quad_key_to_bounding_box, visit_tile_range};
    use crate::core::GeoCoordinate;
    use crate::entities::{Area, Node};
    use crate::mapcss::StyleProvider;

    fn table(name: &str) -> StringTable {
        let path = std::env::temp_dir().join(format!(
            "mapforge-index-{}-{}.bin",
            std::process::id(),
            name
        ));
        let _ = std::fs::remove_file(&path);
        StringTable::new(&path).unwrap()
    }

    fn match_everything(string_table: &StringTable) -> StyleProvider {
        StyleProvider::parse_str("element { any: true; }", string_table).unwrap()
    }

    /// Small area straddling known coordinates near Berlin.
    fn sample_area() -> Element {
        Element::Area(Area {
            id: 1,
            tags: Vec::new(),
            coordinates: vec![
                GeoCoordinate::new(52.5200, 13.4049),
                GeoCoordinate::new(52.5210, 13.4049),
                GeoCoordinate::new(52.5210, 13.4061),
                GeoCoordinate::new(52.5200, 13.4061),
            ],
        })
    }

    #[test]
    fn test_spatial_completeness_across_range() {
        let string_table = table("completeness");
        let provider = match_everything(&string_table);
        let mut geo_store = GeoStore::new();
        geo_store.register_store("mem", Box::new(InMemoryElementStore::new()));

        let element = sample_area();
        let range = LodRange::new(12, 14).unwrap();
        geo_store
            .add_element("mem", &element, range, &provider)
            .unwrap();

        let bbox = element.bounding_box();
        for lod in 12..=14 {
            // Every quadkey whose extent intersects the element yields it.
            let mut intersecting = Vec::new();
            visit_tile_range(&bbox, lod, |quad_key| intersecting.push(quad_key));
            assert!(!intersecting.is_empty());
            for quad_key in &intersecting {
                let found: Vec<_> = geo_store.search(quad_key).unwrap().collect();
                assert_eq!(found.len(), 1, "missing element at {}", quad_key);
            }

            // A disjoint tile at the same level yields nothing.
            let far = coordinate_to_quad_key(&GeoCoordinate::new(-33.9, 18.4), lod);
            assert!(geo_store.search(&far).unwrap().next().is_none());
            assert!(!geo_store.has_data(&far));
        }

        // Outside the detail range nothing is indexed.
        let above = coordinate_to_quad_key(&GeoCoordinate::new(52.5205, 13.4055), 15);
        assert!(!geo_store.has_data(&above));
    }

    #[test]
    fn test_quad_key_restriction_filters_disjoint_elements() {
        let string_table = table("tile-restrict");
        let provider = match_everything(&string_table);

        let element = sample_area();
        let inside = coordinate_to_quad_key(&GeoCoordinate::new(52.5205, 13.4055), 16);
        let elsewhere = coordinate_to_quad_key(&GeoCoordinate::new(-33.9, 18.4), 16);

        let keys = quad_keys_for(
            &element,
            Region::Tile(inside),
            LodRange::new(16, 16).unwrap(),
            &provider,
        );
        assert!(keys.contains(&inside));

        let keys = quad_keys_for(
            &element,
            Region::Tile(elsewhere),
            LodRange::new(16, 16).unwrap(),
            &provider,
        );
        assert!(keys.is_empty());
    }

    #[test]
    fn test_bounding_box_restriction() {
        let string_table = table("bbox-restrict");
        let provider = match_everything(&string_table);
        let element = sample_area();
        let range = LodRange::new(14, 14).unwrap();

        let covering = BoundingBox::new(
            GeoCoordinate::new(52.0, 13.0),
            GeoCoordinate::new(53.0, 14.0),
        );
        let keys = quad_keys_for(&element, Region::Within(covering), range, &provider);
        assert!(!keys.is_empty());

        let disjoint = BoundingBox::new(
            GeoCoordinate::new(-34.0, 18.0),
            GeoCoordinate::new(-33.0, 19.0),
        );
        let keys = quad_keys_for(&element, Region::Within(disjoint), range, &provider);
        assert!(keys.is_empty());
    }

    #[test]
    fn test_register_store_replaces() {
        let string_table = table("replace");
        let provider = match_everything(&string_table);
        let mut geo_store = GeoStore::new();
        let quad_key = coordinate_to_quad_key(&GeoCoordinate::new(1.0, 1.0), 10);
        let node = Element::Node(Node {
            id: 3,
            tags: Vec::new(),
            coordinate: quad_key_to_bounding_box(&quad_key).center(),
        });

        geo_store.register_store("mem", Box::new(InMemoryElementStore::new()));
        geo_store
            .add_element("mem", &node, LodRange::new(10, 10).unwrap(), &provider)
            .unwrap();
        assert!(geo_store.has_data(&quad_key));

        // Re-registering under the same name swaps the backend out.
        geo_store.register_store("mem", Box::new(InMemoryElementStore::new()));
        assert!(!geo_store.has_data(&quad_key));
    }
}
