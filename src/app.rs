// src/app.rs
//! The application facade: the public surface of the tile builder.
//!
//! Composes the object graph (string table, geo store with the default
//! `InMemory` and `OnDisk` stores, both elevation providers, the style
//! cache and a `QuadKeyBuilder` with the default layer builders) and wraps
//! every operation in one error boundary: failures surface as exactly one
//! `on_error` call with a rendered message, never as a panic or a partial
//! mesh.

use anyhow::Result;
use log::warn;
use std::path::Path;

use crate::builders::{
    barrier::BarrierBuilder, buildings::BuildingBuilder, terrain::TerraBuilder,
    tree::TreeBuilder, QuadKeyBuilder,
};
use crate::core::geo::quad_key_to_bounding_box;
use crate::core::{BoundingBox, Error, LodRange, QuadKey, StringTable};
use crate::entities::Element;
use crate::heightmap::{ElevationProvider, FlatElevationProvider, SrtmElevationProvider};
use crate::index::{GeoStore, InMemoryElementStore, PersistentElementStore};
use crate::mapcss::StyleProviderCache;
use crate::meshing::Mesh;

const IN_MEMORY_STORE: &str = "InMemory";
const PERSISTENT_STORE: &str = "OnDisk";

/// Detail levels at or below this threshold use the flat elevation
/// provider. The default parks every level on flat data; deployments with
/// SRTM tiles lower it.
const SRTM_ELEVATION_LOD_START: i32 = 42;

pub struct Application {
    string_table: StringTable,
    geo_store: GeoStore,
    flat_ele_provider: FlatElevationProvider,
    srtm_ele_provider: SrtmElevationProvider,
    style_cache: StyleProviderCache,
    quad_key_builder: QuadKeyBuilder,
}

impl Application {
    /// Composes the object graph. `string_path` names the interned-string
    /// file, `data_path` the persistent store directory, `ele_path` the
    /// directory of SRTM tiles.
    pub fn new(string_path: &Path, data_path: &Path, ele_path: &Path) -> Result<Self> {
        let string_table = StringTable::new(string_path)?;

        let mut geo_store = GeoStore::new();
        geo_store.register_store(IN_MEMORY_STORE, Box::new(InMemoryElementStore::new()));
        geo_store.register_store(
            PERSISTENT_STORE,
            Box::new(PersistentElementStore::new(data_path)?),
        );

        let mut quad_key_builder = QuadKeyBuilder::new();
        quad_key_builder
            .register_element_builder("terrain", Box::new(|_| Box::new(TerraBuilder::new())));
        quad_key_builder
            .register_element_builder("building", Box::new(|_| Box::new(BuildingBuilder::new())));
        quad_key_builder
            .register_element_builder("tree", Box::new(|_| Box::new(TreeBuilder::new())));
        quad_key_builder
            .register_element_builder("barrier", Box::new(|_| Box::new(BarrierBuilder::new())));

        Ok(Self {
            string_table,
            geo_store,
            flat_ele_provider: FlatElevationProvider,
            srtm_ele_provider: SrtmElevationProvider::new(ele_path),
            style_cache: StyleProviderCache::new(),
            quad_key_builder,
        })
    }

    /// Forces style cache warmup for `path`.
    pub fn register_stylesheet<F>(&self, path: &Path, on_error: F)
    where
        F: FnMut(&str),
    {
        report(
            self.style_cache.get(path, &self.string_table).map(|_| ()),
            on_error,
        );
    }

    /// Blocking elevation fetch for one tile. Takes `&mut self` because
    /// preloading is not safe to run concurrently on one provider.
    pub fn preload_elevation<F>(&mut self, quad_key: QuadKey, on_error: F)
    where
        F: FnMut(&str),
    {
        let bbox = quad_key_to_bounding_box(&quad_key);
        let result = if quad_key.level_of_detail <= SRTM_ELEVATION_LOD_START {
            self.flat_ele_provider.preload(&bbox)
        } else {
            self.srtm_ele_provider.preload(&bbox)
        };
        report(result, on_error);
    }

    /// Ingests a data file into the on-disk store across `range`.
    pub fn add_to_persistent_store<F>(
        &mut self,
        style_file: &Path,
        path: &Path,
        range: LodRange,
        on_error: F,
    ) where
        F: FnMut(&str),
    {
        let result = (|| {
            let provider = self.style_cache.get(style_file, &self.string_table)?;
            self.geo_store
                .add_file(PERSISTENT_STORE, path, range, &provider, &self.string_table)
        })();
        report(result, on_error);
    }

    /// Single-tile persistent ingestion. Deliberately unimplemented;
    /// refusing beats guessing at semantics callers might rely on.
    pub fn add_to_persistent_store_in_quad_key<F>(
        &mut self,
        _style_file: &Path,
        _path: &Path,
        _quad_key: QuadKey,
        on_error: F,
    ) where
        F: FnMut(&str),
    {
        report(
            Err(Error::NotImplemented("single-tile persistent ingestion").into()),
            on_error,
        );
    }

    /// Ingests a data file into memory, restricted to one tile.
    pub fn add_to_in_memory_store<F>(
        &mut self,
        style_file: &Path,
        path: &Path,
        quad_key: QuadKey,
        on_error: F,
    ) where
        F: FnMut(&str),
    {
        let result = (|| {
            let provider = self.style_cache.get(style_file, &self.string_table)?;
            self.geo_store.add_file_in_quad_key(
                IN_MEMORY_STORE,
                path,
                quad_key,
                &provider,
                &self.string_table,
            )
        })();
        report(result, on_error);
    }

    /// Ingests a data file into memory within `bbox` across `range`.
    pub fn add_to_in_memory_store_in_bounding_box<F>(
        &mut self,
        style_file: &Path,
        path: &Path,
        bbox: BoundingBox,
        range: LodRange,
        on_error: F,
    ) where
        F: FnMut(&str),
    {
        let result = (|| {
            let provider = self.style_cache.get(style_file, &self.string_table)?;
            self.geo_store.add_file_in_bounding_box(
                IN_MEMORY_STORE,
                path,
                bbox,
                range,
                &provider,
                &self.string_table,
            )
        })();
        report(result, on_error);
    }

    /// Ingests a data file into memory everywhere across `range`.
    pub fn add_to_in_memory_store_in_range<F>(
        &mut self,
        style_file: &Path,
        path: &Path,
        range: LodRange,
        on_error: F,
    ) where
        F: FnMut(&str),
    {
        let result = (|| {
            let provider = self.style_cache.get(style_file, &self.string_table)?;
            self.geo_store
                .add_file(IN_MEMORY_STORE, path, range, &provider, &self.string_table)
        })();
        report(result, on_error);
    }

    /// Ingests a single element into memory across `range`.
    pub fn add_element_to_in_memory_store<F>(
        &mut self,
        style_file: &Path,
        element: &Element,
        range: LodRange,
        on_error: F,
    ) where
        F: FnMut(&str),
    {
        let result = (|| {
            let provider = self.style_cache.get(style_file, &self.string_table)?;
            self.geo_store
                .add_element(IN_MEMORY_STORE, element, range, &provider)
        })();
        report(result, on_error);
    }

    pub fn has_data(&self, quad_key: &QuadKey) -> bool {
        self.geo_store.has_data(quad_key)
    }

    /// Runs the tile-build pipeline for `quad_key`.
    ///
    /// Callback buffers are borrowed for the duration of each call;
    /// consumers copy what they keep. `on_mesh` never sees an empty mesh.
    pub fn load_quadkey<M, E, F>(
        &self,
        style_file: &Path,
        quad_key: QuadKey,
        mut on_mesh: M,
        mut on_element: E,
        on_error: F,
    ) where
        M: FnMut(&Mesh),
        E: FnMut(&Element),
        F: FnMut(&str),
    {
        let result = (|| {
            let provider = self.style_cache.get(style_file, &self.string_table)?;
            self.quad_key_builder.build(
                &self.geo_store,
                quad_key,
                &provider,
                self.elevation_provider(&quad_key),
                &self.string_table,
                Box::new(|mesh| on_mesh(mesh)),
                Box::new(|element| on_element(element)),
            )
        })();
        report(result, on_error);
    }

    /// Interned id of `value`.
    pub fn get_string_id(&self, value: &str) -> Result<u32> {
        self.string_table.get_id(value)
    }

    /// Reverse string lookup, the way element consumers resolve tags.
    pub fn get_string(&self, id: u32) -> Option<String> {
        self.string_table.get_string(id)
    }

    /// Pushes batched store writes and pending string records to disk.
    pub fn flush<F>(&mut self, on_error: F)
    where
        F: FnMut(&str),
    {
        let result = self
            .geo_store
            .flush()
            .and_then(|_| self.string_table.flush());
        report(result, on_error);
    }

    fn elevation_provider(&self, quad_key: &QuadKey) -> &dyn ElevationProvider {
        if quad_key.level_of_detail <= SRTM_ELEVATION_LOD_START {
            &self.flat_ele_provider
        } else {
            &self.srtm_ele_provider
        }
    }
}

/// The single error boundary: failures become exactly one callback
/// invocation with the full cause chain rendered into the message.
fn report<F>(result: Result<()>, mut on_error: F)
where
    F: FnMut(&str),
{
    if let Err(e) = result {
        warn!("operation failed: {:#}", e);
        on_error(&format!("{:#}", e));
    }
}
