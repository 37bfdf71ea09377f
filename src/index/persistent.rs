// src/index/persistent.rs
//! On-disk element store.
//!
//! Layout: one file per indexed quadkey, `<root>/<lod>/<x>_<y>.mfe`. A
//! file starts with the `MFE1` magic and continues with length-prefixed
//! zlib blocks, one serialized element per block. Tag keys and values are
//! string-table ids, so the table file and the store directory only make
//! sense as a pair.
//!
//! Writes keep an append handle per target open and batch until `flush`;
//! a search against a key with batched writes flushes that key first so
//! readers never observe a torn tail.

use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use hashbrown::{HashMap, HashSet};
use log::debug;
use miniz_oxide::deflate::compress_to_vec_zlib;
use miniz_oxide::inflate::decompress_to_vec_zlib;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use walkdir::WalkDir;

use super::ElementStore;
use crate::core::{Error, QuadKey, MAX_LEVEL_OF_DETAIL, MIN_LEVEL_OF_DETAIL};
use crate::entities::{Area, Element, Node, Relation, Tag, Way};

const MAGIC: &[u8; 4] = b"MFE1";
const COMPRESSION_LEVEL: u8 = 6;

static FILE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)_(\d+)\.mfe$").unwrap());

pub struct PersistentElementStore {
    root: PathBuf,
    known: HashSet<QuadKey>,
    writers: Mutex<HashMap<QuadKey, BufWriter<File>>>,
}

impl PersistentElementStore {
    /// Opens the store rooted at `root`, creating the per-LoD directory
    /// tree and scanning for tiles written by earlier runs.
    pub fn new(root: &Path) -> Result<Self> {
        for lod in MIN_LEVEL_OF_DETAIL..=MAX_LEVEL_OF_DETAIL {
            std::fs::create_dir_all(root.join(lod.to_string()))
                .with_context(|| format!("create store directory under {}", root.display()))?;
        }

        let mut known = HashSet::new();
        for entry in WalkDir::new(root)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(quad_key) = parse_tile_path(entry.path()) else {
                continue;
            };
            known.insert(quad_key);
        }
        debug!("persistent store {}: {} known tiles", root.display(), known.len());

        Ok(Self {
            root: root.to_path_buf(),
            known,
            writers: Mutex::new(HashMap::new()),
        })
    }

    fn tile_path(&self, quad_key: &QuadKey) -> PathBuf {
        self.root
            .join(quad_key.level_of_detail.to_string())
            .join(format!("{}_{}.mfe", quad_key.tile_x, quad_key.tile_y))
    }
}

fn parse_tile_path(path: &Path) -> Option<QuadKey> {
    let name = path.file_name()?.to_str()?;
    let captures = FILE_NAME.captures(name)?;
    let lod: i32 = path.parent()?.file_name()?.to_str()?.parse().ok()?;
    let quad_key = QuadKey {
        tile_x: captures[1].parse().ok()?,
        tile_y: captures[2].parse().ok()?,
        level_of_detail: lod,
    };
    quad_key.is_valid().then_some(quad_key)
}

impl ElementStore for PersistentElementStore {
    fn store(&mut self, element: &Element, quad_key: &QuadKey) -> Result<()> {
        let path = self.tile_path(quad_key);
        let writers = self.writers.get_mut().unwrap();
        if !writers.contains_key(quad_key) {
            let file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(&path)
                .map_err(|e| Error::StoreIoError(format!("{}: {}", path.display(), e)))?;
            let fresh = file.metadata()?.len() == 0;
            let mut writer = BufWriter::new(file);
            if fresh {
                writer.write_all(MAGIC)?;
            }
            writers.insert(*quad_key, writer);
        }

        let writer = writers.get_mut(quad_key).unwrap();
        let mut payload = Vec::new();
        encode_element(element, &mut payload)?;
        let block = compress_to_vec_zlib(&payload, COMPRESSION_LEVEL);
        writer.write_u32::<LittleEndian>(block.len() as u32)?;
        writer.write_all(&block)?;

        self.known.insert(*quad_key);
        Ok(())
    }

    fn search(
        &self,
        quad_key: &QuadKey,
    ) -> Result<Box<dyn Iterator<Item = Result<Element>> + '_>> {
        if !self.known.contains(quad_key) {
            return Ok(Box::new(std::iter::empty()));
        }

        // Push batched writes for this tile down before reading it back.
        if let Some(writer) = self.writers.lock().unwrap().get_mut(quad_key) {
            writer.flush()?;
        }

        let path = self.tile_path(quad_key);
        let mut reader = BufReader::new(
            File::open(&path)
                .map_err(|e| Error::StoreIoError(format!("{}: {}", path.display(), e)))?,
        );

        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|_| Error::StoreCorrupt(format!("{} is truncated", path.display())))?;
        if &magic != MAGIC {
            return Err(Error::StoreCorrupt(format!("{} has a bad magic", path.display())).into());
        }

        Ok(Box::new(BlockIter {
            reader,
            path,
            done: false,
        }))
    }

    fn has_data(&self, quad_key: &QuadKey) -> bool {
        self.known.contains(quad_key)
    }

    fn flush(&mut self) -> Result<()> {
        let writers = self.writers.get_mut().unwrap();
        for writer in writers.values_mut() {
            writer.flush()?;
        }
        writers.clear();
        Ok(())
    }
}

struct BlockIter {
    reader: BufReader<File>,
    path: PathBuf,
    done: bool,
}

impl Iterator for BlockIter {
    type Item = Result<Element>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let len = match self.reader.read_u32::<LittleEndian>() {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        };

        let mut block = vec![0u8; len];
        if self.reader.read_exact(&mut block).is_err() {
            self.done = true;
            return Some(Err(Error::StoreCorrupt(format!(
                "{} ends mid-block",
                self.path.display()
            ))
            .into()));
        }

        let result = decompress_to_vec_zlib(&block)
            .map_err(|_| {
                anyhow::Error::from(Error::StoreCorrupt(format!(
                    "{} has an unreadable block",
                    self.path.display()
                )))
            })
            .and_then(|payload| decode_element(&mut std::io::Cursor::new(payload)));
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

// Binary element codec. One byte of variant tag, then the fixed fields,
// then counted sequences; relations nest recursively.

const TAG_NODE: u8 = 0;
const TAG_WAY: u8 = 1;
const TAG_AREA: u8 = 2;
const TAG_RELATION: u8 = 3;

fn encode_element(element: &Element, out: &mut Vec<u8>) -> Result<()> {
    match element {
        Element::Node(node) => {
            out.write_u8(TAG_NODE)?;
            out.write_u64::<LittleEndian>(node.id)?;
            encode_tags(&node.tags, out)?;
            out.write_f64::<LittleEndian>(node.coordinate.latitude)?;
            out.write_f64::<LittleEndian>(node.coordinate.longitude)?;
        }
        Element::Way(way) => {
            out.write_u8(TAG_WAY)?;
            out.write_u64::<LittleEndian>(way.id)?;
            encode_tags(&way.tags, out)?;
            encode_coordinates(&way.coordinates, out)?;
        }
        Element::Area(area) => {
            out.write_u8(TAG_AREA)?;
            out.write_u64::<LittleEndian>(area.id)?;
            encode_tags(&area.tags, out)?;
            encode_coordinates(&area.coordinates, out)?;
        }
        Element::Relation(relation) => {
            out.write_u8(TAG_RELATION)?;
            out.write_u64::<LittleEndian>(relation.id)?;
            encode_tags(&relation.tags, out)?;
            out.write_u32::<LittleEndian>(relation.elements.len() as u32)?;
            for child in &relation.elements {
                encode_element(child, out)?;
            }
        }
    }
    Ok(())
}

fn encode_tags(tags: &[Tag], out: &mut Vec<u8>) -> Result<()> {
    out.write_u32::<LittleEndian>(tags.len() as u32)?;
    for tag in tags {
        out.write_u32::<LittleEndian>(tag.key)?;
        out.write_u32::<LittleEndian>(tag.value)?;
    }
    Ok(())
}

fn encode_coordinates(
    coordinates: &[crate::core::GeoCoordinate],
    out: &mut Vec<u8>,
) -> Result<()> {
    out.write_u32::<LittleEndian>(coordinates.len() as u32)?;
    for coordinate in coordinates {
        out.write_f64::<LittleEndian>(coordinate.latitude)?;
        out.write_f64::<LittleEndian>(coordinate.longitude)?;
    }
    Ok(())
}

fn decode_element<R: Read>(reader: &mut R) -> Result<Element> {
    let variant = reader.read_u8()?;
    let id = reader.read_u64::<LittleEndian>()?;
    let tags = decode_tags(reader)?;
    let element = match variant {
        TAG_NODE => Element::Node(Node {
            id,
            tags,
            coordinate: crate::core::GeoCoordinate::new(
                reader.read_f64::<LittleEndian>()?,
                reader.read_f64::<LittleEndian>()?,
            ),
        }),
        TAG_WAY => Element::Way(Way {
            id,
            tags,
            coordinates: decode_coordinates(reader)?,
        }),
        TAG_AREA => Element::Area(Area {
            id,
            tags,
            coordinates: decode_coordinates(reader)?,
        }),
        TAG_RELATION => {
            let count = reader.read_u32::<LittleEndian>()? as usize;
            let mut elements = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                elements.push(decode_element(reader)?);
            }
            Element::Relation(Relation {
                id,
                tags,
                elements,
            })
        }
        other => {
            return Err(
                Error::StoreCorrupt(format!("unknown element variant {}", other)).into(),
            )
        }
    };
    Ok(element)
}

fn decode_tags<R: Read>(reader: &mut R) -> Result<Vec<Tag>> {
    let count = reader.read_u32::<LittleEndian>()? as usize;
    let mut tags = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        tags.push(Tag {
            key: reader.read_u32::<LittleEndian>()?,
            value: reader.read_u32::<LittleEndian>()?,
        });
    }
    Ok(tags)
}

fn decode_coordinates<R: Read>(reader: &mut R) -> Result<Vec<crate::core::GeoCoordinate>> {
    let count = reader.read_u32::<LittleEndian>()? as usize;
    let mut coordinates = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        coordinates.push(crate::core::GeoCoordinate::new(
            reader.read_f64::<LittleEndian>()?,
            reader.read_f64::<LittleEndian>()?,
        ));
    }
    Ok(coordinates)
}
