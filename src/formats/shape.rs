// src/formats/shape.rs
//! ESRI shapefile reader.
//!
//! Parses a paired `.shp`/`.dbf` set from one base path and emits visitor
//! events per record. The `.shp` side mixes big-endian bookkeeping with
//! little-endian geometry; the `.dbf` side is a fixed-layout dBASE table
//! whose fields become raw tags.
//!
//! Record dispatch:
//! - point types become node events,
//! - arc types become way events (`is_closed` when the ends coincide);
//!   multi-part arcs are warned about and dropped,
//! - polygon types become relation events of ring members split at the
//!   part-start offsets,
//! - multipoint, multipatch and unknown types are warned about and skipped.

use anyhow::{Context, Result};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use log::{debug, warn};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use super::RawTags;
use crate::core::{Error, GeoCoordinate};

const SHP_FILE_CODE: i32 = 9994;
const SHP_HEADER_LEN: u64 = 100;

const SHAPE_NULL: i32 = 0;
const SHAPE_POINT: i32 = 1;
const SHAPE_ARC: i32 = 3;
const SHAPE_POLYGON: i32 = 5;
const SHAPE_MULTIPOINT: i32 = 8;
const SHAPE_POINT_Z: i32 = 11;
const SHAPE_ARC_Z: i32 = 13;
const SHAPE_POLYGON_Z: i32 = 15;
const SHAPE_MULTIPOINT_Z: i32 = 18;
const SHAPE_POINT_M: i32 = 21;
const SHAPE_ARC_M: i32 = 23;
const SHAPE_POLYGON_M: i32 = 25;
const SHAPE_MULTIPOINT_M: i32 = 28;
const SHAPE_MULTIPATCH: i32 = 31;

/// One part of a polygon record.
#[derive(Debug, Clone)]
pub struct PolygonMember {
    pub is_ring: bool,
    pub coordinates: Vec<GeoCoordinate>,
}

/// Receiver of normalised shapefile records.
pub trait ShapeVisitor {
    fn visit_node(&mut self, coordinate: GeoCoordinate, tags: RawTags) -> Result<()>;
    fn visit_way(
        &mut self,
        coordinates: Vec<GeoCoordinate>,
        tags: RawTags,
        is_closed: bool,
    ) -> Result<()>;
    fn visit_relation(&mut self, members: Vec<PolygonMember>, tags: RawTags) -> Result<()>;
}

#[derive(Default)]
pub struct ShapeParser;

impl ShapeParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses the `.shp`/`.dbf` pair at `path` (either file of the pair, or
    /// the bare base path) and streams records into `visitor`.
    pub fn parse<V: ShapeVisitor>(&self, path: &Path, visitor: &mut V) -> Result<()> {
        let shp_path = path.with_extension("shp");
        let dbf_path = path.with_extension("dbf");

        let shp_file =
            File::open(&shp_path).map_err(|_| Error::ShpOpenFailed(shp_path.clone()))?;
        let mut shp = BufReader::new(shp_file);
        read_shp_header(&mut shp, &shp_path)?;
        let entity_count = count_entities(&mut shp)?;
        shp.seek(SeekFrom::Start(SHP_HEADER_LEN))?;

        let dbf_file =
            File::open(&dbf_path).map_err(|_| Error::ShpOpenFailed(dbf_path.clone()))?;
        let mut dbf = Dbf::open(BufReader::new(dbf_file), &dbf_path)?;
        if dbf.fields.is_empty() {
            return Err(Error::DbfNoFields(dbf_path).into());
        }
        if entity_count != dbf.record_count {
            return Err(Error::DbfCountMismatch {
                shp: entity_count,
                dbf: dbf.record_count,
            }
            .into());
        }

        for record in 0..entity_count {
            let content =
                read_record_content(&mut shp).map_err(|_| Error::ShapeReadFailed(record))?;
            let tags = dbf.read_tags(record)?;
            dispatch_shape(&content, tags, visitor)
                .with_context(|| format!("record {} of {}", record, shp_path.display()))?;
        }
        Ok(())
    }
}

fn read_shp_header<R: Read>(reader: &mut R, path: &Path) -> Result<()> {
    let file_code = reader.read_i32::<BigEndian>()?;
    if file_code != SHP_FILE_CODE {
        return Err(Error::ShpOpenFailed(path.to_path_buf()).into());
    }
    let mut skip = [0u8; 20];
    reader.read_exact(&mut skip)?;
    let _file_length_words = reader.read_i32::<BigEndian>()?;
    let _version = reader.read_i32::<LittleEndian>()?;
    let _shape_type = reader.read_i32::<LittleEndian>()?;
    let mut bounds = [0f64; 8];
    for bound in &mut bounds {
        *bound = reader.read_f64::<LittleEndian>()?;
    }
    debug!(
        "{}: bounds x [{}, {}] y [{}, {}]",
        path.display(),
        bounds[0],
        bounds[2],
        bounds[1],
        bounds[3]
    );
    Ok(())
}

/// The `.shx` index is not required: one cheap skip-scan of the record
/// headers yields the entity count.
fn count_entities<R: Read + Seek>(shp: &mut R) -> Result<usize> {
    let mut count = 0usize;
    loop {
        let _record_number = match shp.read_i32::<BigEndian>() {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        let content_words = shp.read_i32::<BigEndian>()?;
        shp.seek(SeekFrom::Current(content_words as i64 * 2))?;
        count += 1;
    }
    Ok(count)
}

fn read_record_content<R: Read>(shp: &mut R) -> Result<Vec<u8>> {
    let _record_number = shp.read_i32::<BigEndian>()?;
    let content_words = shp.read_i32::<BigEndian>()?;
    let mut content = vec![0u8; content_words as usize * 2];
    shp.read_exact(&mut content)?;
    Ok(content)
}

fn dispatch_shape<V: ShapeVisitor>(content: &[u8], tags: RawTags, visitor: &mut V) -> Result<()> {
    let mut cursor = Cursor::new(content);
    let shape_type = cursor.read_i32::<LittleEndian>()?;

    match shape_type {
        SHAPE_POINT | SHAPE_POINT_Z | SHAPE_POINT_M => {
            let x = cursor.read_f64::<LittleEndian>()?;
            let y = cursor.read_f64::<LittleEndian>()?;
            visitor.visit_node(GeoCoordinate::new(y, x), tags)
        }
        SHAPE_ARC | SHAPE_ARC_Z | SHAPE_ARC_M => {
            let (part_starts, points) = read_poly_payload(&mut cursor)?;
            if part_starts.len() > 1 {
                warn!("arc record has {} parts; dropping it", part_starts.len());
                return Ok(());
            }
            let is_closed = points.len() > 1 && points.first() == points.last();
            visitor.visit_way(points, tags, is_closed)
        }
        SHAPE_POLYGON | SHAPE_POLYGON_Z | SHAPE_POLYGON_M => {
            let (part_starts, points) = read_poly_payload(&mut cursor)?;
            let mut members = Vec::with_capacity(part_starts.len());
            for (index, &start) in part_starts.iter().enumerate() {
                let end = part_starts
                    .get(index + 1)
                    .copied()
                    .unwrap_or(points.len());
                members.push(PolygonMember {
                    // Polygon parts are always rings; only multipatch
                    // records carry other part types.
                    is_ring: true,
                    coordinates: points[start..end].to_vec(),
                });
            }
            visitor.visit_relation(members, tags)
        }
        SHAPE_MULTIPOINT | SHAPE_MULTIPOINT_Z | SHAPE_MULTIPOINT_M | SHAPE_MULTIPATCH => {
            warn!("unsupported shape type {}", shape_type);
            Ok(())
        }
        SHAPE_NULL => Ok(()),
        other => {
            warn!("unknown shape type {}", other);
            Ok(())
        }
    }
}

/// Shared payload of arc and polygon records: bbox, part offsets, points.
fn read_poly_payload(cursor: &mut Cursor<&[u8]>) -> Result<(Vec<usize>, Vec<GeoCoordinate>)> {
    let mut bbox = [0f64; 4];
    for bound in &mut bbox {
        *bound = cursor.read_f64::<LittleEndian>()?;
    }
    let part_count = cursor.read_i32::<LittleEndian>()? as usize;
    let point_count = cursor.read_i32::<LittleEndian>()? as usize;

    let mut part_starts = Vec::with_capacity(part_count);
    for _ in 0..part_count {
        part_starts.push(cursor.read_i32::<LittleEndian>()? as usize);
    }

    let mut points = Vec::with_capacity(point_count);
    for _ in 0..point_count {
        let x = cursor.read_f64::<LittleEndian>()?;
        let y = cursor.read_f64::<LittleEndian>()?;
        points.push(GeoCoordinate::new(y, x));
    }
    Ok((part_starts, points))
}

#[derive(Debug)]
struct DbfField {
    title: String,
    field_type: u8,
    length: usize,
    decimals: u8,
}

struct Dbf<R> {
    reader: R,
    fields: Vec<DbfField>,
    record_count: usize,
    header_size: u64,
    record_size: usize,
}

impl<R: Read + Seek> Dbf<R> {
    fn open(mut reader: R, path: &Path) -> Result<Self> {
        let _version = reader.read_u8()?;
        let mut date = [0u8; 3];
        reader.read_exact(&mut date)?;
        let record_count = reader.read_u32::<LittleEndian>()? as usize;
        let header_size = reader.read_u16::<LittleEndian>()? as u64;
        let record_size = reader.read_u16::<LittleEndian>()? as usize;
        let mut reserved = [0u8; 20];
        reader.read_exact(&mut reserved)?;

        let mut fields = Vec::new();
        loop {
            let mut descriptor = [0u8; 1];
            reader.read_exact(&mut descriptor)?;
            if descriptor[0] == 0x0d {
                break;
            }
            let mut rest = [0u8; 31];
            reader.read_exact(&mut rest)?;

            let mut name_bytes = [0u8; 11];
            name_bytes[0] = descriptor[0];
            name_bytes[1..].copy_from_slice(&rest[..10]);
            let title = name_bytes
                .iter()
                .take_while(|&&b| b != 0)
                .map(|&b| b as char)
                .collect::<String>()
                .trim()
                .to_string();

            fields.push(DbfField {
                title,
                field_type: rest[10],
                length: rest[15] as usize,
                decimals: rest[16],
            });
            if fields.len() > 255 {
                return Err(Error::StoreCorrupt(format!(
                    "{} has an unterminated field table",
                    path.display()
                ))
                .into());
            }
        }

        Ok(Self {
            reader,
            fields,
            record_count,
            header_size,
            record_size,
        })
    }

    /// Reads record `index` and converts non-NULL fields to raw tags.
    fn read_tags(&mut self, index: usize) -> Result<RawTags> {
        let offset = self.header_size + (index * self.record_size) as u64;
        self.reader.seek(SeekFrom::Start(offset))?;
        let mut record = vec![0u8; self.record_size];
        self.reader.read_exact(&mut record)?;

        let mut tags = RawTags::with_capacity(self.fields.len());
        let mut position = 1; // record starts with the deletion flag
        for field in &self.fields {
            let raw = &record[position..position + field.length];
            position += field.length;

            let text: String = raw.iter().map(|&b| b as char).collect();
            let trimmed = text.trim();
            // NULL attributes read back as blanks or asterisks.
            if trimmed.is_empty() || trimmed.bytes().all(|b| b == b'*') {
                continue;
            }

            let value = match field.field_type {
                b'C' => Some(trimmed.to_string()),
                b'N' if field.decimals == 0 => {
                    trimmed.parse::<i64>().ok().map(|v| v.to_string())
                }
                b'N' | b'F' => trimmed.parse::<f64>().ok().map(|v| v.to_string()),
                _ => None,
            };
            if let Some(value) = value {
                tags.push((field.title.clone(), value));
            }
        }
        Ok(tags)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::path::PathBuf;

    #[derive(Default)]
    struct Recorder {
        nodes: Vec<GeoCoordinate>,
        ways: Vec<(usize, bool)>,
        relations: Vec<usize>,
        tags: Vec<RawTags>,
    }

    impl ShapeVisitor for Recorder {
        fn visit_node(&mut self, coordinate: GeoCoordinate, tags: RawTags) -> Result<()> {
            self.nodes.push(coordinate);
            self.tags.push(tags);
            Ok(())
        }
        fn visit_way(
            &mut self,
            coordinates: Vec<GeoCoordinate>,
            tags: RawTags,
            is_closed: bool,
        ) -> Result<()> {
            self.ways.push((coordinates.len(), is_closed));
            self.tags.push(tags);
            Ok(())
        }
        fn visit_relation(&mut self, members: Vec<PolygonMember>, tags: RawTags) -> Result<()> {
            assert!(members.iter().all(|m| m.is_ring));
            self.relations.push(members.len());
            self.tags.push(tags);
            Ok(())
        }
    }

    fn temp_base(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("mapforge-shape-{}-{}", std::process::id(), name));
        path
    }

    #[test]
    fn test_parse_mixed_records() {
        let base = temp_base("mixed");
        let shp_path = base.with_extension("shp");
        let dbf_path = base.with_extension("dbf");

        let closed_arc = poly_content(
            SHAPE_ARC,
            &[0],
            &[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)],
        );
        let multi_part_arc = poly_content(
            SHAPE_ARC,
            &[0, 2],
            &[(0.0, 0.0), (1.0, 0.0), (5.0, 5.0), (6.0, 5.0)],
        );
        let two_ring_polygon = poly_content(
            SHAPE_POLYGON,
            &[0, 5],
            &[
                (0.0, 0.0),
                (0.0, 10.0),
                (10.0, 10.0),
                (10.0, 0.0),
                (0.0, 0.0),
                (4.0, 4.0),
                (6.0, 4.0),
                (6.0, 6.0),
                (4.0, 4.0),
            ],
        );
        write_shp(
            &shp_path,
            &[
                point_content(13.4, 52.5),
                closed_arc,
                multi_part_arc,
                two_ring_polygon,
            ],
        );
        write_dbf(&dbf_path, &["poi", "wall", "bad", "house"]);

        let mut recorder = Recorder::default();
        ShapeParser::new().parse(&base, &mut recorder).unwrap();

        assert_eq!(recorder.nodes, vec![GeoCoordinate::new(52.5, 13.4)]);
        // The closed arc arrives as a way flagged closed; the multi-part
        // arc is dropped without failing the parse.
        assert_eq!(recorder.ways, vec![(4, true)]);
        assert_eq!(recorder.relations, vec![2]);
        assert_eq!(recorder.tags.len(), 3);
        assert_eq!(recorder.tags[0], vec![("kind".to_string(), "poi".to_string())]);

        let _ = std::fs::remove_file(&shp_path);
        let _ = std::fs::remove_file(&dbf_path);
    }

    #[test]
    fn test_count_mismatch_is_rejected() {
        let base = temp_base("mismatch");
        write_shp(&base.with_extension("shp"), &[point_content(1.0, 2.0)]);
        write_dbf(&base.with_extension("dbf"), &["a", "b"]);

        let mut recorder = Recorder::default();
        let err = ShapeParser::new()
            .parse(&base, &mut recorder)
            .unwrap_err()
            .to_string();
        assert!(err.contains("DbfCountMismatch"), "{}", err);

        let _ = std::fs::remove_file(base.with_extension("shp"));
        let _ = std::fs::remove_file(base.with_extension("dbf"));
    }

    #[test]
    fn test_missing_shp_is_open_failure() {
        let base = temp_base("absent");
        let mut recorder = Recorder::default();
        let err = ShapeParser::new()
            .parse(&base, &mut recorder)
            .unwrap_err()
            .to_string();
        assert!(err.contains("ShpOpenFailed"), "{}", err);
    }
}
