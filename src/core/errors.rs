// src/core/errors.rs
//! Typed failure kinds of the tile-build pipeline.
//!
//! Every message leads with the kind name so that callers receiving the
//! rendered string through an error callback can still tell kinds apart.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("StyleNotReadable: cannot read stylesheet {0}")]
    StyleNotReadable(PathBuf),

    #[error("StyleParseFailed: {path}:{line}: {message}")]
    StyleParseFailed {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("ShpOpenFailed: cannot open shape file {0}")]
    ShpOpenFailed(PathBuf),

    #[error("DbfNoFields: there are no fields in dbf table {0}")]
    DbfNoFields(PathBuf),

    #[error("DbfCountMismatch: shp has {shp} entities but dbf has {dbf} records")]
    DbfCountMismatch { shp: usize, dbf: usize },

    #[error("ShapeReadFailed: unable to read shape record {0}")]
    ShapeReadFailed(usize),

    #[error("UnknownRoofType: no roof builder registered for '{0}'")]
    UnknownRoofType(String),

    #[error("UnknownFacadeType: no facade builder registered for '{0}'")]
    UnknownFacadeType(String),

    #[error("MalformedRelation: unexpected element {0} in multipolygon")]
    MalformedRelation(u64),

    #[error("StoreIoError: {0}")]
    StoreIoError(String),

    #[error("StoreCorrupt: {0}")]
    StoreCorrupt(String),

    #[error("InvalidQuadKey: ({0}, {1}) is out of range at detail level {2}")]
    InvalidQuadKey(i32, i32, i32),

    #[error("InvalidLodRange: [{0}, {1}] is not a valid detail range")]
    InvalidLodRange(i32, i32),

    #[error("UnsupportedFormat: no importer for {0}")]
    UnsupportedFormat(PathBuf),

    #[error("NotImplemented: {0}")]
    NotImplemented(&'static str),
}
