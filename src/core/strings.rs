// src/core/strings.rs
//! Interned string table with stable, file-backed ids.
//!
//! Tag keys and values are stored as `u32` ids everywhere downstream; the
//! backing file makes those ids durable so the persistent element store can
//! reference them across runs.
//!
//! Layout: a flat sequence of `u32` little-endian length + UTF-8 payload
//! records. The record index is the id.

use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use hashbrown::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::sync::Mutex;

use super::Error;

pub struct StringTable {
    inner: Mutex<Inner>,
}

struct Inner {
    ids: HashMap<String, u32>,
    strings: Vec<String>,
    file: File,
}

impl StringTable {
    /// Opens (or creates) the table at `path` and replays existing records.
    pub fn new(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .with_context(|| format!("open string table {}", path.display()))?;

        let mut ids = HashMap::new();
        let mut strings = Vec::new();

        let mut reader = BufReader::new(&file);
        loop {
            let len = match reader.read_u32::<LittleEndian>() {
                Ok(len) => len as usize,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };
            let mut buf = vec![0u8; len];
            reader
                .read_exact(&mut buf)
                .map_err(|_| Error::StoreCorrupt(format!("truncated string table {}", path.display())))?;
            let value = String::from_utf8(buf)
                .map_err(|_| Error::StoreCorrupt(format!("non-utf8 record in {}", path.display())))?;
            ids.insert(value.clone(), strings.len() as u32);
            strings.push(value);
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                ids,
                strings,
                file,
            }),
        })
    }

    /// Returns the id of `value`, interning it on first sight.
    pub fn get_id(&self, value: &str) -> Result<u32> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&id) = inner.ids.get(value) {
            return Ok(id);
        }

        let id = inner.strings.len() as u32;
        inner.file.write_u32::<LittleEndian>(value.len() as u32)?;
        inner.file.write_all(value.as_bytes())?;
        inner.ids.insert(value.to_string(), id);
        inner.strings.push(value.to_string());
        Ok(id)
    }

    /// Reverse lookup; `None` for ids this table never produced.
    pub fn get_string(&self, id: u32) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.strings.get(id as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flushes pending record writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().unwrap().file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("mapforge-strings-{}-{}", std::process::id(), name));
        path
    }

    #[test]
    fn test_ids_are_stable() {
        let path = temp_path("stable");
        let _ = std::fs::remove_file(&path);

        let table = StringTable::new(&path).unwrap();
        let a = table.get_id("building").unwrap();
        let b = table.get_id("height").unwrap();
        assert_ne!(a, b);
        assert_eq!(table.get_id("building").unwrap(), a);
        assert_eq!(table.get_string(b).as_deref(), Some("height"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_ids_survive_reopen() {
        let path = temp_path("reopen");
        let _ = std::fs::remove_file(&path);

        let first = {
            let table = StringTable::new(&path).unwrap();
            table.get_id("roof-type").unwrap()
        };

        let table = StringTable::new(&path).unwrap();
        assert_eq!(table.get_id("roof-type").unwrap(), first);
        assert_eq!(table.len(), 1);

        let _ = std::fs::remove_file(&path);
    }
}
