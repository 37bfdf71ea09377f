// src/mapcss/mod.rs
//! Stylesheet model and resolution.
//!
//! The dialect accepted here is the MapCSS-like subset the pipeline needs:
//!
//! ```text
//! @import "common.mapcss";
//!
//! area|z14-18[building=true] {
//!     builders: building;
//!     height: 12;
//!     facade-color: gradient(#00ff00, #007700 50%, #003300);
//! }
//! ```
//!
//! Selectors name an element kind (`node`, `way`, `area`, `relation` or
//! `element` for any), an optional `|zN` / `|zN-M` zoom range and zero or
//! more `[key]` / `[key=value]` / `[key!=value]` predicates. Predicate keys
//! and values are interned against the string table at parse time, so
//! matching an element is pure id comparison.

use anyhow::Result;
use hashbrown::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::core::{Error, StringTable};
use crate::entities::{tag_value, Element, Tags};

const MAX_IMPORT_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SelectorKind {
    Node,
    Way,
    Area,
    Relation,
    Any,
}

#[derive(Debug, Clone)]
enum Predicate {
    Exists { key: u32 },
    Equals { key: u32, value: u32 },
    NotEquals { key: u32, value: u32 },
}

#[derive(Debug, Clone)]
struct Selector {
    kind: SelectorKind,
    zoom: Option<(i32, i32)>,
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone)]
struct Rule {
    selectors: Vec<Selector>,
    declarations: Vec<(String, String)>,
}

/// Resolved declarations for one element at one level of detail.
#[derive(Debug, Clone, Default)]
pub struct Style {
    declarations: HashMap<String, String>,
}

impl Style {
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.declarations.get(key).map(String::as_str)
    }

    /// Numeric declaration; missing or unparsable values resolve to zero,
    /// matching the lenient lexical-cast behaviour map styles rely on.
    pub fn get_value(&self, key: &str) -> f64 {
        self.declarations
            .get(key)
            .and_then(|value| value.trim().parse::<f64>().ok())
            .unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

/// A parsed stylesheet ready to match elements.
#[derive(Debug)]
pub struct StyleProvider {
    rules: Vec<Rule>,
}

impl StyleProvider {
    /// Parses `path`, resolving `@import` directives relative to its parent
    /// directory.
    pub fn parse_file(path: &Path, string_table: &StringTable) -> Result<Self> {
        let mut rules = Vec::new();
        parse_into(path, string_table, &mut rules, 0)?;
        Ok(Self { rules })
    }

    #[cfg(test)]
    pub(crate) fn parse_str(source: &str, string_table: &StringTable) -> Result<Self> {
        let mut rules = Vec::new();
        parse_source(source, Path::new("<inline>"), None, string_table, &mut rules, 0)?;
        Ok(Self { rules })
    }

    /// Merged declarations of every rule matching `element` at `lod`.
    /// Later rules override earlier ones, in file order.
    pub fn for_element(&self, element: &Element, lod: i32) -> Style {
        let mut style = Style::default();
        for rule in &self.rules {
            if rule_matches(rule, element, lod) {
                for (key, value) in &rule.declarations {
                    style.declarations.insert(key.clone(), value.clone());
                }
            }
        }
        style
    }

    /// Admission test used by both ingestion and the element callback.
    pub fn has_style(&self, element: &Element, lod: i32) -> bool {
        self.rules.iter().any(|rule| rule_matches(rule, element, lod))
    }
}

fn rule_matches(rule: &Rule, element: &Element, lod: i32) -> bool {
    rule.selectors
        .iter()
        .any(|selector| selector_matches(selector, element, lod))
}

fn selector_matches(selector: &Selector, element: &Element, lod: i32) -> bool {
    let kind_ok = match selector.kind {
        SelectorKind::Any => true,
        SelectorKind::Node => matches!(element, Element::Node(_)),
        SelectorKind::Way => matches!(element, Element::Way(_)),
        SelectorKind::Area => matches!(element, Element::Area(_)),
        SelectorKind::Relation => matches!(element, Element::Relation(_)),
    };
    if !kind_ok {
        return false;
    }
    if let Some((start, end)) = selector.zoom {
        if lod < start || lod > end {
            return false;
        }
    }
    selector
        .predicates
        .iter()
        .all(|predicate| predicate_matches(predicate, element.tags()))
}

fn predicate_matches(predicate: &Predicate, tags: &Tags) -> bool {
    match *predicate {
        Predicate::Exists { key } => tag_value(tags, key).is_some(),
        Predicate::Equals { key, value } => tag_value(tags, key) == Some(value),
        Predicate::NotEquals { key, value } => tag_value(tags, key) != Some(value),
    }
}

fn parse_into(
    path: &Path,
    string_table: &StringTable,
    rules: &mut Vec<Rule>,
    depth: usize,
) -> Result<()> {
    let source = std::fs::read_to_string(path)
        .map_err(|_| Error::StyleNotReadable(path.to_path_buf()))?;
    let base_dir = path.parent().map(Path::to_path_buf);
    parse_source(&source, path, base_dir.as_deref(), string_table, rules, depth)
}

fn parse_source(
    source: &str,
    path: &Path,
    base_dir: Option<&Path>,
    string_table: &StringTable,
    rules: &mut Vec<Rule>,
    depth: usize,
) -> Result<()> {
    let fail = |line: usize, message: String| -> anyhow::Error {
        Error::StyleParseFailed {
            path: path.to_path_buf(),
            line,
            message,
        }
        .into()
    };

    let mut pending_selectors = String::new();
    let mut in_block = false;
    let mut block_selectors: Vec<Selector> = Vec::new();
    let mut declarations: Vec<(String, String)> = Vec::new();

    for (index, raw_line) in source.lines().enumerate() {
        let line_no = index + 1;
        let line = match raw_line.find("//") {
            Some(pos) => &raw_line[..pos],
            None => raw_line,
        }
        .trim();
        if line.is_empty() {
            continue;
        }

        if !in_block && line.starts_with("@import") {
            let target = line
                .trim_start_matches("@import")
                .trim()
                .trim_end_matches(';')
                .trim()
                .trim_matches('"');
            if depth + 1 > MAX_IMPORT_DEPTH {
                return Err(fail(line_no, "import nesting too deep".into()));
            }
            let import_path = match base_dir {
                Some(dir) => dir.join(target),
                None => PathBuf::from(target),
            };
            parse_into(&import_path, string_table, rules, depth + 1)?;
            continue;
        }

        if !in_block {
            if let Some(brace) = line.find('{') {
                pending_selectors.push_str(&line[..brace]);
                block_selectors = pending_selectors
                    .split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(|part| parse_selector(part, string_table).map_err(|m| fail(line_no, m)))
                    .collect::<Result<Vec<_>>>()?;
                if block_selectors.is_empty() {
                    return Err(fail(line_no, "rule without selector".into()));
                }
                pending_selectors.clear();
                declarations.clear();
                in_block = true;
                // Declarations may start on the same line after the brace.
                let rest = line[brace + 1..].trim();
                if let Some(end) = rest.find('}') {
                    parse_declarations(&rest[..end], &mut declarations)
                        .map_err(|m| fail(line_no, m))?;
                    rules.push(Rule {
                        selectors: std::mem::take(&mut block_selectors),
                        declarations: std::mem::take(&mut declarations),
                    });
                    in_block = false;
                } else if !rest.is_empty() {
                    parse_declarations(rest, &mut declarations).map_err(|m| fail(line_no, m))?;
                }
            } else {
                pending_selectors.push_str(line);
                pending_selectors.push(' ');
            }
            continue;
        }

        // Inside a block.
        if let Some(end) = line.find('}') {
            parse_declarations(&line[..end], &mut declarations).map_err(|m| fail(line_no, m))?;
            rules.push(Rule {
                selectors: std::mem::take(&mut block_selectors),
                declarations: std::mem::take(&mut declarations),
            });
            in_block = false;
        } else {
            parse_declarations(line, &mut declarations).map_err(|m| fail(line_no, m))?;
        }
    }

    if in_block || !pending_selectors.trim().is_empty() {
        return Err(fail(source.lines().count(), "unterminated rule".into()));
    }
    Ok(())
}

fn parse_selector(text: &str, string_table: &StringTable) -> std::result::Result<Selector, String> {
    let bracket = text.find('[').unwrap_or(text.len());
    let (head, tail) = text.split_at(bracket);

    let mut head_parts = head.trim().splitn(2, '|');
    let kind = match head_parts.next().unwrap_or("").trim() {
        "node" => SelectorKind::Node,
        "way" => SelectorKind::Way,
        "area" => SelectorKind::Area,
        "relation" => SelectorKind::Relation,
        "element" | "*" => SelectorKind::Any,
        other => return Err(format!("unknown selector kind '{}'", other)),
    };

    let zoom = match head_parts.next() {
        Some(zoom_text) => {
            let zoom_text = zoom_text.trim();
            let digits = zoom_text
                .strip_prefix('z')
                .ok_or_else(|| format!("bad zoom qualifier '{}'", zoom_text))?;
            let mut bounds = digits.splitn(2, '-');
            let start: i32 = bounds
                .next()
                .unwrap_or("")
                .parse()
                .map_err(|_| format!("bad zoom qualifier '{}'", zoom_text))?;
            let end: i32 = match bounds.next() {
                Some(end) => end
                    .parse()
                    .map_err(|_| format!("bad zoom qualifier '{}'", zoom_text))?,
                None => start,
            };
            Some((start, end))
        }
        None => None,
    };

    let mut predicates = Vec::new();
    let mut rest = tail.trim();
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return Err(format!("expected '[' in '{}'", text));
        }
        let close = rest
            .find(']')
            .ok_or_else(|| format!("unterminated predicate in '{}'", text))?;
        let body = &rest[1..close];
        let intern = |s: &str| {
            string_table
                .get_id(s)
                .map_err(|e| format!("string table failure: {}", e))
        };
        let predicate = if let Some(eq) = body.find("!=") {
            Predicate::NotEquals {
                key: intern(body[..eq].trim())?,
                value: intern(body[eq + 2..].trim())?,
            }
        } else if let Some(eq) = body.find('=') {
            Predicate::Equals {
                key: intern(body[..eq].trim())?,
                value: intern(body[eq + 1..].trim())?,
            }
        } else {
            Predicate::Exists {
                key: intern(body.trim())?,
            }
        };
        predicates.push(predicate);
        rest = rest[close + 1..].trim();
    }

    Ok(Selector {
        kind,
        zoom,
        predicates,
    })
}

fn parse_declarations(
    text: &str,
    declarations: &mut Vec<(String, String)>,
) -> std::result::Result<(), String> {
    for part in text.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let colon = part
            .find(':')
            .ok_or_else(|| format!("declaration '{}' is missing ':'", part))?;
        let key = part[..colon].trim();
        let value = part[colon + 1..].trim();
        if key.is_empty() {
            return Err(format!("declaration '{}' has an empty key", part));
        }
        declarations.push((key.to_string(), value.to_string()));
    }
    Ok(())
}

/// Lazily parsed, path-keyed provider cache.
///
/// The mutex serialises first-miss parsing; hits hand out the same `Arc`
/// for the lifetime of the application.
pub struct StyleProviderCache {
    providers: Mutex<HashMap<PathBuf, Arc<StyleProvider>>>,
}

impl StyleProviderCache {
    pub fn new() -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, path: &Path, string_table: &StringTable) -> Result<Arc<StyleProvider>> {
        let key = path
            .canonicalize()
            .map_err(|_| Error::StyleNotReadable(path.to_path_buf()))?;

        let mut providers = self.providers.lock().unwrap();
        if let Some(provider) = providers.get(&key) {
            return Ok(provider.clone());
        }
        let provider = Arc::new(StyleProvider::parse_file(&key, string_table)?);
        providers.insert(key, provider.clone());
        Ok(provider)
    }
}

impl Default for StyleProviderCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GeoCoordinate;
    use crate::entities::{Area, Node, Tag};

    fn table() -> StringTable {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let mut path = std::env::temp_dir();
        path.push(format!(
            "mapforge-mapcss-{}-{}.bin",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = std::fs::remove_file(&path);
        StringTable::new(&path).unwrap()
    }

    fn area_with(table: &StringTable, pairs: &[(&str, &str)]) -> Element {
        let mut tags: Tags = pairs
            .iter()
            .map(|(k, v)| Tag {
                key: table.get_id(k).unwrap(),
                value: table.get_id(v).unwrap(),
            })
            .collect();
        crate::entities::normalize_tags(&mut tags);
        Element::Area(Area {
            id: 1,
            tags,
            coordinates: vec![GeoCoordinate::new(0.0, 0.0)],
        })
    }

    #[test]
    fn test_selector_kind_and_zoom() {
        let table = table();
        let provider = StyleProvider::parse_str(
            "area|z14-16[building=true] { height: 12; }",
            &table,
        )
        .unwrap();

        let building = area_with(&table, &[("building", "true")]);
        assert!(provider.has_style(&building, 15));
        assert!(!provider.has_style(&building, 13));
        assert_eq!(provider.for_element(&building, 15).get_value("height"), 12.0);

        let node = Element::Node(Node {
            id: 2,
            tags: building.tags().clone(),
            coordinate: GeoCoordinate::new(0.0, 0.0),
        });
        assert!(!provider.has_style(&node, 15));
    }

    #[test]
    fn test_later_rule_overrides() {
        let table = table();
        let provider = StyleProvider::parse_str(
            "area[building] { height: 5; color: #ff0000; }\n\
             area[building=true] { height: 9; }",
            &table,
        )
        .unwrap();
        let building = area_with(&table, &[("building", "true")]);
        let style = provider.for_element(&building, 10);
        assert_eq!(style.get_value("height"), 9.0);
        assert_eq!(style.get_string("color"), Some("#ff0000"));
    }

    #[test]
    fn test_not_equals_predicate() {
        let table = table();
        let provider =
            StyleProvider::parse_str("way[barrier!=no] { builders: barrier; }", &table).unwrap();
        let fence = {
            let mut tags = vec![Tag {
                key: table.get_id("barrier").unwrap(),
                value: table.get_id("fence").unwrap(),
            }];
            crate::entities::normalize_tags(&mut tags);
            Element::Way(crate::entities::Way {
                id: 3,
                tags,
                coordinates: Vec::new(),
            })
        };
        assert!(provider.has_style(&fence, 10));
    }

    #[test]
    fn test_missing_value_resolves_to_zero() {
        let table = table();
        let provider = StyleProvider::parse_str("area { height: tall; }", &table).unwrap();
        let any = area_with(&table, &[]);
        let style = provider.for_element(&any, 1);
        assert_eq!(style.get_value("height"), 0.0);
        assert_eq!(style.get_value("min-height"), 0.0);
    }

    #[test]
    fn test_parse_error_reports_line() {
        let table = table();
        let err = StyleProvider::parse_str("area { height 12; }", &table).unwrap_err();
        assert!(err.to_string().contains("StyleParseFailed"));
    }

    #[test]
    fn test_cache_parses_once_and_shares() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let path = std::env::temp_dir().join(format!(
            "mapforge-mapcss-cache-{}-{}.mapcss",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&path, "area { color: #123456; }").unwrap();

        let table = table();
        let cache = StyleProviderCache::new();
        let first = cache.get(&path, &table).unwrap();
        let second = cache.get(&path, &table).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_cache_rejects_missing_file() {
        let table = table();
        let cache = StyleProviderCache::new();
        let missing = std::env::temp_dir().join("mapforge-mapcss-absent.mapcss");
        let err = cache.get(&missing, &table).unwrap_err().to_string();
        assert!(err.contains("StyleNotReadable"), "{}", err);
    }
}
