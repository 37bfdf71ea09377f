// src/index/memory.rs
//! Volatile element store backed by a per-quadkey map.

use anyhow::Result;
use hashbrown::HashMap;

use super::ElementStore;
use crate::core::QuadKey;
use crate::entities::Element;

#[derive(Default)]
pub struct InMemoryElementStore {
    elements: HashMap<QuadKey, Vec<Element>>,
}

impl InMemoryElementStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ElementStore for InMemoryElementStore {
    fn store(&mut self, element: &Element, quad_key: &QuadKey) -> Result<()> {
        self.elements
            .entry(*quad_key)
            .or_default()
            .push(element.clone());
        Ok(())
    }

    fn search(
        &self,
        quad_key: &QuadKey,
    ) -> Result<Box<dyn Iterator<Item = Result<Element>> + '_>> {
        match self.elements.get(quad_key) {
            Some(elements) => Ok(Box::new(elements.iter().cloned().map(Ok))),
            None => Ok(Box::new(std::iter::empty())),
        }
    }

    fn has_data(&self, quad_key: &QuadKey) -> bool {
        self.elements.contains_key(quad_key)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
