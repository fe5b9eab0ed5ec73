// Bidirectional slot <-> document id table

use super::super::types::DocId;
use std::collections::HashMap;

/// Bijection between ANN slots and document ids.
///
/// Only live slots are mapped. Both directions are updated together so the
/// table never holds a one-sided entry.
#[derive(Debug, Default, Clone)]
pub(crate) struct IdMapping {
    by_slot: HashMap<usize, DocId>,
    by_doc: HashMap<DocId, usize>,
}

impl IdMapping {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, slot: usize, id: DocId) {
        self.by_doc.insert(id.clone(), slot);
        self.by_slot.insert(slot, id);
    }

    /// Removes `id` in both directions, returning its slot.
    pub(crate) fn remove_doc(&mut self, id: &DocId) -> Option<usize> {
        let slot = self.by_doc.remove(id)?;
        self.by_slot.remove(&slot);
        Some(slot)
    }

    pub(crate) fn slot_of(&self, id: &DocId) -> Option<usize> {
        self.by_doc.get(id).copied()
    }

    pub(crate) fn doc_of(&self, slot: usize) -> Option<&DocId> {
        self.by_slot.get(&slot)
    }

    pub(crate) fn len(&self) -> usize {
        self.by_doc.len()
    }

    /// `(slot, id)` pairs in slot order.
    pub(crate) fn entries(&self) -> Vec<(usize, DocId)> {
        let mut entries: Vec<(usize, DocId)> = self
            .by_slot
            .iter()
            .map(|(&slot, id)| (slot, id.clone()))
            .collect();
        entries.sort_by_key(|(slot, _)| *slot);
        entries
    }

    /// True if the two directions are inverses of each other.
    pub(crate) fn is_bijective(&self) -> bool {
        self.by_slot.len() == self.by_doc.len()
            && self
                .by_slot
                .iter()
                .all(|(slot, id)| self.by_doc.get(id) == Some(slot))
    }
}
