//! Lexical snapshot plus the set of documents it no longer describes.
//!
//! Every mutation stamps the touched id with a fresh epoch. A rebuild
//! records the epoch it started from; when its snapshot is installed only
//! stamps newer than that survive, because the listing it was built from
//! already reflects the older ones.

use crate::search::lexical::LexicalIndex;
use crate::search::types::DocId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
pub(super) struct LexicalState {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    snapshot: Option<Arc<LexicalIndex>>,
    /// id -> epoch of its latest mutation
    stale: HashMap<DocId, u64>,
    epoch: u64,
    /// Epoch the installed snapshot was listed at
    built_at: u64,
}

/// What a search sees: the snapshot and the ids to keep out of it.
pub(super) struct LexicalView {
    pub snapshot: Option<Arc<LexicalIndex>>,
    pub excluded: HashSet<DocId>,
}

impl LexicalState {
    pub fn new() -> Self {
        Self::default()
    }

    // The lock guards only plain data with no cross-field invariant a
    // panic could break, so a poisoned lock is still usable.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn view(&self) -> LexicalView {
        let inner = self.read();
        LexicalView {
            snapshot: inner.snapshot.clone(),
            excluded: inner.stale.keys().cloned().collect(),
        }
    }

    pub fn snapshot(&self) -> Option<Arc<LexicalIndex>> {
        self.read().snapshot.clone()
    }

    /// Excludes `id` from lexical ranking until a rebuild listed after
    /// this call is installed.
    pub fn mark_stale(&self, id: &DocId) {
        let mut inner = self.write();
        inner.epoch += 1;
        let epoch = inner.epoch;
        inner.stale.insert(id.clone(), epoch);
    }

    /// Epoch to pass to [`install`](Self::install) for a listing taken now.
    pub fn current_epoch(&self) -> u64 {
        self.read().epoch
    }

    /// Swaps in a snapshot built from a listing taken at `listed_at`.
    ///
    /// Returns false, leaving state untouched, if a snapshot from a later
    /// listing is already installed.
    pub fn install(&self, snapshot: Option<Arc<LexicalIndex>>, listed_at: u64) -> bool {
        let mut inner = self.write();
        if listed_at < inner.built_at {
            return false;
        }
        inner.snapshot = snapshot;
        inner.built_at = listed_at;
        inner.stale.retain(|_, epoch| *epoch > listed_at);
        true
    }

    pub fn is_dirty(&self) -> bool {
        !self.read().stale.is_empty()
    }

    pub fn stale_count(&self) -> usize {
        self.read().stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::lexical::Bm25Params;
    use crate::search::tokenizer::{Tokenizer, TokenizerKind};
    use crate::search::types::Document;

    fn index(ids: &[&str]) -> Arc<LexicalIndex> {
        let docs = ids.iter().map(|id| Document::new(*id, "text")).collect();
        Arc::new(
            LexicalIndex::build(docs, Tokenizer::new(TokenizerKind::Word), Bm25Params::default())
                .unwrap(),
        )
    }

    #[test]
    fn test_install_keeps_later_mutations() {
        let state = LexicalState::new();
        state.mark_stale(&DocId::from("a"));
        let listed_at = state.current_epoch();
        state.mark_stale(&DocId::from("b"));

        assert!(state.install(Some(index(&["a"])), listed_at));

        let view = state.view();
        assert_eq!(view.excluded, HashSet::from([DocId::from("b")]));
        assert_eq!(view.snapshot.unwrap().len(), 1);
    }

    #[test]
    fn test_restamped_id_survives_older_install() {
        let state = LexicalState::new();
        state.mark_stale(&DocId::from("a"));
        let listed_at = state.current_epoch();
        state.mark_stale(&DocId::from("a"));

        state.install(None, listed_at);
        assert!(state.is_dirty());
    }

    #[test]
    fn test_older_install_is_rejected() {
        let state = LexicalState::new();
        state.mark_stale(&DocId::from("a"));
        let late = state.current_epoch();
        assert!(state.install(Some(index(&["a"])), late));

        assert!(!state.install(None, 0));
        assert!(state.snapshot().is_some());
        assert_eq!(state.stale_count(), 0);
    }
}
