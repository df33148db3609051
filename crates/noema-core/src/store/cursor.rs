use super::StoreInner;
use crate::error::{NoemaError, Result};
use crate::types::{Fact, FactId, FactPattern};
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

const PAGE_SIZE: usize = 256;

/// Lazy, restartable sequence of facts matching a pattern, in insertion order.
///
/// Membership is fixed when the cursor is created, in a single read
/// transaction. Fact bodies are loaded a page at a time. If the store is
/// restored while the cursor is open the next page fails; `restart` resolves
/// the pattern again against the restored contents.
pub struct FactCursor {
    store: Arc<StoreInner>,
    pattern: FactPattern,
    limit: usize,
    ids: Vec<FactId>,
    position: usize,
    page: VecDeque<Fact>,
    epoch: u64,
    truncated: bool,
    failed: bool,
}

impl FactCursor {
    pub(super) fn open(store: Arc<StoreInner>, pattern: FactPattern) -> Result<Self> {
        let cap = store.config.max_results;
        let limit = pattern.limit.map_or(cap, |l| l.min(cap));
        let mut cursor = Self {
            store,
            pattern,
            limit,
            ids: Vec::new(),
            position: 0,
            page: VecDeque::new(),
            epoch: 0,
            truncated: false,
            failed: false,
        };
        cursor.resolve()?;
        Ok(cursor)
    }

    fn resolve(&mut self) -> Result<()> {
        let _guard = self.store.lock.read()?;
        self.epoch = self.store.epoch.load(Ordering::Acquire);
        // One extra id tells us whether the cap cut the result short
        let mut ids = self
            .store
            .storage
            .select(&self.pattern, self.limit.saturating_add(1))?;
        self.truncated = ids.len() > self.limit;
        ids.truncate(self.limit);
        self.ids = ids;
        Ok(())
    }

    /// Total number of facts the cursor will yield.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// True when more facts matched than the result cap allowed.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn ids(&self) -> &[FactId] {
        &self.ids
    }

    /// Rewind to the first fact. Re-resolves membership if the store was
    /// restored since the cursor was opened.
    pub fn restart(&mut self) -> Result<()> {
        self.position = 0;
        self.page.clear();
        self.failed = false;
        if self.store.epoch.load(Ordering::Acquire) != self.epoch {
            self.resolve()?;
        }
        Ok(())
    }

    fn fill_page(&mut self) -> Result<()> {
        let end = (self.position + PAGE_SIZE).min(self.ids.len());
        let batch = &self.ids[self.position..end];

        let _guard = self.store.lock.read()?;
        if self.store.epoch.load(Ordering::Acquire) != self.epoch {
            return Err(NoemaError::Validation(
                "Store was restored while the cursor was open; restart it".to_string(),
            ));
        }
        let rows = self.store.storage.get_facts(batch)?;
        for (id, row) in batch.iter().zip(rows) {
            match row {
                Some(row) => self.page.push_back(row.fact),
                None => return Err(NoemaError::FactNotFound(id.clone())),
            }
        }
        self.position = end;
        Ok(())
    }

    /// Drain the remaining facts.
    pub fn collect_all(self) -> Result<Vec<Fact>> {
        self.collect()
    }
}

impl Iterator for FactCursor {
    type Item = Result<Fact>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.page.is_empty() && self.position < self.ids.len() {
            if let Err(e) = self.fill_page() {
                self.failed = true;
                return Some(Err(e));
            }
        }
        self.page.pop_front().map(Ok)
    }
}

impl std::fmt::Debug for FactCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactCursor")
            .field("pattern", &self.pattern)
            .field("len", &self.ids.len())
            .field("position", &self.position)
            .field("truncated", &self.truncated)
            .finish()
    }
}
