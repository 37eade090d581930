//! Cross-page/cross-provider dedup window (C7).
//!
//! A bounded FIFO of seen external ids, mirroring the teacher's bounded-history
//! patterns (e.g. `apis/stats.rs`'s sampled error log) but specialized to
//! membership testing: a `VecDeque` for eviction order plus a `HashSet` for O(1)
//! `contains`.

use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone)]
pub struct DedupWindow {
    order: VecDeque<String>,
    seen: HashSet<String>,
    max_size: usize,
}

impl DedupWindow {
    pub fn new(max_size: usize) -> Self {
        Self {
            order: VecDeque::new(),
            seen: HashSet::new(),
            max_size: max_size.max(1),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Inserts `id`, evicting the oldest entry if the window is at capacity.
    /// No-op if `id` is already present (keeps its original recency position).
    pub fn add(&mut self, id: impl Into<String>) {
        let id = id.into();
        if self.seen.contains(&id) {
            return;
        }
        if self.order.len() >= self.max_size {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.seen.insert(id.clone());
        self.order.push_back(id);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Filters a batch of externally-identified items down to ones not already seen
/// in `window`, recording each surviving id into the window as it goes (so later
/// items in the same batch are deduped against earlier ones too).
pub fn deduplicate<T>(batch: Vec<T>, window: &mut DedupWindow, id_of: impl Fn(&T) -> String) -> Vec<T> {
    let mut out = Vec::with_capacity(batch.len());
    for item in batch {
        let id = id_of(&item);
        if window.contains(&id) {
            continue;
        }
        window.add(id);
        out.push(item);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_evicts_oldest_beyond_capacity() {
        let mut window = DedupWindow::new(2);
        window.add("a");
        window.add("b");
        window.add("c");
        assert!(!window.contains("a"));
        assert!(window.contains("b"));
        assert!(window.contains("c"));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn readding_existing_id_is_a_noop_for_eviction_order() {
        let mut window = DedupWindow::new(2);
        window.add("a");
        window.add("b");
        window.add("a");
        window.add("c");
        // "a" was re-added but not moved to the back, so it's still the oldest
        // and gets evicted when "c" pushes the window over capacity.
        assert!(!window.contains("a"));
        assert!(window.contains("b"));
        assert!(window.contains("c"));
    }

    #[test]
    fn deduplicate_filters_repeats_within_and_across_batches() {
        let mut window = DedupWindow::new(10);
        window.add("tx1");

        let batch = vec!["tx1", "tx2", "tx2", "tx3"];
        let survivors = deduplicate(batch, &mut window, |s| s.to_string());
        assert_eq!(survivors, vec!["tx2", "tx3"]);
        assert!(window.contains("tx3"));
    }

    #[test]
    fn empty_window_reports_empty() {
        let window = DedupWindow::new(5);
        assert!(window.is_empty());
        assert!(!window.contains("anything"));
    }
}
