//! Per-kind capacity budgets.
//!
//! A kind's limit is `workers * burst_multiplier`. The ledger counts ids that
//! hold a slot (`active`) plus slots the sweep reserved before claiming
//! (`pending`), so the limit holds while a claim is in flight.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

/// Default burst multiplier over worker count.
pub const DEFAULT_BURST_MULTIPLIER: usize = 4;

/// Introspection snapshot for one renderer kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveWork {
    /// Whether the kind has a budget with at least one worker.
    pub enabled: bool,
    pub workers: usize,
    /// Sorted ids currently holding a slot.
    pub active_ids: Vec<String>,
}

#[derive(Debug, Default)]
struct Budget {
    workers: usize,
    active: HashSet<String>,
    pending: usize,
}

impl Budget {
    fn in_use(&self) -> usize {
        self.active.len() + self.pending
    }
}

/// Mutex-guarded active sets and counters for every configured kind.
///
/// The lock is only held for in-memory bookkeeping; nothing awaits under it.
#[derive(Debug)]
pub struct CapacityLedger {
    burst_multiplier: usize,
    budgets: Mutex<BTreeMap<String, Budget>>,
}

impl Default for CapacityLedger {
    fn default() -> Self {
        Self::new(DEFAULT_BURST_MULTIPLIER)
    }
}

impl CapacityLedger {
    pub fn new(burst_multiplier: usize) -> Self {
        Self {
            burst_multiplier: burst_multiplier.max(1),
            budgets: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Budget>> {
        self.budgets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configures a budget for `kind`, keeping any ids already active.
    pub fn configure(&self, kind: impl Into<String>, workers: usize) {
        self.lock().entry(kind.into()).or_default().workers = workers;
    }

    /// Limit for `kind`, or `None` when no budget is configured.
    pub fn limit(&self, kind: &str) -> Option<usize> {
        self.lock()
            .get(kind)
            .map(|b| b.workers * self.burst_multiplier)
    }

    /// Kinds with at least one worker, in name order.
    pub fn kinds(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(_, b)| b.workers > 0)
            .map(|(kind, _)| kind.clone())
            .collect()
    }

    /// Takes a slot for `id` when the kind has room. Re-reserving an id that
    /// already holds a slot succeeds without using another.
    pub fn try_reserve(&self, kind: &str, id: &str) -> bool {
        let mut budgets = self.lock();
        let Some(budget) = budgets.get_mut(kind) else {
            return false;
        };
        if budget.active.contains(id) {
            return true;
        }
        if budget.workers == 0 || budget.in_use() >= budget.workers * self.burst_multiplier {
            return false;
        }
        budget.active.insert(id.to_string());
        true
    }

    /// Reserves every free slot for `kind` ahead of a claim and returns how
    /// many were taken. Each must later be committed or cancelled.
    pub fn reserve_free(&self, kind: &str) -> usize {
        let mut budgets = self.lock();
        let Some(budget) = budgets.get_mut(kind) else {
            return 0;
        };
        let limit = budget.workers * self.burst_multiplier;
        let free = limit.saturating_sub(budget.in_use());
        budget.pending += free;
        free
    }

    /// Converts one reserved slot into a slot held by `id`.
    pub fn commit_reserved(&self, kind: &str, id: &str) {
        if let Some(budget) = self.lock().get_mut(kind) {
            budget.pending = budget.pending.saturating_sub(1);
            budget.active.insert(id.to_string());
        }
    }

    /// Returns `count` unused reserved slots.
    pub fn cancel_reserved(&self, kind: &str, count: usize) {
        if let Some(budget) = self.lock().get_mut(kind) {
            budget.pending = budget.pending.saturating_sub(count);
        }
    }

    /// Frees the slot held by `id`. Returns false when it held none.
    pub fn release(&self, kind: &str, id: &str) -> bool {
        self.lock()
            .get_mut(kind)
            .is_some_and(|budget| budget.active.remove(id))
    }

    pub fn active_count(&self, kind: &str) -> usize {
        self.lock().get(kind).map_or(0, |b| b.active.len())
    }

    pub fn active_work(&self, kind: &str) -> ActiveWork {
        let budgets = self.lock();
        match budgets.get(kind) {
            Some(budget) => {
                let mut active_ids: Vec<String> = budget.active.iter().cloned().collect();
                active_ids.sort();
                ActiveWork {
                    enabled: budget.workers > 0,
                    workers: budget.workers,
                    active_ids,
                }
            }
            None => ActiveWork {
                enabled: false,
                workers: 0,
                active_ids: Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_respects_burst_limit() {
        let ledger = CapacityLedger::new(4);
        ledger.configure("image", 2);
        assert_eq!(ledger.limit("image"), Some(8));

        for i in 0..8 {
            assert!(ledger.try_reserve("image", &format!("id-{}", i)));
        }
        assert!(!ledger.try_reserve("image", "id-8"));
        assert_eq!(ledger.active_count("image"), 8);

        assert!(ledger.release("image", "id-0"));
        assert!(ledger.try_reserve("image", "id-8"));
    }

    #[test]
    fn test_unconfigured_or_disabled_kind_never_reserves() {
        let ledger = CapacityLedger::default();
        assert!(!ledger.try_reserve("unknown", "a"));

        ledger.configure("video", 0);
        assert!(!ledger.try_reserve("video", "a"));
        assert!(ledger.kinds().is_empty());
        assert!(!ledger.active_work("video").enabled);
    }

    #[test]
    fn test_re_reserve_same_id_is_idempotent() {
        let ledger = CapacityLedger::new(1);
        ledger.configure("doc", 1);
        assert!(ledger.try_reserve("doc", "a"));
        assert!(ledger.try_reserve("doc", "a"));
        assert_eq!(ledger.active_count("doc"), 1);
    }

    #[test]
    fn test_pending_reservations_count_against_limit() {
        let ledger = CapacityLedger::new(2);
        ledger.configure("image", 1);
        assert!(ledger.try_reserve("image", "a"));

        assert_eq!(ledger.reserve_free("image"), 1);
        assert!(!ledger.try_reserve("image", "b"));

        ledger.commit_reserved("image", "c");
        assert_eq!(ledger.active_count("image"), 2);
        assert_eq!(ledger.reserve_free("image"), 0);

        ledger.release("image", "a");
        assert_eq!(ledger.reserve_free("image"), 1);
        ledger.cancel_reserved("image", 1);
        assert!(ledger.try_reserve("image", "d"));
    }

    #[test]
    fn test_release_unknown_id() {
        let ledger = CapacityLedger::default();
        ledger.configure("image", 1);
        assert!(!ledger.release("image", "missing"));
        assert!(!ledger.release("other", "missing"));
    }

    #[test]
    fn test_active_work_snapshot_sorted() {
        let ledger = CapacityLedger::default();
        ledger.configure("image", 1);
        ledger.try_reserve("image", "b");
        ledger.try_reserve("image", "a");

        let work = ledger.active_work("image");
        assert!(work.enabled);
        assert_eq!(work.workers, 1);
        assert_eq!(work.active_ids, vec!["a".to_string(), "b".to_string()]);
    }
}
