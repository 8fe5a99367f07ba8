//! Snapshot store and filter algebra (C4, C5).
//!
//! `SnapshotStore` owns exactly three stacks of snapshots — `result`,
//! `history`, `rollback` — and every mutation described by invariants
//! H1–H3 moves whole snapshots between them rather than copying records,
//! matching the "modify records are exclusively owned by the snapshot that
//! contains them" ownership rule.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::common::GuestAddr;
use crate::guest::GuestMemory;
use crate::record::{MemoryType, ModifyRecord};

/// An ordered mapping from guest address to modify record.
///
/// Backed by a `BTreeMap` so iteration (and therefore export) is always in
/// address order, per the data model's "ordered by address for
/// deterministic export" requirement.
pub type Snapshot = BTreeMap<GuestAddr, ModifyRecord>;

/// Current result + history + rollback stacks of memory snapshots.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    result: Snapshot,
    history: Vec<Snapshot>,
    rollback: Vec<Snapshot>,
    /// When set, `refresh_snapshot` pushes onto `history` even when
    /// `result` is empty, so a caller can capture an initial baseline.
    debug_snapshot: bool,
}

impl SnapshotStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current working snapshot.
    #[must_use]
    pub const fn result(&self) -> &Snapshot {
        &self.result
    }

    /// The history stack, most recent last.
    #[must_use]
    pub fn history(&self) -> &[Snapshot] {
        &self.history
    }

    /// The rollback stack, most recently undone last.
    #[must_use]
    pub fn rollback(&self) -> &[Snapshot] {
        &self.rollback
    }

    /// Toggles `setdebugsnapshot`; see the field doc on `debug_snapshot`.
    pub fn set_debug_snapshot(&mut self, enabled: bool) {
        self.debug_snapshot = enabled;
    }

    /// `add_sniffing(pid, addr, size, step, match_value)` — scans
    /// `[addr, addr+size)` in `step`-sized elements and inserts each
    /// matching address into a fresh `result`, replacing whatever was
    /// there. `step` must be one of `{1,2,4,8}`; any other value is a
    /// caller error and yields no insertions.
    pub fn add_sniffing(
        &mut self,
        memory: &impl GuestMemory,
        pid: u64,
        addr: u64,
        size: u64,
        step: u64,
        match_value: u64,
    ) {
        let Some(ty) = MemoryType::from_step(step) else {
            debug!(step, "add_sniffing: step must be one of {{1,2,4,8}}");
            return;
        };
        self.result.clear();
        let mut maddr = addr;
        while maddr + step <= addr + size {
            if let Some(value) = ty.read(memory, maddr) {
                if match_value == 0 || value == match_value {
                    let key = GuestAddr::new(pid, maddr);
                    self.result.insert(key, ModifyRecord::new(key, ty, value));
                }
            } else {
                trace!(addr = maddr, "add_sniffing: invalid guest range, skipped");
            }
            maddr += step;
        }
    }

    /// `refresh_snapshot`, per invariant H2.
    pub fn refresh_snapshot(&mut self, memory: &impl GuestMemory) {
        if self.result.is_empty() && !self.debug_snapshot {
            return;
        }
        let old_result = std::mem::take(&mut self.result);
        let top = if old_result.is_empty() {
            // `debug_snapshot` path: push the empty baseline and there is
            // nothing to re-read yet.
            self.history.push(old_result);
            return;
        } else {
            old_result
        };

        let mut refreshed = Snapshot::new();
        for (addr, record) in &top {
            match record.ty.read(memory, addr.addr) {
                Some(new_value) if new_value != record.value => {
                    refreshed.insert(*addr, record.observe(new_value));
                }
                Some(_) => {
                    // Unchanged: dropped, per H2 ("unchanged entries are
                    // not carried forward").
                }
                None => {
                    trace!(%addr, "refresh_snapshot: invalid guest range, dropped");
                }
            }
        }
        self.history.push(top);
        self.result = refreshed;
    }

    fn keep(&mut self, mut predicate: impl FnMut(&ModifyRecord) -> bool) {
        self.result.retain(|_, record| predicate(record));
    }

    /// `keep_unchanged`, per H1 and its tie-break rule: an address present
    /// in top-of-`history` but missing from `result` was dropped by
    /// `refresh_snapshot` precisely because it was unchanged, so it is
    /// reconstructed here from the history entry. An address that *is*
    /// present in `result` only passes when `value == old_value`, which
    /// can occur after a rollback or a zero-valued initial sniff.
    pub fn keep_unchanged(&mut self) {
        let Some(top) = self.history.last() else {
            self.result.clear();
            return;
        };
        let mut kept = Snapshot::new();
        for (addr, history_record) in top {
            match self.result.get(addr) {
                None => {
                    kept.insert(*addr, *history_record);
                }
                Some(record) if record.is_unchanged() => {
                    kept.insert(*addr, *record);
                }
                Some(_) => {}
            }
        }
        self.result = kept;
    }

    /// `keep_changed`, per H1.
    pub fn keep_changed(&mut self) {
        self.keep(|r| r.value != r.old_value);
    }

    /// `keep_increased`, per H1 (unsigned comparison under the record's width).
    pub fn keep_increased(&mut self) {
        self.keep(|r| r.value > r.old_value);
    }

    /// `keep_decreased`, per H1 (unsigned comparison under the record's width).
    pub fn keep_decreased(&mut self) {
        self.keep(|r| r.value < r.old_value);
    }

    /// `keep_value(v)`, per H1.
    pub fn keep_value(&mut self, v: u64) {
        self.keep(|r| r.value == v);
    }

    /// `rollback`, per H3: swaps `result` with the top of `history`,
    /// pushing the old `result` onto the front of `rollback`.
    pub fn rollback_one(&mut self) -> bool {
        let Some(previous) = self.history.pop() else {
            return false;
        };
        let displaced = std::mem::replace(&mut self.result, previous);
        self.rollback.push(displaced);
        true
    }

    /// `unrollback`, the inverse of [`Self::rollback_one`].
    pub fn unrollback_one(&mut self) -> bool {
        let Some(undone) = self.rollback.pop() else {
            return false;
        };
        let displaced = std::mem::replace(&mut self.result, undone);
        self.history.push(displaced);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::testing::InMemoryGuest;
    use pretty_assertions::assert_eq;

    fn seeded_guest() -> InMemoryGuest {
        let mut mem = InMemoryGuest::new();
        mem.seed(0x100, &5u32.to_le_bytes());
        mem
    }

    #[test]
    fn add_sniffing_respects_invariant_1() {
        let mem = seeded_guest();
        let mut store = SnapshotStore::new();
        store.add_sniffing(&mem, 1, 0x100, 4, 4, 0);
        let (addr, record) = store.result().iter().next().unwrap();
        assert_eq!(addr.addr, 0x100);
        assert_eq!(record.ty, MemoryType::U32);
        assert_eq!(record.value, 5);
    }

    #[test]
    fn add_sniffing_rejects_bad_step() {
        let mem = seeded_guest();
        let mut store = SnapshotStore::new();
        store.add_sniffing(&mem, 1, 0x100, 4, 3, 0);
        assert!(store.result().is_empty());
    }

    #[test]
    fn scenario_s1_filter_pipeline() {
        let mut mem = seeded_guest();
        let mut store = SnapshotStore::new();
        store.add_sniffing(&mem, 1, 0x100, 4, 4, 0);

        mem.seed(0x100, &7u32.to_le_bytes());
        store.refresh_snapshot(&mem);
        store.keep_increased();

        let (_, record) = store.result().iter().next().unwrap();
        assert_eq!(record.value, 7);
        assert_eq!(record.old_value, 5);

        mem.seed(0x100, &4u32.to_le_bytes());
        store.refresh_snapshot(&mem);
        store.keep_decreased();

        let (_, record) = store.result().iter().next().unwrap();
        assert_eq!(record.value, 4);
        assert_eq!(record.old_value, 7);
    }

    #[test]
    fn scenario_s2_rollback_symmetry() {
        let mut mem = seeded_guest();
        let mut store = SnapshotStore::new();
        store.add_sniffing(&mem, 1, 0x100, 4, 4, 0);

        for value in [7u32, 9, 11] {
            mem.seed(0x100, &value.to_le_bytes());
            store.refresh_snapshot(&mem);
            store.keep_changed();
        }
        assert_eq!(store.history().len(), 3);

        let final_result = store.result().clone();
        assert!(store.rollback_one());
        assert!(store.rollback_one());
        assert!(store.rollback_one());
        assert!(!store.rollback_one());

        let first_result = store.result().clone();
        let (_, record) = first_result.iter().next().unwrap();
        assert_eq!(record.value, 5);

        assert!(store.unrollback_one());
        assert!(store.unrollback_one());
        assert!(store.unrollback_one());
        assert_eq!(store.result(), &final_result);
    }

    #[test]
    fn invariant_3_rollback_unrollback_is_identity() {
        let mut mem = seeded_guest();
        let mut store = SnapshotStore::new();
        store.add_sniffing(&mem, 1, 0x100, 4, 4, 0);
        mem.seed(0x100, &7u32.to_le_bytes());
        store.refresh_snapshot(&mem);

        let before = store.result().clone();
        let before_history = store.history().to_vec();
        store.rollback_one();
        store.unrollback_one();
        assert_eq!(store.result(), &before);
        assert_eq!(store.history(), before_history.as_slice());
    }
}
