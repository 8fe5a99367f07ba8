//! PC-count hit table (C8).
//!
//! Records how often each instruction address is retired while PC counting
//! is active. Backed by a lazily allocated bucket-hash rather than a flat
//! `HashMap<u64, u64>`: tracing sessions can retire tens of millions of
//! instructions, and a bucket scan with a small fixed width keeps both the
//! common case and the worst case cheap without needing a full hash/probe.
//!
//! Instructions are always 4-byte aligned, so the low two address bits
//! carry no information; they are dropped before the bucket index is taken
//! from the next `bucket_bits` bits, and the remaining high bits become the
//! in-slot discriminator (invariant: `pc == (discriminator << (2 +
//! bucket_bits)) | (bucket_index << 2)`).

use std::collections::HashMap;

use tracing::trace;

use crate::config::PcCountConfig;

const ALIGN_SHIFT: u32 = 2;

/// A lazily allocated, bucket-hashed saturating hit counter keyed by guest
/// instruction address.
///
/// Each of the `2^bucket_bits` buckets holds up to `bucket_width` slots,
/// linearly scanned; an address that doesn't fit after `bucket_width`
/// probes spills into an overflow map. Per-slot counts saturate at
/// `count_mask` rather than wrapping (invariant P1); recording never loses
/// a hit to overflow eviction (invariant P1) — once an address is tracked,
/// whether in a bucket slot or the overflow map, it stays tracked until the
/// next `store`.
#[derive(Debug)]
pub struct PcCounter {
    bucket_bits: u32,
    bucket_width: usize,
    count_mask: u64,
    count_bits: u32,
    buckets: Vec<Option<Vec<u64>>>,
    overflow: HashMap<u64, u64>,
    /// Snapshot taken by the last `store`, consulted by `keep_new`/`keep_same`.
    last: HashMap<u64, u64>,
    /// Result of the last `keep_new`/`keep_same` call, sorted by address.
    ordered: Vec<(u64, u64)>,
}

impl PcCounter {
    /// Builds a counter from its configured geometry.
    #[must_use]
    pub fn new(config: PcCountConfig) -> Self {
        let bucket_count = 1usize << config.bucket_bits;
        Self {
            bucket_bits: config.bucket_bits,
            bucket_width: config.bucket_width,
            count_mask: config.count_mask,
            count_bits: (config.count_mask + 1).trailing_zeros(),
            buckets: vec![None; bucket_count],
            overflow: HashMap::new(),
            last: HashMap::new(),
            ordered: Vec::new(),
        }
    }

    fn bucket_index(&self, pc: u64) -> usize {
        ((pc >> ALIGN_SHIFT) as usize) & ((1usize << self.bucket_bits) - 1)
    }

    fn discriminator(&self, pc: u64) -> u64 {
        pc >> (ALIGN_SHIFT + self.bucket_bits)
    }

    fn reconstruct(&self, bucket_index: usize, discriminator: u64) -> u64 {
        (discriminator << (ALIGN_SHIFT + self.bucket_bits)) | ((bucket_index as u64) << ALIGN_SHIFT)
    }

    fn split_slot(&self, slot: u64) -> (u64, u64) {
        (slot >> self.count_bits, slot & self.count_mask)
    }

    fn join_slot(&self, discriminator: u64, count: u64) -> u64 {
        (discriminator << self.count_bits) | (count & self.count_mask)
    }

    /// Current hit count for `pc` since the last `store`, or `0` if never
    /// recorded.
    #[must_use]
    pub fn count(&self, pc: u64) -> u64 {
        let idx = self.bucket_index(pc);
        let disc = self.discriminator(pc);
        if let Some(Some(bucket)) = self.buckets.get(idx) {
            for &slot in bucket {
                let (slot_disc, count) = self.split_slot(slot);
                if slot_disc == disc {
                    return count;
                }
            }
        }
        self.overflow.get(&pc).copied().unwrap_or(0)
    }

    /// Records one retirement of `pc`, saturating the count at `count_mask`.
    pub fn record(&mut self, pc: u64) {
        let idx = self.bucket_index(pc);
        let disc = self.discriminator(pc);

        if let Some(existing) = self.overflow.get_mut(&pc) {
            *existing = (*existing + 1).min(self.count_mask);
            return;
        }

        let bucket = self.buckets[idx].get_or_insert_with(Vec::new);
        if let Some(slot) = bucket.iter_mut().find(|s| self.split_slot(**s).0 == disc) {
            let (d, count) = self.split_slot(*slot);
            *slot = self.join_slot(d, (count + 1).min(self.count_mask));
            return;
        }
        if bucket.len() < self.bucket_width {
            bucket.push(self.join_slot(disc, 1));
            return;
        }
        trace!(pc, bucket = idx, "pccount: bucket full, spilling to overflow");
        self.overflow.insert(pc, 1);
    }

    /// Every `(pc, count)` pair currently tracked, unordered.
    fn current_counts(&self) -> HashMap<u64, u64> {
        let mut out = HashMap::new();
        for (idx, bucket) in self.buckets.iter().enumerate() {
            let Some(bucket) = bucket else { continue };
            for &slot in bucket {
                if slot == 0 {
                    continue;
                }
                let (disc, count) = self.split_slot(slot);
                out.insert(self.reconstruct(idx, disc), count);
            }
        }
        out.extend(self.overflow.iter().map(|(&pc, &count)| (pc, count)));
        out
    }

    /// `store-pc-count`, per invariant P1: snapshots every currently
    /// tracked `(pc, count)` into `last`, then clears the backing array and
    /// overflow map.
    pub fn store(&mut self) {
        self.last = self.current_counts();
        self.buckets.iter_mut().for_each(|b| *b = None);
        self.overflow.clear();
    }

    /// `keep-new-pc-count`, per invariant P2: pcs recorded since the last
    /// `store` that were **not** present then. Populates `ordered`
    /// (address-sorted) and clears the backing array and overflow map.
    pub fn keep_new(&mut self) {
        let current = self.current_counts();
        self.ordered = current
            .into_iter()
            .filter(|(pc, _)| !self.last.contains_key(pc))
            .collect();
        self.ordered.sort_unstable_by_key(|&(pc, _)| pc);
        self.buckets.iter_mut().for_each(|b| *b = None);
        self.overflow.clear();
    }

    /// `keeppccount` (distinct from `keep-new`/`keep-same`): every pc
    /// tracked since the last `store`, unioned with `last` rather than
    /// filtered against it. Populates `ordered` (address-sorted) and clears
    /// the backing array and overflow map.
    pub fn keep(&mut self) {
        let mut merged = self.current_counts();
        for (&pc, &count) in &self.last {
            merged.entry(pc).or_insert(count);
        }
        self.ordered = merged.into_iter().collect();
        self.ordered.sort_unstable_by_key(|&(pc, _)| pc);
        self.buckets.iter_mut().for_each(|b| *b = None);
        self.overflow.clear();
    }

    /// `keep-same-pc-count`, per invariant P2: pcs recorded since the last
    /// `store` that were also present then. Populates `ordered`
    /// (address-sorted) and clears the backing array and overflow map.
    pub fn keep_same(&mut self) {
        let current = self.current_counts();
        self.ordered = current
            .into_iter()
            .filter(|(pc, _)| self.last.contains_key(pc))
            .collect();
        self.ordered.sort_unstable_by_key(|&(pc, _)| pc);
        self.buckets.iter_mut().for_each(|b| *b = None);
        self.overflow.clear();
    }

    /// Empties the array, overflow map, `last`, and `ordered` (`clearpccount`).
    pub fn clear(&mut self) {
        self.buckets.iter_mut().for_each(|b| *b = None);
        self.overflow.clear();
        self.last.clear();
        self.ordered.clear();
    }

    /// The last `keep_new`/`keep_same` result, filtered to entries whose
    /// count is at most `limit`, in address order (`dump(limit)`).
    #[must_use]
    pub fn dump(&self, limit: u64) -> Vec<(u64, u64)> {
        self.ordered.iter().copied().filter(|&(_, count)| count <= limit).collect()
    }
}
