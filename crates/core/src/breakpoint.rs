//! Breakpoint table (C6).
//!
//! Patches a guest instruction word with an architecture trap so execution
//! traps into the host, and restores it on demand. The map is the single
//! source of truth for "what was here before we patched it" — `remove` and
//! `clear` both depend on it to leave guest memory exactly as found.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::common::GuestAddr;
use crate::guest::GuestMemory;

/// Guest CPU instruction-set mode, which determines the trap word used to
/// patch a breakpoint address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Arch {
    /// 32-bit (AArch32) execution mode.
    Aarch32,
    /// 64-bit (AArch64) execution mode.
    #[default]
    Aarch64,
}

impl Arch {
    /// The 32-bit word written into guest memory to trap execution.
    ///
    /// AArch32 uses an undefined-instruction encoding reserved by the
    /// debugger for this purpose; AArch64 uses `brk #0`.
    #[must_use]
    pub const fn trap_word(self) -> u32 {
        match self {
            Self::Aarch32 => 0xE7FF_DEFE,
            Self::Aarch64 => 0xD420_0000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BreakpointEntry {
    original_word: u32,
    enabled: bool,
}

/// Address → original-instruction map with patch/restore semantics.
///
/// Bound to a single "trace process" implicitly: callers pass the process
/// id on every call so the table can refuse to patch a process that no
/// longer exists, but the table itself holds no process handle.
#[derive(Debug, Default)]
pub struct BreakpointTable {
    entries: HashMap<GuestAddr, BreakpointEntry>,
    arch: Arch,
}

impl BreakpointTable {
    /// Creates an empty table that patches breakpoints using `arch`'s trap word.
    #[must_use]
    pub fn new(arch: Arch) -> Self {
        Self {
            entries: HashMap::new(),
            arch,
        }
    }

    /// Number of active breakpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table holds no breakpoints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Patches `addr` with the trap word, saving the original word.
    ///
    /// Returns `false` (and changes nothing) if the guest range is invalid
    /// or a breakpoint is already present at `addr`.
    pub fn add(&mut self, memory: &mut impl GuestMemory, addr: GuestAddr) -> bool {
        if self.entries.contains_key(&addr) {
            debug!(%addr, "breakpoint already present");
            return false;
        }
        let Some(original_word) = memory.read_u32(addr.addr) else {
            warn!(%addr, "add_breakpoint: invalid guest range");
            return false;
        };
        if !memory.write_u32(addr.addr, self.arch.trap_word()) {
            warn!(%addr, "add_breakpoint: write failed after successful read");
            return false;
        }
        memory.invalidate_instruction_cache(addr.addr, 4);
        self.entries.insert(
            addr,
            BreakpointEntry {
                original_word,
                enabled: true,
            },
        );
        true
    }

    /// Restores the original word at `addr` and removes the entry.
    ///
    /// A no-op (returns `false`) if no breakpoint is present at `addr`.
    pub fn remove(&mut self, memory: &mut impl GuestMemory, addr: GuestAddr) -> bool {
        let Some(entry) = self.entries.remove(&addr) else {
            return false;
        };
        memory.write_u32(addr.addr, entry.original_word);
        memory.invalidate_instruction_cache(addr.addr, 4);
        true
    }

    /// Re-patches `addr` with the trap word without forgetting the
    /// original word, if the entry exists and is currently disabled.
    pub fn enable(&mut self, memory: &mut impl GuestMemory, addr: GuestAddr) -> bool {
        let Some(entry) = self.entries.get_mut(&addr) else {
            return false;
        };
        if entry.enabled {
            return true;
        }
        memory.write_u32(addr.addr, self.arch.trap_word());
        memory.invalidate_instruction_cache(addr.addr, 4);
        entry.enabled = true;
        true
    }

    /// Restores the original word at `addr` without forgetting it, so a
    /// later `enable` can re-patch. The map entry is kept.
    pub fn disable(&mut self, memory: &mut impl GuestMemory, addr: GuestAddr) -> bool {
        let Some(entry) = self.entries.get_mut(&addr) else {
            return false;
        };
        if !entry.enabled {
            return true;
        }
        memory.write_u32(addr.addr, entry.original_word);
        memory.invalidate_instruction_cache(addr.addr, 4);
        entry.enabled = false;
        true
    }

    /// Restores every patched word and empties the table.
    pub fn clear(&mut self, memory: &mut impl GuestMemory) {
        for (addr, entry) in self.entries.drain() {
            memory.write_u32(addr.addr, entry.original_word);
            memory.invalidate_instruction_cache(addr.addr, 4);
        }
    }

    /// Returns the original word stored for `addr`, if a breakpoint exists there.
    #[must_use]
    pub fn original_word(&self, addr: GuestAddr) -> Option<u32> {
        self.entries.get(&addr).map(|e| e.original_word)
    }

    /// Whether a breakpoint exists and is currently patched into the guest.
    #[must_use]
    pub fn is_enabled(&self, addr: GuestAddr) -> Option<bool> {
        self.entries.get(&addr).map(|e| e.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::testing::InMemoryGuest;

    #[test]
    fn round_trip_restores_original_word() {
        let mut mem = InMemoryGuest::new();
        mem.seed(0x200, &0xDEAD_BEEFu32.to_le_bytes());
        let mut table = BreakpointTable::new(Arch::Aarch64);
        let addr = GuestAddr::new(1, 0x200);

        assert!(table.add(&mut mem, addr));
        assert_eq!(mem.read_u32(0x200), Some(Arch::Aarch64.trap_word()));
        assert_eq!(table.original_word(addr), Some(0xDEAD_BEEF));

        assert!(table.remove(&mut mem, addr));
        assert_eq!(mem.read_u32(0x200), Some(0xDEAD_BEEF));
        assert!(table.is_empty());
    }

    #[test]
    fn disable_then_enable_repatches_trap_word() {
        let mut mem = InMemoryGuest::new();
        mem.seed(0x200, &0x1111_1111u32.to_le_bytes());
        let mut table = BreakpointTable::new(Arch::Aarch32);
        let addr = GuestAddr::new(1, 0x200);

        table.add(&mut mem, addr);
        table.disable(&mut mem, addr);
        assert_eq!(mem.read_u32(0x200), Some(0x1111_1111));
        assert_eq!(table.is_enabled(addr), Some(false));

        table.enable(&mut mem, addr);
        assert_eq!(mem.read_u32(0x200), Some(Arch::Aarch32.trap_word()));
    }

    #[test]
    fn add_on_invalid_range_is_noop() {
        let mut mem = InMemoryGuest::new();
        let mut table = BreakpointTable::new(Arch::Aarch64);
        assert!(!table.add(&mut mem, GuestAddr::new(1, 0xFFFF_0000)));
        assert!(table.is_empty());
    }
}
