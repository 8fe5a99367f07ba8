//! Watch/trace registry and instruction-class log filters (C7).
//!
//! Four disjoint address sets (one per [`WatchKind`]) plus an
//! instruction-mask filter used to decide which retired instructions are
//! worth a trace-buffer entry, plus the supervisor-call trace filter.

use std::collections::HashSet;

use crate::common::GuestAddr;

/// Which kind of guest memory access a watched address reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    /// Guest read of the address.
    Read,
    /// Guest write to the address.
    Write,
    /// A pointer-sized read whose *result* is itself tracked as a pointer.
    GetPointer,
    /// A C-string read starting at the address.
    ReadCString,
}

impl WatchKind {
    /// Lowercase name used in callback payloads (`"read"`, `"write"`, …).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::GetPointer => "pointer",
            Self::ReadCString => "cstring",
        }
    }

    const ALL: [Self; 4] = [Self::Read, Self::Write, Self::GetPointer, Self::ReadCString];
}

/// Four disjoint-by-kind (but not disjoint across kinds) address sets.
#[derive(Debug, Default)]
pub struct WatchPoints {
    read: HashSet<GuestAddr>,
    write: HashSet<GuestAddr>,
    pointer: HashSet<GuestAddr>,
    cstring: HashSet<GuestAddr>,
}

impl WatchPoints {
    fn set_for(&self, kind: WatchKind) -> &HashSet<GuestAddr> {
        match kind {
            WatchKind::Read => &self.read,
            WatchKind::Write => &self.write,
            WatchKind::GetPointer => &self.pointer,
            WatchKind::ReadCString => &self.cstring,
        }
    }

    fn set_for_mut(&mut self, kind: WatchKind) -> &mut HashSet<GuestAddr> {
        match kind {
            WatchKind::Read => &mut self.read,
            WatchKind::Write => &mut self.write,
            WatchKind::GetPointer => &mut self.pointer,
            WatchKind::ReadCString => &mut self.cstring,
        }
    }

    /// Adds `addr` to the `kind` set.
    pub fn add(&mut self, kind: WatchKind, addr: GuestAddr) {
        self.set_for_mut(kind).insert(addr);
    }

    /// Removes `addr` from the `kind` set.
    pub fn remove(&mut self, kind: WatchKind, addr: GuestAddr) {
        self.set_for_mut(kind).remove(&addr);
    }

    /// Adds every address in `addrs` to the `kind` set (`addtotracewrite`'s
    /// "union(result addresses, trace-write set)").
    pub fn extend(&mut self, kind: WatchKind, addrs: impl IntoIterator<Item = GuestAddr>) {
        self.set_for_mut(kind).extend(addrs);
    }

    /// Empties every watch set.
    pub fn clear(&mut self) {
        self.read.clear();
        self.write.clear();
        self.pointer.clear();
        self.cstring.clear();
    }

    /// Single-address form of `check`: the kind whose set contains `addr`,
    /// checked in a fixed order so at most one kind is reported even when
    /// an address is watched under more than one kind.
    #[must_use]
    pub fn check(&self, addr: GuestAddr) -> Option<WatchKind> {
        WatchKind::ALL
            .into_iter()
            .find(|&kind| self.set_for(kind).contains(&addr))
    }

    /// Range form of `check`: any watched address of `kind` lying within
    /// `[addr, addr+size)`.
    #[must_use]
    pub fn check_range(&self, kind: WatchKind, addr: GuestAddr, size: u64) -> bool {
        self.set_for(kind)
            .iter()
            .any(|w| w.pid == addr.pid && w.addr >= addr.addr && w.addr < addr.addr + size)
    }
}

/// `(mask, value)` pair: instruction word `w` matches if `(w & mask) == value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionMatch {
    /// Bits significant to the match.
    pub mask: u32,
    /// Expected value of the masked bits.
    pub value: u32,
}

impl InstructionMatch {
    /// `bl` (branch-with-link, immediate).
    pub const BL: Self = Self {
        mask: 0xFC00_0000,
        value: 0x9400_0000,
    };
    /// `b.cond` (conditional branch).
    pub const BC: Self = Self {
        mask: 0xFF00_0010,
        value: 0x5400_0000,
    };
    /// `b` (unconditional branch, immediate).
    pub const B: Self = Self {
        mask: 0xFC00_0000,
        value: 0x1400_0000,
    };
    /// `ret`.
    pub const RET: Self = Self {
        mask: 0xFFFF_FC1F,
        value: 0xD65F_0000,
    };
}

/// Ordered sequence of `(mask, value)` pairs; empty means "all instructions match."
#[derive(Debug, Default, Clone)]
pub struct LogInstructionFilter(Vec<InstructionMatch>);

impl LogInstructionFilter {
    /// Appends a mask/value pair to the filter.
    pub fn add(&mut self, m: InstructionMatch) {
        self.0.push(m);
    }

    /// Empties the filter (`clearloginsts`); an empty filter matches everything.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// `is_step_instruction(w)`.
    #[must_use]
    pub fn is_step_instruction(&self, w: u32) -> bool {
        self.0.is_empty() || self.0.iter().any(|m| (w & m.mask) == m.value)
    }
}

/// Supervisor-call trace filter: `configured_swi` of `None` means "any";
/// `session_handle`, when set, further restricts by the argument register
/// documented for that `swi`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SvcFilter {
    configured_swi: Option<u32>,
    session_handle: Option<u32>,
}

impl SvcFilter {
    /// Sets the configured supervisor-call id, or `None` for "any" (`settraceswi`).
    pub fn set_swi(&mut self, swi: Option<u32>) {
        self.configured_swi = swi;
    }

    /// Sets the session handle used to filter by argument register (`setsession`).
    pub fn set_session(&mut self, handle: Option<u32>) {
        self.session_handle = handle;
    }

    /// Which general-purpose register index carries the session handle
    /// argument for a given `swi`, per the documented mapping.
    #[must_use]
    pub const fn argument_register(swi: u32) -> Option<usize> {
        match swi {
            0x20 | 0x21 => Some(0),
            0x22 => Some(2),
            0x23 => Some(3),
            _ => None,
        }
    }

    /// Whether an svc with id `swi`, executed with general-purpose
    /// registers `gpr`, should be traced.
    #[must_use]
    pub fn matches(&self, swi: u32, gpr: &[u64]) -> bool {
        let swi_ok = self.configured_swi.is_none_or(|configured| configured == swi);
        if !swi_ok {
            return false;
        }
        let Some(handle) = self.session_handle else {
            return true;
        };
        Self::argument_register(swi)
            .and_then(|reg| gpr.get(reg))
            .is_some_and(|&arg| arg == u64::from(handle))
    }
}
