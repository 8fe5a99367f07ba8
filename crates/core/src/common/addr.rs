//! Guest address type.
//!
//! This module defines a strong type for guest virtual addresses to prevent
//! accidentally mixing addresses that belong to different processes. It
//! provides:
//! 1. **Type safety:** a `u64` address is always paired with the `pid` that
//!    owns it, at the type level.
//! 2. **Ordering:** addresses sort by `(addr, pid)` so a [`Snapshot`] ordered
//!    by this type has deterministic, address-major iteration order, per the
//!    export format's requirement.
//!
//! [`Snapshot`]: crate::snapshot::Snapshot

/// A guest virtual address tagged with the process that owns it.
///
/// The core never dereferences a `GuestAddr` itself; every read or write
/// goes through a [`GuestMemory`](crate::guest::GuestMemory) implementation
/// supplied by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GuestAddr {
    /// The 64-bit virtual address within the owning process's address space.
    pub addr: u64,
    /// The process that this address is valid within.
    pub pid: u64,
}

impl GuestAddr {
    /// Creates a new guest address for the given process.
    #[inline]
    #[must_use]
    pub const fn new(pid: u64, addr: u64) -> Self {
        Self { addr, pid }
    }

    /// Returns a new `GuestAddr` in the same process offset by `delta` bytes.
    #[inline]
    #[must_use]
    pub const fn offset(self, delta: u64) -> Self {
        Self {
            addr: self.addr.wrapping_add(delta),
            pid: self.pid,
        }
    }
}

impl std::fmt::Display for GuestAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.addr)
    }
}
