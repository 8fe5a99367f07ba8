//! Memory region descriptors.
//!
//! A guest process exposes a handful of well-known regions plus zero or
//! more loaded modules; the export writers (§4.8) and the human-readable
//! dump format both need to resolve an address back to the region (or
//! module) that contains it.

/// Which well-known region, or module slot, a descriptor represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// Heap region.
    Heap,
    /// Alias (mirrored heap) region.
    Alias,
    /// Stack region.
    Stack,
    /// Kernel-mapped region.
    KernelMap,
    /// Main code region.
    Code,
    /// Alias of the code region.
    AliasCode,
    /// Full address-space region (fallback classification).
    AddrSpace,
    /// A loaded module (shared object / executable).
    Module,
}

impl RegionKind {
    /// The lowercase region name used in dump output for the six
    /// non-module well-known regions.
    #[must_use]
    pub const fn dump_name(self) -> &'static str {
        match self {
            Self::Heap => "heap",
            Self::Alias => "alias",
            Self::Stack => "stack",
            Self::KernelMap => "kernel-map",
            Self::Code => "code",
            Self::AliasCode => "alias-code",
            Self::AddrSpace => "addr-space",
            Self::Module => "module",
        }
    }
}

/// `{name, build_id, base, addr, size, program_id, pid}` — immutable after
/// load. `base` differs from `addr` only for modules, where it is the
/// module-local offset base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegionDescriptor {
    /// Region or module name.
    pub name: String,
    /// Build id (ELF build-id / module hash), empty for non-module regions.
    pub build_id: String,
    /// Module-local base offset (equal to `addr` for non-module regions).
    pub base: u64,
    /// Guest virtual address where the region starts.
    pub addr: u64,
    /// Size of the region in bytes.
    pub size: u64,
    /// Program id owning this region.
    pub program_id: u64,
    /// Process id owning this region.
    pub pid: u64,
    /// Which kind of region this is.
    pub kind: RegionKind,
}

impl MemoryRegionDescriptor {
    /// Whether `addr` falls within `[self.addr, self.addr + self.size)`.
    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.addr && addr < self.addr + self.size
    }

    /// Rebases `addr` to a module-local offset: `self.base + (addr - self.addr)`.
    #[must_use]
    pub const fn rebase(&self, addr: u64) -> u64 {
        self.base + (addr - self.addr)
    }
}
