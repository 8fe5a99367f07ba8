//! External interfaces consumed from the host (C1, C2).
//!
//! The engine calls these traits but never implements them: the concrete
//! guest-memory and process-registry types belong to the emulator host. This
//! module exists so the engine can be generic over the host rather than
//! bound to one concrete emulator, mirroring how this codebase generalizes a
//! hardware boundary behind a small trait rather than an abstract base
//! class: one real implementation ships outside this crate, and tests
//! supply an in-memory stand-in.

use std::fmt;

/// Range-valid guest virtual-address reads/writes (C1).
///
/// All methods are silent on an invalid range: they return `None`/`false`
/// rather than panicking or erroring, per the "invalid guest range" error
/// kind — the sniffer tolerates ephemeral regions appearing and
/// disappearing under it.
pub trait GuestMemory: Send {
    /// Whether `[addr, addr+len)` is currently mapped and accessible.
    fn is_valid(&self, addr: u64, len: usize) -> bool;

    /// Reads a single byte, or `None` if the address is invalid.
    fn read_u8(&self, addr: u64) -> Option<u8>;
    /// Reads a little-endian `u16`, or `None` if the range is invalid.
    fn read_u16(&self, addr: u64) -> Option<u16>;
    /// Reads a little-endian `u32`, or `None` if the range is invalid.
    fn read_u32(&self, addr: u64) -> Option<u32>;
    /// Reads a little-endian `u64`, or `None` if the range is invalid.
    fn read_u64(&self, addr: u64) -> Option<u64>;

    /// Writes a single byte. Returns `false` if the range is invalid.
    fn write_u8(&mut self, addr: u64, val: u8) -> bool;
    /// Writes a little-endian `u16`. Returns `false` if the range is invalid.
    fn write_u16(&mut self, addr: u64, val: u16) -> bool;
    /// Writes a little-endian `u32`. Returns `false` if the range is invalid.
    fn write_u32(&mut self, addr: u64, val: u32) -> bool;
    /// Writes a little-endian `u64`. Returns `false` if the range is invalid.
    fn write_u64(&mut self, addr: u64, val: u64) -> bool;

    /// Reads a pointer-sized value without raising a guest fault on an
    /// invalid or unmapped address ("pointer silent-acquire").
    fn read_pointer_silent(&self, addr: u64) -> Option<u64>;

    /// Invalidates the instruction cache over `[addr, addr+len)` after a
    /// breakpoint patch or restore.
    fn invalidate_instruction_cache(&mut self, addr: u64, len: usize);

    /// Marks `[addr, addr+size)` as under debugger observation, or clears
    /// the mark when `flag` is `false`. Hosts that do not need this
    /// bookkeeping may implement it as a no-op.
    fn mark_region_debug(&mut self, addr: u64, size: usize, flag: bool);
}

/// A 64-byte AArch64 general/vector register context, as reported by a
/// core's current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterContext {
    /// General-purpose registers `r0..r28`.
    pub gpr: [u64; 29],
    /// 128-bit vector registers `v0..v31`, stored as big-endian byte pairs
    /// (high, low) so a dump can print them without a platform-dependent
    /// u128 literal.
    pub vector: [(u64, u64); 32],
    /// Program counter.
    pub pc: u64,
    /// Stack pointer.
    pub sp: u64,
    /// Processor state (NZCV + mode bits).
    pub pstate: u64,
    /// Thread-local storage base.
    pub tls: u64,
    /// `tpidr_el0` register.
    pub tpidr_el0: u64,
}

impl Default for RegisterContext {
    fn default() -> Self {
        Self {
            gpr: [0; 29],
            vector: [(0, 0); 32],
            pc: 0,
            sp: 0,
            pstate: 0,
            tls: 0,
            tpidr_el0: 0,
        }
    }
}

/// One frame of a resolved backtrace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacktraceEntry {
    /// Name of the module containing the frame's address, if resolved.
    pub module: String,
    /// Current (possibly breakpoint-patched) address of the frame.
    pub address: u64,
    /// Original, unpatched address of the frame.
    pub original_address: u64,
    /// Offset of `address` from the start of `module`.
    pub offset: u64,
    /// Resolved symbol name, if any.
    pub symbol: String,
    /// Host-process pointer backing this frame, if the host chooses to
    /// expose it (debug builds only, typically).
    pub host_pointer: Option<u64>,
}

/// A guest thread identity, as handed out by the process/thread registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadInfo {
    /// Opaque per-thread handle (kernel object handle on the guest side).
    pub handle: u32,
    /// Guest thread id.
    pub tid: u64,
    /// Owning process id.
    pub pid: u64,
    /// Physical core index the thread is currently scheduled on.
    pub core_ix: usize,
}

/// Per-core CPU control surface (C2, `arm.*`).
pub trait ArmInterface: Send {
    /// Whether this core is currently executing in AArch32 mode.
    fn is_aarch32(&self) -> bool;
    /// Snapshot of the core's current register context.
    fn context(&self) -> RegisterContext;
    /// One-time JIT initialization for a trace region; idempotent.
    fn init_jit_once(&mut self, region_begin: u64, region_end: u64);
    /// Enables the per-instruction trace hook on this core.
    fn start_trace(&mut self);
    /// Disables the per-instruction trace hook on this core.
    fn stop_trace(&mut self);
    /// Enables the per-instruction PC-count hook on this core.
    fn start_pc_count(&mut self);
    /// Disables the per-instruction PC-count hook on this core.
    fn stop_pc_count(&mut self);
}

/// Guest process/thread enumeration (C2).
pub trait ProcessRegistry: Send {
    /// Process ids currently alive in the guest kernel.
    fn process_list(&self) -> Vec<u64>;

    /// Whether `pid` is still alive.
    fn is_alive(&self, pid: u64) -> bool;

    /// Number of physical CPU cores the emulated system exposes.
    fn physical_core_count(&self) -> usize;

    /// The thread currently scheduled on `core_ix`, if any.
    fn current_thread(&self, core_ix: usize) -> Option<ThreadInfo>;

    /// Per-core CPU control surface.
    fn arm_interface(&self, core_ix: usize) -> Option<&dyn ArmInterface>;

    /// Per-core CPU control surface, mutable.
    fn arm_interface_mut(&mut self, core_ix: usize) -> Option<&mut dyn ArmInterface>;

    /// Resolves a backtrace for `thread`.
    fn backtrace(&self, thread: ThreadInfo) -> Vec<BacktraceEntry>;
}

impl fmt::Debug for dyn ArmInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("dyn ArmInterface")
            .field("is_aarch32", &self.is_aarch32())
            .finish()
    }
}

/// In-memory [`GuestMemory`] stand-in used by this crate's own unit tests.
///
/// Mirrors the style of a hand-rolled mock over a `mockall`-generated one:
/// a flat byte buffer per valid range, with an explicit fault list so tests
/// can exercise the "invalid guest range" path without a second type.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    /// A single contiguous valid range of guest memory.
    #[derive(Default)]
    pub(crate) struct InMemoryGuest {
        ranges: HashMap<u64, Vec<u8>>,
        invalidations: Vec<(u64, usize)>,
    }

    impl InMemoryGuest {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Seeds `len(bytes)` valid bytes starting at `addr`.
        pub(crate) fn seed(&mut self, addr: u64, bytes: &[u8]) {
            self.ranges.insert(addr, bytes.to_vec());
        }

        fn find(&self, addr: u64, len: usize) -> Option<(&Vec<u8>, usize)> {
            for (&base, buf) in &self.ranges {
                if addr >= base && (addr - base) as usize + len <= buf.len() {
                    return Some((buf, (addr - base) as usize));
                }
            }
            None
        }

        fn find_mut(&mut self, addr: u64, len: usize) -> Option<(&mut Vec<u8>, usize)> {
            for (&base, buf) in &mut self.ranges {
                if addr >= base && (addr - base) as usize + len <= buf.len() {
                    let off = (addr - base) as usize;
                    return Some((buf, off));
                }
            }
            None
        }

        pub(crate) fn invalidations(&self) -> &[(u64, usize)] {
            &self.invalidations
        }
    }

    impl super::GuestMemory for InMemoryGuest {
        fn is_valid(&self, addr: u64, len: usize) -> bool {
            self.find(addr, len).is_some()
        }

        fn read_u8(&self, addr: u64) -> Option<u8> {
            let (buf, off) = self.find(addr, 1)?;
            Some(buf[off])
        }

        fn read_u16(&self, addr: u64) -> Option<u16> {
            let (buf, off) = self.find(addr, 2)?;
            Some(u16::from_le_bytes(buf[off..off + 2].try_into().ok()?))
        }

        fn read_u32(&self, addr: u64) -> Option<u32> {
            let (buf, off) = self.find(addr, 4)?;
            Some(u32::from_le_bytes(buf[off..off + 4].try_into().ok()?))
        }

        fn read_u64(&self, addr: u64) -> Option<u64> {
            let (buf, off) = self.find(addr, 8)?;
            Some(u64::from_le_bytes(buf[off..off + 8].try_into().ok()?))
        }

        fn write_u8(&mut self, addr: u64, val: u8) -> bool {
            let Some((buf, off)) = self.find_mut(addr, 1) else {
                return false;
            };
            buf[off] = val;
            true
        }

        fn write_u16(&mut self, addr: u64, val: u16) -> bool {
            let Some((buf, off)) = self.find_mut(addr, 2) else {
                return false;
            };
            buf[off..off + 2].copy_from_slice(&val.to_le_bytes());
            true
        }

        fn write_u32(&mut self, addr: u64, val: u32) -> bool {
            let Some((buf, off)) = self.find_mut(addr, 4) else {
                return false;
            };
            buf[off..off + 4].copy_from_slice(&val.to_le_bytes());
            true
        }

        fn write_u64(&mut self, addr: u64, val: u64) -> bool {
            let Some((buf, off)) = self.find_mut(addr, 8) else {
                return false;
            };
            buf[off..off + 8].copy_from_slice(&val.to_le_bytes());
            true
        }

        fn read_pointer_silent(&self, addr: u64) -> Option<u64> {
            self.read_u64(addr)
        }

        fn invalidate_instruction_cache(&mut self, addr: u64, len: usize) {
            self.invalidations.push((addr, len));
        }

        fn mark_region_debug(&mut self, _addr: u64, _size: usize, _flag: bool) {}
    }
}

#[cfg(test)]
pub(crate) use testing::InMemoryGuest;
