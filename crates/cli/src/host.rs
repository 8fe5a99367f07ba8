//! Standalone host implementations for the `sniff` CLI.
//!
//! The real guest-memory and process-registry implementations belong to an
//! emulator host (C1, C2 are external collaborators the engine only calls
//! through a trait). This binary has no emulator attached, so it supplies a
//! minimal flat-buffer memory and a single-fake-thread process registry —
//! enough to drive a command script end to end for testing or demos,
//! mirroring the crate's own `tests/command_surface.rs` fixture style.

use std::collections::HashMap;

use sniffer_core::guest::{ArmInterface, BacktraceEntry, GuestMemory, ProcessRegistry, RegisterContext, ThreadInfo};

/// A flat byte-addressable guest memory, valid everywhere within its size.
pub struct FlatGuest {
    bytes: Vec<u8>,
}

impl FlatGuest {
    /// Allocates `size` bytes of guest memory, all initially zero.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self { bytes: vec![0; size] }
    }
}

impl GuestMemory for FlatGuest {
    fn is_valid(&self, addr: u64, len: usize) -> bool {
        usize::try_from(addr).is_ok_and(|a| a.checked_add(len).is_some_and(|end| end <= self.bytes.len()))
    }

    fn read_u8(&self, addr: u64) -> Option<u8> {
        self.bytes.get(usize::try_from(addr).ok()?).copied()
    }

    fn read_u16(&self, addr: u64) -> Option<u16> {
        let idx = usize::try_from(addr).ok()?;
        self.bytes.get(idx..idx + 2).map(|s| u16::from_le_bytes(s.try_into().unwrap_or_default()))
    }

    fn read_u32(&self, addr: u64) -> Option<u32> {
        let idx = usize::try_from(addr).ok()?;
        self.bytes.get(idx..idx + 4).map(|s| u32::from_le_bytes(s.try_into().unwrap_or_default()))
    }

    fn read_u64(&self, addr: u64) -> Option<u64> {
        let idx = usize::try_from(addr).ok()?;
        self.bytes.get(idx..idx + 8).map(|s| u64::from_le_bytes(s.try_into().unwrap_or_default()))
    }

    fn write_u8(&mut self, addr: u64, val: u8) -> bool {
        let Ok(idx) = usize::try_from(addr) else { return false };
        let Some(slot) = self.bytes.get_mut(idx) else { return false };
        *slot = val;
        true
    }

    fn write_u16(&mut self, addr: u64, val: u16) -> bool {
        let Ok(idx) = usize::try_from(addr) else { return false };
        let Some(slice) = self.bytes.get_mut(idx..idx + 2) else { return false };
        slice.copy_from_slice(&val.to_le_bytes());
        true
    }

    fn write_u32(&mut self, addr: u64, val: u32) -> bool {
        let Ok(idx) = usize::try_from(addr) else { return false };
        let Some(slice) = self.bytes.get_mut(idx..idx + 4) else { return false };
        slice.copy_from_slice(&val.to_le_bytes());
        true
    }

    fn write_u64(&mut self, addr: u64, val: u64) -> bool {
        let Ok(idx) = usize::try_from(addr) else { return false };
        let Some(slice) = self.bytes.get_mut(idx..idx + 8) else { return false };
        slice.copy_from_slice(&val.to_le_bytes());
        true
    }

    fn read_pointer_silent(&self, addr: u64) -> Option<u64> {
        self.read_u64(addr)
    }

    fn invalidate_instruction_cache(&mut self, _addr: u64, _len: usize) {}

    fn mark_region_debug(&mut self, _addr: u64, _size: usize, _flag: bool) {}
}

struct NoopArm;

impl ArmInterface for NoopArm {
    fn is_aarch32(&self) -> bool {
        false
    }
    fn context(&self) -> RegisterContext {
        RegisterContext::default()
    }
    fn init_jit_once(&mut self, _region_begin: u64, _region_end: u64) {}
    fn start_trace(&mut self) {}
    fn stop_trace(&mut self) {}
    fn start_pc_count(&mut self) {}
    fn stop_pc_count(&mut self) {}
}

/// A single-process, single-thread process registry, enough to make
/// `dumpreg`/watch emission observable from a command script without a
/// real emulator attached.
pub struct StubProcesses {
    threads: HashMap<usize, ThreadInfo>,
    arms: Vec<NoopArm>,
}

impl StubProcesses {
    /// One fake process (pid 1) with one thread scheduled on core 0.
    #[must_use]
    pub fn new(core_count: usize) -> Self {
        let mut threads = HashMap::new();
        threads.insert(0, ThreadInfo { handle: 1, tid: 1, pid: 1, core_ix: 0 });
        Self { threads, arms: (0..core_count).map(|_| NoopArm).collect() }
    }
}

impl ProcessRegistry for StubProcesses {
    fn process_list(&self) -> Vec<u64> {
        vec![1]
    }

    fn is_alive(&self, pid: u64) -> bool {
        pid == 1
    }

    fn physical_core_count(&self) -> usize {
        self.arms.len()
    }

    fn current_thread(&self, core_ix: usize) -> Option<ThreadInfo> {
        self.threads.get(&core_ix).copied()
    }

    fn arm_interface(&self, core_ix: usize) -> Option<&dyn ArmInterface> {
        self.arms.get(core_ix).map(|a| a as &dyn ArmInterface)
    }

    fn arm_interface_mut(&mut self, core_ix: usize) -> Option<&mut dyn ArmInterface> {
        self.arms.get_mut(core_ix).map(|a| a as &mut dyn ArmInterface)
    }

    fn backtrace(&self, _thread: ThreadInfo) -> Vec<BacktraceEntry> {
        Vec::new()
    }
}
