//! Export writers (C11).
//!
//! Turns a [`Snapshot`] into one of the two cheat-VM opcode text formats, or
//! a human-readable dump used by the CLI and by tests. A PC-count dump
//! writer covers the third documented text format.
//!
//! [`Snapshot`]: crate::snapshot::Snapshot

use std::fmt::Write as _;

use crate::record::{MemoryType, ModifyRecord};
use crate::region::MemoryRegionDescriptor;
use crate::snapshot::Snapshot;

/// Result of `classify(addr)` (§4.8.1): which memory-type class an address
/// falls into for the relative cheat-VM format, plus the region/module
/// naming used by the file header and dump formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// `0` if `addr` is inside a loaded module, `1` if inside the heap,
    /// negative for every other well-known region or an unresolved address.
    pub mt: i32,
    /// Build id of the containing module, empty outside a module.
    pub build_id: String,
    /// Region or module name (`"heap"`, `"unknown"`, a module name, ...).
    pub name: String,
    /// Address rebased to module offset when `mt == 0`; `addr` unchanged
    /// otherwise.
    pub rebased_addr: u64,
}

/// Classifies `addr` against the known region/module list, per §4.8.1:
/// modules take priority over the heap, which takes priority over the
/// other well-known regions; an address in none of them is `"unknown"`.
#[must_use]
pub fn classify(addr: u64, regions: &[MemoryRegionDescriptor]) -> Classification {
    if let Some(module) = regions
        .iter()
        .find(|r| r.kind == crate::region::RegionKind::Module && r.contains(addr))
    {
        return Classification {
            mt: 0,
            build_id: module.build_id.clone(),
            name: module.name.clone(),
            rebased_addr: module.rebase(addr),
        };
    }
    if let Some(heap) = regions
        .iter()
        .find(|r| r.kind == crate::region::RegionKind::Heap && r.contains(addr))
    {
        return Classification {
            mt: 1,
            build_id: String::new(),
            name: heap.name.clone(),
            rebased_addr: addr,
        };
    }
    if let Some(region) = regions.iter().find(|r| r.contains(addr)) {
        return Classification {
            mt: -1,
            build_id: String::new(),
            name: region.name.clone(),
            rebased_addr: addr,
        };
    }
    Classification {
        mt: -1,
        build_id: String::new(),
        name: "unknown".to_owned(),
        rebased_addr: addr,
    }
}

/// Cheat-VM opcode byte used by the absolute format's value-write
/// instruction, per width.
const fn value_opcode(ty: MemoryType) -> u8 {
    match ty {
        MemoryType::U8 => 0x61,
        MemoryType::U16 => 0x62,
        MemoryType::U32 => 0x64,
        MemoryType::U64 => 0x68,
    }
}

/// Cheat-VM opcode nibble used by the relative format's value-write
/// instruction, per width (equal to the element size in bytes).
const fn relative_opcode(ty: MemoryType) -> u8 {
    ty.size_bytes() as u8
}

fn write_value_words(out: &mut String, value: u64) {
    let hi = (value >> 32) as u32;
    let lo = value as u32;
    write!(out, " {hi:08X} {lo:08X}").expect("writing to a String cannot fail");
}

/// Writes every record in `snapshot` as absolute cheat-VM opcode pairs
/// (§4.8): a header line carrying `tag`, then for each record a
/// `40 0B 0000`-address instruction followed by a width-tagged value-write
/// instruction.
#[must_use]
pub fn write_absolute(snapshot: &Snapshot, tag: &str) -> String {
    let mut out = String::new();
    writeln!(out, "{{{tag}}}").expect("writing to a String cannot fail");
    for record in snapshot.values() {
        let addr_hi = (record.addr.addr >> 32) as u32;
        let addr_lo = record.addr.addr as u32;
        writeln!(out, "400B0000 {addr_hi:08X} {addr_lo:08X}").expect("writing to a String cannot fail");
        write!(out, "{:02X}0B0000", value_opcode(record.ty)).expect("writing to a String cannot fail");
        write_value_words(&mut out, record.value);
        out.push('\n');
    }
    out
}

/// Writes every record in `snapshot` as module/heap-relative cheat-VM
/// opcodes (§4.8): each record is classified, and an address that does not
/// resolve to a module or the heap falls back to the absolute-address
/// instruction pair instead. The header is
/// `{build_id_or_name[_firstModuleBuildId]_tag}`: the build id/name of the
/// first resolvable record (falling back to `fallback_tag` if none
/// resolve), the first loaded module's build id appended when that record
/// is in the heap, then `fallback_tag` itself as the trailing tag.
#[must_use]
pub fn write_relative(snapshot: &Snapshot, regions: &[MemoryRegionDescriptor], fallback_tag: &str) -> String {
    let mut out = String::new();
    let resolved = snapshot.values().map(|r| classify(r.addr.addr, regions)).find(|c| c.mt >= 0);
    let (build_part, is_heap) = resolved
        .map(|c| (if c.build_id.is_empty() { c.name } else { c.build_id }, c.mt == 1))
        .unwrap_or_else(|| (fallback_tag.to_owned(), false));
    let module_suffix = if is_heap {
        regions
            .iter()
            .find(|r| r.kind == crate::region::RegionKind::Module)
            .map(|m| format!("_{}", m.build_id))
            .unwrap_or_default()
    } else {
        String::new()
    };
    writeln!(out, "{{{build_part}{module_suffix}_{fallback_tag}}}").expect("writing to a String cannot fail");

    for record in snapshot.values() {
        let classification = classify(record.addr.addr, regions);
        if classification.mt < 0 {
            let addr_hi = (record.addr.addr >> 32) as u32;
            let addr_lo = record.addr.addr as u32;
            writeln!(out, "400B0000 {addr_hi:08X} {addr_lo:08X}").expect("writing to a String cannot fail");
            write!(out, "{:02X}0B0000", value_opcode(record.ty)).expect("writing to a String cannot fail");
        } else {
            let h32 = (classification.rebased_addr >> 32) as u32;
            let l32 = classification.rebased_addr as u32;
            write!(
                out,
                "{:02X}{:01X}000{h32:02X} {l32:08X}",
                relative_opcode(record.ty),
                classification.mt,
            )
            .expect("writing to a String cannot fail");
        }
        write_value_words(&mut out, record.value);
        out.push('\n');
    }
    out
}

/// Element-type discriminant printed in a record dump line (`type:<n>`),
/// matching the original enum's declaration order.
const fn type_discriminant(ty: MemoryType) -> u8 {
    match ty {
        MemoryType::U8 => 0,
        MemoryType::U16 => 1,
        MemoryType::U32 => 2,
        MemoryType::U64 => 3,
    }
}

/// Human-readable dump of one record, classified against `regions`:
/// `addr(<build>:<mt>):<hex> type:<n> val:<hex> old_val:<hex> size:<dec> vaddr:<hex>`.
///
/// `addr` is rebased to module offset when the address resolves to a
/// module (`mt == 0`); `vaddr` is always the original, unrebased address.
#[must_use]
pub fn dump_record(record: &ModifyRecord, regions: &[MemoryRegionDescriptor]) -> String {
    let classification = classify(record.addr.addr, regions);
    format!(
        "addr({}:{}):{:#x} type:{} val:{:#x} old_val:{:#x} size:{} vaddr:{:#x}",
        classification.build_id,
        classification.mt,
        classification.rebased_addr,
        type_discriminant(record.ty),
        record.value,
        record.old_value,
        record.size,
        record.addr.addr,
    )
}

/// Human-readable dump of every record in `snapshot`, one line each,
/// preceded by the `===modify info (count:<N>)===` header from §6.
#[must_use]
pub fn dump_snapshot(snapshot: &Snapshot, regions: &[MemoryRegionDescriptor]) -> String {
    let mut out = format!("===modify info (count:{})===\n", snapshot.len());
    for record in snapshot.values() {
        out.push_str(&dump_record(record, regions));
        out.push('\n');
    }
    out
}

/// `===memory info===` header followed by one line per region, per §6:
/// module lines carry a build id, the six well-known regions instead
/// report a `program id`/`pid` pair borrowed from the first module (or
/// zero, absent any).
#[must_use]
pub fn dump_regions(regions: &[MemoryRegionDescriptor]) -> String {
    let mut out = String::from("===memory info===\n");
    for region in regions.iter().filter(|r| r.kind == crate::region::RegionKind::Module) {
        writeln!(
            out,
            "name:{} build id:{} base:{:#x} size:{:#x} program id:{:#x} pid:{:#x}",
            region.name, region.build_id, region.base, region.size, region.program_id, region.pid,
        )
        .expect("writing to a String cannot fail");
    }
    for region in regions.iter().filter(|r| r.kind != crate::region::RegionKind::Module) {
        let label = if region.kind == crate::region::RegionKind::Heap { "base" } else { "start" };
        writeln!(
            out,
            "{} {label}:{:#x} size:{:#x} program id:{:#x} pid:{:#x}",
            region.kind.dump_name(),
            region.addr,
            region.size,
            region.program_id,
            region.pid,
        )
        .expect("writing to a String cannot fail");
    }
    out
}

/// `trace pc: <hex> offset: <hex> build_id: <s> name: <s> count: <dec>` per
/// entry, classified against `regions`, ordered by pc (the order `dump`
/// already returns them in).
#[must_use]
pub fn dump_pc_count(entries: &[(u64, u64)], regions: &[MemoryRegionDescriptor]) -> String {
    let mut out = String::new();
    for &(pc, count) in entries {
        let c = classify(pc, regions);
        writeln!(
            out,
            "trace pc: {pc:#x} offset: {:#x} build_id: {} name: {} count: {count}",
            c.rebased_addr, c.build_id, c.name,
        )
        .expect("writing to a String cannot fail");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::GuestAddr;
    use crate::region::RegionKind;

    fn sample_snapshot() -> Snapshot {
        let mut snap = Snapshot::new();
        let addr = GuestAddr::new(1, 0x0123_4567_89AB_CDEF);
        snap.insert(addr, ModifyRecord::new(addr, MemoryType::U32, 0x1122_3344));
        snap
    }

    #[test]
    fn classify_resolves_module_before_heap() {
        let regions = vec![
            MemoryRegionDescriptor {
                name: "heap".to_owned(),
                build_id: String::new(),
                base: 0,
                addr: 0,
                size: 0x2000,
                program_id: 0,
                pid: 1,
                kind: RegionKind::Heap,
            },
            MemoryRegionDescriptor {
                name: "main".to_owned(),
                build_id: "abc123".to_owned(),
                base: 0,
                addr: 0x1000,
                size: 0x1000,
                program_id: 0,
                pid: 1,
                kind: RegionKind::Module,
            },
        ];
        let result = classify(0x1040, &regions);
        assert_eq!(result.mt, 0);
        assert_eq!(result.name, "main");
        assert_eq!(result.rebased_addr, 0x40);
    }

    #[test]
    fn classify_falls_back_to_unknown() {
        let result = classify(0x9999, &[]);
        assert_eq!(result.mt, -1);
        assert_eq!(result.name, "unknown");
    }

    #[test]
    fn scenario_s6_absolute_u32_export() {
        let snap = sample_snapshot();
        let text = write_absolute(&snap, "t");
        assert_eq!(
            text,
            "{t}\n400B0000 01234567 89ABCDEF\n640B0000 00000000 11223344\n"
        );
    }

    #[test]
    fn write_relative_falls_back_when_unresolved() {
        let snap = sample_snapshot();
        let text = write_relative(&snap, &[], "cheat");
        assert!(text.starts_with("{cheat_cheat}\n"));
        assert!(text.contains("400B0000"));
    }

    #[test]
    fn write_relative_resolves_module_with_brace_header() {
        let mut snap = Snapshot::new();
        let addr = GuestAddr::new(1, 0x1040);
        snap.insert(addr, ModifyRecord::new(addr, MemoryType::U32, 0x99));
        let regions = vec![MemoryRegionDescriptor {
            name: "main".to_owned(),
            build_id: "abc123".to_owned(),
            base: 0,
            addr: 0x1000,
            size: 0x1000,
            program_id: 0,
            pid: 1,
            kind: RegionKind::Module,
        }];
        let text = write_relative(&snap, &regions, "cheat");
        assert!(text.starts_with("{abc123_cheat}\n"));
        assert!(text.contains("04000000 00000040 00000000 00000099"));
    }

    #[test]
    fn dump_snapshot_includes_header_and_old_value() {
        let mut snap = sample_snapshot();
        let addr = GuestAddr::new(1, 0x0123_4567_89AB_CDEF);
        snap.insert(addr, snap[&addr].observe(0x5555_6666));
        let text = dump_snapshot(&snap, &[]);
        assert!(text.starts_with("===modify info (count:1)===\n"));
        assert!(text.contains("old_val:0x11223344"));
        assert!(text.contains("val:0x55556666"));
        assert!(text.contains("vaddr:0x123456789abcdef"));
    }

    #[test]
    fn dump_regions_lists_modules_then_well_known_regions() {
        let regions = vec![
            MemoryRegionDescriptor {
                name: "main".to_owned(),
                build_id: "abc123".to_owned(),
                base: 0,
                addr: 0x1000,
                size: 0x1000,
                program_id: 7,
                pid: 1,
                kind: RegionKind::Module,
            },
            MemoryRegionDescriptor {
                name: "heap".to_owned(),
                build_id: String::new(),
                base: 0,
                addr: 0x8000_0000,
                size: 0x1000,
                program_id: 7,
                pid: 1,
                kind: RegionKind::Heap,
            },
        ];
        let text = dump_regions(&regions);
        assert!(text.starts_with("===memory info===\n"));
        assert!(text.contains("name:main build id:abc123"));
        assert!(text.contains("heap base:0x80000000"));
    }
}
