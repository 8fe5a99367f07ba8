//! Execution trace buffer (C9).
//!
//! An append-only log of formatted lines, one per traced instruction or
//! register dump. The buffer itself has no opinion on what triggered a line
//! — the watch/trace registry (C7) decides when to append, based on the
//! watch/log-filter configuration — it only owns storage, the register
//! dumper, and the two dump formats.

use crate::guest::{BacktraceEntry, GuestMemory, RegisterContext};

/// Registers packed per line in the general/vector register dump.
const REGS_PER_LINE: usize = 16;
/// Maximum stack words read starting at `sp`.
const MAX_STACK_WORDS: usize = 32;
/// Maximum thread-local-storage words read starting at `tls`.
const MAX_TLS_WORDS: usize = 16;

/// Append-only text trace.
#[derive(Debug, Default)]
pub struct TraceBuffer {
    lines: Vec<String>,
}

impl TraceBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one line, verbatim.
    pub fn push_line(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Appends a formatted instruction-retirement line:
    /// `{pc:#x}: {mnemonic}`.
    pub fn push_instruction(&mut self, pc: u64, mnemonic: &str) {
        self.lines.push(format!("{pc:#x}: {mnemonic}"));
    }

    /// Full register dump for one thread, per §4.6: process/program/thread
    /// identifiers, the 29 general registers and 32 vector registers
    /// (packed `REGS_PER_LINE` per line), up to `MAX_STACK_WORDS` stack
    /// words and `MAX_TLS_WORDS` TLS words (only when `sp`/`tls` resolve
    /// through `memory`), the scalar registers, and an optional backtrace.
    pub fn dump_thread_state(
        &mut self,
        memory: &impl GuestMemory,
        pid: u64,
        program_id: u64,
        tid: u64,
        ctx: &RegisterContext,
        backtrace: Option<&[BacktraceEntry]>,
    ) {
        self.lines.push(format!("pid:{pid:#x} program_id:{program_id:#x} tid:{tid:#x}"));

        for chunk in ctx.gpr.chunks(REGS_PER_LINE) {
            let words: Vec<String> = chunk.iter().map(|r| format!("{r:016x}")).collect();
            self.lines.push(format!("gpr: {}", words.join(" ")));
        }
        for chunk in ctx.vector.chunks(REGS_PER_LINE) {
            let words: Vec<String> = chunk.iter().map(|&(hi, lo)| format!("{hi:016x}{lo:016x}")).collect();
            self.lines.push(format!("vec: {}", words.join(" ")));
        }

        if memory.is_valid(ctx.sp, 8) {
            let words: Vec<String> = (0..MAX_STACK_WORDS)
                .map_while(|i| memory.read_u64(ctx.sp + (i as u64) * 8))
                .map(|w| format!("{w:016x}"))
                .collect();
            self.lines.push(format!("stack: {}", words.join(" ")));
        }
        if memory.is_valid(ctx.tls, 8) {
            let words: Vec<String> = (0..MAX_TLS_WORDS)
                .map_while(|i| memory.read_u64(ctx.tls + (i as u64) * 8))
                .map(|w| format!("{w:016x}"))
                .collect();
            self.lines.push(format!("tls_words: {}", words.join(" ")));
        }

        self.lines.push(format!("pc={:#018x}", ctx.pc));
        self.lines.push(format!("sp={:#018x}", ctx.sp));
        self.lines.push(format!("pstate={:#010x}", ctx.pstate));
        self.lines.push(format!("tls={:#018x}", ctx.tls));
        self.lines.push(format!("tpidr_el0={:#018x}", ctx.tpidr_el0));

        if let Some(frames) = backtrace {
            for frame in frames {
                self.lines.push(format!(
                    "bt: {} addr:{:#x} orig:{:#x} off:{:#x} sym:{}{}",
                    frame.module,
                    frame.address,
                    frame.original_address,
                    frame.offset,
                    frame.symbol,
                    frame
                        .host_pointer
                        .map(|p| format!(" host:{p:#x}"))
                        .unwrap_or_default(),
                ));
            }
        }
    }

    /// Number of lines currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the buffer holds no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Empties the buffer (`cleartracebuffer`).
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Every buffered line, in append order.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Joins every line with `\n`, for a single export write.
    #[must_use]
    pub fn dump(&self) -> String {
        self.lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::testing::InMemoryGuest;

    #[test]
    fn dump_thread_state_orders_identifiers_then_registers_then_scalars() {
        let mut mem = InMemoryGuest::new();
        mem.seed(0x7000, &[0u8; 256]);
        let mut buf = TraceBuffer::new();
        let ctx = RegisterContext {
            pc: 0x1234,
            sp: 0x7000,
            pstate: 0x6000_0000,
            ..RegisterContext::default()
        };
        buf.dump_thread_state(&mem, 1, 2, 3, &ctx, None);

        assert_eq!(buf.lines()[0], "pid:0x1 program_id:0x2 tid:0x3");
        // 29 gprs -> ceil(29/16) = 2 lines, 32 vectors -> 2 lines.
        let stack_line = &buf.lines()[1 + 2 + 2];
        assert!(stack_line.starts_with("stack: "));
        assert_eq!(stack_line["stack: ".len()..].split(' ').count(), 32);
        assert!(buf.lines().iter().any(|l| l.starts_with("pc=")));
        assert!(buf.lines().iter().any(|l| l.starts_with("tpidr_el0=")));
    }

    #[test]
    fn dump_thread_state_skips_stack_and_tls_when_invalid() {
        let mem = InMemoryGuest::new();
        let mut buf = TraceBuffer::new();
        let ctx = RegisterContext {
            sp: 0xDEAD_0000,
            tls: 0xBEEF_0000,
            ..RegisterContext::default()
        };
        buf.dump_thread_state(&mem, 1, 1, 1, &ctx, None);
        assert!(!buf.lines().iter().any(|l| l.starts_with("stack:")));
        assert!(!buf.lines().iter().any(|l| l.starts_with("tls_words:")));
    }

    #[test]
    fn dump_thread_state_appends_backtrace_when_provided() {
        let mem = InMemoryGuest::new();
        let mut buf = TraceBuffer::new();
        let frames = vec![BacktraceEntry {
            module: "main".to_owned(),
            address: 0x1000,
            original_address: 0x1000,
            offset: 0x10,
            symbol: "fn".to_owned(),
            host_pointer: None,
        }];
        buf.dump_thread_state(&mem, 1, 1, 1, &RegisterContext::default(), Some(&frames));
        assert!(buf.lines().iter().any(|l| l.starts_with("bt: main")));
    }

    #[test]
    fn clear_empties_buffer() {
        let mut buf = TraceBuffer::new();
        buf.push_instruction(0x100, "nop");
        assert!(!buf.is_empty());
        buf.clear();
        assert!(buf.is_empty());
    }
}
