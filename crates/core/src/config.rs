//! Configuration for the sniffer engine.
//!
//! This module defines every tunable the engine needs at construction time.
//! It provides:
//! 1. **Defaults:** the constants the original implementation hard-coded
//!    (PC-count bucket geometry, trap-word selection, default step size).
//! 2. **Structure:** a small, flat `EngineConfig` — this engine has nowhere
//!    near the parameter surface of a full hardware model, so there is no
//!    need for the nested hierarchy a cycle-accurate simulator requires.
//!
//! Configuration is supplied as JSON by the embedding host (mirroring the
//! host's own config-from-script convention) or via `EngineConfig::default()`
//! for a CLI-driven session.

use serde::Deserialize;

use crate::breakpoint::Arch;

/// Default configuration constants.
///
/// These mirror the constants used by the original implementation; see
/// `DESIGN.md` for where each one is grounded.
mod defaults {
    /// Number of buckets in the PC-count backing array (`2^16`).
    pub const PC_COUNT_BUCKET_BITS: u32 = 16;

    /// Slots scanned per bucket before falling back to the overflow map.
    pub const PC_COUNT_BUCKET_WIDTH: usize = 8;

    /// Mask for the saturating per-slot counter (low 18 bits).
    pub const PC_COUNT_COUNT_MASK: u64 = 0x3_FFFF;

    /// Architecture assumed for newly attached processes absent other info.
    pub const DEFAULT_ARCH: Arch = Arch::Aarch64;

    /// Default element size (bytes) used by `setmemstep` / `add_sniffing`.
    pub const DEFAULT_MEM_STEP: u8 = 4;

    /// Default maximum number of single-steps serviced per breakpoint hit.
    pub const DEFAULT_MAX_STEP_COUNT: u32 = 1;
}

/// PC-counter geometry and limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PcCountConfig {
    /// `log2` of the number of buckets in the backing array.
    #[serde(default = "PcCountConfig::default_bucket_bits")]
    pub bucket_bits: u32,

    /// Number of slots scanned per bucket before overflowing.
    #[serde(default = "PcCountConfig::default_bucket_width")]
    pub bucket_width: usize,

    /// Mask (and saturation value) for the per-slot counter.
    #[serde(default = "PcCountConfig::default_count_mask")]
    pub count_mask: u64,
}

impl PcCountConfig {
    fn default_bucket_bits() -> u32 {
        defaults::PC_COUNT_BUCKET_BITS
    }

    fn default_bucket_width() -> usize {
        defaults::PC_COUNT_BUCKET_WIDTH
    }

    fn default_count_mask() -> u64 {
        defaults::PC_COUNT_COUNT_MASK
    }
}

impl Default for PcCountConfig {
    fn default() -> Self {
        Self {
            bucket_bits: defaults::PC_COUNT_BUCKET_BITS,
            bucket_width: defaults::PC_COUNT_BUCKET_WIDTH,
            count_mask: defaults::PC_COUNT_COUNT_MASK,
        }
    }
}

/// Breakpoint-table defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BreakpointConfig {
    /// Architecture assumed when a process does not report `is_aarch32`.
    #[serde(default)]
    pub default_arch: Arch,
}

impl Default for BreakpointConfig {
    fn default() -> Self {
        Self {
            default_arch: defaults::DEFAULT_ARCH,
        }
    }
}

/// Command-surface defaults (memory-search parameters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CommandConfig {
    /// Default element size, in bytes, for `add_sniffing` / `setmemstep`.
    #[serde(default = "CommandConfig::default_mem_step")]
    pub default_mem_step: u8,

    /// Default maximum number of steps serviced per breakpoint hit.
    #[serde(default = "CommandConfig::default_max_step_count")]
    pub default_max_step_count: u32,
}

impl CommandConfig {
    fn default_mem_step() -> u8 {
        defaults::DEFAULT_MEM_STEP
    }

    fn default_max_step_count() -> u32 {
        defaults::DEFAULT_MAX_STEP_COUNT
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            default_mem_step: defaults::DEFAULT_MEM_STEP,
            default_max_step_count: defaults::DEFAULT_MAX_STEP_COUNT,
        }
    }
}

/// Export-writer defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportConfig {
    /// Header tag used when no module/build-id can be resolved for the
    /// first emitted record.
    #[serde(default = "ExportConfig::default_tag")]
    pub absolute_tag_fallback: String,
}

impl ExportConfig {
    fn default_tag() -> String {
        "cheat".to_owned()
    }
}

/// Root configuration for an [`Engine`](crate::engine::Engine).
///
/// # Examples
///
/// ```
/// use sniffer_core::config::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert_eq!(config.pc_count.bucket_bits, 16);
/// assert_eq!(config.command.default_mem_step, 4);
/// ```
///
/// Deserializing from JSON (the host's own configuration convention):
///
/// ```
/// use sniffer_core::config::EngineConfig;
///
/// let json = r#"{
///     "pc_count": { "bucket_bits": 16, "bucket_width": 8, "count_mask": 262143 },
///     "breakpoint": { "default_arch": "Aarch64" },
///     "command": { "default_mem_step": 4, "default_max_step_count": 1 },
///     "export": { "absolute_tag_fallback": "cheat" }
/// }"#;
///
/// let config: EngineConfig = serde_json::from_str(json).unwrap();
/// assert_eq!(config.pc_count.count_mask, 0x3_FFFF);
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    /// PC-counter geometry and limits.
    #[serde(default)]
    pub pc_count: PcCountConfig,
    /// Breakpoint-table defaults.
    #[serde(default)]
    pub breakpoint: BreakpointConfig,
    /// Command-surface defaults.
    #[serde(default)]
    pub command: CommandConfig,
    /// Export-writer defaults.
    #[serde(default)]
    pub export: ExportConfig,
}
