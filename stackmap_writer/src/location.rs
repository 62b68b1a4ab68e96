use smallvec::SmallVec;

use crate::emitter::PcOffsetExpr;
use crate::regs::PhysReg;

/// How a value can be materialized at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LocationKind {
    Unprocessed = 0,
    /// Value lives in a register.
    Register = 1,
    /// Value is at `reg + offset` (a frame address).
    Direct = 2,
    /// Value is spilled at `[reg + offset]`.
    Indirect = 3,
    /// Value is the small constant `offset` itself.
    Constant = 4,
    /// Value is the pooled constant at index `offset`.
    ConstantIndex = 5,
}

/// A single value's placement at a call site.
///
/// `offset` is kept at 64 bits while recording so a `Constant` can hold any
/// immediate; constants that do not fit the serialized 32-bit field are
/// moved into the pool before emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub kind: LocationKind,
    pub size: u8,
    pub dwarf_reg: u16,
    pub offset: i64,
}

impl Location {
    pub fn new(kind: LocationKind, size: u8, dwarf_reg: u16, offset: i64) -> Self {
        Location {
            kind,
            size,
            dwarf_reg,
            offset,
        }
    }
}

/// A register whose content stays live across a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveOutReg {
    /// Catalog-local register number; not serialized.
    pub reg: PhysReg,
    pub dwarf_reg: u16,
    /// Spill-slot size sufficient for the widest overlapping register.
    pub size: u8,
    /// Merge-pass scratch; entries losing their run are dropped.
    pub(crate) valid: bool,
}

impl LiveOutReg {
    pub fn new(reg: PhysReg, dwarf_reg: u16, size: u8) -> Self {
        LiveOutReg {
            reg,
            dwarf_reg,
            size,
            valid: true,
        }
    }
}

pub type LocationVec = SmallVec<[Location; 8]>;
pub type LiveOutVec = SmallVec<[LiveOutReg; 8]>;

/// One record per stackmap/patchpoint/statepoint instruction.
#[derive(Debug, Clone)]
pub struct CallSiteInfo {
    /// `label(call site) - label(function entry)`, resolved at emission.
    pub pc_offset_expr: PcOffsetExpr,
    pub id: u64,
    pub locations: LocationVec,
    pub live_outs: LiveOutVec,
}
