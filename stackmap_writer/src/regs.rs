//! Register catalog abstraction.
//!
//! The recorder only ever needs a handful of queries about the target's
//! physical registers, so they are collected in one trait rather than
//! dragging a whole target description in. See [`crate::x64`] for a concrete
//! catalog.

/// A physical register number, local to the catalog that issued it.
///
/// Virtual registers never appear here; rewriting them away is the register
/// allocator's job, and the type makes a leak impossible to express.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysReg(pub u16);

/// Identifies a sub-register slice of a wider register (e.g. the low 32 bits
/// of a 64-bit register). `sub_reg_idx_offset` turns it into a byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubRegIndex(pub u16);

pub trait RegisterCatalog {
    /// Total number of physical registers; live-out masks carry one bit per
    /// register, `num_regs` bits in all.
    fn num_regs(&self) -> u16;

    /// The DWARF number assigned directly to `reg`, if any. Sub-registers
    /// typically have none and resolve through their super-registers.
    fn dwarf_num(&self, reg: PhysReg) -> Option<u16>;

    /// The chain of strictly wider registers containing `reg`, nearest
    /// first.
    fn super_regs(&self, reg: PhysReg) -> Vec<PhysReg>;

    /// Size in bytes of the minimal register class that can hold `reg`,
    /// i.e. the spill-slot size sufficient for its content.
    fn spill_size(&self, reg: PhysReg) -> u8;

    /// The sub-register index of `sub` within `base`, or `None` when `sub`
    /// is not a proper sub-register of `base`.
    fn sub_reg_index(&self, base: PhysReg, sub: PhysReg) -> Option<SubRegIndex>;

    /// Byte offset of the slice named by `idx` within its enclosing
    /// register.
    fn sub_reg_idx_offset(&self, idx: SubRegIndex) -> u32;

    /// True when `other` is a (strict) super-register of `reg`.
    fn is_super_register(&self, reg: PhysReg, other: PhysReg) -> bool;

    /// The register that carries `dwarf` as its direct DWARF number.
    fn reg_for_dwarf(&self, dwarf: u16) -> Option<PhysReg>;
}

/// Go up the super-register chain until we hit a valid DWARF register
/// number.
///
/// Panics when the chain runs out; a register with no DWARF ancestor cannot
/// be described to a runtime and indicates a broken catalog.
pub fn dwarf_reg_num<R: RegisterCatalog>(regs: &R, reg: PhysReg) -> u16 {
    regs.dwarf_num(reg)
        .or_else(|| {
            regs.super_regs(reg)
                .into_iter()
                .find_map(|sr| regs.dwarf_num(sr))
        })
        .unwrap_or_else(|| panic!("invalid dwarf register number for {:?}", reg))
}
