//! Machine operand model.
//!
//! The patch instructions carry their payload as a flat operand list in
//! which three meta tags (`DIRECT_MEM_REF_OP`, `INDIRECT_MEM_REF_OP`,
//! `CONSTANT_OP`) announce a logical location spanning several operands.
//! The recorder pattern-matches over `&[Operand]`, so each logical shape is
//! consumed with its full arity in one step.

use crate::emitter::SymbolId;
use crate::regs::PhysReg;

/// Announces `<reg> <imm>`: the value lives at `reg + imm`.
pub const DIRECT_MEM_REF_OP: i64 = 0x7fff_ffff;
/// Announces `<size> <reg> <imm>`: the value is spilled at `[reg + imm]`.
pub const INDIRECT_MEM_REF_OP: i64 = 0x7fff_fffe;
/// Announces `<imm>`: the value is the 64-bit constant itself.
pub const CONSTANT_OP: i64 = 0x7fff_fffd;

/// The calling conventions the patch instructions care about. `AnyReg`
/// forces arguments (and the result, if any) into registers so a runtime
/// can patch over the site freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConv {
    C = 0,
    Fast = 8,
    Cold = 9,
    AnyReg = 13,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegOperand {
    pub reg: PhysReg,
    pub is_def: bool,
    pub is_implicit: bool,
    pub is_early_clobber: bool,
    /// Sub-register index, 0 when the operand names the register itself.
    /// Physical sub-register operands are rewritten away before recording.
    pub sub_reg: u16,
}

impl RegOperand {
    pub fn new(reg: PhysReg) -> Self {
        RegOperand {
            reg,
            is_def: false,
            is_implicit: false,
            is_early_clobber: false,
            sub_reg: 0,
        }
    }

    pub fn def(reg: PhysReg) -> Self {
        RegOperand {
            is_def: true,
            ..RegOperand::new(reg)
        }
    }

    /// A scratch register decoration: implicit early-clobber def.
    pub fn scratch(reg: PhysReg) -> Self {
        RegOperand {
            is_def: true,
            is_implicit: true,
            is_early_clobber: true,
            ..RegOperand::new(reg)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Imm(i64),
    Reg(RegOperand),
    /// Bitmask over physical registers that stay live across the site; bit
    /// `r` sits at word `r / 32`, bit `r % 32`.
    LiveOutMask(Vec<u32>),
    Symbol(SymbolId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    StackMap,
    PatchPoint,
    Statepoint,
}

#[derive(Debug, Clone)]
pub struct MachineInstr {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
}

impl MachineInstr {
    pub fn new(opcode: Opcode, operands: Vec<Operand>) -> Self {
        MachineInstr { opcode, operands }
    }

    /// The immediate at `idx`; anything else there is a malformed
    /// instruction.
    pub fn imm(&self, idx: usize) -> i64 {
        match self.operands[idx] {
            Operand::Imm(v) => v,
            ref op => panic!("expected immediate operand at {}, got {:?}", idx, op),
        }
    }
}

/// View of a patchpoint's operand layout:
/// `[def], <id>, <num bytes>, <target>, <num args>, <cc>, args..., live state..., scratches...`
pub struct PatchPointOpers<'a> {
    mi: &'a MachineInstr,
    has_def: bool,
    is_any_reg: bool,
}

impl<'a> PatchPointOpers<'a> {
    pub const ID_POS: usize = 0;
    pub const NBYTES_POS: usize = 1;
    pub const TARGET_POS: usize = 2;
    pub const NARG_POS: usize = 3;
    pub const CC_POS: usize = 4;
    pub const META_END: usize = 5;

    pub fn new(mi: &'a MachineInstr) -> Self {
        let has_def = matches!(
            mi.operands.first(),
            Some(Operand::Reg(r)) if r.is_def && !r.is_implicit
        );
        let opers = PatchPointOpers {
            mi,
            has_def,
            is_any_reg: false,
        };
        let is_any_reg = opers.meta_imm(Self::CC_POS) == CallingConv::AnyReg as i64;
        let opers = PatchPointOpers { is_any_reg, ..opers };

        #[cfg(debug_assertions)]
        {
            let mut check = 0;
            while check < mi.operands.len()
                && matches!(&mi.operands[check], Operand::Reg(r) if r.is_def && !r.is_implicit)
            {
                check += 1;
            }
            assert_eq!(
                opers.meta_idx(0),
                check,
                "unexpected additional definition in patchpoint"
            );
        }

        opers
    }

    pub fn has_def(&self) -> bool {
        self.has_def
    }

    pub fn is_any_reg(&self) -> bool {
        self.is_any_reg
    }

    pub fn meta_idx(&self, pos: usize) -> usize {
        assert!(pos < Self::META_END, "meta operand index out of range");
        (self.has_def as usize) + pos
    }

    pub fn meta_imm(&self, pos: usize) -> i64 {
        self.mi.imm(self.meta_idx(pos))
    }

    /// First call argument.
    pub fn arg_idx(&self) -> usize {
        self.meta_idx(0) + Self::META_END
    }

    /// First operand of the variable-length live-state tail.
    pub fn var_idx(&self) -> usize {
        self.arg_idx() + self.meta_imm(Self::NARG_POS) as usize
    }

    /// Where location recording starts. Arguments are only recorded under
    /// the anyreg convention.
    pub fn stack_map_start_idx(&self) -> usize {
        if self.is_any_reg {
            self.arg_idx()
        } else {
            self.var_idx()
        }
    }

    /// Find the next scratch register decoration at or after `start_idx`
    /// (0 means "from the variable operands on").
    pub fn next_scratch_idx(&self, start_idx: usize) -> usize {
        let start = if start_idx == 0 {
            self.var_idx()
        } else {
            start_idx
        };
        for idx in start..self.mi.operands.len() {
            if let Operand::Reg(r) = &self.mi.operands[idx] {
                if r.is_def && r.is_implicit && r.is_early_clobber {
                    return idx;
                }
            }
        }
        panic!("no scratch register available");
    }
}

/// View of a statepoint's operand layout:
/// `<id>, <num patch bytes>, <num call args>, <call target>, call args..., deopt/gc state...`
pub struct StatepointOpers<'a> {
    mi: &'a MachineInstr,
}

impl<'a> StatepointOpers<'a> {
    pub const ID_POS: usize = 0;
    pub const NBYTES_POS: usize = 1;
    pub const NCALLARGS_POS: usize = 2;
    pub const CALLTARGET_POS: usize = 3;
    pub const META_END: usize = 4;

    pub fn new(mi: &'a MachineInstr) -> Self {
        StatepointOpers { mi }
    }

    pub fn id(&self) -> u64 {
        self.mi.imm(Self::ID_POS) as u64
    }

    pub fn num_patch_bytes(&self) -> u32 {
        self.mi.imm(Self::NBYTES_POS) as u32
    }

    /// Start of the deopt/gc operands; they run from here to the end of the
    /// operand list.
    pub fn var_idx(&self) -> usize {
        self.mi.imm(Self::NCALLARGS_POS) as usize + Self::META_END
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x64::{RAX, RCX, RDI};

    fn patchpoint(operands: Vec<Operand>) -> MachineInstr {
        MachineInstr::new(Opcode::PatchPoint, operands)
    }

    #[test]
    fn patchpoint_meta_without_def() {
        let mi = patchpoint(vec![
            Operand::Imm(11),
            Operand::Imm(8),
            Operand::Imm(0),
            Operand::Imm(1),
            Operand::Imm(CallingConv::C as i64),
            Operand::Reg(RegOperand::new(RDI)),
        ]);
        let opers = PatchPointOpers::new(&mi);
        assert!(!opers.has_def());
        assert!(!opers.is_any_reg());
        assert_eq!(opers.meta_imm(PatchPointOpers::ID_POS), 11);
        assert_eq!(opers.arg_idx(), 5);
        assert_eq!(opers.var_idx(), 6);
        assert_eq!(opers.stack_map_start_idx(), 6);
    }

    #[test]
    fn patchpoint_meta_with_def_anyreg() {
        let mi = patchpoint(vec![
            Operand::Reg(RegOperand::def(RAX)),
            Operand::Imm(12),
            Operand::Imm(8),
            Operand::Imm(0),
            Operand::Imm(0),
            Operand::Imm(CallingConv::AnyReg as i64),
        ]);
        let opers = PatchPointOpers::new(&mi);
        assert!(opers.has_def());
        assert!(opers.is_any_reg());
        assert_eq!(opers.meta_imm(PatchPointOpers::ID_POS), 12);
        assert_eq!(opers.stack_map_start_idx(), opers.arg_idx());
    }

    #[test]
    fn patchpoint_scratch_lookup() {
        let mi = patchpoint(vec![
            Operand::Imm(1),
            Operand::Imm(8),
            Operand::Imm(0),
            Operand::Imm(0),
            Operand::Imm(CallingConv::C as i64),
            Operand::Imm(CONSTANT_OP),
            Operand::Imm(7),
            Operand::Reg(RegOperand::scratch(RCX)),
        ]);
        let opers = PatchPointOpers::new(&mi);
        assert_eq!(opers.next_scratch_idx(0), 7);
    }

    #[test]
    fn statepoint_var_idx() {
        let mi = MachineInstr::new(
            Opcode::Statepoint,
            vec![
                Operand::Imm(99),
                Operand::Imm(0),
                Operand::Imm(2),
                Operand::Imm(0),
                Operand::Reg(RegOperand::new(RDI)),
                Operand::Reg(RegOperand::new(RCX)),
                Operand::Imm(CONSTANT_OP),
                Operand::Imm(0),
            ],
        );
        let opers = StatepointOpers::new(&mi);
        assert_eq!(opers.id(), 99);
        assert_eq!(opers.var_idx(), 6);
    }
}
