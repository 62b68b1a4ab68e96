//! x86-64 register catalog.
//!
//! Covers the 16 general-purpose registers with their 32/16/8-bit slices
//! (including the four legacy high-byte registers) and the 16 SSE
//! registers. DWARF numbers follow the System V x86-64 psABI: only the
//! widest form of each register carries one, narrower forms resolve
//! through the super-register chain.

use crate::regs::{PhysReg, RegisterCatalog, SubRegIndex};

pub const SUB_8BIT: SubRegIndex = SubRegIndex(1);
pub const SUB_8BIT_HI: SubRegIndex = SubRegIndex(2);
pub const SUB_16BIT: SubRegIndex = SubRegIndex(3);
pub const SUB_32BIT: SubRegIndex = SubRegIndex(4);

macro_rules! regs {
    ($($name:ident = $idx:expr),* $(,)?) => {
        $(pub const $name: PhysReg = PhysReg($idx);)*
    };
}

regs! {
    RAX = 0, RDX = 1, RCX = 2, RBX = 3, RSI = 4, RDI = 5, RBP = 6, RSP = 7,
    R8 = 8, R9 = 9, R10 = 10, R11 = 11, R12 = 12, R13 = 13, R14 = 14, R15 = 15,
    EAX = 16, EDX = 17, ECX = 18, EBX = 19, ESI = 20, EDI = 21, EBP = 22, ESP = 23,
    R8D = 24, R9D = 25, R10D = 26, R11D = 27, R12D = 28, R13D = 29, R14D = 30, R15D = 31,
    AX = 32, DX = 33, CX = 34, BX = 35, SI = 36, DI = 37, BP = 38, SP = 39,
    R8W = 40, R9W = 41, R10W = 42, R11W = 43, R12W = 44, R13W = 45, R14W = 46, R15W = 47,
    AL = 48, DL = 49, CL = 50, BL = 51, SIL = 52, DIL = 53, BPL = 54, SPL = 55,
    R8B = 56, R9B = 57, R10B = 58, R11B = 59, R12B = 60, R13B = 61, R14B = 62, R15B = 63,
    AH = 64, DH = 65, CH = 66, BH = 67,
    XMM0 = 68, XMM1 = 69, XMM2 = 70, XMM3 = 71, XMM4 = 72, XMM5 = 73, XMM6 = 74, XMM7 = 75,
    XMM8 = 76, XMM9 = 77, XMM10 = 78, XMM11 = 79, XMM12 = 80, XMM13 = 81, XMM14 = 82, XMM15 = 83,
}

struct RegDesc {
    name: &'static str,
    dwarf: Option<u16>,
    size: u8,
    super_reg: Option<PhysReg>,
    sub_idx: Option<SubRegIndex>,
}

const fn root(name: &'static str, dwarf: u16, size: u8) -> RegDesc {
    RegDesc {
        name,
        dwarf: Some(dwarf),
        size,
        super_reg: None,
        sub_idx: None,
    }
}

const fn slice(name: &'static str, size: u8, sup: PhysReg, idx: SubRegIndex) -> RegDesc {
    RegDesc {
        name,
        dwarf: None,
        size,
        super_reg: Some(sup),
        sub_idx: Some(idx),
    }
}

static TABLE: [RegDesc; 84] = [
    root("rax", 0, 8),
    root("rdx", 1, 8),
    root("rcx", 2, 8),
    root("rbx", 3, 8),
    root("rsi", 4, 8),
    root("rdi", 5, 8),
    root("rbp", 6, 8),
    root("rsp", 7, 8),
    root("r8", 8, 8),
    root("r9", 9, 8),
    root("r10", 10, 8),
    root("r11", 11, 8),
    root("r12", 12, 8),
    root("r13", 13, 8),
    root("r14", 14, 8),
    root("r15", 15, 8),
    slice("eax", 4, RAX, SUB_32BIT),
    slice("edx", 4, RDX, SUB_32BIT),
    slice("ecx", 4, RCX, SUB_32BIT),
    slice("ebx", 4, RBX, SUB_32BIT),
    slice("esi", 4, RSI, SUB_32BIT),
    slice("edi", 4, RDI, SUB_32BIT),
    slice("ebp", 4, RBP, SUB_32BIT),
    slice("esp", 4, RSP, SUB_32BIT),
    slice("r8d", 4, R8, SUB_32BIT),
    slice("r9d", 4, R9, SUB_32BIT),
    slice("r10d", 4, R10, SUB_32BIT),
    slice("r11d", 4, R11, SUB_32BIT),
    slice("r12d", 4, R12, SUB_32BIT),
    slice("r13d", 4, R13, SUB_32BIT),
    slice("r14d", 4, R14, SUB_32BIT),
    slice("r15d", 4, R15, SUB_32BIT),
    slice("ax", 2, EAX, SUB_16BIT),
    slice("dx", 2, EDX, SUB_16BIT),
    slice("cx", 2, ECX, SUB_16BIT),
    slice("bx", 2, EBX, SUB_16BIT),
    slice("si", 2, ESI, SUB_16BIT),
    slice("di", 2, EDI, SUB_16BIT),
    slice("bp", 2, EBP, SUB_16BIT),
    slice("sp", 2, ESP, SUB_16BIT),
    slice("r8w", 2, R8D, SUB_16BIT),
    slice("r9w", 2, R9D, SUB_16BIT),
    slice("r10w", 2, R10D, SUB_16BIT),
    slice("r11w", 2, R11D, SUB_16BIT),
    slice("r12w", 2, R12D, SUB_16BIT),
    slice("r13w", 2, R13D, SUB_16BIT),
    slice("r14w", 2, R14D, SUB_16BIT),
    slice("r15w", 2, R15D, SUB_16BIT),
    slice("al", 1, AX, SUB_8BIT),
    slice("dl", 1, DX, SUB_8BIT),
    slice("cl", 1, CX, SUB_8BIT),
    slice("bl", 1, BX, SUB_8BIT),
    slice("sil", 1, SI, SUB_8BIT),
    slice("dil", 1, DI, SUB_8BIT),
    slice("bpl", 1, BP, SUB_8BIT),
    slice("spl", 1, SP, SUB_8BIT),
    slice("r8b", 1, R8W, SUB_8BIT),
    slice("r9b", 1, R9W, SUB_8BIT),
    slice("r10b", 1, R10W, SUB_8BIT),
    slice("r11b", 1, R11W, SUB_8BIT),
    slice("r12b", 1, R12W, SUB_8BIT),
    slice("r13b", 1, R13W, SUB_8BIT),
    slice("r14b", 1, R14W, SUB_8BIT),
    slice("r15b", 1, R15W, SUB_8BIT),
    slice("ah", 1, AX, SUB_8BIT_HI),
    slice("dh", 1, DX, SUB_8BIT_HI),
    slice("ch", 1, CX, SUB_8BIT_HI),
    slice("bh", 1, BX, SUB_8BIT_HI),
    root("xmm0", 17, 16),
    root("xmm1", 18, 16),
    root("xmm2", 19, 16),
    root("xmm3", 20, 16),
    root("xmm4", 21, 16),
    root("xmm5", 22, 16),
    root("xmm6", 23, 16),
    root("xmm7", 24, 16),
    root("xmm8", 25, 16),
    root("xmm9", 26, 16),
    root("xmm10", 27, 16),
    root("xmm11", 28, 16),
    root("xmm12", 29, 16),
    root("xmm13", 30, 16),
    root("xmm14", 31, 16),
    root("xmm15", 32, 16),
];

fn desc(reg: PhysReg) -> &'static RegDesc {
    &TABLE[reg.0 as usize]
}

pub fn reg_name(reg: PhysReg) -> &'static str {
    desc(reg).name
}

/// Catalog over the static table above.
#[derive(Debug, Clone, Copy, Default)]
pub struct X64Catalog;

impl RegisterCatalog for X64Catalog {
    fn num_regs(&self) -> u16 {
        TABLE.len() as u16
    }

    fn dwarf_num(&self, reg: PhysReg) -> Option<u16> {
        desc(reg).dwarf
    }

    fn super_regs(&self, reg: PhysReg) -> Vec<PhysReg> {
        let mut chain = Vec::new();
        let mut cur = desc(reg).super_reg;
        while let Some(sup) = cur {
            chain.push(sup);
            cur = desc(sup).super_reg;
        }
        chain
    }

    fn spill_size(&self, reg: PhysReg) -> u8 {
        desc(reg).size
    }

    fn sub_reg_index(&self, base: PhysReg, sub: PhysReg) -> Option<SubRegIndex> {
        if self.is_super_register(sub, base) {
            desc(sub).sub_idx
        } else {
            None
        }
    }

    fn sub_reg_idx_offset(&self, idx: SubRegIndex) -> u32 {
        if idx == SUB_8BIT_HI {
            1
        } else {
            0
        }
    }

    fn is_super_register(&self, reg: PhysReg, other: PhysReg) -> bool {
        self.super_regs(reg).contains(&other)
    }

    fn reg_for_dwarf(&self, dwarf: u16) -> Option<PhysReg> {
        TABLE
            .iter()
            .position(|d| d.dwarf == Some(dwarf))
            .map(|i| PhysReg(i as u16))
    }
}
