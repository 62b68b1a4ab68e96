//! Call-site recording and section serialization.

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use log::{debug, trace};

use crate::emitter::{PcOffsetExpr, StreamEmitter, SymbolId};
use crate::location::{CallSiteInfo, LiveOutReg, LiveOutVec, Location, LocationKind, LocationVec};
use crate::operand::{
    MachineInstr, Opcode, Operand, PatchPointOpers, StatepointOpers, CONSTANT_OP,
    DIRECT_MEM_REF_OP, INDIRECT_MEM_REF_OP,
};
use crate::regs::{dwarf_reg_num, PhysReg, RegisterCatalog};

/// The only binary layout version this writer knows how to emit.
pub const STACK_MAP_VERSION: u8 = 1;

/// Prefix for the debug dump.
const WSMP: &str = "Stack Maps: ";

/// Per-function frame facts the recorder folds into the frame table.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameInfo {
    pub stack_size: u64,
    pub has_var_sized_objects: bool,
    pub needs_realignment: bool,
}

impl FrameInfo {
    pub fn fixed(stack_size: u64) -> Self {
        FrameInfo {
            stack_size,
            ..FrameInfo::default()
        }
    }

    /// Frames whose size only exists at run time are recorded with a
    /// sentinel instead of a byte count.
    pub fn is_dynamic(&self) -> bool {
        self.has_var_sized_objects || self.needs_realignment
    }

    fn recorded_size(&self) -> u64 {
        if self.is_dynamic() {
            u64::MAX
        } else {
            self.stack_size
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CurrentFunction {
    entry: SymbolId,
    frame: FrameInfo,
}

/// Accumulates stack map data during code emission and serializes it into
/// the stack map section.
///
/// The host drives it in three phases per compilation unit: one
/// `begin_function` per emitted function, `record_*` at each patch
/// instruction while the instruction stream is being emitted (the call-site
/// label is taken from the emitter's current position), and a final
/// `serialize_to_stack_map_section`.
pub struct StackMaps<E, R> {
    emitter: E,
    regs: R,
    pointer_size: u8,
    cur_func: Option<CurrentFunction>,
    cs_infos: Vec<CallSiteInfo>,
    const_pool: IndexSet<u64>,
    fn_stack_size: IndexMap<SymbolId, u64>,
}

impl<E: StreamEmitter, R: RegisterCatalog> StackMaps<E, R> {
    /// `version` comes from the host's `stackmap-version` option; anything
    /// but [`STACK_MAP_VERSION`] is unsupported.
    pub fn new(emitter: E, regs: R, pointer_size_bits: u32, version: u8) -> Self {
        assert_eq!(version, STACK_MAP_VERSION, "unsupported stackmap version");
        assert_eq!(pointer_size_bits % 8, 0, "need pointer size in bytes");
        StackMaps {
            emitter,
            regs,
            pointer_size: (pointer_size_bits / 8) as u8,
            cur_func: None,
            cs_infos: Vec::new(),
            const_pool: IndexSet::new(),
            fn_stack_size: IndexMap::new(),
        }
    }

    pub fn emitter(&self) -> &E {
        &self.emitter
    }

    pub fn emitter_mut(&mut self) -> &mut E {
        &mut self.emitter
    }

    pub fn into_emitter(self) -> E {
        self.emitter
    }

    /// Frame sizes recorded so far, keyed by function entry symbol.
    /// Dynamic frames hold `u64::MAX`. Survives serialization so other
    /// consumers can re-emit it.
    pub fn function_stack_sizes(&self) -> &IndexMap<SymbolId, u64> {
        &self.fn_stack_size
    }

    /// Establishes the function whose instructions are being emitted;
    /// `entry` must already be bound to the function's first byte.
    pub fn begin_function(&mut self, entry: SymbolId, frame: FrameInfo) {
        self.cur_func = Some(CurrentFunction { entry, frame });
    }

    pub fn record_stack_map(&mut self, mi: &MachineInstr) {
        assert_eq!(mi.opcode, Opcode::StackMap, "expected stackmap");

        let id = mi.imm(0) as u64;
        // operand 1 is the shadow-byte count; live values start at 2
        self.record_stack_map_opers(mi, id, 2, false);
    }

    pub fn record_patch_point(&mut self, mi: &MachineInstr) {
        assert_eq!(mi.opcode, Opcode::PatchPoint, "expected patchpoint");

        let opers = PatchPointOpers::new(mi);
        let id = opers.meta_imm(PatchPointOpers::ID_POS) as u64;
        let start = opers.stack_map_start_idx();
        let record_result = opers.is_any_reg() && opers.has_def();
        self.record_stack_map_opers(mi, id, start, record_result);

        #[cfg(debug_assertions)]
        {
            // verify anyregcc
            let opers = PatchPointOpers::new(mi);
            if opers.is_any_reg() {
                let n_args = opers.meta_imm(PatchPointOpers::NARG_POS) as usize;
                let n = if opers.has_def() { n_args + 1 } else { n_args };
                let locations = &self.cs_infos.last().unwrap().locations;
                for loc in &locations[..n] {
                    assert_eq!(loc.kind, LocationKind::Register, "anyreg arg must be in reg");
                }
            }
        }
    }

    pub fn record_statepoint(&mut self, mi: &MachineInstr) {
        assert_eq!(mi.opcode, Opcode::Statepoint, "expected statepoint");

        let opers = StatepointOpers::new(mi);
        // the deopt and gc operands are contiguous and run from the
        // variable index to the end of the operand list
        let start = opers.var_idx();
        self.record_stack_map_opers(mi, opers.id(), start, false);
    }

    fn record_stack_map_opers(
        &mut self,
        mi: &MachineInstr,
        id: u64,
        start_idx: usize,
        record_result: bool,
    ) {
        let label = self.emitter.create_temp_symbol();
        self.emitter.emit_label(label);

        let mut locations = LocationVec::new();
        let mut live_outs = LiveOutVec::new();

        if record_result {
            assert!(
                PatchPointOpers::new(mi).has_def(),
                "stackmap has no return value"
            );
            self.parse_operand(&mi.operands[0..1], &mut locations, &mut live_outs);
        }

        let mut rest = &mi.operands[start_idx..];
        while !rest.is_empty() {
            rest = self.parse_operand(rest, &mut locations, &mut live_outs);
        }

        // Move large constants into the constant pool. Small ones are
        // sign-extended through the 32-bit offset field, so -1 never
        // reaches the pool.
        for loc in locations.iter_mut() {
            if loc.kind == LocationKind::Constant && i32::try_from(loc.offset).is_err() {
                loc.kind = LocationKind::ConstantIndex;
                let value = loc.offset as u64;
                // The pool's reserved keys (0 and all-ones) both fit the
                // 32-bit field, so a promoted value can never collide with
                // them.
                debug_assert!(value != 0 && value != u64::MAX);
                let (index, _) = self.const_pool.insert_full(value);
                loc.offset = index as i64;
            }
        }

        let func = self
            .cur_func
            .expect("patch instruction recorded outside a function");
        self.cs_infos.push(CallSiteInfo {
            pc_offset_expr: PcOffsetExpr {
                label,
                base: func.entry,
            },
            id,
            locations,
            live_outs,
        });

        self.fn_stack_size
            .insert(func.entry, func.frame.recorded_size());
    }

    /// Consume exactly one logical location worth of operands and return
    /// the remaining tail.
    fn parse_operand<'o>(
        &self,
        ops: &'o [Operand],
        locs: &mut LocationVec,
        live_outs: &mut LiveOutVec,
    ) -> &'o [Operand] {
        match ops {
            [Operand::Imm(tag), Operand::Reg(reg), Operand::Imm(imm), rest @ ..]
                if *tag == DIRECT_MEM_REF_OP =>
            {
                locs.push(Location::new(
                    LocationKind::Direct,
                    self.pointer_size,
                    dwarf_reg_num(&self.regs, reg.reg),
                    *imm,
                ));
                rest
            }
            [Operand::Imm(tag), Operand::Imm(size), Operand::Reg(reg), Operand::Imm(imm), rest @ ..]
                if *tag == INDIRECT_MEM_REF_OP =>
            {
                assert!(*size > 0, "need a valid size for indirect memory locations");
                locs.push(Location::new(
                    LocationKind::Indirect,
                    u8::try_from(*size).expect("indirect location size overflows a byte"),
                    dwarf_reg_num(&self.regs, reg.reg),
                    *imm,
                ));
                rest
            }
            [Operand::Imm(tag), Operand::Imm(imm), rest @ ..] if *tag == CONSTANT_OP => {
                locs.push(Location::new(LocationKind::Constant, 8, 0, *imm));
                rest
            }
            [Operand::Imm(tag), ..] => panic!("unrecognized operand tag {:#x}", tag),
            [Operand::Reg(reg), rest @ ..] => {
                // implicit registers are scratch/clobber decorations
                if !reg.is_implicit {
                    assert_eq!(reg.sub_reg, 0, "physical subreg still around");

                    // The stack map records the size of a spill slot that
                    // can hold the register content, and the byte offset of
                    // the named register within its DWARF-canonical form.
                    let dwarf = dwarf_reg_num(&self.regs, reg.reg);
                    let root = self
                        .regs
                        .reg_for_dwarf(dwarf)
                        .expect("dwarf number without a canonical register");
                    let offset = self
                        .regs
                        .sub_reg_index(root, reg.reg)
                        .map(|idx| self.regs.sub_reg_idx_offset(idx))
                        .unwrap_or(0);
                    locs.push(Location::new(
                        LocationKind::Register,
                        self.regs.spill_size(reg.reg),
                        dwarf,
                        offset as i64,
                    ));
                }
                rest
            }
            [Operand::LiveOutMask(mask), rest @ ..] => {
                // the mask occurs at most once per call site
                *live_outs = self.parse_live_out_mask(mask);
                rest
            }
            [_, rest @ ..] => rest,
            [] => unreachable!("parse_operand called on an empty stream"),
        }
    }

    fn create_live_out_reg(&self, reg: PhysReg) -> LiveOutReg {
        LiveOutReg::new(
            reg,
            dwarf_reg_num(&self.regs, reg),
            self.regs.spill_size(reg),
        )
    }

    /// Expand a register mask into live-out records, one per DWARF
    /// register, each sized for the widest overlapping register.
    fn parse_live_out_mask(&self, mask: &[u32]) -> LiveOutVec {
        let mut live_outs = LiveOutVec::new();
        for reg in 0..self.regs.num_regs() {
            let word = mask.get(reg as usize / 32).copied().unwrap_or(0);
            if (word >> (reg % 32)) & 1 != 0 {
                live_outs.push(self.create_live_out_reg(PhysReg(reg)));
            }
        }

        live_outs.sort_unstable_by_key(|lo| (lo.dwarf_reg, lo.reg));

        // Merge runs that share a dwarf register: keep the maximum spill
        // size and make the widest register the canonical holder.
        let mut i = 0;
        while i < live_outs.len() {
            let mut j = i + 1;
            while j < live_outs.len() && live_outs[j].dwarf_reg == live_outs[i].dwarf_reg {
                live_outs[i].size = live_outs[i].size.max(live_outs[j].size);
                if self
                    .regs
                    .is_super_register(live_outs[i].reg, live_outs[j].reg)
                {
                    live_outs[i].reg = live_outs[j].reg;
                }
                live_outs[j].valid = false;
                j += 1;
            }
            i = j;
        }
        live_outs.retain(|lo| lo.valid);
        live_outs
    }

    /// Serialize the accumulated data into the stack map section:
    ///
    /// Header {
    ///   uint8  : Stack Map Version (currently 1)
    ///   uint8  : Reserved
    ///   uint16 : Reserved
    ///   uint32 : NumFunctions
    ///   uint32 : NumConstants
    ///   uint32 : NumRecords
    /// }
    /// StkSizeRecord[NumFunctions] { uint64 : Function Address; uint64 : Stack Size }
    /// Constants[NumConstants]     { uint64 }
    /// StkMapRecord[NumRecords] {
    ///   uint64 : PatchPoint ID
    ///   uint32 : Instruction Offset
    ///   uint16 : Reserved (record flags)
    ///   uint16 : NumLocations
    ///   Location[NumLocations] { uint8 kind; uint8 size; uint16 dwarf reg; int32 offset }
    ///   uint16 : Padding
    ///   uint16 : NumLiveOuts
    ///   LiveOuts[NumLiveOuts] { uint16 dwarf reg; uint8 reserved; uint8 size }
    ///   uint32 : Padding (only if required to align to 8 byte)
    /// }
    ///
    /// Clears the call-site list and the constant pool; the frame table is
    /// kept for other consumers.
    pub fn serialize_to_stack_map_section(&mut self) {
        if self.cs_infos.is_empty() {
            assert!(self.const_pool.is_empty(), "expected empty constant pool too");
            assert!(
                self.fn_stack_size.is_empty(),
                "expected empty function record too"
            );
            return;
        }

        trace!("{}", self);

        let section = self.emitter.stack_map_section();
        self.emitter.switch_section(section);

        // A well-known label forces the section to be kept.
        let start = self.emitter.get_or_create_symbol("__LLVM_StackMaps");
        self.emitter.emit_label(start);

        self.emit_stack_map_header();
        self.emit_function_frame_records();
        self.emit_constant_pool_entries();
        self.emit_call_site_entries();

        self.cs_infos.clear();
        self.const_pool.clear();
    }

    fn emit_stack_map_header(&mut self) {
        self.emitter.emit_u8(STACK_MAP_VERSION);
        self.emitter.emit_u8(0);
        self.emitter.emit_u16(0);

        debug!("{}#functions = {}", WSMP, self.fn_stack_size.len());
        self.emitter.emit_u32(self.fn_stack_size.len() as u32);
        debug!("{}#constants = {}", WSMP, self.const_pool.len());
        self.emitter.emit_u32(self.const_pool.len() as u32);
        debug!("{}#callsites = {}", WSMP, self.cs_infos.len());
        self.emitter.emit_u32(self.cs_infos.len() as u32);
    }

    fn emit_function_frame_records(&mut self) {
        let Self {
            emitter,
            fn_stack_size,
            ..
        } = self;
        for (sym, size) in fn_stack_size.iter() {
            trace!("{}function {:?} frame size: {}", WSMP, sym, size);
            emitter.emit_symbol_value(*sym, 8);
            emitter.emit_u64(*size);
        }
    }

    fn emit_constant_pool_entries(&mut self) {
        let Self {
            emitter,
            const_pool,
            ..
        } = self;
        for value in const_pool.iter() {
            trace!("{}constant: {}", WSMP, value);
            emitter.emit_u64(*value);
        }
    }

    fn emit_call_site_entries(&mut self) {
        let Self {
            emitter, cs_infos, ..
        } = self;
        for csi in cs_infos.iter() {
            // It's better to communicate an overflow to the runtime than
            // to crash an in-process compilation: emit an invalid-ID
            // record with no contents instead.
            if csi.locations.len() > u16::MAX as usize || csi.live_outs.len() > u16::MAX as usize {
                emitter.emit_u64(u64::MAX);
                emitter.emit_expression(csi.pc_offset_expr, 4);
                emitter.emit_u16(0); // reserved
                emitter.emit_u16(0); // 0 locations
                emitter.emit_u16(0); // padding
                emitter.emit_u16(0); // 0 live-out registers
                emitter.emit_u32(0); // padding
                continue;
            }

            emitter.emit_u64(csi.id);
            emitter.emit_expression(csi.pc_offset_expr, 4);

            // reserved for flags
            emitter.emit_u16(0);
            emitter.emit_u16(csi.locations.len() as u16);
            for loc in &csi.locations {
                emitter.emit_u8(loc.kind as u8);
                emitter.emit_u8(loc.size);
                emitter.emit_u16(loc.dwarf_reg);
                emitter.emit_i32(loc.offset as i32);
            }

            emitter.emit_u16(0);
            emitter.emit_u16(csi.live_outs.len() as u16);
            for lo in &csi.live_outs {
                emitter.emit_u16(lo.dwarf_reg);
                emitter.emit_u8(0);
                emitter.emit_u8(lo.size);
            }
            emitter.emit_value_to_alignment(8);
        }
    }
}

impl<E, R> fmt::Display for StackMaps<E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}callsites:", WSMP)?;
        for csi in &self.cs_infos {
            writeln!(f, "{}callsite {}", WSMP, csi.id)?;
            writeln!(f, "{}  has {} locations", WSMP, csi.locations.len())?;
            for (idx, loc) in csi.locations.iter().enumerate() {
                write!(f, "{}  Loc {}: ", WSMP, idx)?;
                match loc.kind {
                    LocationKind::Unprocessed => write!(f, "<Unprocessed operand>")?,
                    LocationKind::Register => write!(f, "Register {}", loc.dwarf_reg)?,
                    LocationKind::Direct => {
                        write!(f, "Direct {}", loc.dwarf_reg)?;
                        if loc.offset != 0 {
                            write!(f, " + {}", loc.offset)?;
                        }
                    }
                    LocationKind::Indirect => {
                        write!(f, "Indirect [{} + {}]", loc.dwarf_reg, loc.offset)?
                    }
                    LocationKind::Constant => write!(f, "Constant {}", loc.offset)?,
                    LocationKind::ConstantIndex => write!(f, "Constant Index {}", loc.offset)?,
                }
                writeln!(
                    f,
                    "  [encoding: .byte {}, .byte {}, .short {}, .int {}]",
                    loc.kind as u8, loc.size, loc.dwarf_reg, loc.offset
                )?;
            }
            writeln!(f, "{}  has {} live-out registers", WSMP, csi.live_outs.len())?;
            for (idx, lo) in csi.live_outs.iter().enumerate() {
                writeln!(
                    f,
                    "{}  LO {}: {:?}  [encoding: .short {}, .byte 0, .byte {}]",
                    WSMP, idx, lo.reg, lo.dwarf_reg, lo.size
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferEmitter;
    use crate::x64::{X64Catalog, EAX, RAX, RBP, RBX, RCX, RDI, XMM0};

    fn writer() -> StackMaps<BufferEmitter, X64Catalog> {
        StackMaps::new(BufferEmitter::new(), X64Catalog, 64, STACK_MAP_VERSION)
    }

    /// Bind a function entry at the emitter's current text position.
    fn begin(
        maps: &mut StackMaps<BufferEmitter, X64Catalog>,
        name: &str,
        frame: FrameInfo,
    ) -> SymbolId {
        let sym = maps.emitter_mut().get_or_create_symbol(name);
        maps.emitter_mut().emit_label(sym);
        maps.begin_function(sym, frame);
        sym
    }

    fn stackmap(operands: Vec<Operand>) -> MachineInstr {
        MachineInstr::new(Opcode::StackMap, operands)
    }

    fn mask_for(regs: &[PhysReg]) -> Vec<u32> {
        let mut mask = vec![0u32; 3];
        for reg in regs {
            mask[reg.0 as usize / 32] |= 1 << (reg.0 % 32);
        }
        mask
    }

    #[test]
    fn small_constant() {
        let mut maps = writer();
        begin(&mut maps, "f", FrameInfo::fixed(8));
        maps.record_stack_map(&stackmap(vec![
            Operand::Imm(7),
            Operand::Imm(0),
            Operand::Imm(CONSTANT_OP),
            Operand::Imm(42),
        ]));

        let csi = &maps.cs_infos[0];
        assert_eq!(csi.id, 7);
        assert_eq!(csi.locations.len(), 1);
        assert_eq!(
            csi.locations[0],
            Location::new(LocationKind::Constant, 8, 0, 42)
        );
        assert!(csi.live_outs.is_empty());
        assert!(maps.const_pool.is_empty());
    }

    #[test]
    fn large_constant_promotion() {
        let mut maps = writer();
        begin(&mut maps, "f", FrameInfo::fixed(8));
        maps.record_stack_map(&stackmap(vec![
            Operand::Imm(9),
            Operand::Imm(0),
            Operand::Imm(CONSTANT_OP),
            Operand::Imm(0x1_0000_0000),
        ]));

        let csi = &maps.cs_infos[0];
        assert_eq!(
            csi.locations[0],
            Location::new(LocationKind::ConstantIndex, 8, 0, 0)
        );
        assert_eq!(maps.const_pool.get_index(0), Some(&0x1_0000_0000));
        assert_eq!(maps.const_pool.len(), 1);
    }

    #[test]
    fn constant_interning_is_idempotent() {
        let mut maps = writer();
        begin(&mut maps, "f", FrameInfo::fixed(8));
        for id in 0..3 {
            maps.record_stack_map(&stackmap(vec![
                Operand::Imm(id),
                Operand::Imm(0),
                Operand::Imm(CONSTANT_OP),
                Operand::Imm(0x1_2345_6789),
            ]));
        }

        assert_eq!(maps.const_pool.len(), 1);
        for csi in &maps.cs_infos {
            assert_eq!(
                csi.locations[0],
                Location::new(LocationKind::ConstantIndex, 8, 0, 0)
            );
        }
    }

    #[test]
    fn negative_one_is_not_pooled() {
        let mut maps = writer();
        begin(&mut maps, "f", FrameInfo::fixed(8));
        maps.record_stack_map(&stackmap(vec![
            Operand::Imm(1),
            Operand::Imm(0),
            Operand::Imm(CONSTANT_OP),
            Operand::Imm(-1),
        ]));

        assert_eq!(
            maps.cs_infos[0].locations[0],
            Location::new(LocationKind::Constant, 8, 0, -1)
        );
        assert!(maps.const_pool.is_empty());
    }

    #[test]
    fn indirect_spill_slot() {
        let mut maps = writer();
        begin(&mut maps, "f", FrameInfo::fixed(32));
        maps.record_stack_map(&stackmap(vec![
            Operand::Imm(1),
            Operand::Imm(0),
            Operand::Imm(INDIRECT_MEM_REF_OP),
            Operand::Imm(8),
            Operand::Reg(crate::operand::RegOperand::new(RBP)),
            Operand::Imm(-16),
        ]));

        assert_eq!(
            maps.cs_infos[0].locations[0],
            Location::new(LocationKind::Indirect, 8, 6, -16)
        );
    }

    #[test]
    fn direct_frame_address() {
        let mut maps = writer();
        begin(&mut maps, "f", FrameInfo::fixed(32));
        maps.record_stack_map(&stackmap(vec![
            Operand::Imm(3),
            Operand::Imm(0),
            Operand::Imm(DIRECT_MEM_REF_OP),
            Operand::Reg(crate::operand::RegOperand::new(RBP)),
            Operand::Imm(-8),
        ]));

        // pointer-sized, rbp is dwarf 6
        assert_eq!(
            maps.cs_infos[0].locations[0],
            Location::new(LocationKind::Direct, 8, 6, -8)
        );
    }

    #[test]
    fn register_location_with_sub_register() {
        let mut maps = writer();
        begin(&mut maps, "f", FrameInfo::fixed(0));
        maps.record_stack_map(&stackmap(vec![
            Operand::Imm(4),
            Operand::Imm(0),
            Operand::Reg(crate::operand::RegOperand::new(EAX)),
            Operand::Reg(crate::operand::RegOperand::new(XMM0)),
        ]));

        let locs = &maps.cs_infos[0].locations;
        assert_eq!(locs[0], Location::new(LocationKind::Register, 4, 0, 0));
        assert_eq!(locs[1], Location::new(LocationKind::Register, 16, 17, 0));
    }

    #[test]
    fn implicit_registers_are_skipped() {
        let mut maps = writer();
        begin(&mut maps, "f", FrameInfo::fixed(0));
        maps.record_stack_map(&stackmap(vec![
            Operand::Imm(4),
            Operand::Imm(0),
            Operand::Reg(crate::operand::RegOperand::scratch(RCX)),
            Operand::Imm(CONSTANT_OP),
            Operand::Imm(5),
        ]));

        let locs = &maps.cs_infos[0].locations;
        assert_eq!(locs.len(), 1);
        assert_eq!(locs[0].kind, LocationKind::Constant);
    }

    #[test]
    fn live_out_coalescing() {
        let mut maps = writer();
        begin(&mut maps, "f", FrameInfo::fixed(0));
        maps.record_stack_map(&stackmap(vec![
            Operand::Imm(2),
            Operand::Imm(0),
            Operand::LiveOutMask(mask_for(&[RAX, EAX])),
        ]));

        let live_outs = &maps.cs_infos[0].live_outs;
        assert_eq!(live_outs.len(), 1);
        assert_eq!(live_outs[0].dwarf_reg, 0);
        assert_eq!(live_outs[0].size, 8);
        assert_eq!(live_outs[0].reg, RAX);
    }

    #[test]
    fn live_outs_sorted_by_dwarf_number() {
        let mut maps = writer();
        begin(&mut maps, "f", FrameInfo::fixed(0));
        maps.record_stack_map(&stackmap(vec![
            Operand::Imm(2),
            Operand::Imm(0),
            Operand::LiveOutMask(mask_for(&[XMM0, RBX, EAX, RDI])),
        ]));

        let dwarfs: Vec<u16> = maps.cs_infos[0]
            .live_outs
            .iter()
            .map(|lo| lo.dwarf_reg)
            .collect();
        assert_eq!(dwarfs, vec![0, 3, 5, 17]);
        // eax alone spills 4 bytes
        assert_eq!(maps.cs_infos[0].live_outs[0].size, 4);
    }

    #[test]
    fn anyreg_patchpoint_with_def() {
        let mut maps = writer();
        begin(&mut maps, "f", FrameInfo::fixed(0));
        let mi = MachineInstr::new(
            Opcode::PatchPoint,
            vec![
                Operand::Reg(crate::operand::RegOperand::def(RAX)),
                Operand::Imm(5),
                Operand::Imm(8),
                Operand::Imm(0),
                Operand::Imm(2),
                Operand::Imm(crate::operand::CallingConv::AnyReg as i64),
                Operand::Reg(crate::operand::RegOperand::new(RDI)),
                Operand::Reg(crate::operand::RegOperand::new(RCX)),
            ],
        );
        maps.record_patch_point(&mi);

        let csi = &maps.cs_infos[0];
        assert_eq!(csi.id, 5);
        assert_eq!(csi.locations.len(), 3);
        for loc in &csi.locations {
            assert_eq!(loc.kind, LocationKind::Register);
        }
        // the def comes first
        assert_eq!(csi.locations[0].dwarf_reg, 0);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "anyreg arg must be in reg")]
    fn anyreg_rejects_non_register_args() {
        let mut maps = writer();
        begin(&mut maps, "f", FrameInfo::fixed(0));
        let mi = MachineInstr::new(
            Opcode::PatchPoint,
            vec![
                Operand::Imm(5),
                Operand::Imm(8),
                Operand::Imm(0),
                Operand::Imm(1),
                Operand::Imm(crate::operand::CallingConv::AnyReg as i64),
                Operand::Imm(CONSTANT_OP),
                Operand::Imm(3),
            ],
        );
        maps.record_patch_point(&mi);
    }

    #[test]
    fn statepoint_records_var_operands_only() {
        let mut maps = writer();
        begin(&mut maps, "f", FrameInfo::fixed(16));
        let mi = MachineInstr::new(
            Opcode::Statepoint,
            vec![
                Operand::Imm(77),
                Operand::Imm(0),
                Operand::Imm(1),
                Operand::Imm(0),
                Operand::Reg(crate::operand::RegOperand::new(RDI)),
                Operand::Imm(CONSTANT_OP),
                Operand::Imm(0),
                Operand::Imm(INDIRECT_MEM_REF_OP),
                Operand::Imm(8),
                Operand::Reg(crate::operand::RegOperand::new(RBP)),
                Operand::Imm(-24),
            ],
        );
        maps.record_statepoint(&mi);

        let csi = &maps.cs_infos[0];
        assert_eq!(csi.id, 77);
        assert_eq!(csi.locations.len(), 2);
        assert_eq!(csi.locations[0].kind, LocationKind::Constant);
        assert_eq!(csi.locations[1].kind, LocationKind::Indirect);
    }

    #[test]
    fn statepoint_with_no_var_operands_is_empty() {
        let mut maps = writer();
        begin(&mut maps, "f", FrameInfo::fixed(16));
        let mi = MachineInstr::new(
            Opcode::Statepoint,
            vec![
                Operand::Imm(1),
                Operand::Imm(0),
                Operand::Imm(0),
                Operand::Imm(0),
            ],
        );
        maps.record_statepoint(&mi);

        let csi = &maps.cs_infos[0];
        assert!(csi.locations.is_empty());
        assert!(csi.live_outs.is_empty());
    }

    #[test]
    fn dynamic_frames_use_the_sentinel() {
        let mut maps = writer();
        let sym = begin(
            &mut maps,
            "f",
            FrameInfo {
                stack_size: 48,
                has_var_sized_objects: true,
                needs_realignment: false,
            },
        );
        maps.record_stack_map(&stackmap(vec![
            Operand::Imm(1),
            Operand::Imm(0),
            Operand::Imm(CONSTANT_OP),
            Operand::Imm(0),
        ]));

        assert_eq!(maps.function_stack_sizes()[&sym], u64::MAX);
    }

    #[test]
    #[should_panic(expected = "unsupported stackmap version")]
    fn rejects_unknown_versions() {
        let _ = StackMaps::new(BufferEmitter::new(), X64Catalog, 64, 2);
    }

    #[test]
    fn serialize_without_records_is_a_no_op() {
        let mut maps = writer();
        maps.serialize_to_stack_map_section();
        assert!(maps.emitter().stack_map_bytes().is_empty());
    }

    #[test]
    fn golden_section_bytes() {
        let mut maps = writer();
        begin(&mut maps, "f", FrameInfo::fixed(16));
        maps.emitter_mut().emit_u32(0x90909090); // four bytes of code
        maps.record_stack_map(&stackmap(vec![
            Operand::Imm(7),
            Operand::Imm(0),
            Operand::Imm(CONSTANT_OP),
            Operand::Imm(42),
        ]));
        maps.serialize_to_stack_map_section();

        #[rustfmt::skip]
        let expected: Vec<u8> = vec![
            // header: version 1, reserved, 1 function, 0 constants, 1 record
            1, 0, 0, 0,
            1, 0, 0, 0,
            0, 0, 0, 0,
            1, 0, 0, 0,
            // function record: address of "f" (.text offset 0), stack size 16
            0, 0, 0, 0, 0, 0, 0, 0,
            16, 0, 0, 0, 0, 0, 0, 0,
            // call site: id 7, pc offset 4, flags 0, one location
            7, 0, 0, 0, 0, 0, 0, 0,
            4, 0, 0, 0,
            0, 0,
            1, 0,
            // location: Constant, 8 bytes, no register, value 42
            4, 8, 0, 0, 42, 0, 0, 0,
            // padding, 0 live-outs, trailing alignment
            0, 0,
            0, 0,
            0, 0, 0, 0,
        ];
        assert_eq!(maps.emitter().stack_map_bytes(), &expected[..]);
    }

    #[test]
    fn record_size_is_a_multiple_of_eight() {
        let mut maps = writer();
        begin(&mut maps, "f", FrameInfo::fixed(0));
        // two locations: record body is 44 bytes and needs trailing padding
        maps.record_stack_map(&stackmap(vec![
            Operand::Imm(1),
            Operand::Imm(0),
            Operand::Imm(CONSTANT_OP),
            Operand::Imm(1),
            Operand::Imm(CONSTANT_OP),
            Operand::Imm(2),
        ]));
        maps.serialize_to_stack_map_section();

        let bytes = maps.emitter().stack_map_bytes();
        // header (16) + one function record (16), then the call site
        assert_eq!((bytes.len() - 32) % 8, 0);
    }

    #[test]
    fn overflow_emits_a_sentinel_record() {
        let mut maps = writer();
        begin(&mut maps, "f", FrameInfo::fixed(0));
        let mut operands = vec![Operand::Imm(1), Operand::Imm(0)];
        for i in 0..70_000 {
            operands.push(Operand::Imm(CONSTANT_OP));
            operands.push(Operand::Imm(i % 1000));
        }
        maps.record_stack_map(&stackmap(operands));
        maps.serialize_to_stack_map_section();

        let bytes = maps.emitter().stack_map_bytes();
        // header + one function record
        let record = &bytes[32..];
        assert_eq!(record.len(), 24);
        assert_eq!(&record[0..8], &[0xff; 8]); // invalid ID
        assert_eq!(&record[12..24], &[0; 12]); // no contents
    }

    #[test]
    fn serialization_clears_call_sites_and_pool_only() {
        let mut maps = writer();
        begin(&mut maps, "f", FrameInfo::fixed(8));
        maps.record_stack_map(&stackmap(vec![
            Operand::Imm(1),
            Operand::Imm(0),
            Operand::Imm(CONSTANT_OP),
            Operand::Imm(0x1_0000_0000),
        ]));
        maps.serialize_to_stack_map_section();

        assert!(maps.cs_infos.is_empty());
        assert!(maps.const_pool.is_empty());
        assert_eq!(maps.function_stack_sizes().len(), 1);
    }

    #[test]
    fn debug_dump_names_call_sites() {
        let mut maps = writer();
        begin(&mut maps, "f", FrameInfo::fixed(8));
        maps.record_stack_map(&stackmap(vec![
            Operand::Imm(7),
            Operand::Imm(0),
            Operand::Imm(CONSTANT_OP),
            Operand::Imm(42),
        ]));

        let dump = maps.to_string();
        assert!(dump.contains("callsite 7"));
        assert!(dump.contains("Constant 42"));
    }
}
