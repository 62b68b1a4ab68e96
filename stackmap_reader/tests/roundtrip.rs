//! Feed serialized writer output straight into the parser.
//!
//! Records with live-outs are deliberately absent: the parser refuses
//! them until live-out parsing lands.

use stackmap_reader::{LittleEndian, LocationKind, StackMapSection};
use stackmap_writer::buffer::BufferEmitter;
use stackmap_writer::x64::{RBP, RSI, X64Catalog};
use stackmap_writer::{
    FrameInfo, MachineInstr, Opcode, Operand, RegOperand, StackMaps, StreamEmitter, CONSTANT_OP,
    INDIRECT_MEM_REF_OP, STACK_MAP_VERSION,
};

fn stackmap(operands: Vec<Operand>) -> MachineInstr {
    MachineInstr::new(Opcode::StackMap, operands)
}

#[test]
fn writer_output_parses_back() {
    let mut maps = StackMaps::new(BufferEmitter::new(), X64Catalog, 64, STACK_MAP_VERSION);

    let entry = maps.emitter_mut().get_or_create_symbol("f");
    maps.emitter_mut().emit_label(entry);
    maps.begin_function(entry, FrameInfo::fixed(40));

    maps.emitter_mut().emit_u64(0x9090_9090_9090_9090);
    maps.record_stack_map(&stackmap(vec![
        Operand::Imm(7),
        Operand::Imm(0),
        Operand::Imm(CONSTANT_OP),
        Operand::Imm(42),
        Operand::Imm(INDIRECT_MEM_REF_OP),
        Operand::Imm(8),
        Operand::Reg(RegOperand::new(RBP)),
        Operand::Imm(-16),
    ]));

    maps.emitter_mut().emit_u32(0x90909090);
    maps.record_stack_map(&stackmap(vec![
        Operand::Imm(8),
        Operand::Imm(0),
        Operand::Imm(CONSTANT_OP),
        Operand::Imm(0x1_0000_0000),
        Operand::Reg(RegOperand::new(RSI)),
    ]));

    maps.serialize_to_stack_map_section();

    let section =
        StackMapSection::parse::<LittleEndian>(maps.emitter().stack_map_bytes()).unwrap();
    section.verify().unwrap();

    assert_eq!(section.version, 1);
    assert_eq!(section.functions.len(), 1);
    assert_eq!(section.functions[0].addr, 0);
    assert_eq!(section.functions[0].stack_size, 40);
    assert!(section.functions[0].is_fixed_size_frame());
    assert_eq!(section.constants, vec![0x1_0000_0000]);

    let first = section.find_record_for_rel_pc(8).unwrap();
    assert_eq!(first.patch_point_id, 7);
    assert_eq!(first.locations.len(), 2);
    assert_eq!(first.locations[0].kind, LocationKind::Constant);
    assert_eq!(first.locations[0].offset, 42);
    assert_eq!(first.locations[1].kind, LocationKind::Indirect);
    assert_eq!(first.locations[1].dwarf_reg, 6);
    assert_eq!(first.locations[1].offset, -16);

    let second = section.find_record_for_rel_pc(12).unwrap();
    assert_eq!(second.patch_point_id, 8);
    assert_eq!(second.locations[0].kind, LocationKind::ConstantIndex);
    assert_eq!(
        section.constants[second.locations[0].offset as usize],
        0x1_0000_0000
    );
    assert_eq!(second.locations[1].kind, LocationKind::Register);
    assert_eq!(second.locations[1].dwarf_reg, 4);

    assert!(!section.has_record_for_rel_pc(9));
}

#[test]
fn dynamic_frame_survives_the_trip() {
    let mut maps = StackMaps::new(BufferEmitter::new(), X64Catalog, 64, STACK_MAP_VERSION);

    let entry = maps.emitter_mut().get_or_create_symbol("g");
    maps.emitter_mut().emit_label(entry);
    maps.begin_function(
        entry,
        FrameInfo {
            stack_size: 128,
            has_var_sized_objects: false,
            needs_realignment: true,
        },
    );
    maps.record_stack_map(&stackmap(vec![
        Operand::Imm(1),
        Operand::Imm(0),
        Operand::Imm(CONSTANT_OP),
        Operand::Imm(0),
    ]));
    maps.serialize_to_stack_map_section();

    let section =
        StackMapSection::parse::<LittleEndian>(maps.emitter().stack_map_bytes()).unwrap();
    assert!(!section.functions[0].is_fixed_size_frame());
}
