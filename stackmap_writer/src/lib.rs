//! Stack map emission for generated code.
//!
//! During code emission the host records, at each stackmap/patchpoint/
//! statepoint instruction, where the runtime can find live values and
//! which registers stay live across the site. The accumulated data is
//! serialized into the `.llvm_stackmaps` section in binary layout
//! version 1, keyed by PC offsets relative to each function's entry.
//!
//! The machine-IR and object-streaming dependencies are kept behind the
//! [`RegisterCatalog`] and [`StreamEmitter`] traits; [`x64`] and
//! [`buffer`] provide concrete implementations.

pub mod buffer;
mod emitter;
mod location;
mod operand;
mod regs;
mod writer;
pub mod x64;

pub use emitter::{PcOffsetExpr, SectionId, StreamEmitter, SymbolId};
pub use location::{CallSiteInfo, LiveOutReg, LiveOutVec, Location, LocationKind, LocationVec};
pub use operand::{
    CallingConv, MachineInstr, Opcode, Operand, PatchPointOpers, RegOperand, StatepointOpers,
    CONSTANT_OP, DIRECT_MEM_REF_OP, INDIRECT_MEM_REF_OP,
};
pub use regs::{dwarf_reg_num, PhysReg, RegisterCatalog, SubRegIndex};
pub use writer::{FrameInfo, StackMaps, STACK_MAP_VERSION};
