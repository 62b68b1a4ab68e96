//! Output stream abstraction.
//!
//! The serializer only needs a byte-granular streamer with symbols, labels
//! and label-difference expressions; `StreamEmitter` captures exactly that
//! so the recorder can be driven by an assembler back end or, in tests, by
//! [`crate::buffer::BufferEmitter`].

/// Handle to a symbol owned by the emitter. Temporary (unnamed) symbols
/// mark call sites; named symbols mark function entries and the section
/// start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

/// Handle to an output section owned by the emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionId(pub u32);

/// A deferred `label - base` difference, resolved by the emitter once both
/// symbols have a position. The serializer uses it for the PC offset of a
/// call site relative to its function entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcOffsetExpr {
    pub label: SymbolId,
    pub base: SymbolId,
}

pub trait StreamEmitter {
    fn emit_bytes(&mut self, bytes: &[u8]);

    fn emit_u8(&mut self, v: u8) {
        self.emit_bytes(&[v]);
    }

    fn emit_u16(&mut self, v: u16) {
        self.emit_bytes(&v.to_le_bytes());
    }

    fn emit_u32(&mut self, v: u32) {
        self.emit_bytes(&v.to_le_bytes());
    }

    fn emit_i32(&mut self, v: i32) {
        self.emit_bytes(&v.to_le_bytes());
    }

    fn emit_u64(&mut self, v: u64) {
        self.emit_bytes(&v.to_le_bytes());
    }

    /// Emit the resolved value of `sym` as a `size`-byte integer.
    fn emit_symbol_value(&mut self, sym: SymbolId, size: usize);

    /// Emit the resolved value of `expr` as a `size`-byte integer.
    fn emit_expression(&mut self, expr: PcOffsetExpr, size: usize);

    /// Bind `sym` to the current position of the current section.
    fn emit_label(&mut self, sym: SymbolId);

    /// Pad the current section with zero bytes up to `align`.
    fn emit_value_to_alignment(&mut self, align: usize);

    fn create_temp_symbol(&mut self) -> SymbolId;

    fn get_or_create_symbol(&mut self, name: &str) -> SymbolId;

    /// The section stack map data is emitted into.
    fn stack_map_section(&self) -> SectionId;

    fn switch_section(&mut self, section: SectionId);
}
