//! In-memory implementation of [`StreamEmitter`].
//!
//! Models just enough of an object streamer for the serializer: named
//! sections of raw bytes, symbols bound to `(section, offset)` positions,
//! and label-difference resolution. Section "addresses" start at zero, so a
//! symbol's emitted value is its offset within its section.

use std::collections::HashMap;

use crate::emitter::{PcOffsetExpr, SectionId, StreamEmitter, SymbolId};

pub const TEXT_SECTION: SectionId = SectionId(0);
pub const STACK_MAP_SECTION: SectionId = SectionId(1);

#[derive(Debug)]
struct Section {
    name: &'static str,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct SymbolDef {
    name: Option<String>,
    def: Option<(SectionId, u64)>,
}

#[derive(Debug)]
pub struct BufferEmitter {
    sections: Vec<Section>,
    current: SectionId,
    symbols: Vec<SymbolDef>,
    named: HashMap<String, SymbolId>,
}

impl BufferEmitter {
    pub fn new() -> Self {
        BufferEmitter {
            sections: vec![
                Section {
                    name: ".text",
                    bytes: Vec::new(),
                },
                Section {
                    name: ".llvm_stackmaps",
                    bytes: Vec::new(),
                },
            ],
            current: TEXT_SECTION,
            symbols: Vec::new(),
            named: HashMap::new(),
        }
    }

    pub fn section_bytes(&self, section: SectionId) -> &[u8] {
        &self.sections[section.0 as usize].bytes
    }

    pub fn stack_map_bytes(&self) -> &[u8] {
        self.section_bytes(STACK_MAP_SECTION)
    }

    pub fn section_name(&self, section: SectionId) -> &str {
        self.sections[section.0 as usize].name
    }

    /// Position a defined symbol resolved to, as `(section, offset)`.
    pub fn symbol_position(&self, sym: SymbolId) -> Option<(SectionId, u64)> {
        self.symbols[sym.0 as usize].def
    }

    fn resolve(&self, sym: SymbolId) -> (SectionId, u64) {
        let def = &self.symbols[sym.0 as usize];
        def.def.unwrap_or_else(|| {
            panic!(
                "symbol {} referenced before definition",
                def.name.as_deref().unwrap_or("<temp>")
            )
        })
    }

    fn cur(&mut self) -> &mut Section {
        &mut self.sections[self.current.0 as usize]
    }
}

impl Default for BufferEmitter {
    fn default() -> Self {
        BufferEmitter::new()
    }
}

impl StreamEmitter for BufferEmitter {
    fn emit_bytes(&mut self, bytes: &[u8]) {
        self.cur().bytes.extend_from_slice(bytes);
    }

    fn emit_symbol_value(&mut self, sym: SymbolId, size: usize) {
        let (_, offset) = self.resolve(sym);
        self.emit_bytes(&offset.to_le_bytes()[..size]);
    }

    fn emit_expression(&mut self, expr: PcOffsetExpr, size: usize) {
        let (label_sect, label_off) = self.resolve(expr.label);
        let (base_sect, base_off) = self.resolve(expr.base);
        assert_eq!(
            label_sect, base_sect,
            "label difference across sections is not resolvable"
        );
        let diff = label_off as i64 - base_off as i64;
        self.emit_bytes(&diff.to_le_bytes()[..size]);
    }

    fn emit_label(&mut self, sym: SymbolId) {
        let pos = (self.current, self.cur().bytes.len() as u64);
        let def = &mut self.symbols[sym.0 as usize];
        assert!(def.def.is_none(), "symbol defined twice");
        def.def = Some(pos);
    }

    fn emit_value_to_alignment(&mut self, align: usize) {
        let section = self.cur();
        while section.bytes.len() % align != 0 {
            section.bytes.push(0);
        }
    }

    fn create_temp_symbol(&mut self) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(SymbolDef {
            name: None,
            def: None,
        });
        id
    }

    fn get_or_create_symbol(&mut self, name: &str) -> SymbolId {
        if let Some(id) = self.named.get(name) {
            return *id;
        }
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(SymbolDef {
            name: Some(name.to_owned()),
            def: None,
        });
        self.named.insert(name.to_owned(), id);
        id
    }

    fn stack_map_section(&self) -> SectionId {
        STACK_MAP_SECTION
    }

    fn switch_section(&mut self, section: SectionId) {
        assert!(
            (section.0 as usize) < self.sections.len(),
            "unknown section"
        );
        self.current = section;
    }
}
