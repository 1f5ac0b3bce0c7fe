// This module wraps encoded host functions into a relocatable x86-64 ELF object using the
// object crate's writer. Each function is appended to .text at a 16-byte boundary and gets a
// global function symbol (STT_FUNC, default visibility) covering exactly its code, so the
// object can be linked into a process or loaded by a JIT linker. The generated code does not
// reference any other symbol, so no relocations are produced.

//! ELF object writing.

use super::emitter::EncodingError;
use object::write::{Object, SectionId, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SymbolFlags, SymbolKind, SymbolScope};

pub struct ElfAssembler {
    object: Object<'static>,
    text: SectionId,
    code_size: usize,
}

impl ElfAssembler {
    pub fn new() -> Self {
        let mut object = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
        let text = object.section_id(object::write::StandardSection::Text);
        Self {
            object,
            text,
            code_size: 0,
        }
    }

    /// Append `code` to .text and export it as `name`. Returns the offset.
    pub fn define_function(&mut self, name: &str, code: &[u8]) -> u64 {
        let offset = self.object.append_section_data(self.text, code, 16);
        self.object.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value: offset,
            size: code.len() as u64,
            kind: SymbolKind::Text,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(self.text),
            flags: SymbolFlags::None,
        });
        self.code_size += code.len();
        offset
    }

    /// Bytes of machine code defined so far, excluding alignment padding.
    pub fn code_size(&self) -> usize {
        self.code_size
    }

    pub fn finish(self) -> Result<Vec<u8>, EncodingError> {
        Ok(self.object.write()?)
    }
}

impl Default for ElfAssembler {
    fn default() -> Self {
        Self::new()
    }
}
