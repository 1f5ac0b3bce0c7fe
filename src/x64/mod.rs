// This module holds the host back end's code generation. Host-loop LIR functions are
// assembled into x86-64 machine code with iced-x86 and placed into a relocatable ELF object
// with the object crate, one global text symbol per function. The triple and data layout the
// host variant lowers with are defined here.

//! x86-64 host code generation.
//!
//! - [`emitter`]: LIR host loops to machine code via iced-x86
//! - [`elf`]: relocatable ELF objects via the object crate

pub mod elf;
pub mod emitter;

pub use elf::ElfAssembler;
pub use emitter::{emit_function, EncodingError};

use crate::lir::LirModule;

pub const HOST_TRIPLE: &str = "x86_64-unknown-linux-gnu";
pub const HOST_DATA_LAYOUT: &str = "e-m:e-i64:64-n8:16:32:64-S128";

/// A linked host object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCode {
    pub bytes: Vec<u8>,
    pub code_size: usize,
}

/// Encode every function of `module` and link them into one ELF object.
pub fn build_object(module: &LirModule<'_>) -> Result<ObjectCode, EncodingError> {
    let mut asm = ElfAssembler::new();
    for func in module.functions() {
        let code = emit_function(func)?;
        asm.define_function(func.name(), &code);
    }
    let code_size = asm.code_size();
    let bytes = asm.finish()?;
    log::debug!(
        "Linked {} into a {}-byte object ({} bytes of code)",
        module.name(),
        bytes.len(),
        code_size
    );
    Ok(ObjectCode { bytes, code_size })
}
