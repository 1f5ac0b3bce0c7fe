// This module turns a host-loop LIR function into x86-64 machine code with the iced-x86 code
// assembler. The generated function follows the System V ABI with the signature
// `extern "C" fn(params: *const *const u8, out: *mut u8)`: rdi points at the parameter
// pointer table and rsi at the output buffer. Every LIR value gets a 4-byte stack slot below
// rbp, so there is no register allocation; rcx is the element index of a counted loop that
// runs the straight-line body once per output element. Integer values go through eax/edx/r8d
// (wrapping add/sub/imul, cdq+idiv, cmp+cmov for max/min), floats through xmm0/xmm1 with the
// scalar SSE instructions, and conversions use cvtsi2ss/cvttss2si. Scalar parameters are
// broadcast by always reading element 0.

//! x86-64 code emission with iced-x86.

use crate::lir::{BinOp, FunctionForm, LirFunction, LirInst, ScalarType, UnOp, ValueId};
use iced_x86::code_asm::*;
use iced_x86::IcedError;
use thiserror::Error;

/// Error types for instruction encoding.
#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("assembly error: {0}")]
    Assembly(#[from] IcedError),

    #[error("function {0} is not a host loop")]
    NotHostLoop(String),

    #[error("{0} elements exceed the host loop counter range")]
    TooManyElements(u64),

    #[error("{0} values exceed the stack frame limit")]
    FrameTooLarge(u32),

    #[error("object writing failed: {0}")]
    Object(#[from] object::write::Error),
}

/// Values per function before the frame no longer fits a 32-bit displacement comfortably.
const MAX_VALUES: u32 = 1 << 24;

fn slot(value: ValueId) -> AsmMemoryOperand {
    dword_ptr(rbp - 4 * (value.0 as i32 + 1))
}

/// Encodes one function. Returns the raw code for offset 0.
pub fn emit_function(func: &LirFunction<'_>) -> Result<Vec<u8>, EncodingError> {
    if func.form() != FunctionForm::HostLoop {
        return Err(EncodingError::NotHostLoop(func.name().to_string()));
    }
    let elements = func.output().element_count;
    if elements > i32::MAX as u64 {
        return Err(EncodingError::TooManyElements(elements));
    }
    if func.value_count() > MAX_VALUES {
        return Err(EncodingError::FrameTooLarge(func.value_count()));
    }

    let mut a = CodeAssembler::new(64)?;
    let frame = (func.value_count() as i32 * 4 + 15) & !15;

    a.push(rbp)?;
    a.mov(rbp, rsp)?;
    if frame > 0 {
        a.sub(rsp, frame)?;
    }
    a.xor(ecx, ecx)?;

    let mut head = a.create_label();
    let mut exit = a.create_label();
    a.set_label(&mut head)?;
    a.cmp(rcx, elements as i32)?;
    a.jge(exit)?;

    for inst in func.body() {
        emit_inst(&mut a, inst)?;
    }

    a.inc(rcx)?;
    a.jmp(head)?;
    a.set_label(&mut exit)?;
    a.mov(rsp, rbp)?;
    a.pop(rbp)?;
    a.ret()?;

    let code = a.assemble(0)?;
    log::trace!("Encoded @{}: {} bytes", func.name(), code.len());
    Ok(code)
}

fn emit_inst(a: &mut CodeAssembler, inst: &LirInst) -> Result<(), EncodingError> {
    match *inst {
        LirInst::LoadParam {
            dst,
            param,
            broadcast,
            ..
        } => {
            a.mov(rax, qword_ptr(rdi + 8 * param as i32))?;
            if broadcast {
                a.mov(eax, dword_ptr(rax))?;
            } else {
                a.mov(eax, dword_ptr(rax + rcx * 4))?;
            }
            a.mov(slot(dst), eax)?;
        }
        LirInst::Const { dst, bits, .. } => {
            a.mov(slot(dst), bits as i32)?;
        }
        LirInst::Binary {
            dst,
            op,
            ty: ScalarType::I32,
            lhs,
            rhs,
        } => {
            a.mov(eax, slot(lhs))?;
            match op {
                BinOp::Add => a.add(eax, slot(rhs))?,
                BinOp::Sub => a.sub(eax, slot(rhs))?,
                BinOp::Mul => a.imul_2(eax, slot(rhs))?,
                BinOp::Div => {
                    a.mov(r8d, slot(rhs))?;
                    a.cdq()?;
                    a.idiv(r8d)?;
                }
                BinOp::Max => {
                    a.mov(edx, slot(rhs))?;
                    a.cmp(eax, edx)?;
                    a.cmovl(eax, edx)?;
                }
                BinOp::Min => {
                    a.mov(edx, slot(rhs))?;
                    a.cmp(eax, edx)?;
                    a.cmovg(eax, edx)?;
                }
            }
            a.mov(slot(dst), eax)?;
        }
        LirInst::Binary {
            dst,
            op,
            ty: ScalarType::F32,
            lhs,
            rhs,
        } => {
            a.movss(xmm0, slot(lhs))?;
            a.movss(xmm1, slot(rhs))?;
            match op {
                BinOp::Add => a.addss(xmm0, xmm1)?,
                BinOp::Sub => a.subss(xmm0, xmm1)?,
                BinOp::Mul => a.mulss(xmm0, xmm1)?,
                BinOp::Div => a.divss(xmm0, xmm1)?,
                BinOp::Max => a.maxss(xmm0, xmm1)?,
                BinOp::Min => a.minss(xmm0, xmm1)?,
            }
            a.movss(slot(dst), xmm0)?;
        }
        LirInst::Unary {
            dst,
            op: UnOp::Neg,
            ty,
            src,
        } => {
            a.mov(eax, slot(src))?;
            match ty {
                ScalarType::I32 => a.neg(eax)?,
                ScalarType::F32 => a.xor(eax, i32::MIN)?,
            }
            a.mov(slot(dst), eax)?;
        }
        LirInst::Convert { dst, from, to, src } => match (from, to) {
            (ScalarType::I32, ScalarType::F32) => {
                a.mov(eax, slot(src))?;
                a.cvtsi2ss(xmm0, eax)?;
                a.movss(slot(dst), xmm0)?;
            }
            (ScalarType::F32, ScalarType::I32) => {
                a.movss(xmm0, slot(src))?;
                a.cvttss2si(eax, xmm0)?;
                a.mov(slot(dst), eax)?;
            }
            _ => {
                a.mov(eax, slot(src))?;
                a.mov(slot(dst), eax)?;
            }
        },
        LirInst::StoreOutput { src, .. } => {
            a.mov(eax, slot(src))?;
            a.mov(dword_ptr(rsi + rcx * 4), eax)?;
        }
    }
    Ok(())
}
