// This module prints kernel-form LIR functions as AMDGCN assembly for the ROCm back end,
// targeting gfx9-class ISAs under the amdhsa ABI. The kernarg segment pointer arrives in
// s[0:1] and the workgroup id in s2; parameter and output pointers are loaded from the
// kernarg segment into consecutive SGPR pairs. The global index is s2 * block_size + v0 and
// lanes past the element count are masked off through exec. LIR value N lives in VGPR v(4+N);
// v1 holds the index, v2 the byte offset and v3 a zero offset for broadcast loads. The ISA has
// no integer divide instruction, so s32 division is rejected; f32 division is lowered to a
// reciprocal and a multiply.

//! AMDGCN emission for ROCm devices.

use super::KernelImage;
use crate::core::{CompileError, CompileResult};
use crate::lir::{BinOp, FunctionForm, LirFunction, LirInst, LirModule, ScalarType};
use std::fmt::{self, Write};

const FIRST_VALUE_VGPR: u32 = 4;
const FIRST_POINTER_SGPR: usize = 4;
/// Architected VGPRs addressable by one lane.
const MAX_VGPRS: u32 = 256;

/// Print every function of `module` for the `gfx` architecture.
pub fn emit_module(module: &LirModule<'_>, gfx: &str) -> CompileResult<KernelImage> {
    let entry = module.entry();
    let FunctionForm::Kernel {
        block_size,
        grid_size,
    } = entry.form()
    else {
        return Err(CompileError::codegen(format!(
            "@{} is not a kernel",
            entry.name()
        )));
    };
    if grid_size == 0 && entry.output().element_count > 0 {
        return Err(CompileError::codegen(format!(
            "launch dimensions of @{} were never assigned",
            entry.name()
        )));
    }

    for func in module.functions() {
        let vgprs = FIRST_VALUE_VGPR + func.value_count();
        if vgprs > MAX_VGPRS {
            return Err(CompileError::codegen(format!(
                "@{} needs {vgprs} VGPRs, {gfx} has {MAX_VGPRS}",
                func.name()
            )));
        }
        let int_div = func.body().iter().any(|inst| {
            matches!(
                inst,
                LirInst::Binary {
                    op: BinOp::Div,
                    ty: ScalarType::I32,
                    ..
                }
            )
        });
        if int_div {
            return Err(CompileError::codegen(format!(
                "s32 division in @{} is not supported on {gfx}",
                func.name()
            )));
        }
    }

    let mut text = String::new();
    write_module(&mut text, module, gfx)
        .map_err(|e| CompileError::codegen(format!("AMDGCN printing failed: {e}")))?;

    Ok(KernelImage {
        assembly: text,
        entry: entry.name().to_string(),
        block_size,
        grid_size,
    })
}

fn write_module(out: &mut String, module: &LirModule<'_>, gfx: &str) -> fmt::Result {
    writeln!(out, "; {}", module.name())?;
    writeln!(out, "\t.amdgcn_target \"amdgcn-amd-amdhsa--{gfx}\"")?;
    writeln!(out, "\t.text")?;
    for (index, func) in module.functions().iter().enumerate() {
        writeln!(out)?;
        write_function(out, index, func)?;
    }
    Ok(())
}

fn sgpr_pair(index: usize) -> String {
    let lo = FIRST_POINTER_SGPR + 2 * index;
    format!("s[{lo}:{}]", lo + 1)
}

fn v(value: crate::lir::ValueId) -> String {
    format!("v{}", FIRST_VALUE_VGPR + value.0)
}

fn write_function(out: &mut String, index: usize, func: &LirFunction<'_>) -> fmt::Result {
    let name = func.name();
    let params = func.params().len();
    let out_pair = sgpr_pair(params);
    let exec_pair = sgpr_pair(params + 1);
    let exit = format!(".LBB{index}_exit");
    let block_size = match func.form() {
        FunctionForm::Kernel { block_size, .. } => block_size,
        FunctionForm::HostLoop => 1,
    };

    writeln!(out, "\t.globl {name}")?;
    writeln!(out, "\t.p2align 8")?;
    writeln!(out, "\t.type {name},@function")?;
    writeln!(out, "{name}:")?;
    for i in 0..=params {
        writeln!(out, "\ts_load_dwordx2 {}, s[0:1], {:#x}", sgpr_pair(i), 8 * i)?;
    }
    writeln!(out, "\ts_mul_i32 s3, s2, {block_size}")?;
    writeln!(out, "\tv_add_u32_e32 v1, s3, v0")?;
    writeln!(
        out,
        "\tv_cmp_gt_u32_e32 vcc, {}, v1",
        func.output().element_count
    )?;
    writeln!(out, "\ts_and_saveexec_b64 {exec_pair}, vcc")?;
    writeln!(out, "\ts_cbranch_execz {exit}")?;
    writeln!(out, "\tv_lshlrev_b32_e32 v2, 2, v1")?;
    writeln!(out, "\tv_mov_b32_e32 v3, 0")?;
    writeln!(out, "\ts_waitcnt lgkmcnt(0)")?;

    for inst in func.body() {
        write_inst(out, inst, &out_pair)?;
    }

    writeln!(out, "{exit}:")?;
    writeln!(out, "\ts_endpgm")?;
    writeln!(out, ".Lfunc_end{index}:")?;
    writeln!(out, "\t.size {name}, .Lfunc_end{index}-{name}")?;
    writeln!(out)?;
    writeln!(out, "\t.rodata")?;
    writeln!(out, "\t.p2align 6")?;
    writeln!(out, "\t.amdhsa_kernel {name}")?;
    writeln!(out, "\t\t.amdhsa_user_sgpr_kernarg_segment_ptr 1")?;
    writeln!(out, "\t\t.amdhsa_system_sgpr_workgroup_id_x 1")?;
    writeln!(
        out,
        "\t\t.amdhsa_next_free_vgpr {}",
        FIRST_VALUE_VGPR + func.value_count()
    )?;
    writeln!(
        out,
        "\t\t.amdhsa_next_free_sgpr {}",
        FIRST_POINTER_SGPR + 2 * (params + 2)
    )?;
    writeln!(out, "\t.end_amdhsa_kernel")?;
    writeln!(out, "\t.text")
}

fn write_inst(out: &mut String, inst: &LirInst, out_pair: &str) -> fmt::Result {
    match *inst {
        LirInst::LoadParam {
            dst,
            param,
            broadcast,
            ..
        } => {
            let offset = if broadcast { "v3" } else { "v2" };
            writeln!(
                out,
                "\tglobal_load_dword {}, {offset}, {}",
                v(dst),
                sgpr_pair(param as usize)
            )?;
            writeln!(out, "\ts_waitcnt vmcnt(0)")
        }
        LirInst::Const { dst, bits, .. } => {
            writeln!(out, "\tv_mov_b32_e32 {}, {bits:#010x}", v(dst))
        }
        LirInst::Binary {
            dst,
            op,
            ty,
            lhs,
            rhs,
        } => {
            let opcode = match (op, ty) {
                (BinOp::Add, ScalarType::I32) => "v_add_u32_e32",
                (BinOp::Sub, ScalarType::I32) => "v_sub_u32_e32",
                (BinOp::Mul, ScalarType::I32) => "v_mul_lo_u32",
                (BinOp::Max, ScalarType::I32) => "v_max_i32_e32",
                (BinOp::Min, ScalarType::I32) => "v_min_i32_e32",
                (BinOp::Add, ScalarType::F32) => "v_add_f32_e32",
                (BinOp::Sub, ScalarType::F32) => "v_sub_f32_e32",
                (BinOp::Mul, ScalarType::F32) => "v_mul_f32_e32",
                (BinOp::Max, ScalarType::F32) => "v_max_f32_e32",
                (BinOp::Min, ScalarType::F32) => "v_min_f32_e32",
                (BinOp::Div, ScalarType::F32) => {
                    writeln!(out, "\tv_rcp_f32_e32 {}, {}", v(dst), v(rhs))?;
                    return writeln!(out, "\tv_mul_f32_e32 {}, {}, {}", v(dst), v(lhs), v(dst));
                }
                // Rejected before printing.
                (BinOp::Div, ScalarType::I32) => return Err(fmt::Error),
            };
            writeln!(out, "\t{opcode} {}, {}, {}", v(dst), v(lhs), v(rhs))
        }
        LirInst::Unary { dst, ty, src, .. } => match ty {
            ScalarType::I32 => writeln!(out, "\tv_sub_u32_e32 {}, 0, {}", v(dst), v(src)),
            ScalarType::F32 => {
                writeln!(out, "\tv_xor_b32_e32 {}, 0x80000000, {}", v(dst), v(src))
            }
        },
        LirInst::Convert { dst, from, to, src } => match (from, to) {
            (ScalarType::I32, ScalarType::F32) => {
                writeln!(out, "\tv_cvt_f32_i32_e32 {}, {}", v(dst), v(src))
            }
            (ScalarType::F32, ScalarType::I32) => {
                writeln!(out, "\tv_cvt_i32_f32_e32 {}, {}", v(dst), v(src))
            }
            _ => writeln!(out, "\tv_mov_b32_e32 {}, {}", v(dst), v(src)),
        },
        LirInst::StoreOutput { src, .. } => {
            writeln!(out, "\tglobal_store_dword v2, {}, {out_pair}", v(src))
        }
    }
}
