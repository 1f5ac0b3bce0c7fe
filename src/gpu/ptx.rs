// This module prints kernel-form LIR functions as PTX for the NVPTX back end. Each LIR function
// becomes one `.visible .entry` taking a u64 pointer per parameter plus the output pointer;
// the global element index is ctaid.x * ntid.x + tid.x and threads past the element count exit
// early. Every LIR value lives in its own .b32 register (%v<N>), which PTX lets typed integer
// and float instructions share. Arithmetic maps one-to-one onto PTX instructions: wrapping
// s32 ops, round-to-nearest f32 ops, cvt.rn for int-to-float and cvt.rzi for float-to-int.

//! PTX emission for CUDA devices.

use super::KernelImage;
use crate::core::{CompileError, CompileResult};
use crate::lir::{BinOp, FunctionForm, LirFunction, LirInst, LirModule, ScalarType};
use std::fmt::{self, Write};

fn ptx_isa_version(major: u32) -> &'static str {
    if major >= 9 {
        "7.8"
    } else {
        "7.0"
    }
}

/// Print every function of `module` for compute capability `major.minor`.
pub fn emit_module(module: &LirModule<'_>, major: u32, minor: u32) -> CompileResult<KernelImage> {
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

    let mut text = String::new();
    write_module(&mut text, module, major, minor)
        .map_err(|e| CompileError::codegen(format!("PTX printing failed: {e}")))?;

    Ok(KernelImage {
        assembly: text,
        entry: entry.name().to_string(),
        block_size,
        grid_size,
    })
}

fn write_module(out: &mut String, module: &LirModule<'_>, major: u32, minor: u32) -> fmt::Result {
    writeln!(out, "//")?;
    writeln!(out, "// {}", module.name())?;
    writeln!(out, "//")?;
    writeln!(out)?;
    writeln!(out, ".version {}", ptx_isa_version(major))?;
    writeln!(out, ".target sm_{major}{minor}")?;
    writeln!(out, ".address_size 64")?;
    for func in module.functions() {
        writeln!(out)?;
        write_function(out, func)?;
    }
    Ok(())
}

fn write_function(out: &mut String, func: &LirFunction<'_>) -> fmt::Result {
    writeln!(out, ".visible .entry {}(", func.name())?;
    for i in 0..func.params().len() {
        writeln!(out, "\t.param .u64 param_{i},")?;
    }
    writeln!(out, "\t.param .u64 out")?;
    writeln!(out, ")")?;
    if let FunctionForm::Kernel { block_size, .. } = func.form() {
        writeln!(out, ".maxntid {block_size}, 1, 1")?;
    }
    writeln!(out, "{{")?;
    writeln!(out, "\t.reg .pred %done;")?;
    writeln!(out, "\t.reg .u32 %tid, %ntid, %ctaid, %idx;")?;
    writeln!(out, "\t.reg .u64 %off, %addr;")?;
    writeln!(out, "\t.reg .b32 %v<{}>;", func.value_count())?;
    writeln!(out)?;
    writeln!(out, "\tmov.u32 %tid, %tid.x;")?;
    writeln!(out, "\tmov.u32 %ntid, %ntid.x;")?;
    writeln!(out, "\tmov.u32 %ctaid, %ctaid.x;")?;
    writeln!(out, "\tmad.lo.u32 %idx, %ctaid, %ntid, %tid;")?;
    writeln!(
        out,
        "\tsetp.ge.u32 %done, %idx, {};",
        func.output().element_count
    )?;
    writeln!(out, "\t@%done bra $L_exit;")?;
    writeln!(out, "\tmul.wide.u32 %off, %idx, 4;")?;

    for inst in func.body() {
        write_inst(out, inst)?;
    }

    writeln!(out, "$L_exit:")?;
    writeln!(out, "\tret;")?;
    writeln!(out, "}}")
}

fn global_address(out: &mut String, param: &str, indexed: bool) -> fmt::Result {
    writeln!(out, "\tld.param.u64 %addr, [{param}];")?;
    writeln!(out, "\tcvta.to.global.u64 %addr, %addr;")?;
    if indexed {
        writeln!(out, "\tadd.u64 %addr, %addr, %off;")?;
    }
    Ok(())
}

fn type_suffix(ty: ScalarType) -> &'static str {
    match ty {
        ScalarType::I32 => "s32",
        ScalarType::F32 => "f32",
    }
}

fn write_inst(out: &mut String, inst: &LirInst) -> fmt::Result {
    match *inst {
        LirInst::LoadParam {
            dst,
            param,
            broadcast,
            ..
        } => {
            global_address(out, &format!("param_{param}"), !broadcast)?;
            writeln!(out, "\tld.global.b32 %v{}, [%addr];", dst.0)
        }
        LirInst::Const { dst, bits, .. } => writeln!(out, "\tmov.b32 %v{}, 0x{bits:08X};", dst.0),
        LirInst::Binary {
            dst,
            op,
            ty,
            lhs,
            rhs,
        } => {
            let opcode = match (op, ty) {
                (BinOp::Add, ScalarType::I32) => "add.s32",
                (BinOp::Sub, ScalarType::I32) => "sub.s32",
                (BinOp::Mul, ScalarType::I32) => "mul.lo.s32",
                (BinOp::Div, ScalarType::I32) => "div.s32",
                (BinOp::Add, ScalarType::F32) => "add.rn.f32",
                (BinOp::Sub, ScalarType::F32) => "sub.rn.f32",
                (BinOp::Mul, ScalarType::F32) => "mul.rn.f32",
                (BinOp::Div, ScalarType::F32) => "div.rn.f32",
                (BinOp::Max, ScalarType::I32) => "max.s32",
                (BinOp::Min, ScalarType::I32) => "min.s32",
                (BinOp::Max, ScalarType::F32) => "max.f32",
                (BinOp::Min, ScalarType::F32) => "min.f32",
            };
            writeln!(out, "\t{opcode} %v{}, %v{}, %v{};", dst.0, lhs.0, rhs.0)
        }
        LirInst::Unary { dst, ty, src, .. } => {
            writeln!(out, "\tneg.{} %v{}, %v{};", type_suffix(ty), dst.0, src.0)
        }
        LirInst::Convert { dst, from, to, src } => match (from, to) {
            (ScalarType::I32, ScalarType::F32) => {
                writeln!(out, "\tcvt.rn.f32.s32 %v{}, %v{};", dst.0, src.0)
            }
            (ScalarType::F32, ScalarType::I32) => {
                writeln!(out, "\tcvt.rzi.s32.f32 %v{}, %v{};", dst.0, src.0)
            }
            _ => writeln!(out, "\tmov.b32 %v{}, %v{};", dst.0, src.0),
        },
        LirInst::StoreOutput { src, .. } => {
            global_address(out, "out", true)?;
            writeln!(out, "\tst.global.b32 [%addr], %v{};", src.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::TestContext;
    use crate::gpu::{NVPTX_DATA_LAYOUT, NVPTX_TRIPLE};
    use crate::hlo::parse_module;
    use crate::lir::{lower_module, AssignLaunchDimensions, LirPass, LoweringTarget};

    const KERNEL: LoweringTarget = LoweringTarget {
        triple: NVPTX_TRIPLE,
        data_layout: NVPTX_DATA_LAYOUT,
        form: FunctionForm::Kernel {
            block_size: 128,
            grid_size: 0,
        },
    };

    #[test]
    fn test_emit_add_kernel() {
        let module = parse_module(
            "HloModule add_one\nENTRY main {\n  p0 = f32[300] parameter(0)\n  one = f32[300] constant(1)\n  ROOT sum = f32[300] add(p0, one)\n}\n",
        )
        .unwrap();
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let mut lir = lower_module(&module, &KERNEL, &session).unwrap();
        AssignLaunchDimensions { block_size: 128 }.run(&mut lir).unwrap();

        let image = emit_module(&lir, 8, 6).unwrap();
        assert_eq!(image.entry, "add_one_main");
        assert_eq!((image.block_size, image.grid_size), (128, 3));
        let ptx = &image.assembly;
        assert!(ptx.contains(".target sm_86"));
        assert!(ptx.contains(".visible .entry add_one_main("));
        assert!(ptx.contains("setp.ge.u32 %done, %idx, 300;"));
        assert!(ptx.contains("mov.b32 %v1, 0x3F800000;"));
        assert!(ptx.contains("add.rn.f32 %v2, %v0, %v1;"));
        assert!(ptx.contains("st.global.b32 [%addr], %v2;"));
    }

    #[test]
    fn test_unassigned_launch_dimensions() {
        let module = parse_module("HloModule m\nENTRY e {\n  ROOT p = s32[8] parameter(0)\n}\n").unwrap();
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let lir = lower_module(&module, &KERNEL, &session).unwrap();
        let err = emit_module(&lir, 7, 0).unwrap_err();
        assert!(err.to_string().contains("never assigned"));
    }
}
