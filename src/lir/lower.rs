// This module lowers a ComputationModule's entry computation into LIR allocated in the
// compilation session's arena. Parameters become input buffers, the root's shape becomes the
// output buffer, and each instruction becomes one scalar operation over the current element,
// with parameters and constants of a single element broadcast. The function form (host loop
// or kernel) comes from the variant's LoweringTarget. Shapes whose element count does not fit
// 32-bit indexing are rejected as code generation errors.

//! Lowering from computation modules to LIR.
//!
//! Every scheduled instruction defines exactly one value, so instruction
//! `i` lowers to value `%i`. The root additionally gets a `store.out`.

use super::{BinOp, FunctionForm, LirBuffer, LirFunction, LirInst, LirModule, ScalarType, UnOp, ValueId};
use crate::core::{CompilationSession, CompileError, CompileResult};
use crate::hlo::{Computation, ComputationModule, ElementType, Instruction, Opcode};
use bumpalo::collections::Vec as BumpVec;

/// Target-specific lowering parameters supplied by a compiler variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoweringTarget {
    pub triple: &'static str,
    pub data_layout: &'static str,
    pub form: FunctionForm,
}

pub(crate) fn scalar_type(element_type: ElementType) -> ScalarType {
    match element_type {
        ElementType::S32 => ScalarType::I32,
        ElementType::F32 => ScalarType::F32,
    }
}

/// Symbol name for the entry function of a module.
pub fn entry_symbol(module: &ComputationModule) -> String {
    let raw = format!("{}_{}", module.name(), module.entry_computation().name());
    let mut symbol: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if symbol.starts_with(|c: char| c.is_ascii_digit()) {
        symbol.insert(0, '_');
    }
    symbol
}

/// Lower `module` into the session arena. Called once per compilation.
pub fn lower_module<'a>(
    module: &ComputationModule,
    target: &LoweringTarget,
    session: &CompilationSession<'a>,
) -> CompileResult<LirModule<'a>> {
    let arena = session.arena();
    let computation = module.entry_computation();
    let root = computation.root();

    if root.shape.element_count() > u64::from(u32::MAX) {
        return Err(CompileError::codegen(format!(
            "result shape {} exceeds 32-bit element indexing",
            root.shape
        )));
    }
    if let Some(param) = computation
        .parameters()
        .into_iter()
        .find(|p| p.shape.element_count() > u64::from(u32::MAX))
    {
        return Err(CompileError::codegen(format!(
            "parameter {} of shape {} exceeds 32-bit element indexing",
            param.name, param.shape
        )));
    }

    let mut params = BumpVec::new_in(arena);
    for param in computation.parameters() {
        params.push(LirBuffer {
            ty: scalar_type(param.shape.element_type),
            element_count: param.shape.element_count(),
        });
    }

    let mut body = BumpVec::with_capacity_in(computation.instructions().len() + 1, arena);
    for inst in computation.instructions() {
        body.push(lower_instruction(computation, inst));
    }
    body.push(LirInst::StoreOutput {
        ty: scalar_type(root.shape.element_type),
        src: ValueId(root.id.0),
    });

    let function = LirFunction {
        name: session.intern_str(&entry_symbol(module)),
        params,
        output: LirBuffer {
            ty: scalar_type(root.shape.element_type),
            element_count: root.shape.element_count(),
        },
        value_count: computation.instructions().len() as u32,
        body,
        form: target.form,
    };

    let mut functions = BumpVec::with_capacity_in(1, arena);
    functions.push(function);

    let lir = LirModule {
        name: session.intern_str(module.name()),
        source_module_id: module.unique_id(),
        target_triple: session.intern_str(target.triple),
        data_layout: session.intern_str(target.data_layout),
        functions,
    };

    session.record_lowered(lir.functions.len(), lir.instruction_count());
    log::debug!(
        "Lowered module {} (id {}) to {} LIR instructions for {}",
        module.name(),
        module.unique_id(),
        lir.instruction_count(),
        target.triple
    );
    Ok(lir)
}

fn lower_instruction(computation: &Computation, inst: &Instruction) -> LirInst {
    let dst = ValueId(inst.id.0);
    let ty = scalar_type(inst.shape.element_type);
    let operand = |i: usize| ValueId(inst.operands[i].0);

    let binary = |op: BinOp| LirInst::Binary {
        dst,
        op,
        ty,
        lhs: operand(0),
        rhs: operand(1),
    };

    match inst.opcode {
        Opcode::Parameter(param) => LirInst::LoadParam {
            dst,
            ty,
            param,
            broadcast: inst.shape.element_count() == 1,
        },
        Opcode::Constant(literal) => LirInst::Const {
            dst,
            ty,
            bits: literal.to_bits(),
        },
        Opcode::Add => binary(BinOp::Add),
        Opcode::Subtract => binary(BinOp::Sub),
        Opcode::Multiply => binary(BinOp::Mul),
        Opcode::Divide => binary(BinOp::Div),
        Opcode::Maximum => binary(BinOp::Max),
        Opcode::Minimum => binary(BinOp::Min),
        Opcode::Negate => LirInst::Unary {
            dst,
            op: UnOp::Neg,
            ty,
            src: operand(0),
        },
        Opcode::Convert => LirInst::Convert {
            dst,
            from: scalar_type(computation.instruction(inst.operands[0]).shape.element_type),
            to: ty,
            src: operand(0),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::TestContext;
    use crate::hlo::parse_module;

    const HOST: LoweringTarget = LoweringTarget {
        triple: "x86_64-unknown-linux-gnu",
        data_layout: "e-m:e-i64:64-n8:16:32:64-S128",
        form: FunctionForm::HostLoop,
    };

    #[test]
    fn test_lower_add_one() {
        let module = parse_module(
            "HloModule add_one\nENTRY main {\n  p0 = f32[4] parameter(0)\n  one = f32[4] constant(1)\n  ROOT sum = f32[4] add(p0, one)\n}\n",
        )
        .unwrap();
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let lir = lower_module(&module, &HOST, &session).unwrap();

        assert_eq!(lir.name(), "add_one");
        assert_eq!(lir.source_module_id(), module.unique_id());
        let entry = lir.entry();
        assert_eq!(entry.name(), "add_one_main");
        assert_eq!(entry.params().len(), 1);
        assert_eq!(entry.output().element_count, 4);
        assert_eq!(
            entry.body(),
            &[
                LirInst::LoadParam {
                    dst: ValueId(0),
                    ty: ScalarType::F32,
                    param: 0,
                    broadcast: false
                },
                LirInst::Const {
                    dst: ValueId(1),
                    ty: ScalarType::F32,
                    bits: 1.0f32.to_bits()
                },
                LirInst::Binary {
                    dst: ValueId(2),
                    op: BinOp::Add,
                    ty: ScalarType::F32,
                    lhs: ValueId(0),
                    rhs: ValueId(1)
                },
                LirInst::StoreOutput {
                    ty: ScalarType::F32,
                    src: ValueId(2)
                },
            ]
        );
        assert_eq!(session.stats().instructions_lowered, 4);

        let text = lir.to_string();
        assert!(text.contains("target triple = \"x86_64-unknown-linux-gnu\""));
        assert!(text.contains("%2 = add f32 %0, %1"));
        assert!(text.contains("store.out f32 %2"));
    }

    #[test]
    fn test_entry_symbol_is_sanitized() {
        let module = parse_module("HloModule 3d.conv-x\nENTRY e {\n  ROOT a = s32[] parameter(0)\n}\n").unwrap();
        assert_eq!(entry_symbol(&module), "_3d_conv_x_e");
    }

    #[test]
    fn test_buffers_beyond_32_bit_indexing_rejected() {
        let ctx = TestContext::new();
        let session = ctx.create_session();

        let module = parse_module("HloModule wide\nENTRY e {\n  ROOT p = f32[8589934592] parameter(0)\n}\n").unwrap();
        let err = lower_module(&module, &HOST, &session).unwrap_err();
        assert!(err.to_string().contains("result shape f32[8589934592]"), "{err}");

        let module = parse_module(
            "HloModule unused\nENTRY e {\n  p = f32[8589934592] parameter(0)\n  ROOT c = s32[] constant(1)\n}\n",
        )
        .unwrap();
        let err = lower_module(&module, &HOST, &session).unwrap_err();
        assert!(matches!(err, CompileError::CodeGeneration { .. }));
        assert!(err.to_string().contains("parameter p"), "{err}");
    }
}
