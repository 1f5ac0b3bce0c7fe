// This module holds the LIR passes that compiler variants assemble into their target pass
// pipelines. FoldConstants evaluates instructions whose operands are all constants, using
// the same semantics the generated code has at run time (wrapping integer arithmetic,
// truncating float-to-int conversion with the x86 "integer indefinite" result for NaN and
// out-of-range inputs); integer division by zero or overflow found while folding is a
// code generation error. EliminateDeadValues removes everything the output store does not
// depend on. AssignLaunchDimensions fixes the grid of kernel-form functions. VerifyLir checks
// def-before-use and the single trailing store after everything else has run.
// PassPipeline runs passes in order, skips the ones named in DebugOptions::disabled_passes
// and records each run in the session statistics.

//! Target passes over LIR.

use super::{BinOp, FunctionForm, LirFunction, LirInst, LirModule, ScalarType, UnOp, ValueId};
use crate::core::{CompilationSession, CompileError, CompileResult};
use crate::hlo::DebugOptions;
use hashbrown::{HashMap, HashSet};

/// A transformation or check over a whole LIR module.
pub trait LirPass: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns whether the module changed.
    fn run(&self, module: &mut LirModule<'_>) -> CompileResult<bool>;
}

/// Ordered list of passes run as one stage.
#[derive(Default)]
pub struct PassPipeline {
    passes: Vec<Box<dyn LirPass>>,
}

impl PassPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, pass: impl LirPass + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn run(
        &self,
        module: &mut LirModule<'_>,
        options: &DebugOptions,
        session: &CompilationSession<'_>,
    ) -> CompileResult<()> {
        for pass in &self.passes {
            if options.is_pass_disabled(pass.name()) {
                log::debug!("Skipping disabled pass {}", pass.name());
                continue;
            }
            let changed = pass.run(module)?;
            log::trace!("Pass {} on {}: changed={}", pass.name(), module.name(), changed);
            session.record_pass(pass.name(), changed);
        }
        session.record_instructions_after_passes(module.instruction_count());
        Ok(())
    }
}

fn for_each_function(
    module: &mut LirModule<'_>,
    mut f: impl FnMut(&mut LirFunction<'_>) -> CompileResult<bool>,
) -> CompileResult<bool> {
    let mut changed = false;
    for func in module.functions.iter_mut() {
        changed |= f(func)?;
    }
    Ok(changed)
}

pub struct FoldConstants;

impl LirPass for FoldConstants {
    fn name(&self) -> &'static str {
        "fold-constants"
    }

    fn run(&self, module: &mut LirModule<'_>) -> CompileResult<bool> {
        for_each_function(module, |func| {
            let mut consts: HashMap<ValueId, u32> = HashMap::new();
            let mut changed = false;
            for inst in func.body.iter_mut() {
                let folded = match *inst {
                    LirInst::Const { dst, bits, .. } => {
                        consts.insert(dst, bits);
                        continue;
                    }
                    LirInst::Binary {
                        dst,
                        op,
                        ty,
                        lhs,
                        rhs,
                    } => match (consts.get(&lhs), consts.get(&rhs)) {
                        (Some(&a), Some(&b)) => Some((dst, ty, eval_binary(op, ty, a, b)?)),
                        _ => None,
                    },
                    LirInst::Unary { dst, op, ty, src } => consts
                        .get(&src)
                        .map(|&a| (dst, ty, eval_unary(op, ty, a))),
                    LirInst::Convert { dst, from, to, src } => consts
                        .get(&src)
                        .map(|&a| (dst, to, eval_convert(from, to, a))),
                    LirInst::LoadParam { .. } | LirInst::StoreOutput { .. } => None,
                };

                if let Some((dst, ty, bits)) = folded {
                    *inst = LirInst::Const { dst, ty, bits };
                    consts.insert(dst, bits);
                    changed = true;
                }
            }
            Ok(changed)
        })
    }
}

fn eval_binary(op: BinOp, ty: ScalarType, a: u32, b: u32) -> CompileResult<u32> {
    match ty {
        ScalarType::I32 => {
            let (a, b) = (a as i32, b as i32);
            let v = match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::Div => {
                    if b == 0 {
                        return Err(CompileError::codegen(format!(
                            "integer division by zero: {a} / 0"
                        )));
                    }
                    a.checked_div(b).ok_or_else(|| {
                        CompileError::codegen(format!("integer division overflow: {a} / {b}"))
                    })?
                }
                BinOp::Max => a.max(b),
                BinOp::Min => a.min(b),
            };
            Ok(v as u32)
        }
        ScalarType::F32 => {
            let (a, b) = (f32::from_bits(a), f32::from_bits(b));
            let v = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                // maxss/minss return the second operand on NaN or equality.
                BinOp::Max => {
                    if a > b {
                        a
                    } else {
                        b
                    }
                }
                BinOp::Min => {
                    if a < b {
                        a
                    } else {
                        b
                    }
                }
            };
            Ok(v.to_bits())
        }
    }
}

fn eval_unary(op: UnOp, ty: ScalarType, a: u32) -> u32 {
    match (op, ty) {
        (UnOp::Neg, ScalarType::I32) => (a as i32).wrapping_neg() as u32,
        (UnOp::Neg, ScalarType::F32) => a ^ 0x8000_0000,
    }
}

fn eval_convert(from: ScalarType, to: ScalarType, a: u32) -> u32 {
    match (from, to) {
        (ScalarType::I32, ScalarType::F32) => ((a as i32) as f32).to_bits(),
        (ScalarType::F32, ScalarType::I32) => {
            let v = f32::from_bits(a);
            // cvttss2si yields 0x8000_0000 for NaN and out-of-range inputs.
            if v.is_nan() || v >= 2_147_483_648.0 || v < -2_147_483_648.0 {
                i32::MIN as u32
            } else {
                (v as i32) as u32
            }
        }
        _ => a,
    }
}

pub struct EliminateDeadValues;

impl LirPass for EliminateDeadValues {
    fn name(&self) -> &'static str {
        "eliminate-dead-values"
    }

    fn run(&self, module: &mut LirModule<'_>) -> CompileResult<bool> {
        for_each_function(module, |func| {
            let mut live: HashSet<ValueId> = HashSet::new();
            let mut keep = vec![false; func.body.len()];
            for (idx, inst) in func.body.iter().enumerate().rev() {
                let needed = match inst.dst() {
                    Some(dst) => live.contains(&dst),
                    None => true,
                };
                if needed {
                    keep[idx] = true;
                    live.extend(inst.operands());
                }
            }

            let before = func.body.len();
            let mut flags = keep.into_iter();
            func.body.retain(|_| flags.next().unwrap_or(true));
            Ok(func.body.len() != before)
        })
    }
}

/// Computes the grid of kernel-form functions from their element count.
pub struct AssignLaunchDimensions {
    pub block_size: u32,
}

/// Largest grid dimension accepted by both accelerator families.
const MAX_GRID_SIZE: u64 = i32::MAX as u64;

impl LirPass for AssignLaunchDimensions {
    fn name(&self) -> &'static str {
        "assign-launch-dimensions"
    }

    fn run(&self, module: &mut LirModule<'_>) -> CompileResult<bool> {
        if !(1..=1024).contains(&self.block_size) {
            return Err(CompileError::codegen(format!(
                "kernel block size {} is outside 1..=1024",
                self.block_size
            )));
        }
        let block_size = self.block_size;

        for_each_function(module, |func| {
            let FunctionForm::Kernel { grid_size: old, .. } = func.form else {
                return Ok(false);
            };
            let grid = func.output.element_count.div_ceil(u64::from(block_size));
            if grid > MAX_GRID_SIZE {
                return Err(CompileError::codegen(format!(
                    "{} elements need {grid} blocks, more than the maximum grid size",
                    func.output.element_count
                )));
            }
            func.form = FunctionForm::Kernel {
                block_size,
                grid_size: grid as u32,
            };
            Ok(old != grid as u32)
        })
    }
}

/// Checks def-before-use, parameter indices and the trailing output store.
pub struct VerifyLir;

impl LirPass for VerifyLir {
    fn name(&self) -> &'static str {
        "verify"
    }

    fn run(&self, module: &mut LirModule<'_>) -> CompileResult<bool> {
        for func in module.functions.iter() {
            verify_function(func)?;
        }
        Ok(false)
    }
}

fn verify_function(func: &LirFunction<'_>) -> CompileResult<()> {
    let fail = |msg: String| Err(CompileError::codegen(format!("invalid LIR in @{}: {msg}", func.name)));

    let mut defined: HashSet<ValueId> = HashSet::new();
    let last = func.body.len().checked_sub(1);
    for (idx, inst) in func.body.iter().enumerate() {
        for operand in inst.operands() {
            if !defined.contains(&operand) {
                return fail(format!("{operand} used before definition in `{inst}`"));
            }
        }
        if let LirInst::LoadParam { param, .. } = *inst {
            if param as usize >= func.params.len() {
                return fail(format!("parameter {param} out of range"));
            }
        }
        match inst.dst() {
            Some(dst) if dst.0 >= func.value_count => {
                return fail(format!("{dst} exceeds value count {}", func.value_count));
            }
            Some(dst) => {
                if !defined.insert(dst) {
                    return fail(format!("{dst} defined twice"));
                }
            }
            None if Some(idx) != last => {
                return fail("output store is not the last instruction".to_string());
            }
            None => {}
        }
    }

    if !matches!(func.body.last(), Some(LirInst::StoreOutput { .. })) {
        return fail("missing output store".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::TestContext;
    use crate::hlo::parse_module;
    use crate::lir::{lower_module, LoweringTarget};

    const KERNEL: LoweringTarget = LoweringTarget {
        triple: "nvptx64-nvidia-cuda",
        data_layout: "e-i64:64-i128:128-v16:16-v32:32-n16:32:64",
        form: FunctionForm::Kernel {
            block_size: 0,
            grid_size: 0,
        },
    };

    fn lower<'a>(text: &str, session: &crate::core::CompilationSession<'a>) -> LirModule<'a> {
        let module = parse_module(text).unwrap();
        lower_module(&module, &KERNEL, session).unwrap()
    }

    #[test]
    fn test_fold_constants_and_dce() {
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let mut lir = lower(
            "HloModule m\nENTRY e {\n  p = s32[] parameter(0)\n  a = s32[] constant(6)\n  b = s32[] constant(7)\n  ROOT c = s32[] multiply(a, b)\n}\n",
            &session,
        );

        assert!(FoldConstants.run(&mut lir).unwrap());
        assert!(lir.entry().body().contains(&LirInst::Const {
            dst: ValueId(3),
            ty: ScalarType::I32,
            bits: 42
        }));

        assert!(EliminateDeadValues.run(&mut lir).unwrap());
        assert_eq!(
            lir.entry().body(),
            &[
                LirInst::Const {
                    dst: ValueId(3),
                    ty: ScalarType::I32,
                    bits: 42
                },
                LirInst::StoreOutput {
                    ty: ScalarType::I32,
                    src: ValueId(3)
                },
            ]
        );
        assert!(!EliminateDeadValues.run(&mut lir).unwrap());
        VerifyLir.run(&mut lir).unwrap();
    }

    #[test]
    fn test_fold_division_by_zero_is_codegen_error() {
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let mut lir = lower(
            "HloModule m\nENTRY e {\n  a = s32[] constant(1)\n  z = s32[] constant(0)\n  ROOT d = s32[] divide(a, z)\n}\n",
            &session,
        );
        let err = FoldConstants.run(&mut lir).unwrap_err();
        assert!(matches!(err, CompileError::CodeGeneration { .. }));
        assert!(err.to_string().contains("division by zero"));
    }

    #[test]
    fn test_convert_folding_matches_hardware() {
        assert_eq!(eval_convert(ScalarType::F32, ScalarType::I32, 2.9f32.to_bits()), 2);
        assert_eq!(eval_convert(ScalarType::F32, ScalarType::I32, (-2.9f32).to_bits()), (-2i32) as u32);
        assert_eq!(eval_convert(ScalarType::F32, ScalarType::I32, f32::NAN.to_bits()), 0x8000_0000);
        assert_eq!(eval_convert(ScalarType::F32, ScalarType::I32, 3e9f32.to_bits()), 0x8000_0000);
        assert_eq!(eval_convert(ScalarType::I32, ScalarType::F32, (-3i32) as u32), (-3.0f32).to_bits());
    }

    #[test]
    fn test_launch_dimensions() {
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let mut lir = lower(
            "HloModule m\nENTRY e {\n  p = f32[1000] parameter(0)\n  ROOT n = f32[1000] negate(p)\n}\n",
            &session,
        );
        assert!(AssignLaunchDimensions { block_size: 256 }.run(&mut lir).unwrap());
        assert_eq!(
            lir.entry().form(),
            FunctionForm::Kernel {
                block_size: 256,
                grid_size: 4
            }
        );
        assert!(AssignLaunchDimensions { block_size: 2048 }.run(&mut lir).is_err());
    }

    #[test]
    fn test_pipeline_skips_disabled_passes() {
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let mut lir = lower(
            "HloModule m\nENTRY e {\n  a = f32[] constant(1)\n  ROOT n = f32[] negate(a)\n}\n",
            &session,
        );
        let pipeline = PassPipeline::new().add(FoldConstants).add(EliminateDeadValues).add(VerifyLir);
        assert_eq!(pipeline.pass_names(), vec!["fold-constants", "eliminate-dead-values", "verify"]);

        let options = DebugOptions {
            disabled_passes: vec!["fold-constants".to_string()],
            ..DebugOptions::default()
        };
        pipeline.run(&mut lir, &options, &session).unwrap();

        let stats = session.stats();
        assert_eq!(stats.passes_run, vec!["eliminate-dead-values", "verify"]);
        assert_eq!(stats.instructions_after_passes, 3);
        assert!(lir.entry().body().iter().any(|i| matches!(i, LirInst::Unary { .. })));
    }

    #[test]
    fn test_verify_rejects_use_before_def() {
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let mut lir = lower(
            "HloModule m\nENTRY e {\n  ROOT p = s32[] parameter(0)\n}\n",
            &session,
        );
        lir.functions[0].body.insert(
            0,
            LirInst::StoreOutput {
                ty: ScalarType::I32,
                src: ValueId(0),
            },
        );
        assert!(VerifyLir.run(&mut lir).is_err());
    }
}
