//! Hook invocation contract of the back-end compiler, for every variant.

mod common;

use common::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tpde_hlo::compiler::{Compiler, CompilerOptions, HookError, HookPolicy, HookStage, Target};
use tpde_hlo::core::{CompileError, TrackingAllocator};
use tpde_hlo::lir::LirInst;

/// Records hook calls as (stage, source module id).
#[derive(Clone, Default)]
struct CallLog(Arc<Mutex<Vec<(HookStage, u64)>>>);

impl CallLog {
    fn install(&self, compiler: &Compiler) {
        let pre = self.clone();
        compiler.set_pre_codegen_hook(move |lir| {
            pre.0.lock().push((HookStage::PreCodegen, lir.source_module_id()));
            Ok(())
        });
        let post = self.clone();
        compiler.set_post_codegen_hook(move |lir| {
            post.0.lock().push((HookStage::PostCodegen, lir.source_module_id()));
            Ok(())
        });
    }

    fn calls(&self) -> Vec<(HookStage, u64)> {
        self.0.lock().clone()
    }
}

#[test]
fn test_each_hook_runs_once_in_order() {
    init_logging();
    for (target, backend) in all_variants() {
        let compiler = Compiler::new(target);
        let log = CallLog::default();
        log.install(&compiler);

        let module = module(ADD_ONE);
        let id = module.unique_id();
        let executable = compiler
            .run_backend(module, backend.default_device(), None)
            .unwrap();

        assert_eq!(
            log.calls(),
            vec![(HookStage::PreCodegen, id), (HookStage::PostCodegen, id)],
            "hook order for {target}"
        );
        assert_eq!(executable.device(), backend.default_device());
        assert_eq!(executable.stats().hooks_invoked, 2);
    }
}

#[test]
fn test_failing_pre_hook_stops_pipeline() {
    init_logging();
    for (target, backend) in all_variants() {
        let compiler = Compiler::new(target);
        let post_calls = Arc::new(AtomicUsize::new(0));
        compiler.set_pre_codegen_hook(|_| Err(HookError::new("rejected")));
        let counter = Arc::clone(&post_calls);
        compiler.set_post_codegen_hook(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let allocator = TrackingAllocator::new(backend.platform().name(), 2, 1 << 20);
        let err = compiler
            .run_backend(module(ADD_ONE), backend.default_device(), Some(&allocator))
            .unwrap_err();

        match &err {
            CompileError::HookFailure { stage, module, source } => {
                assert_eq!(*stage, HookStage::PreCodegen);
                assert_eq!(module, "add_one");
                assert_eq!(source.message(), "rejected");
            }
            other => panic!("expected hook failure for {target}, got {other}"),
        }
        assert_eq!(err.to_string(), "pre-codegen hook failed for module add_one: rejected");
        assert_eq!(post_calls.load(Ordering::SeqCst), 0);
        // Code generation never started, so nothing was pre-planned.
        assert_eq!(allocator.total_allocations(0), 0);
    }
}

#[test]
fn test_failing_post_hook_skips_codegen() {
    init_logging();
    let backend = backend("CUDA");
    let compiler = Compiler::new(Target::Nvptx);
    let pre_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&pre_calls);
    compiler.set_pre_codegen_hook(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    compiler.set_post_codegen_hook(|_| Err(HookError::new("too big")));

    let allocator = TrackingAllocator::new("CUDA", 2, 1 << 20);
    let err = compiler
        .run_backend(module(ADD_ONE), backend.default_device(), Some(&allocator))
        .unwrap_err();

    assert!(matches!(
        err,
        CompileError::HookFailure {
            stage: HookStage::PostCodegen,
            ..
        }
    ));
    assert_eq!(pre_calls.load(Ordering::SeqCst), 1);
    assert_eq!(allocator.total_allocations(0), 0);
}

#[test]
fn test_hooks_observe_lir_before_and_after_passes() {
    init_logging();
    let backend = backend("Host");
    let compiler = Compiler::new(Target::Host);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let pre = Arc::clone(&seen);
    compiler.set_pre_codegen_hook(move |lir| {
        pre.lock().push(lir.instruction_count());
        Ok(())
    });
    let post = Arc::clone(&seen);
    compiler.set_post_codegen_hook(move |lir| {
        let folded = lir
            .entry()
            .body()
            .iter()
            .any(|inst| matches!(inst, LirInst::Const { bits: 42, .. }));
        if !folded {
            return Err(HookError::new("constant was not folded"));
        }
        post.lock().push(lir.instruction_count());
        Ok(())
    });

    let executable = compiler
        .run_backend(module(FOLDABLE), backend.default_device(), None)
        .unwrap();

    assert_eq!(*seen.lock(), vec![6, 4]);
    assert_eq!(executable.stats().instructions_lowered, 6);
    assert_eq!(executable.stats().instructions_after_passes, 4);
}

#[test]
fn test_replacing_hook_is_not_retroactive() {
    init_logging();
    let backend = backend("Host");
    let compiler = Compiler::new(Target::Host);

    let first = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&first);
    compiler.set_pre_codegen_hook(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    compiler
        .run_backend(module(ADD_ONE), backend.default_device(), None)
        .unwrap();
    assert_eq!(first.load(Ordering::SeqCst), 1);

    let second = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&second);
    compiler.set_pre_codegen_hook(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);

    compiler
        .run_backend(module(ADD_ONE), backend.default_device(), None)
        .unwrap();
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);

    compiler.clear_hooks();
    let executable = compiler
        .run_backend(module(ADD_ONE), backend.default_device(), None)
        .unwrap();
    assert_eq!(second.load(Ordering::SeqCst), 1);
    assert_eq!(executable.stats().hooks_invoked, 0);
}

#[test]
fn test_batch_runs_hooks_per_pair_in_order() {
    init_logging();
    let backend = backend("ROCM");
    let compiler = Compiler::new(Target::Amdgpu);
    let log = CallLog::default();
    log.install(&compiler);

    let modules = vec![module(ADD_ONE), module(FOLDABLE), module(ADD_ONE)];
    let device_sets = vec![devices(&backend), vec![backend.default_device().clone()], devices(&backend)];
    let executables = compiler.compile(modules, device_sets, None).unwrap();
    assert_eq!(executables.len(), 5);

    let calls = log.calls();
    assert_eq!(calls.len(), 10);
    for executable in &executables {
        let id = executable.module_id();
        let pre = calls.iter().position(|&c| c == (HookStage::PreCodegen, id));
        let post = calls.iter().position(|&c| c == (HookStage::PostCodegen, id));
        match (pre, post) {
            (Some(pre), Some(post)) => assert!(pre < post),
            _ => panic!("missing hook call for module id {id}"),
        }
    }
}

#[test]
fn test_serialized_hooks_never_overlap() {
    init_logging();
    let backend = backend("CUDA");
    let compiler = Compiler::with_options(
        Target::Nvptx,
        CompilerOptions {
            hook_policy: HookPolicy::Serialized,
            ..CompilerOptions::default()
        },
    );

    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let (active, max) = (Arc::clone(&in_flight), Arc::clone(&max_seen));
    compiler.set_pre_codegen_hook(move |_| {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(2));
        active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    });

    let modules: Vec<_> = (0..8).map(|_| module(ADD_ONE)).collect();
    let device_sets = vec![devices(&backend); 8];
    let executables = compiler.compile(modules, device_sets, None).unwrap();

    assert_eq!(executables.len(), 16);
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}

#[test]
fn test_thread_safe_hooks_still_run_per_pair() {
    init_logging();
    let backend = backend("CUDA");
    let compiler = Compiler::with_options(
        Target::Nvptx,
        CompilerOptions {
            hook_policy: HookPolicy::ThreadSafe,
            ..CompilerOptions::default()
        },
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    compiler.set_post_codegen_hook(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let modules: Vec<_> = (0..4).map(|_| module(FOLDABLE)).collect();
    let device_sets = vec![devices(&backend); 4];
    compiler.compile(modules, device_sets, None).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 8);
}

#[test]
fn test_thread_safe_hook_may_reenter_compiler() {
    init_logging();
    let backend = backend("Host");
    let device = backend.default_device().clone();
    let compiler = Arc::new(Compiler::with_options(
        Target::Host,
        CompilerOptions {
            hook_policy: HookPolicy::ThreadSafe,
            ..CompilerOptions::default()
        },
    ));

    let nested = Arc::new(Mutex::new(Vec::new()));
    let weak = Arc::downgrade(&compiler);
    let results = Arc::clone(&nested);
    let entered = Arc::new(AtomicUsize::new(0));
    compiler.set_pre_codegen_hook(move |_| {
        if entered.fetch_add(1, Ordering::SeqCst) > 0 {
            return Ok(());
        }
        let compiler = weak
            .upgrade()
            .ok_or_else(|| HookError::new("compiler dropped"))?;
        let executable = compiler
            .run_backend(module(FOLDABLE), &device, None)
            .map_err(|e| HookError::new(e.to_string()))?;
        results.lock().push(executable.module_name().to_string());
        Ok(())
    });

    let executable = compiler
        .run_backend(module(ADD_ONE), backend.default_device(), None)
        .unwrap();
    assert_eq!(executable.module_name(), "add_one");
    assert_eq!(*nested.lock(), vec!["foldable".to_string()]);
}

#[test]
fn test_parameterless_scalar_constant_on_every_variant() {
    init_logging();
    let text = "HloModule constant_42\nENTRY main {\n  ROOT c = f32[] constant(42)\n}\n";
    for (target, backend) in all_variants() {
        let compiler = Compiler::new(target);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pre = Arc::clone(&seen);
        compiler.set_pre_codegen_hook(move |lir| {
            let entry = lir.entry();
            pre.lock().push((HookStage::PreCodegen, entry.params().len(), entry.output().element_count));
            Ok(())
        });
        let post = Arc::clone(&seen);
        compiler.set_post_codegen_hook(move |lir| {
            let entry = lir.entry();
            post.lock().push((HookStage::PostCodegen, entry.params().len(), entry.output().element_count));
            Ok(())
        });

        let executable = compiler
            .run_backend(module(text), backend.default_device(), None)
            .unwrap();

        assert_eq!(
            *seen.lock(),
            vec![(HookStage::PreCodegen, 0, 1), (HookStage::PostCodegen, 0, 1)],
            "{target}"
        );
        assert_eq!(executable.stats().hooks_invoked, 2);
        assert_eq!(executable.entry_symbol(), "constant_42_main");
        assert_eq!(executable.buffer_assignment().allocations().len(), 1);
        assert!(executable.payload().code_size() > 0, "{target}");
    }
}
