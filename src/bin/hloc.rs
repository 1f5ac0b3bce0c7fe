// This binary is a command-line driver for the back-end pipeline. It builds a platform
// registry (the host plus optional single-device CUDA and ROCM platforms described on the
// command line), lists it, or compiles module files for one device of a chosen platform. The
// compiler is created for the resolved backend, debug options come from flags, and each
// artifact is written next to the input name with an extension for its payload kind.

//! Command-line driver for the back-end pipeline.
//!
//! Reads computation modules in text form, compiles them for a platform and
//! writes the artifacts: ELF objects for the host, PTX or AMDGCN assembly for
//! accelerators. Accelerator platforms are registered from `--cuda-arch` and
//! `--rocm-arch` with a single device each, for ahead-of-time compilation.

use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tpde_hlo::compiler::{Compiler, CompilerOptions, ExecutablePayload, Target};
use tpde_hlo::core::{
    Backend, BackendOptions, DeviceArch, DeviceDescription, Platform, PlatformKind,
    PlatformRegistry, StaticDevices,
};
use tpde_hlo::hlo::{parse_module_with_config, ModuleConfig};

#[derive(Parser, Debug)]
#[command(name = "hloc", version, about = "Compile computation modules to device executables")]
struct Cli {
    #[command(flatten)]
    platforms: PlatformArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct PlatformArgs {
    /// Register a CUDA platform with one device of this compute capability (e.g. 8.6).
    #[arg(long, global = true, value_name = "MAJOR.MINOR")]
    cuda_arch: Option<String>,

    /// Register a ROCM platform with one device of this architecture (e.g. gfx90a).
    #[arg(long, global = true, value_name = "GFX")]
    rocm_arch: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered platforms and their devices.
    Platforms,

    /// Compile one or more modules.
    Compile(CompileArgs),
}

#[derive(Args, Debug)]
struct CompileArgs {
    /// Module files in text form.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Platform to compile for.
    #[arg(short, long, default_value = "Host")]
    platform: String,

    /// Device ordinal within the platform.
    #[arg(short, long, default_value_t = 0)]
    device: usize,

    /// Output path (single input only).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Compilation threads (defaults to the number of CPUs).
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Print the low-level IR after the target passes.
    #[arg(long)]
    print_lir: bool,

    /// Back-end optimization level.
    #[arg(short = 'O', default_value_t = 2)]
    opt_level: u8,

    /// Threads per block for accelerator kernels.
    #[arg(long, default_value_t = 256)]
    block_size: u32,

    /// Skip a target pass by name.
    #[arg(long = "disable-pass", value_name = "PASS")]
    disabled_passes: Vec<String>,
}

fn build_registry(args: &PlatformArgs) -> Result<PlatformRegistry, Box<dyn std::error::Error>> {
    let mut registry = PlatformRegistry::with_host();

    if let Some(arch) = &args.cuda_arch {
        let (major, minor) = arch
            .split_once('.')
            .ok_or_else(|| format!("invalid compute capability '{arch}', expected MAJOR.MINOR"))?;
        let arch = DeviceArch::Cuda {
            major: major.parse()?,
            minor: minor.parse()?,
        };
        let devices = StaticDevices(vec![DeviceDescription::new("cuda:0", arch, 0)]);
        registry.register(Platform::new("CUDA", PlatformKind::Cuda, devices))?;
    }

    if let Some(gfx) = &args.rocm_arch {
        let arch = DeviceArch::Rocm { gfx: gfx.clone() };
        let devices = StaticDevices(vec![DeviceDescription::new("rocm:0", arch, 0)]);
        registry.register(Platform::new("ROCM", PlatformKind::Rocm, devices))?;
    }

    Ok(registry)
}

fn list_platforms(registry: &PlatformRegistry) -> Result<(), Box<dyn std::error::Error>> {
    for platform in registry.list_supported_platforms()? {
        match Backend::create(BackendOptions::new(Arc::clone(&platform))) {
            Ok(backend) => {
                println!("{} ({} devices)", platform.name(), backend.device_count());
                for device in backend.devices() {
                    let desc = device.description();
                    println!("  {device}: {} {:?}", desc.name, desc.arch);
                }
            }
            Err(e) => println!("{} (unavailable: {e})", platform.name()),
        }
    }
    Ok(())
}

fn compile(registry: &PlatformRegistry, args: CompileArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.output.is_some() && args.files.len() > 1 {
        return Err("--output requires a single input file".into());
    }

    let platform = registry.find_by_name(&args.platform)?;
    let mut options = BackendOptions::new(Arc::clone(&platform));
    if let Some(jobs) = args.jobs {
        options = options.with_intra_op_parallelism_threads(jobs);
    }
    let backend = Backend::create(options)?;
    let device = backend
        .device(args.device)
        .ok_or_else(|| format!("platform {} has no device {}", platform.name(), args.device))?
        .clone();

    let mut config = ModuleConfig::default();
    config.debug_options.backend_optimization_level = args.opt_level;
    config.debug_options.kernel_block_size = args.block_size;
    config.debug_options.disabled_passes = args.disabled_passes.clone();

    let mut modules = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let text = fs::read_to_string(path)?;
        modules.push(parse_module_with_config(&text, config.clone())?);
    }

    let compiler = Compiler::for_backend(&backend, CompilerOptions::default())?;
    if args.print_lir {
        compiler.set_post_codegen_hook(|lir| {
            println!("{lir}");
            Ok(())
        });
    }

    let device_sets = vec![vec![device]; modules.len()];
    let executables = compiler.compile(modules, device_sets, None)?;

    for executable in &executables {
        let extension = match (executable.payload(), compiler.target()) {
            (ExecutablePayload::HostObject(_), _) => "o",
            (ExecutablePayload::Kernel(_), Target::Nvptx) => "ptx",
            (ExecutablePayload::Kernel(_), _) => "s",
        };
        let path = args
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.{extension}", executable.module_name())));
        fs::write(&path, executable.payload().as_bytes())?;
        log::info!("{}", executable.stats());
        println!("{executable} -> {}", path.display());
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();
    let registry = build_registry(&cli.platforms)?;

    match cli.command {
        Command::Platforms => list_platforms(&registry),
        Command::Compile(args) => compile(&registry, args),
    }
}
