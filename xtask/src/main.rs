//! Build orchestration for rustboot.
//!
//! Usage:
//!   cargo xtask build <target>
//!   cargo xtask build all
//!   cargo xtask clean
//!   cargo xtask objdump <target>
//!   cargo xtask layout
//!   cargo xtask sdimage <dtb> <kernel> <out>
//!   cargo xtask flash <image> <device>
//!
//! Targets: stm32mp135-dk

mod sdimage;

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, exit};

use anyhow::{Context, Result, anyhow, bail};
use bootcore::{BLOCK_SIZE, BootPlan, ImageSpec};

const TARGETS: &[(&str, &str, &str)] = &[
    // (name, rust target, binary name)
    ("stm32mp135-dk", "armv7a-none-eabihf", "boot"),
];

/// Static archive with the vendor bring-up hooks (`bsp_*`).
const BSP_LIB_VAR: &str = "RUSTBOOT_BSP_LIB";

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        exit(1);
    }

    if let Err(e) = run(&args) {
        println!("Error: {:#}", e);
        exit(1);
    }
}

fn run(args: &[String]) -> Result<()> {
    match args[1].as_str() {
        "build" => {
            let target = arg(args, 2, "target or 'all'")?;
            if target == "all" {
                for (name, _, _) in TARGETS {
                    build_target(name)?;
                }
                Ok(())
            } else {
                build_target(target)
            }
        }
        "clean" => clean(),
        "objdump" => objdump_target(arg(args, 2, "target")?),
        "layout" => {
            print_layout(&BootPlan::STM32MP135_DK);
            Ok(())
        }
        "sdimage" => {
            let dtb = Path::new(arg(args, 2, "device tree blob")?);
            let kernel = Path::new(arg(args, 3, "kernel image")?);
            let out = Path::new(arg(args, 4, "output image")?);
            let len = sdimage::build_file(&BootPlan::STM32MP135_DK, dtb, kernel, out)?;
            println!("Wrote {} ({} bytes)", out.display(), len);
            Ok(())
        }
        "flash" => {
            let image = Path::new(arg(args, 2, "image")?);
            let device = Path::new(arg(args, 3, "device")?);
            println!("Writing {} to {}...", image.display(), device.display());
            let len = sdimage::write_to_device(image, device)?;
            println!("Flash complete! {} bytes written.", len);
            Ok(())
        }
        other => {
            print_usage();
            bail!("unknown command: {}", other)
        }
    }
}

fn arg<'a>(args: &'a [String], index: usize, what: &str) -> Result<&'a str> {
    args.get(index).map(String::as_str).ok_or_else(|| {
        print_usage();
        anyhow!("specify {}", what)
    })
}

fn print_usage() {
    println!("rustboot build system");
    println!();
    println!("Usage:");
    println!("  cargo xtask build <target>                Build specific target");
    println!("  cargo xtask build all                     Build all targets");
    println!("  cargo xtask clean                         Clean build artifacts");
    println!("  cargo xtask objdump <target>              Disassemble target binary");
    println!("  cargo xtask layout                        Show the SD card and DDR layout");
    println!("  cargo xtask sdimage <dtb> <kernel> <out>  Assemble a raw SD card image");
    println!("  cargo xtask flash <image> <device>        Write an image to a block device");
    println!();
    println!("Targets:");
    for (name, arch, _) in TARGETS {
        println!("  {:<15} ({})", name, arch);
    }
    println!();
    println!("Building needs {} pointing at the vendor bring-up archive.", BSP_LIB_VAR);
}

fn print_layout(plan: &BootPlan) {
    println!("SD card ({}-byte blocks):", BLOCK_SIZE);
    for image in plan.images() {
        print_image(image);
    }
    println!();
    println!(
        "DRAM:   {} (+{:#x} bytes)",
        plan.dram.base,
        plan.dram.byte_len()
    );
    println!(
        "Loader: {} (+{:#x} bytes)",
        plan.loader.base,
        plan.loader.byte_len()
    );
    println!(
        "Timeouts: read {} ms, ready {} ms ({:?} on read timeout)",
        plan.read_timeout_ms, plan.ready_timeout_ms, plan.timeout_policy
    );
}

fn print_image(image: &ImageSpec) {
    println!(
        "  {:<13} blocks {:>5}..{:<5} ({:>8} bytes max) -> {} (window {:#x} bytes)",
        image.name,
        image.blocks.start,
        image.blocks.end(),
        image.blocks.byte_len(),
        image.region.base,
        image.region.byte_len()
    );
}

fn project_root() -> Result<PathBuf> {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    Path::new(manifest_dir)
        .parent()
        .map(Path::to_path_buf)
        .context("xtask has no parent directory")
}

fn find_target(name: &str) -> Result<(&'static str, &'static str, &'static str)> {
    TARGETS
        .iter()
        .find(|(n, _, _)| *n == name)
        .copied()
        .ok_or_else(|| {
            anyhow!(
                "unknown target: {} (available: {:?})",
                name,
                TARGETS.iter().map(|t| t.0).collect::<Vec<_>>()
            )
        })
}

fn release_dir(root: &Path, rust_target: &str) -> PathBuf {
    root.join("target").join(rust_target).join("release")
}

fn build_target(name: &str) -> Result<()> {
    let (_, rust_target, bin_name) = find_target(name)?;
    let bsp_lib = env::var(BSP_LIB_VAR)
        .with_context(|| format!("{} is not set", BSP_LIB_VAR))?;

    println!("Building {} for {}...", name, rust_target);

    let root = project_root()?;
    let platform_dir = root.join("platform").join(name);
    let linker_script = platform_dir.join("linker.ld");

    let status = Command::new("cargo")
        .current_dir(&root)
        .args([
            "build",
            "--release",
            "--package",
            &format!("rustboot-{}", name),
            "--target",
            rust_target,
        ])
        .env(
            "RUSTFLAGS",
            format!(
                "-C link-arg=-T{} -C link-arg={}",
                linker_script.display(),
                bsp_lib
            ),
        )
        .status()
        .context("failed to run cargo")?;

    if !status.success() {
        bail!("build failed");
    }

    let elf_path = release_dir(&root, rust_target).join(bin_name);
    let bin_path = release_dir(&root, rust_target).join(format!("{}.bin", bin_name));

    println!("Converting ELF to binary...");

    let objcopy = find_tool(&["rust-objcopy", "llvm-objcopy", "arm-none-eabi-objcopy"]);
    let status = Command::new(objcopy)
        .args(["-O", "binary"])
        .arg(&elf_path)
        .arg(&bin_path)
        .status()
        .with_context(|| format!("failed to run {}", objcopy))?;

    if !status.success() {
        bail!("objcopy failed");
    }

    let metadata = std::fs::metadata(&bin_path)
        .with_context(|| format!("reading {}", bin_path.display()))?;
    let loader = BootPlan::STM32MP135_DK.loader.byte_len() as u64;
    if metadata.len() > loader {
        bail!(
            "{} is {} bytes, SYSRAM holds {}",
            bin_path.display(),
            metadata.len(),
            loader
        );
    }

    println!();
    println!("Build complete!");
    println!("  ELF: {}", elf_path.display());
    println!("  BIN: {}", bin_path.display());
    println!(
        "  Size: {} bytes ({:.1} KB of {} KB SYSRAM)",
        metadata.len(),
        metadata.len() as f64 / 1024.0,
        loader / 1024
    );
    Ok(())
}

/// First of `candidates` that runs, or the first one if none does.
fn find_tool(candidates: &[&'static str]) -> &'static str {
    for &tool in candidates {
        if Command::new(tool).arg("--version").output().is_ok() {
            return tool;
        }
    }

    println!("Warning: Could not find {}. Install cargo-binutils:", candidates[0]);
    println!("  cargo install cargo-binutils");
    println!("  rustup component add llvm-tools");

    candidates[0]
}

fn clean() -> Result<()> {
    println!("Cleaning build artifacts...");
    let root = project_root()?;

    let status = Command::new("cargo")
        .current_dir(&root)
        .args(["clean"])
        .status()
        .context("failed to run cargo clean")?;

    if !status.success() {
        bail!("clean failed");
    }

    println!("Clean complete!");
    Ok(())
}

fn objdump_target(name: &str) -> Result<()> {
    let (_, rust_target, bin_name) = find_target(name)?;

    let root = project_root()?;
    let elf_path = release_dir(&root, rust_target).join(bin_name);

    if !elf_path.exists() {
        bail!("ELF not found. Run 'cargo xtask build {}' first.", name);
    }

    let objdump = find_tool(&["rust-objdump", "llvm-objdump", "arm-none-eabi-objdump"]);
    Command::new(objdump)
        .args(["-d", "--no-show-raw-insn"])
        .arg(&elf_path)
        .status()
        .with_context(|| format!("failed to run {}", objdump))?;
    Ok(())
}
