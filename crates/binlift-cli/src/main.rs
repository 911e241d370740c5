use anyhow::{bail, Context, Result};
use binlift_core::native::load_native_module;
use binlift_core::NativeModule;
use binlift_emit::{emit_json, EmitterConfig, IrEmitter, VerbosityLevel};
use binlift_lift::{lift, LiftConfig};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "binlift")]
#[command(about = "Lift a recovered native control-flow graph into binlift IR")]
#[command(version = "0.1.0")]
#[command(author = "Gianluca Brigandi <gbrigand@gmail.com>")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lift a module description and write the result.
    Lift {
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Spell register accesses as explicit state-structure loads and stores.
        #[arg(long)]
        legacy_mode: bool,

        /// Tag every instruction with its native PC under this annotation channel.
        #[arg(long, value_name = "TAG")]
        pc_annotation: Option<String>,

        /// Print native PCs next to instructions in text output.
        #[arg(long)]
        pcs: bool,

        #[arg(long)]
        no_color: bool,

        #[arg(short, long)]
        verbose: bool,
    },

    /// Check a module description without lifting it.
    Validate {
        input: PathBuf,

        #[arg(short, long)]
        verbose: bool,
    },

    /// Summarize what a module description contains.
    Inspect {
        input: PathBuf,

        #[arg(short, long)]
        verbose: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Object,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let verbose = match &cli.command {
        Commands::Lift { verbose, .. }
        | Commands::Validate { verbose, .. }
        | Commands::Inspect { verbose, .. } => *verbose,
    };
    init_logging(verbose);

    let outcome = match cli.command {
        Commands::Lift {
            input,
            output,
            format,
            legacy_mode,
            pc_annotation,
            pcs,
            no_color,
            verbose,
        } => {
            let config = LiftConfig {
                legacy_mode,
                pc_annotation,
                ..LiftConfig::default()
            };
            let emitter_config = EmitterConfig {
                use_colors: !no_color && output.is_none(),
                include_native_pcs: pcs,
                verbosity: if verbose {
                    VerbosityLevel::Verbose
                } else {
                    VerbosityLevel::Normal
                },
                ..EmitterConfig::default()
            };
            cmd_lift(&input, output.as_deref(), format, &config, emitter_config)
        }
        Commands::Validate { input, verbose } => cmd_validate(&input, verbose),
        Commands::Inspect { input, verbose } => cmd_inspect(&input, verbose),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".bright_red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// `-v` shows debug output from the binlift crates; RUST_LOG overrides.
fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_module("binlift", level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .init();
}

fn load(input: &Path) -> Result<NativeModule> {
    let cfg = load_native_module(input)
        .with_context(|| format!("failed to load {}", input.display()))?;
    Ok(cfg)
}

fn cmd_lift(
    input: &Path,
    output: Option<&Path>,
    format: OutputFormat,
    config: &LiftConfig,
    emitter_config: EmitterConfig,
) -> Result<()> {
    let cfg = load(input)?;
    let module = lift(&cfg, config).with_context(|| format!("failed to lift {}", cfg.name))?;

    let bytes = match format {
        OutputFormat::Text => IrEmitter::new(emitter_config).emit_module(&module)?.into_bytes(),
        OutputFormat::Json => {
            let mut buffer = Vec::new();
            emit_json(&module, &mut buffer)?;
            buffer
        }
        OutputFormat::Object => {
            if output.is_none() {
                bail!("object output needs --output");
            }
            binlift_core::codegen::ObjectEmitter::emit(&module)?
        }
    };

    match output {
        Some(path) => {
            fs::write(path, &bytes).with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!(
                "{} lifted {} functions into {}",
                "SUCCESS:".bright_green().bold(),
                cfg.ea_to_func.len(),
                path.display()
            );
        }
        None => print!("{}", String::from_utf8_lossy(&bytes)),
    }
    Ok(())
}

fn cmd_validate(input: &Path, verbose: bool) -> Result<()> {
    let cfg = load(input)?;
    cfg.validate()
        .with_context(|| format!("{} is not a valid module description", input.display()))?;

    println!("{}", "VALID".bright_green().bold());
    if verbose {
        println!(
            "   {} functions, {} variables, {} segments",
            cfg.ea_to_func.len(),
            cfg.ea_to_var.len(),
            cfg.segments.len()
        );
    }
    Ok(())
}

fn cmd_inspect(input: &Path, verbose: bool) -> Result<()> {
    let cfg = load(input)?;

    println!("{}", format!("Module {}", cfg.name).bright_cyan().bold());
    println!("{}", "=".repeat(50).bright_cyan());
    println!("Target: {}-{}", cfg.arch, cfg.os);
    if let Some(digest) = &cfg.digest {
        println!("SHA-256: {}", digest);
    }

    println!("\n{}", format!("Functions ({})", cfg.ea_to_func.len()).bright_yellow());
    for (ea, function) in &cfg.ea_to_func {
        let marker = if cfg.exported_funcs.contains(ea) { " [exported]" } else { "" };
        println!("  {:#x} {}{}", ea, function.display_name(), marker);
        if verbose {
            let count: usize = function.blocks.values().map(|b| b.instructions.len()).sum();
            println!("      {} blocks, {} instructions", function.blocks.len(), count);
        }
    }

    if !cfg.ea_to_extern_func.is_empty() || !cfg.ea_to_extern_var.is_empty() {
        println!(
            "\n{}",
            format!(
                "Imports ({})",
                cfg.ea_to_extern_func.len() + cfg.ea_to_extern_var.len()
            )
            .bright_yellow()
        );
        for (ea, function) in &cfg.ea_to_extern_func {
            println!("  {:#x} {}({} args)", ea, function.name, function.num_args);
        }
        for (ea, var) in &cfg.ea_to_extern_var {
            println!("  {:#x} {} ({} bytes)", ea, var.name, var.size);
        }
    }

    println!("\n{}", format!("Segments ({})", cfg.segments.len()).bright_yellow());
    for segment in cfg.segments.values() {
        let access = if segment.is_read_only { "r-" } else { "rw" };
        println!(
            "  {:#x}..{:#x} {} {}",
            segment.ea,
            segment.end(),
            access,
            segment.name
        );
        for var in cfg.variables_in(segment) {
            let marker = if cfg.exported_vars.contains(&var.ea) { " [exported]" } else { "" };
            println!("      {:#x} {} ({} bytes){}", var.ea, var.name, var.size, marker);
        }
        if verbose && !segment.xrefs.is_empty() {
            println!("      {} cross-references", segment.xrefs.len());
        }
    }

    if !cfg.init_funcs.is_empty() || !cfg.fini_funcs.is_empty() {
        println!(
            "\nInit: {}  Fini: {}",
            cfg.init_funcs.len(),
            cfg.fini_funcs.len()
        );
    }
    Ok(())
}
