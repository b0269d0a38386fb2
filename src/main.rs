//! minic CLI.
//!
//! One positional input file; diagnostics go to stderr with ANSI colors,
//! the artifact (assembly by default, TAC with `--emit tac`) goes to the
//! output path. Exit code 0 only when nothing went wrong.

use clap::{CommandFactory, Parser as ClapParser};
use clap_complete::{generate, Shell};
use minic::{codegen, CompilerConfig, Emit};
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "minicc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "minic - compile a C subset to 32-bit x86 assembly", long_about = None)]
struct Cli {
    /// Input source file
    #[arg(required_unless_present = "completions")]
    input: Option<PathBuf>,

    /// Output path (defaults to the input stem plus .s or .tac)
    #[arg(short = 'o', long = "out")]
    out: Option<PathBuf>,

    /// Verbose parser/translator trace
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Artifact to write
    #[arg(long, value_enum)]
    emit: Option<EmitArg>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Disable ANSI colors in diagnostics
    #[arg(long)]
    no_color: bool,

    /// Treat warnings as errors
    #[arg(long)]
    deny_warnings: bool,

    /// Generate shell completions and exit
    #[arg(long, value_enum)]
    completions: Option<Shell>,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum EmitArg {
    Asm,
    Tac,
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("minic=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "minicc", &mut io::stdout());
        return;
    }

    let input = cli.input.expect("clap enforces the input argument");
    let mut config = load_config(cli.config.as_deref());
    if let Some(emit) = cli.emit {
        config.emit = match emit {
            EmitArg::Asm => Emit::Asm,
            EmitArg::Tac => Emit::Tac,
        };
    }
    if cli.no_color {
        config.color = false;
    }
    if cli.deny_warnings {
        config.deny_warnings = true;
    }

    let source = match std::fs::read_to_string(&input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: failed to read {}: {}", input.display(), e);
            process::exit(1);
        }
    };

    let output = cli.out.unwrap_or_else(|| default_output(&input, config.emit));
    run_build(&source, &input, &output, &config);
}

fn load_config(path: Option<&Path>) -> CompilerConfig {
    let Some(path) = path else {
        return CompilerConfig::default();
    };
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error reading config {}: {}", path.display(), e);
            process::exit(1);
        }
    };
    match CompilerConfig::from_toml(&content) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error in config {}: {}", path.display(), e);
            process::exit(1);
        }
    }
}

fn default_output(input: &Path, emit: Emit) -> PathBuf {
    let ext = match emit {
        Emit::Asm => "s",
        Emit::Tac => "tac",
    };
    input.with_extension(ext)
}

fn run_build(source: &str, input: &Path, output: &Path, config: &CompilerConfig) {
    let mut comp = minic::Compiler::new(source, config.color);
    let aborted = {
        let mut parser = minic::Parser::new(source, &mut comp);
        parser.parse().is_err()
    };
    if config.deny_warnings {
        comp.diags.promote_warnings();
    }
    let diags = comp.diags.render();
    if !diags.is_empty() {
        eprint!("{}", diags);
    }
    if aborted || comp.diags.has_errors() {
        process::exit(1);
    }

    comp.tac.finish();
    let artifact = match config.emit {
        Emit::Tac => comp.tac.listing(),
        Emit::Asm => match codegen::generate(&comp.tac) {
            Ok(asm) => asm,
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        },
    };

    if let Err(e) = std::fs::write(output, artifact) {
        eprintln!("Error: failed to write {}: {}", output.display(), e);
        process::exit(1);
    }
    println!("Compiled {} -> {}", input.display(), output.display());
}
