mod config;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use rcl_codegen::{write_outputs, OutputConfig};
use rcl_core::{CancellationToken, CompileOptions, CompileOutput, Compiler, Diagnostic, SourceInput};
use tracing_subscriber::EnvFilter;

/// Output format for `check` results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Artifacts written by `compile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmitFormat {
    Json,
    Js,
    Ts,
    All,
}

impl EmitFormat {
    fn outputs(self) -> Vec<rcl_codegen::OutputFormat> {
        use rcl_codegen::OutputFormat as F;
        match self {
            EmitFormat::Json => vec![F::Json],
            EmitFormat::Js => vec![F::Js],
            EmitFormat::Ts => vec![F::Ts],
            EmitFormat::All => F::ALL.to_vec(),
        }
    }
}

/// RCL conversational agent compiler.
#[derive(Parser)]
#[command(name = "rcl", version, about = "RCL conversational agent compiler")]
struct Cli {
    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile an .rcl file into a bundle and generated modules
    Compile {
        /// Path to the .rcl source file
        file: PathBuf,
        /// Output directory for generated files
        #[arg(long, default_value = "./dist")]
        out: PathBuf,
        /// Artifacts to write
        #[arg(long, value_enum, default_value = "all")]
        format: EmitFormat,
        /// Stop validation after the first validator that reports an error
        #[arg(long)]
        strict: bool,
        /// Project configuration (default: rcl.toml beside the source)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Report diagnostics for an .rcl file without writing anything
    Check {
        /// Path to the .rcl source file
        file: PathBuf,
        /// Diagnostic output format
        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
        /// Stop validation after the first validator that reports an error
        #[arg(long)]
        strict: bool,
        /// Project configuration (default: rcl.toml beside the source)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Compile {
            file,
            out,
            format,
            strict,
            config,
        } => cmd_compile(&file, &out, format, strict, config.as_deref(), cli.quiet),
        Commands::Check {
            file,
            output,
            strict,
            config,
        } => cmd_check(&file, output, strict, config.as_deref(), cli.quiet),
    }
}

/// Logs go to stderr, filtered by `RCL_LOG` (default `warn`).
fn init_tracing() {
    let filter = EnvFilter::try_from_env("RCL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn cmd_compile(
    file: &Path,
    out: &Path,
    format: EmitFormat,
    strict: bool,
    config: Option<&Path>,
    quiet: bool,
) {
    let result = run_pipeline(file, strict, config);
    print_diagnostics(file, &result.diagnostics);
    if result.has_errors() {
        fail(&format!("{}: compilation failed", file.display()));
    }
    let Some(bundle) = result.bundle else {
        fail(&format!(
            "{}: no bundle produced (an agent and at least one flow are required)",
            file.display()
        ));
    };

    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned());
    let output = OutputConfig {
        out_dir: out.to_path_buf(),
        stem,
        formats: format.outputs(),
    };
    match write_outputs(&bundle.to_interchange(), &output) {
        Ok(written) => {
            if !quiet {
                for path in written {
                    println!("{}", path.display());
                }
            }
        }
        Err(e) => fail(&format!("error: {}", e)),
    }
}

fn cmd_check(file: &Path, output: OutputFormat, strict: bool, config: Option<&Path>, quiet: bool) {
    let result = run_pipeline(file, strict, config);
    let errors = result.errors().count();
    let warnings = result.diagnostics.len() - errors;

    match output {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "file": file.display().to_string(),
                "valid": errors == 0,
                "diagnostics": result.diagnostics,
            });
            match serde_json::to_string_pretty(&report) {
                Ok(s) => println!("{}", s),
                Err(e) => fail(&format!("serialization error: {}", e)),
            }
        }
        OutputFormat::Text => {
            print_diagnostics(file, &result.diagnostics);
            if !quiet {
                println!(
                    "{}: {} error(s), {} warning(s)",
                    file.display(),
                    errors,
                    warnings
                );
            }
        }
    }
    if errors > 0 {
        process::exit(1);
    }
}

fn run_pipeline(file: &Path, strict: bool, config: Option<&Path>) -> CompileOutput {
    let mut options: CompileOptions = match config::resolve_options(config, file) {
        Ok(o) => o,
        Err(e) => fail(&format!("error: {}", e)),
    };
    options.strict |= strict;

    match Compiler::new(options).compile(&SourceInput::path(file), &CancellationToken::new()) {
        Ok(out) => out,
        Err(e) => fail(&format!("error: {}", e)),
    }
}

/// `file:line:col: severity[code]: message`, 1-based.
fn format_diagnostic(file: &Path, d: &Diagnostic) -> String {
    let origin = d
        .source
        .clone()
        .unwrap_or_else(|| file.display().to_string());
    match d.code() {
        Some(code) => format!("{}:{}: {}[{}]: {}", origin, d.range, d.severity, code, d.message),
        None => format!("{}:{}: {}: {}", origin, d.range, d.severity, d.message),
    }
}

fn print_diagnostics(file: &Path, diagnostics: &[Diagnostic]) {
    for d in diagnostics {
        eprintln!("{}", format_diagnostic(file, d));
    }
}

fn fail(msg: &str) -> ! {
    eprintln!("{}", msg);
    process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcl_core::{Position, Range};

    #[test]
    fn diagnostics_print_one_based_positions() {
        let d = Diagnostic::error(
            "unexpected-token",
            "expected '->'",
            Range::point(Position::new(2, 4, 30)),
        );
        assert_eq!(
            format_diagnostic(Path::new("agent.rcl"), &d),
            "agent.rcl:3:5: error[unexpected-token]: expected '->'"
        );
    }

    #[test]
    fn imported_diagnostics_name_their_file() {
        let d = Diagnostic::warning("unreferenced-state", "state 'X' is never used", Range::default())
            .with_source("lib/shared.rcl");
        assert_eq!(
            format_diagnostic(Path::new("agent.rcl"), &d),
            "lib/shared.rcl:1:1: warning[unreferenced-state]: state 'X' is never used"
        );
    }
}
