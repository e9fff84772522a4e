use clap::Parser as ClapParser;
use rspl_cli::colors::Palette;
use rspl_cli::config::RsplConfig;
use rspl_compiler::diagnostics::{format_compile_error, format_warning, Diagnostic};
use rspl_compiler::{compile_with_loader, CompileOutput};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "rsplc", version, about = "Compile RSPL sources into RSP overlay assembly")]
struct Cli {
    /// Source file (.rspl)
    file: PathBuf,

    /// Output file (default: the source path with a `.S` extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the assembly to stdout instead of a file
    #[arg(long, conflicts_with = "output")]
    stdout: bool,

    /// Disable the optimizer
    #[arg(long)]
    no_optimize: bool,

    /// Emit only the functions, without overlay header, command table and state
    #[arg(long)]
    no_wrapper: bool,

    /// Emit a comment with the source line before each statement (unoptimized output only)
    #[arg(long)]
    source_comments: bool,

    /// Rounds of instruction scheduling (0 disables it)
    #[arg(long)]
    schedule_rounds: Option<usize>,

    /// Preprocessor definition, `NAME` or `NAME=VALUE`
    #[arg(short = 'D', value_name = "NAME=VALUE")]
    define: Vec<String>,

    /// Config file to use instead of the nearest `rspl.toml`
    #[arg(long)]
    config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// More log output (`-v` debug, `-vv` trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rspl_compiler=warn")),
        1 => EnvFilter::new("rspl_compiler=debug,rspl_cli=debug"),
        _ => EnvFilter::new("rspl_compiler=trace,rspl_cli=trace"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let color = !cli.no_color;
    let palette = Palette::new(color);
    let error_label = palette.red("error:");

    let source = match std::fs::read_to_string(&cli.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{} cannot read file '{}': {}", error_label, cli.file.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let source_dir = cli
        .file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let config = match &cli.config {
        Some(path) => RsplConfig::load_from(path).map(|cfg| (Some(path.clone()), cfg)),
        None => RsplConfig::find_and_load(&source_dir),
    };
    let mut config = match config {
        Ok((path, cfg)) => {
            if let Some(path) = path {
                tracing::debug!(path = %path.display(), "loaded config");
            }
            cfg
        }
        Err(e) => {
            eprintln!("{} {}", error_label, e);
            return ExitCode::FAILURE;
        }
    };
    apply_flags(&cli, &mut config);

    let filename = cli.file.display().to_string();
    if !cli.stdout {
        println!("{} {}", palette.status("Compiling"), filename);
    }

    let loader = |path: &str| -> Result<String, String> {
        let full = source_dir.join(path);
        tracing::debug!(path = %full.display(), "reading include");
        std::fs::read_to_string(&full).map_err(|e| format!("{}: {}", full.display(), e))
    };
    let result = compile_with_loader(&source, &config.compile, &config.defines, &loader);

    let render = |diag: Diagnostic| if color { diag.render_ansi() } else { diag.render_plain() };
    let CompileOutput { asm, warnings } = match result {
        Ok(out) => out,
        Err(e) => {
            eprint!("{}", render(format_compile_error(&e, &source, &filename)));
            return ExitCode::FAILURE;
        }
    };
    for warning in &warnings {
        eprint!("{}", render(format_warning(warning, &source, &filename)));
    }

    if cli.stdout {
        print!("{}", asm);
        return ExitCode::SUCCESS;
    }
    let out_path = cli.output.clone().unwrap_or_else(|| cli.file.with_extension("S"));
    if let Err(e) = std::fs::write(&out_path, &asm) {
        eprintln!("{} writing to '{}': {}", error_label, out_path.display(), e);
        return ExitCode::FAILURE;
    }
    let summary = format!("{} lines, {} warning(s)", asm.lines().count(), warnings.len());
    println!(
        "{} {} ({})",
        palette.status("Writing"),
        palette.green(&out_path.display().to_string()),
        palette.gray(&summary)
    );
    ExitCode::SUCCESS
}

/// Command-line flags take precedence over `rspl.toml`.
fn apply_flags(cli: &Cli, config: &mut RsplConfig) {
    if cli.no_optimize {
        config.compile.optimize = false;
    }
    if cli.no_wrapper {
        config.compile.dispatch_wrapper = false;
    }
    if cli.source_comments {
        config.compile.source_comments = true;
    }
    if let Some(rounds) = cli.schedule_rounds {
        config.compile.schedule_rounds = rounds;
    }
    config.apply_defines(cli.define.iter().map(String::as_str));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from(["rsplc", "ucode.rspl", "--no-optimize", "-D", "BATCH=4", "--schedule-rounds", "0"]);
        let mut config = RsplConfig::default();
        config.defines.insert("BATCH".into(), "8".into());
        apply_flags(&cli, &mut config);
        assert!(!config.compile.optimize);
        assert!(config.compile.dispatch_wrapper);
        assert_eq!(config.compile.schedule_rounds, 0);
        assert_eq!(config.defines.get("BATCH").map(String::as_str), Some("4"));
    }

    #[test]
    fn verbosity_counts() {
        let cli = Cli::parse_from(["rsplc", "a.rspl", "-vv"]);
        assert_eq!(cli.verbose, 2);
        assert!(Cli::try_parse_from(["rsplc", "a.rspl", "-o", "x.S", "--stdout"]).is_err());
    }
}
