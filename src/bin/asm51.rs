use std::{
    error::Error,
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use asm51::Config;
use clap::Parser;
use tracing::Level;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Assembly source file
    source: PathBuf,

    /// Output hex file (default: SOURCE with a `.hex` extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pre-defined macros (repeatable)
    #[arg(short = 'D', long, value_name = "NAME=expansion", value_parser = asm51::parse_defines::<String, String>)]
    define: Vec<(String, String)>,

    /// Search directories for included files
    #[arg(short = 'I', long)]
    include: Vec<PathBuf>,

    /// Preprocessor passes allowed before giving up
    #[arg(long)]
    max_passes: Option<usize>,

    /// Output makefile dependency lines instead of the hex file
    #[arg(short = 'M')]
    make_depend: bool,

    /// Output file for the symbol table
    #[arg(short = 'g', long)]
    symbols: Option<PathBuf>,

    /// One of `TRACE`, `DEBUG`, `INFO`, `WARN`, or `ERROR`
    #[arg(short, long, default_value_t = Level::INFO)]
    log_level: Level,
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(io::stderr)
        .init();

    if let Err(e) = main_real(args) {
        tracing::error!("{e}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn create(path: &Path) -> Result<BufWriter<File>, Box<dyn Error>> {
    let file = File::options()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| format!("cant open file `{}`: {e}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn main_real(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.include.extend(args.include);
    config.define.extend(args.define);
    if let Some(max_passes) = args.max_passes {
        config.max_passes = max_passes;
    }

    let assembly = asm51::assemble_file(&args.source, &config)?;

    let hex_path = args
        .output
        .clone()
        .unwrap_or_else(|| args.source.with_extension("hex"));

    if args.make_depend {
        tracing::trace!("writing dependencies");
        let mut output: Box<dyn Write> = match &args.output {
            Some(path) => Box::new(create(path)?),
            None => Box::new(io::stdout()),
        };
        for include in &assembly.included {
            writeln!(output, "{}: {}", hex_path.display(), include.display())?;
        }
        output.flush()?;
    } else {
        let mut hex = Vec::new();
        assembly.write_hex(&mut hex)?;
        tracing::trace!("writing {}", hex_path.display());
        let mut file = create(&hex_path)?;
        file.write_all(&hex)?;
        file.flush()?;
    }

    if let Some(path) = args.symbols {
        tracing::trace!("writing symbols");
        let mut file = create(&path)?;
        for (name, addr) in &assembly.symbols {
            writeln!(file, "{addr:04X} {name}")?;
        }
        file.flush()?;
    }

    tracing::debug!(
        "{} records, {} symbols, {} includes",
        assembly.records().len(),
        assembly.symbols.len(),
        assembly.included.len()
    );
    Ok(())
}
