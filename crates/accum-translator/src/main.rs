use anyhow::{Context, Result};
use clap::Parser as _;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use accum_translator::{assembler, ast, codegen, parser, sema};

#[derive(clap::Parser, Debug)]
#[command(
    author,
    version,
    about = "Translate surface-language or assembly sources to a binary image"
)]
struct Opts {
    /// Input is already assembly; skip the compiler front-end
    #[arg(long, conflicts_with = "hl")]
    asm: bool,
    /// Input is a surface-language program (default)
    #[arg(long)]
    hl: bool,
    /// Write an AST dump of the parsed program to this file
    #[arg(long, value_name = "FILE")]
    viz: Option<PathBuf>,
    #[arg(value_name = "INPUT")]
    input: PathBuf,
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let source = std::fs::read_to_string(&opts.input)
        .with_context(|| format!("failed to read {}", opts.input.display()))?;

    let asm = if opts.asm {
        source
    } else {
        let mut program = parser::parse_source(&source)?;
        sema::analyze(&mut program)?;

        if let Some(viz) = &opts.viz {
            std::fs::write(viz, ast::dump_program(&program))
                .with_context(|| format!("failed to write {}", viz.display()))?;
            tracing::info!(file = %viz.display(), "AST dump written");
        }

        codegen::generate(&program)?
    };

    let image = assembler::assemble(&asm)?;
    image
        .save(&opts.output)
        .with_context(|| format!("failed to write {}", opts.output.display()))?;

    tracing::info!(
        code = image.code_size,
        data = image.data_size,
        file = %opts.output.display(),
        "binary image written"
    );
    Ok(())
}
