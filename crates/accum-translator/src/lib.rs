pub mod assembler;
pub mod ast;
pub mod codegen;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod sema;

use anyhow::Result;

/// Compiles a surface-language source to assembly text.
pub fn compile(source: &str) -> Result<String> {
    let mut program = parser::parse_source(source)?;
    sema::analyze(&mut program)?;
    codegen::generate(&program)
}

/// Compiles a surface-language source all the way to a binary image.
pub fn compile_to_image(source: &str) -> Result<accum_rs::Image> {
    let asm = compile(source)?;
    assembler::assemble(&asm)
}
