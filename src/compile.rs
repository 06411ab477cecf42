use std::error::Error;

use inkwell::context::Context;
use inkwell::targets::FileType;

use crate::backend::llvm_backend::LLVMContext;
use crate::cli::Cli;
use crate::frontend::ast::Describe;
use crate::frontend::lexer::Token;
use crate::frontend::ops::OperatorTable;
use crate::frontend::parser::Parser;

/// Lowers every top-level form of `source` into one module, runs the
/// pass pipeline over it, and writes the object (or assembly) file named
/// by the CLI. Parse and lowering failures are reported per form and
/// parsing resumes after them, but a form that failed means no output
/// file gets written.
pub fn compile_src(source: &str, cli: &Cli) -> Result<(), Box<dyn Error>> {
    let context = Context::create();
    let llvm = LLVMContext::new(&context, cli.opt_level.into(), cli.target.as_deref())?;

    let ops = OperatorTable::new();
    let mut parser = Parser::new(source, &ops);
    let mut errors = 0usize;

    loop {
        match parser.current() {
            Token::Eof => break,

            // eat semicolons and move on
            Token::Op(';') => parser.next_token(),

            Token::Def => match parser.parse_definition() {
                Ok(function) => {
                    if cli.inspect_tree {
                        println!("{}", function.describe(0));
                    }
                    if let Err(err) = function.codegen(&llvm, &ops) {
                        eprintln!("Lowering error: {err}");
                        errors += 1;
                    }
                }
                Err(err) => {
                    eprintln!("Frontend error: {err}");
                    errors += 1;
                    parser.next_token();
                }
            },

            Token::Extern => match parser.parse_extern() {
                Ok(proto) => {
                    if cli.inspect_tree {
                        println!("{}", proto.describe(0));
                    }
                    llvm.register_prototype(proto.clone());
                    proto.codegen(&llvm);
                }
                Err(err) => {
                    eprintln!("Frontend error: {err}");
                    errors += 1;
                    parser.next_token();
                }
            },

            _ => match parser.parse_top_level_expr() {
                Ok(function) => {
                    if cli.inspect_tree {
                        println!("{}", function.describe(0));
                    }
                    if let Err(err) = function.codegen(&llvm, &ops) {
                        eprintln!("Lowering error: {err}");
                        errors += 1;
                    }
                }
                Err(err) => {
                    eprintln!("Frontend error: {err}");
                    errors += 1;
                    parser.next_token();
                }
            },
        }
    }

    if errors > 0 {
        return Err(format!("{errors} errors, not writing {}", cli.output.display()).into());
    }

    llvm.run_passes(&cli.passes)?;

    if cli.inspect_ir {
        llvm.dump_module();
    }

    let file_type = if cli.asm_p {
        FileType::Assembly
    } else {
        FileType::Object
    };
    llvm.compile(&cli.output, file_type)?;

    Ok(())
}
