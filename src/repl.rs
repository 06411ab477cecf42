use std::io::Write;

use inkwell::context::Context;
use inkwell::execution_engine::ExecutionEngine;

use crate::backend::llvm_backend::{BackendError, LLVMContext};
use crate::cli::Cli;
use crate::frontend::ast::Describe;
use crate::frontend::lexer::Token;
use crate::frontend::ops::OperatorTable;
use crate::frontend::parser::Parser;

// The REPL reads a line at a time, parses as many forms off it as it can,
// and dispatches each one: definitions and externs lower into the current
// unit, bare expressions are JIT compiled and evaluated on the spot. A
// parse error skips one token and resumes, so one bad form does not take
// the rest of the line with it.

pub fn run(cli: &Cli) -> Result<(), BackendError> {
    let context = Context::create();
    let mut llvm = LLVMContext::new(&context, cli.opt_level.into(), None)?;
    let engine = llvm.create_engine()?;
    let ops = OperatorTable::new();

    let mut input_buf = String::new();

    loop {
        print!("Ready >> ");
        let _ = std::io::stdout().flush();

        input_buf.clear();
        match std::io::stdin().read_line(&mut input_buf) {
            // EOF ends the session
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        run_line(&input_buf, &mut llvm, &engine, &ops, cli);
    }

    Ok(())
}

fn run_line<'ctx>(
    line: &str,
    llvm: &mut LLVMContext<'ctx>,
    engine: &ExecutionEngine<'ctx>,
    ops: &OperatorTable,
    cli: &Cli,
) {
    let mut parser = Parser::new(line, ops);

    loop {
        match parser.current() {
            Token::Eof => return,

            // eat semicolons and move on
            Token::Op(';') => parser.next_token(),

            Token::Def => match parser.parse_definition() {
                Ok(function) => {
                    if cli.inspect_tree {
                        println!("{}", function.describe(0));
                    }
                    match function.codegen(llvm, ops) {
                        Ok(_) => {
                            if let Err(err) = llvm.run_passes(&cli.passes) {
                                eprintln!("Backend error: {err}");
                                llvm.start_unit();
                                continue;
                            }
                            if cli.inspect_ir {
                                llvm.dump_module();
                            }
                            // ship the definition so later lines can call it
                            if let Err(err) = llvm.ship_unit(engine) {
                                eprintln!("Backend error: {err}");
                            }
                        }
                        Err(err) => eprintln!("Lowering error: {err}"),
                    }
                }
                Err(err) => {
                    eprintln!("Frontend error: {err}");
                    parser.next_token();
                }
            },

            Token::Extern => match parser.parse_extern() {
                Ok(proto) => {
                    if cli.inspect_tree {
                        println!("{}", proto.describe(0));
                    }
                    // the registry carries the signature into every unit
                    // that mentions the name
                    llvm.register_prototype(proto.clone());
                    proto.codegen(llvm);
                    if cli.inspect_ir {
                        llvm.dump_module();
                    }
                }
                Err(err) => {
                    eprintln!("Frontend error: {err}");
                    parser.next_token();
                }
            },

            _ => match parser.parse_top_level_expr() {
                Ok(function) => {
                    if cli.inspect_tree {
                        println!("{}", function.describe(0));
                    }
                    match function.codegen(llvm, ops) {
                        Ok(wrapper) => {
                            if let Err(err) = llvm.run_passes(&cli.passes) {
                                eprintln!("Backend error: {err}");
                                llvm.start_unit();
                                continue;
                            }
                            if cli.inspect_ir {
                                llvm.dump_module();
                            }
                            match unsafe { llvm.jit_eval(engine, wrapper) } {
                                Ok(value) => println!("Evaluated to {value}"),
                                Err(err) => eprintln!("Backend error: {err}"),
                            }
                        }
                        Err(err) => eprintln!("Lowering error: {err}"),
                    }
                }
                Err(err) => {
                    eprintln!("Frontend error: {err}");
                    parser.next_token();
                }
            },
        }
    }
}
